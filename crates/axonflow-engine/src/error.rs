//! Error Types - Engine Failure Taxonomy
//!
//! All engine failures are fatal to the current pass: there is no local
//! recovery. After an error the caller must discard the graph-local
//! scheduling state (pending counts, consumer lists) by rebuilding the
//! graph; tensor values already produced remain valid.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

/// The error type for engine passes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Forward evaluation reached an Input or Placeholder with no bound value.
    #[error("value depends on an Input or Placeholder with no bound value")]
    DependsOnUnboundInput,

    /// A function was re-entered during traversal.
    #[error("the graph contains a cycle")]
    CyclicGraph,

    /// Backward walked into a StopGradient function.
    #[error("encountered StopGradient during backward; needs-gradient flags are inconsistent")]
    UnexpectedStopGradient,

    /// A tensor value the forward pass should have populated is missing.
    #[error("missing value: {context}")]
    MissingValue {
        /// Where the value was expected.
        context: &'static str,
    },

    /// A gradient tensor the backward pass should have populated is missing.
    #[error("missing gradient: {context}")]
    MissingGradient {
        /// Where the gradient was expected.
        context: &'static str,
    },

    /// A batched code path encountered a multi-output function.
    #[error("multi-output functions are not supported by batched execution")]
    MultiOutputUnsupported,

    /// An internal sanity check failed.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A gradient was requested for a variable that is not an ancestor of root.
    #[error("requested gradient is not reachable from the root")]
    NotAConsumer,

    /// A gradient was requested for a variable with `needs_gradient` false.
    #[error("cannot compute a gradient for a variable with needs_gradient disabled")]
    GradientNotAllowed,

    /// A tensor-layer failure (shape, broadcast, indexing, allocation).
    #[error(transparent)]
    Tensor(#[from] axonflow_core::Error),
}

// =============================================================================
// Result Type
// =============================================================================

/// A specialized Result type for engine operations.
pub type EngineResult<T> = core::result::Result<T, EngineError>;

// =============================================================================
// Helper Functions
// =============================================================================

impl EngineError {
    /// Creates a new invariant violation error.
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }
}

// =============================================================================
// Tests
// =============================================================================
