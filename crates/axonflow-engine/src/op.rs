//! Op Codes and Attributes - Primitive Operation Identity
//!
//! Identifies the primitive operations the engine schedules and the small
//! attribute record that parameterizes them. Attributes take part in the
//! batchability comparison: two ready operations only share a fused kernel
//! when their attributes compare equal.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use axonflow_tensor::Shape;

// =============================================================================
// Op Codes
// =============================================================================

/// Primitive operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Element-wise addition.
    Plus,
    /// Element-wise subtraction.
    Minus,
    /// Element-wise multiplication.
    ElementTimes,
    /// Matrix product; the first input is the weight and must be
    /// variable-identical for two ops to batch.
    Times,
    /// Hyperbolic tangent.
    Tanh,
    /// Logistic sigmoid.
    Sigmoid,
    /// Exponential.
    Exp,
    /// Negation.
    Negate,
    /// Sum over all axes not present in the output shape.
    ReduceSum,
    /// Concatenate along an existing axis, or stack along a new axis.
    Splice,
    /// Narrow view along an axis (`begin..end`).
    Slice,
    /// View with a new shape.
    Reshape,
    /// Identity view.
    Pass,
    /// Identity view (no operation).
    NoOp,
    /// Scheduling fence; executes only when no other work remains.
    Barrier,
    /// Identity view that blocks gradient flow.
    StopGradient,
}

impl OpCode {
    /// Returns true for ops whose output is a cheap alias of an input
    /// (no kernel work; always executed first and batched whole-sale).
    #[must_use]
    pub const fn is_view(self) -> bool {
        matches!(
            self,
            Self::StopGradient
                | Self::Pass
                | Self::NoOp
                | Self::Barrier
                | Self::Reshape
                | Self::Slice
        )
    }

    /// Returns the display name of this op.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Plus => "Plus",
            Self::Minus => "Minus",
            Self::ElementTimes => "ElementTimes",
            Self::Times => "Times",
            Self::Tanh => "Tanh",
            Self::Sigmoid => "Sigmoid",
            Self::Exp => "Exp",
            Self::Negate => "Negate",
            Self::ReduceSum => "ReduceSum",
            Self::Splice => "Splice",
            Self::Slice => "Slice",
            Self::Reshape => "Reshape",
            Self::Pass => "Pass",
            Self::NoOp => "NoOp",
            Self::Barrier => "Barrier",
            Self::StopGradient => "StopGradient",
        }
    }
}

impl core::fmt::Display for OpCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Attributes
// =============================================================================

/// Per-function attribute record consumed by the kernels and compared for
/// batchability.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    /// Axis parameter (Splice concatenation/stack axis, Slice axis).
    pub axis: Option<usize>,
    /// Slice begin index (inclusive).
    pub begin: Option<usize>,
    /// Slice end index (exclusive).
    pub end: Option<usize>,
    /// Target shape (Reshape).
    pub shape: Option<Shape>,
}

impl Attributes {
    /// Attributes carrying only an axis.
    #[must_use]
    pub fn with_axis(axis: usize) -> Self {
        Self {
            axis: Some(axis),
            ..Self::default()
        }
    }

    /// Attributes for a Slice along `axis` over `begin..end`.
    #[must_use]
    pub fn slice(axis: usize, begin: usize, end: usize) -> Self {
        Self {
            axis: Some(axis),
            begin: Some(begin),
            end: Some(end),
            shape: None,
        }
    }

    /// Attributes for a Reshape to `shape`.
    #[must_use]
    pub fn reshape(shape: &[usize]) -> Self {
        Self {
            shape: Some(Shape::from_slice(shape)),
            ..Self::default()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_op_classification() {
        assert!(OpCode::Pass.is_view());
        assert!(OpCode::Barrier.is_view());
        assert!(OpCode::Slice.is_view());
        assert!(OpCode::Reshape.is_view());
        assert!(!OpCode::Tanh.is_view());
        assert!(!OpCode::Splice.is_view());
        assert!(!OpCode::Times.is_view());
    }

    #[test]
    fn test_attribute_equality() {
        assert_eq!(Attributes::with_axis(1), Attributes::with_axis(1));
        assert_ne!(Attributes::with_axis(1), Attributes::with_axis(2));
        assert_ne!(Attributes::slice(0, 0, 2), Attributes::with_axis(0));
    }
}
