//! Axonflow Engine - Auto-Batching Execution for Define-by-Run Graphs
//!
//! This crate evaluates computation graphs that were built one sample at
//! a time, automatically discovering operations that can execute together
//! and fusing them into single batched kernel calls, without the graph
//! ever being built as a batched graph.
//!
//! A readiness scheduler groups ready operations into batchable buckets;
//! the forward executor rewrites the graph on the fly with gathered
//! inputs and a fused compute op, implanting per-sample results as lazy
//! views into the fused output; the backward executor walks the
//! augmented graph, aggregates gradients per variable, and performs
//! bucketed, fused back-propagation (in particular collapsing gradient
//! updates into a shared weight matrix).
//!
//! # Example
//! ```rust
//! use axonflow_engine::{Engine, Variable};
//! use axonflow_tensor::Tensor;
//!
//! let a = Variable::constant(Tensor::from_vec(vec![0.5, -0.5], &[2]).unwrap());
//! let b = Variable::constant(Tensor::from_vec(vec![1.0, 2.0], &[2]).unwrap());
//!
//! // two Tanh ops become ready together and execute as one fused kernel
//! let y = axonflow_engine::graph::splice(&[a.tanh(), b.tanh()], 1).unwrap();
//!
//! let mut engine = Engine::new();
//! let value = engine.forward(&y).unwrap();
//! assert_eq!(value.shape(), &[2, 2]);
//! ```
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::float_cmp)]
#![allow(clippy::needless_range_loop)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::return_self_not_must_use)]

// =============================================================================
// Modules
// =============================================================================

pub mod arena;
pub mod backward;
pub mod engine;
pub mod error;
pub mod function;
pub mod graph;
pub mod kernels;
pub mod op;
pub mod schedule;
pub mod variable;

// =============================================================================
// Re-exports
// =============================================================================

pub use arena::{TensorArena, DEFAULT_ARENA_CAPACITY};
pub use engine::{Engine, EngineOptions, EngineStats, TraceEvent};
pub use error::{EngineError, EngineResult};
pub use function::{Function, VisitState};
pub use graph::splice;
pub use kernels::{CpuKernels, KernelLibrary};
pub use op::{Attributes, OpCode};
pub use variable::{LazySource, VarKind, Variable};

// =============================================================================
// Prelude
// =============================================================================

/// Convenient imports for common engine usage.
pub mod prelude {
    pub use crate::engine::{Engine, EngineOptions};
    pub use crate::error::{EngineError, EngineResult};
    pub use crate::graph::splice;
    pub use crate::op::OpCode;
    pub use crate::variable::Variable;
}
