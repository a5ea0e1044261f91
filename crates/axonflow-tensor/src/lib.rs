//! Axonflow Tensor - N-Dimensional Arrays for the AxonFlow Engine
//!
//! This crate provides the dense `Tensor` type consumed by the AxonFlow
//! execution engine: strided N-dimensional arrays over reference-counted
//! storage, with zero-copy views (narrow, select, index-last-axis,
//! reshape) and the element-wise / matrix / reduction math the reference
//! kernels are built from.
//!
//! Broadcasting in this crate aligns shapes at axis 0 and broadcasts over
//! missing *trailing* axes. This is the convention that lets a batched
//! tensor (batch appended as a new trailing axis) combine with unbatched
//! operands without any reshaping.
//!
//! # Example
//! ```rust
//! use axonflow_tensor::{ones, zeros, Tensor};
//!
//! let a = zeros::<f32>(&[2, 3]);
//! let b = ones::<f32>(&[2, 3]);
//! let c = axonflow_tensor::ops::zip(&a, &b, |x, y| x + y).unwrap();
//! assert_eq!(c.to_vec(), vec![1.0; 6]);
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
#![allow(clippy::needless_range_loop)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::return_self_not_must_use)]

// =============================================================================
// Modules
// =============================================================================

pub mod creation;
pub mod ops;
pub mod shape;
pub mod tensor;
pub mod view;

// =============================================================================
// Re-exports
// =============================================================================

pub use axonflow_core::{DType, Device, Error, Result};
pub use creation::{arange, full, ones, rand, randn, zeros};
pub use shape::{Shape, Strides};
pub use tensor::Tensor;
