//! Axonflow Core - Foundation Types for the AxonFlow Engine
//!
//! This crate provides the foundation types shared by the AxonFlow tensor
//! and engine crates: the device and dtype systems, the common error type,
//! and reference-counted tensor storage with guarded slice access.
//!
//! # Key Features
//! - Runtime dtype information via the `DType` enum
//! - Type-safe numeric operations via the `Scalar`/`Numeric`/`Float` traits
//! - Reference-counted storage with zero-copy views
//! - Unified error type with detailed context
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
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::return_self_not_must_use)]

// =============================================================================
// Modules
// =============================================================================

pub mod device;
pub mod dtype;
pub mod error;
pub mod storage;

// =============================================================================
// Re-exports
// =============================================================================

pub use device::Device;
pub use dtype::{DType, Float, Numeric, Scalar};
pub use error::{Error, Result};
pub use storage::{Storage, StorageFormat};
