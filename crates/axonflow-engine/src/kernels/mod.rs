//! Kernels - Primitive Math Collaborators
//!
//! The engine delegates all primitive math through the `KernelLibrary`
//! trait: forward evaluation of a primitive into an optional
//! pre-allocated buffer, reverse-mode backprop with the beta accumulation
//! contract, and gather-batch stacking. The trait seam is what lets tests
//! wrap the reference kernels with invocation counters and what a device
//! backend would implement.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use axonflow_tensor::Tensor;

use crate::error::EngineResult;
use crate::op::{Attributes, OpCode};

pub mod cpu;

pub use cpu::CpuKernels;

// =============================================================================
// Kernel Library Trait
// =============================================================================

/// Primitive kernel collaborator interface.
pub trait KernelLibrary: Send + Sync {
    /// Computes the forward value of a primitive.
    ///
    /// When `out` is provided (an arena-carved buffer of `output_shape`),
    /// the result is written into it and the same tensor is returned;
    /// otherwise a fresh tensor is allocated.
    fn compute(
        &self,
        op: OpCode,
        inputs: &[Tensor<f32>],
        attrs: &Attributes,
        output_shape: &[usize],
        out: Option<Tensor<f32>>,
    ) -> EngineResult<Tensor<f32>>;

    /// Reverse-mode kernel: writes
    /// `input_grad := beta * input_grad + d(output)/d(input_i) * output_grad`.
    ///
    /// `beta == 0.0` overwrites the gradient buffer, `beta == 1.0`
    /// accumulates into it.
    #[allow(clippy::too_many_arguments)]
    fn backprop(
        &self,
        output_grad: &Tensor<f32>,
        input_index: usize,
        op: OpCode,
        attrs: &Attributes,
        output_value: Option<&Tensor<f32>>,
        input_values: &[Tensor<f32>],
        input_grad: &Tensor<f32>,
        beta: f32,
    ) -> EngineResult<()>;

    /// Stacks same-shape tensors along a new axis at position `axis`
    /// (operands of lower rank are padded with trailing singleton axes).
    fn gather_batch(
        &self,
        inputs: &[Tensor<f32>],
        axis: usize,
        out: Option<Tensor<f32>>,
    ) -> EngineResult<Tensor<f32>>;
}
