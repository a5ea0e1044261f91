//! CPU Kernels - Reference Implementation
//!
//! Reference CPU implementation of the kernel collaborator interface.
//! Element-wise loops parallelize over elements with rayon; matrix and
//! gather kernels are straightforward strided loops. Binary operations
//! broadcast with axis-0 alignment, so operands carrying a trailing batch
//! axis combine directly with unbatched peers.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use rayon::prelude::*;

use axonflow_tensor::ops::{accumulate, matmul, zip};
use axonflow_tensor::shape::{contiguous_strides, linear_index, pad_to_rank, unravel_index};
use axonflow_tensor::{zeros, Tensor};

use crate::error::{EngineError, EngineResult};
use crate::op::{Attributes, OpCode};

use super::KernelLibrary;

// =============================================================================
// CpuKernels
// =============================================================================

/// The reference CPU kernel library.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuKernels;

impl CpuKernels {
    /// Creates the reference kernel library.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn unary(x: &Tensor<f32>, f: impl Fn(f32) -> f32 + Sync + Send) -> Tensor<f32> {
    let data: Vec<f32> = x.to_vec().par_iter().map(|&a| f(a)).collect();
    Tensor::from_vec(data, x.shape()).expect("shape preserved")
}

/// Sums `src` into `shape`: output axes of extent 1 and axes missing from
/// `shape` collapse by summation. The inverse of axis-0-aligned
/// broadcasting.
fn reduce_to_shape(src: &Tensor<f32>, shape: &[usize]) -> Tensor<f32> {
    if src.shape() == shape {
        return src.clone();
    }

    let out_strides = contiguous_strides(shape);
    let mut data = vec![0.0f32; shape.iter().product()];
    let sv = src.to_vec();

    for (linear, &value) in sv.iter().enumerate() {
        let src_idx = unravel_index(linear, src.shape());
        let mut out_idx = src_idx;
        out_idx.truncate(shape.len());
        for (d, i) in out_idx.iter_mut().enumerate() {
            if shape[d] == 1 {
                *i = 0;
            }
        }
        data[linear_index(&out_idx, &out_strides)] += value;
    }

    Tensor::from_vec(data, shape).expect("length matches shape")
}

/// Gradient of `Times` w.r.t. the weight: `g * x^T` with trailing axes of
/// both operands flattened into shared columns.
fn times_grad_weight(g: &Tensor<f32>, x: &Tensor<f32>) -> EngineResult<Tensor<f32>> {
    let o = g.shape()[0];
    let cols: usize = g.shape()[1..].iter().product();
    let i = x.shape()[0];
    let x_cols: usize = x.shape()[1..].iter().product();
    if cols != x_cols {
        return Err(axonflow_core::Error::shape_mismatch(&[o, cols], x.shape()).into());
    }

    let gv = g.to_vec();
    let xv = x.to_vec();
    let mut out = vec![0.0f32; o * i];
    for r in 0..o {
        for k in 0..i {
            let mut acc = 0.0;
            for c in 0..cols {
                acc += gv[r * cols + c] * xv[k * cols + c];
            }
            out[r * i + k] = acc;
        }
    }
    Ok(Tensor::from_vec(out, &[o, i]).expect("length matches shape"))
}

/// Gradient of `Times` w.r.t. the operand: `w^T * g`.
fn times_grad_operand(w: &Tensor<f32>, g: &Tensor<f32>) -> EngineResult<Tensor<f32>> {
    let o = w.shape()[0];
    let i = w.shape()[1];
    if g.shape().first().copied() != Some(o) {
        return Err(axonflow_core::Error::shape_mismatch(&[o], g.shape()).into());
    }
    let cols: usize = g.shape()[1..].iter().product();

    let wv = w.to_vec();
    let gv = g.to_vec();
    let mut out = vec![0.0f32; i * cols];
    for k in 0..i {
        for c in 0..cols {
            let mut acc = 0.0;
            for r in 0..o {
                acc += wv[r * i + k] * gv[r * cols + c];
            }
            out[k * cols + c] = acc;
        }
    }

    let mut shape = vec![i];
    shape.extend_from_slice(&g.shape()[1..]);
    Ok(Tensor::from_vec(out, &shape).expect("length matches shape"))
}

/// Reshapes `result` to `output_shape` if needed, then writes it into the
/// provided output buffer (or returns it directly).
fn finish(
    result: Tensor<f32>,
    output_shape: &[usize],
    out: Option<Tensor<f32>>,
) -> EngineResult<Tensor<f32>> {
    let shaped = if result.shape() == output_shape {
        result
    } else {
        result.as_shape(output_shape)?
    };

    match out {
        Some(buffer) => {
            buffer.copy_from(&shaped)?;
            Ok(buffer)
        }
        None => Ok(shaped),
    }
}

// =============================================================================
// KernelLibrary Implementation
// =============================================================================

impl KernelLibrary for CpuKernels {
    fn compute(
        &self,
        op: OpCode,
        inputs: &[Tensor<f32>],
        attrs: &Attributes,
        output_shape: &[usize],
        out: Option<Tensor<f32>>,
    ) -> EngineResult<Tensor<f32>> {
        match op {
            OpCode::Plus => finish(zip(&inputs[0], &inputs[1], |a, b| a + b)?, output_shape, out),
            OpCode::Minus => finish(zip(&inputs[0], &inputs[1], |a, b| a - b)?, output_shape, out),
            OpCode::ElementTimes => {
                finish(zip(&inputs[0], &inputs[1], |a, b| a * b)?, output_shape, out)
            }
            OpCode::Tanh => finish(unary(&inputs[0], f32::tanh), output_shape, out),
            OpCode::Sigmoid => finish(
                unary(&inputs[0], |a| 1.0 / (1.0 + (-a).exp())),
                output_shape,
                out,
            ),
            OpCode::Exp => finish(unary(&inputs[0], f32::exp), output_shape, out),
            OpCode::Negate => finish(unary(&inputs[0], |a| -a), output_shape, out),
            OpCode::Times => finish(matmul(&inputs[0], &inputs[1])?, output_shape, out),
            OpCode::ReduceSum => finish(reduce_to_shape(&inputs[0], output_shape), output_shape, out),
            OpCode::Splice => {
                let axis = attrs
                    .axis
                    .ok_or_else(|| EngineError::invariant("Splice requires an axis attribute"))?;
                if axis >= inputs[0].ndim() {
                    self.gather_batch(inputs, axis, out)
                } else {
                    let target = match out {
                        Some(buffer) => buffer,
                        None => zeros::<f32>(output_shape),
                    };
                    let mut offset = 0;
                    for x in inputs {
                        let len = x.shape()[axis];
                        target.narrow(axis, offset, len)?.copy_from(x)?;
                        offset += len;
                    }
                    Ok(target)
                }
            }
            _ => Err(EngineError::invariant(format!(
                "{op} is not a compute kernel"
            ))),
        }
    }

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
    ) -> EngineResult<()> {
        let input_shape = input_values[input_index].shape().to_vec();

        let contribution = match op {
            OpCode::Plus => reduce_to_shape(output_grad, &input_shape),
            OpCode::Minus => {
                if input_index == 0 {
                    reduce_to_shape(output_grad, &input_shape)
                } else {
                    reduce_to_shape(&unary(output_grad, |g| -g), &input_shape)
                }
            }
            OpCode::ElementTimes => {
                let other = &input_values[1 - input_index];
                reduce_to_shape(&zip(output_grad, other, |g, v| g * v)?, &input_shape)
            }
            OpCode::Tanh => {
                let y = output_value.ok_or(EngineError::MissingValue {
                    context: "Tanh backprop requires the output value",
                })?;
                zip(output_grad, y, |g, y| g * (1.0 - y * y))?
            }
            OpCode::Sigmoid => {
                let y = output_value.ok_or(EngineError::MissingValue {
                    context: "Sigmoid backprop requires the output value",
                })?;
                zip(output_grad, y, |g, y| g * y * (1.0 - y))?
            }
            OpCode::Exp => {
                let y = output_value.ok_or(EngineError::MissingValue {
                    context: "Exp backprop requires the output value",
                })?;
                zip(output_grad, y, |g, y| g * y)?
            }
            OpCode::Negate => unary(output_grad, |g| -g),
            OpCode::Times => {
                if input_index == 0 {
                    times_grad_weight(output_grad, &input_values[1])?
                } else {
                    times_grad_operand(&input_values[0], output_grad)?
                        .as_shape(&input_shape)?
                }
            }
            OpCode::ReduceSum => {
                // the scalar (or reduced) gradient broadcasts back over the input
                return Ok(accumulate(input_grad, output_grad, beta)?);
            }
            OpCode::Splice => {
                let axis = attrs
                    .axis
                    .ok_or_else(|| EngineError::invariant("Splice requires an axis attribute"))?;
                if axis >= input_shape.len() {
                    output_grad
                        .index_last_axis(input_index)?
                        .as_shape(&input_shape)?
                } else {
                    let offset: usize = input_values[..input_index]
                        .iter()
                        .map(|v| v.shape()[axis])
                        .sum();
                    output_grad.narrow(axis, offset, input_shape[axis])?
                }
            }
            OpCode::Slice => {
                let (axis, begin, end) = match (attrs.axis, attrs.begin, attrs.end) {
                    (Some(a), Some(b), Some(e)) => (a, b, e),
                    _ => {
                        return Err(EngineError::invariant(
                            "Slice requires axis/begin/end attributes",
                        ))
                    }
                };
                // scatter into the sliced range; outside the range only
                // beta scaling applies, so a fresh buffer must be zeroed
                if beta == 0.0 {
                    input_grad.fill(0.0);
                }
                let region = input_grad.narrow(axis, begin, end - begin)?;
                return Ok(accumulate(&region, output_grad, beta)?);
            }
            OpCode::Pass | OpCode::NoOp | OpCode::Barrier => output_grad.clone(),
            OpCode::Reshape => output_grad.as_shape(&input_shape)?,
            OpCode::StopGradient => {
                return Err(EngineError::UnexpectedStopGradient);
            }
        };

        Ok(accumulate(input_grad, &contribution, beta)?)
    }

    fn gather_batch(
        &self,
        inputs: &[Tensor<f32>],
        axis: usize,
        out: Option<Tensor<f32>>,
    ) -> EngineResult<Tensor<f32>> {
        let first = inputs
            .first()
            .ok_or_else(|| EngineError::invariant("gather_batch requires at least one input"))?;

        let mut out_shape = pad_to_rank(first.shape(), axis);
        if out_shape.len() != axis {
            return Err(EngineError::invariant(format!(
                "gather_batch axis {axis} below operand rank {}",
                first.ndim()
            )));
        }
        out_shape.push(inputs.len());

        let target = match out {
            Some(buffer) => buffer,
            None => zeros::<f32>(&out_shape),
        };
        if target.shape() != out_shape.as_slice() {
            return Err(
                axonflow_core::Error::shape_mismatch(&out_shape, target.shape()).into(),
            );
        }

        for (j, x) in inputs.iter().enumerate() {
            let slot = target.index_last_axis(j)?;
            if x.shape() == slot.shape() {
                slot.copy_from(x)?;
            } else {
                slot.copy_from(&x.as_shape(slot.shape())?)?;
            }
        }
        Ok(target)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn t(data: Vec<f32>, shape: &[usize]) -> Tensor<f32> {
        Tensor::from_vec(data, shape).unwrap()
    }

    #[test]
    fn test_plus_forward() {
        let k = CpuKernels::new();
        let y = k
            .compute(
                OpCode::Plus,
                &[t(vec![1.0, 2.0], &[2]), t(vec![3.0, 4.0], &[2])],
                &Attributes::default(),
                &[2],
                None,
            )
            .unwrap();
        assert_eq!(y.to_vec(), vec![4.0, 6.0]);
    }

    #[test]
    fn test_times_forward_batched_columns() {
        let k = CpuKernels::new();
        let w = t(vec![1.0, 0.0, 0.0, 2.0], &[2, 2]);
        let x = t(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let y = k
            .compute(OpCode::Times, &[w, x], &Attributes::default(), &[2, 2], None)
            .unwrap();
        assert_eq!(y.to_vec(), vec![1.0, 2.0, 6.0, 8.0]);
    }

    #[test]
    fn test_writes_into_provided_buffer() {
        let k = CpuKernels::new();
        let buf = zeros::<f32>(&[2]);
        let y = k
            .compute(
                OpCode::Negate,
                &[t(vec![1.0, -2.0], &[2])],
                &Attributes::default(),
                &[2],
                Some(buf.clone()),
            )
            .unwrap();
        assert!(y.shares_storage(&buf));
        assert_eq!(buf.to_vec(), vec![-1.0, 2.0]);
    }

    #[test]
    fn test_splice_concat_and_stack() {
        let k = CpuKernels::new();
        let a = t(vec![1.0, 2.0], &[2]);
        let b = t(vec![3.0, 4.0], &[2]);

        let cat = k
            .compute(
                OpCode::Splice,
                &[a.clone(), b.clone()],
                &Attributes::with_axis(0),
                &[4],
                None,
            )
            .unwrap();
        assert_eq!(cat.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);

        let stack = k
            .compute(
                OpCode::Splice,
                &[a, b],
                &Attributes::with_axis(1),
                &[2, 2],
                None,
            )
            .unwrap();
        // stacking along the new trailing axis interleaves columns
        assert_eq!(stack.to_vec(), vec![1.0, 3.0, 2.0, 4.0]);
    }

    #[test]
    fn test_reduce_sum_keeps_batch_axis() {
        let k = CpuKernels::new();
        let x = t(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]);
        let y = k
            .compute(OpCode::ReduceSum, &[x], &Attributes::default(), &[1, 2], None)
            .unwrap();
        assert_eq!(y.to_vec(), vec![9.0, 12.0]);
    }

    #[test]
    fn test_tanh_backprop() {
        let k = CpuKernels::new();
        let x = t(vec![0.5, -0.5], &[2]);
        let y = k
            .compute(OpCode::Tanh, &[x.clone()], &Attributes::default(), &[2], None)
            .unwrap();
        let grad = zeros::<f32>(&[2]);
        k.backprop(
            &t(vec![1.0, 1.0], &[2]),
            0,
            OpCode::Tanh,
            &Attributes::default(),
            Some(&y),
            &[x],
            &grad,
            0.0,
        )
        .unwrap();

        let y0 = 0.5f32.tanh();
        assert!((grad.to_vec()[0] - (1.0 - y0 * y0)).abs() < 1e-6);
    }

    #[test]
    fn test_times_backprop_weight_is_outer_product() {
        let k = CpuKernels::new();
        let w = t(vec![0.0; 6], &[3, 2]);
        let x = t(vec![1.0, 2.0], &[2]);
        let g = t(vec![1.0, 10.0, 100.0], &[3]);
        let grad = zeros::<f32>(&[3, 2]);
        k.backprop(
            &g,
            0,
            OpCode::Times,
            &Attributes::default(),
            None,
            &[w, x],
            &grad,
            0.0,
        )
        .unwrap();
        assert_eq!(grad.to_vec(), vec![1.0, 2.0, 10.0, 20.0, 100.0, 200.0]);
    }

    #[test]
    fn test_plus_backprop_unbroadcasts() {
        let k = CpuKernels::new();
        // forward broadcast [2] + [2, 3]; gradient for the [2] input sums
        // over the trailing batch axis
        let a = t(vec![0.0, 0.0], &[2]);
        let b = t(vec![0.0; 6], &[2, 3]);
        let g = t(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let grad = zeros::<f32>(&[2]);
        k.backprop(
            &g,
            0,
            OpCode::Plus,
            &Attributes::default(),
            None,
            &[a, b],
            &grad,
            0.0,
        )
        .unwrap();
        assert_eq!(grad.to_vec(), vec![6.0, 15.0]);
    }

    #[test]
    fn test_slice_backprop_scatters() {
        let k = CpuKernels::new();
        let x = t(vec![0.0; 4], &[4]);
        let g = t(vec![5.0, 7.0], &[2]);
        let grad = t(vec![9.0; 4], &[4]); // stale contents; beta 0 overwrites
        k.backprop(
            &g,
            0,
            OpCode::Slice,
            &Attributes::slice(0, 1, 3),
            None,
            &[x],
            &grad,
            0.0,
        )
        .unwrap();
        assert_eq!(grad.to_vec(), vec![0.0, 5.0, 7.0, 0.0]);
    }

    #[test]
    fn test_gather_batch_stacks_last_axis() {
        let k = CpuKernels::new();
        let a = t(vec![1.0, 2.0], &[2]);
        let b = t(vec![3.0, 4.0], &[2]);
        let g = k.gather_batch(&[a.clone(), b.clone()], 1, None).unwrap();
        assert_eq!(g.shape(), &[2, 2]);
        assert_eq!(g.index_last_axis(0).unwrap().to_vec(), vec![1.0, 2.0]);
        assert_eq!(g.index_last_axis(1).unwrap().to_vec(), vec![3.0, 4.0]);
    }

    #[test]
    fn test_beta_accumulates() {
        let k = CpuKernels::new();
        let x = t(vec![0.0, 0.0], &[2]);
        let g = t(vec![1.0, 2.0], &[2]);
        let grad = t(vec![10.0, 10.0], &[2]);
        k.backprop(
            &g,
            0,
            OpCode::Pass,
            &Attributes::default(),
            None,
            &[x],
            &grad,
            1.0,
        )
        .unwrap();
        assert_eq!(grad.to_vec(), vec![11.0, 12.0]);
    }
}
