//! Ops - Element-Wise, Matrix and Reduction Math
//!
//! The math the reference kernels are assembled from. Binary operations
//! broadcast with axis-0 alignment (see the `shape` module): missing
//! trailing axes and axes of extent 1 broadcast, so a batched operand
//! `[4, N]` combines directly with an unbatched `[4]`.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use axonflow_core::dtype::{Float, Scalar};
use axonflow_core::error::{Error, Result};

use crate::shape::{broadcast_index, broadcast_shape, numel, unravel_index, Shape};
use crate::tensor::Tensor;

// =============================================================================
// Element-Wise Operations
// =============================================================================

/// Applies a unary function element-wise.
#[must_use]
pub fn map<T: Scalar, F: Fn(T) -> T>(x: &Tensor<T>, f: F) -> Tensor<T> {
    let data: Vec<T> = x.to_vec().into_iter().map(f).collect();
    Tensor::from_vec(data, x.shape()).expect("shape preserved")
}

/// Applies a binary function element-wise with axis-0-aligned broadcasting.
pub fn zip<T: Scalar, F: Fn(T, T) -> T>(a: &Tensor<T>, b: &Tensor<T>, f: F) -> Result<Tensor<T>> {
    let out_shape = broadcast_shape(a.shape(), b.shape())?;
    let n = numel(&out_shape);
    let mut data = Vec::with_capacity(n);

    for linear in 0..n {
        let idx = unravel_index(linear, &out_shape);
        let xa = a.get(&broadcast_index(&idx, a.shape()))?;
        let xb = b.get(&broadcast_index(&idx, b.shape()))?;
        data.push(f(xa, xb));
    }
    Tensor::from_vec(data, &out_shape)
}

// =============================================================================
// Matrix Product
// =============================================================================

/// Matrix product of a rank-2 weight with a vector or matrix operand.
///
/// `w` has shape `[o, i]`; `x` has shape `[i]` or `[i, cols...]` where the
/// trailing axes are flattened into columns. The result has shape `[o]` or
/// `[o, cols...]`.
pub fn matmul<T: Float>(w: &Tensor<T>, x: &Tensor<T>) -> Result<Tensor<T>> {
    if w.ndim() != 2 {
        return Err(Error::invalid_operation("matmul weight must have rank 2"));
    }
    if x.ndim() == 0 || x.shape()[0] != w.shape()[1] {
        return Err(Error::shape_mismatch(&[w.shape()[1]], x.shape()));
    }

    let o = w.shape()[0];
    let i = w.shape()[1];
    let cols: usize = x.shape()[1..].iter().product();

    let wv = w.to_vec();
    let xv = x.to_vec();
    let mut out = vec![T::ZERO; o * cols];

    // x is row-major [i, cols...]: element (k, c) sits at k * cols + c
    for r in 0..o {
        for c in 0..cols {
            let mut acc = T::ZERO;
            for k in 0..i {
                acc = acc + wv[r * i + k] * xv[k * cols + c];
            }
            out[r * cols + c] = acc;
        }
    }

    let mut out_shape = Shape::new();
    out_shape.push(o);
    out_shape.extend_from_slice(&x.shape()[1..]);
    Tensor::from_vec(out, &out_shape)
}

// =============================================================================
// Reductions
// =============================================================================

/// Sums all elements.
#[must_use]
pub fn sum_all<T: Float>(x: &Tensor<T>) -> T {
    x.to_vec().into_iter().fold(T::ZERO, |acc, v| acc + v)
}

// =============================================================================
// Accumulation
// =============================================================================

/// Writes `dst := beta * dst + src` element-wise, through views.
///
/// `src` may broadcast into `dst` (axis-0 alignment). With `beta == 0` the
/// destination is overwritten, with `beta == 1` accumulated into; this is
/// the contract reverse-mode kernels use for gradient buffers.
pub fn accumulate<T: Float>(dst: &Tensor<T>, src: &Tensor<T>, beta: T) -> Result<()> {
    let n = dst.numel();
    for linear in 0..n {
        let idx = unravel_index(linear, dst.shape());
        let s = src.get(&broadcast_index(&idx, src.shape()))?;
        let d = if beta == T::ZERO {
            T::ZERO
        } else {
            dst.get(&idx)? * beta
        };
        dst.set(&idx, d + s)?;
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map() {
        let x = Tensor::from_vec(vec![1.0f32, -2.0], &[2]).unwrap();
        let y = map(&x, |v| v * v);
        assert_eq!(y.to_vec(), vec![1.0, 4.0]);
    }

    #[test]
    fn test_zip_same_shape() {
        let a = Tensor::from_vec(vec![1.0f32, 2.0], &[2]).unwrap();
        let b = Tensor::from_vec(vec![10.0f32, 20.0], &[2]).unwrap();
        let c = zip(&a, &b, |x, y| x + y).unwrap();
        assert_eq!(c.to_vec(), vec![11.0, 22.0]);
    }

    #[test]
    fn test_zip_broadcast_trailing_axis() {
        // [2] + [2, 3]: the unbatched operand broadcasts over the batch axis
        let a = Tensor::from_vec(vec![1.0f32, 2.0], &[2]).unwrap();
        let b = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let c = zip(&a, &b, |x, y| x + y).unwrap();
        assert_eq!(c.shape(), &[2, 3]);
        assert_eq!(c.to_vec(), vec![2.0, 3.0, 4.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_matmul_vector() {
        // [[1, 2], [3, 4], [5, 6]] * [1, 1] = [3, 7, 11]
        let w = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[3, 2]).unwrap();
        let x = Tensor::from_vec(vec![1.0f32, 1.0], &[2]).unwrap();
        let y = matmul(&w, &x).unwrap();
        assert_eq!(y.shape(), &[3]);
        assert_eq!(y.to_vec(), vec![3.0, 7.0, 11.0]);
    }

    #[test]
    fn test_matmul_batched_columns() {
        // w [2, 2], x [2, 2] -> y [2, 2], column c of y = w * column c of x
        let w = Tensor::from_vec(vec![1.0f32, 0.0, 0.0, 2.0], &[2, 2]).unwrap();
        let x = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let y = matmul(&w, &x).unwrap();
        assert_eq!(y.to_vec(), vec![1.0, 2.0, 6.0, 8.0]);
    }

    #[test]
    fn test_sum_all() {
        let x = Tensor::from_vec(vec![1.0f32, 2.0, 3.0], &[3]).unwrap();
        assert_eq!(sum_all(&x), 6.0);
    }

    #[test]
    fn test_accumulate_beta() {
        let dst = Tensor::from_vec(vec![1.0f32, 1.0], &[2]).unwrap();
        let src = Tensor::from_vec(vec![2.0f32, 3.0], &[2]).unwrap();

        accumulate(&dst, &src, 1.0).unwrap();
        assert_eq!(dst.to_vec(), vec![3.0, 4.0]);

        accumulate(&dst, &src, 0.0).unwrap();
        assert_eq!(dst.to_vec(), vec![2.0, 3.0]);
    }

    #[test]
    fn test_accumulate_through_view() {
        let buf = Tensor::from_vec(vec![0.0f32; 4], &[2, 2]).unwrap();
        let col = buf.index_last_axis(1).unwrap();
        let src = Tensor::from_vec(vec![5.0f32, 6.0], &[2]).unwrap();
        accumulate(&col, &src, 0.0).unwrap();
        assert_eq!(buf.to_vec(), vec![0.0, 5.0, 0.0, 6.0]);
    }
}
