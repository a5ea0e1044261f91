//! Shape and Strides - Tensor Dimension Management
//!
//! Provides types and functions for managing tensor shapes, strides and
//! broadcasting. Broadcasting here aligns shapes at axis 0: axes are
//! matched from the front and missing trailing axes broadcast. A batched
//! value of shape `[4, N]` therefore combines with an unbatched `[4]`
//! operand directly, which is the property the batching engine relies on
//! when it appends the batch axis last.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use smallvec::SmallVec;

use axonflow_core::error::{Error, Result};

// =============================================================================
// Type Aliases
// =============================================================================

/// Shape type - dimensions of a tensor.
/// Uses `SmallVec` for stack allocation of small shapes (up to 6 dimensions).
pub type Shape = SmallVec<[usize; 6]>;

/// Strides type - step sizes for each dimension.
pub type Strides = SmallVec<[isize; 6]>;

// =============================================================================
// Shape Utilities
// =============================================================================

/// Computes the total number of elements from a shape.
#[must_use]
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Computes row-major (C-order) strides for a shape.
#[must_use]
pub fn contiguous_strides(shape: &[usize]) -> Strides {
    if shape.is_empty() {
        return Strides::new();
    }

    let mut strides = Strides::with_capacity(shape.len());
    let mut stride = 1isize;

    for &dim in shape.iter().rev() {
        strides.push(stride);
        stride *= dim as isize;
    }

    strides.reverse();
    strides
}

/// Checks if strides represent a contiguous row-major layout.
#[must_use]
pub fn is_contiguous(shape: &[usize], strides: &[isize]) -> bool {
    if shape.is_empty() {
        return true;
    }

    let expected = contiguous_strides(shape);
    strides == expected.as_slice()
}

/// Computes the linear storage offset for multi-dimensional indices.
#[must_use]
pub fn linear_index(indices: &[usize], strides: &[isize]) -> usize {
    debug_assert_eq!(indices.len(), strides.len());

    let mut offset = 0isize;
    for (&idx, &stride) in indices.iter().zip(strides.iter()) {
        offset += idx as isize * stride;
    }
    offset as usize
}

/// Converts a linear index to multi-dimensional indices (row-major order).
#[must_use]
pub fn unravel_index(mut linear: usize, shape: &[usize]) -> Shape {
    let mut indices: Shape = SmallVec::from_elem(0, shape.len());
    for d in (0..shape.len()).rev() {
        if shape[d] > 0 {
            indices[d] = linear % shape[d];
            linear /= shape[d];
        }
    }
    indices
}

/// Pads a shape with trailing singleton axes up to `rank`.
///
/// Shapes whose rank already meets or exceeds `rank` are returned as-is.
#[must_use]
pub fn pad_to_rank(shape: &[usize], rank: usize) -> Shape {
    let mut out: Shape = SmallVec::from_slice(shape);
    while out.len() < rank {
        out.push(1);
    }
    out
}

/// Computes the broadcast result of two shapes with axis-0 alignment.
///
/// Axes are matched from the front; a missing trailing axis or an axis of
/// extent 1 broadcasts against the other operand's extent.
pub fn broadcast_shape(a: &[usize], b: &[usize]) -> Result<Shape> {
    let rank = a.len().max(b.len());
    let mut out = Shape::with_capacity(rank);

    for d in 0..rank {
        let da = a.get(d).copied().unwrap_or(1);
        let db = b.get(d).copied().unwrap_or(1);
        if da == db || da == 1 || db == 1 {
            out.push(da.max(db));
        } else {
            return Err(Error::broadcast(a, b));
        }
    }
    Ok(out)
}

/// Maps an index in a broadcast output shape to an index in an operand
/// shape (axis-0 alignment: trailing output axes are dropped, extent-1
/// operand axes are pinned to 0).
#[must_use]
pub fn broadcast_index(out_index: &[usize], operand_shape: &[usize]) -> Shape {
    let mut idx = Shape::with_capacity(operand_shape.len());
    for d in 0..operand_shape.len() {
        let i = out_index.get(d).copied().unwrap_or(0);
        idx.push(if operand_shape[d] == 1 { 0 } else { i });
    }
    idx
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numel() {
        assert_eq!(numel(&[2, 3, 4]), 24);
        assert_eq!(numel(&[]), 1);
    }

    #[test]
    fn test_contiguous_strides() {
        assert_eq!(contiguous_strides(&[2, 3, 4]).as_slice(), &[12, 4, 1]);
        assert!(contiguous_strides(&[]).is_empty());
    }

    #[test]
    fn test_is_contiguous() {
        assert!(is_contiguous(&[2, 3], &[3, 1]));
        assert!(!is_contiguous(&[2, 3], &[1, 2]));
    }

    #[test]
    fn test_unravel_roundtrip() {
        let shape = [2, 3, 4];
        let strides = contiguous_strides(&shape);
        for linear in 0..numel(&shape) {
            let idx = unravel_index(linear, &shape);
            assert_eq!(linear_index(&idx, &strides), linear);
        }
    }

    #[test]
    fn test_broadcast_shape_trailing() {
        // unbatched [4] against batched [4, 3]: batch axis broadcasts
        let out = broadcast_shape(&[4], &[4, 3]).unwrap();
        assert_eq!(out.as_slice(), &[4, 3]);
    }

    #[test]
    fn test_broadcast_shape_singleton() {
        let out = broadcast_shape(&[1, 3], &[4, 3]).unwrap();
        assert_eq!(out.as_slice(), &[4, 3]);
    }

    #[test]
    fn test_broadcast_shape_error() {
        assert!(broadcast_shape(&[2], &[3]).is_err());
    }

    #[test]
    fn test_broadcast_index() {
        // operand [4] read at output index [2, 1] -> [2]
        assert_eq!(broadcast_index(&[2, 1], &[4]).as_slice(), &[2]);
        // operand [1, 3] read at output index [2, 1] -> [0, 1]
        assert_eq!(broadcast_index(&[2, 1], &[1, 3]).as_slice(), &[0, 1]);
    }

    #[test]
    fn test_pad_to_rank() {
        assert_eq!(pad_to_rank(&[4], 3).as_slice(), &[4, 1, 1]);
        assert_eq!(pad_to_rank(&[4, 2], 1).as_slice(), &[4, 2]);
    }
}
