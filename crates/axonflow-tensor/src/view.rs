//! Views and Slicing - Tensor Indexing Operations
//!
//! Zero-copy views into tensors: narrowing along a dimension, selecting
//! an index (dropping the dimension), indexing the last axis, and
//! reshaping. Views share storage with the original tensor, which is what
//! lets the engine implant per-sample results as slices of a batched
//! output and hand out gradient views into a shared buffer.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use axonflow_core::dtype::Scalar;
use axonflow_core::error::{Error, Result};

use crate::shape::{contiguous_strides, numel, Shape};
use crate::tensor::Tensor;

impl<T: Scalar> Tensor<T> {
    /// Returns a view selecting a single index along a dimension.
    ///
    /// This reduces the dimensionality by 1.
    pub fn select(&self, dim: usize, index: usize) -> Result<Self> {
        if dim >= self.ndim() {
            return Err(Error::InvalidDimension {
                index: dim as i64,
                ndim: self.ndim(),
            });
        }

        if index >= self.shape[dim] {
            return Err(Error::IndexOutOfBounds {
                index,
                size: self.shape[dim],
            });
        }

        let mut new_shape = self.shape.clone();
        new_shape.remove(dim);

        let mut new_strides = self.strides.clone();
        new_strides.remove(dim);

        let new_offset = (self.offset as isize + index as isize * self.strides[dim]) as usize;

        Ok(Self {
            storage: self.storage.clone(),
            shape: new_shape,
            strides: new_strides,
            offset: new_offset,
        })
    }

    /// Returns a view of the `index`-th slice along the last axis.
    ///
    /// For a batched tensor (batch appended as the trailing axis) this is
    /// the per-sample view.
    pub fn index_last_axis(&self, index: usize) -> Result<Self> {
        if self.ndim() == 0 {
            return Err(Error::invalid_operation("cannot index a scalar"));
        }
        self.select(self.ndim() - 1, index)
    }

    /// Returns a narrow view along a dimension.
    pub fn narrow(&self, dim: usize, start: usize, length: usize) -> Result<Self> {
        if dim >= self.ndim() {
            return Err(Error::InvalidDimension {
                index: dim as i64,
                ndim: self.ndim(),
            });
        }

        if start + length > self.shape[dim] {
            return Err(Error::IndexOutOfBounds {
                index: start + length,
                size: self.shape[dim],
            });
        }

        let mut new_shape = self.shape.clone();
        new_shape[dim] = length;

        let new_offset = (self.offset as isize + start as isize * self.strides[dim]) as usize;

        Ok(Self {
            storage: self.storage.clone(),
            shape: new_shape,
            strides: self.strides.clone(),
            offset: new_offset,
        })
    }

    /// Returns a tensor with the same elements and a new shape.
    ///
    /// Contiguous tensors are reshaped as zero-copy views; strided views
    /// are materialized first.
    pub fn as_shape(&self, shape: &[usize]) -> Result<Self> {
        if numel(shape) != self.numel() {
            return Err(Error::shape_mismatch(shape, &self.shape));
        }

        if self.is_contiguous() {
            return Ok(Self {
                storage: self.storage.clone(),
                shape: Shape::from_slice(shape),
                strides: contiguous_strides(shape),
                offset: self.offset,
            });
        }

        Self::from_vec(self.to_vec(), shape)
    }
}

// =============================================================================
// Tests
// =============================================================================
