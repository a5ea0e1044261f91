//! Tensor - Core N-Dimensional Array Type
//!
//! The `Tensor` struct is the value type flowing along graph edges in
//! AxonFlow. It is a strided view over reference-counted storage, so the
//! engine can carve outputs from arena blocks, implant batched results as
//! slice views, and hand gradient views into shared buffers, all without
//! copying.
//!
//! # Key Features
//! - Generic over element type (f32, f64, ...)
//! - Efficient views with shared storage
//! - In-place fill through views (used for gradient resets)
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use core::fmt;

use axonflow_core::dtype::Scalar;
use axonflow_core::error::{Error, Result};
use axonflow_core::storage::Storage;
use axonflow_core::{DType, Device};

use crate::shape::{
    contiguous_strides, is_contiguous, linear_index, numel, unravel_index, Shape, Strides,
};

// =============================================================================
// Tensor Struct
// =============================================================================

/// An N-dimensional array of numeric values.
#[derive(Clone)]
pub struct Tensor<T: Scalar> {
    /// Underlying data storage (reference-counted).
    pub(crate) storage: Storage<T>,
    /// Shape of the tensor (dimensions).
    pub(crate) shape: Shape,
    /// Strides for each dimension.
    pub(crate) strides: Strides,
    /// Offset into storage (for views).
    pub(crate) offset: usize,
}

impl<T: Scalar> Tensor<T> {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Creates a new tensor from storage with the given shape.
    ///
    /// The storage length must equal the number of elements in `shape`.
    pub fn from_storage(storage: Storage<T>, shape: &[usize]) -> Result<Self> {
        let total = numel(shape);
        if total != storage.len() {
            return Err(Error::shape_mismatch(&[storage.len()], shape));
        }

        let shape = Shape::from_slice(shape);
        let strides = contiguous_strides(&shape);

        Ok(Self {
            storage,
            shape,
            strides,
            offset: 0,
        })
    }

    /// Creates a new tensor from a vector with the given shape.
    pub fn from_vec(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        let storage = Storage::from_vec(data, Device::Cpu);
        Self::from_storage(storage, shape)
    }

    /// Creates a new tensor from a slice with the given shape.
    pub fn from_slice(data: &[T], shape: &[usize]) -> Result<Self> {
        let storage = Storage::from_slice(data, Device::Cpu);
        Self::from_storage(storage, shape)
    }

    /// Creates a scalar tensor (0-dimensional).
    pub fn scalar(value: T) -> Self {
        Self {
            storage: Storage::from_vec(vec![value], Device::Cpu),
            shape: Shape::new(),
            strides: Strides::new(),
            offset: 0,
        }
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Returns the shape of the tensor.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the strides of the tensor.
    #[must_use]
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    /// Returns the number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Returns the total number of elements.
    #[must_use]
    pub fn numel(&self) -> usize {
        numel(&self.shape)
    }

    /// Returns the device this tensor is on.
    #[must_use]
    pub fn device(&self) -> Device {
        self.storage.device()
    }

    /// Returns the runtime dtype of the element type.
    #[must_use]
    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    /// Returns true if the tensor is contiguous in memory.
    #[must_use]
    pub fn is_contiguous(&self) -> bool {
        is_contiguous(&self.shape, &self.strides)
    }

    /// Returns true if this tensor is a scalar (0-dimensional).
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    /// Returns true if the underlying storage is marked sparse.
    #[must_use]
    pub fn is_sparse(&self) -> bool {
        self.storage.is_sparse()
    }

    /// Returns true if two tensors view the same storage buffer.
    #[must_use]
    pub fn shares_storage(&self, other: &Self) -> bool {
        self.storage.ptr_eq(&other.storage)
    }

    /// Returns a handle to the underlying storage view.
    #[must_use]
    pub fn storage(&self) -> &Storage<T> {
        &self.storage
    }

    // =========================================================================
    // Data Access
    // =========================================================================

    /// Returns the element at the given indices.
    pub fn get(&self, indices: &[usize]) -> Result<T> {
        self.check_indices(indices)?;
        let offset = self.offset + linear_index(indices, &self.strides);
        Ok(self.storage.as_slice()[offset])
    }

    /// Sets the element at the given indices.
    pub fn set(&self, indices: &[usize], value: T) -> Result<()> {
        self.check_indices(indices)?;
        let offset = self.offset + linear_index(indices, &self.strides);
        self.storage.as_slice_mut()[offset] = value;
        Ok(())
    }

    fn check_indices(&self, indices: &[usize]) -> Result<()> {
        if indices.len() != self.ndim() {
            return Err(Error::invalid_operation(format!(
                "Expected {} indices, got {}",
                self.ndim(),
                indices.len()
            )));
        }
        for (&idx, &dim) in indices.iter().zip(self.shape.iter()) {
            if idx >= dim {
                return Err(Error::IndexOutOfBounds {
                    index: idx,
                    size: dim,
                });
            }
        }
        Ok(())
    }

    /// Copies the logical contents into a vector (row-major order).
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        let n = self.numel();
        if self.is_contiguous() {
            let guard = self.storage.as_slice();
            return guard[self.offset..self.offset + n].to_vec();
        }

        let guard = self.storage.as_slice();
        let mut out = Vec::with_capacity(n);
        for linear in 0..n {
            let idx = unravel_index(linear, &self.shape);
            out.push(guard[self.offset + linear_index(&idx, &self.strides)]);
        }
        out
    }

    /// Fills every element of this view with `value` (in place).
    pub fn fill(&self, value: T) {
        let n = self.numel();
        if self.is_contiguous() {
            let mut guard = self.storage.as_slice_mut();
            for x in guard[self.offset..self.offset + n].iter_mut() {
                *x = value;
            }
            return;
        }

        let mut guard = self.storage.as_slice_mut();
        for linear in 0..n {
            let idx = unravel_index(linear, &self.shape);
            guard[self.offset + linear_index(&idx, &self.strides)] = value;
        }
    }

    /// Copies the logical contents of `src` into this view (in place).
    ///
    /// Shapes must match exactly.
    pub fn copy_from(&self, src: &Self) -> Result<()> {
        if self.shape() != src.shape() {
            return Err(Error::shape_mismatch(self.shape(), src.shape()));
        }
        let data = src.to_vec();
        let mut guard = self.storage.as_slice_mut();
        for (linear, value) in data.into_iter().enumerate() {
            let idx = unravel_index(linear, &self.shape);
            guard[self.offset + linear_index(&idx, &self.strides)] = value;
        }
        Ok(())
    }

    /// Returns a contiguous tensor with the same contents.
    ///
    /// Returns `self` cheaply when already contiguous with zero offset.
    #[must_use]
    pub fn contiguous(&self) -> Self {
        if self.is_contiguous() && self.offset == 0 && self.storage.len() == self.numel() {
            return self.clone();
        }
        Self::from_vec(self.to_vec(), &self.shape).expect("shape preserved")
    }
}

impl<T: Scalar> fmt::Debug for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape.as_slice())
            .field("dtype", &T::DTYPE)
            .field("device", &self.device())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vec_and_get() {
        let t = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        assert_eq!(t.shape(), &[2, 3]);
        assert_eq!(t.get(&[1, 2]).unwrap(), 6.0);
    }

    #[test]
    fn test_shape_mismatch() {
        assert!(Tensor::from_vec(vec![1.0f32; 5], &[2, 3]).is_err());
    }

    #[test]
    fn test_scalar() {
        let t = Tensor::scalar(7.0f32);
        assert!(t.is_scalar());
        assert_eq!(t.numel(), 1);
        assert_eq!(t.to_vec(), vec![7.0]);
    }

    #[test]
    fn test_fill_through_view() {
        let t = Tensor::from_vec(vec![0.0f32; 6], &[2, 3]).unwrap();
        let col = t.index_last_axis(1).unwrap();
        col.fill(5.0);
        assert_eq!(t.to_vec(), vec![0.0, 5.0, 0.0, 0.0, 5.0, 0.0]);
    }

    #[test]
    fn test_set_and_to_vec_strided() {
        let t = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let col = t.index_last_axis(0).unwrap();
        assert_eq!(col.to_vec(), vec![1.0, 3.0]);
        col.set(&[1], 9.0).unwrap();
        assert_eq!(t.get(&[1, 0]).unwrap(), 9.0);
    }

    #[test]
    fn test_copy_from() {
        let dst = Tensor::from_vec(vec![0.0f32; 4], &[2, 2]).unwrap();
        let src = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        dst.copy_from(&src).unwrap();
        assert_eq!(dst.to_vec(), src.to_vec());
    }
}
