//! Storage - Raw Memory Management for Tensors
//!
//! Provides the reference-counted memory block that underlies all tensor
//! values. Storage is shared between tensor views, so a slice of an arena
//! block or of a batched result aliases the same memory as its source.
//!
//! # Key Features
//! - Reference-counted memory for efficient views
//! - Zero-copy slicing through offset/length
//! - Guarded slice access (read/write)
//! - Storage format marker (dense vs. sparse)
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use core::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::device::Device;
use crate::dtype::Scalar;
use crate::error::{Error, Result};

// =============================================================================
// Storage Format
// =============================================================================

/// Physical layout of a storage block.
///
/// The engine only computes on dense storage; the sparse marker exists so
/// that callers holding externally produced sparse matrices can be routed
/// away from batched matrix products.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageFormat {
    /// Contiguous dense layout.
    Dense,
    /// Sparse layout (contents treated as opaque by the batching engine).
    Sparse,
}

impl Default for StorageFormat {
    fn default() -> Self {
        Self::Dense
    }
}

// =============================================================================
// Storage Struct
// =============================================================================

/// Raw memory storage for tensor data.
///
/// Storage manages a contiguous block of memory on a device and is
/// reference-counted to allow efficient sharing between tensor views.
#[derive(Debug)]
pub struct Storage<T: Scalar> {
    /// The underlying data buffer, shared between views.
    inner: Arc<RwLock<StorageInner<T>>>,
    /// Offset into the storage (for views).
    offset: usize,
    /// Number of elements in this view.
    len: usize,
}

#[derive(Debug)]
struct StorageInner<T: Scalar> {
    data: Vec<T>,
    device: Device,
    format: StorageFormat,
}

impl<T: Scalar> Storage<T> {
    /// Creates new storage with the given length, initialized to zero.
    #[must_use]
    pub fn zeros(len: usize, device: Device) -> Self {
        Self::from_vec(vec![T::zeroed(); len], device)
    }

    /// Creates storage from an existing vector.
    #[must_use]
    pub fn from_vec(data: Vec<T>, device: Device) -> Self {
        Self::with_format(data, device, StorageFormat::Dense)
    }

    /// Creates storage from a vector with an explicit format marker.
    #[must_use]
    pub fn with_format(data: Vec<T>, device: Device, format: StorageFormat) -> Self {
        let len = data.len();
        Self {
            inner: Arc::new(RwLock::new(StorageInner {
                data,
                device,
                format,
            })),
            offset: 0,
            len,
        }
    }

    /// Creates storage from a slice by copying the data.
    #[must_use]
    pub fn from_slice(data: &[T], device: Device) -> Self {
        Self::from_vec(data.to_vec(), device)
    }

    /// Returns the number of elements in this storage view.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the storage is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the offset into the underlying buffer.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the device this storage is on.
    #[must_use]
    pub fn device(&self) -> Device {
        self.inner.read().device
    }

    /// Returns the storage format marker.
    #[must_use]
    pub fn format(&self) -> StorageFormat {
        self.inner.read().format
    }

    /// Returns true if this storage is marked sparse.
    #[must_use]
    pub fn is_sparse(&self) -> bool {
        self.format() == StorageFormat::Sparse
    }

    /// Returns true if two storage handles share the same buffer.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Creates a view into a portion of this storage.
    ///
    /// # Arguments
    /// * `offset` - Starting offset relative to this view
    /// * `len` - Number of elements in the new view
    pub fn slice(&self, offset: usize, len: usize) -> Result<Self> {
        if offset + len > self.len {
            return Err(Error::IndexOutOfBounds {
                index: offset + len,
                size: self.len,
            });
        }

        Ok(Self {
            inner: Arc::clone(&self.inner),
            offset: self.offset + offset,
            len,
        })
    }

    /// Returns an immutable reference to the data.
    #[must_use]
    pub fn as_slice(&self) -> StorageReadGuard<'_, T> {
        StorageReadGuard {
            guard: self.inner.read(),
            offset: self.offset,
            len: self.len,
        }
    }

    /// Returns a mutable reference to the data.
    #[must_use]
    pub fn as_slice_mut(&self) -> StorageWriteGuard<'_, T> {
        StorageWriteGuard {
            guard: self.inner.write(),
            offset: self.offset,
            len: self.len,
        }
    }

    /// Copies data from another storage into this one.
    pub fn copy_from(&self, other: &Self) -> Result<()> {
        if self.len != other.len {
            return Err(Error::shape_mismatch(&[self.len], &[other.len]));
        }

        let src = other.as_slice().to_vec();
        let mut dst = self.as_slice_mut();
        dst.copy_from_slice(&src);
        Ok(())
    }

    /// Makes a deep copy of this storage view.
    #[must_use]
    pub fn deep_copy(&self) -> Self {
        let data = self.as_slice().to_vec();
        Self::from_vec(data, self.device())
    }
}

impl<T: Scalar> Clone for Storage<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            offset: self.offset,
            len: self.len,
        }
    }
}

// =============================================================================
// Guard Types for Safe Access
// =============================================================================

/// Read guard for storage data.
pub struct StorageReadGuard<'a, T: Scalar> {
    guard: parking_lot::RwLockReadGuard<'a, StorageInner<T>>,
    offset: usize,
    len: usize,
}

impl<T: Scalar> Deref for StorageReadGuard<'_, T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.guard.data[self.offset..self.offset + self.len]
    }
}

/// Write guard for storage data.
pub struct StorageWriteGuard<'a, T: Scalar> {
    guard: parking_lot::RwLockWriteGuard<'a, StorageInner<T>>,
    offset: usize,
    len: usize,
}

impl<T: Scalar> Deref for StorageWriteGuard<'_, T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.guard.data[self.offset..self.offset + self.len]
    }
}

impl<T: Scalar> DerefMut for StorageWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard.data[self.offset..self.offset + self.len]
    }
}

// =============================================================================
// Tests
// =============================================================================
