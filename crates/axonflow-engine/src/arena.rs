//! Arena - Bulk Tensor Allocation
//!
//! Sub-allocates small tensor outputs from large storage blocks,
//! amortizing allocator cost across the many short-lived intermediates a
//! pass produces. Oversize requests fall back to standalone tensors. When
//! a block cannot satisfy a request, its remainder is wasted and a fresh
//! block is started. Nothing is ever freed individually; blocks die with
//! the arena (and the arena with its engine).
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use axonflow_core::storage::Storage;
use axonflow_core::{Device, Result};
use axonflow_tensor::shape::numel;
use axonflow_tensor::Tensor;

// =============================================================================
// Constants
// =============================================================================

/// Default arena block capacity, in elements.
pub const DEFAULT_ARENA_CAPACITY: usize = 64 * 1024 * 1024;

// =============================================================================
// TensorArena
// =============================================================================

/// Arena allocator for f32 tensor outputs.
#[derive(Debug)]
pub struct TensorArena {
    capacity: usize,
    block: Option<Storage<f32>>,
    used: usize,
    blocks_allocated: usize,
}

impl TensorArena {
    /// Creates an arena with the default block capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ARENA_CAPACITY)
    }

    /// Creates an arena with a custom block capacity (element count).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            block: None,
            used: 0,
            blocks_allocated: 0,
        }
    }

    /// Returns the block capacity in elements.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns how many elements of the current block are in use.
    #[must_use]
    pub fn used(&self) -> usize {
        self.used
    }

    /// Returns how many blocks have been allocated over the arena's life.
    #[must_use]
    pub fn blocks_allocated(&self) -> usize {
        self.blocks_allocated
    }

    /// Allocates a zero-initialized tensor of the given shape.
    ///
    /// Requests larger than a whole block get a standalone tensor. Other
    /// requests are carved from the current block, rolling over to a fresh
    /// block (dropping the remainder of the old one) when capacity runs
    /// out.
    pub fn allocate(&mut self, shape: &[usize], device: Device) -> Result<Tensor<f32>> {
        let n = numel(shape);

        if n > self.capacity {
            return Tensor::from_storage(Storage::zeros(n, device), shape);
        }

        let needs_fresh_block = match &self.block {
            None => true,
            Some(_) => self.used + n > self.capacity,
        };
        if needs_fresh_block {
            self.block = Some(Storage::zeros(self.capacity, device));
            self.used = 0;
            self.blocks_allocated += 1;
        }

        let block = self.block.as_ref().expect("block allocated above");
        let region = block.slice(self.used, n)?;
        self.used += n;
        Tensor::from_storage(region, shape)
    }
}

impl Default for TensorArena {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
