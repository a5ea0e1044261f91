//! Creation - Tensor Factory Functions
//!
//! Factory functions for creating tensors: zeros, ones, constants, ranges
//! and random initialization.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use rand::distributions::Distribution;
use rand_distr::StandardNormal;

use axonflow_core::dtype::{Float, Numeric, Scalar};

use crate::shape::numel;
use crate::tensor::Tensor;

/// Creates a tensor filled with zeros.
#[must_use]
pub fn zeros<T: Scalar>(shape: &[usize]) -> Tensor<T> {
    Tensor::from_vec(vec![T::zeroed(); numel(shape)], shape).expect("length matches shape")
}

/// Creates a tensor filled with ones.
#[must_use]
pub fn ones<T: Numeric>(shape: &[usize]) -> Tensor<T> {
    full(shape, T::ONE)
}

/// Creates a tensor filled with a constant value.
#[must_use]
pub fn full<T: Scalar>(shape: &[usize], value: T) -> Tensor<T> {
    Tensor::from_vec(vec![value; numel(shape)], shape).expect("length matches shape")
}

/// Creates a 1-D tensor with values `0, 1, ..., n-1`.
#[must_use]
pub fn arange<T: Numeric>(n: usize) -> Tensor<T> {
    let mut data = Vec::with_capacity(n);
    let mut x = T::ZERO;
    for _ in 0..n {
        data.push(x);
        x = x + T::ONE;
    }
    Tensor::from_vec(data, &[n]).expect("length matches shape")
}

/// Creates a tensor with values drawn from the standard normal distribution.
#[must_use]
pub fn randn<T>(shape: &[usize]) -> Tensor<T>
where
    T: Float,
    StandardNormal: Distribution<T>,
{
    let mut rng = rand::thread_rng();
    let data: Vec<T> = (0..numel(shape))
        .map(|_| StandardNormal.sample(&mut rng))
        .collect();
    Tensor::from_vec(data, shape).expect("length matches shape")
}

/// Creates a tensor with values drawn uniformly from `[0, 1)`.
#[must_use]
pub fn rand<T>(shape: &[usize]) -> Tensor<T>
where
    T: Float,
    rand::distributions::Standard: Distribution<T>,
{
    let mut rng = rand::thread_rng();
    let data: Vec<T> = (0..numel(shape)).map(|_| rand::Rng::gen(&mut rng)).collect();
    Tensor::from_vec(data, shape).expect("length matches shape")
}

// =============================================================================
// Tests
// =============================================================================
