//! Data Types - Axonflow Type System
//!
//! Defines the data types supported by Axonflow tensors and provides traits
//! for type-safe operations. Supports floating point (f16, f32, f64) and
//! integer (i32, i64) element types.
//!
//! # Key Features
//! - Type-safe numeric operations via traits
//! - Runtime dtype information via the `DType` enum
//! - Half-precision (f16) support
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use bytemuck::{Pod, Zeroable};
use half::f16;
use num_traits::{Float as NumFloat, Num, NumCast, One, Zero};

use core::fmt::Debug;

// =============================================================================
// DType Enum
// =============================================================================

/// Runtime representation of tensor data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 16-bit floating point (half precision).
    F16,
    /// 32-bit floating point (single precision).
    F32,
    /// 64-bit floating point (double precision).
    F64,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
}

impl DType {
    /// Returns the size in bytes of this data type.
    #[must_use]
    pub const fn size_of(self) -> usize {
        match self {
            Self::F16 => 2,
            Self::F32 | Self::I32 => 4,
            Self::F64 | Self::I64 => 8,
        }
    }

    /// Returns true if this is a floating point type.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F16 | Self::F32 | Self::F64)
    }

    /// Returns the name of this data type as a string.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::F16 => "f16",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::I32 => "i32",
            Self::I64 => "i64",
        }
    }
}

impl Default for DType {
    fn default() -> Self {
        Self::F32
    }
}

impl core::fmt::Display for DType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// =============================================================================
// Scalar Trait
// =============================================================================

/// Trait for all scalar types that can be stored in a tensor.
pub trait Scalar: Copy + Clone + Debug + Default + Send + Sync + Pod + Zeroable + 'static {
    /// The runtime dtype for this scalar type.
    const DTYPE: DType;

    /// Returns the dtype for this type.
    #[must_use]
    fn dtype() -> DType {
        Self::DTYPE
    }
}

// =============================================================================
// Numeric Trait
// =============================================================================

/// Trait for numeric types that support arithmetic operations.
pub trait Numeric: Scalar + Num + NumCast + PartialOrd + Zero + One {
    /// The zero value for this type.
    const ZERO: Self;

    /// The one value for this type.
    const ONE: Self;
}

// =============================================================================
// Float Trait
// =============================================================================

/// Trait for floating point element types.
pub trait Float: Numeric + NumFloat {
    /// Machine epsilon.
    const EPSILON: Self;

    /// Returns the exponential of this value.
    fn exp_value(self) -> Self;

    /// Returns the natural logarithm of this value.
    fn ln_value(self) -> Self;

    /// Returns the square root of this value.
    fn sqrt_value(self) -> Self;

    /// Returns the hyperbolic tangent of this value.
    fn tanh_value(self) -> Self;
}

// =============================================================================
// Scalar Implementations
// =============================================================================

macro_rules! impl_scalar {
    ($ty:ty, $dtype:expr) => {
        impl Scalar for $ty {
            const DTYPE: DType = $dtype;
        }
    };
}

impl_scalar!(f32, DType::F32);
impl_scalar!(f64, DType::F64);
impl_scalar!(i32, DType::I32);
impl_scalar!(i64, DType::I64);

// f16 needs a wrapper because bytemuck does not impl Pod for half::f16 here
/// Wrapper type for f16 to implement Pod.
#[derive(Debug, Clone, Copy, Default)]
#[repr(transparent)]
pub struct F16Wrapper(pub f16);

unsafe impl Zeroable for F16Wrapper {}
unsafe impl Pod for F16Wrapper {}

impl Scalar for F16Wrapper {
    const DTYPE: DType = DType::F16;
}

// =============================================================================
// Numeric Implementations
// =============================================================================

macro_rules! impl_numeric {
    ($ty:ty, $zero:expr, $one:expr) => {
        impl Numeric for $ty {
            const ZERO: Self = $zero;
            const ONE: Self = $one;
        }
    };
}

impl_numeric!(f32, 0.0, 1.0);
impl_numeric!(f64, 0.0, 1.0);
impl_numeric!(i32, 0, 1);
impl_numeric!(i64, 0, 1);

// =============================================================================
// Float Implementations
// =============================================================================

macro_rules! impl_float {
    ($ty:ty) => {
        impl Float for $ty {
            const EPSILON: Self = <$ty>::EPSILON;

            fn exp_value(self) -> Self {
                self.exp()
            }

            fn ln_value(self) -> Self {
                self.ln()
            }

            fn sqrt_value(self) -> Self {
                self.sqrt()
            }

            fn tanh_value(self) -> Self {
                self.tanh()
            }
        }
    };
}

impl_float!(f32);
impl_float!(f64);

// =============================================================================
// Tests
// =============================================================================
