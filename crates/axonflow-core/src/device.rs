//! Device - Compute Device Identification
//!
//! Identifies where tensor storage lives. The reference kernels run on the
//! CPU; the device is carried through tensor metadata so that allocation
//! policies and kernel dispatch can distinguish placements.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use core::fmt;

// =============================================================================
// Device Enum
// =============================================================================

/// A compute device on which tensor storage can be allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    /// Host CPU memory.
    Cpu,
    /// CUDA device with the given index (reserved; no kernels ship yet).
    Cuda(usize),
}

impl Device {
    /// Returns true if this device is currently usable.
    #[must_use]
    pub const fn is_available(self) -> bool {
        matches!(self, Self::Cpu)
    }

    /// Returns true if this is the CPU device.
    #[must_use]
    pub const fn is_cpu(self) -> bool {
        matches!(self, Self::Cpu)
    }

    /// Returns the device index (0 for CPU).
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Cpu => 0,
            Self::Cuda(idx) => idx,
        }
    }

    /// Returns the device type name.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda(_) => "cuda",
        }
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::Cpu
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(idx) => write!(f, "cuda:{idx}"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
