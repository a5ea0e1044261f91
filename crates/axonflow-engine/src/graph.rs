//! Graph Construction - Builder Methods on Variables
//!
//! Convenience constructors that grow the define-by-run graph one
//! primitive at a time: each call creates a `Function` node with an
//! inferred output shape and returns its output variable. Nothing is
//! computed here; evaluation happens when an engine is asked for a value.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use axonflow_tensor::shape::{broadcast_shape, numel, Shape};

use crate::error::{EngineError, EngineResult};
use crate::function::Function;
use crate::op::{Attributes, OpCode};
use crate::variable::Variable;

impl Variable {
    fn binary(op: OpCode, a: &Variable, b: &Variable) -> EngineResult<Variable> {
        let shape = broadcast_shape(a.shape(), b.shape())?;
        let (_f, out) = Function::raw(op, vec![a.clone(), b.clone()], &shape, Attributes::default());
        Ok(out)
    }

    fn unary(op: OpCode, x: &Variable) -> Variable {
        let (_f, out) = Function::raw(op, vec![x.clone()], x.shape(), Attributes::default());
        out
    }

    // =========================================================================
    // Element-Wise Ops
    // =========================================================================

    /// Element-wise addition.
    pub fn plus(&self, other: &Variable) -> EngineResult<Variable> {
        Self::binary(OpCode::Plus, self, other)
    }

    /// Element-wise subtraction.
    pub fn minus(&self, other: &Variable) -> EngineResult<Variable> {
        Self::binary(OpCode::Minus, self, other)
    }

    /// Element-wise multiplication.
    pub fn element_times(&self, other: &Variable) -> EngineResult<Variable> {
        Self::binary(OpCode::ElementTimes, self, other)
    }

    /// Hyperbolic tangent.
    #[must_use]
    pub fn tanh(&self) -> Variable {
        Self::unary(OpCode::Tanh, self)
    }

    /// Logistic sigmoid.
    #[must_use]
    pub fn sigmoid(&self) -> Variable {
        Self::unary(OpCode::Sigmoid, self)
    }

    /// Exponential.
    #[must_use]
    pub fn exp(&self) -> Variable {
        Self::unary(OpCode::Exp, self)
    }

    /// Negation.
    #[must_use]
    pub fn negate(&self) -> Variable {
        Self::unary(OpCode::Negate, self)
    }

    // =========================================================================
    // Matrix Product and Reductions
    // =========================================================================

    /// Matrix product with `self` as the weight (`[o, i]`) applied to
    /// `operand` (`[i]` or `[i, cols...]`).
    pub fn times(&self, operand: &Variable) -> EngineResult<Variable> {
        if self.shape().len() != 2 {
            return Err(EngineError::invariant("Times weight must have rank 2"));
        }
        if operand.shape().first().copied() != Some(self.shape()[1]) {
            return Err(
                axonflow_core::Error::shape_mismatch(&[self.shape()[1]], operand.shape()).into(),
            );
        }

        let mut shape = Shape::new();
        shape.push(self.shape()[0]);
        shape.extend_from_slice(&operand.shape()[1..]);

        let (_f, out) = Function::raw(
            OpCode::Times,
            vec![self.clone(), operand.clone()],
            &shape,
            Attributes::default(),
        );
        Ok(out)
    }

    /// Sum over all axes, producing a scalar.
    #[must_use]
    pub fn reduce_sum(&self) -> Variable {
        let (_f, out) = Function::raw(
            OpCode::ReduceSum,
            vec![self.clone()],
            &[],
            Attributes::default(),
        );
        out
    }

    // =========================================================================
    // Shape Ops
    // =========================================================================

    /// Narrow view along `axis` covering `begin..end`.
    pub fn slice(&self, axis: usize, begin: usize, end: usize) -> EngineResult<Variable> {
        if axis >= self.shape().len() || begin >= end || end > self.shape()[axis] {
            return Err(EngineError::invariant(format!(
                "invalid slice {begin}..{end} along axis {axis} of shape {:?}",
                self.shape()
            )));
        }
        let mut shape = Shape::from_slice(self.shape());
        shape[axis] = end - begin;
        let (_f, out) = Function::raw(
            OpCode::Slice,
            vec![self.clone()],
            &shape,
            Attributes::slice(axis, begin, end),
        );
        Ok(out)
    }

    /// View with a new shape (element count preserved).
    pub fn reshape(&self, shape: &[usize]) -> EngineResult<Variable> {
        if numel(shape) != numel(self.shape()) {
            return Err(axonflow_core::Error::shape_mismatch(shape, self.shape()).into());
        }
        let (_f, out) = Function::raw(
            OpCode::Reshape,
            vec![self.clone()],
            shape,
            Attributes::reshape(shape),
        );
        Ok(out)
    }

    // =========================================================================
    // View Ops
    // =========================================================================

    /// Identity view.
    #[must_use]
    pub fn pass_through(&self) -> Variable {
        Self::unary(OpCode::Pass, self)
    }

    /// Identity view (no operation).
    #[must_use]
    pub fn no_op(&self) -> Variable {
        Self::unary(OpCode::NoOp, self)
    }

    /// Scheduling fence: evaluated only when no other work remains.
    #[must_use]
    pub fn barrier(&self) -> Variable {
        Self::unary(OpCode::Barrier, self)
    }

    /// Identity view that blocks gradient flow upstream.
    #[must_use]
    pub fn stop_gradient(&self) -> Variable {
        Self::unary(OpCode::StopGradient, self)
    }
}

// =============================================================================
// Splice
// =============================================================================

/// Splices variables along `axis`: concatenation when `axis` indexes an
/// existing axis, stacking when `axis` equals the operand rank.
pub fn splice(inputs: &[Variable], axis: usize) -> EngineResult<Variable> {
    let first = inputs
        .first()
        .ok_or_else(|| EngineError::invariant("splice requires at least one input"))?;
    let rank = first.shape().len();

    if axis > rank {
        return Err(EngineError::invariant(format!(
            "splice axis {axis} exceeds operand rank {rank}"
        )));
    }

    let shape = if axis == rank {
        // stack: all shapes must match; a new trailing axis counts the inputs
        for v in inputs {
            if v.shape() != first.shape() {
                return Err(axonflow_core::Error::shape_mismatch(first.shape(), v.shape()).into());
            }
        }
        let mut shape = Shape::from_slice(first.shape());
        shape.push(inputs.len());
        shape
    } else {
        // concatenate: shapes match except along the splice axis
        let mut total = 0;
        for v in inputs {
            if v.shape().len() != rank {
                return Err(axonflow_core::Error::shape_mismatch(first.shape(), v.shape()).into());
            }
            for d in 0..rank {
                if d != axis && v.shape()[d] != first.shape()[d] {
                    return Err(
                        axonflow_core::Error::shape_mismatch(first.shape(), v.shape()).into()
                    );
                }
            }
            total += v.shape()[axis];
        }
        let mut shape = Shape::from_slice(first.shape());
        shape[axis] = total;
        shape
    };

    let (_f, out) = Function::raw(
        OpCode::Splice,
        inputs.to_vec(),
        &shape,
        Attributes::with_axis(axis),
    );
    Ok(out)
}

// =============================================================================
// Tests
// =============================================================================
