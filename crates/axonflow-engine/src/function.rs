//! Function - Primitive Operation Graph Nodes
//!
//! A `Function` is a node in the computation graph: a primitive op code,
//! an ordered list of input variables, a single output variable, and the
//! attributes the kernel consumes. Functions also carry the transient
//! visit state the forward and backward traversals work off.
//!
//! The outputs vector is structurally capable of holding more than one
//! variable so that batched code paths can reject multi-output functions
//! loudly; the factory only ever builds single-output functions.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use axonflow_tensor::Shape;

use crate::error::{EngineError, EngineResult};
use crate::op::{Attributes, OpCode};
use crate::variable::{Variable, WeakVariable};

// =============================================================================
// Identity
// =============================================================================

/// Unique identifier for a function, stable across handle clones.
pub type FunctionId = u64;

static FUNCTION_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_function_id() -> FunctionId {
    FUNCTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

// =============================================================================
// Visit State
// =============================================================================

/// Traversal state of a function.
///
/// Replaces the sentinel-bearing pending-inputs integer of classic
/// implementations with an explicit state machine: `Idle` between passes,
/// `Pending(n)` while awaiting `n` inputs during forward, `Visiting`
/// while on the traversal stack (cycle detector), `Done` once the
/// backward builder has processed the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitState {
    /// Not part of any in-flight traversal.
    Idle,
    /// Forward: waiting for this many inputs to become available.
    Pending(usize),
    /// Currently on the traversal stack.
    Visiting,
    /// Backward builder has processed this node.
    Done,
}

// =============================================================================
// Function
// =============================================================================

#[derive(Debug)]
struct FunctionInner {
    id: FunctionId,
    op: OpCode,
    attrs: Attributes,
    inputs: Vec<Variable>,
    outputs: RwLock<Vec<WeakVariable>>,
    state: RwLock<VisitState>,
}

/// A primitive operation node. Cloning is cheap and yields another handle
/// to the same node.
#[derive(Clone, Debug)]
pub struct Function {
    inner: Arc<FunctionInner>,
}

/// Weak handle to a function (used in consumer lists).
#[derive(Clone, Debug)]
pub struct WeakFunction {
    inner: Weak<FunctionInner>,
}

impl WeakFunction {
    /// Upgrades to a strong handle if the function is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Function> {
        self.inner.upgrade().map(|inner| Function { inner })
    }
}

impl Function {
    /// Creates an unregistered primitive function with a fresh output
    /// variable of the given shape.
    ///
    /// The output's needs-gradient flag is derived from the inputs, with
    /// `StopGradient` forcing it off downstream.
    pub fn raw(
        op: OpCode,
        inputs: Vec<Variable>,
        output_shape: &[usize],
        attrs: Attributes,
    ) -> (Self, Variable) {
        let needs_gradient =
            op != OpCode::StopGradient && inputs.iter().any(Variable::needs_gradient);

        let f = Self {
            inner: Arc::new(FunctionInner {
                id: next_function_id(),
                op,
                attrs,
                inputs,
                outputs: RwLock::new(Vec::new()),
                state: RwLock::new(VisitState::Idle),
            }),
        };

        let output = Variable::output(Shape::from_slice(output_shape), needs_gradient);
        output.set_producer(f.clone());
        f.inner.outputs.write().push(output.downgrade());

        (f, output)
    }

    // =========================================================================
    // Identity and Metadata
    // =========================================================================

    /// Returns the stable identifier of this function.
    #[must_use]
    pub fn id(&self) -> FunctionId {
        self.inner.id
    }

    /// Returns the op code.
    #[must_use]
    pub fn op(&self) -> OpCode {
        self.inner.op
    }

    /// Returns the attribute record.
    #[must_use]
    pub fn attrs(&self) -> &Attributes {
        &self.inner.attrs
    }

    /// Returns the input variables.
    #[must_use]
    pub fn inputs(&self) -> &[Variable] {
        &self.inner.inputs
    }

    /// Returns the input at `index` (clone of the handle).
    #[must_use]
    pub fn input(&self, index: usize) -> Variable {
        self.inner.inputs[index].clone()
    }

    /// Returns the number of outputs.
    #[must_use]
    pub fn output_count(&self) -> usize {
        self.inner.outputs.read().len()
    }

    /// Returns the single output variable.
    ///
    /// Errors with `MultiOutputUnsupported` if the function does not have
    /// exactly one output (batched paths must reject those).
    pub fn single_output(&self) -> EngineResult<Variable> {
        let outputs = self.inner.outputs.read();
        if outputs.len() != 1 {
            return Err(EngineError::MultiOutputUnsupported);
        }
        outputs[0]
            .upgrade()
            .ok_or_else(|| EngineError::invariant("function output variable was dropped"))
    }

    /// Returns true if both handles refer to the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns a weak handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakFunction {
        WeakFunction {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // =========================================================================
    // Visit State
    // =========================================================================

    /// Returns the current traversal state.
    #[must_use]
    pub fn visit_state(&self) -> VisitState {
        *self.inner.state.read()
    }

    /// Sets the traversal state.
    pub fn set_visit_state(&self, state: VisitState) {
        *self.inner.state.write() = state;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axonflow_tensor::zeros;

    #[test]
    fn test_raw_wires_output() {
        let a = Variable::parameter(zeros::<f32>(&[3]));
        let (f, out) = Function::raw(OpCode::Tanh, vec![a], &[3], Attributes::default());
        assert_eq!(f.op(), OpCode::Tanh);
        assert_eq!(out.shape(), &[3]);
        assert!(out.needs_gradient());
        assert!(out.producer().unwrap().ptr_eq(&f));
        assert!(f.single_output().unwrap().ptr_eq(&out));
    }

    #[test]
    fn test_stop_gradient_blocks_flag() {
        let a = Variable::parameter(zeros::<f32>(&[3]));
        let (_f, out) = Function::raw(OpCode::StopGradient, vec![a], &[3], Attributes::default());
        assert!(!out.needs_gradient());
    }

    #[test]
    fn test_visit_state_roundtrip() {
        let a = Variable::constant(zeros::<f32>(&[1]));
        let (f, _out) = Function::raw(OpCode::Pass, vec![a], &[1], Attributes::default());
        assert_eq!(f.visit_state(), VisitState::Idle);
        f.set_visit_state(VisitState::Pending(2));
        assert_eq!(f.visit_state(), VisitState::Pending(2));
        f.set_visit_state(VisitState::Idle);
    }

    #[test]
    fn test_needs_gradient_from_inputs() {
        let a = Variable::constant(zeros::<f32>(&[2]));
        let b = Variable::constant(zeros::<f32>(&[2]));
        let (_f, out) = Function::raw(OpCode::Plus, vec![a, b], &[2], Attributes::default());
        assert!(!out.needs_gradient());
    }
}
