//! Schedule - Readiness Tracking and Batch Selection
//!
//! Maintains the set of ready operations across three queues with the
//! priority view > regular > barrier:
//!
//! - view ops are zero-cost and always drain first, in one batch,
//!   regardless of op code;
//! - regular ops are grouped into buckets of mutually batchable peers;
//!   `pop_best` returns the largest bucket;
//! - barrier ops act as scheduling fences and only drain when nothing
//!   else is ready.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use crate::error::{EngineError, EngineResult};
use crate::function::{Function, VisitState};
use crate::op::OpCode;

// =============================================================================
// Batchability
// =============================================================================

/// Tests whether two ready functions can execute as one fused kernel.
///
/// Requires the same op code, the same arity, equal attribute records and
/// per-position input shape equality, except position 0 of `Times`,
/// where the two operands must be the very same variable (the shared
/// weight), not merely shape-equal.
#[must_use]
pub fn batchable(a: &Function, b: &Function) -> bool {
    let op = a.op();
    if op != b.op() {
        return false;
    }
    if a.inputs().len() != b.inputs().len() {
        return false;
    }

    for (i, (ia, ib)) in a.inputs().iter().zip(b.inputs().iter()).enumerate() {
        if op == OpCode::Times && i == 0 {
            if !ia.ptr_eq(ib) {
                return false;
            }
        } else if ia.shape() != ib.shape() {
            return false;
        }
    }

    a.attrs() == b.attrs()
}

// =============================================================================
// Schedule
// =============================================================================

/// The set of ready operations, partitioned by execution class.
#[derive(Default)]
pub struct Schedule {
    view_ops: Vec<Function>,
    regular_ops: Vec<Vec<Function>>,
    barrier_ops: Vec<Function>,
}

impl Schedule {
    /// Creates an empty schedule.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an operation that has been confirmed ready.
    ///
    /// Barriers go to the barrier queue, other view ops to the view
    /// queue, and regular ops to the first bucket whose head is batchable
    /// with them (or a new bucket).
    pub fn schedule(&mut self, f: Function) {
        let op = f.op();
        if op == OpCode::Barrier {
            self.barrier_ops.push(f);
        } else if op.is_view() {
            self.view_ops.push(f);
        } else {
            for bucket in &mut self.regular_ops {
                let head = &bucket[0];
                if batchable(&f, head) {
                    bucket.push(f);
                    return;
                }
            }
            self.regular_ops.push(vec![f]);
        }
    }

    /// Notifies a function that one of its inputs became available,
    /// scheduling it when its pending count reaches zero.
    ///
    /// Errors if the function is not in a pending state with inputs
    /// outstanding.
    pub fn notify_input_available(&mut self, f: &Function) -> EngineResult<()> {
        match f.visit_state() {
            VisitState::Pending(n) if n > 0 => {
                f.set_visit_state(VisitState::Pending(n - 1));
                if n == 1 {
                    self.schedule(f.clone());
                }
                Ok(())
            }
            state => Err(EngineError::invariant(format!(
                "notify_input_available on {} in state {state:?}",
                f.op()
            ))),
        }
    }

    /// Returns true if no operation is ready.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.view_ops.is_empty() && self.regular_ops.is_empty() && self.barrier_ops.is_empty()
    }

    /// Returns the number of regular buckets awaiting execution.
    #[must_use]
    pub fn pending_batches(&self) -> usize {
        self.regular_ops.len()
    }

    /// Removes and returns the best ready batch: the whole view queue if
    /// non-empty, else the largest regular bucket (first-in order breaks
    /// ties), else the whole barrier queue.
    pub fn pop_best(&mut self) -> Vec<Function> {
        if !self.view_ops.is_empty() {
            return core::mem::take(&mut self.view_ops);
        }

        if !self.regular_ops.is_empty() {
            let mut best = 0;
            for (i, bucket) in self.regular_ops.iter().enumerate().skip(1) {
                if bucket.len() > self.regular_ops[best].len() {
                    best = i;
                }
            }
            return self.regular_ops.remove(best);
        }

        core::mem::take(&mut self.barrier_ops)
    }
}

// =============================================================================
// Tests
// =============================================================================
