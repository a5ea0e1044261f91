//! Engine - Auto-Batching Forward Execution
//!
//! The engine evaluates a requested variable by traversing its graph,
//! tracking readiness, and draining the schedule batch by batch. Peers
//! that became ready together and are batchable execute as a single fused
//! kernel over a new trailing batch axis; per-operation results are
//! implanted back into the original graph as lazy slice views, so
//! downstream consumers (and the backward pass) see the batched result
//! without the original graph being rewritten.
//!
//! Per batched input position, the fused operand is classified as:
//! - all-same: every peer reads the same variable; broadcast handles it;
//! - consecutive slices: the peers read adjacent slices of one producer,
//!   recovered as the producer's output (full range) or one synthesized
//!   `Slice` view;
//! - general: a `Splice` function gathers the operands along a new
//!   trailing axis.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::sync::Arc;

use axonflow_tensor::shape::pad_to_rank;
use axonflow_tensor::{Shape, Tensor};

use crate::arena::{TensorArena, DEFAULT_ARENA_CAPACITY};
use crate::error::{EngineError, EngineResult};
use crate::function::{Function, VisitState};
use crate::kernels::{CpuKernels, KernelLibrary};
use crate::op::{Attributes, OpCode};
use crate::schedule::Schedule;
use crate::variable::{LazySource, VarKind, Variable};

// =============================================================================
// Options and Instrumentation
// =============================================================================

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Arena block capacity in elements.
    pub arena_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            arena_capacity: DEFAULT_ARENA_CAPACITY,
        }
    }
}

/// Counters describing the work an engine has performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Non-view batch executions (each covers one `pop_best` result).
    pub batched_launches: usize,
    /// Original operations covered by fused executions.
    pub fused_ops: usize,
    /// Forward kernel invocations.
    pub kernel_launches: usize,
    /// Reverse kernel invocations.
    pub backprop_launches: usize,
    /// Synthesized gather (`Splice`) functions.
    pub synthesized_gathers: usize,
    /// Synthesized `Slice` functions.
    pub synthesized_slices: usize,
}

/// One executed launch, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEvent {
    /// The op code that executed.
    pub op: OpCode,
    /// Number of original operations covered by this launch.
    pub batch_size: usize,
    /// True when the launch went through the fused path.
    pub fused: bool,
}

// =============================================================================
// Engine
// =============================================================================

/// The auto-batching execution engine.
///
/// One engine services one forward and one backward pass at a time; use
/// one engine instance per concurrent evaluation. The arena, the
/// schedule and all graph bookkeeping are owned by the instance.
pub struct Engine {
    pub(crate) kernels: Arc<dyn KernelLibrary>,
    pub(crate) arena: TensorArena,
    schedule: Schedule,
    /// Strong references to gather/slice helpers synthesized during the
    /// current pass, so they outlive the fused outputs that view them.
    retained: Vec<Function>,
    pub(crate) stats: EngineStats,
    trace: Vec<TraceEvent>,
    /// Scratch buffer for per-call input values (reused across calls).
    pub(crate) input_values: Vec<Tensor<f32>>,
}

impl Engine {
    /// Creates an engine over the reference CPU kernels.
    #[must_use]
    pub fn new() -> Self {
        Self::with_kernels(Arc::new(CpuKernels::new()), EngineOptions::default())
    }

    /// Creates an engine over the reference CPU kernels with options.
    #[must_use]
    pub fn with_options(options: EngineOptions) -> Self {
        Self::with_kernels(Arc::new(CpuKernels::new()), options)
    }

    /// Creates an engine over a custom kernel library.
    #[must_use]
    pub fn with_kernels(kernels: Arc<dyn KernelLibrary>, options: EngineOptions) -> Self {
        Self {
            kernels,
            arena: TensorArena::with_capacity(options.arena_capacity),
            schedule: Schedule::new(),
            retained: Vec::new(),
            stats: EngineStats::default(),
            trace: Vec::new(),
            input_values: Vec::new(),
        }
    }

    /// Returns the accumulated work counters.
    #[must_use]
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Returns the launch trace, in execution order.
    #[must_use]
    pub fn trace(&self) -> &[TraceEvent] {
        &self.trace
    }

    /// Returns the arena (test observability).
    #[must_use]
    pub fn arena(&self) -> &TensorArena {
        &self.arena
    }

    // =========================================================================
    // Forward
    // =========================================================================

    /// Returns the materialized value of `v`, evaluating (and batching)
    /// whatever part of its graph is still pending.
    ///
    /// Calling this twice for the same variable returns the same tensor
    /// and performs no additional kernel work.
    pub fn forward(&mut self, v: &Variable) -> EngineResult<Tensor<f32>> {
        if v.has_value_or_lazy() {
            return v.resolved_value();
        }

        self.retained.clear();
        self.traverse_forward(v)?;

        while !self.schedule.is_empty() {
            let batch = self.schedule.pop_best();
            self.execute_batch(batch)?;
        }

        v.resolved_value()
    }

    /// Worklist traversal: marks every reachable pending function with its
    /// outstanding-input count, records consumer edges, and seeds the
    /// schedule with functions that are ready now.
    fn traverse_forward(&mut self, root: &Variable) -> EngineResult<()> {
        enum Step {
            Visit(Variable),
            Finish(Function),
        }

        let mut stack = vec![Step::Visit(root.clone())];
        while let Some(step) = stack.pop() {
            match step {
                Step::Visit(var) => {
                    if var.has_value_or_lazy() {
                        continue;
                    }
                    match var.kind() {
                        VarKind::Parameter | VarKind::Constant => {
                            return Err(EngineError::MissingValue {
                                context: "Parameter/Constant has no value",
                            });
                        }
                        VarKind::Input | VarKind::Placeholder => {
                            return Err(EngineError::DependsOnUnboundInput);
                        }
                        VarKind::Output => {
                            let f = var.producer().ok_or_else(|| {
                                EngineError::invariant("output variable has no producer")
                            })?;
                            if f.visit_state() != VisitState::Idle {
                                continue; // already visited
                            }
                            f.set_visit_state(VisitState::Visiting);
                            stack.push(Step::Finish(f.clone()));
                            for input in f.inputs() {
                                stack.push(Step::Visit(input.clone()));
                            }
                        }
                    }
                }
                Step::Finish(f) => {
                    let mut pending = 0;
                    for (i, input) in f.inputs().iter().enumerate() {
                        if !input.has_value_or_lazy() {
                            pending += 1;
                            input.push_consumer(&f, i);
                        }
                    }
                    f.set_visit_state(VisitState::Pending(pending));
                    if pending == 0 {
                        self.schedule.schedule(f);
                    }
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Batch Execution
    // =========================================================================

    fn execute_batch(&mut self, ops: Vec<Function>) -> EngineResult<()> {
        let f0 = ops
            .first()
            .ok_or_else(|| EngineError::invariant("empty batch popped from schedule"))?
            .clone();
        let op = f0.op();
        let batch_size = ops.len();
        let is_free = op.is_view();
        if !is_free {
            self.stats.batched_launches += 1;
        }

        // batched sparse matrix products are unsupported; a Splice is
        // already a gather; singleton batches gain nothing
        let sparse_times = op == OpCode::Times
            && f0.input(1).value().is_some_and(|v| v.is_sparse());
        let naively = is_free || sparse_times || op == OpCode::Splice || batch_size == 1;

        if naively {
            for f in &ops {
                self.memoize_value(f, f.op().is_view())?;
                Self::reset_to_idle(f)?;
                self.trace.push(TraceEvent {
                    op: f.op(),
                    batch_size: 1,
                    fused: false,
                });
            }
        } else {
            self.execute_fused(&ops, &f0, batch_size)?;
            self.trace.push(TraceEvent {
                op,
                batch_size,
                fused: true,
            });
        }

        // the executed operations' outputs are now available: notify
        // consumers and retire the consumer lists
        for f in &ops {
            let output = f.single_output()?;
            for consumer in output.take_consumers() {
                let cf = consumer
                    .func
                    .upgrade()
                    .ok_or_else(|| EngineError::invariant("consumer function was dropped"))?;
                self.schedule.notify_input_available(&cf)?;
            }
        }
        Ok(())
    }

    /// Fused execution: builds one gathered operand per input position,
    /// runs the op once over a new trailing batch axis, and implants each
    /// original output as a lazy slice of the batched result.
    fn execute_fused(&mut self, ops: &[Function], f0: &Function, n: usize) -> EngineResult<()> {
        let op = f0.op();
        let num_args = f0.inputs().len();
        let is_times = op == OpCode::Times;
        let i0 = usize::from(is_times); // Times: the shared weight is used as-is

        let mut max_rank = 0;
        for i in i0..num_args {
            max_rank = max_rank.max(f0.input(i).shape().len());
        }

        let mut batched_inputs: Vec<Variable> = Vec::with_capacity(num_args);
        let mut any_batched = false;
        if is_times {
            batched_inputs.push(f0.input(0));
        }

        for i in i0..num_args {
            let first = f0.input(i);
            let lazy0 = first.lazy();

            let mut all_same = true;
            let mut consecutive = lazy0
                .as_ref()
                .and_then(|l| l.index.map(|base| (l.source.clone(), base)));
            let mut operands: Vec<Variable> = Vec::with_capacity(n);

            for (j, f) in ops.iter().enumerate() {
                let u = f.input(i);
                if all_same {
                    all_same = u.ptr_eq(&first) || (lazy0.is_some() && u.lazy() == lazy0);
                }
                if let Some((s0, base)) = &consecutive {
                    let keep = u
                        .lazy()
                        .is_some_and(|l| l.source.ptr_eq(s0) && l.index == Some(base + j));
                    if !keep {
                        consecutive = None;
                    }
                }
                operands.push(u);
            }

            if all_same {
                // one shared operand; batched-op broadcast covers it
                batched_inputs.push(first);
                continue;
            }
            any_batched = true;

            if let Some((src, base)) = consecutive {
                if src.value().is_none() {
                    return Err(EngineError::invariant(
                        "consecutive-slice source has no value yet",
                    ));
                }
                let last = src.shape().len() - 1;
                if base == 0 && n == src.shape()[last] {
                    // full range: the producer's output is the batch
                    batched_inputs.push(src);
                } else {
                    let mut shape = Shape::from_slice(src.shape());
                    shape[last] = n;
                    let (slice_fn, slice_out) = Function::raw(
                        OpCode::Slice,
                        vec![src],
                        &shape,
                        Attributes::slice(last, base, base + n),
                    );
                    self.memoize_value(&slice_fn, true)?;
                    self.stats.synthesized_slices += 1;
                    self.retained.push(slice_fn);
                    batched_inputs.push(slice_out);
                }
            } else {
                let mut shape = pad_to_rank(first.shape(), max_rank);
                shape.push(n);
                let (gather_fn, gather_out) = Function::raw(
                    OpCode::Splice,
                    operands,
                    &shape,
                    Attributes::with_axis(max_rank),
                );
                self.memoize_value(&gather_fn, false)?;
                self.stats.synthesized_gathers += 1;
                self.retained.push(gather_fn);
                batched_inputs.push(gather_out);
            }
        }

        let fused_out = if any_batched {
            let out0 = f0.single_output()?;
            let mut shape = pad_to_rank(out0.shape(), max_rank);
            shape.push(n);
            let (bf, bout) = Function::raw(op, batched_inputs, &shape, f0.attrs().clone());
            self.memoize_value(&bf, false)?;
            bout
        } else {
            // every position shares its operand: compute once, unbatched
            let out0 = f0.single_output()?;
            let (bf, bout) =
                Function::raw(op, f0.inputs().to_vec(), out0.shape(), f0.attrs().clone());
            self.memoize_value(&bf, false)?;
            bout
        };

        for (j, f) in ops.iter().enumerate() {
            let output = f.single_output()?;
            output.set_lazy(LazySource {
                source: fused_out.clone(),
                index: if any_batched { Some(j) } else { None },
            });
            Self::reset_to_idle(f)?;
        }
        self.stats.fused_ops += n;
        Ok(())
    }

    /// Computes one function's output, storing it in the arena unless the
    /// op is a view (in which case the output aliases its input).
    pub(crate) fn memoize_value(&mut self, f: &Function, is_free: bool) -> EngineResult<Variable> {
        let output = f.single_output()?;

        let mut input_values = core::mem::take(&mut self.input_values);
        input_values.clear();
        for input in f.inputs() {
            input_values.push(input.resolved_value()?);
        }

        if is_free {
            let value = match f.op() {
                OpCode::Pass | OpCode::NoOp | OpCode::Barrier | OpCode::StopGradient => {
                    input_values[0].clone()
                }
                OpCode::Reshape => {
                    let shape = f
                        .attrs()
                        .shape
                        .clone()
                        .unwrap_or_else(|| Shape::from_slice(output.shape()));
                    input_values[0].as_shape(&shape)?
                }
                OpCode::Slice => {
                    let (axis, begin, end) =
                        match (f.attrs().axis, f.attrs().begin, f.attrs().end) {
                            (Some(a), Some(b), Some(e)) => (a, b, e),
                            _ => {
                                return Err(EngineError::invariant(
                                    "Slice requires axis/begin/end attributes",
                                ))
                            }
                        };
                    input_values[0].narrow(axis, begin, end - begin)?
                }
                other => {
                    return Err(EngineError::invariant(format!(
                        "{other} is not a view op"
                    )))
                }
            };
            output.set_value(value);
        } else {
            let device = input_values.first().map_or_else(Default::default, Tensor::device);
            let buffer = self.arena.allocate(output.shape(), device)?;
            let kernels = Arc::clone(&self.kernels);
            let value = kernels.compute(f.op(), &input_values, f.attrs(), output.shape(), Some(buffer))?;
            self.stats.kernel_launches += 1;
            output.set_value(value);
        }

        self.input_values = input_values;
        Ok(output)
    }

    fn reset_to_idle(f: &Function) -> EngineResult<()> {
        match f.visit_state() {
            VisitState::Pending(0) => {
                f.set_visit_state(VisitState::Idle);
                Ok(())
            }
            state => Err(EngineError::invariant(format!(
                "executed {} while in state {state:?}",
                f.op()
            ))),
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axonflow_tensor::Tensor;

    fn t(data: Vec<f32>, shape: &[usize]) -> Tensor<f32> {
        Tensor::from_vec(data, shape).unwrap()
    }

    #[test]
    fn test_forward_single_op() {
        let mut engine = Engine::new();
        let a = Variable::constant(t(vec![0.0, 1.0], &[2]));
        let y = a.tanh();
        let value = engine.forward(&y).unwrap();
        assert!((value.to_vec()[1] - 1.0f32.tanh()).abs() < 1e-6);
        assert_eq!(engine.stats().kernel_launches, 1);
    }

    #[test]
    fn test_forward_unbound_input_fails() {
        let mut engine = Engine::new();
        let x = Variable::input(&[2]);
        let y = x.tanh();
        assert!(matches!(
            engine.forward(&y),
            Err(EngineError::DependsOnUnboundInput)
        ));
    }

    #[test]
    fn test_forward_idempotent() {
        let mut engine = Engine::new();
        let a = Variable::constant(t(vec![1.0, 2.0], &[2]));
        let y = a.exp();
        let first = engine.forward(&y).unwrap();
        let launches = engine.stats().kernel_launches;
        let second = engine.forward(&y).unwrap();
        assert!(first.shares_storage(&second));
        assert_eq!(engine.stats().kernel_launches, launches);
    }

    #[test]
    fn test_diamond_graph_evaluates_once() {
        let mut engine = Engine::new();
        let a = Variable::constant(t(vec![1.0, 2.0], &[2]));
        let h = a.exp();
        let y = h.plus(&h).unwrap();
        let value = engine.forward(&y).unwrap();
        let e = 1.0f32.exp();
        assert!((value.to_vec()[0] - 2.0 * e).abs() < 1e-5);
        // exp once, plus once
        assert_eq!(engine.stats().kernel_launches, 2);
    }

    #[test]
    fn test_values_live_in_arena() {
        let mut engine = Engine::with_options(EngineOptions { arena_capacity: 64 });
        let a = Variable::constant(t(vec![1.0; 4], &[4]));
        let y = a.exp();
        engine.forward(&y).unwrap();
        assert_eq!(engine.arena().blocks_allocated(), 1);
        assert_eq!(engine.arena().used(), 4);
    }
}
