//! Backward - Consumer Discovery and Bucketed Backprop
//!
//! The backward pass runs in two phases over the lazy-view-augmented
//! graph the forward pass left behind:
//!
//! 1. A consumer-graph builder walks down from the root, following lazy
//!    producers so the reverse graph runs through fused operations rather
//!    than the original per-sample ones, and records `(function, input)`
//!    consumer edges on every variable that will receive gradient.
//! 2. Per requested parameter, gradients are pulled: a variable first
//!    ensures all of its consumers' outputs have their gradients
//!    aggregated, then buckets its consumers and back-propagates into its
//!    own gradient buffer. Multiple `Times` consumers sharing one weight
//!    collapse into a single gathered reverse matrix product.
//!
//! Gradient buffers follow the beta contract: a freshly created buffer is
//! written with beta 0 (overwrite), an existing one with beta 1
//! (accumulate). A slice view into a fused gradient has no partial beta,
//! so a fresh fused buffer is zeroed explicitly and written with beta 1.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::collections::HashMap;
use std::sync::Arc;

use axonflow_tensor::{Shape, Tensor};

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::function::{Function, VisitState};
use crate::op::OpCode;
use crate::variable::{Consumer, VarKind, Variable};

impl Engine {
    // =========================================================================
    // Public Entry Point
    // =========================================================================

    /// Computes gradients of `root` with respect to the keys of
    /// `gradients`.
    ///
    /// Caller-supplied buffers (`Some` entries) are reset to zero in place
    /// and filled; `None` entries get engine-allocated buffers. Returns
    /// the gradient tensor for each requested variable.
    ///
    /// Unlike forward evaluation, backward is eager: calling it twice is
    /// two complete computations. Ask for all needed gradients in one go.
    pub fn backward(
        &mut self,
        root: &Variable,
        gradients: HashMap<Variable, Option<Tensor<f32>>>,
    ) -> EngineResult<HashMap<Variable, Tensor<f32>>> {
        if !root.needs_gradient() {
            return Err(EngineError::GradientNotAllowed);
        }

        // complete the forward computation (batching included) first
        self.forward(root)?;

        self.build_consumer_graph(root)?;

        // backward is eager: drop any seed left by a previous pass, then
        // seed through the lazy-aware path. If the root is itself a
        // slice of a fused output this zeroes the fused buffer and
        // writes ones through the slice view
        if let Some(lazy) = root.lazy() {
            lazy.source.clear_gradient();
        }
        root.clear_gradient();
        self.ensure_gradient(root)?;
        root.gradient()
            .ok_or(EngineError::MissingGradient {
                context: "root gradient after seeding",
            })?
            .fill(1.0);

        // caller-supplied buffers are recycled in place
        for (param, buffer) in &gradients {
            if let Some(buf) = buffer {
                buf.fill(0.0);
                param.set_gradient(buf.clone());
            }
        }

        for param in gradients.keys() {
            if !param.has_consumers() {
                return Err(EngineError::NotAConsumer);
            }
            if !param.needs_gradient() {
                return Err(EngineError::GradientNotAllowed);
            }
            self.aggregate_gradient(param)?;
        }

        let mut results = HashMap::with_capacity(gradients.len());
        for (param, _) in gradients {
            let grad = param.gradient().ok_or(EngineError::MissingGradient {
                context: "requested parameter after aggregation",
            })?;
            results.insert(param, grad);
        }

        self.reset_graph_state(root);
        Ok(results)
    }

    // =========================================================================
    // Consumer Discovery
    // =========================================================================

    /// Redirects a variable to the output of its lazy producer, so the
    /// reverse graph follows fused operations.
    fn redirect(var: &Variable) -> Variable {
        match var.lazy() {
            Some(lazy) => lazy.source,
            None => var.clone(),
        }
    }

    /// Returns the function backward should descend into from `var`, or
    /// `None` at a leaf.
    fn backward_target(var: &Variable) -> EngineResult<Option<Function>> {
        match var.kind() {
            VarKind::Parameter | VarKind::Constant => Ok(None),
            VarKind::Input | VarKind::Placeholder => Err(EngineError::invariant(
                "Input/Placeholder encountered on a gradient path",
            )),
            VarKind::Output => {
                if var.value().is_none() && var.lazy().is_none() {
                    return Err(EngineError::MissingValue {
                        context: "gradient-path variable has no forward value",
                    });
                }
                if let Some(lazy) = var.lazy() {
                    Ok(Some(lazy.producer()?))
                } else {
                    var.producer()
                        .map(Some)
                        .ok_or_else(|| EngineError::invariant("output variable has no producer"))
                }
            }
        }
    }

    /// Builds the reverse edges (consumer lists) over the lazy-augmented
    /// graph. Every visited function ends in the `Done` state; re-entering
    /// a function still being visited is a cycle.
    fn build_consumer_graph(&mut self, root: &Variable) -> EngineResult<()> {
        enum Step {
            Enter(Function),
            Exit(Function),
        }

        root.set_visited(false);
        let mut stack = Vec::new();
        if let Some(f) = Self::backward_target(root)? {
            stack.push(Step::Enter(f));
        }

        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(f) => {
                    match f.visit_state() {
                        VisitState::Visiting => return Err(EngineError::CyclicGraph),
                        VisitState::Idle => {}
                        _ => continue, // already visited
                    }
                    if f.op() == OpCode::StopGradient {
                        // needs-gradient propagation should have pruned this branch
                        return Err(EngineError::UnexpectedStopGradient);
                    }
                    f.set_visit_state(VisitState::Visiting);
                    stack.push(Step::Exit(f.clone()));

                    for (i, input) in f.inputs().iter().enumerate() {
                        let target = Self::redirect(input);
                        target.set_visited(false);
                        if !target.needs_gradient() {
                            continue;
                        }
                        // re-accumulated below; user parameter buffers are
                        // re-implanted after this builder runs
                        target.clear_gradient();
                        target.push_consumer(&f, i);
                        if let Some(g) = Self::backward_target(&target)? {
                            stack.push(Step::Enter(g));
                        }
                    }
                }
                Step::Exit(f) => f.set_visit_state(VisitState::Done),
            }
        }
        Ok(())
    }

    // =========================================================================
    // Gradient Aggregation
    // =========================================================================

    /// Pulls all gradient contributions into `var`: first materializes
    /// every consumer's output gradient (recursively, toward the root),
    /// then back-propagates per consumer, bucketing `Times`-weight
    /// consumers into one gathered reverse matrix product.
    fn aggregate_gradient(&mut self, var: &Variable) -> EngineResult<()> {
        enum Step {
            Enter(Variable),
            Ready(Variable),
        }

        let mut stack = vec![Step::Enter(var.clone())];
        while let Some(step) = stack.pop() {
            match step {
                Step::Enter(v) => {
                    if v.visited() {
                        continue;
                    }
                    let consumers = v.consumers();
                    if consumers.is_empty() {
                        continue; // leaf of the reverse graph (or the root)
                    }
                    if !v.needs_gradient() {
                        return Err(EngineError::invariant(
                            "gradient pulled into a variable that does not need one",
                        ));
                    }
                    v.set_visited(true);
                    stack.push(Step::Ready(v.clone()));
                    for consumer in &consumers {
                        let f = upgrade(consumer)?;
                        stack.push(Step::Enter(f.single_output()?));
                    }
                }
                Step::Ready(v) => {
                    // all sources of incoming gradient are materialized;
                    // this is the only place a variable's gradient is ever
                    // aggregated
                    if v.kind() != VarKind::Parameter && v.gradient().is_some() {
                        return Err(EngineError::invariant(
                            "non-Parameter variable unexpectedly already has a gradient",
                        ));
                    }

                    let consumers = v.consumers();
                    if consumers.len() == 1 {
                        self.backprop_to(&consumers[0])?;
                        continue;
                    }

                    let mut matrix_weight: Vec<Consumer> = Vec::new();
                    let mut other: Vec<Consumer> = Vec::new();
                    for consumer in consumers {
                        let f = upgrade(&consumer)?;
                        if f.op() == OpCode::Times && consumer.input == 0 {
                            matrix_weight.push(consumer);
                        } else {
                            other.push(consumer);
                        }
                    }

                    if !matrix_weight.is_empty() {
                        self.backprop_to_matrix_weight(&matrix_weight)?;
                    }
                    for consumer in &other {
                        self.backprop_to(consumer)?;
                    }
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Backprop Kernels
    // =========================================================================

    /// Back-propagates one consumer's output gradient into its input at
    /// the recorded position.
    fn backprop_to(&mut self, consumer: &Consumer) -> EngineResult<()> {
        let f = upgrade(consumer)?;
        let output = f.single_output()?;
        if output.lazy().is_some() {
            return Err(EngineError::invariant(
                "backprop through a function that does not own its output",
            ));
        }
        let output_value = output.value().ok_or(EngineError::MissingValue {
            context: "consumer output value during backprop",
        })?;
        let output_grad = output.gradient().ok_or(EngineError::MissingGradient {
            context: "consumer output gradient during backprop",
        })?;

        let mut input_values = core::mem::take(&mut self.input_values);
        input_values.clear();
        for input in f.inputs() {
            input_values.push(input.resolved_value()?);
        }

        let input = f.input(consumer.input);
        if !input.needs_gradient() {
            return Err(EngineError::invariant(
                "backprop into an input that does not need a gradient",
            ));
        }

        let beta = self.ensure_gradient(&input)?;
        let input_grad = input.gradient().ok_or(EngineError::MissingGradient {
            context: "input gradient after ensure",
        })?;

        let kernels = Arc::clone(&self.kernels);
        kernels.backprop(
            &output_grad,
            consumer.input,
            f.op(),
            f.attrs(),
            Some(&output_value),
            &input_values,
            &input_grad,
            beta,
        )?;
        self.stats.backprop_launches += 1;

        self.input_values = input_values;
        Ok(())
    }

    /// Back-propagates a bucket of `Times` consumers sharing one weight.
    ///
    /// When every consumer reads the literal same weight variable and the
    /// per-consumer gradients and right-hand values agree in shape, the
    /// bucket collapses into two gathers and a single reverse matrix
    /// product; otherwise it falls back to the per-consumer loop. Both
    /// forms are numerically equivalent up to summation order.
    fn backprop_to_matrix_weight(&mut self, consumers: &[Consumer]) -> EngineResult<()> {
        let mut funcs = Vec::with_capacity(consumers.len());
        for consumer in consumers {
            if consumer.input != 0 {
                return Err(EngineError::invariant(
                    "matrix-weight bucket holds a non-weight consumer",
                ));
            }
            funcs.push(upgrade(consumer)?);
        }

        let weight = funcs[0].input(0);
        let mut grads = Vec::with_capacity(funcs.len());
        let mut operands = Vec::with_capacity(funcs.len());
        let mut fusable = consumers.len() > 1 && weight.lazy().is_none();

        for f in &funcs {
            let output = f.single_output()?;
            if output.lazy().is_some() {
                return Err(EngineError::invariant(
                    "backprop through a function that does not own its output",
                ));
            }
            let grad = output.gradient().ok_or(EngineError::MissingGradient {
                context: "Times output gradient during weight backprop",
            })?;
            let operand = f.input(1).resolved_value()?;
            fusable = fusable
                && f.input(0).ptr_eq(&weight)
                && grad.shape() == grads.first().map_or(grad.shape(), Tensor::shape)
                && operand.shape() == operands.first().map_or(operand.shape(), Tensor::shape);
            grads.push(grad);
            operands.push(operand);
        }

        if !fusable {
            for consumer in consumers {
                self.backprop_to(consumer)?;
            }
            return Ok(());
        }

        let gathered_grad = self.gather_batch_in_arena(&grads)?;
        let gathered_operand = self.gather_batch_in_arena(&operands)?;

        let beta = self.ensure_gradient(&weight)?;
        let weight_grad = weight.gradient().ok_or(EngineError::MissingGradient {
            context: "weight gradient after ensure",
        })?;

        let input_values = vec![weight.resolved_value()?, gathered_operand];
        let kernels = Arc::clone(&self.kernels);
        kernels.backprop(
            &gathered_grad,
            0,
            OpCode::Times,
            funcs[0].attrs(),
            None,
            &input_values,
            &weight_grad,
            beta,
        )?;
        self.stats.backprop_launches += 1;
        Ok(())
    }

    /// Stacks same-shape tensors along a new trailing axis, with the
    /// result carved from the arena.
    fn gather_batch_in_arena(&mut self, inputs: &[Tensor<f32>]) -> EngineResult<Tensor<f32>> {
        let first = inputs
            .first()
            .ok_or_else(|| EngineError::invariant("gather of an empty tensor list"))?;
        let axis = first.ndim();
        let mut shape = Shape::from_slice(first.shape());
        shape.push(inputs.len());

        let buffer = self.arena.allocate(&shape, first.device())?;
        let kernels = Arc::clone(&self.kernels);
        kernels.gather_batch(inputs, axis, Some(buffer))
    }

    // =========================================================================
    // Gradient Buffers
    // =========================================================================

    /// Lazily creates `var`'s gradient buffer and reports the beta the
    /// next write must use: 0 for a freshly created buffer (overwrite),
    /// 1 for an existing one (accumulate).
    ///
    /// A variable implanted as a view of a fused output gets a gradient
    /// view into the fused gradient buffer. Slicing admits no partial
    /// beta, so when the fused buffer is fresh it is zeroed explicitly
    /// and the write proceeds with beta 1.
    pub(crate) fn ensure_gradient(&mut self, var: &Variable) -> EngineResult<f32> {
        if var.gradient().is_some() {
            return Ok(1.0);
        }

        if let Some(lazy) = var.lazy() {
            let from_out = lazy.source.clone();
            let mut beta = self.ensure_gradient(&from_out)?;
            let from_grad = from_out.gradient().ok_or(EngineError::MissingGradient {
                context: "fused output gradient after ensure",
            })?;
            match lazy.index {
                None => var.set_gradient(from_grad),
                Some(j) => {
                    if beta == 0.0 {
                        from_grad.fill(0.0);
                        beta = 1.0;
                    }
                    var.set_gradient(from_grad.index_last_axis(j)?);
                }
            }
            return Ok(beta);
        }

        let device = var
            .value()
            .map_or_else(Default::default, |t| t.device());
        let buffer = self.arena.allocate(var.shape(), device)?;
        var.set_gradient(buffer);
        Ok(0.0)
    }

    // =========================================================================
    // Cleanup
    // =========================================================================

    /// Restores graph cleanliness after a successful backward pass: every
    /// visited function returns to `Idle`, every touched variable's
    /// consumer list and visit marker are cleared.
    fn reset_graph_state(&mut self, root: &Variable) {
        fn producer_of(var: &Variable) -> Option<Function> {
            var.lazy()
                .and_then(|l| l.source.producer())
                .or_else(|| var.producer())
        }

        root.clear_consumers();
        root.set_visited(false);

        let mut stack: Vec<Function> = producer_of(root).into_iter().collect();
        while let Some(f) = stack.pop() {
            if f.visit_state() == VisitState::Idle {
                continue; // already reset
            }
            f.set_visit_state(VisitState::Idle);
            for input in f.inputs() {
                let target = Self::redirect(input);
                target.clear_consumers();
                target.set_visited(false);
                input.clear_consumers();
                input.set_visited(false);
                if let Some(g) = producer_of(&target) {
                    stack.push(g);
                }
            }
        }
    }
}

fn upgrade(consumer: &Consumer) -> EngineResult<Function> {
    consumer
        .func
        .upgrade()
        .ok_or_else(|| EngineError::invariant("consumer function was dropped"))
}

// =============================================================================
// Tests
// =============================================================================
