//! End-to-end tests for the auto-batching engine: fusion scenarios,
//! scheduling order, gradient paths through lazy views, and the
//! batched-vs-reference equivalence checks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axonflow_core::storage::{Storage, StorageFormat};
use axonflow_core::Device;
use axonflow_engine::{
    splice, Attributes, CpuKernels, Engine, EngineOptions, EngineResult, KernelLibrary, OpCode,
    Variable,
};
use axonflow_tensor::Tensor;

// =============================================================================
// Helpers
// =============================================================================

fn t(data: Vec<f32>, shape: &[usize]) -> Tensor<f32> {
    Tensor::from_vec(data, shape).unwrap()
}

fn grads_for(params: &[&Variable]) -> HashMap<Variable, Option<Tensor<f32>>> {
    params.iter().map(|p| ((*p).clone(), None)).collect()
}

fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!(
            (a - e).abs() <= tol,
            "element {i}: got {a}, expected {e} (tolerance {tol})"
        );
    }
}

/// Kernel decorator counting invocations through the collaborator
/// interface.
struct CountingKernels {
    inner: CpuKernels,
    computes: AtomicUsize,
    backprops: AtomicUsize,
    gathers: AtomicUsize,
}

impl CountingKernels {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: CpuKernels::new(),
            computes: AtomicUsize::new(0),
            backprops: AtomicUsize::new(0),
            gathers: AtomicUsize::new(0),
        })
    }

    fn computes(&self) -> usize {
        self.computes.load(Ordering::Relaxed)
    }

    fn backprops(&self) -> usize {
        self.backprops.load(Ordering::Relaxed)
    }

    fn gathers(&self) -> usize {
        self.gathers.load(Ordering::Relaxed)
    }
}

impl KernelLibrary for CountingKernels {
    fn compute(
        &self,
        op: OpCode,
        inputs: &[Tensor<f32>],
        attrs: &Attributes,
        output_shape: &[usize],
        out: Option<Tensor<f32>>,
    ) -> EngineResult<Tensor<f32>> {
        self.computes.fetch_add(1, Ordering::Relaxed);
        self.inner.compute(op, inputs, attrs, output_shape, out)
    }

    #[allow(clippy::too_many_arguments)]
    fn backprop(
        &self,
        output_grad: &Tensor<f32>,
        input_index: usize,
        op: OpCode,
        attrs: &Attributes,
        output_value: Option<&Tensor<f32>>,
        input_values: &[Tensor<f32>],
        input_grad: &Tensor<f32>,
        beta: f32,
    ) -> EngineResult<()> {
        self.backprops.fetch_add(1, Ordering::Relaxed);
        self.inner.backprop(
            output_grad,
            input_index,
            op,
            attrs,
            output_value,
            input_values,
            input_grad,
            beta,
        )
    }

    fn gather_batch(
        &self,
        inputs: &[Tensor<f32>],
        axis: usize,
        out: Option<Tensor<f32>>,
    ) -> EngineResult<Tensor<f32>> {
        self.gathers.fetch_add(1, Ordering::Relaxed);
        self.inner.gather_batch(inputs, axis, out)
    }
}

// =============================================================================
// Fusion Scenarios
// =============================================================================

#[test]
fn all_same_pass_operands() {
    // t1 = Pass(a); t2 = Pass(a); out = Splice(t1, t2, axis=0) == concat(a, a)
    let kernels = CountingKernels::new();
    let mut engine = Engine::with_kernels(kernels.clone(), EngineOptions::default());

    let a = Variable::constant(t(vec![1.0, 2.0, 3.0, 4.0], &[4]));
    let out = splice(&[a.pass_through(), a.pass_through()], 0).unwrap();

    let value = engine.forward(&out).unwrap();
    assert_eq!(value.to_vec(), vec![1.0, 2.0, 3.0, 4.0, 1.0, 2.0, 3.0, 4.0]);

    // the Pass batch is pure view work; only the user Splice hits a kernel
    assert_eq!(kernels.computes(), 1);

    let trace = engine.trace();
    assert_eq!(trace[0].op, OpCode::Pass);
    assert_eq!(trace[1].op, OpCode::Pass);
    assert_eq!(trace[2].op, OpCode::Splice);
}

#[test]
fn elementwise_ops_fuse_into_one_kernel() {
    // y1 = Tanh(a); y2 = Tanh(b); y3 = Tanh(c); out = Splice(y1, y2, y3, axis=1)
    let kernels = CountingKernels::new();
    let mut engine = Engine::with_kernels(kernels.clone(), EngineOptions::default());

    let a = t(vec![0.1, 0.2, 0.3, 0.4], &[4]);
    let b = t(vec![-0.1, -0.2, -0.3, -0.4], &[4]);
    let c = t(vec![1.0, 2.0, 3.0, 4.0], &[4]);
    let (va, vb, vc) = (
        Variable::constant(a.clone()),
        Variable::constant(b.clone()),
        Variable::constant(c.clone()),
    );
    let out = splice(&[va.tanh(), vb.tanh(), vc.tanh()], 1).unwrap();

    let value = engine.forward(&out).unwrap();
    assert_eq!(value.shape(), &[4, 3]);
    for r in 0..4 {
        assert!((value.get(&[r, 0]).unwrap() - a.to_vec()[r].tanh()).abs() < 1e-6);
        assert!((value.get(&[r, 1]).unwrap() - b.to_vec()[r].tanh()).abs() < 1e-6);
        assert!((value.get(&[r, 2]).unwrap() - c.to_vec()[r].tanh()).abs() < 1e-6);
    }

    // one synthesized gather + one fused Tanh + the user Splice
    assert_eq!(kernels.computes(), 3);
    assert_eq!(engine.stats().synthesized_gathers, 1);
    let fused: Vec<_> = engine.trace().iter().filter(|e| e.fused).collect();
    assert_eq!(fused.len(), 1);
    assert_eq!(fused[0].op, OpCode::Tanh);
    assert_eq!(fused[0].batch_size, 3);
}

#[test]
fn shared_weight_times_fuses_forward_and_backward() {
    // h1 = W*a; h2 = W*b; out = h1 + h2
    let mut engine = Engine::new();

    let w_data = vec![
        0.5, -0.2, 0.1, 0.3, //
        0.0, 0.7, -0.4, 0.2, //
        0.9, -0.1, 0.6, -0.3,
    ];
    let w = Variable::parameter(t(w_data.clone(), &[3, 4]));
    let a = t(vec![1.0, 2.0, -1.0, 0.5], &[4]);
    let b = t(vec![-0.5, 1.5, 2.0, -2.0], &[4]);
    let (va, vb) = (Variable::constant(a.clone()), Variable::constant(b.clone()));

    let h1 = w.times(&va).unwrap();
    let h2 = w.times(&vb).unwrap();
    let out = h1.plus(&h2).unwrap();

    let value = engine.forward(&out).unwrap();

    // reference: one matmul per sample, summed
    let wt = t(w_data, &[3, 4]);
    let expected = axonflow_tensor::ops::zip(
        &axonflow_tensor::ops::matmul(&wt, &a).unwrap(),
        &axonflow_tensor::ops::matmul(&wt, &b).unwrap(),
        |x, y| x + y,
    )
    .unwrap();
    assert_close(&value.to_vec(), &expected.to_vec(), 1e-5);

    // exactly one fused Times launch covering both ops
    let times_events: Vec<_> = engine
        .trace()
        .iter()
        .filter(|e| e.op == OpCode::Times)
        .collect();
    assert_eq!(times_events.len(), 1);
    assert!(times_events[0].fused);
    assert_eq!(times_events[0].batch_size, 2);

    // backward: dW = dh1 * a^T + dh2 * b^T with dh1 = dh2 = 1
    let grads = engine.backward(&out, grads_for(&[&w])).unwrap();
    let dw = grads.get(&w).unwrap();
    let av = a.to_vec();
    let bv = b.to_vec();
    // each output row receives gradient 1; dW[r][k] = a[k] + b[k]
    let mut expected_dw = vec![0.0f32; 12];
    for r in 0..3 {
        for k in 0..4 {
            expected_dw[r * 4 + k] = av[k] + bv[k];
        }
    }
    assert_close(&dw.to_vec(), &expected_dw, 1e-5);
}

#[test]
fn consecutive_slices_reuse_the_batched_tensor() {
    // three Tanh ops batch into T with 3 columns; three Times ops sharing W
    // then read consecutive slices of T: the full range is reused as-is
    let kernels = CountingKernels::new();
    let mut engine = Engine::with_kernels(kernels.clone(), EngineOptions::default());

    let w = Variable::parameter(t(vec![1.0, 0.0, 0.0, 1.0], &[2, 2]));
    let c1 = Variable::constant(t(vec![0.1, 0.2], &[2]));
    let c2 = Variable::constant(t(vec![0.3, 0.4], &[2]));
    let c3 = Variable::constant(t(vec![0.5, 0.6], &[2]));

    let (q1, q2, q3) = (c1.tanh(), c2.tanh(), c3.tanh());
    let h1 = w.times(&q1).unwrap();
    let h2 = w.times(&q2).unwrap();
    let h3 = w.times(&q3).unwrap();
    let out = splice(&[h1, h2, h3], 1).unwrap();

    let value = engine.forward(&out).unwrap();
    assert_eq!(value.shape(), &[2, 3]);
    assert!((value.get(&[0, 0]).unwrap() - 0.1f32.tanh()).abs() < 1e-6);
    assert!((value.get(&[1, 2]).unwrap() - 0.6f32.tanh()).abs() < 1e-6);

    // exactly one gather (for the Tanh batch); the Times batch detects
    // consecutive slices covering the whole producer and gathers nothing
    assert_eq!(engine.stats().synthesized_gathers, 1);
    assert_eq!(engine.stats().synthesized_slices, 0);
    // gather + fused Tanh + fused Times + user Splice
    assert_eq!(kernels.computes(), 4);
}

#[test]
fn partial_consecutive_slices_synthesize_one_slice_view() {
    // only two of the three batched columns feed the next stage: the
    // engine recovers them with a free Slice view, not a gather kernel
    let kernels = CountingKernels::new();
    let mut engine = Engine::with_kernels(kernels.clone(), EngineOptions::default());

    let w = Variable::parameter(t(vec![1.0, 0.5, -0.5, 1.0], &[2, 2]));
    let c1 = Variable::constant(t(vec![0.1, 0.2], &[2]));
    let c2 = Variable::constant(t(vec![0.3, 0.4], &[2]));
    let c3 = Variable::constant(t(vec![0.5, 0.6], &[2]));

    let (q1, q2, q3) = (c1.tanh(), c2.tanh(), c3.tanh());
    let h1 = w.times(&q1).unwrap();
    let h2 = w.times(&q2).unwrap();
    // q3 rides along in the same pass, forcing the Tanh batch to width 3
    // while only columns 0..2 feed the Times stage
    let batched_total = splice(&[h1, h2], 1).unwrap().reduce_sum();
    let out = batched_total.plus(&q3.reduce_sum()).unwrap();

    engine.forward(&out).unwrap();

    assert_eq!(engine.stats().synthesized_gathers, 1); // Tanh inputs only
    assert_eq!(engine.stats().synthesized_slices, 1); // columns 0..2 of T
}

#[test]
fn barrier_runs_after_view_and_regular_work() {
    let mut engine = Engine::new();
    let a = Variable::constant(t(vec![0.5, 1.0], &[2]));

    let out = splice(&[a.pass_through(), a.tanh(), a.barrier()], 1).unwrap();
    engine.forward(&out).unwrap();

    let order: Vec<OpCode> = engine.trace().iter().map(|e| e.op).collect();
    let pass = order.iter().position(|&o| o == OpCode::Pass).unwrap();
    let tanh = order.iter().position(|&o| o == OpCode::Tanh).unwrap();
    let barrier = order.iter().position(|&o| o == OpCode::Barrier).unwrap();
    assert!(pass < tanh, "view ops run before regular ops: {order:?}");
    assert!(tanh < barrier, "barrier runs last: {order:?}");
}

#[test]
fn gradients_flow_through_shared_lazy_views() {
    // a fused Tanh output feeds two downstream ops; the fused gradient
    // buffer is created once and both contributions accumulate into it
    let mut engine = Engine::new();

    let a = Variable::parameter(t(vec![0.2, -0.3, 0.5, 0.7], &[4]));
    let b = Variable::parameter(t(vec![-0.6, 0.4, 0.1, -0.2], &[4]));

    let y1 = a.tanh();
    let y2 = b.tanh();
    let d1 = y1.plus(&y2).unwrap();
    let d2 = y1.element_times(&y2).unwrap();
    let out = d1.plus(&d2).unwrap().reduce_sum();

    let grads = engine.backward(&out, grads_for(&[&a, &b])).unwrap();

    // d/da sum((ya + yb) + ya*yb) = (1 + yb) * (1 - ya^2)
    let av = [0.2f32, -0.3, 0.5, 0.7];
    let bv = [-0.6f32, 0.4, 0.1, -0.2];
    let expected_a: Vec<f32> = av
        .iter()
        .zip(bv.iter())
        .map(|(x, y)| (1.0 + y.tanh()) * (1.0 - x.tanh() * x.tanh()))
        .collect();
    let expected_b: Vec<f32> = av
        .iter()
        .zip(bv.iter())
        .map(|(x, y)| (1.0 + x.tanh()) * (1.0 - y.tanh() * y.tanh()))
        .collect();

    assert_close(&grads.get(&a).unwrap().to_vec(), &expected_a, 1e-5);
    assert_close(&grads.get(&b).unwrap().to_vec(), &expected_b, 1e-5);
}

// =============================================================================
// Testable Properties
// =============================================================================

#[test]
fn forward_is_idempotent() {
    let kernels = CountingKernels::new();
    let mut engine = Engine::with_kernels(kernels.clone(), EngineOptions::default());

    let a = Variable::constant(t(vec![1.0, -1.0], &[2]));
    let b = Variable::constant(t(vec![2.0, -2.0], &[2]));
    let out = splice(&[a.sigmoid(), b.sigmoid()], 1).unwrap();

    let first = engine.forward(&out).unwrap();
    let count = kernels.computes();

    let second = engine.forward(&out).unwrap();
    assert!(first.shares_storage(&second));
    assert_eq!(kernels.computes(), count, "no extra kernel work on re-query");
}

#[test]
fn state_is_clean_after_forward_and_backward() {
    let mut engine = Engine::new();
    let p = Variable::parameter(t(vec![0.4, 0.6], &[2]));
    let q = Variable::parameter(t(vec![1.5, -1.5], &[2]));

    let y1 = p.tanh();
    let y2 = q.tanh();
    let out = y1.plus(&y2).unwrap().reduce_sum();

    engine.forward(&out).unwrap();
    for v in [&p, &q, &y1, &y2, &out] {
        assert!(!v.has_consumers(), "consumer list leak after forward");
    }

    engine.backward(&out, grads_for(&[&p, &q])).unwrap();
    for v in [&p, &q, &y1, &y2, &out] {
        assert!(!v.has_consumers(), "consumer list leak after backward");
    }
    let f = out.producer().unwrap();
    assert_eq!(f.visit_state(), axonflow_engine::VisitState::Idle);
}

#[test]
fn n_way_batch_issues_one_fused_kernel() {
    let kernels = CountingKernels::new();
    let mut engine = Engine::with_kernels(kernels.clone(), EngineOptions::default());

    let inputs: Vec<Variable> = (0..8)
        .map(|i| Variable::constant(t(vec![i as f32 * 0.1; 4], &[4])))
        .collect();
    let activations: Vec<Variable> = inputs.iter().map(Variable::exp).collect();
    let out = splice(&activations, 1).unwrap();

    engine.forward(&out).unwrap();

    // one gather for the batched inputs, one fused Exp, one user Splice
    assert_eq!(kernels.computes(), 3);
    let fused: Vec<_> = engine.trace().iter().filter(|e| e.fused).collect();
    assert_eq!(fused.len(), 1);
    assert_eq!(fused[0].batch_size, 8);
}

#[test]
fn distinct_weights_do_not_batch() {
    let mut engine = Engine::new();

    let w1 = Variable::parameter(t(vec![1.0, 0.0, 0.0, 1.0], &[2, 2]));
    let w2 = Variable::parameter(t(vec![2.0, 0.0, 0.0, 2.0], &[2, 2]));
    let x1 = Variable::constant(t(vec![1.0, 2.0], &[2]));
    let x2 = Variable::constant(t(vec![3.0, 4.0], &[2]));

    let out = splice(&[w1.times(&x1).unwrap(), w2.times(&x2).unwrap()], 1).unwrap();
    let value = engine.forward(&out).unwrap();
    assert_eq!(value.to_vec(), vec![1.0, 6.0, 2.0, 8.0]);

    // shape-identical but variable-distinct weights stay in separate
    // buckets: two unfused Times launches
    let times_events: Vec<_> = engine
        .trace()
        .iter()
        .filter(|e| e.op == OpCode::Times)
        .collect();
    assert_eq!(times_events.len(), 2);
    assert!(times_events.iter().all(|e| !e.fused && e.batch_size == 1));
}

#[test]
fn sparse_matrix_operand_falls_back_to_naive() {
    let mut engine = Engine::new();

    let w = Variable::parameter(t(vec![1.0, 0.0, 0.0, 1.0], &[2, 2]));
    let sparse = |data: Vec<f32>| {
        let storage = Storage::with_format(data, Device::Cpu, StorageFormat::Sparse);
        Variable::constant(Tensor::from_storage(storage, &[2]).unwrap())
    };
    let x1 = sparse(vec![1.0, 0.0]);
    let x2 = sparse(vec![0.0, 2.0]);

    let out = splice(&[w.times(&x1).unwrap(), w.times(&x2).unwrap()], 1).unwrap();
    let value = engine.forward(&out).unwrap();
    assert_eq!(value.to_vec(), vec![1.0, 0.0, 0.0, 2.0]);

    let times_events: Vec<_> = engine
        .trace()
        .iter()
        .filter(|e| e.op == OpCode::Times)
        .collect();
    assert_eq!(times_events.len(), 2);
    assert!(times_events.iter().all(|e| !e.fused));
}

#[test]
fn fused_matrix_weight_backprop_matches_reference() {
    // W consumed by two Times ops at different depths (they cannot batch
    // in forward), so backward buckets them into one gathered reverse
    // matrix product
    let kernels = CountingKernels::new();
    let mut engine = Engine::with_kernels(kernels.clone(), EngineOptions::default());

    let w_data = vec![
        0.2, -0.1, 0.4, 0.0, //
        0.3, 0.1, -0.2, 0.5, //
        -0.4, 0.2, 0.1, 0.3, //
        0.0, -0.3, 0.2, 0.1,
    ];
    let w = Variable::parameter(t(w_data.clone(), &[4, 4]));
    let x = Variable::constant(t(vec![1.0, -1.0, 0.5, 2.0], &[4]));

    let h1 = w.times(&x).unwrap();
    let h2 = w.times(&h1.tanh()).unwrap();
    let out = h1.plus(&h2).unwrap().reduce_sum();

    let grads = engine.backward(&out, grads_for(&[&w])).unwrap();
    let dw = grads.get(&w).unwrap().to_vec();
    assert!(kernels.gathers() >= 2, "weight bucket gathers grads and operands");

    // finite-difference reference
    let eps = 1e-3f32;
    let mut expected = vec![0.0f32; 16];
    for i in 0..16 {
        let scalar_for = |delta: f32| {
            let mut wd = w_data.clone();
            wd[i] += delta;
            let mut e = Engine::new();
            let wp = Variable::parameter(t(wd, &[4, 4]));
            let xv = Variable::constant(t(vec![1.0, -1.0, 0.5, 2.0], &[4]));
            let h1 = wp.times(&xv).unwrap();
            let h2 = wp.times(&h1.tanh()).unwrap();
            let out = h1.plus(&h2).unwrap().reduce_sum();
            e.forward(&out).unwrap().to_vec()[0]
        };
        expected[i] = (scalar_for(eps) - scalar_for(-eps)) / (2.0 * eps);
    }
    assert_close(&dw, &expected, 1e-2);
}

#[test]
fn batched_forward_matches_unbatchable_reference() {
    // the same arithmetic written with per-sample distinct shapes cannot
    // batch; both formulations must agree
    let sample = |vals: Vec<f32>| {
        let mut engine = Engine::new();
        let v = Variable::constant(t(vals, &[4]));
        let y = v.tanh().exp();
        engine.forward(&y).unwrap().to_vec()
    };

    let a = vec![0.1, 0.2, 0.3, 0.4];
    let b = vec![-0.5, 0.5, -1.0, 1.0];
    let ra = sample(a.clone());
    let rb = sample(b.clone());

    // batched formulation
    let mut engine = Engine::new();
    let (va, vb) = (Variable::constant(t(a, &[4])), Variable::constant(t(b, &[4])));
    let out = splice(&[va.tanh().exp(), vb.tanh().exp()], 1).unwrap();
    let batched = engine.forward(&out).unwrap();

    for r in 0..4 {
        assert!((batched.get(&[r, 0]).unwrap() - ra[r]).abs() < 1e-6);
        assert!((batched.get(&[r, 1]).unwrap() - rb[r]).abs() < 1e-6);
    }
}

#[test]
fn gradients_match_finite_differences() {
    let run = |a_data: Vec<f32>, b_data: Vec<f32>| -> (Vec<f32>, Vec<f32>, f32) {
        let mut engine = Engine::new();
        let a = Variable::parameter(t(a_data, &[3]));
        let b = Variable::parameter(t(b_data, &[3]));
        let y1 = a.sigmoid();
        let y2 = b.sigmoid();
        let out = y1.element_times(&y2).unwrap().reduce_sum();
        let value = engine.forward(&out).unwrap().to_vec()[0];
        let grads = engine.backward(&out, grads_for(&[&a, &b])).unwrap();
        (
            grads.get(&a).unwrap().to_vec(),
            grads.get(&b).unwrap().to_vec(),
            value,
        )
    };

    let a0 = vec![0.3f32, -0.7, 1.2];
    let b0 = vec![-0.4f32, 0.9, 0.2];
    let (da, db, _) = run(a0.clone(), b0.clone());

    let eps = 1e-3f32;
    for i in 0..3 {
        let mut plus = a0.clone();
        plus[i] += eps;
        let mut minus = a0.clone();
        minus[i] -= eps;
        let (_, _, f_plus) = run(plus, b0.clone());
        let (_, _, f_minus) = run(minus, b0.clone());
        let numeric = (f_plus - f_minus) / (2.0 * eps);
        assert!((da[i] - numeric).abs() < 1e-2, "da[{i}]: {} vs {numeric}", da[i]);
    }
    for i in 0..3 {
        let mut plus = b0.clone();
        plus[i] += eps;
        let mut minus = b0.clone();
        minus[i] -= eps;
        let (_, _, f_plus) = run(a0.clone(), plus);
        let (_, _, f_minus) = run(a0.clone(), minus);
        let numeric = (f_plus - f_minus) / (2.0 * eps);
        assert!((db[i] - numeric).abs() < 1e-2, "db[{i}]: {} vs {numeric}", db[i]);
    }
}

#[test]
fn reused_gradient_buffers_are_reset() {
    // passing the same user buffer through two backward calls must not
    // leak the first pass's contents into the second
    let mut engine = Engine::new();
    let p = Variable::parameter(t(vec![0.5, 1.5], &[2]));
    let out = p.exp().reduce_sum();

    let buffer = t(vec![0.0, 0.0], &[2]);
    let mut request = HashMap::new();
    request.insert(p.clone(), Some(buffer.clone()));
    engine.backward(&out, request).unwrap();
    let first = buffer.to_vec();

    let mut request = HashMap::new();
    request.insert(p.clone(), Some(buffer.clone()));
    engine.backward(&out, request).unwrap();
    assert_close(&buffer.to_vec(), &first, 1e-6);
}

#[test]
fn small_arena_rolls_over_between_allocations() {
    let mut engine = Engine::with_options(EngineOptions { arena_capacity: 8 });
    let a = Variable::constant(t(vec![0.1; 6], &[6]));
    // a chain of three 6-element outputs through an 8-element arena: the
    // 2-element remainders are wasted and each output starts a block
    let out = a.exp().negate().exp();
    engine.forward(&out).unwrap();

    assert_eq!(engine.arena().blocks_allocated(), 3);
}
