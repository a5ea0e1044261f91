//! Variable - Tensor-Valued Graph Edges
//!
//! A `Variable` is an edge in the computation graph: produced by at most
//! one function, consumed by zero or more. Variables carry the value and
//! gradient slots the engine fills, the lazy slot that implants a batched
//! result as a slice view, and the transient consumer list built during
//! traversal.
//!
//! Ownership is arranged so the strong graph is acyclic: an output
//! variable owns its producing function, a function owns its input
//! variables, and consumer back-references are weak. The lazy slot holds
//! the fused op's output variable strongly; everything it reaches was
//! newly synthesized by the engine and never cycles back.
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use smallvec::SmallVec;

use axonflow_core::DType;
use axonflow_tensor::{Shape, Tensor};

use crate::error::{EngineError, EngineResult};
use crate::function::{Function, WeakFunction};

// =============================================================================
// Identity
// =============================================================================

/// Unique identifier for a variable, stable across handle clones.
pub type VariableId = u64;

static VARIABLE_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_variable_id() -> VariableId {
    VARIABLE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

// =============================================================================
// Variable Kind
// =============================================================================

/// The role of a variable in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// User-bound input; forward fails if unbound.
    Input,
    /// Deferred input; forward fails if unbound.
    Placeholder,
    /// Trainable leaf with a value and (by default) a gradient.
    Parameter,
    /// Non-trainable leaf with a value.
    Constant,
    /// Produced by a function.
    Output,
}

// =============================================================================
// Lazy Source
// =============================================================================

/// Marks a variable's value (and gradient) as a view into `source` (the
/// output of a fused operation): the whole of it when `index` is `None`,
/// or the `index`-th slice along the last axis.
///
/// Holding the source variable strongly keeps the fused function alive
/// too (the source owns its producer), without any reference cycle: the
/// chain points strictly from original variables toward newly synthesized
/// ones.
#[derive(Debug, Clone)]
pub struct LazySource {
    /// The variable holding the materialized batched data.
    pub source: Variable,
    /// Slice index along the last axis; `None` aliases the whole source.
    pub index: Option<usize>,
}

impl LazySource {
    /// Returns the function that produced the source (the fused op the
    /// backward pass descends into).
    pub fn producer(&self) -> EngineResult<Function> {
        self.source
            .producer()
            .ok_or_else(|| EngineError::invariant("lazy source has no producer"))
    }
}

impl PartialEq for LazySource {
    fn eq(&self, other: &Self) -> bool {
        self.source.ptr_eq(&other.source) && self.index == other.index
    }
}

// =============================================================================
// Consumer
// =============================================================================

/// A `(function, input position)` consumer edge recorded during traversal.
#[derive(Debug, Clone)]
pub struct Consumer {
    /// The consuming function (weak; consumer lists are transient).
    pub func: WeakFunction,
    /// Which input position of the consumer this variable feeds.
    pub input: usize,
}

/// Consumer list: inline capacity of one covers the common case of a
/// single consumer without a heap allocation.
pub type Consumers = SmallVec<[Consumer; 1]>;

// =============================================================================
// Variable
// =============================================================================

#[derive(Debug)]
struct VarState {
    value: Option<Tensor<f32>>,
    gradient: Option<Tensor<f32>>,
    lazy: Option<LazySource>,
    consumers: Consumers,
    visited: bool,
    producer: Option<Function>,
}

#[derive(Debug)]
struct VariableInner {
    id: VariableId,
    kind: VarKind,
    shape: Shape,
    dtype: DType,
    needs_gradient: bool,
    state: RwLock<VarState>,
}

/// A tensor-valued edge in the computation graph. Cloning is cheap and
/// yields another handle to the same variable.
#[derive(Clone, Debug)]
pub struct Variable {
    inner: Arc<VariableInner>,
}

/// Weak handle to a variable (used for function → output back-links).
#[derive(Clone, Debug)]
pub struct WeakVariable {
    inner: Weak<VariableInner>,
}

impl WeakVariable {
    /// Upgrades to a strong handle if the variable is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Variable> {
        self.inner.upgrade().map(|inner| Variable { inner })
    }
}

impl Variable {
    fn new(kind: VarKind, shape: Shape, dtype: DType, needs_gradient: bool) -> Self {
        Self {
            inner: Arc::new(VariableInner {
                id: next_variable_id(),
                kind,
                shape,
                dtype,
                needs_gradient,
                state: RwLock::new(VarState {
                    value: None,
                    gradient: None,
                    lazy: None,
                    consumers: SmallVec::new(),
                    visited: false,
                    producer: None,
                }),
            }),
        }
    }

    // =========================================================================
    // Constructors
    // =========================================================================

    /// Creates an unbound input variable.
    #[must_use]
    pub fn input(shape: &[usize]) -> Self {
        Self::new(VarKind::Input, Shape::from_slice(shape), DType::F32, false)
    }

    /// Creates an unbound placeholder variable.
    #[must_use]
    pub fn placeholder(shape: &[usize]) -> Self {
        Self::new(
            VarKind::Placeholder,
            Shape::from_slice(shape),
            DType::F32,
            false,
        )
    }

    /// Creates a parameter from its initial value (tracks gradients).
    #[must_use]
    pub fn parameter(value: Tensor<f32>) -> Self {
        let v = Self::new(
            VarKind::Parameter,
            Shape::from_slice(value.shape()),
            value.dtype(),
            true,
        );
        v.set_value(value);
        v
    }

    /// Creates a constant from its value (no gradient).
    #[must_use]
    pub fn constant(value: Tensor<f32>) -> Self {
        let v = Self::new(
            VarKind::Constant,
            Shape::from_slice(value.shape()),
            value.dtype(),
            false,
        );
        v.set_value(value);
        v
    }

    /// Creates a function-output variable (engine/builder use).
    pub(crate) fn output(shape: Shape, needs_gradient: bool) -> Self {
        Self::new(VarKind::Output, shape, DType::F32, needs_gradient)
    }

    /// Binds a value to an Input or Placeholder.
    pub fn bind(&self, value: Tensor<f32>) -> EngineResult<()> {
        if !matches!(self.kind(), VarKind::Input | VarKind::Placeholder) {
            return Err(EngineError::invariant(
                "bind is only valid on Input and Placeholder variables",
            ));
        }
        if value.shape() != self.shape() {
            return Err(axonflow_core::Error::shape_mismatch(self.shape(), value.shape()).into());
        }
        self.set_value(value);
        Ok(())
    }

    // =========================================================================
    // Identity and Metadata
    // =========================================================================

    /// Returns the stable identifier of this variable.
    #[must_use]
    pub fn id(&self) -> VariableId {
        self.inner.id
    }

    /// Returns the variable kind.
    #[must_use]
    pub fn kind(&self) -> VarKind {
        self.inner.kind
    }

    /// Returns the declared shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.inner.shape
    }

    /// Returns the element dtype.
    #[must_use]
    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    /// Returns whether gradients flow into this variable.
    #[must_use]
    pub fn needs_gradient(&self) -> bool {
        self.inner.needs_gradient
    }

    /// Returns true if both handles refer to the same variable.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns a weak handle.
    #[must_use]
    pub fn downgrade(&self) -> WeakVariable {
        WeakVariable {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // =========================================================================
    // Slots
    // =========================================================================

    /// Returns the materialized value, if present.
    #[must_use]
    pub fn value(&self) -> Option<Tensor<f32>> {
        self.inner.state.read().value.clone()
    }

    /// Stores the materialized value.
    pub fn set_value(&self, value: Tensor<f32>) {
        self.inner.state.write().value = Some(value);
    }

    /// Returns true if either a value or a lazy source is present.
    #[must_use]
    pub fn has_value_or_lazy(&self) -> bool {
        let state = self.inner.state.read();
        state.value.is_some() || state.lazy.is_some()
    }

    /// Returns the gradient, if present.
    #[must_use]
    pub fn gradient(&self) -> Option<Tensor<f32>> {
        self.inner.state.read().gradient.clone()
    }

    /// Stores the gradient.
    pub fn set_gradient(&self, gradient: Tensor<f32>) {
        self.inner.state.write().gradient = Some(gradient);
    }

    /// Drops the gradient (it will be re-accumulated).
    pub fn clear_gradient(&self) {
        self.inner.state.write().gradient = None;
    }

    /// Returns the lazy source, if set.
    #[must_use]
    pub fn lazy(&self) -> Option<LazySource> {
        self.inner.state.read().lazy.clone()
    }

    /// Implants a lazy source.
    pub fn set_lazy(&self, lazy: LazySource) {
        self.inner.state.write().lazy = Some(lazy);
    }

    /// Returns the producing function, if any.
    #[must_use]
    pub fn producer(&self) -> Option<Function> {
        self.inner.state.read().producer.clone()
    }

    pub(crate) fn set_producer(&self, f: Function) {
        self.inner.state.write().producer = Some(f);
    }

    // =========================================================================
    // Consumers and Visit Marker
    // =========================================================================

    /// Appends a consumer edge.
    pub(crate) fn push_consumer(&self, f: &Function, input: usize) {
        self.inner.state.write().consumers.push(Consumer {
            func: f.downgrade(),
            input,
        });
    }

    /// Returns a snapshot of the consumer list.
    #[must_use]
    pub fn consumers(&self) -> Consumers {
        self.inner.state.read().consumers.clone()
    }

    /// Returns true if the consumer list is non-empty.
    #[must_use]
    pub fn has_consumers(&self) -> bool {
        !self.inner.state.read().consumers.is_empty()
    }

    /// Removes and returns all consumer edges.
    pub(crate) fn take_consumers(&self) -> Consumers {
        core::mem::take(&mut self.inner.state.write().consumers)
    }

    /// Clears the consumer list.
    pub(crate) fn clear_consumers(&self) {
        self.inner.state.write().consumers.clear();
    }

    pub(crate) fn visited(&self) -> bool {
        self.inner.state.read().visited
    }

    pub(crate) fn set_visited(&self, visited: bool) {
        self.inner.state.write().visited = visited;
    }

    // =========================================================================
    // Lazy Resolution
    // =========================================================================

    /// Returns the value, materializing it from the lazy source chain on
    /// demand (aliasing the producer output for the whole-output sentinel,
    /// taking an index-last-axis view otherwise). Resolved values are
    /// cached in the value slot.
    pub fn resolved_value(&self) -> EngineResult<Tensor<f32>> {
        resolve_chain(
            self,
            |state| state.value(),
            |var, value| var.set_value(value),
            EngineError::MissingValue {
                context: "variable has neither a value nor a lazy source",
            },
        )
    }

    /// Returns the gradient, materializing it from the lazy source chain
    /// on demand. Unlike `resolved_value`, this never allocates: the
    /// producer's gradient must already exist.
    pub fn resolved_gradient(&self) -> EngineResult<Tensor<f32>> {
        resolve_chain(
            self,
            |state| state.gradient(),
            |var, gradient| var.set_gradient(gradient),
            EngineError::MissingGradient {
                context: "variable has neither a gradient nor a lazy source",
            },
        )
    }
}

/// Walks the lazy chain until a materialized slot is found, then walks
/// back down caching alias/slice views. Iterative so deep chains cannot
/// overflow the stack.
fn resolve_chain(
    start: &Variable,
    read: impl Fn(&Variable) -> Option<Tensor<f32>>,
    write: impl Fn(&Variable, Tensor<f32>),
    missing: EngineError,
) -> EngineResult<Tensor<f32>> {
    if let Some(t) = read(start) {
        return Ok(t);
    }

    let mut chain: Vec<Variable> = vec![start.clone()];
    loop {
        let last = chain.last().expect("chain is never empty");
        if read(last).is_some() {
            break;
        }
        let lazy = last.lazy().ok_or_else(|| missing.clone())?;
        chain.push(lazy.source);
    }

    let terminal = chain.pop().expect("chain is never empty");
    let mut current = read(&terminal).expect("loop exited on a materialized slot");
    while let Some(var) = chain.pop() {
        let lazy = var.lazy().expect("non-terminal chain entries are lazy");
        let view = match lazy.index {
            None => current.clone(),
            Some(j) => current.index_last_axis(j)?,
        };
        write(&var, view.clone());
        current = view;
    }
    Ok(current)
}

// =============================================================================
// Identity-Based Equality
// =============================================================================

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Variable {}

impl core::hash::Hash for Variable {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

// =============================================================================
// Tests
// =============================================================================
