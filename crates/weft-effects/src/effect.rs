//! The effect algebra.
//!
//! An [`Effect<A, E>`] is an immutable, lazy description of a computation
//! that may produce an `A`, fail with a [`Cause<E>`], suspend, need a
//! service, or run under a retry schedule. Nothing happens until a runtime
//! interprets it, and the same value may be interpreted any number of times.
//!
//! Internally every effect is an [`EffectNode`], a closed set of variants
//! whose intermediate values are type-erased so that a single iterative
//! interpreter can drive arbitrarily long chains. The typed `Effect`
//! wrapper restores the types at the edges.

use std::any::{self, Any};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::rc::Rc;
use std::time::Duration;

use crate::cause::{Cause, Defect, ValidationError};
use crate::context::{Tag, TypeKey};
use crate::layer::Layer;
use crate::schedule::Schedule;
use crate::scope::Scope;

// ============================================================================
// Erased values and continuations
// ============================================================================

/// A type-erased intermediate value.
pub type Value = Box<dyn Any>;

/// What a continuation decides after receiving a value.
pub enum Step<E> {
    /// A settled value.
    Value(Value),
    /// More work to interpret.
    Effect(EffectNode<E>),
    /// A failure to propagate.
    Failure(Cause<E>),
}

/// "What to do next" with an intermediate value.
pub type Continuation<E> = Rc<dyn Fn(Value) -> Step<E>>;

/// Recover the concrete type of an erased value.
pub fn downcast_value<A: 'static>(value: Value) -> Result<A, Defect> {
    value
        .downcast::<A>()
        .map(|boxed| *boxed)
        .map_err(|_| Defect::TypeMismatch {
            expected: any::type_name::<A>(),
        })
}

// ============================================================================
// Async completion slot
// ============================================================================

/// Single-assignment cell that an async registration settles.
///
/// Only the first settlement counts; later calls are ignored.
pub struct AsyncSlot<E> {
    outcome: Rc<RefCell<Option<Result<Value, Cause<E>>>>>,
    settled: Rc<Cell<bool>>,
}

impl<E> AsyncSlot<E> {
    pub fn new() -> Self {
        Self {
            outcome: Rc::new(RefCell::new(None)),
            settled: Rc::new(Cell::new(false)),
        }
    }

    /// Store the outcome. Returns false if the slot was already settled.
    pub fn settle(&self, outcome: Result<Value, Cause<E>>) -> bool {
        if self.settled.replace(true) {
            return false;
        }
        *self.outcome.borrow_mut() = Some(outcome);
        true
    }

    pub fn is_settled(&self) -> bool {
        self.settled.get()
    }

    /// Take the stored outcome, if any.
    pub fn take(&self) -> Option<Result<Value, Cause<E>>> {
        self.outcome.borrow_mut().take()
    }
}

impl<E> Default for AsyncSlot<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for AsyncSlot<E> {
    fn clone(&self) -> Self {
        Self {
            outcome: Rc::clone(&self.outcome),
            settled: Rc::clone(&self.settled),
        }
    }
}

/// Typed resolve/reject callbacks handed to [`Effect::async_callback`].
pub struct Resume<A, E> {
    slot: AsyncSlot<E>,
    _value: PhantomData<fn(A)>,
}

impl<A: 'static, E> Resume<A, E> {
    pub fn succeed(&self, value: A) -> bool {
        self.slot.settle(Ok(Box::new(value)))
    }

    pub fn fail(&self, error: E) -> bool {
        self.slot.settle(Err(Cause::Fail(error)))
    }

    pub fn fail_cause(&self, cause: Cause<E>) -> bool {
        self.slot.settle(Err(cause))
    }
}

impl<A, E> Clone for Resume<A, E> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            _value: PhantomData,
        }
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// Variant tag of an [`EffectNode`]; the key of handler dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EffectTag {
    Pure,
    Fail,
    Suspend,
    Bind,
    Service,
    Provide,
    Sleep,
    Async,
    Catch,
    Parallel,
    Race,
    Retry,
    Scoped,
    Finalizer,
    Timeout,
}

impl EffectTag {
    /// Every variant, in declaration order.
    pub const ALL: [EffectTag; 15] = [
        EffectTag::Pure,
        EffectTag::Fail,
        EffectTag::Suspend,
        EffectTag::Bind,
        EffectTag::Service,
        EffectTag::Provide,
        EffectTag::Sleep,
        EffectTag::Async,
        EffectTag::Catch,
        EffectTag::Parallel,
        EffectTag::Race,
        EffectTag::Retry,
        EffectTag::Scoped,
        EffectTag::Finalizer,
        EffectTag::Timeout,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            EffectTag::Pure => "Pure",
            EffectTag::Fail => "Fail",
            EffectTag::Suspend => "Suspend",
            EffectTag::Bind => "Bind",
            EffectTag::Service => "Service",
            EffectTag::Provide => "Provide",
            EffectTag::Sleep => "Sleep",
            EffectTag::Async => "Async",
            EffectTag::Catch => "Catch",
            EffectTag::Parallel => "Parallel",
            EffectTag::Race => "Race",
            EffectTag::Retry => "Retry",
            EffectTag::Scoped => "Scoped",
            EffectTag::Finalizer => "Finalizer",
            EffectTag::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for EffectTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The untyped effect algebra. Each variant carries only what is needed
/// to resume.
#[derive(Clone)]
pub enum EffectNode<E> {
    /// A value; the closure produces a fresh copy on every visit.
    Pure(Rc<dyn Fn() -> Value>),
    Fail(Cause<E>),
    /// Deferred construction, evaluated on each visit.
    Suspend(Rc<dyn Fn() -> EffectNode<E>>),
    /// Run the source, then feed its value to the continuation.
    Bind(Rc<EffectNode<E>>, Continuation<E>),
    /// Look up a service; yields an `Rc<dyn Any>`.
    Service(TypeKey),
    /// Interpret the inner effect under `layer(context)`.
    Provide(Layer, Rc<EffectNode<E>>),
    Sleep(Duration),
    /// Register external completion on the slot.
    Async(Rc<dyn Fn(AsyncSlot<E>)>),
    /// Recover from causes accepted by the predicate.
    Catch {
        source: Rc<EffectNode<E>>,
        predicate: Rc<dyn Fn(&Cause<E>) -> bool>,
        handler: Rc<dyn Fn(Cause<E>) -> EffectNode<E>>,
    },
    /// Run every branch; results in input order, first failure wins.
    Parallel {
        branches: Vec<EffectNode<E>>,
        collect: Rc<dyn Fn(Vec<Value>) -> Result<Value, Defect>>,
    },
    /// First success wins; all failing yields a composite cause.
    Race(Vec<EffectNode<E>>),
    Retry(Rc<EffectNode<E>>, Schedule<E>),
    /// Run the body in a fresh scope closed on every exit path.
    Scoped(Rc<dyn Fn(Scope<E>) -> EffectNode<E>>),
    /// Register a release effect on the active scope; yields `()`.
    Finalizer(Rc<dyn Fn() -> EffectNode<E>>),
    /// Fail with `Cause::Timeout` if the source takes longer than the bound.
    Timeout(Rc<EffectNode<E>>, Duration),
}

impl<E> EffectNode<E> {
    pub fn tag(&self) -> EffectTag {
        match self {
            EffectNode::Pure(_) => EffectTag::Pure,
            EffectNode::Fail(_) => EffectTag::Fail,
            EffectNode::Suspend(_) => EffectTag::Suspend,
            EffectNode::Bind(..) => EffectTag::Bind,
            EffectNode::Service(_) => EffectTag::Service,
            EffectNode::Provide(..) => EffectTag::Provide,
            EffectNode::Sleep(_) => EffectTag::Sleep,
            EffectNode::Async(_) => EffectTag::Async,
            EffectNode::Catch { .. } => EffectTag::Catch,
            EffectNode::Parallel { .. } => EffectTag::Parallel,
            EffectNode::Race(_) => EffectTag::Race,
            EffectNode::Retry(..) => EffectTag::Retry,
            EffectNode::Scoped(_) => EffectTag::Scoped,
            EffectNode::Finalizer(_) => EffectTag::Finalizer,
            EffectNode::Timeout(..) => EffectTag::Timeout,
        }
    }

    pub fn unit() -> Self {
        EffectNode::Pure(Rc::new(|| -> Value { Box::new(()) }))
    }

    fn inert() -> Self {
        EffectNode::Sleep(Duration::ZERO)
    }

    /// Move every child this node solely owns onto `out`.
    fn detach_children(self, out: &mut Vec<EffectNode<E>>) {
        let source = match self {
            EffectNode::Bind(source, _)
            | EffectNode::Provide(_, source)
            | EffectNode::Retry(source, _)
            | EffectNode::Timeout(source, _)
            | EffectNode::Catch { source, .. } => source,
            EffectNode::Parallel { branches, .. } | EffectNode::Race(branches) => {
                out.extend(branches);
                return;
            }
            _ => return,
        };
        if let Ok(child) = Rc::try_unwrap(source) {
            out.push(child);
        }
    }
}

impl<E> fmt::Debug for EffectNode<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectNode::Bind(source, _) => write!(f, "Bind({:?})", source),
            EffectNode::Provide(_, inner) => write!(f, "Provide({:?})", inner),
            EffectNode::Retry(source, schedule) => write!(f, "Retry({:?}, {:?})", source, schedule),
            EffectNode::Timeout(source, limit) => write!(f, "Timeout({:?}, {:?})", source, limit),
            EffectNode::Catch { source, .. } => write!(f, "Catch({:?})", source),
            EffectNode::Service(key) => write!(f, "Service({})", key),
            EffectNode::Sleep(duration) => write!(f, "Sleep({:?})", duration),
            EffectNode::Parallel { branches, .. } => write!(f, "Parallel({:?})", branches),
            EffectNode::Race(branches) => write!(f, "Race({:?})", branches),
            other => f.write_str(other.tag().name()),
        }
    }
}

// ============================================================================
// Typed effects
// ============================================================================

/// A lazy, immutable description of a computation producing `A` or failing
/// with `Cause<E>`.
pub struct Effect<A, E> {
    node: EffectNode<E>,
    _value: PhantomData<fn() -> A>,
}

impl<A, E> Effect<A, E> {
    /// Wrap a raw node. The caller guarantees it yields an `A`.
    pub fn from_node(node: EffectNode<E>) -> Self {
        Self {
            node,
            _value: PhantomData,
        }
    }

    pub fn node(&self) -> &EffectNode<E> {
        &self.node
    }

    pub fn into_node(mut self) -> EffectNode<E> {
        mem::replace(&mut self.node, EffectNode::inert())
    }

    pub fn tag(&self) -> EffectTag {
        self.node.tag()
    }
}

// Nested effects can be thousands of nodes deep; tear them down
// iteratively so dropping one never overflows the stack.
impl<A, E> Drop for Effect<A, E> {
    fn drop(&mut self) {
        let mut pending = vec![mem::replace(&mut self.node, EffectNode::inert())];
        while let Some(node) = pending.pop() {
            node.detach_children(&mut pending);
        }
    }
}

impl<A, E: Clone> Clone for Effect<A, E> {
    fn clone(&self) -> Self {
        Self::from_node(self.node.clone())
    }
}

impl<A, E> fmt::Debug for Effect<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("value", &any::type_name::<A>())
            .field("node", &self.node.tag())
            .finish()
    }
}

impl<E: Clone + 'static> Effect<(), E> {
    pub fn unit() -> Self {
        Self::from_node(EffectNode::unit())
    }

    /// Cooperative delay through the active clock.
    pub fn sleep_for(duration: Duration) -> Self {
        Self::from_node(EffectNode::Sleep(duration))
    }

    /// Register `release` on the currently active scope.
    pub fn add_finalizer(release: impl Fn() -> Effect<(), E> + 'static) -> Self {
        Self::from_node(EffectNode::Finalizer(Rc::new(move || release().into_node())))
    }
}

impl<S: 'static, E: Clone + 'static> Effect<Rc<S>, E> {
    /// Resolve a service from the nearest enclosing context.
    pub fn service(tag: Tag<S>) -> Self {
        let source = EffectNode::Service(tag.key());
        let resolve: Continuation<E> = Rc::new(|value: Value| {
            let service = downcast_value::<Rc<dyn Any>>(value).and_then(|erased| {
                erased.downcast::<S>().map_err(|_| Defect::TypeMismatch {
                    expected: any::type_name::<S>(),
                })
            });
            match service {
                Ok(service) => Step::Value(Box::new(service)),
                Err(defect) => Step::Failure(Cause::Defect(defect)),
            }
        });
        Self::from_node(EffectNode::Bind(Rc::new(source), resolve))
    }
}

impl<A: 'static, E: Clone + 'static> Effect<A, E> {
    // ------------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------------

    pub fn succeed(value: A) -> Self
    where
        A: Clone,
    {
        Self::from_node(EffectNode::Pure(Rc::new(move || -> Value { Box::new(value.clone()) })))
    }

    pub fn fail(error: E) -> Self {
        Self::fail_cause(Cause::Fail(error))
    }

    pub fn fail_cause(cause: Cause<E>) -> Self {
        Self::from_node(EffectNode::Fail(cause))
    }

    pub fn die(defect: Defect) -> Self {
        Self::fail_cause(Cause::Defect(defect))
    }

    /// Reject caller-supplied data.
    pub fn invalid(error: ValidationError) -> Self {
        Self::fail_cause(Cause::Validation(error))
    }

    pub fn from_validation(result: Result<A, ValidationError>) -> Self
    where
        A: Clone,
    {
        match result {
            Ok(value) => Self::succeed(value),
            Err(error) => Self::invalid(error),
        }
    }

    pub fn from_result(result: Result<A, E>) -> Self
    where
        A: Clone,
    {
        match result {
            Ok(value) => Self::succeed(value),
            Err(error) => Self::fail(error),
        }
    }

    /// Build the effect lazily, on every visit.
    pub fn suspend(thunk: impl Fn() -> Effect<A, E> + 'static) -> Self {
        Self::from_node(EffectNode::Suspend(Rc::new(move || thunk().into_node())))
    }

    /// A synchronous side effect, run on every visit.
    pub fn sync(f: impl Fn() -> A + 'static) -> Self {
        Effect::<(), E>::unit().map(move |()| f())
    }

    /// A fallible synchronous side effect; `Err` travels as `Fail`.
    pub fn attempt(f: impl Fn() -> Result<A, E> + 'static) -> Self {
        Effect::<(), E>::unit().bind(move |()| match f() {
            Ok(value) => Step::Value(Box::new(value)),
            Err(error) => Step::Failure(Cause::Fail(error)),
        })
    }

    /// Bridge callback-style completion. `start` receives the resolve and
    /// reject callbacks; the first one called settles the effect.
    pub fn async_callback(start: impl Fn(Resume<A, E>) + 'static) -> Self {
        Self::from_node(EffectNode::Async(Rc::new(move |slot| {
            start(Resume {
                slot,
                _value: PhantomData,
            })
        })))
    }

    /// Permanent suspension. Awaiting it in the synchronous runtime fails
    /// fast with [`Defect::AsyncNeverSettled`].
    pub fn never() -> Self {
        Self::from_node(EffectNode::Async(Rc::new(|_slot: AsyncSlot<E>| {})))
    }

    /// Run every effect, collecting results in input order. The first
    /// failure wins.
    pub fn all(effects: impl IntoIterator<Item = Effect<A, E>>) -> Effect<Vec<A>, E> {
        let branches = effects.into_iter().map(Effect::into_node).collect();
        let collect = Rc::new(|values: Vec<Value>| -> Result<Value, Defect> {
            let items = values
                .into_iter()
                .map(downcast_value::<A>)
                .collect::<Result<Vec<A>, Defect>>()?;
            Ok(Box::new(items))
        });
        Effect::from_node(EffectNode::Parallel { branches, collect })
    }

    /// The first effect to succeed wins. If all fail, the failure is a
    /// composite of every cause in input order.
    pub fn race(effects: impl IntoIterator<Item = Effect<A, E>>) -> Self {
        Self::from_node(EffectNode::Race(
            effects.into_iter().map(Effect::into_node).collect(),
        ))
    }

    /// Run `body` in a fresh scope that is closed on every exit path.
    pub fn scoped(body: impl Fn(Scope<E>) -> Effect<A, E> + 'static) -> Self {
        Self::from_node(EffectNode::Scoped(Rc::new(move |scope| body(scope).into_node())))
    }

    /// Run `acquire`, register `release(resource)` on the active scope and
    /// yield the resource.
    pub fn acquire_release(
        acquire: Effect<A, E>,
        release: impl Fn(A) -> Effect<(), E> + 'static,
    ) -> Self
    where
        A: Clone,
    {
        let release = Rc::new(release);
        acquire.flat_map(move |resource: A| {
            let release = Rc::clone(&release);
            let held = resource.clone();
            Effect::<(), E>::add_finalizer(move || release(held.clone()))
                .map(move |()| resource.clone())
        })
    }

    // ------------------------------------------------------------------------
    // Sequencing
    // ------------------------------------------------------------------------

    fn bind<B>(self, k: impl Fn(A) -> Step<E> + 'static) -> Effect<B, E> {
        let continuation: Continuation<E> = Rc::new(move |value: Value| match downcast_value::<A>(value) {
            Ok(a) => k(a),
            Err(defect) => Step::Failure(Cause::Defect(defect)),
        });
        Effect::from_node(EffectNode::Bind(Rc::new(self.into_node()), continuation))
    }

    pub fn map<B: 'static>(self, f: impl Fn(A) -> B + 'static) -> Effect<B, E> {
        self.bind(move |a| Step::Value(Box::new(f(a))))
    }

    pub fn flat_map<B: 'static>(self, f: impl Fn(A) -> Effect<B, E> + 'static) -> Effect<B, E> {
        self.bind(move |a| Step::Effect(f(a).into_node()))
    }

    pub fn and_then<B: 'static>(self, f: impl Fn(A) -> Effect<B, E> + 'static) -> Effect<B, E> {
        self.flat_map(f)
    }

    pub fn as_unit(self) -> Effect<(), E> {
        self.map(|_| ())
    }

    /// Observe the value without changing it.
    pub fn tap(self, f: impl Fn(&A) + 'static) -> Self {
        self.map(move |a| {
            f(&a);
            a
        })
    }

    pub fn zip<B: 'static>(self, other: Effect<B, E>) -> Effect<(A, B), E>
    where
        A: Clone,
    {
        self.flat_map(move |a: A| other.clone().map(move |b| (a.clone(), b)))
    }

    // ------------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------------

    /// Recover from causes accepted by `predicate`.
    pub fn catch_cause(
        self,
        predicate: impl Fn(&Cause<E>) -> bool + 'static,
        handler: impl Fn(Cause<E>) -> Effect<A, E> + 'static,
    ) -> Self {
        Self::from_node(EffectNode::Catch {
            source: Rc::new(self.into_node()),
            predicate: Rc::new(predicate),
            handler: Rc::new(move |cause| handler(cause).into_node()),
        })
    }

    /// Recover from typed failures accepted by `predicate`. Other causes
    /// keep unwinding.
    pub fn catch_error(
        self,
        predicate: impl Fn(&E) -> bool + 'static,
        handler: impl Fn(E) -> Effect<A, E> + 'static,
    ) -> Self {
        self.catch_cause(
            move |cause| matches!(cause, Cause::Fail(error) if predicate(error)),
            move |cause| match cause {
                Cause::Fail(error) => handler(error),
                other => Effect::fail_cause(other),
            },
        )
    }

    /// Recover from every typed failure.
    pub fn catch_all(self, handler: impl Fn(E) -> Effect<A, E> + 'static) -> Self {
        self.catch_error(|_| true, handler)
    }

    /// Fall back to `other` on any typed failure.
    pub fn or_else(self, other: Effect<A, E>) -> Self {
        self.catch_all(move |_| other.clone())
    }

    /// Run `finalizer` after this effect on every exit path.
    pub fn ensuring(self, finalizer: Effect<(), E>) -> Self {
        Effect::scoped(move |_scope| {
            let finalizer = finalizer.clone();
            let body = self.clone();
            Effect::<(), E>::add_finalizer(move || finalizer.clone()).flat_map(move |()| body.clone())
        })
    }

    // ------------------------------------------------------------------------
    // Policies and environment
    // ------------------------------------------------------------------------

    /// Re-run on typed failure while `schedule` allows it.
    ///
    /// Only `Cause::Fail` is retried. Defects, validation failures and
    /// timeouts propagate on the first occurrence; to retry a timeout,
    /// turn it into a typed error first:
    ///
    /// ```
    /// use std::time::Duration;
    /// use weft_effects::{Cause, Effect, Schedule};
    ///
    /// let call = Effect::<u32, String>::succeed(1)
    ///     .timeout(Duration::from_millis(200))
    ///     .catch_cause(
    ///         |cause| matches!(cause, Cause::Timeout(_)),
    ///         |_| Effect::fail("timed out".to_string()),
    ///     )
    ///     .retry_with(Schedule::fixed_delay(Duration::from_millis(50)).up_to_max_retries(3));
    /// # let _ = call;
    /// ```
    pub fn retry_with(self, schedule: Schedule<E>) -> Self {
        Self::from_node(EffectNode::Retry(Rc::new(self.into_node()), schedule))
    }

    /// Interpret under `layer` applied to the surrounding context.
    pub fn provide(self, layer: Layer) -> Self {
        Self::from_node(EffectNode::Provide(layer, Rc::new(self.into_node())))
    }

    /// Fail with [`Cause::Timeout`] if the observed duration exceeds
    /// `limit`. The source is not interrupted.
    pub fn timeout(self, limit: Duration) -> Self {
        Self::from_node(EffectNode::Timeout(Rc::new(self.into_node()), limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_construction_has_no_side_effects() {
        let runs = Rc::new(Cell::new(0));
        let r = Rc::clone(&runs);
        let effect = Effect::<u32, ()>::sync(move || {
            r.set(r.get() + 1);
            1
        })
        .map(|n| n + 1)
        .flat_map(|n| Effect::succeed(n * 2));

        assert_eq!(effect.tag(), EffectTag::Bind);
        assert_eq!(runs.get(), 0);
    }

    #[test]
    fn test_tags_cover_every_variant() {
        let mut names: Vec<_> = EffectTag::ALL.iter().map(|t| t.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), EffectTag::ALL.len());
    }

    #[test]
    fn test_constructor_tags() {
        assert_eq!(Effect::<i32, ()>::succeed(1).tag(), EffectTag::Pure);
        assert_eq!(Effect::<i32, ()>::fail(()).tag(), EffectTag::Fail);
        assert_eq!(Effect::<(), ()>::sleep_for(Duration::from_millis(1)).tag(), EffectTag::Sleep);
        assert_eq!(Effect::<i32, ()>::never().tag(), EffectTag::Async);
        assert_eq!(Effect::<i32, ()>::race(vec![]).tag(), EffectTag::Race);
        assert_eq!(Effect::<i32, ()>::all(vec![]).tag(), EffectTag::Parallel);
        assert_eq!(
            Effect::<i32, ()>::succeed(1).retry_with(Schedule::forever()).tag(),
            EffectTag::Retry
        );
        assert_eq!(
            Effect::<i32, ()>::succeed(1).provide(Layer::empty()).tag(),
            EffectTag::Provide
        );
        assert_eq!(
            Effect::<i32, ()>::succeed(1).timeout(Duration::from_secs(1)).tag(),
            EffectTag::Timeout
        );
        assert_eq!(
            Effect::<Rc<String>, ()>::service(Tag::new()).tag(),
            EffectTag::Bind
        );
    }

    #[test]
    fn test_dropping_deep_chain_does_not_overflow() {
        let mut effect = Effect::<u64, ()>::succeed(0);
        for _ in 0..200_000 {
            effect = effect.map(|n| n + 1);
        }
        drop(effect);
    }

    #[test]
    fn test_dropping_deeply_nested_branches_does_not_overflow() {
        let mut effect = Effect::<u64, ()>::succeed(0);
        for _ in 0..100_000 {
            effect = Effect::race(vec![Effect::all(vec![effect]).map(|v| v[0])]);
        }
        drop(effect);
    }

    #[test]
    fn test_async_slot_first_settlement_wins() {
        let slot: AsyncSlot<&str> = AsyncSlot::new();
        let resume: Resume<u8, &str> = Resume {
            slot: slot.clone(),
            _value: PhantomData,
        };

        assert!(resume.succeed(1));
        assert!(!resume.fail("late"));
        assert!(slot.is_settled());

        let outcome = slot.take().unwrap().unwrap();
        assert_eq!(downcast_value::<u8>(outcome), Ok(1));
    }

    #[test]
    fn test_downcast_value_reports_expected_type() {
        let err = downcast_value::<String>(Box::new(5u8)).unwrap_err();
        assert_eq!(
            err,
            Defect::TypeMismatch {
                expected: "alloc::string::String"
            }
        );
    }
}
