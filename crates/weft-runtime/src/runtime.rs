//! The trampoline interpreter.
//!
//! [`Runtime::interpret`] drives a single loop over a [`RuntimeState`]:
//!
//! 1. An effect in hand is dispatched to its handler, which returns the
//!    next state.
//! 2. A value in hand is handed to the top frame of the stack; with an
//!    empty stack the interpretation is complete.
//! 3. A failure in hand unwinds the stack until a frame recovers it; with
//!    an empty stack the interpretation has failed.
//!
//! No step recurses into a sub-effect, so the native stack depth of a run
//! does not depend on how deeply its effect is composed.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, trace, warn};
use weft_effects::{
    downcast_value, Cause, Context, Decision, Defect, Effect, EffectNode, Scope, Step, Value,
};

use crate::clock::{elapsed_since, Clock, SystemClock};
use crate::config::RuntimeConfig;
use crate::exit::Exit;
use crate::handlers;
use crate::registry::HandlerRegistry;
use crate::stack::Frame;
use crate::state::{Control, RuntimeState, StepBudget};
use crate::strategy::{ExecutionStrategy, SyncStrategy};

struct RuntimeInner<E> {
    config: RuntimeConfig,
    clock: Arc<dyn Clock>,
    strategy: Rc<dyn ExecutionStrategy<E>>,
    registry: HandlerRegistry<E>,
}

/// Interprets effects.
///
/// Cloning a runtime is cheap and yields a handle on the same clock,
/// strategy and registry.
pub struct Runtime<E> {
    inner: Rc<RuntimeInner<E>>,
}

impl<E> Clone for Runtime<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E: Clone + 'static> Default for Runtime<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("clock", &self.inner.clock)
            .field("strategy", &self.inner.strategy)
            .finish()
    }
}

impl<E: Clone + 'static> Runtime<E> {
    /// System clock, synchronous strategy, standard handlers.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> RuntimeBuilder<E> {
        RuntimeBuilder::new()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn clock(&self) -> &dyn Clock {
        self.inner.clock.as_ref()
    }

    pub fn strategy(&self) -> &dyn ExecutionStrategy<E> {
        self.inner.strategy.as_ref()
    }

    pub fn registry(&self) -> &HandlerRegistry<E> {
        &self.inner.registry
    }

    // ------------------------------------------------------------------------
    // Entry points
    // ------------------------------------------------------------------------

    /// Run under an empty context.
    pub fn run<A: 'static>(&self, effect: &Effect<A, E>) -> Result<A, Cause<E>> {
        self.run_with(effect, Context::empty())
    }

    /// Run under `context`. The effect itself is left untouched and can be
    /// run again.
    pub fn run_with<A: 'static>(&self, effect: &Effect<A, E>, context: Context) -> Result<A, Cause<E>> {
        let span = tracing::debug_span!("run", runtime = %self.inner.config.name);
        let _enter = span.enter();
        debug!(effect = %effect.tag(), "run started");

        let outcome = self
            .interpret(effect.node().clone(), context)
            .and_then(|value| downcast_value::<A>(value).map_err(Cause::Defect));
        match &outcome {
            Ok(_) => debug!("run succeeded"),
            Err(cause) => debug!(defect = cause.is_defect(), "run failed"),
        }
        outcome
    }

    /// Like [`Runtime::run`], but the outcome is an [`Exit`] value.
    pub fn run_exit<A: 'static>(&self, effect: &Effect<A, E>) -> Exit<A, E> {
        Exit::from(self.run(effect))
    }

    pub fn run_exit_with<A: 'static>(&self, effect: &Effect<A, E>, context: Context) -> Exit<A, E> {
        Exit::from(self.run_with(effect, context))
    }

    /// Interpret an erased node to completion in a fresh root scope.
    ///
    /// The root scope is closed before returning; finalizer failures are
    /// merged into the outcome.
    pub fn interpret(&self, node: EffectNode<E>, context: Context) -> Result<Value, Cause<E>> {
        self.interpret_counted(node, context, Rc::default())
    }

    /// Like [`Runtime::interpret`], counting steps against an existing
    /// budget.
    pub fn interpret_counted(
        &self,
        node: EffectNode<E>,
        context: Context,
        steps: Rc<StepBudget>,
    ) -> Result<Value, Cause<E>> {
        let root = Scope::new();
        let outcome =
            self.drive(RuntimeState::new(node, context, root.clone()).with_steps(steps));
        match (outcome, root.close()) {
            (outcome, Ok(())) => outcome,
            (Ok(_), Err(finalizers)) => Err(finalizers),
            (Err(cause), Err(finalizers)) => Err(cause.combine(finalizers)),
        }
    }

    // ------------------------------------------------------------------------
    // Trampoline
    // ------------------------------------------------------------------------

    fn drive(&self, mut state: RuntimeState<E>) -> Result<Value, Cause<E>> {
        let step_limit = self.inner.config.step_limit;
        let trace_steps = self.inner.config.trace_steps;
        let budget = Rc::clone(&state.steps);

        loop {
            let steps = budget.tick();
            let exceeded = step_limit.filter(|limit| steps > *limit && !budget.is_aborting());
            if let Some(limit) = exceeded {
                warn!(steps, limit, "step limit exceeded");
                return self.abort(state, Cause::Defect(Defect::StepLimitExceeded(limit)));
            }

            match state.take_control() {
                Control::Effect(node) => {
                    let tag = node.tag();
                    if trace_steps {
                        trace!(step = steps, effect = %tag, depth = state.stack.len(), "dispatch");
                    }
                    state = self.inner.registry.dispatch(node, state, self);
                    if state.value.is_pending() {
                        state = state.fail(Cause::Defect(Defect::HandlerStalled(tag.name())));
                    }
                }
                Control::Value(value) => match state.stack.pop() {
                    Some(frame) => state = self.resume(frame, value, state),
                    None => return Ok(value),
                },
                Control::Failure(cause) => state = self.unwind(cause, state)?,
                Control::Pending => {
                    state = state.fail(Cause::Defect(Defect::HandlerStalled("pending")));
                }
            }
        }
    }

    /// Hand a value to `frame`.
    fn resume(&self, frame: Frame<E>, value: Value, state: RuntimeState<E>) -> RuntimeState<E> {
        match frame {
            Frame::Continue(k) => match Defect::guard(move || k(value)) {
                Ok(Step::Value(next)) => state.succeed(next),
                Ok(Step::Effect(node)) => state.continue_with(node),
                Ok(Step::Failure(cause)) => state.fail(cause),
                Err(defect) => state.fail(Cause::Defect(defect)),
            },
            Frame::Catch { .. } | Frame::Retry { .. } => state.succeed(value),
            Frame::Parallel {
                branches,
                mut collected,
                collect,
            } => {
                collected.push(value);
                handlers::next_parallel_branch(branches, collected, collect, state, self)
            }
            Frame::Race { .. } => state.succeed(value),
            Frame::RestoreContext(parent) => state.with_context(parent).succeed(value),
            Frame::CloseScope { scope, parent } => {
                let state = state.with_scope(parent);
                match close_scope(&scope) {
                    Ok(()) => state.succeed(value),
                    Err(finalizers) => state.fail(finalizers),
                }
            }
            Frame::Timeout { limit, started_at } => {
                let elapsed = elapsed_since(self.clock(), started_at);
                if elapsed > limit {
                    debug!(?elapsed, ?limit, "timed out");
                    state.fail(Cause::Timeout(limit))
                } else {
                    state.succeed(value)
                }
            }
        }
    }

    /// Pop frames until one recovers `cause`. Scopes met on the way are
    /// closed; if no frame recovers, the final cause is returned.
    fn unwind(&self, mut cause: Cause<E>, mut state: RuntimeState<E>) -> Result<RuntimeState<E>, Cause<E>> {
        while let Some(frame) = state.stack.pop() {
            match frame {
                Frame::Continue(_) | Frame::Timeout { .. } | Frame::Parallel { .. } => {}
                Frame::Race {
                    branches,
                    mut failures,
                } => {
                    failures.push(cause);
                    return Ok(handlers::next_race_branch(branches, failures, state, self));
                }
                Frame::RestoreContext(parent) => state.context = parent,
                Frame::CloseScope { scope, parent } => {
                    state.scope = parent;
                    if let Err(finalizers) = close_scope(&scope) {
                        cause = cause.combine(finalizers);
                    }
                }
                Frame::Catch { predicate, handler } => {
                    match Defect::guard(|| predicate(&cause)) {
                        Ok(true) => {
                            return Ok(match Defect::guard(move || handler(cause)) {
                                Ok(node) => state.continue_with(node),
                                Err(defect) => state.fail(Cause::Defect(defect)),
                            });
                        }
                        Ok(false) => {}
                        Err(defect) => cause = cause.combine(Cause::Defect(defect)),
                    }
                }
                Frame::Retry {
                    source,
                    schedule,
                    mut rng,
                    attempt,
                    started_at,
                } => {
                    let Cause::Fail(error) = &cause else {
                        continue;
                    };
                    let elapsed = elapsed_since(self.clock(), started_at);
                    let decision =
                        Defect::guard(|| schedule.decide_with(&mut rng, attempt, elapsed, error));
                    match decision {
                        Ok(Decision::Continue(delay)) => {
                            debug!(attempt = attempt + 1, ?delay, ?elapsed, "retrying");
                            self.strategy().sleep(self.clock(), delay);
                            let next = EffectNode::clone(&source);
                            return Ok(state
                                .push(Frame::Retry {
                                    source,
                                    schedule,
                                    rng,
                                    attempt: attempt + 1,
                                    started_at,
                                })
                                .continue_with(next));
                        }
                        Ok(Decision::Stop) => {
                            debug!(attempts = attempt + 1, ?elapsed, "retries exhausted");
                        }
                        Err(defect) => cause = cause.combine(Cause::Defect(defect)),
                    }
                }
            }
        }
        Err(cause)
    }

    /// Fail without giving any frame a chance to recover, but still close
    /// every open scope. Releases run here are not held to the step limit.
    fn abort(&self, mut state: RuntimeState<E>, mut cause: Cause<E>) -> Result<Value, Cause<E>> {
        state.steps.enter_abort();
        while let Some(frame) = state.stack.pop() {
            if let Frame::CloseScope { scope, .. } = frame {
                if let Err(finalizers) = close_scope(&scope) {
                    cause = cause.combine(finalizers);
                }
            }
        }
        state.steps.leave_abort();
        Err(cause)
    }
}

fn close_scope<E>(scope: &Scope<E>) -> Result<(), Cause<E>> {
    debug!(scope = scope.id().as_u64(), pending = scope.pending(), "closing scope");
    scope.close()
}

// ============================================================================
// Builder
// ============================================================================

/// Assembles a [`Runtime`].
pub struct RuntimeBuilder<E> {
    config: RuntimeConfig,
    clock: Option<Arc<dyn Clock>>,
    strategy: Option<Rc<dyn ExecutionStrategy<E>>>,
    registry: Option<HandlerRegistry<E>>,
}

impl<E: Clone + 'static> RuntimeBuilder<E> {
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            clock: None,
            strategy: None,
            registry: None,
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn strategy(mut self, strategy: impl ExecutionStrategy<E> + 'static) -> Self {
        self.strategy = Some(Rc::new(strategy));
        self
    }

    pub fn registry(mut self, registry: HandlerRegistry<E>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Runtime<E> {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));
        let strategy = self
            .strategy
            .unwrap_or_else(|| Rc::new(SyncStrategy));
        Runtime {
            inner: Rc::new(RuntimeInner {
                config: self.config,
                clock,
                strategy,
                registry: self.registry.unwrap_or_else(HandlerRegistry::standard),
            }),
        }
    }
}

impl<E: Clone + 'static> Default for RuntimeBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}
