//! The reference handler set, one function per effect variant.
//!
//! Each handler receives the node it was dispatched for and the current
//! state, and returns the next state. Handlers never interpret the
//! sub-effects they are given; they push a frame and hand the sub-effect
//! back to the trampoline. `Parallel` and `Race` branches are no exception:
//! each one runs on the same stack, in the same scope, above a frame that
//! starts the next. Only finalizers are interpreted on their own, when
//! their scope closes.
//!
//! User code is always called under [`Defect::guard`], so a panicking
//! closure becomes a `Defect::Panic` on the ordinary failure channel.

use std::rc::Rc;

use weft_effects::{AsyncSlot, Cause, ContextError, Defect, EffectNode, EffectTag, Scope, Value};

use crate::registry::Handler;
use crate::runtime::Runtime;
use crate::stack::Frame;
use crate::state::RuntimeState;
use crate::strategy::{BranchStep, Branches};

/// Every reference handler, keyed by the tag it serves.
pub fn standard_handlers<E: Clone + 'static>() -> Vec<(EffectTag, Handler<E>)> {
    vec![
        (EffectTag::Pure, handle_pure::<E> as Handler<E>),
        (EffectTag::Fail, handle_fail::<E>),
        (EffectTag::Suspend, handle_suspend::<E>),
        (EffectTag::Bind, handle_bind::<E>),
        (EffectTag::Service, handle_service::<E>),
        (EffectTag::Provide, handle_provide::<E>),
        (EffectTag::Sleep, handle_sleep::<E>),
        (EffectTag::Async, handle_async::<E>),
        (EffectTag::Catch, handle_catch::<E>),
        (EffectTag::Parallel, handle_parallel::<E>),
        (EffectTag::Race, handle_race::<E>),
        (EffectTag::Retry, handle_retry::<E>),
        (EffectTag::Scoped, handle_scoped::<E>),
        (EffectTag::Finalizer, handle_finalizer::<E>),
        (EffectTag::Timeout, handle_timeout::<E>),
    ]
}

fn misrouted<E>(expected: EffectTag, node: EffectNode<E>, state: RuntimeState<E>) -> RuntimeState<E> {
    state.fail(Cause::Defect(Defect::Misrouted {
        expected: expected.name(),
        found: node.tag().name(),
    }))
}

/// Continue with the node a guarded user closure built, or fail with the
/// defect it raised.
fn continue_guarded<E>(state: RuntimeState<E>, built: Result<EffectNode<E>, Defect>) -> RuntimeState<E> {
    match built {
        Ok(node) => state.continue_with(node),
        Err(defect) => state.fail(Cause::Defect(defect)),
    }
}

fn settle<E>(state: RuntimeState<E>, outcome: Result<Value, Cause<E>>) -> RuntimeState<E> {
    match outcome {
        Ok(value) => state.succeed(value),
        Err(cause) => state.fail(cause),
    }
}

// ============================================================================
// Values and sequencing
// ============================================================================

pub fn handle_pure<E: Clone + 'static>(
    node: EffectNode<E>,
    state: RuntimeState<E>,
    _runtime: &Runtime<E>,
) -> RuntimeState<E> {
    let produce = match node {
        EffectNode::Pure(produce) => produce,
        other => return misrouted(EffectTag::Pure, other, state),
    };
    match Defect::guard(|| produce()) {
        Ok(value) => state.succeed(value),
        Err(defect) => state.fail(Cause::Defect(defect)),
    }
}

pub fn handle_fail<E: Clone + 'static>(
    node: EffectNode<E>,
    state: RuntimeState<E>,
    _runtime: &Runtime<E>,
) -> RuntimeState<E> {
    match node {
        EffectNode::Fail(cause) => state.fail(cause),
        other => misrouted(EffectTag::Fail, other, state),
    }
}

/// The thunk runs on every visit; nothing is cached between runs.
pub fn handle_suspend<E: Clone + 'static>(
    node: EffectNode<E>,
    state: RuntimeState<E>,
    _runtime: &Runtime<E>,
) -> RuntimeState<E> {
    let thunk = match node {
        EffectNode::Suspend(thunk) => thunk,
        other => return misrouted(EffectTag::Suspend, other, state),
    };
    continue_guarded(state, Defect::guard(|| thunk()))
}

pub fn handle_bind<E: Clone + 'static>(
    node: EffectNode<E>,
    state: RuntimeState<E>,
    _runtime: &Runtime<E>,
) -> RuntimeState<E> {
    let (source, k) = match node {
        EffectNode::Bind(source, k) => (source, k),
        other => return misrouted(EffectTag::Bind, other, state),
    };
    state
        .push(Frame::Continue(k))
        .continue_with(EffectNode::clone(&source))
}

// ============================================================================
// Environment
// ============================================================================

pub fn handle_service<E: Clone + 'static>(
    node: EffectNode<E>,
    state: RuntimeState<E>,
    _runtime: &Runtime<E>,
) -> RuntimeState<E> {
    let key = match node {
        EffectNode::Service(key) => key,
        other => return misrouted(EffectTag::Service, other, state),
    };
    match state.context.get_erased(&key) {
        Some(service) => state.succeed(Box::new(service)),
        None => {
            tracing::debug!(service = %key, "service not found");
            state.fail(Cause::ServiceNotFound(key))
        }
    }
}

/// Build the child context and restore the parent once `inner` settles,
/// whichever way it settles.
pub fn handle_provide<E: Clone + 'static>(
    node: EffectNode<E>,
    state: RuntimeState<E>,
    _runtime: &Runtime<E>,
) -> RuntimeState<E> {
    let (layer, inner) = match node {
        EffectNode::Provide(layer, inner) => (layer, inner),
        other => return misrouted(EffectTag::Provide, other, state),
    };
    match Defect::guard(|| layer.apply_to(&state.context)) {
        Ok(Ok(child)) => {
            tracing::debug!(services = child.len(), "layer applied");
            let parent = state.context.clone();
            state
                .push(Frame::RestoreContext(parent))
                .with_context(child)
                .continue_with(EffectNode::clone(&inner))
        }
        Ok(Err(ContextError::ServiceNotFound(key))) => state.fail(Cause::ServiceNotFound(key)),
        Err(defect) => state.fail(Cause::Defect(defect)),
    }
}

// ============================================================================
// Time and external completion
// ============================================================================

pub fn handle_sleep<E: Clone + 'static>(
    node: EffectNode<E>,
    state: RuntimeState<E>,
    runtime: &Runtime<E>,
) -> RuntimeState<E> {
    let duration = match node {
        EffectNode::Sleep(duration) => duration,
        other => return misrouted(EffectTag::Sleep, other, state),
    };
    runtime.strategy().sleep(runtime.clock(), duration);
    state.succeed_unit()
}

pub fn handle_async<E: Clone + 'static>(
    node: EffectNode<E>,
    state: RuntimeState<E>,
    runtime: &Runtime<E>,
) -> RuntimeState<E> {
    let start = match node {
        EffectNode::Async(start) => start,
        other => return misrouted(EffectTag::Async, other, state),
    };
    let slot = AsyncSlot::new();
    let registration = slot.clone();
    if let Err(defect) = Defect::guard(move || start(registration)) {
        // A registration that panics after settling still counts as failed.
        return state.fail(Cause::Defect(defect));
    }
    let outcome = runtime.strategy().await_async(&slot);
    settle(state, outcome)
}

pub fn handle_timeout<E: Clone + 'static>(
    node: EffectNode<E>,
    state: RuntimeState<E>,
    runtime: &Runtime<E>,
) -> RuntimeState<E> {
    let (source, limit) = match node {
        EffectNode::Timeout(source, limit) => (source, limit),
        other => return misrouted(EffectTag::Timeout, other, state),
    };
    let started_at = runtime.clock().nano_time();
    state
        .push(Frame::Timeout { limit, started_at })
        .continue_with(EffectNode::clone(&source))
}

// ============================================================================
// Failure handling
// ============================================================================

pub fn handle_catch<E: Clone + 'static>(
    node: EffectNode<E>,
    state: RuntimeState<E>,
    _runtime: &Runtime<E>,
) -> RuntimeState<E> {
    match node {
        EffectNode::Catch {
            source,
            predicate,
            handler,
        } => state
            .push(Frame::Catch { predicate, handler })
            .continue_with(EffectNode::clone(&source)),
        other => misrouted(EffectTag::Catch, other, state),
    }
}

/// Open a retry session: remember when it started and run the source.
pub fn handle_retry<E: Clone + 'static>(
    node: EffectNode<E>,
    state: RuntimeState<E>,
    runtime: &Runtime<E>,
) -> RuntimeState<E> {
    let (source, schedule) = match node {
        EffectNode::Retry(source, schedule) => (source, schedule),
        other => return misrouted(EffectTag::Retry, other, state),
    };
    let next = EffectNode::clone(&source);
    let rng = schedule.jitter_rng();
    state
        .push(Frame::Retry {
            source,
            schedule,
            rng,
            attempt: 0,
            started_at: runtime.clock().nano_time(),
        })
        .continue_with(next)
}

// ============================================================================
// Concurrency
// ============================================================================

/// Fork every branch, then run them in input order. The first failure
/// wins; branches after it never start.
pub fn handle_parallel<E: Clone + 'static>(
    node: EffectNode<E>,
    state: RuntimeState<E>,
    runtime: &Runtime<E>,
) -> RuntimeState<E> {
    let (branches, collect) = match node {
        EffectNode::Parallel { branches, collect } => (branches, collect),
        other => return misrouted(EffectTag::Parallel, other, state),
    };
    let collected = Vec::with_capacity(branches.len());
    let branches = Branches::fork_all(runtime.strategy(), branches, &state.context);
    next_parallel_branch(branches, collected, collect, state, runtime)
}

/// Run branches in input order until one succeeds. If none does, fail
/// with every branch's cause, in input order.
pub fn handle_race<E: Clone + 'static>(
    node: EffectNode<E>,
    state: RuntimeState<E>,
    runtime: &Runtime<E>,
) -> RuntimeState<E> {
    let branches = match node {
        EffectNode::Race(branches) => branches,
        other => return misrouted(EffectTag::Race, other, state),
    };
    if branches.is_empty() {
        return state.fail(Cause::Defect(Defect::EmptyRace));
    }
    let failures = Vec::with_capacity(branches.len());
    let branches = Branches::fork_all(runtime.strategy(), branches, &state.context);
    next_race_branch(branches, failures, state, runtime)
}

/// Start the next `Parallel` branch on top of a frame that resumes here,
/// or collect the values once every branch has settled.
pub(crate) fn next_parallel_branch<E: Clone + 'static>(
    mut branches: Branches<E>,
    mut collected: Vec<Value>,
    collect: Rc<dyn Fn(Vec<Value>) -> Result<Value, Defect>>,
    state: RuntimeState<E>,
    runtime: &Runtime<E>,
) -> RuntimeState<E> {
    while let Some(step) = branches.next(runtime.strategy()) {
        match step {
            BranchStep::Run(job) => {
                return state
                    .push(Frame::Parallel {
                        branches,
                        collected,
                        collect,
                    })
                    .with_context(job.context)
                    .continue_with(job.node);
            }
            BranchStep::Settled(Ok(value)) => collected.push(value),
            BranchStep::Settled(Err(cause)) => return state.fail(cause),
        }
    }
    match Defect::guard(move || collect(collected)) {
        Ok(Ok(value)) => state.succeed(value),
        Ok(Err(defect)) | Err(defect) => state.fail(Cause::Defect(defect)),
    }
}

/// Start the next `Race` branch on top of a frame that resumes here, or
/// fail with every recorded cause once none is left.
pub(crate) fn next_race_branch<E: Clone + 'static>(
    mut branches: Branches<E>,
    mut failures: Vec<Cause<E>>,
    state: RuntimeState<E>,
    runtime: &Runtime<E>,
) -> RuntimeState<E> {
    while let Some(step) = branches.next(runtime.strategy()) {
        match step {
            BranchStep::Run(job) => {
                return state
                    .push(Frame::Race { branches, failures })
                    .with_context(job.context)
                    .continue_with(job.node);
            }
            BranchStep::Settled(Ok(value)) => return state.succeed(value),
            BranchStep::Settled(Err(cause)) => failures.push(cause),
        }
    }
    state.fail(Cause::Composite(failures))
}

// ============================================================================
// Resources
// ============================================================================

/// Open a child scope. The `CloseScope` frame closes it and reinstates
/// the parent on every exit path.
pub fn handle_scoped<E: Clone + 'static>(
    node: EffectNode<E>,
    state: RuntimeState<E>,
    _runtime: &Runtime<E>,
) -> RuntimeState<E> {
    let body = match node {
        EffectNode::Scoped(body) => body,
        other => return misrouted(EffectTag::Scoped, other, state),
    };
    let child = Scope::new();
    tracing::debug!(scope = child.id().as_u64(), parent = state.scope.id().as_u64(), "scope opened");
    let parent = state.scope.clone();
    let handle = child.clone();
    let state = state
        .push(Frame::CloseScope {
            scope: child.clone(),
            parent,
        })
        .with_scope(child);
    continue_guarded(state, Defect::guard(move || body(handle)))
}

/// Register the release effect on the active scope. It is interpreted
/// under the context that was active at registration, counting its steps
/// against the same budget as the run that registered it.
pub fn handle_finalizer<E: Clone + 'static>(
    node: EffectNode<E>,
    state: RuntimeState<E>,
    runtime: &Runtime<E>,
) -> RuntimeState<E> {
    let release = match node {
        EffectNode::Finalizer(release) => release,
        other => return misrouted(EffectTag::Finalizer, other, state),
    };
    let runtime = runtime.clone();
    let context = state.context.clone();
    let steps = Rc::clone(&state.steps);
    let registered = state.scope.add_finalizer(move || {
        let node = Defect::guard(|| release())?;
        runtime.interpret_counted(node, context, steps).map(|_| ())
    });
    match registered {
        Ok(()) => state.succeed_unit(),
        Err(defect) => state.fail(Cause::Defect(defect)),
    }
}

