//! Execution strategies.
//!
//! The interpreter core is single-threaded and cooperative. The one place
//! where an alternative scheduling policy can plug in is the
//! [`ExecutionStrategy`]: `Parallel` and `Race` branches are started with
//! [`ExecutionStrategy::fork`], `Async` completion is awaited with
//! [`ExecutionStrategy::await_async`], and every delay goes through
//! [`ExecutionStrategy::sleep`].
//!
//! A fork left [`ForkState::Deferred`] is run by the trampoline itself, on
//! the same continuation stack and in the same scope as the effect that
//! forked it. Only forks a strategy runs elsewhere come back through
//! [`ExecutionStrategy::join`].
//!
//! [`SyncStrategy`] is the reference implementation: every fork is
//! deferred, so branches run one after another in input order and a
//! branch that is never reached never runs.

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use weft_effects::{AsyncSlot, Cause, Context, Defect, EffectNode, Value};

use crate::clock::Clock;

/// Unique identifier of a forked branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ForkId(u64);

impl ForkId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ForkId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// A branch to run: an effect and the context it sees.
pub struct Job<E> {
    pub node: EffectNode<E>,
    pub context: Context,
}

impl<E> fmt::Debug for Job<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("node", &self.node.tag())
            .field("context", &self.context)
            .finish()
    }
}

/// Where a forked branch stands.
pub enum ForkState<E> {
    /// Not started yet.
    Deferred(Job<E>),
    /// Already finished.
    Settled(Result<Value, Cause<E>>),
    /// Owned by some other strategy; opaque to this one.
    External(Box<dyn Any>),
}

/// Handle on a forked branch, consumed by `join`.
pub struct Fork<E> {
    id: ForkId,
    state: ForkState<E>,
}

impl<E> Fork<E> {
    pub fn deferred(job: Job<E>) -> Self {
        Self::with_state(ForkState::Deferred(job))
    }

    pub fn settled(outcome: Result<Value, Cause<E>>) -> Self {
        Self::with_state(ForkState::Settled(outcome))
    }

    pub fn external(handle: Box<dyn Any>) -> Self {
        Self::with_state(ForkState::External(handle))
    }

    fn with_state(state: ForkState<E>) -> Self {
        Self {
            id: ForkId::next(),
            state,
        }
    }

    pub fn id(&self) -> ForkId {
        self.id
    }

    pub fn into_state(self) -> ForkState<E> {
        self.state
    }
}

impl<E> fmt::Debug for Fork<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            ForkState::Deferred(_) => "deferred",
            ForkState::Settled(_) => "settled",
            ForkState::External(_) => "external",
        };
        write!(f, "Fork({}, {})", self.id.as_u64(), state)
    }
}

/// The scheduling seam of the interpreter.
pub trait ExecutionStrategy<E>: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Start a branch. A deferred fork is run inline by the trampoline
    /// when its turn comes.
    fn fork(&self, job: Job<E>) -> Fork<E>;

    /// Wait for a branch this strategy runs outside the trampoline.
    fn join(&self, id: ForkId, _handle: Box<dyn Any>) -> Result<Value, Cause<E>> {
        Err(Cause::Defect(Defect::ForeignFork(id.as_u64(), self.name())))
    }

    /// Wait for an async registration to settle.
    fn await_async(&self, slot: &AsyncSlot<E>) -> Result<Value, Cause<E>>;

    fn sleep(&self, clock: &dyn Clock, duration: Duration) {
        clock.sleep(duration);
    }
}

/// Runs everything on the calling thread, in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncStrategy;

impl<E: Clone + 'static> ExecutionStrategy<E> for SyncStrategy {
    fn name(&self) -> &'static str {
        "sync"
    }

    fn fork(&self, job: Job<E>) -> Fork<E> {
        Fork::deferred(job)
    }

    /// There is no event loop to yield to, so an unsettled slot can never
    /// settle. Fail instead of hanging.
    fn await_async(&self, slot: &AsyncSlot<E>) -> Result<Value, Cause<E>> {
        slot.take()
            .unwrap_or(Err(Cause::Defect(Defect::AsyncNeverSettled)))
    }
}

// ============================================================================
// Branch queues
// ============================================================================

/// What to do with the next branch of a `Parallel` or `Race`.
pub enum BranchStep<E> {
    /// Interpret the job on the current stack.
    Run(Job<E>),
    /// The outcome is already known.
    Settled(Result<Value, Cause<E>>),
}

/// Forked branches waiting for their turn, in input order.
pub struct Branches<E> {
    pending: VecDeque<Fork<E>>,
}

impl<E> Branches<E> {
    /// Fork every node under `context`.
    pub fn fork_all(
        strategy: &dyn ExecutionStrategy<E>,
        nodes: Vec<EffectNode<E>>,
        context: &Context,
    ) -> Self {
        let pending = nodes
            .into_iter()
            .map(|node| {
                strategy.fork(Job {
                    node,
                    context: context.clone(),
                })
            })
            .collect();
        Self { pending }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Take the next branch. External forks are joined here.
    pub fn next(&mut self, strategy: &dyn ExecutionStrategy<E>) -> Option<BranchStep<E>> {
        let fork = self.pending.pop_front()?;
        let id = fork.id();
        Some(match fork.into_state() {
            ForkState::Deferred(job) => {
                tracing::trace!(fork = id.as_u64(), "running deferred branch");
                BranchStep::Run(job)
            }
            ForkState::Settled(outcome) => BranchStep::Settled(outcome),
            ForkState::External(handle) => BranchStep::Settled(strategy.join(id, handle)),
        })
    }
}

impl<E> fmt::Debug for Branches<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.pending.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::rc::Rc;
    use weft_effects::downcast_value;

    fn job(n: u8) -> Job<()> {
        Job {
            node: EffectNode::Pure(Rc::new(move || -> Value { Box::new(n) })),
            context: Context::empty(),
        }
    }

    /// Pretends to run every branch somewhere else.
    #[derive(Debug)]
    struct Elsewhere;

    impl ExecutionStrategy<()> for Elsewhere {
        fn name(&self) -> &'static str {
            "elsewhere"
        }

        fn fork(&self, _job: Job<()>) -> Fork<()> {
            Fork::external(Box::new(7u8))
        }

        fn join(&self, _id: ForkId, handle: Box<dyn Any>) -> Result<Value, Cause<()>> {
            Ok(handle)
        }

        fn await_async(&self, slot: &AsyncSlot<()>) -> Result<Value, Cause<()>> {
            slot.take().unwrap_or(Err(Cause::Defect(Defect::AsyncNeverSettled)))
        }
    }

    #[test]
    fn test_fork_is_deferred() {
        let fork = ExecutionStrategy::<()>::fork(&SyncStrategy, job(1));
        assert!(matches!(fork.into_state(), ForkState::Deferred(_)));
    }

    #[test]
    fn test_branches_come_out_in_input_order() {
        let nodes = vec![job(1).node, job(2).node, job(3).node];
        let mut branches = Branches::fork_all(&SyncStrategy, nodes, &Context::empty());
        assert_eq!(branches.len(), 3);

        let mut seen = Vec::new();
        while let Some(step) = branches.next(&SyncStrategy) {
            match step {
                BranchStep::Run(job) => {
                    let EffectNode::Pure(produce) = job.node else {
                        panic!("unexpected node");
                    };
                    seen.push(downcast_value::<u8>(produce()).unwrap());
                }
                BranchStep::Settled(_) => panic!("sync forks are deferred"),
            }
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert!(branches.is_empty());
    }

    #[test]
    fn test_external_forks_are_joined_by_their_strategy() {
        let mut branches = Branches::fork_all(&Elsewhere, vec![job(1).node], &Context::empty());
        match branches.next(&Elsewhere) {
            Some(BranchStep::Settled(Ok(value))) => assert_eq!(downcast_value::<u8>(value), Ok(7)),
            other => panic!("unexpected step: {}", other.is_some()),
        }
    }

    #[test]
    fn test_sync_join_rejects_foreign_fork() {
        let fork = Fork::<()>::external(Box::new("elsewhere"));
        let id = fork.id();
        let err = ExecutionStrategy::<()>::join(&SyncStrategy, id, Box::new(())).unwrap_err();
        assert_eq!(err, Cause::Defect(Defect::ForeignFork(id.as_u64(), "sync")));
    }

    #[test]
    fn test_await_unsettled_slot_fails_fast() {
        let slot: AsyncSlot<()> = AsyncSlot::new();
        let err = SyncStrategy.await_async(&slot).unwrap_err();
        assert_eq!(err, Cause::Defect(Defect::AsyncNeverSettled));
    }

    #[test]
    fn test_await_settled_slot() {
        let slot: AsyncSlot<&str> = AsyncSlot::new();
        slot.settle(Err(Cause::fail("rejected")));
        assert_eq!(SyncStrategy.await_async(&slot).unwrap_err(), Cause::fail("rejected"));
    }
}
