//! The explicit continuation stack.
//!
//! The trampoline never recurses into sub-effects. Whatever must happen
//! after a sub-effect settles is pushed here as a [`Frame`] and popped by
//! the driving loop, so composition depth costs heap, not native stack.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use weft_effects::{Cause, Context, Continuation, Defect, EffectNode, JitterRng, Schedule, Scope, Value};

use crate::strategy::Branches;

/// Pending work waiting on the value or failure of the effect below it.
pub enum Frame<E> {
    /// Feed a value to a `Bind` continuation. Skipped on failure.
    Continue(Continuation<E>),

    /// Recover from failures the predicate accepts. Skipped on success.
    Catch {
        predicate: Rc<dyn Fn(&Cause<E>) -> bool>,
        handler: Rc<dyn Fn(Cause<E>) -> EffectNode<E>>,
    },

    /// Reinstate the context that was active outside a `Provide`.
    RestoreContext(Context),

    /// Close a child scope and reinstate its parent.
    CloseScope { scope: Scope<E>, parent: Scope<E> },

    /// A retry session in progress.
    Retry {
        source: Rc<EffectNode<E>>,
        schedule: Schedule<E>,
        /// Jitter source of this session only.
        rng: JitterRng,
        /// Retries already made.
        attempt: u32,
        /// `nano_time` at the first attempt.
        started_at: u64,
    },

    /// Compare observed time against a bound once the source settles.
    Timeout { limit: Duration, started_at: u64 },

    /// Collect the value of the branch below, then start the next one.
    /// A failing branch skips the rest.
    Parallel {
        branches: Branches<E>,
        collected: Vec<Value>,
        collect: Rc<dyn Fn(Vec<Value>) -> Result<Value, Defect>>,
    },

    /// Settle with the first branch that succeeds. A failing branch is
    /// recorded and the next one starts.
    Race {
        branches: Branches<E>,
        failures: Vec<Cause<E>>,
    },
}

impl<E> Frame<E> {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Continue(_) => "continue",
            Frame::Catch { .. } => "catch",
            Frame::RestoreContext(_) => "restore-context",
            Frame::CloseScope { .. } => "close-scope",
            Frame::Retry { .. } => "retry",
            Frame::Timeout { .. } => "timeout",
            Frame::Parallel { .. } => "parallel",
            Frame::Race { .. } => "race",
        }
    }
}

impl<E> fmt::Debug for Frame<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Retry { attempt, .. } => write!(f, "Frame(retry, attempt {})", attempt),
            Frame::Timeout { limit, .. } => write!(f, "Frame(timeout, {:?})", limit),
            Frame::CloseScope { scope, .. } => {
                write!(f, "Frame(close-scope, {})", scope.id().as_u64())
            }
            Frame::Parallel {
                branches,
                collected,
                ..
            } => write!(
                f,
                "Frame(parallel, {} done, {} left)",
                collected.len(),
                branches.len()
            ),
            Frame::Race { branches, failures } => write!(
                f,
                "Frame(race, {} failed, {} left)",
                failures.len(),
                branches.len()
            ),
            other => write!(f, "Frame({})", other.kind()),
        }
    }
}

/// LIFO of [`Frame`]s owned by a single interpretation.
pub struct ContinuationStack<E> {
    frames: Vec<Frame<E>>,
}

impl<E> ContinuationStack<E> {
    pub fn new() -> Self {
        Self { frames: Vec::new() }
    }

    pub fn push(&mut self, frame: Frame<E>) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<Frame<E>> {
        self.frames.pop()
    }

    pub fn peek(&self) -> Option<&Frame<E>> {
        self.frames.last()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl<E> Default for ContinuationStack<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ContinuationStack<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.frames.iter().rev()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use weft_effects::Step;

    #[test]
    fn test_stack_is_lifo() {
        let mut stack: ContinuationStack<()> = ContinuationStack::new();
        stack.push(Frame::RestoreContext(Context::empty()));
        stack.push(Frame::Continue(Rc::new(Step::Value)));
        stack.push(Frame::Timeout {
            limit: Duration::from_millis(5),
            started_at: 0,
        });

        assert_eq!(stack.len(), 3);
        assert_eq!(stack.peek().map(Frame::kind), Some("timeout"));

        let kinds: Vec<_> = std::iter::from_fn(|| stack.pop()).map(|f| f.kind()).collect();
        assert_eq!(kinds, vec!["timeout", "continue", "restore-context"]);
        assert!(stack.is_empty());
    }

    #[test]
    fn test_debug_lists_top_first() {
        let mut stack: ContinuationStack<()> = ContinuationStack::new();
        stack.push(Frame::RestoreContext(Context::empty()));
        stack.push(Frame::Timeout {
            limit: Duration::from_millis(5),
            started_at: 0,
        });
        assert_eq!(
            format!("{:?}", stack),
            "[Frame(timeout, 5ms), Frame(restore-context)]"
        );
    }
}
