//! Interpreter state threaded through handlers.

use std::cell::Cell;
use std::fmt;
use std::mem;
use std::rc::Rc;

use weft_effects::{Cause, Context, EffectNode, Scope, Value};

use crate::stack::{ContinuationStack, Frame};

/// What the trampoline holds in its hand.
pub enum Control<E> {
    /// An effect still to be dispatched.
    Effect(EffectNode<E>),
    /// A settled value, handed to the next frame.
    Value(Value),
    /// A failure, unwinding the stack.
    Failure(Cause<E>),
    /// Placeholder while a handler owns the state. A handler that returns
    /// it has not decided what happens next.
    Pending,
}

impl<E> Control<E> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Control::Pending)
    }
}

impl<E> fmt::Debug for Control<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Control::Effect(node) => write!(f, "Effect({:?})", node.tag()),
            Control::Value(_) => f.write_str("Value(..)"),
            Control::Failure(_) => f.write_str("Failure(..)"),
            Control::Pending => f.write_str("Pending"),
        }
    }
}

/// Steps taken by a run, shared with the finalizers it registers.
#[derive(Debug, Default)]
pub struct StepBudget {
    used: Cell<u64>,
    aborting: Cell<u32>,
}

impl StepBudget {
    pub fn used(&self) -> u64 {
        self.used.get()
    }

    /// Count one step and return the new total.
    pub fn tick(&self) -> u64 {
        let used = self.used.get().saturating_add(1);
        self.used.set(used);
        used
    }

    /// True while an abort is closing scopes. The releases it runs are
    /// not held to the limit that caused it.
    pub fn is_aborting(&self) -> bool {
        self.aborting.get() > 0
    }

    pub fn enter_abort(&self) {
        self.aborting.set(self.aborting.get() + 1);
    }

    pub fn leave_abort(&self) {
        self.aborting.set(self.aborting.get().saturating_sub(1));
    }
}

/// Everything one interpretation owns.
///
/// Handlers receive the state by value and return the next one; the
/// builder-style methods below consume and return `self`.
pub struct RuntimeState<E> {
    pub context: Context,
    pub stack: ContinuationStack<E>,
    pub scope: Scope<E>,
    pub value: Control<E>,
    pub steps: Rc<StepBudget>,
}

impl<E> RuntimeState<E> {
    pub fn new(node: EffectNode<E>, context: Context, scope: Scope<E>) -> Self {
        Self {
            context,
            stack: ContinuationStack::new(),
            scope,
            value: Control::Effect(node),
            steps: Rc::default(),
        }
    }

    /// Count steps on a shared budget instead of a fresh one.
    pub fn with_steps(mut self, steps: Rc<StepBudget>) -> Self {
        self.steps = steps;
        self
    }

    /// Move the control out, leaving `Pending` behind.
    pub fn take_control(&mut self) -> Control<E> {
        mem::replace(&mut self.value, Control::Pending)
    }

    pub fn with_control(mut self, value: Control<E>) -> Self {
        self.value = value;
        self
    }

    pub fn succeed(self, value: Value) -> Self {
        self.with_control(Control::Value(value))
    }

    pub fn succeed_unit(self) -> Self {
        self.succeed(Box::new(()))
    }

    pub fn fail(self, cause: Cause<E>) -> Self {
        self.with_control(Control::Failure(cause))
    }

    pub fn continue_with(self, node: EffectNode<E>) -> Self {
        self.with_control(Control::Effect(node))
    }

    pub fn push(mut self, frame: Frame<E>) -> Self {
        self.stack.push(frame);
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn with_scope(mut self, scope: Scope<E>) -> Self {
        self.scope = scope;
        self
    }
}

impl<E> fmt::Debug for RuntimeState<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeState")
            .field("context", &self.context)
            .field("stack", &self.stack.len())
            .field("scope", &self.scope)
            .field("value", &self.value)
            .field("steps", &self.steps.used())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_effects::{Defect, EffectTag};

    #[test]
    fn test_take_control_leaves_pending() {
        let mut state: RuntimeState<()> =
            RuntimeState::new(EffectNode::unit(), Context::empty(), Scope::new());
        assert!(matches!(state.take_control(), Control::Effect(ref n) if n.tag() == EffectTag::Pure));
        assert!(state.value.is_pending());
    }

    #[test]
    fn test_builder_methods_replace_control() {
        let state: RuntimeState<()> =
            RuntimeState::new(EffectNode::unit(), Context::empty(), Scope::new());
        let state = state
            .push(Frame::RestoreContext(Context::empty()))
            .fail(Cause::Defect(Defect::EmptyRace));

        assert_eq!(state.stack.len(), 1);
        assert!(matches!(state.value, Control::Failure(Cause::Defect(Defect::EmptyRace))));
    }

    #[test]
    fn test_step_budget_is_shared() {
        let first: RuntimeState<()> =
            RuntimeState::new(EffectNode::unit(), Context::empty(), Scope::new());
        let second: RuntimeState<()> =
            RuntimeState::new(EffectNode::unit(), Context::empty(), Scope::new())
                .with_steps(Rc::clone(&first.steps));

        first.steps.tick();
        assert_eq!(second.steps.tick(), 2);

        second.steps.enter_abort();
        assert!(first.steps.is_aborting());
        second.steps.leave_abort();
        assert!(!first.steps.is_aborting());
    }
}
