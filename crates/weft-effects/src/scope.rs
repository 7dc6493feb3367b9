//! Finalizer scopes.
//!
//! A [`Scope`] is a LIFO registry of cleanup actions tied to a region of
//! computation. Closing a scope runs every finalizer exactly once, newest
//! first, keeps going past failures, and reports all of them together.
//!
//! Scopes are closed explicitly by whoever opened them. Dropping an open
//! scope with pending finalizers does not run them; it only logs a warning
//! so that the leak is visible.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cause::{Cause, Defect};

/// Cleanup action registered on a scope.
pub type Finalizer<E> = Box<dyn FnOnce() -> Result<(), Cause<E>>>;

/// Unique identifier of a scope, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        ScopeId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

struct ScopeInner<E> {
    id: ScopeId,
    finalizers: RefCell<Vec<Finalizer<E>>>,
    closed: Cell<bool>,
}

impl<E> Drop for ScopeInner<E> {
    fn drop(&mut self) {
        let pending = self.finalizers.get_mut().len();
        if !self.closed.get() && pending > 0 {
            tracing::warn!(
                scope = self.id.as_u64(),
                pending,
                "scope dropped without being closed; its finalizers never ran"
            );
        }
    }
}

/// An ordered, append-only list of finalizers.
///
/// Cloning a `Scope` yields another handle on the same registry.
pub struct Scope<E> {
    inner: Rc<ScopeInner<E>>,
}

impl<E> Scope<E> {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ScopeInner {
                id: ScopeId::next(),
                finalizers: RefCell::new(Vec::new()),
                closed: Cell::new(false),
            }),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// Register a finalizer. Fails once the scope has been closed.
    pub fn add_finalizer(
        &self,
        finalizer: impl FnOnce() -> Result<(), Cause<E>> + 'static,
    ) -> Result<(), Defect> {
        if self.inner.closed.get() {
            return Err(Defect::ScopeClosed(self.inner.id.as_u64()));
        }
        self.inner.finalizers.borrow_mut().push(Box::new(finalizer));
        Ok(())
    }

    /// Number of finalizers still waiting to run.
    pub fn pending(&self) -> usize {
        self.inner.finalizers.borrow().len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Run every finalizer in reverse registration order.
    ///
    /// All finalizers run even when some fail or panic; the failures are
    /// returned together as a [`Cause::Composite`]. Closing an already
    /// closed scope does nothing and succeeds.
    pub fn close(&self) -> Result<(), Cause<E>> {
        if self.inner.closed.replace(true) {
            return Ok(());
        }
        let finalizers = self.inner.finalizers.take();
        let mut failures = Vec::new();
        for finalizer in finalizers.into_iter().rev() {
            match Defect::guard(finalizer) {
                Ok(Ok(())) => {}
                Ok(Err(cause)) => failures.push(cause),
                Err(defect) => failures.push(Cause::Defect(defect)),
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            tracing::warn!(
                scope = self.inner.id.as_u64(),
                failed = failures.len(),
                "finalizers failed while closing scope"
            );
            Err(Cause::Composite(failures))
        }
    }
}

impl<E> Default for Scope<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for Scope<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<E> fmt::Debug for Scope<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("id", &self.inner.id.as_u64())
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn recorder() -> Rc<RefCell<Vec<&'static str>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn test_close_runs_in_reverse_order() {
        let log = recorder();
        let scope: Scope<&str> = Scope::new();
        for name in ["first", "second", "third"] {
            let log = Rc::clone(&log);
            scope
                .add_finalizer(move || {
                    log.borrow_mut().push(name);
                    Ok(())
                })
                .unwrap();
        }

        assert_eq!(scope.pending(), 3);
        assert!(scope.close().is_ok());
        assert_eq!(*log.borrow(), vec!["third", "second", "first"]);
        assert_eq!(scope.pending(), 0);
    }

    #[test]
    fn test_close_collects_every_failure() {
        let log = recorder();
        let scope: Scope<&str> = Scope::new();
        let l = Rc::clone(&log);
        scope
            .add_finalizer(move || {
                l.borrow_mut().push("ran");
                Ok(())
            })
            .unwrap();
        scope.add_finalizer(|| Err(Cause::fail("disk"))).unwrap();
        scope.add_finalizer(|| panic!("socket")).unwrap();

        let err = scope.close().unwrap_err();
        assert_eq!(
            err,
            Cause::Composite(vec![
                Cause::Defect(Defect::Panic("socket".to_string())),
                Cause::fail("disk"),
            ])
        );
        assert_eq!(*log.borrow(), vec!["ran"]);
    }

    #[test]
    fn test_double_close_is_idempotent() {
        let runs = Rc::new(Cell::new(0));
        let scope: Scope<()> = Scope::new();
        let r = Rc::clone(&runs);
        scope
            .add_finalizer(move || {
                r.set(r.get() + 1);
                Ok(())
            })
            .unwrap();

        assert!(scope.close().is_ok());
        assert!(scope.close().is_ok());
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_add_after_close_is_rejected() {
        let scope: Scope<()> = Scope::new();
        scope.close().unwrap();
        let err = scope.add_finalizer(|| Ok(())).unwrap_err();
        assert_eq!(err, Defect::ScopeClosed(scope.id().as_u64()));
    }

    #[test]
    fn test_finalizer_registering_during_close_is_rejected() {
        let scope: Scope<()> = Scope::new();
        let handle = scope.clone();
        let rejected = Rc::new(Cell::new(false));
        let flag = Rc::clone(&rejected);
        scope
            .add_finalizer(move || {
                flag.set(handle.add_finalizer(|| Ok(())).is_err());
                Ok(())
            })
            .unwrap();

        scope.close().unwrap();
        assert!(rejected.get());
    }
}
