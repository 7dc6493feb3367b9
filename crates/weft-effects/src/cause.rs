//! Structured failure causes.
//!
//! Every failure observed by the interpreter travels as a [`Cause`]. A cause
//! is either a typed user failure, one of the runtime's own failure kinds,
//! or an aggregate of several causes (parallel branches, finalizers).

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use thiserror::Error;

use crate::context::TypeKey;

// ============================================================================
// Defects
// ============================================================================

/// Failures that indicate a bug or misuse rather than an expected error.
///
/// Defects are never matched by `catch_error`; only `catch_cause` sees them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Defect {
    /// A user closure panicked.
    #[error("panic: {0}")]
    Panic(String),

    /// An async effect was awaited but its callback never fired.
    #[error("async effect never settled")]
    AsyncNeverSettled,

    /// A value reached a continuation with an unexpected type.
    #[error("type mismatch: expected {expected}")]
    TypeMismatch { expected: &'static str },

    /// A finalizer was added to a scope that had already been closed.
    #[error("scope {0} is already closed")]
    ScopeClosed(u64),

    /// `race` was asked to pick a winner from no effects at all.
    #[error("race over an empty set of effects")]
    EmptyRace,

    /// The registry had no handler for an effect variant.
    #[error("no handler registered for {0}")]
    MissingHandler(&'static str),

    /// A handler was handed a node of a different variant.
    #[error("handler for {expected} received {found}")]
    Misrouted {
        expected: &'static str,
        found: &'static str,
    },

    /// A handler returned without deciding the next interpreter state.
    #[error("handler for {0} did not produce a next state")]
    HandlerStalled(&'static str),

    /// The configured trampoline step limit was reached.
    #[error("step limit of {0} exceeded")]
    StepLimitExceeded(u64),

    /// A forked branch handle could not be joined by the active strategy.
    #[error("fork {0} cannot be joined by strategy {1}")]
    ForeignFork(u64, &'static str),
}

impl Defect {
    /// Convert a panic payload into a defect, keeping the message when the
    /// payload is a string.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<String>()
            .cloned()
            .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
            .unwrap_or_else(|| "unknown panic".to_string());
        Defect::Panic(message)
    }

    /// Run `f`, turning a panic into [`Defect::Panic`].
    pub fn guard<T>(f: impl FnOnce() -> T) -> Result<T, Defect> {
        panic::catch_unwind(AssertUnwindSafe(f)).map_err(Defect::from_panic)
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Caller-supplied data was rejected.
///
/// This is the failure a decoding or schema layer reports through
/// `Effect::invalid` / `Effect::from_validation`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed at `{path}`: {message}")]
pub struct ValidationError {
    /// Location of the offending value, `$` for the root.
    pub path: String,
    /// Human readable reason.
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }

    /// A validation failure about the input as a whole.
    pub fn at_root(message: impl Into<String>) -> Self {
        Self::new("$", message)
    }
}

// ============================================================================
// Cause
// ============================================================================

/// Why an effect failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Cause<E> {
    /// An error value supplied through `Effect::fail`.
    Fail(E),
    /// Caller-supplied data was rejected.
    Validation(ValidationError),
    /// A `service` lookup found nothing under the key.
    ServiceNotFound(TypeKey),
    /// The source ran longer than the allowed bound.
    Timeout(Duration),
    /// Several failures observed together, in the order they happened.
    Composite(Vec<Cause<E>>),
    /// A bug or misuse.
    Defect(Defect),
}

impl<E> Cause<E> {
    pub fn fail(error: E) -> Self {
        Cause::Fail(error)
    }

    pub fn die(defect: Defect) -> Self {
        Cause::Defect(defect)
    }

    /// Aggregate two causes, flattening one level of nesting on both sides.
    pub fn combine(self, other: Cause<E>) -> Cause<E> {
        let mut causes = match self {
            Cause::Composite(causes) => causes,
            cause => vec![cause],
        };
        match other {
            Cause::Composite(more) => causes.extend(more),
            cause => causes.push(cause),
        }
        Cause::Composite(causes)
    }

    /// True for a bare typed failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, Cause::Fail(_))
    }

    pub fn is_defect(&self) -> bool {
        matches!(self, Cause::Defect(_))
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, Cause::Composite(_))
    }

    /// The typed error of a bare failure.
    pub fn failure(self) -> Option<E> {
        match self {
            Cause::Fail(error) => Some(error),
            _ => None,
        }
    }

    /// Every typed error contained in this cause, depth first.
    pub fn failures(&self) -> Vec<&E> {
        let mut out = Vec::new();
        self.walk(&mut |cause| {
            if let Cause::Fail(error) = cause {
                out.push(error);
            }
        });
        out
    }

    /// The first typed error contained in this cause.
    pub fn first_failure(&self) -> Option<&E> {
        self.failures().into_iter().next()
    }

    /// Every defect contained in this cause, depth first.
    pub fn defects(&self) -> Vec<&Defect> {
        let mut out = Vec::new();
        self.walk(&mut |cause| {
            if let Cause::Defect(defect) = cause {
                out.push(defect);
            }
        });
        out
    }

    /// The non-composite leaves of this cause, in order.
    pub fn flatten(self) -> Vec<Cause<E>> {
        match self {
            Cause::Composite(causes) => causes.into_iter().flat_map(Cause::flatten).collect(),
            leaf => vec![leaf],
        }
    }

    /// Transform the typed errors, keeping the shape.
    pub fn map<F>(self, f: &impl Fn(E) -> F) -> Cause<F> {
        match self {
            Cause::Fail(error) => Cause::Fail(f(error)),
            Cause::Validation(error) => Cause::Validation(error),
            Cause::ServiceNotFound(key) => Cause::ServiceNotFound(key),
            Cause::Timeout(limit) => Cause::Timeout(limit),
            Cause::Composite(causes) => {
                Cause::Composite(causes.into_iter().map(|cause| cause.map(f)).collect())
            }
            Cause::Defect(defect) => Cause::Defect(defect),
        }
    }

    fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Cause<E>)) {
        visit(self);
        if let Cause::Composite(causes) = self {
            for cause in causes {
                cause.walk(visit);
            }
        }
    }
}

impl<E> From<Defect> for Cause<E> {
    fn from(defect: Defect) -> Self {
        Cause::Defect(defect)
    }
}

impl<E> From<ValidationError> for Cause<E> {
    fn from(error: ValidationError) -> Self {
        Cause::Validation(error)
    }
}

impl<E: fmt::Display> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Fail(error) => write!(f, "{}", error),
            Cause::Validation(error) => write!(f, "{}", error),
            Cause::ServiceNotFound(key) => write!(f, "service not found: {}", key),
            Cause::Timeout(limit) => write!(f, "timed out after {:?}", limit),
            Cause::Composite(causes) => {
                write!(f, "{} failures: [", causes.len())?;
                for (i, cause) in causes.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", cause)?;
                }
                write!(f, "]")
            }
            Cause::Defect(defect) => write!(f, "defect: {}", defect),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for Cause<E> {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defect_from_panic_payloads() {
        let owned = Defect::guard(|| -> () { panic!("{}", String::from("owned")) });
        assert_eq!(owned, Err(Defect::Panic("owned".to_string())));

        let borrowed = Defect::guard(|| -> () { panic!("borrowed") });
        assert_eq!(borrowed, Err(Defect::Panic("borrowed".to_string())));

        assert_eq!(Defect::guard(|| 7), Ok(7));
    }

    #[test]
    fn test_combine_flattens_one_level() {
        let first: Cause<&str> = Cause::Composite(vec![Cause::fail("a"), Cause::fail("b")]);
        let combined = first.combine(Cause::Timeout(Duration::from_millis(5)));

        assert_eq!(
            combined,
            Cause::Composite(vec![
                Cause::fail("a"),
                Cause::fail("b"),
                Cause::Timeout(Duration::from_millis(5)),
            ])
        );
    }

    #[test]
    fn test_failures_and_defects_walk_nested_causes() {
        let cause: Cause<&str> = Cause::Composite(vec![
            Cause::fail("outer"),
            Cause::Composite(vec![Cause::die(Defect::EmptyRace), Cause::fail("inner")]),
        ]);

        assert_eq!(cause.failures(), vec![&"outer", &"inner"]);
        assert_eq!(cause.first_failure(), Some(&"outer"));
        assert_eq!(cause.defects(), vec![&Defect::EmptyRace]);
        assert_eq!(cause.flatten().len(), 3);
    }

    #[test]
    fn test_cause_display() {
        let cause: Cause<&str> = Cause::Composite(vec![
            Cause::fail("disk full"),
            Cause::Validation(ValidationError::new("$.port", "must be positive")),
        ]);
        assert_eq!(
            cause.to_string(),
            "2 failures: [disk full; validation failed at `$.port`: must be positive]"
        );

        let defect: Cause<&str> = Cause::die(Defect::AsyncNeverSettled);
        assert_eq!(defect.to_string(), "defect: async effect never settled");
    }

    #[test]
    fn test_map_keeps_shape() {
        let cause: Cause<u32> = Cause::Composite(vec![Cause::fail(1), Cause::die(Defect::EmptyRace)]);
        let mapped = cause.map(&|n| n * 10);
        assert_eq!(
            mapped,
            Cause::Composite(vec![Cause::fail(10), Cause::die(Defect::EmptyRace)])
        );
    }
}
