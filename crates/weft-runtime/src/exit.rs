//! Explicit run outcomes.

use weft_effects::Cause;

/// The outcome of a run as a value: never raised, always returned.
#[derive(Debug, Clone, PartialEq)]
pub enum Exit<A, E> {
    Success(A),
    Failure(Cause<E>),
}

impl<A, E> Exit<A, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Exit::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    pub fn value(&self) -> Option<&A> {
        match self {
            Exit::Success(value) => Some(value),
            Exit::Failure(_) => None,
        }
    }

    pub fn cause(&self) -> Option<&Cause<E>> {
        match self {
            Exit::Success(_) => None,
            Exit::Failure(cause) => Some(cause),
        }
    }

    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> Exit<B, E> {
        match self {
            Exit::Success(value) => Exit::Success(f(value)),
            Exit::Failure(cause) => Exit::Failure(cause),
        }
    }

    pub fn into_result(self) -> Result<A, Cause<E>> {
        match self {
            Exit::Success(value) => Ok(value),
            Exit::Failure(cause) => Err(cause),
        }
    }
}

impl<A, E> From<Result<A, Cause<E>>> for Exit<A, E> {
    fn from(result: Result<A, Cause<E>>) -> Self {
        match result {
            Ok(value) => Exit::Success(value),
            Err(cause) => Exit::Failure(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_accessors() {
        let ok: Exit<u8, ()> = Exit::from(Ok(3));
        assert!(ok.is_success());
        assert_eq!(ok.value(), Some(&3));
        assert_eq!(ok.map(|n| n * 2), Exit::Success(6));

        let failed: Exit<u8, &str> = Exit::from(Err(Cause::fail("nope")));
        assert!(failed.is_failure());
        assert_eq!(failed.cause(), Some(&Cause::fail("nope")));
        assert_eq!(failed.into_result(), Err(Cause::fail("nope")));
    }
}
