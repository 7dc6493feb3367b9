//! Weft Effect Algebra
//!
//! This crate holds the data side of weft: effects are plain values that
//! describe work, and nothing in here runs them. The interpreter lives in
//! `weft-runtime`.
//!
//! ## Architecture
//!
//! 1. **Effects** ([`Effect`], [`EffectNode`])
//!    - Lazy, immutable and re-interpretable
//!    - Built with combinators: `map`, `flat_map`, `catch_error`, `retry_with`
//!    - A closed set of variants, each identified by an [`EffectTag`]
//!
//! 2. **Failures** ([`Cause`], [`Defect`])
//!    - Typed user failures, validation errors, missing services, timeouts
//!    - Defects for bugs (panics, type mismatches, misuse of the runtime)
//!    - Composite causes when several things fail together
//!
//! 3. **Environment** ([`Context`], [`Layer`])
//!    - Immutable type-keyed service maps
//!    - Layers build contexts and compose sequentially or in parallel
//!
//! 4. **Resources and policies** ([`Scope`], [`Schedule`])
//!    - Scopes run finalizers in reverse order on every exit path
//!    - Schedules decide whether and when a failed effect is retried
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use weft_effects::{Effect, EffectTag, Schedule};
//!
//! let fetch: Effect<u32, String> = Effect::attempt(|| Err("offline".to_string()))
//!     .retry_with(Schedule::fixed_delay(Duration::from_millis(50)).up_to_max_retries(3))
//!     .catch_all(|_| Effect::succeed(0));
//!
//! // Building the description does not run anything.
//! assert_eq!(fetch.tag(), EffectTag::Catch);
//! ```

pub mod cause;
pub mod context;
pub mod effect;
pub mod layer;
pub mod schedule;
pub mod scope;

pub use cause::{Cause, Defect, ValidationError};
pub use context::{Context, ContextError, Tag, TypeKey};
pub use effect::{
    downcast_value, AsyncSlot, Continuation, Effect, EffectNode, EffectTag, Resume, Step, Value,
};
pub use layer::Layer;
pub use schedule::{Decision, JitterRng, RetryState, Schedule, DEFAULT_MAX_RETRIES};
pub use scope::{Finalizer, Scope, ScopeId};
