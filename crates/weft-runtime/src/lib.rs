//! Weft Runtime
//!
//! A stack-safe interpreter for `weft-effects`. Effects are driven by a
//! trampoline over an explicit continuation stack; each effect variant is
//! handled by exactly one function looked up by tag in a
//! [`HandlerRegistry`].
//!
//! ## Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`runtime`] | The trampoline loop and the run entry points |
//! | [`registry`] | Tag-keyed handler table, validated at construction |
//! | [`handlers`] | The reference handler for each variant |
//! | [`stack`] / [`state`] | Frames and the state threaded through handlers |
//! | [`strategy`] | The fork/join/await/sleep seam and its synchronous default |
//! | [`clock`] | System and virtual time |
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use weft_effects::{Effect, Schedule};
//! use weft_runtime::{Runtime, VirtualClock};
//!
//! let clock = VirtualClock::new(0);
//! let runtime: Runtime<String> = Runtime::builder().clock(clock.clone()).build();
//!
//! let flaky = Effect::<u32, String>::fail("unavailable".to_string())
//!     .retry_with(Schedule::fixed_delay(Duration::from_millis(500)).up_to_max_retries(2))
//!     .or_else(Effect::succeed(0));
//!
//! assert_eq!(runtime.run(&flaky), Ok(0));
//! assert_eq!(clock.sleeps(), vec![Duration::from_millis(500); 2]);
//! ```

pub mod clock;
pub mod config;
pub mod exit;
pub mod handlers;
pub mod registry;
pub mod runtime;
pub mod stack;
pub mod state;
pub mod strategy;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use config::RuntimeConfig;
pub use exit::Exit;
pub use registry::{Handler, HandlerRegistry, HandlerRegistryBuilder, RegistryError};
pub use runtime::{Runtime, RuntimeBuilder};
pub use stack::{ContinuationStack, Frame};
pub use state::{Control, RuntimeState, StepBudget};
pub use strategy::{BranchStep, Branches, ExecutionStrategy, Fork, ForkId, ForkState, Job, SyncStrategy};
