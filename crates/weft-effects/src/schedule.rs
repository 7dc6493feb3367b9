//! Retry policies.
//!
//! A [`Schedule`] maps the state of a retry session (how many retries were
//! already made, how long ago the first attempt started, and the last
//! error) to a [`Decision`]: stop, or retry after a delay.
//!
//! Schedules start from a base backoff and are narrowed with limits:
//!
//! ```
//! use std::time::Duration;
//! use weft_effects::{Decision, Schedule};
//!
//! let schedule: Schedule<&str> = Schedule::exponential_backoff(Duration::from_millis(100))
//!     .up_to_max_retries(3)
//!     .retry_if(|err: &&str| *err != "fatal");
//!
//! assert_eq!(
//!     schedule.decide(2, Duration::ZERO, &"flaky"),
//!     Decision::Continue(Duration::from_millis(400))
//! );
//! assert_eq!(schedule.decide(3, Duration::ZERO, &"flaky"), Decision::Stop);
//! assert_eq!(schedule.decide(0, Duration::ZERO, &"fatal"), Decision::Stop);
//! ```
//!
//! Composition is a logical AND: a schedule continues only while every
//! rule agrees, and waits for the smallest delay any rule proposes. Jitter
//! is applied last, to that final delay.
//!
//! A schedule holds no random state of its own. Each retry session asks it
//! for a fresh [`JitterRng`] and threads that through
//! [`Schedule::decide_with`], so a seeded schedule yields the same delays
//! every time a session starts.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Retry ceiling of every base schedule until `up_to_max_retries`
/// replaces it.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Outcome of consulting a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Stop,
    Continue(Duration),
}

/// What a schedule gets to look at.
#[derive(Debug)]
pub struct RetryState<'a, E> {
    /// Retries already performed; `0` when deciding on the first retry.
    pub attempt: u32,
    /// Time since the first attempt started.
    pub elapsed: Duration,
    pub last_error: &'a E,
}

/// A single rule's opinion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Stop,
    Delay(Duration),
    Pass,
}

type Rule<E> = Rc<dyn Fn(&RetryState<'_, E>) -> Verdict>;

#[derive(Debug, Clone, Copy)]
struct Jitter {
    factor: f64,
    seed: Option<u64>,
}

impl Jitter {
    /// Scale `delay` by `1 ± sample * factor`.
    fn apply(&self, rng: &mut JitterRng, delay: Duration) -> Duration {
        let spread = (rng.sample() * 2.0 - 1.0) * self.factor;
        Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + spread)).unwrap_or(delay)
    }
}

/// Random source of one retry session.
///
/// Seeded schedules hand out a generator positioned at the start of their
/// sequence; unseeded ones fall back to the thread-local generator.
pub struct JitterRng {
    seeded: Option<StdRng>,
}

impl JitterRng {
    pub fn seeded(seed: u64) -> Self {
        Self {
            seeded: Some(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn thread_local() -> Self {
        Self { seeded: None }
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded.is_some()
    }

    fn sample(&mut self) -> f64 {
        match &mut self.seeded {
            Some(rng) => rng.gen::<f64>(),
            None => rand::thread_rng().gen::<f64>(),
        }
    }
}

impl fmt::Debug for JitterRng {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JitterRng")
            .field("seeded", &self.is_seeded())
            .finish()
    }
}

/// An immutable retry decision function.
pub struct Schedule<E> {
    rules: Vec<Rule<E>>,
    max_retries: u32,
    jitter: Option<Jitter>,
}

impl<E: 'static> Schedule<E> {
    fn base(delay: impl Fn(u32) -> Duration + 'static) -> Self {
        let rule: Rule<E> =
            Rc::new(move |state: &RetryState<'_, E>| Verdict::Delay(delay(state.attempt)));
        Self {
            rules: vec![rule],
            max_retries: DEFAULT_MAX_RETRIES,
            jitter: None,
        }
    }

    /// Retry immediately, bounded only by the retry ceiling.
    pub fn forever() -> Self {
        Self::base(|_| Duration::ZERO)
    }

    /// Same delay before every retry.
    pub fn fixed_delay(delay: Duration) -> Self {
        Self::base(move |_| delay)
    }

    /// `delay * (attempt + 1)`.
    pub fn linear_backoff(delay: Duration) -> Self {
        Self::base(move |attempt| scale(delay, u64::from(attempt) + 1))
    }

    /// `delay * 2^attempt`.
    pub fn exponential_backoff(delay: Duration) -> Self {
        Self::base(move |attempt| scale(delay, 1u64.checked_shl(attempt).unwrap_or(u64::MAX)))
    }

    /// `delay * fib(attempt)` over 1, 1, 2, 3, 5, ...
    pub fn fibonacci_backoff(delay: Duration) -> Self {
        Self::base(move |attempt| scale(delay, fibonacci(attempt)))
    }

    /// Perturb the final delay by up to `± factor` of itself, using the
    /// thread-local generator. `factor` is clamped to `0.0..=1.0`.
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = Some(Jitter {
            factor: clamp_factor(factor),
            seed: None,
        });
        self
    }

    /// Like [`Schedule::with_jitter`], but every session draws the same
    /// sequence of samples from `seed`.
    pub fn with_seeded_jitter(mut self, factor: f64, seed: u64) -> Self {
        self.jitter = Some(Jitter {
            factor: clamp_factor(factor),
            seed: Some(seed),
        });
        self
    }

    /// Allow at most `n` retries (`n + 1` attempts in total).
    pub fn up_to_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Stop once more than `limit` has elapsed since the first attempt.
    pub fn up_to_max_duration(self, limit: Duration) -> Self {
        self.with_rule(move |state| {
            if state.elapsed > limit {
                Verdict::Stop
            } else {
                Verdict::Pass
            }
        })
    }

    /// Stop as soon as the last error fails `predicate`.
    pub fn retry_if(self, predicate: impl Fn(&E) -> bool + 'static) -> Self {
        self.with_rule(move |state| {
            if predicate(state.last_error) {
                Verdict::Pass
            } else {
                Verdict::Stop
            }
        })
    }

    /// Continue only while both schedules continue, waiting for the
    /// smaller delay. The ceiling is the smaller of the two; `self`'s
    /// jitter wins over `other`'s.
    pub fn intersect(mut self, other: Schedule<E>) -> Self {
        self.rules.extend(other.rules);
        self.max_retries = self.max_retries.min(other.max_retries);
        self.jitter = self.jitter.or(other.jitter);
        self
    }

    fn with_rule(mut self, rule: impl Fn(&RetryState<'_, E>) -> Verdict + 'static) -> Self {
        self.rules.push(Rc::new(rule));
        self
    }
}

impl<E> Schedule<E> {
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Random source for a new retry session.
    pub fn jitter_rng(&self) -> JitterRng {
        match self.jitter.and_then(|jitter| jitter.seed) {
            Some(seed) => JitterRng::seeded(seed),
            None => JitterRng::thread_local(),
        }
    }

    /// Consult the schedule outside any session. Seeded jitter restarts
    /// its sequence on every call.
    pub fn decide(&self, attempt: u32, elapsed: Duration, last_error: &E) -> Decision {
        self.decide_with(&mut self.jitter_rng(), attempt, elapsed, last_error)
    }

    /// Consult the schedule, drawing jitter from the session's `rng`.
    pub fn decide_with(
        &self,
        rng: &mut JitterRng,
        attempt: u32,
        elapsed: Duration,
        last_error: &E,
    ) -> Decision {
        if attempt >= self.max_retries {
            return Decision::Stop;
        }
        let state = RetryState {
            attempt,
            elapsed,
            last_error,
        };
        let mut delay: Option<Duration> = None;
        for rule in &self.rules {
            match rule(&state) {
                Verdict::Stop => return Decision::Stop,
                Verdict::Delay(proposed) => {
                    delay = Some(delay.map_or(proposed, |current| current.min(proposed)));
                }
                Verdict::Pass => {}
            }
        }
        let delay = delay.unwrap_or(Duration::ZERO);
        match &self.jitter {
            Some(jitter) => Decision::Continue(jitter.apply(rng, delay)),
            None => Decision::Continue(delay),
        }
    }
}

impl<E> Clone for Schedule<E> {
    fn clone(&self) -> Self {
        Self {
            rules: self.rules.clone(),
            max_retries: self.max_retries,
            jitter: self.jitter,
        }
    }
}

impl<E> fmt::Debug for Schedule<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schedule")
            .field("rules", &self.rules.len())
            .field("max_retries", &self.max_retries)
            .field("jitter", &self.jitter.as_ref().map(|j| j.factor))
            .finish()
    }
}

fn scale(delay: Duration, factor: u64) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;
    let nanos = delay.as_nanos().saturating_mul(u128::from(factor));
    match u64::try_from(nanos / NANOS_PER_SEC) {
        Ok(secs) => Duration::new(secs, (nanos % NANOS_PER_SEC) as u32),
        Err(_) => Duration::MAX,
    }
}

fn fibonacci(n: u32) -> u64 {
    let (mut a, mut b) = (1u64, 1u64);
    for _ in 0..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    a
}

fn clamp_factor(factor: f64) -> f64 {
    if factor.is_nan() {
        0.0
    } else {
        factor.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn delays(schedule: &Schedule<()>, attempts: u32) -> Vec<Decision> {
        (0..attempts).map(|a| schedule.decide(a, Duration::ZERO, &())).collect()
    }

    // ------------------------------------------------------------------------
    // Base backoffs
    // ------------------------------------------------------------------------

    #[test]
    fn test_fixed_delay() {
        let schedule = Schedule::fixed_delay(ms(500)).up_to_max_retries(3);
        assert_eq!(
            delays(&schedule, 4),
            vec![
                Decision::Continue(ms(500)),
                Decision::Continue(ms(500)),
                Decision::Continue(ms(500)),
                Decision::Stop,
            ]
        );
    }

    #[test]
    fn test_linear_backoff() {
        let schedule = Schedule::linear_backoff(ms(100));
        assert_eq!(
            delays(&schedule, 3),
            vec![
                Decision::Continue(ms(100)),
                Decision::Continue(ms(200)),
                Decision::Continue(ms(300)),
            ]
        );
    }

    #[test]
    fn test_exponential_backoff() {
        let schedule = Schedule::exponential_backoff(ms(100));
        assert_eq!(
            delays(&schedule, 4),
            vec![
                Decision::Continue(ms(100)),
                Decision::Continue(ms(200)),
                Decision::Continue(ms(400)),
                Decision::Continue(ms(800)),
            ]
        );
    }

    #[test]
    fn test_fibonacci_backoff() {
        let schedule = Schedule::fibonacci_backoff(ms(10));
        assert_eq!(
            delays(&schedule, 6),
            [10, 10, 20, 30, 50, 80]
                .into_iter()
                .map(|n| Decision::Continue(ms(n)))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_exponential_saturates_instead_of_overflowing() {
        let schedule =
            Schedule::<()>::exponential_backoff(Duration::from_secs(1)).up_to_max_retries(200);
        match schedule.decide(150, Duration::ZERO, &()) {
            Decision::Continue(delay) => assert!(delay >= Duration::from_secs(1 << 40)),
            Decision::Stop => panic!("unexpected stop"),
        }
    }

    // ------------------------------------------------------------------------
    // Limits
    // ------------------------------------------------------------------------

    #[test]
    fn test_default_ceiling() {
        let schedule = Schedule::<()>::forever();
        assert_eq!(schedule.max_retries(), DEFAULT_MAX_RETRIES);
        assert_eq!(
            schedule.decide(DEFAULT_MAX_RETRIES - 1, Duration::ZERO, &()),
            Decision::Continue(Duration::ZERO)
        );
        assert_eq!(
            schedule.decide(DEFAULT_MAX_RETRIES, Duration::ZERO, &()),
            Decision::Stop
        );
    }

    #[test]
    fn test_up_to_max_duration() {
        let schedule = Schedule::<()>::fixed_delay(ms(50)).up_to_max_duration(ms(400));
        assert_eq!(schedule.decide(0, ms(400), &()), Decision::Continue(ms(50)));
        assert_eq!(schedule.decide(0, ms(401), &()), Decision::Stop);
    }

    #[test]
    fn test_retry_if_stops_on_rejected_error() {
        let schedule = Schedule::fixed_delay(ms(1)).retry_if(|code: &u16| *code >= 500);
        assert_eq!(schedule.decide(0, Duration::ZERO, &503), Decision::Continue(ms(1)));
        assert_eq!(schedule.decide(0, Duration::ZERO, &404), Decision::Stop);
    }

    #[test]
    fn test_intersect_takes_minimum_delay_and_both_limits() {
        let schedule = Schedule::<()>::exponential_backoff(ms(100))
            .up_to_max_retries(8)
            .intersect(Schedule::fixed_delay(ms(250)).up_to_max_retries(5));

        assert_eq!(
            delays(&schedule, 6),
            vec![
                Decision::Continue(ms(100)),
                Decision::Continue(ms(200)),
                Decision::Continue(ms(250)),
                Decision::Continue(ms(250)),
                Decision::Continue(ms(250)),
                Decision::Stop,
            ]
        );
    }

    // ------------------------------------------------------------------------
    // Jitter
    // ------------------------------------------------------------------------

    #[test]
    fn test_jitter_stays_within_factor() {
        let schedule = Schedule::<()>::fixed_delay(ms(1000))
            .up_to_max_retries(1000)
            .with_jitter(0.25);
        for attempt in 0..200 {
            match schedule.decide(attempt, Duration::ZERO, &()) {
                Decision::Continue(delay) => {
                    assert!(delay >= ms(750) && delay <= ms(1250), "{:?}", delay)
                }
                Decision::Stop => panic!("unexpected stop"),
            }
        }
    }

    fn session_delays(schedule: &Schedule<()>, attempts: u32) -> Vec<Decision> {
        let mut rng = schedule.jitter_rng();
        (0..attempts)
            .map(|a| schedule.decide_with(&mut rng, a, Duration::ZERO, &()))
            .collect()
    }

    #[test]
    fn test_seeded_jitter_is_reproducible() {
        let make = || Schedule::<()>::fixed_delay(ms(1000)).with_seeded_jitter(0.5, 42);
        assert_eq!(session_delays(&make(), 5), session_delays(&make(), 5));
    }

    #[test]
    fn test_seeded_sessions_of_one_schedule_agree() {
        let schedule = Schedule::<()>::fixed_delay(ms(1000)).with_seeded_jitter(0.5, 42);
        let first = session_delays(&schedule, 5);
        let again = session_delays(&schedule.clone(), 5);
        assert_eq!(first, again);
        // Samples still vary within a session.
        assert!(first.windows(2).any(|pair| pair[0] != pair[1]), "{:?}", first);
    }

    #[test]
    fn test_jitter_rng_follows_seed() {
        assert!(Schedule::<()>::forever().with_seeded_jitter(0.1, 3).jitter_rng().is_seeded());
        assert!(!Schedule::<()>::forever().with_jitter(0.1).jitter_rng().is_seeded());
        assert!(!Schedule::<()>::forever().jitter_rng().is_seeded());
    }

    #[test]
    fn test_jitter_applies_after_intersection() {
        let schedule = Schedule::<()>::fixed_delay(ms(1000))
            .with_seeded_jitter(0.1, 7)
            .intersect(Schedule::fixed_delay(ms(100)));
        match schedule.decide(0, Duration::ZERO, &()) {
            Decision::Continue(delay) => assert!(delay >= ms(90) && delay <= ms(110), "{:?}", delay),
            Decision::Stop => panic!("unexpected stop"),
        }
    }
}
