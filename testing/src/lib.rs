//! # Screening Testing
//!
//! Test support for reducers written against `screening-core`:
//!
//! - [`ReducerTest`]: Given-When-Then harness for a single reduce call
//! - [`assertions`]: checks over the returned effects
//! - [`run_effects`]: drives returned effects to completion and collects the
//!   actions they produce, without a store
//! - [`mocks`]: deterministic clocks
//!
//! ## Example
//!
//! ```ignore
//! ReducerTest::new(EventSessionReducer::new())
//!     .with_env(env)
//!     .given_state(loaded_state(free_event()))
//!     .when_action(SessionAction::RequestStatus { correlation_id, status: RsvpStatus::Going })
//!     .then_state(|state| assert_eq!(state.rsvp.status, RsvpStatus::Going))
//!     .then_effects(|effects| assertions::assert_future_count(effects, 1))
//!     .run();
//! ```

use chrono::{DateTime, Duration, Utc};
use screening_core::environment::Clock;
use std::sync::Mutex;


pub use reducer_test::{ReducerTest, assertions, run_effects};

/// Deterministic clocks.
pub mod mocks {
    use super::{Clock, DateTime, Duration, Mutex, Utc};

    /// Always returns the same instant.
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Clock frozen at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// A clock the test moves forward explicitly, e.g. past an event start.
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Clock starting at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock forward by `by`.
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            *time += by;
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
        }
    }

    /// The instant every test clock starts at: 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::days(20_089)
    }

    /// A [`FixedClock`] at [`test_epoch`].
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }
}

pub use mocks::{FixedClock, ManualClock, test_clock, test_epoch};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_never_moves() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(test_epoch());
        clock.advance(Duration::hours(2));
        assert_eq!(clock.now() - test_epoch(), Duration::hours(2));

        clock.set(test_epoch());
        assert_eq!(clock.now(), test_epoch());
    }
}
