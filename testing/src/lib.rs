//! # Registration Testing
//!
//! Testing utilities for `registration-core`.
//!
//! This crate provides:
//! - Deterministic clocks and a recording notifier
//! - Host and account fixtures plus a wired-up [`TestHarness`]
//! - [`ScenarioTest`], a Given-When-Then helper for service operations
//! - proptest strategies for domain values
//!
//! ## Example
//!
//! ```ignore
//! use registration_testing::{ScenarioTest, HostBuilder, accounts};
//!
//! #[tokio::test]
//! async fn test_sixth_space_is_rejected() {
//!     ScenarioTest::new(HostBuilder::new().capacity(5).build())
//!         .given_registration(5, RegistrationStatus::Complete)
//!         .when_register(1, accounts::member(UserId::new()))
//!         .then_violation(ViolationCode::InsufficientSpaces)
//!         .run()
//!         .await;
//! }
//! ```

use chrono::{DateTime, Duration, Utc};
use registration_core::environment::Clock;

pub mod fixtures;

/// Mock implementations of environment traits
pub mod mocks {
    use super::{Clock, DateTime, Duration, Utc};
    use futures::future::BoxFuture;
    use registration_core::notify::{NotifierError, RegistrationEvent, RegistrationNotifier};
    use std::sync::{Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use registration_testing::mocks::FixedClock;
    /// use registration_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
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

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_time())
    }

    /// The instant [`test_clock`] is fixed at
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is hardcoded.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc)
    }

    /// Clock that only moves when told to
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Create a clock starting at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new(test_time())
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Notifier that records every event it receives
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        events: Mutex<Vec<RegistrationEvent>>,
        fail: bool,
    }

    impl RecordingNotifier {
        /// Create a recording notifier
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Create a notifier that records and then reports failure
        #[must_use]
        pub fn failing() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        /// Events received so far
        #[must_use]
        pub fn events(&self) -> Vec<RegistrationEvent> {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Names of the events received so far
        #[must_use]
        pub fn names(&self) -> Vec<&'static str> {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(RegistrationEvent::name)
                .collect()
        }

        /// Forget recorded events (for test isolation)
        pub fn clear(&self) {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clear();
        }
    }

    impl RegistrationNotifier for RecordingNotifier {
        fn notify(&self, event: RegistrationEvent) -> BoxFuture<'_, Result<(), NotifierError>> {
            Box::pin(async move {
                let name = event.name();
                self.events
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(event);
                if self.fail {
                    Err(NotifierError(format!("{name} delivery failed")))
                } else {
                    Ok(())
                }
            })
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use registration_core::types::{Capacity, RegistrationStatus};

    /// Any capacity, weighted towards small bounds
    pub fn capacity() -> impl Strategy<Value = Capacity> {
        prop_oneof![
            1 => Just(Capacity::Unlimited),
            4 => (1u32..50).prop_map(Capacity::limited),
        ]
    }

    /// Any registration status
    pub fn status() -> impl Strategy<Value = RegistrationStatus> {
        proptest::sample::select(RegistrationStatus::ALL.to_vec())
    }

    /// A plausible spaces request
    pub fn spaces() -> impl Strategy<Value = u32> {
        1u32..10
    }
}

/// Install a test-friendly tracing subscriber.
///
/// Safe to call from every test; only the first call installs it.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "registration_core=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use fixtures::{HostBuilder, TestHarness, accounts};
pub use mocks::{FixedClock, ManualClock, RecordingNotifier, test_clock, test_time};
pub use scenario_test::{ScenarioTest, StepResult};

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use registration_core::notify::{RegistrationEvent, RegistrationNotifier};
    use registration_core::types::HostId;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now(), test_time());
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::default();
        clock.advance(Duration::hours(3));
        assert_eq!(clock.now(), test_time() + Duration::hours(3));
    }

    #[tokio::test]
    async fn test_recording_notifier_keeps_events_when_failing() {
        let notifier = RecordingNotifier::failing();
        let result = notifier
            .notify(RegistrationEvent::AutofillCompleted {
                host_id: HostId::new(),
                registrations: 1,
                spaces: 2,
            })
            .await;
        assert!(result.is_err());
        assert_eq!(notifier.names(), vec!["autofill_completed"]);
    }
}
