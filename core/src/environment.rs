//! Injected dependencies.
//!
//! Time, storage and notifications are all reached through traits so the
//! rules can run without a database or a wall clock.

use crate::notify::RegistrationNotifier;
use crate::repository::{HostRepository, RegistrationRepository};
use crate::workflow::Workflow;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Clock trait - abstracts time operations for testability
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Environment dependencies for the registration service
#[derive(Clone)]
pub struct RegistrationEnvironment {
    /// Host and settings lookup
    pub hosts: Arc<dyn HostRepository>,
    /// Registration storage
    pub registrations: Arc<dyn RegistrationRepository>,
    /// Receives registration events
    pub notifier: Arc<dyn RegistrationNotifier>,
    /// Clock for timestamps and window checks
    pub clock: Arc<dyn Clock>,
    /// Compiled registration workflow
    pub workflow: Arc<Workflow>,
}

impl RegistrationEnvironment {
    /// Creates a new `RegistrationEnvironment`
    #[must_use]
    pub fn new(
        hosts: Arc<dyn HostRepository>,
        registrations: Arc<dyn RegistrationRepository>,
        notifier: Arc<dyn RegistrationNotifier>,
        clock: Arc<dyn Clock>,
        workflow: Arc<Workflow>,
    ) -> Self {
        Self {
            hosts,
            registrations,
            notifier,
            clock,
            workflow,
        }
    }
}
