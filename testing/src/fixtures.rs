//! Host and account fixtures.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use crate::mocks::{ManualClock, RecordingNotifier, test_time};
use chrono::{DateTime, Utc};
use registration_core::environment::{Clock, RegistrationEnvironment};
use registration_core::memory::InMemoryRegistrationStore;
use registration_core::repository::RegistrationRepository;
use registration_core::service::RegistrationService;
use registration_core::types::{
    AutofillSettings, Capacity, HoldExpiration, Host, HostEntity, HostId, HostSettings, Registrant,
    Registration, RegistrationId, RegistrationSort, RegistrationStatus, WaitlistSettings,
};
use registration_core::workflow::Workflow;
use std::sync::Arc;

/// Builder for hosts with registration settings
///
/// Defaults to an enabled, unlimited host without a waitlist.
#[derive(Clone, Debug)]
pub struct HostBuilder {
    id: HostId,
    kind: String,
    label: String,
    settings: HostSettings,
}

impl Default for HostBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HostBuilder {
    /// Start from an enabled, unlimited host
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: HostId::new(),
            kind: "node".to_string(),
            label: "Test event".to_string(),
            settings: HostSettings::default(),
        }
    }

    /// Display label
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Primary capacity; `0` means unlimited
    #[must_use]
    pub const fn capacity(mut self, capacity: u32) -> Self {
        self.settings.capacity = Capacity::limited(capacity);
        self
    }

    /// Maximum spaces per registration; `0` means unlimited
    #[must_use]
    pub const fn maximum_spaces(mut self, maximum: u32) -> Self {
        self.settings.maximum_spaces = Capacity::limited(maximum);
        self
    }

    /// Enable the waitlist with the given capacity; `0` means unlimited
    #[must_use]
    pub const fn waitlist(mut self, capacity: u32) -> Self {
        self.settings.waitlist = WaitlistSettings {
            enabled: true,
            capacity: Capacity::limited(capacity),
            autofill: self.settings.waitlist.autofill,
        };
        self
    }

    /// Configure autofill
    #[must_use]
    pub const fn autofill(mut self, target: RegistrationStatus, sort: RegistrationSort) -> Self {
        self.settings.waitlist.autofill = Some(AutofillSettings { target, sort });
        self
    }

    /// Registration status switched off
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.settings.enabled = false;
        self
    }

    /// Registration opens at `open`
    #[must_use]
    pub const fn opens(mut self, open: DateTime<Utc>) -> Self {
        self.settings.open = Some(open);
        self
    }

    /// Registration closes at `close`
    #[must_use]
    pub const fn closes(mut self, close: DateTime<Utc>) -> Self {
        self.settings.close = Some(close);
        self
    }

    /// Allow a registrant to hold several registrations
    #[must_use]
    pub const fn multiple_registrations(mut self) -> Self {
        self.settings.multiple_registrations = true;
        self
    }

    /// Expire holds after `hours`
    #[must_use]
    pub const fn hold_expiration(mut self, hours: u32) -> Self {
        self.settings.hold_expiration = Some(HoldExpiration { hours });
        self
    }

    /// Build the host
    #[must_use]
    pub fn build(self) -> Host {
        Host::new(HostEntity::new(self.id, self.kind, self.label), self.settings)
    }
}

/// Ready-made principals
pub mod accounts {
    use registration_core::access::{Account, Override, permissions};
    use registration_core::types::UserId;
    use registration_core::workflow::Workflow;

    /// Every transition permission of `workflow`
    #[must_use]
    pub fn transition_permissions(workflow: &Workflow) -> Vec<String> {
        workflow
            .transitions()
            .iter()
            .map(|t| t.permission.clone())
            .collect()
    }

    /// A user who may use every transition of the standard workflow
    #[must_use]
    pub fn member(id: UserId) -> Account {
        Account::new(id).with_permissions(transition_permissions(&Workflow::standard(true)))
    }

    /// A user without any permission
    #[must_use]
    pub fn visitor(id: UserId) -> Account {
        Account::new(id)
    }

    /// A user holding every permission and override
    #[must_use]
    pub fn administrator() -> Account {
        member(UserId::new())
            .with_permission(permissions::ADMINISTER)
            .with_permission(permissions::UPDATE_ANY)
            .with_override(Override::Status)
            .with_override(Override::Open)
            .with_override(Override::Close)
            .with_override(Override::Capacity)
            .with_override(Override::MaximumSpaces)
    }

    /// A user who may manage registrations but holds no overrides
    #[must_use]
    pub fn staff() -> Account {
        member(UserId::new())
            .with_permission(permissions::ADMINISTER)
            .with_permission(permissions::UPDATE_ANY)
    }
}

/// A service wired to in-memory storage, a manual clock and a recording notifier
pub struct TestHarness {
    /// Hosts and registrations
    pub store: Arc<InMemoryRegistrationStore>,
    /// Captured events
    pub notifier: Arc<RecordingNotifier>,
    /// Controllable time
    pub clock: Arc<ManualClock>,
    /// The service under test
    pub service: RegistrationService,
}

impl TestHarness {
    /// Harness enforcing `workflow`, starting at [`test_time`]
    #[must_use]
    pub fn new(workflow: Workflow) -> Self {
        Self::with_notifier(workflow, RecordingNotifier::new())
    }

    /// Harness with a specific notifier
    #[must_use]
    pub fn with_notifier(workflow: Workflow, notifier: RecordingNotifier) -> Self {
        let store = Arc::new(InMemoryRegistrationStore::new());
        let notifier = Arc::new(notifier);
        let clock = Arc::new(ManualClock::new(test_time()));
        let env = RegistrationEnvironment::new(
            store.clone(),
            store.clone(),
            notifier.clone(),
            clock.clone(),
            Arc::new(workflow),
        );
        Self {
            store,
            notifier,
            clock,
            service: RegistrationService::new(env),
        }
    }

    /// Harness for the standard workflow with the waitlist enabled
    #[must_use]
    pub fn standard() -> Self {
        Self::new(Workflow::standard(true))
    }

    /// Forbid principals from completing their own registrations
    #[must_use]
    pub fn prevent_complete_own(mut self) -> Self {
        self.service = self.service.with_prevent_complete_own(true);
        self
    }

    /// Store a host
    pub async fn add_host(&self, host: Host) -> Host {
        self.store.insert_host(host.clone()).await;
        host
    }

    /// Store a registration directly, bypassing validation
    pub async fn seed(
        &self,
        host_id: HostId,
        spaces: u32,
        status: RegistrationStatus,
    ) -> Registration {
        let registration = Registration::new(
            host_id,
            Registrant::anonymous(format!("{}@example.org", RegistrationId::new())),
            spaces,
            status,
            self.clock.now(),
        );
        self.seed_registration(registration).await
    }

    /// Store a prepared registration directly, bypassing validation
    pub async fn seed_registration(&self, registration: Registration) -> Registration {
        self.store.save(registration.clone()).await.unwrap();
        registration
    }

    /// Reload a registration
    pub async fn reload(&self, registration: &Registration) -> Option<Registration> {
        self.store.load(registration.id).await.unwrap()
    }
}
