//! # Registration Core
//!
//! Capacity, waitlist admission, autofill and workflow rules for event-style
//! registrations.
//!
//! ## Core Concepts
//!
//! - **Host**: the thing registered for, with its [`HostSettings`]
//! - **Registration**: a reservation of spaces in one [`RegistrationStatus`]
//! - **Admission**: admit directly, place on the waitlist, or reject
//! - **Autofill**: promote waitlisted registrations when room frees up
//! - **Workflow**: named, permission-gated transitions between statuses
//! - **Environment**: storage, clock and notifier injected via traits
//!
//! Validation failures come back as [`Violations`], never as errors.
//!
//! ## Example
//!
//! ```ignore
//! use registration_core::*;
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryRegistrationStore::new());
//! store.insert_host(Host::new(entity, HostSettings::default())).await;
//!
//! let env = RegistrationEnvironment::new(
//!     store.clone(),
//!     store,
//!     Arc::new(TracingNotifier),
//!     Arc::new(SystemClock),
//!     Arc::new(Workflow::standard(true)),
//! );
//! let service = RegistrationService::new(env);
//!
//! match service.register(host_id, RegistrationDraft::new(registrant, 2), &account).await? {
//!     Outcome::Accepted(registration) => println!("{}", registration.status),
//!     Outcome::Rejected(violations) => println!("{violations}"),
//! }
//! ```

pub mod access;
pub mod admission;
pub mod autofill;
pub mod capacity;
pub mod config;
pub mod environment;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod notify;
pub mod repository;
pub mod service;
pub mod types;
pub mod violation;
pub mod workflow;

pub use access::{Account, Override, Principal, permissions};
pub use admission::{
    Admission, AdmissionPolicy, AdmissionValidator, Assessment, Placement, RejectReason,
};
pub use autofill::{AutofillSummary, AutofillSweeper};
pub use capacity::{CapacityCalculator, HostAvailability, PoolAvailability, spaces_remaining};
pub use config::{Config, DatabaseConfig, RegistrationConfig};
pub use environment::{Clock, RegistrationEnvironment, SystemClock};
pub use error::RegistrationError;
pub use memory::InMemoryRegistrationStore;
pub use notify::{NotifierError, RegistrationEvent, RegistrationNotifier, TracingNotifier};
pub use repository::{
    HostGuard, HostLock, HostRepository, RegistrationRepository, RepositoryError,
};
pub use service::{HoldExpirySummary, HostLocks, Outcome, RegistrationDraft, RegistrationService};
pub use types::{
    AutofillSettings, Capacity, HoldExpiration, Host, HostEntity, HostId, HostSettings,
    Registrant, Registration, RegistrationId, RegistrationSort, RegistrationStatus, SortDirection,
    SortField, StatusFilter, UserId, WaitlistSettings, WindowState,
};
pub use violation::{Violation, ViolationCode, Violations};
pub use workflow::{
    Edge, Transition, TransitionConfig, TransitionId, TransitionValidator, Workflow,
    WorkflowConfig, WorkflowError,
};
