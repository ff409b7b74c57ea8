//! Storage traits consumed by the admission rules.
//!
//! The rules only need two query shapes beyond plain load/save:
//!
//! - sum `spaces_reserved` for a host over a set of statuses, optionally
//!   excluding one registration ([`RegistrationRepository::sum_spaces`])
//! - list a host's registrations in a set of statuses, sorted
//!   ([`RegistrationRepository::list`])
//!
//! Traits return boxed futures so they stay object-safe and can be injected as
//! `Arc<dyn ...>`.

use crate::types::{
    HostEntity, HostId, HostSettings, Registrant, Registration, RegistrationId, RegistrationSort,
    StatusFilter,
};
use futures::future::BoxFuture;
use thiserror::Error;

/// Errors raised by storage adapters
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Database connection or query failed
    #[error("Database error: {0}")]
    Database(String),

    /// Stored data could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Lookup of hosts and their registration settings
pub trait HostRepository: Send + Sync {
    /// Load a host entity.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying store fails.
    fn load_host(&self, id: HostId) -> BoxFuture<'_, Result<Option<HostEntity>, RepositoryError>>;

    /// Load the registration settings attached to a host.
    ///
    /// A host without settings is not configured for registration.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying store fails.
    fn load_settings(
        &self,
        id: HostId,
    ) -> BoxFuture<'_, Result<Option<HostSettings>, RepositoryError>>;
}

/// Persistence of registrations
pub trait RegistrationRepository: Send + Sync {
    /// Load a registration by id.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying store fails.
    fn load(&self, id: RegistrationId)
    -> BoxFuture<'_, Result<Option<Registration>, RepositoryError>>;

    /// Insert or replace a registration.
    ///
    /// New registrations are appended after every existing one, which defines
    /// the insertion order used to break sort ties.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying store fails.
    fn save(&self, registration: Registration) -> BoxFuture<'_, Result<(), RepositoryError>>;

    /// Remove a registration. Returns false when it did not exist.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying store fails.
    fn delete(&self, id: RegistrationId) -> BoxFuture<'_, Result<bool, RepositoryError>>;

    /// Sum `spaces_reserved` over a host's registrations matching `filter`,
    /// skipping `exclude`.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying store fails.
    fn sum_spaces(
        &self,
        host_id: HostId,
        filter: StatusFilter,
        exclude: Option<RegistrationId>,
    ) -> BoxFuture<'_, Result<u32, RepositoryError>>;

    /// List a host's registrations matching `filter`, ordered by `sort` with
    /// ties in insertion order.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying store fails.
    fn list(
        &self,
        host_id: HostId,
        filter: StatusFilter,
        sort: RegistrationSort,
    ) -> BoxFuture<'_, Result<Vec<Registration>, RepositoryError>>;

    /// Returns true when `registrant` already holds a non-canceled
    /// registration for the host, skipping `exclude`.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying store fails.
    fn registrant_exists<'a>(
        &'a self,
        host_id: HostId,
        registrant: &'a Registrant,
        exclude: Option<RegistrationId>,
    ) -> BoxFuture<'a, Result<bool, RepositoryError>>;
}

/// Exclusive access to one host, released on drop
pub struct HostGuard(Box<dyn Send>);

impl HostGuard {
    /// Wrap whatever keeps the lock held
    #[must_use]
    pub fn new(held: impl Send + 'static) -> Self {
        Self(Box::new(held))
    }
}

impl std::fmt::Debug for HostGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HostGuard")
    }
}

/// Serializes read-decide-write sequences per host.
///
/// Implementations decide how far the exclusion reaches: one process
/// ([`HostLocks`](crate::service::HostLocks)) or every process sharing a
/// database.
pub trait HostLock: Send + Sync {
    /// Wait for exclusive access to `host_id`.
    ///
    /// # Errors
    ///
    /// Returns error if the lock cannot be acquired from the backing store.
    fn lock(&self, host_id: HostId) -> BoxFuture<'_, Result<HostGuard, RepositoryError>>;
}
