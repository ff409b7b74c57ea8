//! Registration service.
//!
//! Composes capacity, admission, workflow and autofill over the injected
//! [`RegistrationEnvironment`]. Every read-decide-write sequence for a host
//! runs under that host's lock, so concurrent admissions on one host are
//! serialized. The default [`HostLocks`] covers one process; storage shared
//! between processes needs a wider [`HostLock`] through
//! [`RegistrationService::with_locks`].

use crate::access::{Principal, permissions};
use crate::admission::{AdmissionPolicy, AdmissionValidator, Placement};
use crate::autofill::{AutofillSummary, AutofillSweeper};
use crate::capacity::{CapacityCalculator, HostAvailability};
use crate::environment::RegistrationEnvironment;
use crate::error::{RegistrationError, Result};
use crate::metrics;
use crate::notify::{RegistrationEvent, dispatch};
use crate::repository::{HostGuard, HostLock, RepositoryError};
use crate::types::{
    Host, HostId, Registrant, Registration, RegistrationId, RegistrationSort, RegistrationStatus,
    StatusFilter, UserId,
};
use crate::violation::Violations;
use crate::workflow::{TransitionId, TransitionValidator};
use futures::future::BoxFuture;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

/// Input for a new registration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistrationDraft {
    /// Who the registration is for
    pub registrant: Registrant,
    /// Spaces requested
    pub spaces: u32,
    /// Who is creating it; defaults to the acting principal
    pub author: Option<UserId>,
}

impl RegistrationDraft {
    /// Creates a new draft
    #[must_use]
    pub const fn new(registrant: Registrant, spaces: u32) -> Self {
        Self {
            registrant,
            spaces,
            author: None,
        }
    }

    /// Sets the author
    #[must_use]
    pub const fn by(mut self, author: UserId) -> Self {
        self.author = Some(author);
        self
    }
}

/// Result of an operation that can fail validation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Stored
    Accepted(Registration),
    /// Not stored; the violations explain why
    Rejected(Violations),
}

impl Outcome {
    /// The operation was applied
    #[must_use]
    pub const fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// The stored registration, if accepted
    #[must_use]
    pub const fn registration(&self) -> Option<&Registration> {
        match self {
            Self::Accepted(registration) => Some(registration),
            Self::Rejected(_) => None,
        }
    }

    /// The violations, if rejected
    #[must_use]
    pub const fn violations(&self) -> Option<&Violations> {
        match self {
            Self::Accepted(_) => None,
            Self::Rejected(violations) => Some(violations),
        }
    }
}

/// Per-host async mutexes, exclusive within one process.
///
/// Entries nobody holds or waits on are dropped on the next lock call.
#[derive(Default)]
pub struct HostLocks {
    locks: Mutex<HashMap<HostId, Arc<tokio::sync::Mutex<()>>>>,
}

impl HostLocks {
    /// Creates an empty lock table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex_for(&self, host_id: HostId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the table's own reference left means the entry is idle.
        locks.retain(|id, mutex| *id == host_id || Arc::strong_count(mutex) > 1);
        Arc::clone(locks.entry(host_id).or_default())
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl HostLock for HostLocks {
    fn lock(
        &self,
        host_id: HostId,
    ) -> BoxFuture<'_, std::result::Result<HostGuard, RepositoryError>> {
        let mutex = self.mutex_for(host_id);
        Box::pin(async move { Ok(HostGuard::new(mutex.lock_owned().await)) })
    }
}

/// What a hold expiry sweep changed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HoldExpirySummary {
    /// Held registrations that were canceled
    pub expired: Vec<RegistrationId>,
    /// Promotions triggered by the freed room
    pub autofill: AutofillSummary,
}

/// Registration operations over injected storage, clock and notifier
#[derive(Clone)]
pub struct RegistrationService {
    env: RegistrationEnvironment,
    calculator: CapacityCalculator,
    validator: AdmissionValidator,
    transitions: TransitionValidator,
    sweeper: AutofillSweeper,
    locks: Arc<dyn HostLock>,
}

impl RegistrationService {
    /// Creates a new `RegistrationService`
    #[must_use]
    pub fn new(env: RegistrationEnvironment) -> Self {
        let calculator = CapacityCalculator::new(Arc::clone(&env.registrations));
        let policy = AdmissionPolicy::new(calculator.clone());
        let validator = AdmissionValidator::new(
            policy.clone(),
            Arc::clone(&env.registrations),
            Arc::clone(&env.clock),
        );
        let sweeper = AutofillSweeper::new(
            policy,
            Arc::clone(&env.registrations),
            Arc::clone(&env.notifier),
            Arc::clone(&env.clock),
        );
        let transitions = TransitionValidator::new(Arc::clone(&env.workflow));

        Self {
            env,
            calculator,
            validator,
            transitions,
            sweeper,
            locks: Arc::new(HostLocks::new()),
        }
    }

    /// Forbid principals from completing registrations they are the registrant of
    #[must_use]
    pub fn with_prevent_complete_own(mut self, prevent: bool) -> Self {
        self.transitions = self.transitions.with_prevent_complete_own(prevent);
        self
    }

    /// Replace the host lock, e.g. to share one table between services or to
    /// serialize across processes through the database
    #[must_use]
    pub fn with_locks(mut self, locks: Arc<dyn HostLock>) -> Self {
        self.locks = locks;
        self
    }

    /// The injected dependencies
    #[must_use]
    pub const fn environment(&self) -> &RegistrationEnvironment {
        &self.env
    }

    /// The admission validator
    #[must_use]
    pub const fn validator(&self) -> &AdmissionValidator {
        &self.validator
    }

    /// The transition validator
    #[must_use]
    pub const fn transition_validator(&self) -> &TransitionValidator {
        &self.transitions
    }

    /// Load a host and its settings.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::HostNotFound`] or
    /// [`RegistrationError::MissingSettings`].
    pub async fn load_host(&self, host_id: HostId) -> Result<Host> {
        let entity = self
            .env
            .hosts
            .load_host(host_id)
            .await?
            .ok_or(RegistrationError::HostNotFound(host_id))?;
        let Some(settings) = self.env.hosts.load_settings(host_id).await? else {
            tracing::error!(
                host_id = %host_id,
                kind = %entity.kind,
                "Host has no registration settings"
            );
            return Err(RegistrationError::MissingSettings(host_id));
        };
        Ok(Host::new(entity, settings))
    }

    async fn load_registration(&self, id: RegistrationId) -> Result<Registration> {
        self.env
            .registrations
            .load(id)
            .await?
            .ok_or(RegistrationError::RegistrationNotFound(id))
    }

    /// Lock the registration's host, then reload the registration under the lock
    async fn lock_registration(
        &self,
        id: RegistrationId,
    ) -> Result<(HostGuard, Registration)> {
        let host_id = self.load_registration(id).await?.host_id;
        let guard = self.locks.lock(host_id).await?;
        let registration = self.load_registration(id).await?;
        Ok((guard, registration))
    }

    /// Create a registration.
    ///
    /// Admits directly, places on the waitlist, or rejects with violations.
    ///
    /// # Errors
    ///
    /// Returns error if the host is missing or misconfigured, or storage fails.
    #[tracing::instrument(
        skip(self, draft, principal),
        fields(host_id = %host_id, spaces = draft.spaces)
    )]
    pub async fn register(
        &self,
        host_id: HostId,
        draft: RegistrationDraft,
        principal: &dyn Principal,
    ) -> Result<Outcome> {
        let _guard = self.locks.lock(host_id).await?;
        let host = self.load_host(host_id).await?;

        let mut registration = Registration::new(
            host_id,
            draft.registrant,
            draft.spaces,
            RegistrationStatus::Pending,
            self.env.clock.now(),
        )
        .with_author(draft.author.or_else(|| principal.id()));

        let assessment = self
            .validator
            .validate(&host, &registration, None, principal)
            .await?;
        if !assessment.is_valid() {
            metrics::record_admission("rejected");
            tracing::info!(violations = %assessment.violations, "Registration rejected");
            return Ok(Outcome::Rejected(assessment.violations));
        }

        if assessment.placement == Placement::Waitlist {
            registration.status = RegistrationStatus::Waitlist;
        }
        self.env.registrations.save(registration.clone()).await?;

        let event = if registration.status.is_waitlisted() {
            metrics::record_admission("waitlisted");
            RegistrationEvent::Waitlisted {
                registration: registration.clone(),
            }
        } else {
            metrics::record_admission("admitted");
            RegistrationEvent::Admitted {
                registration: registration.clone(),
            }
        };
        tracing::info!(
            registration_id = %registration.id,
            status = %registration.status,
            "Registration accepted"
        );
        dispatch(self.env.notifier.as_ref(), event).await;

        Ok(Outcome::Accepted(registration))
    }

    /// Change the number of spaces a registration holds.
    ///
    /// Unchanged spaces are accepted as-is. A decrease on an active
    /// registration frees room and triggers autofill.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::AccessDenied`] unless the principal is the
    /// registrant or may update any registration; storage and configuration
    /// errors propagate.
    #[tracing::instrument(skip(self, principal), fields(registration_id = %id))]
    pub async fn update_spaces(
        &self,
        id: RegistrationId,
        spaces: u32,
        principal: &dyn Principal,
    ) -> Result<Outcome> {
        let (_guard, original) = self.lock_registration(id).await?;
        Self::ensure_can_update(&original, principal)?;
        if original.spaces_reserved == spaces {
            return Ok(Outcome::Accepted(original));
        }
        let host = self.load_host(original.host_id).await?;

        let mut candidate = original.clone();
        candidate.spaces_reserved = spaces;
        candidate.changed = self.env.clock.now();

        let assessment = self
            .validator
            .validate(&host, &candidate, Some(&original), principal)
            .await?;
        if !assessment.is_valid() {
            return Ok(Outcome::Rejected(assessment.violations));
        }

        self.env.registrations.save(candidate.clone()).await?;
        dispatch(
            self.env.notifier.as_ref(),
            RegistrationEvent::SpacesChanged {
                registration: candidate.clone(),
                previous: original.spaces_reserved,
            },
        )
        .await;

        if original.status.is_active() && spaces < original.spaces_reserved {
            self.sweeper.autofill(&host).await?;
        }

        Ok(Outcome::Accepted(candidate))
    }

    /// Move a registration to a different registrant.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::AccessDenied`] unless the principal may
    /// update any registration; storage and configuration errors propagate.
    #[tracing::instrument(skip(self, registrant, principal), fields(registration_id = %id))]
    pub async fn reassign(
        &self,
        id: RegistrationId,
        registrant: Registrant,
        principal: &dyn Principal,
    ) -> Result<Outcome> {
        if !principal.has_permission(permissions::UPDATE_ANY)
            && !principal.has_permission(permissions::ADMINISTER)
        {
            return Err(RegistrationError::AccessDenied(format!(
                "missing permission \"{}\"",
                permissions::UPDATE_ANY
            )));
        }

        let (_guard, original) = self.lock_registration(id).await?;
        if original.registrant == registrant {
            return Ok(Outcome::Accepted(original));
        }
        let host = self.load_host(original.host_id).await?;

        let mut candidate = original.clone();
        candidate.registrant = registrant;
        candidate.changed = self.env.clock.now();

        let assessment = self
            .validator
            .validate(&host, &candidate, Some(&original), principal)
            .await?;
        if !assessment.is_valid() {
            return Ok(Outcome::Rejected(assessment.violations));
        }

        self.env.registrations.save(candidate.clone()).await?;
        dispatch(
            self.env.notifier.as_ref(),
            RegistrationEvent::Reassigned {
                registration: candidate.clone(),
                previous: original.registrant,
            },
        )
        .await;

        Ok(Outcome::Accepted(candidate))
    }

    /// Apply a workflow transition.
    ///
    /// Moving into an active status re-checks capacity. Leaving an active
    /// status frees room and triggers autofill.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::TransitionNotAllowed`] when the workflow
    /// has no such edge, [`RegistrationError::AccessDenied`] when the principal
    /// may not use it; storage and configuration errors propagate.
    #[tracing::instrument(
        skip(self, principal),
        fields(registration_id = %id, transition = %transition)
    )]
    pub async fn transition(
        &self,
        id: RegistrationId,
        transition: &TransitionId,
        principal: &dyn Principal,
    ) -> Result<Outcome> {
        let (_guard, original) = self.lock_registration(id).await?;
        let host = self.load_host(original.host_id).await?;
        let to = self.transitions.resolve(&original, transition, principal)?.to;

        let mut candidate = original.clone();
        candidate.status = to;
        candidate.changed = self.env.clock.now();

        let assessment = self
            .validator
            .validate(&host, &candidate, Some(&original), principal)
            .await?;
        if !assessment.is_valid() {
            return Ok(Outcome::Rejected(assessment.violations));
        }

        self.env.registrations.save(candidate.clone()).await?;
        metrics::record_transition(transition.as_str());
        tracing::info!(
            from = %original.status,
            to = %candidate.status,
            "Registration transitioned"
        );
        dispatch(
            self.env.notifier.as_ref(),
            RegistrationEvent::Transitioned {
                registration: candidate.clone(),
                transition: transition.clone(),
                from: original.status,
            },
        )
        .await;

        if original.status.is_active() && !candidate.status.is_active() {
            self.sweeper.autofill(&host).await?;
        }

        Ok(Outcome::Accepted(candidate))
    }

    /// Transitions the principal may apply to a registration right now.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::RegistrationNotFound`] or a storage error.
    pub async fn valid_transitions(
        &self,
        id: RegistrationId,
        principal: &dyn Principal,
    ) -> Result<BTreeSet<TransitionId>> {
        let registration = self.load_registration(id).await?;
        Ok(self.transitions.valid_transitions(&registration, principal))
    }

    /// Remove a registration.
    ///
    /// Deleting an active registration triggers autofill.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::AccessDenied`] without the administer
    /// permission; storage errors propagate.
    #[tracing::instrument(skip(self, principal), fields(registration_id = %id))]
    pub async fn delete(
        &self,
        id: RegistrationId,
        principal: &dyn Principal,
    ) -> Result<Registration> {
        if !principal.has_permission(permissions::ADMINISTER) {
            return Err(RegistrationError::AccessDenied(format!(
                "missing permission \"{}\"",
                permissions::ADMINISTER
            )));
        }

        let (_guard, registration) = self.lock_registration(id).await?;
        if !self.env.registrations.delete(id).await? {
            return Err(RegistrationError::RegistrationNotFound(id));
        }
        tracing::info!(host_id = %registration.host_id, "Registration deleted");
        dispatch(
            self.env.notifier.as_ref(),
            RegistrationEvent::Deleted {
                registration: registration.clone(),
            },
        )
        .await;

        if registration.status.is_active() {
            match self.load_host(registration.host_id).await {
                Ok(host) => {
                    self.sweeper.autofill(&host).await?;
                }
                Err(error) => {
                    tracing::warn!(error = %error, "Skipping autofill after delete");
                }
            }
        }

        Ok(registration)
    }

    /// Cancel held registrations whose hold has expired, then autofill.
    ///
    /// A hold expires once `changed` is at least the host's hold expiration in
    /// the past.
    ///
    /// # Errors
    ///
    /// Returns error if the host is missing or misconfigured, or storage fails.
    #[tracing::instrument(skip(self), fields(host_id = %host_id))]
    pub async fn expire_holds(&self, host_id: HostId) -> Result<HoldExpirySummary> {
        let _guard = self.locks.lock(host_id).await?;
        let host = self.load_host(host_id).await?;

        let mut summary = HoldExpirySummary {
            expired: Vec::new(),
            autofill: AutofillSummary::empty(host_id),
        };
        let Some(expiration) = host.settings.hold_expiration else {
            return Ok(summary);
        };

        let now = self.env.clock.now();
        let cutoff = now - expiration.duration();
        let held = self
            .env
            .registrations
            .list(
                host_id,
                StatusFilter::Is(RegistrationStatus::Held),
                RegistrationSort::default(),
            )
            .await?;

        for mut registration in held.into_iter().filter(|r| r.changed <= cutoff) {
            registration.status = RegistrationStatus::Canceled;
            registration.changed = now;
            self.env.registrations.save(registration.clone()).await?;
            summary.expired.push(registration.id);
            dispatch(
                self.env.notifier.as_ref(),
                RegistrationEvent::HoldExpired { registration },
            )
            .await;
        }

        if !summary.expired.is_empty() {
            let count = u32::try_from(summary.expired.len()).unwrap_or(u32::MAX);
            metrics::record_holds_expired(count);
            tracing::info!(expired = count, "Expired held registrations");
            summary.autofill = self.sweeper.autofill(&host).await?;
        }

        Ok(summary)
    }

    /// Run an autofill sweep for a host.
    ///
    /// # Errors
    ///
    /// Returns error if the host is missing or misconfigured, or storage fails.
    pub async fn autofill(&self, host_id: HostId) -> Result<AutofillSummary> {
        let _guard = self.locks.lock(host_id).await?;
        let host = self.load_host(host_id).await?;
        Ok(self.sweeper.autofill(&host).await?)
    }

    /// Current primary and waitlist usage for a host.
    ///
    /// # Errors
    ///
    /// Returns error if the host is missing or misconfigured, or storage fails.
    pub async fn availability(&self, host_id: HostId) -> Result<HostAvailability> {
        let host = self.load_host(host_id).await?;
        let availability = self.calculator.availability(&host).await?;
        if let Some(remaining) = availability.primary.remaining {
            metrics::update_spaces_remaining(&host_id.to_string(), remaining);
        }
        Ok(availability)
    }

    fn ensure_can_update(registration: &Registration, principal: &dyn Principal) -> Result<()> {
        if principal.is_registrant(registration)
            || principal.has_permission(permissions::UPDATE_ANY)
            || principal.has_permission(permissions::ADMINISTER)
        {
            Ok(())
        } else {
            Err(RegistrationError::AccessDenied(format!(
                "missing permission \"{}\"",
                permissions::UPDATE_ANY
            )))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_host_locks_drop_idle_entries() {
        let locks = HostLocks::new();
        let first = HostId::new();

        let guard = locks.lock(first).await.unwrap();
        for _ in 0..5 {
            drop(locks.lock(HostId::new()).await.unwrap());
        }
        // The held host stays, plus the one just locked.
        assert_eq!(locks.tracked(), 2);

        drop(guard);
        drop(locks.lock(HostId::new()).await.unwrap());
        assert_eq!(locks.tracked(), 1);
    }

    #[tokio::test]
    async fn test_host_locks_exclude_same_host_only() {
        let locks = Arc::new(HostLocks::new());
        let host = HostId::new();
        let guard = locks.lock(host).await.unwrap();

        let other = locks.lock(HostId::new());
        assert!(tokio::time::timeout(Duration::from_millis(50), other).await.is_ok());

        let waiting = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.lock(host).await.map(drop) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(guard);
        waiting.await.unwrap().unwrap();
    }
}
