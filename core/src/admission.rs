//! Waitlist admission policy and registration validation.
//!
//! [`AdmissionPolicy`] answers "where would N more spaces go" for a host.
//! [`AdmissionValidator`] applies every registration constraint (status,
//! window, maximum spaces, duplicates, capacity) to a new or edited
//! registration and collects [`Violations`].

use crate::access::{Override, Principal};
use crate::capacity::{CapacityCalculator, fits};
use crate::environment::Clock;
use crate::repository::{RegistrationRepository, RepositoryError};
use crate::types::{Host, Registration, RegistrationId, WindowState};
use crate::violation::{ViolationCode, Violations};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Why a request for spaces cannot be accepted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Primary capacity exhausted and no waitlist
    InsufficientSpaces,
    /// Primary capacity and waitlist capacity both exhausted
    WaitlistFull,
}

/// Decision for a request of spaces
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Admission {
    /// Fits into primary capacity
    Admit,
    /// Goes onto the waitlist
    Waitlist,
    /// Cannot be accepted
    Reject(RejectReason),
}

/// Primary-then-waitlist admission decision
#[derive(Clone)]
pub struct AdmissionPolicy {
    calculator: CapacityCalculator,
}

impl AdmissionPolicy {
    /// Creates a new `AdmissionPolicy`
    #[must_use]
    pub const fn new(calculator: CapacityCalculator) -> Self {
        Self { calculator }
    }

    /// The underlying calculator
    #[must_use]
    pub const fn calculator(&self) -> &CapacityCalculator {
        &self.calculator
    }

    /// Returns true when `spaces` fit into primary capacity.
    ///
    /// # Errors
    ///
    /// Returns error if the repository query fails.
    pub async fn has_room_off_waitlist(
        &self,
        host: &Host,
        spaces: u32,
        exclude: Option<RegistrationId>,
    ) -> Result<bool, RepositoryError> {
        let remaining = self.calculator.primary_remaining(host, exclude).await?;
        Ok(fits(remaining, spaces))
    }

    /// Returns true when the waitlist is enabled and `spaces` fit on it.
    ///
    /// # Errors
    ///
    /// Returns error if the repository query fails.
    pub async fn has_room_on_waitlist(
        &self,
        host: &Host,
        spaces: u32,
        exclude: Option<RegistrationId>,
    ) -> Result<bool, RepositoryError> {
        if !host.settings.waitlist.enabled {
            return Ok(false);
        }
        let remaining = self.calculator.waitlist_remaining(host, exclude).await?;
        Ok(fits(remaining, spaces))
    }

    /// Decide where `spaces` go.
    ///
    /// Primary capacity first; the waitlist only when primary is exhausted and
    /// the waitlist is enabled.
    ///
    /// # Errors
    ///
    /// Returns error if a repository query fails.
    pub async fn decide(
        &self,
        host: &Host,
        spaces: u32,
        exclude: Option<RegistrationId>,
    ) -> Result<Admission, RepositoryError> {
        if self.has_room_off_waitlist(host, spaces, exclude).await? {
            return Ok(Admission::Admit);
        }
        if !host.settings.waitlist.enabled {
            return Ok(Admission::Reject(RejectReason::InsufficientSpaces));
        }
        if self.has_room_on_waitlist(host, spaces, exclude).await? {
            Ok(Admission::Waitlist)
        } else {
            Ok(Admission::Reject(RejectReason::WaitlistFull))
        }
    }

    /// Returns true when `spaces` should be placed on the waitlist.
    ///
    /// # Errors
    ///
    /// Returns error if a repository query fails.
    pub async fn should_waitlist(
        &self,
        host: &Host,
        spaces: u32,
        exclude: Option<RegistrationId>,
    ) -> Result<bool, RepositoryError> {
        Ok(self.decide(host, spaces, exclude).await? == Admission::Waitlist)
    }

    /// Returns true when `spaces` can be accepted directly or onto the waitlist.
    ///
    /// # Errors
    ///
    /// Returns error if a repository query fails.
    pub async fn has_room(
        &self,
        host: &Host,
        spaces: u32,
        exclude: Option<RegistrationId>,
    ) -> Result<bool, RepositoryError> {
        Ok(!matches!(
            self.decide(host, spaces, exclude).await?,
            Admission::Reject(_)
        ))
    }
}

/// Where a validated registration should be stored
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Capacity was not re-checked; keep the requested status
    Unchanged,
    /// Fits into primary capacity
    Direct,
    /// Goes onto the waitlist
    Waitlist,
}

/// Result of validating a registration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Assessment {
    /// Collected violations
    pub violations: Violations,
    /// Placement decided by the capacity check
    pub placement: Placement,
}

impl Assessment {
    /// No violations were found
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Applies registration constraints to new and edited registrations
#[derive(Clone)]
pub struct AdmissionValidator {
    policy: AdmissionPolicy,
    repository: Arc<dyn RegistrationRepository>,
    clock: Arc<dyn Clock>,
}

impl AdmissionValidator {
    /// Creates a new `AdmissionValidator`
    #[must_use]
    pub fn new(
        policy: AdmissionPolicy,
        repository: Arc<dyn RegistrationRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            policy,
            repository,
            clock,
        }
    }

    /// Validate `candidate` against `host`.
    ///
    /// `original` is the persisted record when `candidate` is an edit. An edit
    /// that keeps both spaces and status skips the capacity check; so does a
    /// status that does not count against any capacity.
    ///
    /// # Errors
    ///
    /// Returns error if a repository query fails. Constraint failures are
    /// returned as violations, not errors.
    #[tracing::instrument(
        skip(self, host, candidate, original, principal),
        fields(host_id = %host.id(), registration_id = %candidate.id)
    )]
    pub async fn validate(
        &self,
        host: &Host,
        candidate: &Registration,
        original: Option<&Registration>,
        principal: &dyn Principal,
    ) -> Result<Assessment, RepositoryError> {
        let mut violations = Violations::new();
        let settings = &host.settings;
        let label = host.label();
        let is_new = original.is_none();

        let spaces_increased =
            original.is_none_or(|o| candidate.spaces_reserved > o.spaces_reserved);
        // Moving into a pool the registration was not counted in before.
        let entering_pool = original.is_some_and(|o| {
            (!o.status.is_active() && candidate.status.is_active())
                || (!o.status.is_waitlisted() && candidate.status.is_waitlisted())
        });
        let counted = candidate.status.is_active() || candidate.status.is_waitlisted();
        // Reductions never need room, even on a host that is over capacity.
        let needs_capacity_check = counted && (spaces_increased || entering_pool);

        if candidate.spaces_reserved == 0 {
            violations.add(
                ViolationCode::InvalidSpaces,
                "At least one space must be reserved.",
                "spaces_reserved",
            );
        }

        if is_new || needs_capacity_check {
            Self::check_window(host, self.clock.now(), principal, &mut violations);
        }

        if spaces_increased
            && !settings.maximum_spaces.allows(candidate.spaces_reserved)
            && !principal.can_override(Override::MaximumSpaces)
        {
            violations.add(
                ViolationCode::MaximumSpacesExceeded,
                format!(
                    "You may not register for more than {} spaces.",
                    settings.maximum_spaces
                ),
                "spaces_reserved",
            );
        }

        if !settings.multiple_registrations && !candidate.status.is_canceled() {
            let registrant_changed = original.is_some_and(|o| {
                o.registrant != candidate.registrant || o.status.is_canceled()
            });
            if (is_new || registrant_changed)
                && self
                    .repository
                    .registrant_exists(host.id(), &candidate.registrant, Some(candidate.id))
                    .await?
            {
                violations.add(
                    ViolationCode::AlreadyRegistered,
                    format!("{} is already registered for {label}.", candidate.registrant),
                    "registrant",
                );
            }
        }

        let mut placement = Placement::Unchanged;
        if needs_capacity_check && candidate.spaces_reserved > 0 {
            placement = self
                .check_capacity(host, candidate, is_new, principal, &mut violations)
                .await?;
        }

        if !violations.is_empty() {
            tracing::debug!(violations = %violations, "Registration failed validation");
        }

        Ok(Assessment {
            violations,
            placement,
        })
    }

    fn check_window(
        host: &Host,
        now: chrono::DateTime<chrono::Utc>,
        principal: &dyn Principal,
        violations: &mut Violations,
    ) {
        let label = host.label();
        if !host.settings.enabled && !principal.can_override(Override::Status) {
            violations.add(
                ViolationCode::Disabled,
                format!("Registration for {label} is disabled."),
                "",
            );
        }
        match host.settings.window(now) {
            WindowState::NotOpenYet if !principal.can_override(Override::Open) => {
                violations.add(
                    ViolationCode::NotOpenYet,
                    format!("Registration for {label} is not open yet."),
                    "",
                );
            }
            WindowState::Closed if !principal.can_override(Override::Close) => {
                violations.add(
                    ViolationCode::Closed,
                    format!("Registration for {label} is closed."),
                    "",
                );
            }
            _ => {}
        }
    }

    async fn check_capacity(
        &self,
        host: &Host,
        candidate: &Registration,
        is_new: bool,
        principal: &dyn Principal,
        violations: &mut Violations,
    ) -> Result<Placement, RepositoryError> {
        if principal.can_override(Override::Capacity) {
            return Ok(Placement::Direct);
        }

        let label = host.label();
        let spaces = candidate.spaces_reserved;
        let exclude = if is_new { None } else { Some(candidate.id) };

        // An edit or transition that ends on the waitlist only needs waitlist room.
        if !is_new && candidate.status.is_waitlisted() {
            if self.policy.has_room_on_waitlist(host, spaces, exclude).await? {
                return Ok(Placement::Waitlist);
            }
            violations.add(
                ViolationCode::WaitlistFull,
                format!("Sorry, unable to register for {label} due to: the wait list is full."),
                "spaces_reserved",
            );
            return Ok(Placement::Unchanged);
        }

        let placement = match self.policy.decide(host, spaces, exclude).await? {
            Admission::Admit => Placement::Direct,
            Admission::Waitlist if is_new => Placement::Waitlist,
            Admission::Reject(RejectReason::WaitlistFull) if is_new => {
                violations.add(
                    ViolationCode::WaitlistFull,
                    format!("Sorry, unable to register for {label} due to: the wait list is full."),
                    "spaces_reserved",
                );
                Placement::Unchanged
            }
            Admission::Waitlist | Admission::Reject(_) => {
                violations.add(
                    ViolationCode::InsufficientSpaces,
                    format!(
                        "Sorry, unable to register for {label} due to: \
                         insufficient spaces remaining."
                    ),
                    "spaces_reserved",
                );
                Placement::Unchanged
            }
        };

        Ok(placement)
    }
}
