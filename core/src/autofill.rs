//! Waitlist autofill.
//!
//! When primary room frees up, waitlisted registrations are promoted in the
//! host's configured order until the room is gone again.

use crate::admission::AdmissionPolicy;
use crate::capacity::fits;
use crate::environment::Clock;
use crate::metrics;
use crate::notify::{RegistrationEvent, RegistrationNotifier, dispatch};
use crate::repository::{RegistrationRepository, RepositoryError};
use crate::types::{Host, HostId, RegistrationId, RegistrationStatus, StatusFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What a sweep promoted
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutofillSummary {
    /// Host swept
    pub host_id: HostId,
    /// Promoted registrations in promotion order
    pub promoted: Vec<RegistrationId>,
    /// Total spaces promoted
    pub spaces: u32,
}

impl AutofillSummary {
    /// Summary of a sweep that moved nothing
    #[must_use]
    pub const fn empty(host_id: HostId) -> Self {
        Self {
            host_id,
            promoted: Vec::new(),
            spaces: 0,
        }
    }

    /// Number of promoted registrations
    #[must_use]
    pub fn registrations(&self) -> u32 {
        u32::try_from(self.promoted.len()).unwrap_or(u32::MAX)
    }

    /// Nothing was promoted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.promoted.is_empty()
    }
}

/// Promotes waitlisted registrations into freed primary room
#[derive(Clone)]
pub struct AutofillSweeper {
    policy: AdmissionPolicy,
    repository: Arc<dyn RegistrationRepository>,
    notifier: Arc<dyn RegistrationNotifier>,
    clock: Arc<dyn Clock>,
}

impl AutofillSweeper {
    /// Creates a new `AutofillSweeper`
    #[must_use]
    pub fn new(
        policy: AdmissionPolicy,
        repository: Arc<dyn RegistrationRepository>,
        notifier: Arc<dyn RegistrationNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            policy,
            repository,
            notifier,
            clock,
        }
    }

    /// Sweep the host's waitlist.
    ///
    /// Does nothing unless autofill is configured, the host is open and some
    /// primary room remains. Primary room is re-queried after every promotion.
    /// Callers serialize sweeps per host.
    ///
    /// # Errors
    ///
    /// Returns error if a repository query or save fails. Registrations
    /// promoted before the failure stay promoted.
    #[tracing::instrument(skip(self, host), fields(host_id = %host.id()))]
    pub async fn autofill(&self, host: &Host) -> Result<AutofillSummary, RepositoryError> {
        let mut summary = AutofillSummary::empty(host.id());
        let settings = &host.settings;

        let Some(autofill) = settings.waitlist.autofill.filter(|_| settings.waitlist.enabled) else {
            return Ok(summary);
        };
        if !autofill.target.is_active() {
            tracing::warn!(
                target_status = %autofill.target,
                "Autofill target does not count against capacity; skipping"
            );
            return Ok(summary);
        }
        if !settings.is_open(self.clock.now()) {
            tracing::debug!("Host is not open; skipping autofill");
            return Ok(summary);
        }

        let calculator = self.policy.calculator();
        if calculator.primary_remaining(host, None).await? == Some(0) {
            return Ok(summary);
        }

        let waitlisted = self
            .repository
            .list(
                host.id(),
                StatusFilter::Is(RegistrationStatus::Waitlist),
                autofill.sort,
            )
            .await?;

        for mut registration in waitlisted {
            let remaining = calculator.primary_remaining(host, None).await?;
            if remaining == Some(0) {
                break;
            }
            if !fits(remaining, registration.spaces_reserved) {
                continue;
            }

            dispatch(
                self.notifier.as_ref(),
                RegistrationEvent::BeforeAutofill {
                    registration: registration.clone(),
                },
            )
            .await;

            registration.status = autofill.target;
            registration.changed = self.clock.now();
            self.repository.save(registration.clone()).await?;

            metrics::record_autofill_promotion(registration.spaces_reserved);
            tracing::debug!(
                registration_id = %registration.id,
                spaces = registration.spaces_reserved,
                "Promoted registration off the wait list"
            );

            summary.spaces = summary.spaces.saturating_add(registration.spaces_reserved);
            summary.promoted.push(registration.id);

            dispatch(
                self.notifier.as_ref(),
                RegistrationEvent::Autofilled { registration },
            )
            .await;
        }

        if !summary.is_empty() {
            tracing::info!(
                registrations = summary.registrations(),
                spaces = summary.spaces,
                "Autofill moved registrations off the wait list"
            );
            dispatch(
                self.notifier.as_ref(),
                RegistrationEvent::AutofillCompleted {
                    host_id: host.id(),
                    registrations: summary.registrations(),
                    spaces: summary.spaces,
                },
            )
            .await;
        }

        Ok(summary)
    }
}
