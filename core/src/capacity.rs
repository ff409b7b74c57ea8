//! Capacity arithmetic.
//!
//! Remaining room is always derived from the repository's current totals,
//! never tracked incrementally.

use crate::repository::{RegistrationRepository, RepositoryError};
use crate::types::{Capacity, Host, HostId, RegistrationId, RegistrationStatus, StatusFilter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Remaining spaces under `capacity` with `reserved` already taken.
///
/// `None` means unlimited. Over-capacity hosts (after an administrative
/// override) report `Some(0)`, never a negative number.
#[must_use]
pub const fn spaces_remaining(capacity: Capacity, reserved: u32) -> Option<u32> {
    match capacity.limit() {
        None => None,
        Some(limit) => Some(limit.saturating_sub(reserved)),
    }
}

/// Returns true when `spaces` fit into `remaining`
#[must_use]
pub const fn fits(remaining: Option<u32>, spaces: u32) -> bool {
    match remaining {
        None => true,
        Some(remaining) => spaces <= remaining,
    }
}

/// Capacity figures for one pool of spaces
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolAvailability {
    /// Configured capacity
    pub capacity: Capacity,
    /// Spaces currently reserved
    pub reserved: u32,
    /// Spaces left, `None` when unlimited
    pub remaining: Option<u32>,
}

impl PoolAvailability {
    /// Computes the pool figures
    #[must_use]
    pub const fn new(capacity: Capacity, reserved: u32) -> Self {
        Self {
            capacity,
            reserved,
            remaining: spaces_remaining(capacity, reserved),
        }
    }
}

/// Snapshot of a host's primary and waitlist usage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostAvailability {
    /// Host the figures belong to
    pub host_id: HostId,
    /// Active registrations against primary capacity
    pub primary: PoolAvailability,
    /// Waitlisted registrations, `None` when the waitlist is disabled
    pub waitlist: Option<PoolAvailability>,
}

/// Computes remaining room from repository totals
#[derive(Clone)]
pub struct CapacityCalculator {
    repository: Arc<dyn RegistrationRepository>,
}

impl CapacityCalculator {
    /// Creates a new `CapacityCalculator`
    #[must_use]
    pub fn new(repository: Arc<dyn RegistrationRepository>) -> Self {
        Self { repository }
    }

    /// Spaces reserved by active registrations, skipping `exclude`.
    ///
    /// # Errors
    ///
    /// Returns error if the repository query fails.
    pub async fn active_spaces(
        &self,
        host_id: HostId,
        exclude: Option<RegistrationId>,
    ) -> Result<u32, RepositoryError> {
        self.repository
            .sum_spaces(host_id, StatusFilter::Active, exclude)
            .await
    }

    /// Spaces reserved by waitlisted registrations, skipping `exclude`.
    ///
    /// # Errors
    ///
    /// Returns error if the repository query fails.
    pub async fn waitlist_spaces(
        &self,
        host_id: HostId,
        exclude: Option<RegistrationId>,
    ) -> Result<u32, RepositoryError> {
        self.repository
            .sum_spaces(
                host_id,
                StatusFilter::Is(RegistrationStatus::Waitlist),
                exclude,
            )
            .await
    }

    /// Remaining primary room, `None` when unlimited.
    ///
    /// # Errors
    ///
    /// Returns error if the repository query fails.
    pub async fn primary_remaining(
        &self,
        host: &Host,
        exclude: Option<RegistrationId>,
    ) -> Result<Option<u32>, RepositoryError> {
        if host.settings.capacity.is_unlimited() {
            return Ok(None);
        }
        let reserved = self.active_spaces(host.id(), exclude).await?;
        Ok(spaces_remaining(host.settings.capacity, reserved))
    }

    /// Remaining waitlist room, `None` when unlimited.
    ///
    /// Callers check that the waitlist is enabled first.
    ///
    /// # Errors
    ///
    /// Returns error if the repository query fails.
    pub async fn waitlist_remaining(
        &self,
        host: &Host,
        exclude: Option<RegistrationId>,
    ) -> Result<Option<u32>, RepositoryError> {
        let capacity = host.settings.waitlist.capacity;
        if capacity.is_unlimited() {
            return Ok(None);
        }
        let reserved = self.waitlist_spaces(host.id(), exclude).await?;
        Ok(spaces_remaining(capacity, reserved))
    }

    /// Full usage snapshot for a host.
    ///
    /// # Errors
    ///
    /// Returns error if a repository query fails.
    pub async fn availability(&self, host: &Host) -> Result<HostAvailability, RepositoryError> {
        let primary = PoolAvailability::new(
            host.settings.capacity,
            self.active_spaces(host.id(), None).await?,
        );
        let waitlist = match host.settings.waitlist_capacity() {
            Some(capacity) => Some(PoolAvailability::new(
                capacity,
                self.waitlist_spaces(host.id(), None).await?,
            )),
            None => None,
        };

        Ok(HostAvailability {
            host_id: host.id(),
            primary,
            waitlist,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_unlimited_has_no_bound() {
        assert_eq!(spaces_remaining(Capacity::Unlimited, 0), None);
        assert_eq!(spaces_remaining(Capacity::Unlimited, 1_000), None);
    }

    #[test]
    fn test_over_capacity_reports_zero() {
        assert_eq!(spaces_remaining(Capacity::limited(5), 7), Some(0));
    }

    #[test]
    fn test_fits() {
        assert!(fits(None, u32::MAX));
        assert!(fits(Some(2), 2));
        assert!(!fits(Some(2), 3));
        assert!(!fits(Some(0), 1));
    }

    #[test]
    fn test_pool_availability() {
        let pool = PoolAvailability::new(Capacity::limited(10), 4);
        assert_eq!(pool.remaining, Some(6));
    }

    proptest! {
        #[test]
        fn prop_remaining_is_unlimited_iff_capacity_zero(
            capacity in 0u32..10_000,
            reserved in 0u32..20_000,
        ) {
            let remaining = spaces_remaining(Capacity::limited(capacity), reserved);
            if capacity == 0 {
                prop_assert_eq!(remaining, None);
            } else {
                let expected = i64::from(capacity) - i64::from(reserved);
                prop_assert_eq!(remaining.map(i64::from), Some(expected.max(0)));
            }
        }

        #[test]
        fn prop_remaining_never_exceeds_capacity(
            capacity in 1u32..10_000,
            reserved in 0u32..20_000,
        ) {
            let remaining = spaces_remaining(Capacity::limited(capacity), reserved);
            prop_assert!(remaining.is_some_and(|r| r <= capacity));
        }
    }
}
