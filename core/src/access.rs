//! Principals and the permissions checked against them.
//!
//! Permissions are plain strings. Override capabilities are permissions too;
//! no decision in this crate is based on role names.

use crate::types::{Registration, UserId};
use std::collections::BTreeSet;

/// Well-known permission names
pub mod permissions {
    /// Delete registrations and manage any of them
    pub const ADMINISTER: &str = "administer registration";

    /// Edit registrations the principal is not the registrant of
    pub const UPDATE_ANY: &str = "update any registration";

    /// Register while the host's registration status is disabled
    pub const OVERRIDE_STATUS: &str = "registration override status";

    /// Register before the open date
    pub const OVERRIDE_OPEN: &str = "registration override open";

    /// Register after the close date
    pub const OVERRIDE_CLOSE: &str = "registration override close";

    /// Register regardless of primary and waitlist capacity
    pub const OVERRIDE_CAPACITY: &str = "registration override capacity";

    /// Exceed the per-registration maximum spaces
    pub const OVERRIDE_MAXIMUM_SPACES: &str = "registration override maximum spaces";
}

/// An administrative override capability
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Override {
    /// Bypass the disabled status check
    Status,
    /// Bypass the open date
    Open,
    /// Bypass the close date
    Close,
    /// Bypass capacity and waitlist decisions
    Capacity,
    /// Bypass the per-registration maximum
    MaximumSpaces,
}

impl Override {
    /// Permission that grants this override
    #[must_use]
    pub const fn permission(&self) -> &'static str {
        match self {
            Self::Status => permissions::OVERRIDE_STATUS,
            Self::Open => permissions::OVERRIDE_OPEN,
            Self::Close => permissions::OVERRIDE_CLOSE,
            Self::Capacity => permissions::OVERRIDE_CAPACITY,
            Self::MaximumSpaces => permissions::OVERRIDE_MAXIMUM_SPACES,
        }
    }
}

/// The acting party of an operation.
///
/// Implemented by whatever the embedding application uses for accounts.
pub trait Principal: Send + Sync {
    /// Account id, `None` for anonymous principals
    fn id(&self) -> Option<UserId>;

    /// Returns true when the principal holds `permission`
    fn has_permission(&self, permission: &str) -> bool;

    /// Returns true when the principal holds the override
    fn can_override(&self, capability: Override) -> bool {
        self.has_permission(capability.permission())
    }

    /// Returns true when the principal is the registrant of `registration`
    fn is_registrant(&self, registration: &Registration) -> bool {
        self.id().is_some_and(|id| registration.is_registrant(id))
    }
}

/// A principal with an explicit permission set
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Account {
    id: Option<UserId>,
    permissions: BTreeSet<String>,
}

impl Account {
    /// Account for a user with no permissions
    #[must_use]
    pub const fn new(id: UserId) -> Self {
        Self {
            id: Some(id),
            permissions: BTreeSet::new(),
        }
    }

    /// Anonymous principal with no permissions
    #[must_use]
    pub const fn anonymous() -> Self {
        Self {
            id: None,
            permissions: BTreeSet::new(),
        }
    }

    /// Grants a permission
    #[must_use]
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    /// Grants several permissions
    #[must_use]
    pub fn with_permissions<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.permissions.extend(permissions.into_iter().map(Into::into));
        self
    }

    /// Grants an override capability
    #[must_use]
    pub fn with_override(self, capability: Override) -> Self {
        self.with_permission(capability.permission())
    }

    /// Revokes a permission
    pub fn revoke(&mut self, permission: &str) {
        self.permissions.remove(permission);
    }
}

impl Principal for Account {
    fn id(&self) -> Option<UserId> {
        self.id
    }

    fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HostId, Registrant, RegistrationStatus};
    use chrono::Utc;

    #[test]
    fn test_override_permissions() {
        let user = UserId::new();
        let account = Account::new(user).with_override(Override::Capacity);
        assert!(account.can_override(Override::Capacity));
        assert!(!account.can_override(Override::MaximumSpaces));
        assert!(account.has_permission("registration override capacity"));
    }

    #[test]
    fn test_anonymous_is_never_registrant() {
        let registration = Registration::new(
            HostId::new(),
            Registrant::anonymous("someone@example.org"),
            1,
            RegistrationStatus::Pending,
            Utc::now(),
        );
        assert!(!Account::anonymous().is_registrant(&registration));
    }

    #[test]
    fn test_registrant_match_by_user_id() {
        let user = UserId::new();
        let registration = Registration::new(
            HostId::new(),
            Registrant::user(user),
            1,
            RegistrationStatus::Pending,
            Utc::now(),
        );
        assert!(Account::new(user).is_registrant(&registration));
        assert!(!Account::new(UserId::new()).is_registrant(&registration));
    }
}
