//! Domain types for registration admission.
//!
//! Hosts are the things people register for (an event, a session, a profile).
//! Registrations reserve one or more spaces against a host and always sit in
//! exactly one [`RegistrationStatus`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a registration host
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HostId(Uuid);

impl HostId {
    /// Creates a new random `HostId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `HostId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for HostId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a registration
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegistrationId(Uuid);

impl RegistrationId {
    /// Creates a new random `RegistrationId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `RegistrationId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RegistrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a user account
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random `UserId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `UserId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Capacity
// ============================================================================

/// An optional upper bound on spaces.
///
/// Used for primary capacity, waitlist capacity and the per-registration
/// maximum. Configuration values of `0` map to [`Capacity::Unlimited`] and
/// serialize back to `0`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum Capacity {
    /// No bound
    #[default]
    Unlimited,
    /// At most this many spaces
    Limited(NonZeroU32),
}

impl Capacity {
    /// Creates a bounded capacity; `0` means unlimited.
    #[must_use]
    pub const fn limited(value: u32) -> Self {
        match NonZeroU32::new(value) {
            Some(limit) => Self::Limited(limit),
            None => Self::Unlimited,
        }
    }

    /// Creates an unlimited capacity
    #[must_use]
    pub const fn unlimited() -> Self {
        Self::Unlimited
    }

    /// Returns the numeric bound, or `None` when unlimited
    #[must_use]
    pub const fn limit(&self) -> Option<u32> {
        match self {
            Self::Unlimited => None,
            Self::Limited(limit) => Some(limit.get()),
        }
    }

    /// Returns true when there is no bound
    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }

    /// Returns true when `spaces` does not exceed the bound
    #[must_use]
    pub const fn allows(&self, spaces: u32) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Limited(limit) => spaces <= limit.get(),
        }
    }
}

impl From<u32> for Capacity {
    fn from(value: u32) -> Self {
        Self::limited(value)
    }
}

impl From<Capacity> for u32 {
    fn from(capacity: Capacity) -> Self {
        capacity.limit().unwrap_or(0)
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => write!(f, "unlimited"),
            Self::Limited(limit) => write!(f, "{limit}"),
        }
    }
}

// ============================================================================
// Registration status
// ============================================================================

/// Workflow state of a registration
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationStatus {
    /// Submitted, awaiting completion
    Pending,
    /// Temporarily holding spaces
    Held,
    /// Confirmed
    Complete,
    /// Canceled; frees its spaces
    Canceled,
    /// Queued behind primary capacity
    Waitlist,
}

impl RegistrationStatus {
    /// Every status, in declaration order
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Held,
        Self::Complete,
        Self::Canceled,
        Self::Waitlist,
    ];

    /// Machine name used in storage and permission strings
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Held => "held",
            Self::Complete => "complete",
            Self::Canceled => "canceled",
            Self::Waitlist => "waitlist",
        }
    }

    /// Human readable label
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Held => "Held",
            Self::Complete => "Complete",
            Self::Canceled => "Canceled",
            Self::Waitlist => "Wait list",
        }
    }

    /// Counts against primary capacity
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Held | Self::Complete)
    }

    /// Canceled registrations never count against anything
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Holds expire after the host's hold expiration
    #[must_use]
    pub const fn is_held(&self) -> bool {
        matches!(self, Self::Held)
    }

    /// Counts against waitlist capacity
    #[must_use]
    pub const fn is_waitlisted(&self) -> bool {
        matches!(self, Self::Waitlist)
    }
}

impl fmt::Display for RegistrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown status name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown registration status: {0}")]
pub struct ParseStatusError(pub String);

impl FromStr for RegistrationStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

/// Which statuses a space or listing query covers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusFilter {
    /// Pending, held and complete
    Active,
    /// Exactly one status
    Is(RegistrationStatus),
}

impl StatusFilter {
    /// Returns true when `status` is covered by the filter
    #[must_use]
    pub const fn matches(&self, status: RegistrationStatus) -> bool {
        match self {
            Self::Active => status.is_active(),
            Self::Is(expected) => *expected as u8 == status as u8,
        }
    }

    /// The statuses covered by the filter
    #[must_use]
    pub fn statuses(&self) -> Vec<RegistrationStatus> {
        RegistrationStatus::ALL
            .into_iter()
            .filter(|status| self.matches(*status))
            .collect()
    }
}

// ============================================================================
// Registrant
// ============================================================================

/// The person a registration is for
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Registrant {
    /// A user account
    User {
        /// Account id
        id: UserId,
    },
    /// Anonymous registrant identified by email
    Anonymous {
        /// Lowercased email address
        email: String,
    },
}

impl Registrant {
    /// Registrant for a user account
    #[must_use]
    pub const fn user(id: UserId) -> Self {
        Self::User { id }
    }

    /// Anonymous registrant; the email is normalized to lowercase
    #[must_use]
    pub fn anonymous(email: impl AsRef<str>) -> Self {
        Self::Anonymous {
            email: email.as_ref().trim().to_lowercase(),
        }
    }

    /// The account id, if this is a user registrant
    #[must_use]
    pub const fn user_id(&self) -> Option<UserId> {
        match self {
            Self::User { id } => Some(*id),
            Self::Anonymous { .. } => None,
        }
    }

    /// The email, if this is an anonymous registrant
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        match self {
            Self::User { .. } => None,
            Self::Anonymous { email } => Some(email),
        }
    }
}

impl fmt::Display for Registrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User { id } => write!(f, "user:{id}"),
            Self::Anonymous { email } => write!(f, "{email}"),
        }
    }
}

// ============================================================================
// Registration
// ============================================================================

/// A reservation of spaces against a host
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Registration id
    pub id: RegistrationId,
    /// Host the spaces are reserved against
    pub host_id: HostId,
    /// Who the registration is for
    pub registrant: Registrant,
    /// Who created the registration (may differ from the registrant)
    pub author: Option<UserId>,
    /// Number of spaces reserved (at least 1)
    pub spaces_reserved: u32,
    /// Current workflow state
    pub status: RegistrationStatus,
    /// When the registration was created
    pub created: DateTime<Utc>,
    /// When the registration last changed
    pub changed: DateTime<Utc>,
}

impl Registration {
    /// Creates a new registration
    #[must_use]
    pub fn new(
        host_id: HostId,
        registrant: Registrant,
        spaces_reserved: u32,
        status: RegistrationStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RegistrationId::new(),
            host_id,
            registrant,
            author: None,
            spaces_reserved,
            status,
            created: now,
            changed: now,
        }
    }

    /// Sets the author
    #[must_use]
    pub fn with_author(mut self, author: Option<UserId>) -> Self {
        self.author = author;
        self
    }

    /// Returns true when the registrant is the given user
    #[must_use]
    pub fn is_registrant(&self, user: UserId) -> bool {
        self.registrant.user_id() == Some(user)
    }
}

// ============================================================================
// Host and settings
// ============================================================================

/// The thing being registered for
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntity {
    /// Host id
    pub id: HostId,
    /// Host kind, e.g. `"node"` or `"user"`
    pub kind: String,
    /// Display label
    pub label: String,
}

impl HostEntity {
    /// Creates a new `HostEntity`
    #[must_use]
    pub fn new(id: HostId, kind: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id,
            kind: kind.into(),
            label: label.into(),
        }
    }
}

/// Field used to order waitlisted registrations for autofill
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    /// Creation time
    #[default]
    Created,
    /// Last change time
    Changed,
    /// Spaces reserved
    SpacesReserved,
}

/// Sort direction
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    /// Smallest first
    #[default]
    Asc,
    /// Largest first
    Desc,
}

/// Ordering applied to registration listings
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationSort {
    /// Field to sort by
    pub field: SortField,
    /// Direction
    pub direction: SortDirection,
}

impl RegistrationSort {
    /// Creates a new sort
    #[must_use]
    pub const fn new(field: SortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }

    /// Compares two registrations by the sort field and direction.
    ///
    /// Equal keys compare as `Equal`, so a stable sort keeps insertion order.
    #[must_use]
    pub fn compare(&self, a: &Registration, b: &Registration) -> Ordering {
        let ordering = match self.field {
            SortField::Created => a.created.cmp(&b.created),
            SortField::Changed => a.changed.cmp(&b.changed),
            SortField::SpacesReserved => a.spaces_reserved.cmp(&b.spaces_reserved),
        };
        match self.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

/// Waitlist autofill configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutofillSettings {
    /// Status promoted registrations move to
    pub target: RegistrationStatus,
    /// Order in which waitlisted registrations are considered
    #[serde(default)]
    pub sort: RegistrationSort,
}

/// Waitlist configuration for a host
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistSettings {
    /// Whether the waitlist is used at all
    pub enabled: bool,
    /// Waitlist capacity
    #[serde(default)]
    pub capacity: Capacity,
    /// Autofill configuration; `None` disables autofill
    #[serde(default)]
    pub autofill: Option<AutofillSettings>,
}

/// How long held registrations keep their spaces
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldExpiration {
    /// Hours after the last change before a hold is canceled
    pub hours: u32,
}

impl HoldExpiration {
    /// The expiration as a duration
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::hours(i64::from(self.hours))
    }
}

/// Where `now` falls relative to the registration window
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowState {
    /// Before the open date
    NotOpenYet,
    /// Inside the window
    Open,
    /// After the close date
    Closed,
}

/// Registration settings attached to a host
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    /// Registration status switch
    pub enabled: bool,
    /// Primary capacity
    #[serde(default)]
    pub capacity: Capacity,
    /// Maximum spaces per registration
    #[serde(default)]
    pub maximum_spaces: Capacity,
    /// Registration opens at
    #[serde(default)]
    pub open: Option<DateTime<Utc>>,
    /// Registration closes at
    #[serde(default)]
    pub close: Option<DateTime<Utc>>,
    /// Allow the same registrant to register more than once
    #[serde(default)]
    pub multiple_registrations: bool,
    /// Waitlist configuration
    #[serde(default)]
    pub waitlist: WaitlistSettings,
    /// Held registration expiry
    #[serde(default)]
    pub hold_expiration: Option<HoldExpiration>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: Capacity::Unlimited,
            maximum_spaces: Capacity::Unlimited,
            open: None,
            close: None,
            multiple_registrations: false,
            waitlist: WaitlistSettings::default(),
            hold_expiration: None,
        }
    }
}

impl HostSettings {
    /// Where `now` falls relative to the open/close window
    #[must_use]
    pub fn window(&self, now: DateTime<Utc>) -> WindowState {
        if self.open.is_some_and(|open| now < open) {
            WindowState::NotOpenYet
        } else if self.close.is_some_and(|close| now >= close) {
            WindowState::Closed
        } else {
            WindowState::Open
        }
    }

    /// Enabled and inside the window
    #[must_use]
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.window(now) == WindowState::Open
    }

    /// Waitlist capacity, or `None` when the waitlist is disabled
    #[must_use]
    pub const fn waitlist_capacity(&self) -> Option<Capacity> {
        if self.waitlist.enabled {
            Some(self.waitlist.capacity)
        } else {
            None
        }
    }
}

/// A host together with its registration settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// The host entity
    pub entity: HostEntity,
    /// Its registration settings
    pub settings: HostSettings,
}

impl Host {
    /// Creates a new `Host`
    #[must_use]
    pub const fn new(entity: HostEntity, settings: HostSettings) -> Self {
        Self { entity, settings }
    }

    /// Host id
    #[must_use]
    pub const fn id(&self) -> HostId {
        self.entity.id
    }

    /// Display label
    #[must_use]
    pub fn label(&self) -> &str {
        &self.entity.label
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_is_unlimited() {
        assert_eq!(Capacity::limited(0), Capacity::Unlimited);
        assert_eq!(Capacity::limited(5).limit(), Some(5));
        assert!(Capacity::Unlimited.allows(u32::MAX));
        assert!(!Capacity::limited(2).allows(3));
    }

    #[test]
    fn test_capacity_serializes_as_integer() {
        let json = serde_json::to_string(&Capacity::limited(7)).unwrap();
        assert_eq!(json, "7");
        let unlimited: Capacity = serde_json::from_str("0").unwrap();
        assert!(unlimited.is_unlimited());
        assert_eq!(serde_json::to_string(&unlimited).unwrap(), "0");
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in RegistrationStatus::ALL {
            assert_eq!(status.as_str().parse::<RegistrationStatus>().unwrap(), status);
        }
        assert!("archived".parse::<RegistrationStatus>().is_err());
    }

    #[test]
    fn test_active_filter_excludes_canceled_and_waitlist() {
        let statuses = StatusFilter::Active.statuses();
        assert_eq!(
            statuses,
            vec![
                RegistrationStatus::Pending,
                RegistrationStatus::Held,
                RegistrationStatus::Complete
            ]
        );
        let waitlisted = StatusFilter::Is(RegistrationStatus::Waitlist);
        assert!(waitlisted.matches(RegistrationStatus::Waitlist));
        assert!(!waitlisted.matches(RegistrationStatus::Pending));
    }

    #[test]
    fn test_window_boundaries() {
        let now = Utc::now();
        let settings = HostSettings {
            open: Some(now + Duration::hours(1)),
            ..HostSettings::default()
        };
        assert_eq!(settings.window(now), WindowState::NotOpenYet);

        let settings = HostSettings {
            close: Some(now),
            ..HostSettings::default()
        };
        assert_eq!(settings.window(now), WindowState::Closed);
        assert!(!settings.is_open(now));

        let settings = HostSettings {
            enabled: false,
            ..HostSettings::default()
        };
        assert_eq!(settings.window(now), WindowState::Open);
        assert!(!settings.is_open(now));
    }

    #[test]
    fn test_anonymous_email_is_normalized() {
        assert_eq!(
            Registrant::anonymous("  Someone@Example.ORG "),
            Registrant::anonymous("someone@example.org")
        );
    }

    #[test]
    fn test_descending_sort_keeps_ties_stable() {
        let host = HostId::new();
        let now = Utc::now();
        let waitlisted = |email: &str, spaces| {
            Registration::new(
                host,
                Registrant::anonymous(email),
                spaces,
                RegistrationStatus::Waitlist,
                now,
            )
        };
        let first = waitlisted("a@x.org", 2);
        let second = waitlisted("b@x.org", 2);
        let third = waitlisted("c@x.org", 3);

        let sort = RegistrationSort::new(SortField::SpacesReserved, SortDirection::Desc);
        let mut list = vec![first.clone(), second.clone(), third.clone()];
        list.sort_by(|a, b| sort.compare(a, b));
        assert_eq!(list, vec![third, first, second]);
    }
}
