//! Validation violations.
//!
//! Violations are user-facing values returned to the caller, not errors.
//! An operation succeeded only when its violation list is empty.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of violation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCode {
    /// Registration status is disabled for the host
    Disabled,
    /// Before the open date
    NotOpenYet,
    /// After the close date
    Closed,
    /// Spaces below one
    InvalidSpaces,
    /// More spaces than one registration may hold
    MaximumSpacesExceeded,
    /// Not enough primary room and no waitlist to fall back on
    InsufficientSpaces,
    /// Not enough waitlist room
    WaitlistFull,
    /// Registrant already holds a registration for the host
    AlreadyRegistered,
}

/// A single violation attached to a property path
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Kind of violation
    pub code: ViolationCode,
    /// Message for display
    pub message: String,
    /// Property the violation is attached to, empty for the registration as a whole
    pub property_path: String,
}

impl Violation {
    /// Creates a new `Violation`
    #[must_use]
    pub fn new(
        code: ViolationCode,
        message: impl Into<String>,
        property_path: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            property_path: property_path.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.property_path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.property_path, self.message)
        }
    }
}

/// Collected violations
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violations(Vec<Violation>);

impl Violations {
    /// Empty list
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds a violation
    pub fn push(&mut self, violation: Violation) {
        self.0.push(violation);
    }

    /// Adds a violation from its parts
    pub fn add(
        &mut self,
        code: ViolationCode,
        message: impl Into<String>,
        property_path: impl Into<String>,
    ) {
        self.push(Violation::new(code, message, property_path));
    }

    /// No violations
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of violations
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when a violation with `code` is present
    #[must_use]
    pub fn contains(&self, code: ViolationCode) -> bool {
        self.0.iter().any(|violation| violation.code == code)
    }

    /// Iterate over the violations
    pub fn iter(&self) -> std::slice::Iter<'_, Violation> {
        self.0.iter()
    }
}

impl IntoIterator for Violations {
    type Item = Violation;
    type IntoIter = std::vec::IntoIter<Violation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Violations {
    type Item = &'a Violation;
    type IntoIter = std::slice::Iter<'a, Violation>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, violation) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_joins_messages() {
        let mut violations = Violations::new();
        violations.add(ViolationCode::Closed, "Registration is closed.", "");
        violations.add(
            ViolationCode::MaximumSpacesExceeded,
            "You may not register for more than 2 spaces.",
            "spaces_reserved",
        );
        assert_eq!(
            violations.to_string(),
            "Registration is closed.; spaces_reserved: You may not register for more than 2 spaces."
        );
        assert!(violations.contains(ViolationCode::Closed));
        assert!(!violations.contains(ViolationCode::WaitlistFull));
    }
}
