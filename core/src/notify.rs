//! Registration events and the notifier extension point.
//!
//! Email delivery and other reactions live behind [`RegistrationNotifier`].
//! A failed notification never undoes the change it describes.

use crate::types::{HostId, Registrant, Registration, RegistrationStatus};
use crate::workflow::TransitionId;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Something that happened to a registration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationEvent {
    /// A registration was accepted directly
    Admitted {
        /// The stored registration
        registration: Registration,
    },

    /// A registration was accepted onto the waitlist
    Waitlisted {
        /// The stored registration
        registration: Registration,
    },

    /// A registration's spaces changed
    SpacesChanged {
        /// The stored registration
        registration: Registration,
        /// Spaces before the change
        previous: u32,
    },

    /// A registration moved to a different registrant
    Reassigned {
        /// The stored registration
        registration: Registration,
        /// Registrant before the change
        previous: Registrant,
    },

    /// A workflow transition was applied
    Transitioned {
        /// The stored registration
        registration: Registration,
        /// Transition applied
        transition: TransitionId,
        /// Status before the transition
        from: RegistrationStatus,
    },

    /// A waitlisted registration is about to be promoted
    BeforeAutofill {
        /// The registration, still waitlisted
        registration: Registration,
    },

    /// A waitlisted registration was promoted
    Autofilled {
        /// The stored registration
        registration: Registration,
    },

    /// An autofill sweep moved registrations off the waitlist
    AutofillCompleted {
        /// Host swept
        host_id: HostId,
        /// Registrations promoted
        registrations: u32,
        /// Spaces promoted
        spaces: u32,
    },

    /// A held registration expired
    HoldExpired {
        /// The stored registration
        registration: Registration,
    },

    /// A registration was deleted
    Deleted {
        /// The registration as it was before deletion
        registration: Registration,
    },
}

impl RegistrationEvent {
    /// Short event name for logs and metrics
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Admitted { .. } => "admitted",
            Self::Waitlisted { .. } => "waitlisted",
            Self::SpacesChanged { .. } => "spaces_changed",
            Self::Reassigned { .. } => "reassigned",
            Self::Transitioned { .. } => "transitioned",
            Self::BeforeAutofill { .. } => "before_autofill",
            Self::Autofilled { .. } => "autofilled",
            Self::AutofillCompleted { .. } => "autofill_completed",
            Self::HoldExpired { .. } => "hold_expired",
            Self::Deleted { .. } => "deleted",
        }
    }
}

/// Notification delivery failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Notification failed: {0}")]
pub struct NotifierError(pub String);

/// Receives registration events
pub trait RegistrationNotifier: Send + Sync {
    /// Deliver one event.
    ///
    /// # Errors
    ///
    /// Returns error if delivery fails. Callers log and carry on.
    fn notify(&self, event: RegistrationEvent) -> BoxFuture<'_, Result<(), NotifierError>>;
}

/// Notifier that writes events to the tracing log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl RegistrationNotifier for TracingNotifier {
    fn notify(&self, event: RegistrationEvent) -> BoxFuture<'_, Result<(), NotifierError>> {
        Box::pin(async move {
            match &event {
                RegistrationEvent::AutofillCompleted {
                    host_id,
                    registrations,
                    spaces,
                } => tracing::info!(
                    host_id = %host_id,
                    registrations,
                    spaces,
                    "Registrations moved off the wait list"
                ),
                RegistrationEvent::Admitted { registration }
                | RegistrationEvent::Waitlisted { registration }
                | RegistrationEvent::SpacesChanged { registration, .. }
                | RegistrationEvent::Reassigned { registration, .. }
                | RegistrationEvent::Transitioned { registration, .. }
                | RegistrationEvent::BeforeAutofill { registration }
                | RegistrationEvent::Autofilled { registration }
                | RegistrationEvent::HoldExpired { registration }
                | RegistrationEvent::Deleted { registration } => tracing::debug!(
                    event = event.name(),
                    registration_id = %registration.id,
                    host_id = %registration.host_id,
                    status = %registration.status,
                    "Registration event"
                ),
            }
            Ok(())
        })
    }
}

/// Deliver an event, logging instead of failing
pub(crate) async fn dispatch(notifier: &dyn RegistrationNotifier, event: RegistrationEvent) {
    let name = event.name();
    if let Err(error) = notifier.notify(event).await {
        tracing::warn!(event = name, error = %error, "Registration notification failed");
    }
}
