//! Registration walkthrough.
//!
//! Creates one capacity-limited host with a waitlist and autofill, then runs a
//! handful of registrations through it. Uses `PostgreSQL` when `DATABASE_URL`
//! is set and in-memory storage otherwise.

use chrono::Utc;
use registration_core::access::{Account, permissions};
use registration_core::config::Config;
use registration_core::environment::{RegistrationEnvironment, SystemClock};
use registration_core::memory::InMemoryRegistrationStore;
use registration_core::metrics::register_registration_metrics;
use registration_core::notify::TracingNotifier;
use registration_core::repository::{HostRepository, RegistrationRepository};
use registration_core::service::{Outcome, RegistrationDraft, RegistrationService};
use registration_core::types::{
    AutofillSettings, Capacity, HoldExpiration, Host, HostEntity, HostId, HostSettings,
    Registrant, RegistrationSort, RegistrationStatus, UserId, WaitlistSettings,
};
use registration_core::workflow::{TransitionId, Workflow};
use registration_postgres::{PostgresHostLock, PostgresRegistrationStore};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting registration walkthrough");
    register_registration_metrics();

    let workflow = Arc::new(config.registration.load_workflow()?);
    let host = workshop(&workflow);

    let service = if let Some(url) = &config.database.url {
        info!("Connecting to PostgreSQL...");
        let store = Arc::new(
            PostgresRegistrationStore::connect(url, config.database.max_connections).await?,
        );
        store.migrate().await?;
        store.save_configured_host(&host).await?;
        let locks = Arc::new(PostgresHostLock::new(store.pool().clone()));
        RegistrationService::new(environment(store, Arc::clone(&workflow))).with_locks(locks)
    } else {
        info!("DATABASE_URL not set, using in-memory storage");
        let store = Arc::new(InMemoryRegistrationStore::new());
        store.insert_host(host.clone()).await;
        RegistrationService::new(environment(store, Arc::clone(&workflow)))
    }
    .with_prevent_complete_own(config.registration.prevent_complete_own);

    let organizer = Account::new(UserId::new())
        .with_permissions(workflow.transitions().iter().map(|t| t.permission.clone()))
        .with_permission(permissions::ADMINISTER)
        .with_permission(permissions::UPDATE_ANY);

    let mut accepted = Vec::new();
    for (name, spaces) in [("alice", 2), ("bob", 2), ("carol", 1), ("dave", 2), ("erin", 4)] {
        let user = UserId::new();
        let draft = RegistrationDraft::new(Registrant::user(user), spaces);
        let outcome = service.register(host.id(), draft, &Account::new(user)).await?;
        report(name, &outcome);
        if let Outcome::Accepted(registration) = outcome {
            accepted.push((name, registration));
        }
    }
    show_availability(&service, host.id()).await?;

    if let Some((name, registration)) = accepted.iter().find(|(name, _)| *name == "bob") {
        info!(registrant = *name, "Organizer cancels a registration");
        let cancel = TransitionId::from(TransitionId::CANCEL);
        let outcome = service.transition(registration.id, &cancel, &organizer).await?;
        report(name, &outcome);
    }
    show_availability(&service, host.id()).await?;

    if let Some((name, registration)) = accepted.first() {
        let available = service.valid_transitions(registration.id, &organizer).await?;
        info!(
            registrant = *name,
            transitions = ?available.iter().map(TransitionId::as_str).collect::<Vec<_>>(),
            "Transitions available to the organizer"
        );
    }

    let expired = service.expire_holds(host.id()).await?;
    info!(
        expired = expired.expired.len(),
        promoted = expired.autofill.registrations(),
        "Hold expiry sweep finished"
    );

    Ok(())
}

fn environment<S>(store: Arc<S>, workflow: Arc<Workflow>) -> RegistrationEnvironment
where
    S: HostRepository + RegistrationRepository + 'static,
{
    RegistrationEnvironment::new(
        store.clone(),
        store,
        Arc::new(TracingNotifier),
        Arc::new(SystemClock),
        workflow,
    )
}

/// Capacity 4, waitlist of 2 with autofill, at most 3 spaces each, open now.
fn workshop(workflow: &Workflow) -> Host {
    let waitlist = workflow.waitlist_enabled();
    let settings = HostSettings {
        enabled: true,
        capacity: Capacity::limited(4),
        maximum_spaces: Capacity::limited(3),
        open: Some(Utc::now() - chrono::Duration::hours(1)),
        close: Some(Utc::now() + chrono::Duration::days(7)),
        multiple_registrations: false,
        waitlist: WaitlistSettings {
            enabled: waitlist,
            capacity: Capacity::limited(2),
            autofill: waitlist.then_some(AutofillSettings {
                target: RegistrationStatus::Pending,
                sort: RegistrationSort::default(),
            }),
        },
        hold_expiration: Some(HoldExpiration { hours: 24 }),
    };
    Host::new(HostEntity::new(HostId::new(), "event", "Community workshop"), settings)
}

fn report(name: &str, outcome: &Outcome) {
    match outcome {
        Outcome::Accepted(registration) => info!(
            registrant = name,
            status = %registration.status,
            spaces = registration.spaces_reserved,
            "Accepted"
        ),
        Outcome::Rejected(violations) => {
            for violation in violations {
                warn!(registrant = name, code = ?violation.code, "{}", violation.message);
            }
        }
    }
}

async fn show_availability(service: &RegistrationService, host_id: HostId) -> anyhow::Result<()> {
    let availability = service.availability(host_id).await?;
    info!(
        reserved = availability.primary.reserved,
        remaining = ?availability.primary.remaining,
        waitlisted = ?availability.waitlist.map(|w| w.reserved),
        "Availability"
    );
    Ok(())
}
