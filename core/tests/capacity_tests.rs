//! Capacity bounds under arbitrary request sequences and concurrent callers.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use futures::future::join_all;
use proptest::prelude::*;
use registration_core::access::Account;
use registration_core::service::{Outcome, RegistrationDraft};
use registration_core::types::{Registrant, Registration, RegistrationStatus, UserId};
use registration_core::workflow::{TransitionConfig, Workflow, WorkflowConfig};
use registration_testing::{HostBuilder, TestHarness, accounts, properties};

fn sum_where(
    registrations: &[Registration],
    keep: impl Fn(RegistrationStatus) -> bool,
) -> u32 {
    registrations
        .iter()
        .filter(|r| keep(r.status))
        .map(|r| r.spaces_reserved)
        .sum()
}

/// Standard workflow plus a `queue` transition that moves pending and held
/// registrations onto the waitlist.
fn queueing_workflow() -> Workflow {
    let mut config = WorkflowConfig::standard(true);
    config.transitions.push(TransitionConfig {
        id: "queue".to_string(),
        label: "Queue".to_string(),
        from: vec![RegistrationStatus::Pending, RegistrationStatus::Held],
        to: RegistrationStatus::Waitlist,
    });
    Workflow::compile(config).unwrap()
}

/// (active, waitlisted) spaces
fn pool_totals(registrations: &[Registration]) -> (u32, u32) {
    (
        sum_where(registrations, |s| s.is_active()),
        sum_where(registrations, |s| s.is_waitlisted()),
    )
}

proptest! {
    #[test]
    fn prop_active_spaces_never_exceed_capacity(
        capacity in 1u32..20,
        waitlist in 0u32..10,
        requests in prop::collection::vec(properties::spaces(), 1..25),
    ) {
        let (active, waitlisted) = tokio_test::block_on(async {
            let harness = TestHarness::standard();
            let host = harness
                .add_host(HostBuilder::new().capacity(capacity).waitlist(waitlist).build())
                .await;

            for spaces in requests {
                let principal = accounts::member(UserId::new());
                let draft = RegistrationDraft::new(Registrant::user(UserId::new()), spaces);
                harness.service.register(host.id(), draft, &principal).await.unwrap();
            }

            let registrations = harness.store.registrations_for(host.id()).await;
            (
                sum_where(&registrations, |s| s.is_active()),
                sum_where(&registrations, |s| s.is_waitlisted()),
            )
        });

        prop_assert!(active <= capacity, "{active} active spaces over capacity {capacity}");
        if waitlist > 0 {
            prop_assert!(waitlisted <= waitlist, "{waitlisted} waitlisted over {waitlist}");
        }
    }

    #[test]
    fn prop_transitions_keep_capacity(
        capacity in 1u32..10,
        waitlist in 1u32..6,
        seeded in prop::collection::vec((properties::spaces(), properties::status()), 0..12),
        steps in prop::collection::vec(
            (any::<prop::sample::Index>(), prop::sample::select(vec!["queue", "complete"])),
            1..8,
        ),
    ) {
        let (before, after) = tokio_test::block_on(async {
            let workflow = queueing_workflow();
            let manager = Account::new(UserId::new())
                .with_permissions(accounts::transition_permissions(&workflow));
            let harness = TestHarness::new(workflow);
            let host = harness
                .add_host(HostBuilder::new().capacity(capacity).waitlist(waitlist).build())
                .await;

            let mut seeded_ids = Vec::new();
            for (spaces, status) in seeded {
                seeded_ids.push(harness.seed(host.id(), spaces, status).await.id);
            }
            let before = pool_totals(&harness.store.registrations_for(host.id()).await);

            if !seeded_ids.is_empty() {
                for (index, transition) in steps {
                    let id = *index.get(&seeded_ids);
                    let _ = harness
                        .service
                        .transition(id, &transition.into(), &manager)
                        .await;
                }
            }

            let after = pool_totals(&harness.store.registrations_for(host.id()).await);
            (before, after)
        });

        // Seeding may start over capacity; transitions must never add to an overflow.
        prop_assert!(after.0 <= before.0.max(capacity));
        prop_assert!(
            after.1 <= before.1.max(waitlist),
            "{} waitlisted over {waitlist} (was {})",
            after.1,
            before.1
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registrations_respect_capacity() {
    let harness = TestHarness::standard();
    let host = harness
        .add_host(HostBuilder::new().capacity(3).build())
        .await;

    let attempts = (0..24).map(|_| {
        let service = harness.service.clone();
        let host_id = host.id();
        tokio::spawn(async move {
            let user = UserId::new();
            service
                .register(
                    host_id,
                    RegistrationDraft::new(Registrant::user(user), 1),
                    &accounts::member(user),
                )
                .await
        })
    });

    let outcomes: Vec<Outcome> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked").unwrap())
        .collect();

    assert_eq!(outcomes.iter().filter(|o| o.is_accepted()).count(), 3);
    let registrations = harness.store.registrations_for(host.id()).await;
    assert_eq!(registrations.len(), 3);
    assert_eq!(sum_where(&registrations, |s| s.is_active()), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicates_admit_one() {
    let harness = TestHarness::standard();
    let host = harness.add_host(HostBuilder::new().build()).await;
    let user = UserId::new();

    let attempts = (0..8).map(|_| {
        let service = harness.service.clone();
        let host_id = host.id();
        tokio::spawn(async move {
            service
                .register(
                    host_id,
                    RegistrationDraft::new(Registrant::user(user), 1),
                    &accounts::member(user),
                )
                .await
        })
    });

    let accepted = join_all(attempts)
        .await
        .into_iter()
        .filter(|joined| joined.as_ref().unwrap().as_ref().unwrap().is_accepted())
        .count();
    assert_eq!(accepted, 1);
}
