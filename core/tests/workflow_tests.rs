//! Workflow transitions and their permission checks.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect
#![allow(clippy::panic)] // Tests can panic

use chrono::Utc;
use registration_core::access::{Account, Principal, permissions};
use registration_core::error::RegistrationError;
use registration_core::notify::RegistrationEvent;
use registration_core::types::{HostId, Registrant, Registration, RegistrationStatus, UserId};
use registration_core::violation::ViolationCode;
use registration_core::workflow::{TransitionId, TransitionValidator, Workflow, WorkflowConfig};
use registration_testing::{HostBuilder, ScenarioTest, TestHarness, accounts};
use std::collections::BTreeSet;
use std::sync::Arc;

use RegistrationStatus::{Canceled, Complete, Held, Pending, Waitlist};

fn registration_for(registrant: Registrant, status: RegistrationStatus) -> Registration {
    Registration::new(HostId::new(), registrant, 1, status, Utc::now())
}

fn validator() -> TransitionValidator {
    TransitionValidator::new(Arc::new(Workflow::standard(true)))
}

#[test]
fn test_standard_graph_validity() {
    let validator = validator();
    let member = accounts::member(UserId::new());
    let registration = registration_for(Registrant::anonymous("a@example.org"), Pending);

    assert!(validator.is_transition_valid(Pending, Complete, &registration, &member));
    assert!(validator.is_transition_valid(Pending, Held, &registration, &member));
    assert!(validator.is_transition_valid(Waitlist, Complete, &registration, &member));
    assert!(!validator.is_transition_valid(Held, Pending, &registration, &member));

    let administrator = accounts::administrator();
    for to in RegistrationStatus::ALL {
        assert!(!validator.is_transition_valid(Canceled, to, &registration, &administrator));
    }
}

#[test]
fn test_missing_permission_invalidates_edge() {
    let validator = validator();
    let registration = registration_for(Registrant::anonymous("a@example.org"), Pending);

    let visitor = accounts::visitor(UserId::new());
    assert!(!validator.is_transition_valid(Pending, Complete, &registration, &visitor));

    let mut partial = accounts::member(UserId::new());
    partial.revoke("use registration complete transition");
    assert!(!validator.is_transition_valid(Pending, Complete, &registration, &partial));
    assert!(validator.is_transition_valid(Pending, Canceled, &registration, &partial));
}

#[test]
fn test_valid_transitions_lists_usable_edges() {
    let validator = validator();
    let member = accounts::member(UserId::new());

    let pending = registration_for(Registrant::anonymous("a@example.org"), Pending);
    let expected: BTreeSet<_> = [TransitionId::HOLD, TransitionId::COMPLETE, TransitionId::CANCEL]
        .into_iter()
        .map(TransitionId::from)
        .collect();
    assert_eq!(validator.valid_transitions(&pending, &member), expected);

    let canceled = registration_for(Registrant::anonymous("a@example.org"), Canceled);
    assert!(validator.valid_transitions(&canceled, &member).is_empty());
    assert!(
        validator
            .valid_transitions(&pending, &Account::anonymous())
            .is_empty()
    );
}

#[test]
fn test_self_completion_guard() {
    let me = UserId::new();
    let member = accounts::member(me);
    let validator = validator().with_prevent_complete_own(true);

    let theirs = registration_for(Registrant::user(UserId::new()), Pending);
    assert!(validator.is_transition_valid(Pending, Complete, &theirs, &member));

    // Same registration after being handed to the acting user.
    let mut mine = theirs.clone();
    mine.registrant = Registrant::user(me);
    assert!(!validator.is_transition_valid(Pending, Complete, &mine, &member));
    assert!(validator.is_transition_valid(Pending, Canceled, &mine, &member));

    let elevated = member.with_permission(permissions::UPDATE_ANY);
    assert!(validator.is_transition_valid(Pending, Complete, &mine, &elevated));

    let relaxed = self::validator();
    assert!(relaxed.is_transition_valid(Pending, Complete, &mine, &accounts::member(me)));
}

#[tokio::test]
async fn test_transition_from_canceled_is_not_allowed() {
    ScenarioTest::new(HostBuilder::new().build())
        .given_registration(1, Canceled)
        .when_transition(0, "complete", accounts::administrator())
        .then_error(|error| {
            assert!(matches!(
                error,
                RegistrationError::TransitionNotAllowed { from: Canceled, .. }
            ));
        })
        .run()
        .await;
}

#[tokio::test]
async fn test_transition_requires_permission() {
    ScenarioTest::new(HostBuilder::new().build())
        .given_registration(1, Pending)
        .when_transition(0, "hold", accounts::visitor(UserId::new()))
        .then_error(|error| assert!(matches!(error, RegistrationError::AccessDenied(_))))
        .then_registrations(|registrations| assert_eq!(registrations[0].status, Pending))
        .run()
        .await;
}

#[tokio::test]
async fn test_transition_emits_event_with_previous_status() {
    ScenarioTest::new(HostBuilder::new().build())
        .given_registration(1, Pending)
        .when_transition(0, "hold", accounts::member(UserId::new()))
        .then_status(Held)
        .then_events(|events| {
            assert_eq!(events.len(), 1);
            match &events[0] {
                RegistrationEvent::Transitioned {
                    transition,
                    from,
                    registration,
                } => {
                    assert_eq!(transition.as_str(), TransitionId::HOLD);
                    assert_eq!(*from, Pending);
                    assert_eq!(registration.status, Held);
                }
                other => panic!("unexpected event {other:?}"),
            }
        })
        .run()
        .await;
}

#[tokio::test]
async fn test_service_blocks_completing_own_registration() {
    let me = UserId::new();
    ScenarioTest::new(HostBuilder::new().build())
        .prevent_complete_own()
        .given_registration_for(Registrant::user(me), 1, Pending)
        .when_transition(0, "complete", accounts::member(me))
        .then_error(|error| assert!(matches!(error, RegistrationError::AccessDenied(_))))
        .run()
        .await;

    ScenarioTest::new(HostBuilder::new().build())
        .prevent_complete_own()
        .given_registration_for(Registrant::user(me), 1, Pending)
        .when_transition(0, "complete", accounts::member(UserId::new()))
        .then_status(Complete)
        .run()
        .await;
}

#[tokio::test]
async fn test_reassigned_registration_cannot_be_self_completed() {
    let harness = TestHarness::standard().prevent_complete_own();
    let host = harness.add_host(HostBuilder::new().build()).await;
    let registration = harness.seed(host.id(), 1, Pending).await;

    let me = accounts::member(UserId::new());
    let my_id = me.id().unwrap();
    assert!(
        harness
            .service
            .valid_transitions(registration.id, &me)
            .await
            .unwrap()
            .contains(&TransitionId::from(TransitionId::COMPLETE))
    );

    let outcome = harness
        .service
        .reassign(registration.id, Registrant::user(my_id), &accounts::staff())
        .await
        .unwrap();
    assert!(outcome.is_accepted());

    let available = harness
        .service
        .valid_transitions(registration.id, &me)
        .await
        .unwrap();
    assert!(!available.contains(&TransitionId::from(TransitionId::COMPLETE)));
    assert!(available.contains(&TransitionId::from(TransitionId::CANCEL)));

    let error = harness
        .service
        .transition(registration.id, &TransitionId::from(TransitionId::COMPLETE), &me)
        .await
        .unwrap_err();
    assert!(matches!(error, RegistrationError::AccessDenied(_)));
}

#[tokio::test]
async fn test_custom_workflow_from_toml() {
    let config = WorkflowConfig::from_toml_str(
        r#"
        id = "approval"
        label = "Approval"

        [[transition]]
        id = "approve"
        label = "Approve"
        from = ["pending"]
        to = "complete"

        [[transition]]
        id = "withdraw"
        label = "Withdraw"
        from = ["pending", "complete"]
        to = "canceled"
        "#,
    )
    .unwrap();
    let workflow = Workflow::compile(config).unwrap();
    assert_eq!(
        workflow.permission_for("approve"),
        Some("use approval approve transition")
    );

    let approver = Account::new(UserId::new()).with_permission("use approval approve transition");
    ScenarioTest::new(HostBuilder::new().build())
        .with_workflow(workflow.clone())
        .given_registration(1, Pending)
        .when_transition(0, "approve", approver)
        .then_status(Complete)
        .run()
        .await;

    ScenarioTest::new(HostBuilder::new().build())
        .with_workflow(workflow)
        .given_registration(1, Pending)
        .when_transition(0, "hold", accounts::administrator())
        .then_error(|error| {
            assert!(matches!(error, RegistrationError::TransitionNotAllowed { .. }));
        })
        .run()
        .await;
}

fn queueing_workflow() -> Workflow {
    let config = WorkflowConfig::from_toml_str(
        r#"
        id = "queueing"
        label = "Queueing"
        waitlist = true

        [[transition]]
        id = "queue"
        label = "Queue"
        from = ["pending"]
        to = "waitlist"

        [[transition]]
        id = "confirm"
        label = "Confirm"
        from = ["pending", "waitlist"]
        to = "complete"
        "#,
    )
    .unwrap();
    Workflow::compile(config).unwrap()
}

fn queue_manager(workflow: &Workflow) -> Account {
    Account::new(UserId::new()).with_permissions(accounts::transition_permissions(workflow))
}

#[tokio::test]
async fn test_transition_onto_full_waitlist_is_rejected() {
    let workflow = queueing_workflow();
    let manager = queue_manager(&workflow);

    ScenarioTest::new(HostBuilder::new().capacity(10).waitlist(1).build())
        .with_workflow(workflow)
        .given_registration(1, Waitlist)
        .given_registration(3, Pending)
        .when_transition(1, "queue", manager)
        .then_violation(ViolationCode::WaitlistFull)
        .then_registrations(|registrations| {
            assert_eq!(registrations[1].status, Pending);
            let waitlisted: u32 = registrations
                .iter()
                .filter(|r| r.status == Waitlist)
                .map(|r| r.spaces_reserved)
                .sum();
            assert_eq!(waitlisted, 1);
        })
        .run()
        .await;
}

#[tokio::test]
async fn test_transition_onto_waitlist_with_room() {
    let workflow = queueing_workflow();
    let manager = queue_manager(&workflow);

    ScenarioTest::new(HostBuilder::new().capacity(10).waitlist(4).build())
        .with_workflow(workflow)
        .given_registration(1, Waitlist)
        .given_registration(3, Pending)
        .when_transition(1, "queue", manager)
        .then_status(Waitlist)
        .run()
        .await;
}

#[tokio::test]
async fn test_transition_onto_disabled_waitlist_is_rejected() {
    let workflow = queueing_workflow();
    let manager = queue_manager(&workflow);

    ScenarioTest::new(HostBuilder::new().capacity(10).build())
        .with_workflow(workflow)
        .given_registration(2, Pending)
        .when_transition(0, "queue", manager)
        .then_violation(ViolationCode::WaitlistFull)
        .run()
        .await;
}

#[tokio::test]
async fn test_confirming_from_waitlist_needs_primary_room() {
    let workflow = queueing_workflow();
    let manager = queue_manager(&workflow);

    ScenarioTest::new(HostBuilder::new().capacity(4).waitlist(5).build())
        .with_workflow(workflow)
        .given_registration(3, Complete)
        .given_registration(2, Waitlist)
        .when_transition(1, "confirm", manager)
        .then_violation(ViolationCode::InsufficientSpaces)
        .then_registrations(|registrations| assert_eq!(registrations[1].status, Waitlist))
        .run()
        .await;
}
