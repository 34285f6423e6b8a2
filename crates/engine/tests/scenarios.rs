//! End-to-end engagement walkthroughs against the in-memory backend.

use std::sync::Arc;

use hireline_core::{
    Actor, DeliverableStatus, EscrowStatus, NewDeliverable, NewProject, NewProposal, ProjectStatus,
    ProposalStatus,
};
use hireline_engine::{
    BroadcastNotifier, CounterOffer, Engine, EngineConfig, EngineError, EventKind, ReleaseRequest,
    Resubmission, ADMIN_RECIPIENT,
};
use hireline_storage::MemoryStorage;
use rust_decimal::Decimal;

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn setup() -> (Engine<MemoryStorage>, BroadcastNotifier) {
    let notifier = BroadcastNotifier::new(1024);
    let engine = Engine::new(Arc::new(MemoryStorage::new()), EngineConfig::default())
        .with_notifier(Arc::new(notifier.clone()));
    (engine, notifier)
}

async fn post_project(engine: &Engine<MemoryStorage>, client: &Actor) -> String {
    engine
        .create_project(
            client,
            NewProject {
                title: "Company website".into(),
                budget_min: dec("800"),
                budget_max: dec("1000"),
                skills: vec!["rust".into(), "css".into()],
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .id
}

async fn bid(engine: &Engine<MemoryStorage>, who: &Actor, project_id: &str, budget: &str) -> String {
    engine
        .submit_proposal(
            who,
            project_id,
            NewProposal {
                budget: dec(budget),
                estimated_duration: "4 weeks".into(),
                pitch: "Portfolio attached".into(),
            },
        )
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn accepted_budget_splits_into_fee_and_payout() {
    let (engine, _) = setup();
    let client = Actor::client("alice");
    let project_id = post_project(&engine, &client).await;
    let proposal_id = bid(&engine, &Actor::freelancer("bob"), &project_id, "900").await;

    let acceptance = engine.accept_proposal(&client, &proposal_id).await.unwrap();
    let escrow = acceptance.project.escrow.unwrap();
    assert_eq!(escrow.status, EscrowStatus::PendingPayment);
    assert_eq!(escrow.escrow_amount.to_string(), "900.00");
    assert_eq!(escrow.platform_fee_amount.to_string(), "45.00");
    assert_eq!(escrow.freelancer_payout_amount.to_string(), "855.00");
    assert_eq!(escrow.platform_fee_percentage.percent(), dec("5"));
}

#[tokio::test]
async fn bounded_negotiation_then_accept() {
    let (engine, _) = setup();
    let client = Actor::client("alice");
    let bob = Actor::freelancer("bob");
    let project_id = post_project(&engine, &client).await;
    let proposal_id = bid(&engine, &bob, &project_id, "900").await;
    let sibling_a = bid(&engine, &Actor::freelancer("carol"), &project_id, "990").await;
    let sibling_b = bid(&engine, &Actor::freelancer("dave"), &project_id, "870").await;

    let p = engine
        .counter_offer(&bob, &proposal_id, CounterOffer { amount: dec("950"), note: None })
        .await
        .unwrap();
    assert_eq!(p.negotiation_count, 1);
    assert_eq!(p.status, ProposalStatus::Negotiating);

    let p = engine
        .counter_offer(
            &client,
            &proposal_id,
            CounterOffer { amount: dec("920"), note: Some("meet halfway".into()) },
        )
        .await
        .unwrap();
    assert_eq!(p.negotiation_count, 2);
    assert_eq!(p.status, ProposalStatus::FinalOffer);

    let err = engine
        .counter_offer(&bob, &proposal_id, CounterOffer { amount: dec("930"), note: None })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NegotiationLimitExceeded { .. }));

    let acceptance = engine.accept_proposal(&client, &proposal_id).await.unwrap();
    assert_eq!(acceptance.proposal.status, ProposalStatus::Accepted);
    assert_eq!(acceptance.proposal.proposed_budget, dec("920"));
    assert_eq!(acceptance.project.escrow.unwrap().escrow_amount, dec("920"));
    for sibling in [sibling_a, sibling_b] {
        assert_eq!(
            engine.proposal(&sibling).await.unwrap().status,
            ProposalStatus::Rejected
        );
    }
}

#[tokio::test]
async fn full_engagement_to_completion() {
    let (engine, notifier) = setup();
    let mut rx = notifier.subscribe();
    let client = Actor::client("alice");
    let bob = Actor::freelancer("bob");
    let admin = Actor::admin("ops");

    let project_id = post_project(&engine, &client).await;
    let proposal_id = bid(&engine, &bob, &project_id, "900").await;
    engine.accept_proposal(&client, &proposal_id).await.unwrap();

    engine
        .submit_payment_proof(&client, &project_id, "wire-2025-0001")
        .await
        .unwrap();
    let project = engine
        .verify_payment(&admin, &project_id, Some("matched".into()))
        .await
        .unwrap();
    assert_eq!(project.status, ProjectStatus::InProgress);

    let d = engine
        .submit_deliverable(
            &bob,
            &project_id,
            NewDeliverable {
                title: "Site build".into(),
                description: "All pages".into(),
                attachments: vec!["archive-ref".into()],
            },
        )
        .await
        .unwrap();
    assert_eq!(d.status, DeliverableStatus::Submitted);

    let d = engine.request_revision(&client, &d.id, "fix header").await.unwrap();
    assert_eq!(d.status, DeliverableStatus::NeedsRevision);
    assert_eq!(d.revision_number, 2);

    let d = engine
        .resubmit_deliverable(&bob, &d.id, Resubmission::default())
        .await
        .unwrap();
    assert_eq!(d.status, DeliverableStatus::Submitted);

    let d = engine.approve_deliverable(&client, &d.id).await.unwrap();
    assert_eq!(d.status, DeliverableStatus::Approved);

    let project = engine.request_release(&client, &project_id).await.unwrap();
    assert_eq!(project.status, ProjectStatus::InReview);
    assert_eq!(project.escrow_status(), Some(EscrowStatus::PendingRelease));

    let project = engine
        .release_escrow(
            &admin,
            &project_id,
            ReleaseRequest {
                transaction_reference: "payout-77".into(),
                note: Some("paid".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(project.status, ProjectStatus::Completed);
    assert_eq!(project.escrow_status(), Some(EscrowStatus::Released));

    let mut kinds = Vec::new();
    while let Ok(env) = rx.try_recv() {
        kinds.push((env.recipient, env.notification.kind));
    }
    assert!(kinds.contains(&(ADMIN_RECIPIENT.to_string(), EventKind::PaymentSubmitted)));
    assert!(kinds.contains(&("bob".to_string(), EventKind::ContactsRevealed)));
    assert!(kinds.contains(&("alice".to_string(), EventKind::ContactsRevealed)));
    assert!(kinds.contains(&(ADMIN_RECIPIENT.to_string(), EventKind::ReleaseRequested)));
    assert!(kinds.contains(&("bob".to_string(), EventKind::ProjectCompleted)));
}

#[tokio::test]
async fn errors_explain_why() {
    let (engine, _) = setup();
    let client = Actor::client("alice");
    let project_id = post_project(&engine, &client).await;
    let proposal_id = bid(&engine, &Actor::freelancer("bob"), &project_id, "900").await;
    engine.accept_proposal(&client, &proposal_id).await.unwrap();

    let err = engine.request_release(&client, &project_id).await.unwrap_err();
    let details = err.details();
    assert_eq!(details["entity"], "project");
    assert_eq!(details["id"], project_id.as_str());
    assert_eq!(details["expected"], "in_review");
    assert_eq!(details["actual"], "open");
}
