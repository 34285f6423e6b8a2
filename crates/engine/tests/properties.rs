//! Invariants checked across many inputs rather than single examples.

use std::sync::Arc;

use hireline_core::{
    Actor, DeliverableStatus, EscrowStatus, FeeRate, Lifecycle, NewDeliverable, NewProject,
    NewProposal, MAX_NEGOTIATION_ROUNDS,
};
use hireline_engine::{CounterOffer, Engine, EngineConfig, EngineError, Resubmission};
use hireline_storage::MemoryStorage;
use rust_decimal::Decimal;

fn engine_with_fee(percent: &str) -> Engine<MemoryStorage> {
    let config = EngineConfig {
        platform_fee: FeeRate::from_percent(percent.parse().unwrap()).unwrap(),
    };
    Engine::new(Arc::new(MemoryStorage::new()), config)
}

async fn accepted(engine: &Engine<MemoryStorage>, budget: Decimal) -> hireline_core::Project {
    let client = Actor::client("alice");
    let project = engine
        .create_project(
            &client,
            NewProject {
                title: "t".into(),
                budget_min: Decimal::new(1, 2),
                budget_max: Decimal::from(1_000_000),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let proposal = engine
        .submit_proposal(
            &Actor::freelancer("bob"),
            &project.id,
            NewProposal {
                budget,
                estimated_duration: "1 week".into(),
                pitch: "p".into(),
            },
        )
        .await
        .unwrap();
    engine
        .accept_proposal(&client, &proposal.id)
        .await
        .unwrap()
        .project
}

#[tokio::test]
async fn escrow_figures_always_balance() {
    let budgets = ["0.01", "0.05", "0.10", "1.99", "12.34", "99.99", "333.33", "900", "1234.56", "99999.99"];
    for fee in ["0", "2.5", "5", "7.25", "12.5", "33.33", "100"] {
        let engine = engine_with_fee(fee);
        for budget in budgets {
            let project = accepted(&engine, budget.parse().unwrap()).await;
            let e = project.escrow.unwrap();
            assert_eq!(
                e.platform_fee_amount + e.freelancer_payout_amount,
                e.escrow_amount,
                "fee {fee}% on {budget}"
            );
            assert!(e.platform_fee_amount >= Decimal::ZERO);
            assert!(e.freelancer_payout_amount >= Decimal::ZERO);
            assert_eq!(e.platform_fee_amount.scale(), 2);
        }
    }
}

#[tokio::test]
async fn negotiation_count_never_exceeds_cap() {
    let engine = engine_with_fee("5");
    let project = engine
        .create_project(
            &Actor::client("alice"),
            NewProject {
                title: "t".into(),
                budget_min: Decimal::from(1),
                budget_max: Decimal::from(10),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let proposal = engine
        .submit_proposal(
            &Actor::freelancer("bob"),
            &project.id,
            NewProposal {
                budget: Decimal::from(5),
                estimated_duration: "1d".into(),
                pitch: "p".into(),
            },
        )
        .await
        .unwrap();

    let actors = [Actor::freelancer("bob"), Actor::client("alice")];
    for attempt in 0..6u8 {
        let result = engine
            .counter_offer(
                &actors[attempt as usize % 2],
                &proposal.id,
                CounterOffer {
                    amount: Decimal::from(6 + attempt as i64),
                    note: None,
                },
            )
            .await;
        if attempt < MAX_NEGOTIATION_ROUNDS {
            assert!(result.is_ok(), "round {attempt}: {result:?}");
        } else {
            assert!(matches!(result, Err(EngineError::NegotiationLimitExceeded { .. })));
        }
        let count = engine.proposal(&proposal.id).await.unwrap().negotiation_count;
        assert!(count <= MAX_NEGOTIATION_ROUNDS);
    }
}

#[tokio::test]
async fn revision_number_tracks_requests() {
    let engine = engine_with_fee("5");
    let client = Actor::client("alice");
    let bob = Actor::freelancer("bob");
    let admin = Actor::admin("ops");
    let project = accepted(&engine, Decimal::from(500)).await;
    engine.submit_payment_proof(&client, &project.id, "r").await.unwrap();
    engine.verify_payment(&admin, &project.id, None).await.unwrap();

    let d = engine
        .submit_deliverable(
            &bob,
            &project.id,
            NewDeliverable {
                title: "draft".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    for round in 1..=5u32 {
        let after = engine
            .request_revision(&client, &d.id, &format!("round {round}"))
            .await
            .unwrap();
        assert_eq!(after.revision_number, 1 + round);
        assert_eq!(after.revisions.len() as u32, round);
        let back = engine
            .resubmit_deliverable(&bob, &d.id, Resubmission::default())
            .await
            .unwrap();
        assert_eq!(back.status, DeliverableStatus::Submitted);
        assert_eq!(back.revision_number, 1 + round);
    }
}

#[test]
fn escrow_edges_are_exactly_the_ledger() {
    use EscrowStatus::*;
    let forward = [
        (PendingPayment, PaymentSubmitted),
        (PaymentSubmitted, PaymentSubmitted),
        (PaymentSubmitted, VerifiedHeld),
        (VerifiedHeld, PendingRelease),
        (PendingRelease, Released),
        (Disputed, Refunded),
    ];
    for &from in EscrowStatus::ALL {
        for &to in EscrowStatus::ALL {
            let escape = from != Released
                && from != Refunded
                && from != Disputed
                && (to == Disputed || to == Refunded);
            let expected = forward.contains(&(from, to)) || escape;
            assert_eq!(from.can_transition_to(to), expected, "{from} -> {to}");
        }
    }
}
