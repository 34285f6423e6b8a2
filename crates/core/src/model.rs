//! Engagement records.
//!
//! A Project owns its Proposals, Milestones and Deliverables by id; each child
//! carries its `project_id`. The escrow figures live on the Project because
//! they are derived once, from the accepted Proposal, and never duplicated.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::actor::{Actor, Role};
use crate::money::{EscrowSplit, FeeRate};
use crate::status::{
    DeliverableStatus, EscrowStatus, MilestoneStatus, ProjectStatus, ProposalStatus,
};

// ──────────────────────────────────────────────
// Project + escrow
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub client_id: String,
    /// Absent until a proposal is accepted.
    pub freelancer_id: Option<String>,
    pub title: String,
    pub description: String,
    pub status: ProjectStatus,
    pub budget_min: Decimal,
    pub budget_max: Decimal,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deadline: Option<OffsetDateTime>,
    pub duration: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub accepted_proposal_id: Option<String>,
    pub escrow: Option<Escrow>,
    pub cancellation_note: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Project {
    pub fn is_client(&self, user_id: &str) -> bool {
        self.client_id == user_id
    }

    pub fn is_freelancer(&self, user_id: &str) -> bool {
        self.freelancer_id.as_deref() == Some(user_id)
    }

    /// Client or assigned freelancer.
    pub fn is_party(&self, user_id: &str) -> bool {
        self.is_client(user_id) || self.is_freelancer(user_id)
    }

    pub fn escrow_status(&self) -> Option<EscrowStatus> {
        self.escrow.as_ref().map(|e| e.status)
    }

    /// The paying client and administrators may see the payment proof.
    pub fn may_view_payment_proof(&self, actor: Option<&Actor>) -> bool {
        actor.is_some_and(|a| {
            a.is_admin() || (a.role == Role::Client && self.is_client(&a.user_id))
        })
    }

    /// This project as `actor` may see it: the payment-proof reference is
    /// cleared for anyone not allowed to view the proof.
    pub fn redacted_for(mut self, actor: Option<&Actor>) -> Self {
        if !self.may_view_payment_proof(actor) {
            if let Some(escrow) = self.escrow.as_mut() {
                escrow.payment_proof_reference = None;
            }
        }
        self
    }
}

/// Escrow state held on a Project once a proposal has been accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escrow {
    pub status: EscrowStatus,
    pub escrow_amount: Decimal,
    pub platform_fee_percentage: FeeRate,
    pub platform_fee_amount: Decimal,
    pub freelancer_payout_amount: Decimal,
    pub payment_proof_reference: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub payment_submitted_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub verified_at: Option<OffsetDateTime>,
    pub verification_note: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub release_requested_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub released_at: Option<OffsetDateTime>,
    pub release_transaction_reference: Option<String>,
    pub release_note: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub resolved_at: Option<OffsetDateTime>,
    pub resolution_note: Option<String>,
}

impl Escrow {
    /// Fresh escrow in `pending_payment` from a computed split.
    pub fn new(split: EscrowSplit, rate: FeeRate) -> Self {
        Escrow {
            status: EscrowStatus::PendingPayment,
            escrow_amount: split.escrow_amount,
            platform_fee_percentage: rate,
            platform_fee_amount: split.platform_fee_amount,
            freelancer_payout_amount: split.freelancer_payout_amount,
            payment_proof_reference: None,
            payment_submitted_at: None,
            verified_at: None,
            verification_note: None,
            release_requested_at: None,
            released_at: None,
            release_transaction_reference: None,
            release_note: None,
            resolved_at: None,
            resolution_note: None,
        }
    }

    pub fn split(&self) -> EscrowSplit {
        EscrowSplit {
            escrow_amount: self.escrow_amount,
            platform_fee_amount: self.platform_fee_amount,
            freelancer_payout_amount: self.freelancer_payout_amount,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProject {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub budget_min: Decimal,
    pub budget_max: Decimal,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deadline: Option<OffsetDateTime>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
}

// ──────────────────────────────────────────────
// Proposal
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub project_id: String,
    pub freelancer_id: String,
    pub proposed_budget: Decimal,
    /// First offer; never rewritten.
    pub original_budget: Decimal,
    pub estimated_duration: String,
    pub pitch: String,
    pub status: ProposalStatus,
    pub negotiation_count: u8,
    /// Append-only. The first entry is the freelancer's opening offer.
    pub negotiation_history: Vec<NegotiationEntry>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegotiationEntry {
    pub actor_role: Role,
    pub amount: Decimal,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewProposal {
    pub budget: Decimal,
    pub estimated_duration: String,
    pub pitch: String,
}

// ──────────────────────────────────────────────
// Milestone
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub status: MilestoneStatus,
    pub created_by: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub approved_at: Option<OffsetDateTime>,
    pub change_note: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMilestone {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
}

// ──────────────────────────────────────────────
// Deliverable
// ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deliverable {
    pub id: String,
    pub project_id: String,
    pub freelancer_id: String,
    pub title: String,
    pub description: String,
    /// File-store references; never raw bytes.
    #[serde(default)]
    pub attachments: Vec<String>,
    pub status: DeliverableStatus,
    /// 1 + number of revision requests applied.
    pub revision_number: u32,
    pub revisions: Vec<RevisionRequest>,
    pub rejection_reason: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub reviewed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionRequest {
    /// The revision the notes apply to.
    pub revision_number: u32,
    pub notes: String,
    pub requested_by: String,
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewDeliverable {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}
