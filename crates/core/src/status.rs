//! Status enums and their transition tables.
//!
//! Every entity in an engagement moves through a closed set of states. The
//! legal edges live here and nowhere else: the engine asks
//! [`Lifecycle::can_transition_to`] before writing, and uses
//! [`Lifecycle::sources_of`] to explain a refusal.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Common behaviour of every status enum.
pub trait Lifecycle: Copy + Eq + fmt::Display + Send + Sync + 'static {
    /// Entity name used in error context ("project", "proposal", ...).
    const ENTITY: &'static str;

    /// Every variant, in declaration order.
    const ALL: &'static [Self];

    /// Whether the table contains the edge `self -> next`.
    fn can_transition_to(self, next: Self) -> bool;

    /// A state with no outgoing edges.
    fn is_terminal(self) -> bool {
        !Self::ALL.iter().any(|&next| self.can_transition_to(next))
    }

    /// States that have an edge into `target`.
    fn sources_of(target: Self) -> Vec<Self> {
        Self::ALL
            .iter()
            .copied()
            .filter(|s| s.can_transition_to(target))
            .collect()
    }
}

/// Render a set of states as `a|b|c` for error messages.
pub fn describe_states<S: Lifecycle>(states: &[S]) -> String {
    if states.is_empty() {
        return "(none)".to_string();
    }
    states
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join("|")
}

// ──────────────────────────────────────────────
// Project
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Open,
    InProgress,
    InReview,
    Completed,
    Cancelled,
}

impl ProjectStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Open => "open",
            ProjectStatus::InProgress => "in_progress",
            ProjectStatus::InReview => "in_review",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }
}

impl Lifecycle for ProjectStatus {
    const ENTITY: &'static str = "project";
    const ALL: &'static [Self] = &[
        ProjectStatus::Open,
        ProjectStatus::InProgress,
        ProjectStatus::InReview,
        ProjectStatus::Completed,
        ProjectStatus::Cancelled,
    ];

    fn can_transition_to(self, next: Self) -> bool {
        use ProjectStatus::*;
        matches!(
            (self, next),
            (Open, InProgress)
                | (Open, Cancelled)
                | (InProgress, InReview)
                | (InProgress, Cancelled)
                | (InReview, Completed)
                | (InReview, Cancelled)
        )
    }
}

// ──────────────────────────────────────────────
// Proposal
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Negotiating,
    FinalOffer,
    Accepted,
    Rejected,
    Withdrawn,
}

impl ProposalStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Negotiating => "negotiating",
            ProposalStatus::FinalOffer => "final_offer",
            ProposalStatus::Accepted => "accepted",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Withdrawn => "withdrawn",
        }
    }

    /// Still open for negotiation or a decision.
    pub const fn is_live(self) -> bool {
        matches!(
            self,
            ProposalStatus::Pending | ProposalStatus::Negotiating | ProposalStatus::FinalOffer
        )
    }
}

impl Lifecycle for ProposalStatus {
    const ENTITY: &'static str = "proposal";
    const ALL: &'static [Self] = &[
        ProposalStatus::Pending,
        ProposalStatus::Negotiating,
        ProposalStatus::FinalOffer,
        ProposalStatus::Accepted,
        ProposalStatus::Rejected,
        ProposalStatus::Withdrawn,
    ];

    fn can_transition_to(self, next: Self) -> bool {
        use ProposalStatus::*;
        match (self, next) {
            (Pending, Negotiating) | (Negotiating, FinalOffer) => true,
            (from, Accepted | Rejected | Withdrawn) => from.is_live(),
            _ => false,
        }
    }
}

// ──────────────────────────────────────────────
// Escrow
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    PendingPayment,
    PaymentSubmitted,
    VerifiedHeld,
    PendingRelease,
    Released,
    Disputed,
    Refunded,
}

impl EscrowStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            EscrowStatus::PendingPayment => "pending_payment",
            EscrowStatus::PaymentSubmitted => "payment_submitted",
            EscrowStatus::VerifiedHeld => "verified_held",
            EscrowStatus::PendingRelease => "pending_release",
            EscrowStatus::Released => "released",
            EscrowStatus::Disputed => "disputed",
            EscrowStatus::Refunded => "refunded",
        }
    }
}

impl Lifecycle for EscrowStatus {
    const ENTITY: &'static str = "escrow";
    const ALL: &'static [Self] = &[
        EscrowStatus::PendingPayment,
        EscrowStatus::PaymentSubmitted,
        EscrowStatus::VerifiedHeld,
        EscrowStatus::PendingRelease,
        EscrowStatus::Released,
        EscrowStatus::Disputed,
        EscrowStatus::Refunded,
    ];

    fn can_transition_to(self, next: Self) -> bool {
        use EscrowStatus::*;
        match (self, next) {
            (PendingPayment, PaymentSubmitted)
            // re-submission overwrites the proof reference
            | (PaymentSubmitted, PaymentSubmitted)
            | (PaymentSubmitted, VerifiedHeld)
            | (VerifiedHeld, PendingRelease)
            | (PendingRelease, Released) => true,
            (Released | Refunded, _) => false,
            (Disputed, Refunded) => true,
            (Disputed, _) => false,
            (_, Disputed | Refunded) => true,
            _ => false,
        }
    }
}

// ──────────────────────────────────────────────
// Deliverable
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverableStatus {
    Submitted,
    UnderReview,
    NeedsRevision,
    Approved,
    Rejected,
}

impl DeliverableStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            DeliverableStatus::Submitted => "submitted",
            DeliverableStatus::UnderReview => "under_review",
            DeliverableStatus::NeedsRevision => "needs_revision",
            DeliverableStatus::Approved => "approved",
            DeliverableStatus::Rejected => "rejected",
        }
    }
}

impl Lifecycle for DeliverableStatus {
    const ENTITY: &'static str = "deliverable";
    const ALL: &'static [Self] = &[
        DeliverableStatus::Submitted,
        DeliverableStatus::UnderReview,
        DeliverableStatus::NeedsRevision,
        DeliverableStatus::Approved,
        DeliverableStatus::Rejected,
    ];

    fn can_transition_to(self, next: Self) -> bool {
        use DeliverableStatus::*;
        matches!(
            (self, next),
            (Submitted, UnderReview)
                | (Submitted | UnderReview, Approved)
                | (Submitted | UnderReview, NeedsRevision)
                | (Submitted | UnderReview, Rejected)
                | (NeedsRevision, Submitted)
        )
    }
}

// ──────────────────────────────────────────────
// Milestone
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Completed,
    Approved,
}

impl MilestoneStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            MilestoneStatus::Pending => "pending",
            MilestoneStatus::InProgress => "in_progress",
            MilestoneStatus::Completed => "completed",
            MilestoneStatus::Approved => "approved",
        }
    }
}

impl Lifecycle for MilestoneStatus {
    const ENTITY: &'static str = "milestone";
    const ALL: &'static [Self] = &[
        MilestoneStatus::Pending,
        MilestoneStatus::InProgress,
        MilestoneStatus::Completed,
        MilestoneStatus::Approved,
    ];

    fn can_transition_to(self, next: Self) -> bool {
        use MilestoneStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Completed)
                | (Completed, Approved)
                | (Completed, InProgress)
                | (Approved, InProgress)
        )
    }
}

macro_rules! display_via_as_str {
    ($($ty:ty),*) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }
        )*
    };
}

display_via_as_str!(
    ProjectStatus,
    ProposalStatus,
    EscrowStatus,
    DeliverableStatus,
    MilestoneStatus
);
