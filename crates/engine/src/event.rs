//! Transition events handed to the notification collaborator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Recipient id that addresses the administrator queue rather than a user.
pub const ADMIN_RECIPIENT: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ProposalSubmitted,
    CounterOffer,
    ProposalAccepted,
    ProposalRejected,
    ProposalWithdrawn,
    EscrowInitialized,
    PaymentSubmitted,
    PaymentVerified,
    ContactsRevealed,
    ReleaseRequested,
    PaymentReleased,
    EscrowDisputed,
    EscrowRefunded,
    ProjectInReview,
    ProjectCompleted,
    ProjectCancelled,
    DeliverableSubmitted,
    DeliverableUnderReview,
    DeliverableApproved,
    RevisionRequested,
    DeliverableRejected,
    DeliverableResubmitted,
    MilestoneCreated,
    MilestoneUpdated,
}

impl EventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            EventKind::ProposalSubmitted => "proposal_submitted",
            EventKind::CounterOffer => "counter_offer",
            EventKind::ProposalAccepted => "proposal_accepted",
            EventKind::ProposalRejected => "proposal_rejected",
            EventKind::ProposalWithdrawn => "proposal_withdrawn",
            EventKind::EscrowInitialized => "escrow_initialized",
            EventKind::PaymentSubmitted => "payment_submitted",
            EventKind::PaymentVerified => "payment_verified",
            EventKind::ContactsRevealed => "contacts_revealed",
            EventKind::ReleaseRequested => "release_requested",
            EventKind::PaymentReleased => "payment_released",
            EventKind::EscrowDisputed => "escrow_disputed",
            EventKind::EscrowRefunded => "escrow_refunded",
            EventKind::ProjectInReview => "project_in_review",
            EventKind::ProjectCompleted => "project_completed",
            EventKind::ProjectCancelled => "project_cancelled",
            EventKind::DeliverableSubmitted => "deliverable_submitted",
            EventKind::DeliverableUnderReview => "deliverable_under_review",
            EventKind::DeliverableApproved => "deliverable_approved",
            EventKind::RevisionRequested => "revision_requested",
            EventKind::DeliverableRejected => "deliverable_rejected",
            EventKind::DeliverableResubmitted => "deliverable_resubmitted",
            EventKind::MilestoneCreated => "milestone_created",
            EventKind::MilestoneUpdated => "milestone_updated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One transition event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: EventKind,
    pub project_id: String,
    /// The record the event is about (proposal, deliverable, ...); the
    /// project id again for project-level events.
    pub subject_id: String,
    pub payload: serde_json::Value,
}

impl Notification {
    pub fn new(
        kind: EventKind,
        project_id: impl Into<String>,
        subject_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Notification {
            kind,
            project_id: project_id.into(),
            subject_id: subject_id.into(),
            payload,
        }
    }
}

/// A notification addressed to one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub recipient: String,
    pub notification: Notification,
}

/// Notifications collected while an operation runs, dispatched after commit.
#[derive(Debug, Default)]
pub(crate) struct Outbox(Vec<Envelope>);

impl Outbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn send(&mut self, recipient: impl Into<String>, notification: Notification) {
        self.0.push(Envelope {
            recipient: recipient.into(),
            notification,
        });
    }

    /// Send the same notification to several recipients.
    pub(crate) fn send_all<'a>(
        &mut self,
        recipients: impl IntoIterator<Item = &'a str>,
        notification: Notification,
    ) {
        for r in recipients {
            self.send(r, notification.clone());
        }
    }

    pub(crate) fn into_envelopes(self) -> Vec<Envelope> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_serializes_snake_case() {
        let n = Notification::new(EventKind::ContactsRevealed, "p1", "p1", json!({}));
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["kind"], "contacts_revealed");
        assert_eq!(EventKind::ContactsRevealed.to_string(), "contacts_revealed");
    }

    #[test]
    fn outbox_fans_out_in_order() {
        let mut outbox = Outbox::new();
        outbox.send(ADMIN_RECIPIENT, Notification::new(EventKind::PaymentSubmitted, "p1", "p1", json!(null)));
        outbox.send_all(
            ["alice", "bob"],
            Notification::new(EventKind::PaymentVerified, "p1", "p1", json!(null)),
        );
        let recipients: Vec<_> = outbox
            .into_envelopes()
            .into_iter()
            .map(|e| e.recipient)
            .collect();
        assert_eq!(recipients, ["admin", "alice", "bob"]);
    }
}
