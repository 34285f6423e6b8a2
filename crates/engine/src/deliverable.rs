//! Deliverable review workflow.
//!
//! `submitted -> under_review -> {approved | needs_revision | rejected}`,
//! with review decisions also allowed straight from `submitted`, and
//! `needs_revision -> submitted` on resubmission. Each revision request
//! appends its notes and bumps `revision_number`.

use hireline_core::{
    Actor, Deliverable, DeliverableStatus, Lifecycle, NewDeliverable, Project, ProjectStatus,
    RevisionRequest,
};
use hireline_storage::MarketStorage;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::engine::{
    new_id, now, optional_text, require_client, require_freelancer, required_text, Applied,
    Engine,
};
use crate::error::{ensure_status, ensure_transition, EngineError};
use crate::event::{EventKind, Notification, Outbox};

/// Changes a freelancer may make when resubmitting after a revision request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Resubmission {
    #[serde(default)]
    pub description: Option<String>,
    /// Replaces the attachment list when present.
    #[serde(default)]
    pub attachments: Option<Vec<String>>,
}

fn clean_attachments(attachments: Vec<String>) -> Result<Vec<String>, EngineError> {
    attachments
        .into_iter()
        .map(|a| required_text("attachments", &a))
        .collect()
}

/// Deliverables on a completed or cancelled project are frozen.
fn ensure_project_active(project: &Project, operation: &'static str) -> Result<(), EngineError> {
    if project.status.is_terminal() {
        return Err(EngineError::wrong_state(
            &project.id,
            operation,
            &[ProjectStatus::InProgress, ProjectStatus::InReview],
            project.status,
        ));
    }
    Ok(())
}

/// A client review decision.
#[derive(Debug, Clone, Copy)]
enum Review {
    Approve,
    RequestRevision,
    Reject,
}

impl Review {
    fn target(self) -> DeliverableStatus {
        match self {
            Review::Approve => DeliverableStatus::Approved,
            Review::RequestRevision => DeliverableStatus::NeedsRevision,
            Review::Reject => DeliverableStatus::Rejected,
        }
    }

    fn operation(self) -> &'static str {
        match self {
            Review::Approve => "approve",
            Review::RequestRevision => "request a revision of",
            Review::Reject => "reject",
        }
    }

    fn event(self) -> EventKind {
        match self {
            Review::Approve => EventKind::DeliverableApproved,
            Review::RequestRevision => EventKind::RevisionRequested,
            Review::Reject => EventKind::DeliverableRejected,
        }
    }
}

impl<S: MarketStorage> Engine<S> {
    /// The assigned freelancer hands in work. Moves an `in_progress`
    /// project to `in_review`.
    pub async fn submit_deliverable(
        &self,
        actor: &Actor,
        project_id: &str,
        input: NewDeliverable,
    ) -> Result<Deliverable, EngineError> {
        let mut snap = self.begin().await?;
        let result = self
            .submit_deliverable_in(&mut snap, actor, project_id, input)
            .await;
        let deliverable = self.finish(snap, "submit deliverable", result).await?;
        info!(
            deliverable_id = %deliverable.id,
            project_id = %deliverable.project_id,
            "deliverable submitted"
        );
        Ok(deliverable)
    }

    async fn submit_deliverable_in(
        &self,
        snap: &mut S::Snapshot,
        actor: &Actor,
        project_id: &str,
        input: NewDeliverable,
    ) -> Result<Applied<Deliverable>, EngineError> {
        let stored = self.load_for_update::<Project>(snap, project_id).await?;
        let mut project = stored.record;
        require_freelancer(actor, &project, "submit a deliverable on", "project", project_id)?;
        ensure_status(
            project_id,
            "submit a deliverable on",
            &[ProjectStatus::InProgress, ProjectStatus::InReview],
            project.status,
        )?;
        let title = required_text("title", &input.title)?;
        let attachments = clean_attachments(input.attachments)?;

        let at = now();
        let deliverable = Deliverable {
            id: new_id(),
            project_id: project_id.to_string(),
            freelancer_id: actor.user_id.clone(),
            title,
            description: input.description.trim().to_string(),
            attachments,
            status: DeliverableStatus::Submitted,
            revision_number: 1,
            revisions: Vec::new(),
            rejection_reason: None,
            submitted_at: at,
            reviewed_at: None,
            created_at: at,
            updated_at: at,
        };
        self.create(snap, &deliverable).await?;

        // The project is written even when already in review so that a
        // concurrent cancellation conflicts with this submission.
        let mut outbox = Outbox::new();
        if project.status == ProjectStatus::InProgress {
            self.enter_review(&mut project, &mut outbox)?;
        }
        project.updated_at = at;
        self.save(snap, stored.version, &project).await?;
        outbox.send(
            project.client_id.clone(),
            Notification::new(
                EventKind::DeliverableSubmitted,
                project_id,
                &deliverable.id,
                json!({ "title": deliverable.title }),
            ),
        );
        Ok(Applied::new(deliverable, outbox))
    }

    /// Client signals they have started reviewing.
    pub async fn mark_under_review(
        &self,
        actor: &Actor,
        deliverable_id: &str,
    ) -> Result<Deliverable, EngineError> {
        let mut snap = self.begin().await?;
        let result = self
            .mark_under_review_in(&mut snap, actor, deliverable_id)
            .await;
        let deliverable = self.finish(snap, "review deliverable", result).await?;
        info!(deliverable_id = %deliverable.id, "deliverable under review");
        Ok(deliverable)
    }

    async fn mark_under_review_in(
        &self,
        snap: &mut S::Snapshot,
        actor: &Actor,
        deliverable_id: &str,
    ) -> Result<Applied<Deliverable>, EngineError> {
        let (stored, project) = self.deliverable_and_project(snap, deliverable_id).await?;
        let mut deliverable = stored.record;
        require_client(actor, &project, "review", "deliverable", deliverable_id)?;
        ensure_transition(
            deliverable_id,
            "review",
            deliverable.status,
            DeliverableStatus::UnderReview,
        )?;
        ensure_project_active(&project, "review a deliverable on")?;
        deliverable.status = DeliverableStatus::UnderReview;
        deliverable.updated_at = now();
        self.save(snap, stored.version, &deliverable).await?;

        let mut outbox = Outbox::new();
        outbox.send(
            deliverable.freelancer_id.clone(),
            Notification::new(
                EventKind::DeliverableUnderReview,
                &deliverable.project_id,
                deliverable_id,
                json!({}),
            ),
        );
        Ok(Applied::new(deliverable, outbox))
    }

    pub async fn approve_deliverable(
        &self,
        actor: &Actor,
        deliverable_id: &str,
    ) -> Result<Deliverable, EngineError> {
        self.review(actor, deliverable_id, Review::Approve, None).await
    }

    /// Send the work back with notes. `revision_number` goes up by one.
    pub async fn request_revision(
        &self,
        actor: &Actor,
        deliverable_id: &str,
        notes: &str,
    ) -> Result<Deliverable, EngineError> {
        self.review(actor, deliverable_id, Review::RequestRevision, Some(notes))
            .await
    }

    /// Terminal rejection.
    pub async fn reject_deliverable(
        &self,
        actor: &Actor,
        deliverable_id: &str,
        reason: Option<&str>,
    ) -> Result<Deliverable, EngineError> {
        self.review(actor, deliverable_id, Review::Reject, reason).await
    }

    async fn review(
        &self,
        actor: &Actor,
        deliverable_id: &str,
        review: Review,
        text: Option<&str>,
    ) -> Result<Deliverable, EngineError> {
        let mut snap = self.begin().await?;
        let result = self
            .review_in(&mut snap, actor, deliverable_id, review, text)
            .await;
        let deliverable = self.finish(snap, review.operation(), result).await?;
        info!(
            deliverable_id = %deliverable.id,
            status = %deliverable.status,
            revision = deliverable.revision_number,
            "deliverable reviewed"
        );
        Ok(deliverable)
    }

    async fn review_in(
        &self,
        snap: &mut S::Snapshot,
        actor: &Actor,
        deliverable_id: &str,
        review: Review,
        text: Option<&str>,
    ) -> Result<Applied<Deliverable>, EngineError> {
        let (stored, project) = self.deliverable_and_project(snap, deliverable_id).await?;
        let mut deliverable = stored.record;
        require_client(actor, &project, review.operation(), "deliverable", deliverable_id)?;
        let target = review.target();
        ensure_transition(deliverable_id, review.operation(), deliverable.status, target)?;
        ensure_project_active(&project, "review a deliverable on")?;

        let at = now();
        match review {
            Review::Approve => {}
            Review::RequestRevision => {
                let notes = required_text("notes", text.unwrap_or_default())?;
                deliverable.revisions.push(RevisionRequest {
                    revision_number: deliverable.revision_number,
                    notes,
                    requested_by: actor.user_id.clone(),
                    requested_at: at,
                });
                deliverable.revision_number += 1;
            }
            Review::Reject => {
                deliverable.rejection_reason = optional_text(text.map(str::to_string));
            }
        }
        deliverable.status = target;
        deliverable.reviewed_at = Some(at);
        deliverable.updated_at = at;
        self.save(snap, stored.version, &deliverable).await?;

        let mut outbox = Outbox::new();
        outbox.send(
            deliverable.freelancer_id.clone(),
            Notification::new(
                review.event(),
                &deliverable.project_id,
                deliverable_id,
                json!({
                    "status": deliverable.status,
                    "revision_number": deliverable.revision_number,
                    "notes": text,
                }),
            ),
        );
        Ok(Applied::new(deliverable, outbox))
    }

    /// Freelancer answers a revision request. Back to `submitted`.
    pub async fn resubmit_deliverable(
        &self,
        actor: &Actor,
        deliverable_id: &str,
        changes: Resubmission,
    ) -> Result<Deliverable, EngineError> {
        let mut snap = self.begin().await?;
        let result = self
            .resubmit_deliverable_in(&mut snap, actor, deliverable_id, changes)
            .await;
        let deliverable = self.finish(snap, "resubmit deliverable", result).await?;
        info!(
            deliverable_id = %deliverable.id,
            revision = deliverable.revision_number,
            "deliverable resubmitted"
        );
        Ok(deliverable)
    }

    async fn resubmit_deliverable_in(
        &self,
        snap: &mut S::Snapshot,
        actor: &Actor,
        deliverable_id: &str,
        changes: Resubmission,
    ) -> Result<Applied<Deliverable>, EngineError> {
        let (stored, project) = self.deliverable_and_project(snap, deliverable_id).await?;
        let mut deliverable = stored.record;
        require_freelancer(actor, &project, "resubmit", "deliverable", deliverable_id)?;
        ensure_transition(
            deliverable_id,
            "resubmit",
            deliverable.status,
            DeliverableStatus::Submitted,
        )?;
        ensure_project_active(&project, "resubmit a deliverable on")?;

        if let Some(description) = changes.description {
            deliverable.description = description.trim().to_string();
        }
        if let Some(attachments) = changes.attachments {
            deliverable.attachments = clean_attachments(attachments)?;
        }
        let at = now();
        deliverable.status = DeliverableStatus::Submitted;
        deliverable.submitted_at = at;
        deliverable.reviewed_at = None;
        deliverable.updated_at = at;
        self.save(snap, stored.version, &deliverable).await?;

        let mut outbox = Outbox::new();
        outbox.send(
            project.client_id.clone(),
            Notification::new(
                EventKind::DeliverableResubmitted,
                &project.id,
                deliverable_id,
                json!({ "revision_number": deliverable.revision_number }),
            ),
        );
        Ok(Applied::new(deliverable, outbox))
    }

    async fn deliverable_and_project(
        &self,
        snap: &mut S::Snapshot,
        deliverable_id: &str,
    ) -> Result<(hireline_storage::Versioned<Deliverable>, Project), EngineError> {
        let stored = self
            .load_for_update::<Deliverable>(snap, deliverable_id)
            .await?;
        let project = self
            .load_for_update::<Project>(snap, &stored.record.project_id)
            .await?
            .record;
        Ok((stored, project))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testkit::*;
    use crate::lifecycle::{CancelRequest, CancelResolution};
    use hireline_storage::StorageExt;

    fn work(title: &str) -> NewDeliverable {
        NewDeliverable {
            title: title.into(),
            description: "first cut".into(),
            attachments: vec!["ref-abc".into()],
        }
    }

    #[tokio::test]
    async fn first_submission_moves_project_to_review() {
        let (engine, _) = engine();
        let project = funded_project(&engine).await;
        let d = engine
            .submit_deliverable(&freelancer(), &project.id, work("Homepage"))
            .await
            .unwrap();
        assert_eq!(d.status, DeliverableStatus::Submitted);
        assert_eq!(d.revision_number, 1);
        let project = engine.project(&project.id).await.unwrap();
        assert_eq!(project.status, ProjectStatus::InReview);

        // A second deliverable while in review is fine and keeps the status.
        engine
            .submit_deliverable(&freelancer(), &project.id, work("About page"))
            .await
            .unwrap();
        assert_eq!(engine.deliverables(&project.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn submission_in_review_bumps_project_version() {
        let (engine, _) = engine();
        let project = funded_project(&engine).await;
        engine
            .submit_deliverable(&freelancer(), &project.id, work("Homepage"))
            .await
            .unwrap();
        let before = engine.storage().load::<Project>(&project.id).await.unwrap();
        assert_eq!(before.record.status, ProjectStatus::InReview);

        engine
            .submit_deliverable(&freelancer(), &project.id, work("About page"))
            .await
            .unwrap();
        let after = engine.storage().load::<Project>(&project.id).await.unwrap();
        assert!(after.version > before.version);
        assert_eq!(after.record.status, ProjectStatus::InReview);
    }

    #[tokio::test]
    async fn submission_races_cancellation() {
        let (engine, _) = engine();
        let project = funded_project(&engine).await;
        engine
            .submit_deliverable(&freelancer(), &project.id, work("Homepage"))
            .await
            .unwrap();

        // Submission reads the project, then an admin cancels before it commits.
        let mut snap = engine.begin().await.unwrap();
        let staged = engine
            .submit_deliverable_in(&mut snap, &freelancer(), &project.id, work("Late page"))
            .await;
        assert!(staged.is_ok());
        engine
            .cancel_project(
                &admin(),
                &project.id,
                CancelRequest {
                    resolution: Some(CancelResolution::Refund),
                    note: None,
                },
            )
            .await
            .unwrap();
        let err = engine
            .finish(snap, "submit deliverable", staged)
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{err:?}");
        assert_eq!(engine.deliverables(&project.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn review_refused_once_project_is_closed() {
        let (engine, _) = engine();
        let project = funded_project(&engine).await;
        let d = engine
            .submit_deliverable(&freelancer(), &project.id, work("Homepage"))
            .await
            .unwrap();
        engine.refund_escrow(&admin(), &project.id, None).await.unwrap();

        let err = engine.approve_deliverable(&client(), &d.id).await.unwrap_err();
        assert!(matches!(&err, EngineError::InvalidState { entity: "project", .. }), "{err:?}");
        let err = engine.request_revision(&client(), &d.id, "more").await.unwrap_err();
        assert_eq!(err.code(), "invalid_state");
        let err = engine.reject_deliverable(&client(), &d.id, None).await.unwrap_err();
        assert_eq!(err.code(), "invalid_state");
        let err = engine.mark_under_review(&client(), &d.id).await.unwrap_err();
        assert_eq!(err.code(), "invalid_state");
        assert_eq!(
            engine.deliverable(&d.id).await.unwrap().status,
            DeliverableStatus::Submitted
        );
    }

    #[tokio::test]
    async fn submission_needs_started_project_and_assigned_freelancer() {
        let (engine, _) = engine();
        let project = accepted_project(&engine).await;
        let err = engine
            .submit_deliverable(&freelancer(), &project.id, work("x"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_state");

        let project = funded_project(&engine).await;
        let err = engine
            .submit_deliverable(&rival(), &project.id, work("x"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unauthorized");
    }

    #[tokio::test]
    async fn revision_cycle_counts_requests() {
        let (engine, _) = engine();
        let project = funded_project(&engine).await;
        let d = engine
            .submit_deliverable(&freelancer(), &project.id, work("Homepage"))
            .await
            .unwrap();

        let d1 = engine.request_revision(&client(), &d.id, "fix header").await.unwrap();
        assert_eq!(d1.status, DeliverableStatus::NeedsRevision);
        assert_eq!(d1.revision_number, 2);
        assert_eq!(d1.revisions.len(), 1);
        assert_eq!(d1.revisions[0].revision_number, 1);
        assert_eq!(d1.revisions[0].notes, "fix header");

        let err = engine.approve_deliverable(&client(), &d.id).await.unwrap_err();
        assert_eq!(err.code(), "invalid_state");

        let d2 = engine
            .resubmit_deliverable(
                &freelancer(),
                &d.id,
                Resubmission {
                    description: Some("header fixed".into()),
                    attachments: Some(vec!["ref-def".into()]),
                },
            )
            .await
            .unwrap();
        assert_eq!(d2.status, DeliverableStatus::Submitted);
        assert_eq!(d2.revision_number, 2);
        assert_eq!(d2.attachments, vec!["ref-def"]);

        engine.mark_under_review(&client(), &d.id).await.unwrap();
        let d3 = engine.request_revision(&client(), &d.id, "footer too").await.unwrap();
        assert_eq!(d3.revision_number, 3);
        assert_eq!(engine.revisions(&d.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn revision_needs_notes() {
        let (engine, _) = engine();
        let project = funded_project(&engine).await;
        let d = engine
            .submit_deliverable(&freelancer(), &project.id, work("Homepage"))
            .await
            .unwrap();
        let err = engine.request_revision(&client(), &d.id, "  ").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "notes", .. }));
        assert_eq!(
            engine.deliverable(&d.id).await.unwrap().status,
            DeliverableStatus::Submitted
        );
    }

    #[tokio::test]
    async fn review_is_client_only_and_rejection_is_terminal() {
        let (engine, _) = engine();
        let project = funded_project(&engine).await;
        let d = engine
            .submit_deliverable(&freelancer(), &project.id, work("Homepage"))
            .await
            .unwrap();
        let err = engine.approve_deliverable(&freelancer(), &d.id).await.unwrap_err();
        assert_eq!(err.code(), "unauthorized");
        let err = engine.mark_under_review(&admin(), &d.id).await.unwrap_err();
        assert_eq!(err.code(), "unauthorized");

        let d = engine
            .reject_deliverable(&client(), &d.id, Some("off brief"))
            .await
            .unwrap();
        assert_eq!(d.status, DeliverableStatus::Rejected);
        assert_eq!(d.rejection_reason.as_deref(), Some("off brief"));
        let err = engine
            .resubmit_deliverable(&freelancer(), &d.id, Resubmission::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_state");
    }
}
