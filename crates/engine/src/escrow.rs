//! Escrow ledger.
//!
//! Escrow is opened by [`accept_proposal`](Engine::accept_proposal) and then
//! advanced only by explicit calls here. Payment facts come from an
//! administrator (`verify`, `release`, `dispute`, `refund`); nothing else is
//! taken as proof that money moved.

use hireline_core::{Actor, Escrow, EscrowStatus, Lifecycle, Project, ProjectStatus};
use hireline_storage::{MarketStorage, StorageExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::collaborators::FileStoreError;
use crate::engine::{
    now, optional_text, parties, require_admin, require_client, required_text, Applied, Engine,
};
use crate::error::{ensure_status, ensure_transition, EngineError};
use crate::event::{EventKind, Notification, Outbox, ADMIN_RECIPIENT};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseRequest {
    pub transaction_reference: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// The project's escrow, checked for the edge `-> target`.
fn escrow_for<'a>(
    project: &'a mut Project,
    operation: &'static str,
    target: EscrowStatus,
) -> Result<&'a mut Escrow, EngineError> {
    let project_id = project.id.clone();
    let escrow = project.escrow.as_mut().ok_or_else(|| EngineError::InvalidState {
        entity: EscrowStatus::ENTITY,
        id: project_id.clone(),
        operation,
        expected: hireline_core::status::describe_states(&EscrowStatus::sources_of(target)),
        actual: "none".to_string(),
    })?;
    ensure_transition(&project_id, operation, escrow.status, target)?;
    Ok(escrow)
}

fn file_error(err: FileStoreError) -> EngineError {
    match err {
        FileStoreError::Empty => EngineError::validation("payment_proof", err.to_string()),
        FileStoreError::UnknownReference(reference) => EngineError::NotFound {
            entity: "file",
            id: reference,
        },
        FileStoreError::Backend(msg) => {
            EngineError::Storage(hireline_storage::StorageError::Backend(msg))
        }
    }
}

impl<S: MarketStorage> Engine<S> {
    /// Client records where the off-platform payment can be checked.
    ///
    /// Allowed from `pending_payment`, and again from `payment_submitted`, in
    /// which case the reference and timestamp are overwritten.
    pub async fn submit_payment_proof(
        &self,
        actor: &Actor,
        project_id: &str,
        reference: &str,
    ) -> Result<Project, EngineError> {
        let mut snap = self.begin().await?;
        let result = self
            .submit_payment_proof_in(&mut snap, actor, project_id, reference)
            .await;
        let project = self.finish(snap, "submit payment proof", result).await?;
        info!(project_id = %project.id, "payment proof submitted");
        Ok(project)
    }

    async fn submit_payment_proof_in(
        &self,
        snap: &mut S::Snapshot,
        actor: &Actor,
        project_id: &str,
        reference: &str,
    ) -> Result<Applied<Project>, EngineError> {
        let stored = self.load_for_update::<Project>(snap, project_id).await?;
        let mut project = stored.record;
        require_client(actor, &project, "submit payment proof for", "project", project_id)?;
        let reference = required_text("payment_proof_reference", reference)?;

        let at = now();
        let escrow = escrow_for(&mut project, "submit payment proof", EscrowStatus::PaymentSubmitted)?;
        let resubmission = escrow.status == EscrowStatus::PaymentSubmitted;
        escrow.status = EscrowStatus::PaymentSubmitted;
        escrow.payment_proof_reference = Some(reference);
        escrow.payment_submitted_at = Some(at);
        project.updated_at = at;
        self.save(snap, stored.version, &project).await?;

        let mut outbox = Outbox::new();
        outbox.send(
            ADMIN_RECIPIENT,
            Notification::new(
                EventKind::PaymentSubmitted,
                project_id,
                project_id,
                json!({ "resubmission": resubmission }),
            ),
        );
        Ok(Applied::new(project, outbox))
    }

    /// Store an uploaded proof image, then submit its reference.
    pub async fn submit_payment_proof_upload(
        &self,
        actor: &Actor,
        project_id: &str,
        bytes: Vec<u8>,
    ) -> Result<Project, EngineError> {
        // Refuse early so a doomed request leaves no orphaned file behind.
        // The submit below re-checks everything inside its own snapshot.
        let mut current = self.storage().load::<Project>(project_id).await?.record;
        require_client(actor, &current, "submit payment proof for", "project", project_id)?;
        escrow_for(&mut current, "submit payment proof", EscrowStatus::PaymentSubmitted)?;

        let reference = self.files().store(bytes).await.map_err(file_error)?;
        debug!(project_id, reference = %reference, "payment proof stored");
        self.submit_payment_proof(actor, project_id, &reference).await
    }

    /// Admin confirms the payment arrived. Funds are now held and the
    /// project starts; both parties get each other's contact details.
    pub async fn verify_payment(
        &self,
        actor: &Actor,
        project_id: &str,
        note: Option<String>,
    ) -> Result<Project, EngineError> {
        let mut snap = self.begin().await?;
        let result = self.verify_payment_in(&mut snap, actor, project_id, note).await;
        let project = self.finish(snap, "verify payment", result).await?;
        info!(project_id = %project.id, status = %project.status, "escrow verified");
        Ok(project)
    }

    async fn verify_payment_in(
        &self,
        snap: &mut S::Snapshot,
        actor: &Actor,
        project_id: &str,
        note: Option<String>,
    ) -> Result<Applied<Project>, EngineError> {
        require_admin(actor, "verify payment for", "project", project_id)?;
        let stored = self.load_for_update::<Project>(snap, project_id).await?;
        let mut project = stored.record;
        ensure_transition(project_id, "verify payment", project.status, ProjectStatus::InProgress)?;

        let at = now();
        let escrow = escrow_for(&mut project, "verify payment", EscrowStatus::VerifiedHeld)?;
        escrow.status = EscrowStatus::VerifiedHeld;
        escrow.verified_at = Some(at);
        escrow.verification_note = optional_text(note);
        project.status = ProjectStatus::InProgress;
        project.updated_at = at;
        self.save(snap, stored.version, &project).await?;

        let mut outbox = Outbox::new();
        outbox.send_all(
            parties(&project),
            Notification::new(
                EventKind::PaymentVerified,
                project_id,
                project_id,
                json!({ "status": project.status }),
            ),
        );
        if let Some(freelancer_id) = &project.freelancer_id {
            outbox.send(
                project.client_id.clone(),
                Notification::new(
                    EventKind::ContactsRevealed,
                    project_id,
                    project_id,
                    json!({ "counterparty": freelancer_id }),
                ),
            );
            outbox.send(
                freelancer_id.clone(),
                Notification::new(
                    EventKind::ContactsRevealed,
                    project_id,
                    project_id,
                    json!({ "counterparty": project.client_id }),
                ),
            );
        }
        Ok(Applied::new(project, outbox))
    }

    /// Client asks for the held funds to be paid out. The project must be
    /// in review.
    pub async fn request_release(
        &self,
        actor: &Actor,
        project_id: &str,
    ) -> Result<Project, EngineError> {
        let mut snap = self.begin().await?;
        let result = self.request_release_in(&mut snap, actor, project_id).await;
        let project = self.finish(snap, "request release", result).await?;
        info!(project_id = %project.id, "escrow release requested");
        Ok(project)
    }

    async fn request_release_in(
        &self,
        snap: &mut S::Snapshot,
        actor: &Actor,
        project_id: &str,
    ) -> Result<Applied<Project>, EngineError> {
        let stored = self.load_for_update::<Project>(snap, project_id).await?;
        let mut project = stored.record;
        require_client(actor, &project, "request release for", "project", project_id)?;
        ensure_status(
            project_id,
            "request release",
            &[ProjectStatus::InReview],
            project.status,
        )?;

        let at = now();
        let escrow = escrow_for(&mut project, "request release", EscrowStatus::PendingRelease)?;
        escrow.status = EscrowStatus::PendingRelease;
        escrow.release_requested_at = Some(at);
        let payout = escrow.freelancer_payout_amount;
        project.updated_at = at;
        self.save(snap, stored.version, &project).await?;

        let mut outbox = Outbox::new();
        let notification = Notification::new(
            EventKind::ReleaseRequested,
            project_id,
            project_id,
            json!({ "freelancer_payout_amount": payout }),
        );
        outbox.send(ADMIN_RECIPIENT, notification.clone());
        if let Some(freelancer_id) = &project.freelancer_id {
            outbox.send(freelancer_id.clone(), notification);
        }
        Ok(Applied::new(project, outbox))
    }

    /// Admin records the payout. Completes the project.
    pub async fn release_escrow(
        &self,
        actor: &Actor,
        project_id: &str,
        request: ReleaseRequest,
    ) -> Result<Project, EngineError> {
        let mut snap = self.begin().await?;
        let result = self
            .release_escrow_in(&mut snap, actor, project_id, request)
            .await;
        let project = self.finish(snap, "release escrow", result).await?;
        info!(project_id = %project.id, "escrow released, project completed");
        Ok(project)
    }

    async fn release_escrow_in(
        &self,
        snap: &mut S::Snapshot,
        actor: &Actor,
        project_id: &str,
        request: ReleaseRequest,
    ) -> Result<Applied<Project>, EngineError> {
        require_admin(actor, "release escrow for", "project", project_id)?;
        let transaction_reference =
            required_text("transaction_reference", &request.transaction_reference)?;
        let stored = self.load_for_update::<Project>(snap, project_id).await?;
        let mut project = stored.record;

        let at = now();
        let project_status = project.status;
        let escrow = escrow_for(&mut project, "release", EscrowStatus::Released)?;
        ensure_transition(project_id, "complete", project_status, ProjectStatus::Completed)?;
        escrow.status = EscrowStatus::Released;
        escrow.released_at = Some(at);
        escrow.release_transaction_reference = Some(transaction_reference);
        escrow.release_note = optional_text(request.note);
        let payout = escrow.freelancer_payout_amount;
        project.status = ProjectStatus::Completed;
        project.updated_at = at;
        self.save(snap, stored.version, &project).await?;

        let mut outbox = Outbox::new();
        outbox.send_all(
            parties(&project),
            Notification::new(
                EventKind::PaymentReleased,
                project_id,
                project_id,
                json!({ "freelancer_payout_amount": payout }),
            ),
        );
        outbox.send_all(
            parties(&project),
            Notification::new(EventKind::ProjectCompleted, project_id, project_id, json!({})),
        );
        Ok(Applied::new(project, outbox))
    }

    /// Admin freezes the escrow pending adjudication. The project keeps its
    /// status.
    pub async fn dispute_escrow(
        &self,
        actor: &Actor,
        project_id: &str,
        note: Option<String>,
    ) -> Result<Project, EngineError> {
        let mut snap = self.begin().await?;
        let result = self
            .resolve_escrow_in(&mut snap, actor, project_id, EscrowStatus::Disputed, note)
            .await;
        let project = self.finish(snap, "dispute escrow", result).await?;
        info!(project_id = %project.id, "escrow disputed");
        Ok(project)
    }

    /// Admin returns the funds to the client. A project that is not yet
    /// finished is cancelled.
    pub async fn refund_escrow(
        &self,
        actor: &Actor,
        project_id: &str,
        note: Option<String>,
    ) -> Result<Project, EngineError> {
        let mut snap = self.begin().await?;
        let result = self
            .resolve_escrow_in(&mut snap, actor, project_id, EscrowStatus::Refunded, note)
            .await;
        let project = self.finish(snap, "refund escrow", result).await?;
        info!(project_id = %project.id, status = %project.status, "escrow refunded");
        Ok(project)
    }

    async fn resolve_escrow_in(
        &self,
        snap: &mut S::Snapshot,
        actor: &Actor,
        project_id: &str,
        target: EscrowStatus,
        note: Option<String>,
    ) -> Result<Applied<Project>, EngineError> {
        let operation = match target {
            EscrowStatus::Refunded => "refund",
            _ => "dispute",
        };
        require_admin(actor, operation, "escrow", project_id)?;
        let stored = self.load_for_update::<Project>(snap, project_id).await?;
        let mut project = stored.record;

        let at = now();
        let escrow = escrow_for(&mut project, operation, target)?;
        escrow.status = target;
        escrow.resolved_at = Some(at);
        escrow.resolution_note = optional_text(note);
        let mut outbox = Outbox::new();
        if target == EscrowStatus::Refunded && !project.status.is_terminal() {
            project.status = ProjectStatus::Cancelled;
            self.reject_live_proposals(snap, project_id, at, &mut outbox)
                .await?;
        }
        project.updated_at = at;
        self.save(snap, stored.version, &project).await?;

        let kind = if target == EscrowStatus::Refunded {
            EventKind::EscrowRefunded
        } else {
            EventKind::EscrowDisputed
        };
        outbox.send_all(
            parties(&project),
            Notification::new(
                kind,
                project_id,
                project_id,
                json!({ "project_status": project.status }),
            ),
        );
        Ok(Applied::new(project, outbox))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testkit::*;

    #[tokio::test]
    async fn proof_resubmission_overwrites_reference() {
        let (engine, _) = engine();
        let project = accepted_project(&engine).await;
        let first = engine
            .submit_payment_proof(&client(), &project.id, "ref-1")
            .await
            .unwrap();
        let second = engine
            .submit_payment_proof(&client(), &project.id, "ref-2")
            .await
            .unwrap();
        let (a, b) = (first.escrow.unwrap(), second.escrow.unwrap());
        assert_eq!(b.status, EscrowStatus::PaymentSubmitted);
        assert_eq!(b.payment_proof_reference.as_deref(), Some("ref-2"));
        assert!(b.payment_submitted_at >= a.payment_submitted_at);
        assert_eq!(engine.projects(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn proof_requires_owner_and_open_escrow() {
        let (engine, _) = engine();
        let project = open_project(&engine).await;
        let err = engine
            .submit_payment_proof(&client(), &project.id, "ref")
            .await
            .unwrap_err();
        assert!(matches!(&err, EngineError::InvalidState { actual, .. } if actual == "none"));

        let project = accepted_project(&engine).await;
        for who in [freelancer(), admin(), Actor::client("mallory")] {
            let err = engine
                .submit_payment_proof(&who, &project.id, "ref")
                .await
                .unwrap_err();
            assert_eq!(err.code(), "unauthorized");
        }
        let err = engine
            .submit_payment_proof(&client(), &project.id, "   ")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[tokio::test]
    async fn verify_starts_work_and_reveals_contacts() {
        let (engine, notifier) = engine();
        let project = accepted_project(&engine).await;
        engine
            .submit_payment_proof(&client(), &project.id, "ref")
            .await
            .unwrap();
        let mut rx = notifier.subscribe();

        let err = engine
            .verify_payment(&client(), &project.id, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unauthorized");

        let project = engine
            .verify_payment(&admin(), &project.id, Some("ok".into()))
            .await
            .unwrap();
        assert_eq!(project.status, ProjectStatus::InProgress);
        let escrow = project.escrow.unwrap();
        assert_eq!(escrow.status, EscrowStatus::VerifiedHeld);
        assert!(escrow.verified_at.is_some());

        let mut revealed = Vec::new();
        while let Ok(env) = rx.try_recv() {
            if env.notification.kind == EventKind::ContactsRevealed {
                revealed.push((env.recipient, env.notification.payload["counterparty"].clone()));
            }
        }
        assert_eq!(
            revealed,
            vec![
                (CLIENT.to_string(), json!(FREELANCER)),
                (FREELANCER.to_string(), json!(CLIENT)),
            ]
        );
    }

    #[tokio::test]
    async fn verify_before_proof_is_refused() {
        let (engine, _) = engine();
        let project = accepted_project(&engine).await;
        let err = engine
            .verify_payment(&admin(), &project.id, None)
            .await
            .unwrap_err();
        match err {
            EngineError::InvalidState {
                entity,
                expected,
                actual,
                ..
            } => {
                assert_eq!(entity, "escrow");
                assert_eq!(expected, "payment_submitted");
                assert_eq!(actual, "pending_payment");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn release_requires_review_then_admin() {
        let (engine, _) = engine();
        let project = funded_project(&engine).await;

        let err = engine.request_release(&client(), &project.id).await.unwrap_err();
        assert!(matches!(&err, EngineError::InvalidState { entity: "project", .. }));

        engine.submit_for_review(&freelancer(), &project.id).await.unwrap();
        let project = engine.request_release(&client(), &project.id).await.unwrap();
        assert_eq!(project.escrow_status(), Some(EscrowStatus::PendingRelease));

        let err = engine
            .release_escrow(&admin(), &project.id, ReleaseRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "transaction_reference", .. }));

        let project = engine
            .release_escrow(
                &admin(),
                &project.id,
                ReleaseRequest {
                    transaction_reference: "TX-77".into(),
                    note: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(project.status, ProjectStatus::Completed);
        let escrow = project.escrow.unwrap();
        assert_eq!(escrow.status, EscrowStatus::Released);
        assert_eq!(escrow.release_transaction_reference.as_deref(), Some("TX-77"));

        // Released is terminal: no escape edges.
        let err = engine.refund_escrow(&admin(), &project.id, None).await.unwrap_err();
        assert_eq!(err.code(), "invalid_state");
        let err = engine.dispute_escrow(&admin(), &project.id, None).await.unwrap_err();
        assert_eq!(err.code(), "invalid_state");
    }

    #[tokio::test]
    async fn dispute_keeps_project_status_and_refund_cancels() {
        let (engine, _) = engine();
        let project = funded_project(&engine).await;

        let disputed = engine
            .dispute_escrow(&admin(), &project.id, Some("client complaint".into()))
            .await
            .unwrap();
        assert_eq!(disputed.status, ProjectStatus::InProgress);
        assert_eq!(disputed.escrow_status(), Some(EscrowStatus::Disputed));

        let refunded = engine.refund_escrow(&admin(), &project.id, None).await.unwrap();
        assert_eq!(refunded.status, ProjectStatus::Cancelled);
        assert_eq!(refunded.escrow_status(), Some(EscrowStatus::Refunded));
    }

    #[tokio::test]
    async fn refund_rejects_live_proposals() {
        let (engine, _) = engine();
        let project = accepted_project(&engine).await;
        let accepted = engine
            .proposal(project.accepted_proposal_id.as_deref().unwrap())
            .await
            .unwrap();

        // A stray bid left live by an older store.
        let stray = hireline_core::Proposal {
            id: "stray".into(),
            freelancer_id: RIVAL.into(),
            status: hireline_core::ProposalStatus::Pending,
            ..accepted
        };
        let storage = engine.storage();
        let mut snap = storage.begin_snapshot().await.unwrap();
        storage.insert(&mut snap, &stray).await.unwrap();
        storage.commit_snapshot(snap).await.unwrap();

        let refunded = engine.refund_escrow(&admin(), &project.id, None).await.unwrap();
        assert_eq!(refunded.status, ProjectStatus::Cancelled);
        let stray = engine.proposal("stray").await.unwrap();
        assert_eq!(stray.status, hireline_core::ProposalStatus::Rejected);
        let accepted = engine
            .proposal(project.accepted_proposal_id.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(accepted.status, hireline_core::ProposalStatus::Accepted);
    }

    #[tokio::test]
    async fn escape_edges_are_admin_only() {
        let (engine, _) = engine();
        let project = accepted_project(&engine).await;
        let err = engine.refund_escrow(&client(), &project.id, None).await.unwrap_err();
        assert_eq!(err.code(), "unauthorized");
        let err = engine.dispute_escrow(&freelancer(), &project.id, None).await.unwrap_err();
        assert_eq!(err.code(), "unauthorized");
    }

    #[tokio::test]
    async fn upload_stores_file_and_submits_reference() {
        let (engine, _) = engine();
        let project = accepted_project(&engine).await;
        let project = engine
            .submit_payment_proof_upload(&client(), &project.id, b"png bytes".to_vec())
            .await
            .unwrap();
        let reference = project.escrow.unwrap().payment_proof_reference.unwrap();
        assert_eq!(reference.len(), 64);

        let url = engine.payment_proof_url(&client(), &project.id).await.unwrap();
        assert!(url.ends_with(&reference));

        let err = engine
            .submit_payment_proof_upload(&client(), &project.id, Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }
}
