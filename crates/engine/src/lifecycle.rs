//! Project lifecycle coordinator: creation, submit-for-review and
//! cancellation. The transitions driven by proposal acceptance and the escrow
//! ledger live in [`negotiation`](crate::negotiation) and
//! [`escrow`](crate::escrow), which call back into the project table here.

use hireline_core::{
    validate_amount, Actor, EscrowStatus, Lifecycle, NewProject, Project, ProjectStatus, Proposal,
    ProposalStatus, Role,
};
use hireline_storage::MarketStorage;
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use tracing::info;

use crate::engine::{
    new_id, now, optional_text, parties, require_admin, require_freelancer, required_text,
    unauthorized, Applied, Engine,
};
use crate::error::{ensure_transition, EngineError};
use crate::event::{EventKind, Notification, Outbox};

/// What happens to held funds when an engagement is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelResolution {
    /// Freeze the escrow for human adjudication.
    Dispute,
    /// Return the funds to the client.
    Refund,
}

impl CancelResolution {
    fn escrow_status(self) -> EscrowStatus {
        match self {
            CancelResolution::Dispute => EscrowStatus::Disputed,
            CancelResolution::Refund => EscrowStatus::Refunded,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelRequest {
    /// Required for administrative cancellation of a started project.
    #[serde(default)]
    pub resolution: Option<CancelResolution>,
    #[serde(default)]
    pub note: Option<String>,
}

impl<S: MarketStorage> Engine<S> {
    /// Post a new project. Client only.
    pub async fn create_project(
        &self,
        actor: &Actor,
        input: NewProject,
    ) -> Result<Project, EngineError> {
        let mut snap = self.begin().await?;
        let result = self.create_project_in(&mut snap, actor, input).await;
        let project = self.finish(snap, "create project", result).await?;
        info!(project_id = %project.id, client = %project.client_id, "project created");
        Ok(project)
    }

    async fn create_project_in(
        &self,
        snap: &mut S::Snapshot,
        actor: &Actor,
        input: NewProject,
    ) -> Result<Applied<Project>, EngineError> {
        if actor.role != Role::Client {
            return Err(unauthorized(actor, "create", "project", "(new)"));
        }
        let title = required_text("title", &input.title)?;
        let budget_min =
            validate_amount(input.budget_min).map_err(|e| EngineError::amount("budget_min", e))?;
        let budget_max =
            validate_amount(input.budget_max).map_err(|e| EngineError::amount("budget_max", e))?;
        if budget_min > budget_max {
            return Err(EngineError::validation(
                "budget_max",
                format!("{budget_max} is below budget_min {budget_min}"),
            ));
        }
        let mut skills: Vec<String> = Vec::new();
        for skill in input.skills {
            let skill = skill.trim().to_lowercase();
            if !skill.is_empty() && !skills.contains(&skill) {
                skills.push(skill);
            }
        }

        let at = now();
        let project = Project {
            id: new_id(),
            client_id: actor.user_id.clone(),
            freelancer_id: None,
            title,
            description: input.description.trim().to_string(),
            status: ProjectStatus::Open,
            budget_min,
            budget_max,
            deadline: input.deadline,
            duration: optional_text(input.duration),
            skills,
            accepted_proposal_id: None,
            escrow: None,
            cancellation_note: None,
            created_at: at,
            updated_at: at,
        };
        self.create(snap, &project).await?;
        Ok(Applied::new(project, Outbox::new()))
    }

    /// Freelancer signals the work is ready for final approval.
    pub async fn submit_for_review(
        &self,
        actor: &Actor,
        project_id: &str,
    ) -> Result<Project, EngineError> {
        let mut snap = self.begin().await?;
        let result = self.submit_for_review_in(&mut snap, actor, project_id).await;
        let project = self.finish(snap, "submit for review", result).await?;
        info!(project_id = %project.id, "project in review");
        Ok(project)
    }

    async fn submit_for_review_in(
        &self,
        snap: &mut S::Snapshot,
        actor: &Actor,
        project_id: &str,
    ) -> Result<Applied<Project>, EngineError> {
        let stored = self.load_for_update::<Project>(snap, project_id).await?;
        let mut project = stored.record;
        require_freelancer(actor, &project, "submit for review", "project", project_id)?;
        let mut outbox = Outbox::new();
        self.enter_review(&mut project, &mut outbox)?;
        self.save(snap, stored.version, &project).await?;
        Ok(Applied::new(project, outbox))
    }

    /// `in_progress -> in_review`, shared with deliverable submission.
    pub(crate) fn enter_review(
        &self,
        project: &mut Project,
        outbox: &mut Outbox,
    ) -> Result<(), EngineError> {
        ensure_transition(
            &project.id,
            "submit for review",
            project.status,
            ProjectStatus::InReview,
        )?;
        project.status = ProjectStatus::InReview;
        project.updated_at = now();
        outbox.send(
            project.client_id.clone(),
            Notification::new(
                EventKind::ProjectInReview,
                &project.id,
                &project.id,
                json!({ "status": project.status }),
            ),
        );
        Ok(())
    }

    /// Cancel a project.
    ///
    /// From `open`, the owning client or an admin may cancel; any live escrow
    /// is refunded unless an admin picks `dispute`. From `in_progress` or
    /// `in_review` only an admin may cancel, and must say whether the escrow
    /// is disputed or refunded. Every live proposal is rejected.
    pub async fn cancel_project(
        &self,
        actor: &Actor,
        project_id: &str,
        request: CancelRequest,
    ) -> Result<Project, EngineError> {
        let mut snap = self.begin().await?;
        let result = self
            .cancel_project_in(&mut snap, actor, project_id, request)
            .await;
        let project = self.finish(snap, "cancel project", result).await?;
        info!(
            project_id = %project.id,
            escrow = ?project.escrow_status(),
            "project cancelled"
        );
        Ok(project)
    }

    async fn cancel_project_in(
        &self,
        snap: &mut S::Snapshot,
        actor: &Actor,
        project_id: &str,
        request: CancelRequest,
    ) -> Result<Applied<Project>, EngineError> {
        let stored = self.load_for_update::<Project>(snap, project_id).await?;
        let mut project = stored.record;
        ensure_transition(project_id, "cancel", project.status, ProjectStatus::Cancelled)?;

        let resolution = if project.status == ProjectStatus::Open {
            let owner = actor.role == Role::Client && project.is_client(&actor.user_id);
            if !owner && !actor.is_admin() {
                return Err(unauthorized(actor, "cancel", "project", project_id));
            }
            if request.resolution.is_some() && !actor.is_admin() {
                return Err(EngineError::validation(
                    "resolution",
                    "only an administrator may choose the escrow resolution",
                ));
            }
            request.resolution.unwrap_or(CancelResolution::Refund)
        } else {
            require_admin(actor, "cancel", "project", project_id)?;
            request.resolution.ok_or_else(|| {
                EngineError::validation(
                    "resolution",
                    "cancelling a started project requires 'dispute' or 'refund'",
                )
            })?
        };

        let at = now();
        let note = optional_text(request.note);
        if let Some(escrow) = project.escrow.as_mut() {
            let target = resolution.escrow_status();
            if !escrow.status.is_terminal() && escrow.status != target {
                ensure_transition(project_id, "cancel", escrow.status, target)?;
                escrow.status = target;
                escrow.resolved_at = Some(at);
                escrow.resolution_note = note.clone();
            }
        }

        let mut outbox = Outbox::new();
        self.reject_live_proposals(snap, project_id, at, &mut outbox)
            .await?;

        project.status = ProjectStatus::Cancelled;
        project.cancellation_note = note;
        project.updated_at = at;
        self.save(snap, stored.version, &project).await?;

        outbox.send_all(
            parties(&project),
            Notification::new(
                EventKind::ProjectCancelled,
                project_id,
                project_id,
                json!({
                    "cancelled_by": actor.role,
                    "escrow_status": project.escrow_status(),
                }),
            ),
        );
        Ok(Applied::new(project, outbox))
    }

    /// Reject every live proposal on a project that is being cancelled.
    pub(crate) async fn reject_live_proposals(
        &self,
        snap: &mut S::Snapshot,
        project_id: &str,
        at: OffsetDateTime,
        outbox: &mut Outbox,
    ) -> Result<(), EngineError> {
        let proposals = self
            .children_for_update::<Proposal>(snap, project_id)
            .await?;
        for stored in proposals {
            let mut proposal = stored.record;
            if !proposal.status.is_live() {
                continue;
            }
            proposal.status = ProposalStatus::Rejected;
            proposal.updated_at = at;
            self.save(snap, stored.version, &proposal).await?;
            outbox.send(
                proposal.freelancer_id.clone(),
                Notification::new(
                    EventKind::ProposalRejected,
                    project_id,
                    &proposal.id,
                    json!({ "reason": "project cancelled" }),
                ),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testkit::*;

    #[tokio::test]
    async fn create_validates_budget_and_title() {
        let (engine, _) = engine();
        let base = NewProject {
            title: "Logo".into(),
            budget_min: dec("100"),
            budget_max: dec("200"),
            skills: vec![" Design ".into(), "design".into(), "".into()],
            ..Default::default()
        };
        let project = engine.create_project(&client(), base.clone()).await.unwrap();
        assert_eq!(project.status, ProjectStatus::Open);
        assert_eq!(project.skills, vec!["design"]);
        assert_eq!(project.budget_min.scale(), 2);

        let cases = [
            (NewProject { title: " ".into(), ..base.clone() }, "title"),
            (NewProject { budget_min: dec("0"), ..base.clone() }, "budget_min"),
            (NewProject { budget_max: dec("50"), ..base.clone() }, "budget_max"),
            (NewProject { budget_max: dec("200.001"), ..base.clone() }, "budget_max"),
        ];
        for (input, expected_field) in cases {
            match engine.create_project(&client(), input).await {
                Err(EngineError::Validation { field, .. }) => assert_eq!(field, expected_field),
                other => panic!("expected validation error on {expected_field}, got {other:?}"),
            }
        }

        let err = engine.create_project(&freelancer(), base).await.unwrap_err();
        assert_eq!(err.code(), "unauthorized");
    }

    #[tokio::test]
    async fn client_cancel_of_open_project_refunds_and_rejects() {
        let (engine, _) = engine();
        let project = open_project(&engine).await;
        let p = propose(&engine, &freelancer(), &project.id, "900").await;

        let cancelled = engine
            .cancel_project(
                &client(),
                &project.id,
                CancelRequest {
                    resolution: None,
                    note: Some("changed plans".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(cancelled.status, ProjectStatus::Cancelled);
        assert_eq!(cancelled.cancellation_note.as_deref(), Some("changed plans"));
        assert_eq!(
            engine.proposal(&p.id).await.unwrap().status,
            ProposalStatus::Rejected
        );

        let accepted = accepted_project(&engine).await;
        let cancelled = engine
            .cancel_project(&client(), &accepted.id, CancelRequest::default())
            .await
            .unwrap();
        assert_eq!(cancelled.escrow_status(), Some(EscrowStatus::Refunded));
    }

    #[tokio::test]
    async fn client_cannot_pick_resolution() {
        let (engine, _) = engine();
        let project = accepted_project(&engine).await;
        let err = engine
            .cancel_project(
                &client(),
                &project.id,
                CancelRequest {
                    resolution: Some(CancelResolution::Dispute),
                    note: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "resolution", .. }));

        let project = engine
            .cancel_project(
                &admin(),
                &project.id,
                CancelRequest {
                    resolution: Some(CancelResolution::Dispute),
                    note: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(project.escrow_status(), Some(EscrowStatus::Disputed));
    }

    #[tokio::test]
    async fn started_project_cancel_is_admin_with_resolution() {
        let (engine, _) = engine();
        let project = funded_project(&engine).await;

        let err = engine
            .cancel_project(&client(), &project.id, CancelRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unauthorized");

        let err = engine
            .cancel_project(&admin(), &project.id, CancelRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "resolution", .. }));

        for (resolution, escrow) in [
            (CancelResolution::Refund, EscrowStatus::Refunded),
            (CancelResolution::Dispute, EscrowStatus::Disputed),
        ] {
            let project = funded_project(&engine).await;
            let done = engine
                .cancel_project(
                    &admin(),
                    &project.id,
                    CancelRequest {
                        resolution: Some(resolution),
                        note: Some("adjudicated".into()),
                    },
                )
                .await
                .unwrap();
            assert_eq!(done.status, ProjectStatus::Cancelled);
            assert_eq!(done.escrow_status(), Some(escrow));
            assert_eq!(
                done.escrow.unwrap().resolution_note.as_deref(),
                Some("adjudicated")
            );
        }
    }

    #[tokio::test]
    async fn terminal_projects_cannot_be_cancelled() {
        let (engine, _) = engine();
        let project = open_project(&engine).await;
        engine
            .cancel_project(&client(), &project.id, CancelRequest::default())
            .await
            .unwrap();
        let err = engine
            .cancel_project(&admin(), &project.id, CancelRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_state");
    }

    #[tokio::test]
    async fn submit_for_review_by_assigned_freelancer() {
        let (engine, _) = engine();
        let project = funded_project(&engine).await;
        let err = engine.submit_for_review(&client(), &project.id).await.unwrap_err();
        assert_eq!(err.code(), "unauthorized");
        let project = engine.submit_for_review(&freelancer(), &project.id).await.unwrap();
        assert_eq!(project.status, ProjectStatus::InReview);
        let err = engine
            .submit_for_review(&freelancer(), &project.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_state");
    }
}
