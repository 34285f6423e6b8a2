//! Milestone tracker. Purely informational: milestones never gate escrow.

use hireline_core::{Actor, Lifecycle, Milestone, MilestoneStatus, NewMilestone, Project, Role};
use hireline_storage::MarketStorage;
use serde_json::json;
use tracing::info;

use crate::engine::{
    new_id, now, optional_text, require_client, require_freelancer, required_text, unauthorized,
    Applied, Engine,
};
use crate::error::{ensure_status, EngineError};
use crate::event::{EventKind, Notification, Outbox};

#[derive(Debug, Clone, Copy)]
enum Step {
    Start,
    Complete,
    Approve,
    RequestChanges,
}

impl Step {
    fn operation(self) -> &'static str {
        match self {
            Step::Start => "start",
            Step::Complete => "complete",
            Step::Approve => "approve",
            Step::RequestChanges => "request changes on",
        }
    }

    fn from_states(self) -> &'static [MilestoneStatus] {
        match self {
            Step::Start => &[MilestoneStatus::Pending],
            Step::Complete => &[MilestoneStatus::InProgress],
            Step::Approve => &[MilestoneStatus::Completed],
            Step::RequestChanges => &[MilestoneStatus::Completed, MilestoneStatus::Approved],
        }
    }

    fn target(self) -> MilestoneStatus {
        match self {
            Step::Start | Step::RequestChanges => MilestoneStatus::InProgress,
            Step::Complete => MilestoneStatus::Completed,
            Step::Approve => MilestoneStatus::Approved,
        }
    }

    /// Freelancer drives the work steps, client the sign-off steps.
    fn authorize(self, actor: &Actor, project: &Project, id: &str) -> Result<(), EngineError> {
        match self {
            Step::Start | Step::Complete => {
                require_freelancer(actor, project, self.operation(), "milestone", id)
            }
            Step::Approve | Step::RequestChanges => {
                require_client(actor, project, self.operation(), "milestone", id)
            }
        }
    }
}

impl<S: MarketStorage> Engine<S> {
    /// Add a checkpoint. Either party of the engagement may create one.
    pub async fn create_milestone(
        &self,
        actor: &Actor,
        project_id: &str,
        input: NewMilestone,
    ) -> Result<Milestone, EngineError> {
        let mut snap = self.begin().await?;
        let result = self
            .create_milestone_in(&mut snap, actor, project_id, input)
            .await;
        let milestone = self.finish(snap, "create milestone", result).await?;
        info!(milestone_id = %milestone.id, project_id = %milestone.project_id, "milestone created");
        Ok(milestone)
    }

    async fn create_milestone_in(
        &self,
        snap: &mut S::Snapshot,
        actor: &Actor,
        project_id: &str,
        input: NewMilestone,
    ) -> Result<Applied<Milestone>, EngineError> {
        let project = self.load_for_update::<Project>(snap, project_id).await?.record;
        let counterparty = match actor.role {
            Role::Client if project.is_client(&actor.user_id) => project.freelancer_id.clone(),
            Role::Freelancer if project.is_freelancer(&actor.user_id) => {
                Some(project.client_id.clone())
            }
            _ => return Err(unauthorized(actor, "add a milestone to", "project", project_id)),
        };
        if project.status.is_terminal() {
            return Err(EngineError::InvalidState {
                entity: "project",
                id: project_id.to_string(),
                operation: "add a milestone to",
                expected: "open|in_progress|in_review".to_string(),
                actual: project.status.to_string(),
            });
        }
        let title = required_text("title", &input.title)?;

        let at = now();
        let milestone = Milestone {
            id: new_id(),
            project_id: project_id.to_string(),
            title,
            description: input.description.trim().to_string(),
            status: MilestoneStatus::Pending,
            created_by: actor.user_id.clone(),
            due_date: input.due_date,
            completed_at: None,
            approved_at: None,
            change_note: None,
            created_at: at,
            updated_at: at,
        };
        self.create(snap, &milestone).await?;

        let mut outbox = Outbox::new();
        if let Some(to) = counterparty {
            outbox.send(
                to,
                Notification::new(
                    EventKind::MilestoneCreated,
                    project_id,
                    &milestone.id,
                    json!({ "title": milestone.title }),
                ),
            );
        }
        Ok(Applied::new(milestone, outbox))
    }

    pub async fn start_milestone(
        &self,
        actor: &Actor,
        milestone_id: &str,
    ) -> Result<Milestone, EngineError> {
        self.step_milestone(actor, milestone_id, Step::Start, None).await
    }

    pub async fn complete_milestone(
        &self,
        actor: &Actor,
        milestone_id: &str,
    ) -> Result<Milestone, EngineError> {
        self.step_milestone(actor, milestone_id, Step::Complete, None).await
    }

    pub async fn approve_milestone(
        &self,
        actor: &Actor,
        milestone_id: &str,
    ) -> Result<Milestone, EngineError> {
        self.step_milestone(actor, milestone_id, Step::Approve, None).await
    }

    /// Send a completed or approved milestone back to `in_progress`.
    pub async fn request_milestone_changes(
        &self,
        actor: &Actor,
        milestone_id: &str,
        note: Option<String>,
    ) -> Result<Milestone, EngineError> {
        self.step_milestone(actor, milestone_id, Step::RequestChanges, note)
            .await
    }

    async fn step_milestone(
        &self,
        actor: &Actor,
        milestone_id: &str,
        step: Step,
        note: Option<String>,
    ) -> Result<Milestone, EngineError> {
        let mut snap = self.begin().await?;
        let result = self
            .step_milestone_in(&mut snap, actor, milestone_id, step, note)
            .await;
        let milestone = self.finish(snap, step.operation(), result).await?;
        info!(milestone_id = %milestone.id, status = %milestone.status, "milestone updated");
        Ok(milestone)
    }

    async fn step_milestone_in(
        &self,
        snap: &mut S::Snapshot,
        actor: &Actor,
        milestone_id: &str,
        step: Step,
        note: Option<String>,
    ) -> Result<Applied<Milestone>, EngineError> {
        let stored = self.load_for_update::<Milestone>(snap, milestone_id).await?;
        let mut milestone = stored.record;
        let project = self
            .load_for_update::<Project>(snap, &milestone.project_id)
            .await?
            .record;
        step.authorize(actor, &project, milestone_id)?;
        ensure_status(milestone_id, step.operation(), step.from_states(), milestone.status)?;

        let at = now();
        let target = step.target();
        match step {
            Step::Start => {}
            Step::Complete => milestone.completed_at = Some(at),
            Step::Approve => milestone.approved_at = Some(at),
            Step::RequestChanges => {
                milestone.completed_at = None;
                milestone.approved_at = None;
                milestone.change_note = optional_text(note);
            }
        }
        milestone.status = target;
        milestone.updated_at = at;
        self.save(snap, stored.version, &milestone).await?;

        let counterparty = match step {
            Step::Start | Step::Complete => Some(project.client_id.clone()),
            Step::Approve | Step::RequestChanges => project.freelancer_id.clone(),
        };
        let mut outbox = Outbox::new();
        if let Some(to) = counterparty {
            outbox.send(
                to,
                Notification::new(
                    EventKind::MilestoneUpdated,
                    &milestone.project_id,
                    milestone_id,
                    json!({ "status": milestone.status, "note": milestone.change_note }),
                ),
            );
        }
        Ok(Applied::new(milestone, outbox))
    }
}
