//! Read-only views, always served from the latest committed state.

use hireline_core::{
    Actor, Deliverable, Escrow, Milestone, NegotiationEntry, Project, ProjectStatus, Proposal,
    RevisionRequest,
};
use hireline_storage::{MarketStorage, Record, StorageExt};

use crate::engine::{unauthorized, Engine};
use crate::error::EngineError;

impl<S: MarketStorage> Engine<S> {
    pub async fn project(&self, id: &str) -> Result<Project, EngineError> {
        self.fetch(id).await
    }

    /// All projects, oldest first, optionally only those in `status`.
    pub async fn projects(&self, status: Option<ProjectStatus>) -> Result<Vec<Project>, EngineError> {
        let all = self.storage().all::<Project>().await?;
        Ok(all
            .into_iter()
            .map(|v| v.record)
            .filter(|p| match status {
                Some(s) => p.status == s,
                None => true,
            })
            .collect())
    }

    pub async fn escrow(&self, project_id: &str) -> Result<Escrow, EngineError> {
        self.project(project_id)
            .await?
            .escrow
            .ok_or_else(|| EngineError::NotFound {
                entity: "escrow",
                id: project_id.to_string(),
            })
    }

    pub async fn proposal(&self, id: &str) -> Result<Proposal, EngineError> {
        self.fetch(id).await
    }

    pub async fn proposals(&self, project_id: &str) -> Result<Vec<Proposal>, EngineError> {
        self.children_of(project_id).await
    }

    pub async fn negotiation_history(
        &self,
        proposal_id: &str,
    ) -> Result<Vec<NegotiationEntry>, EngineError> {
        Ok(self.proposal(proposal_id).await?.negotiation_history)
    }

    pub async fn deliverable(&self, id: &str) -> Result<Deliverable, EngineError> {
        self.fetch(id).await
    }

    pub async fn deliverables(&self, project_id: &str) -> Result<Vec<Deliverable>, EngineError> {
        self.children_of(project_id).await
    }

    pub async fn revisions(&self, deliverable_id: &str) -> Result<Vec<RevisionRequest>, EngineError> {
        Ok(self.deliverable(deliverable_id).await?.revisions)
    }

    pub async fn milestone(&self, id: &str) -> Result<Milestone, EngineError> {
        self.fetch(id).await
    }

    pub async fn milestones(&self, project_id: &str) -> Result<Vec<Milestone>, EngineError> {
        self.children_of(project_id).await
    }

    /// Download URL of the payment proof. Only the paying client and
    /// administrators may see it.
    pub async fn payment_proof_url(
        &self,
        actor: &Actor,
        project_id: &str,
    ) -> Result<String, EngineError> {
        let project = self.project(project_id).await?;
        if !project.may_view_payment_proof(Some(actor)) {
            return Err(unauthorized(actor, "view payment proof of", "project", project_id));
        }
        let reference = project
            .escrow
            .and_then(|e| e.payment_proof_reference)
            .ok_or_else(|| EngineError::NotFound {
                entity: "payment_proof",
                id: project_id.to_string(),
            })?;
        self.files().resolve(&reference).await.map_err(|e| {
            EngineError::NotFound {
                entity: "payment_proof",
                id: format!("{project_id} ({e})"),
            }
        })
    }

    /// Check that `actor` may download the stored file `reference`.
    ///
    /// Stored files are payment proofs, so the rule is the proof's: the
    /// owning client of a project that references it, or an administrator.
    /// A reference no project points at is visible to administrators only.
    pub async fn authorize_file_download(
        &self,
        actor: &Actor,
        reference: &str,
    ) -> Result<(), EngineError> {
        if actor.is_admin() {
            return Ok(());
        }
        let projects = self.projects(None).await?;
        let owners = projects.iter().filter(|p| {
            p.escrow
                .as_ref()
                .and_then(|e| e.payment_proof_reference.as_deref())
                == Some(reference)
        });
        let mut referenced = false;
        for project in owners {
            if project.may_view_payment_proof(Some(actor)) {
                return Ok(());
            }
            referenced = true;
        }
        if referenced {
            Err(unauthorized(actor, "download", "file", reference))
        } else {
            Err(EngineError::NotFound {
                entity: "file",
                id: reference.to_string(),
            })
        }
    }

    async fn fetch<R: Record>(&self, id: &str) -> Result<R, EngineError> {
        Ok(self.storage().load::<R>(id).await?.record)
    }

    /// Children of an existing project; NotFound if the project is missing.
    async fn children_of<R: Record>(&self, project_id: &str) -> Result<Vec<R>, EngineError> {
        self.storage().load::<Project>(project_id).await?;
        let children = self.storage().children::<R>(project_id).await?;
        Ok(children.into_iter().map(|v| v.record).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testkit::*;
    use hireline_core::Role;

    #[tokio::test]
    async fn lists_filter_and_missing_parents() {
        let (engine, _) = engine();
        let open = open_project(&engine).await;
        let started = funded_project(&engine).await;

        let all = engine.projects(None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, open.id);
        let in_progress = engine.projects(Some(ProjectStatus::InProgress)).await.unwrap();
        assert_eq!(in_progress.len(), 1);
        assert_eq!(in_progress[0].id, started.id);

        let err = engine.proposals("ghost").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "project", .. }));
        assert!(engine.milestones(&open.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn negotiation_history_in_order() {
        let (engine, _) = engine();
        let project = open_project(&engine).await;
        let p = propose(&engine, &freelancer(), &project.id, "900").await;
        engine
            .counter_offer(
                &client(),
                &p.id,
                crate::CounterOffer {
                    amount: dec("800"),
                    note: Some("tighter scope".into()),
                },
            )
            .await
            .unwrap();
        let history = engine.negotiation_history(&p.id).await.unwrap();
        let amounts: Vec<_> = history.iter().map(|h| h.amount).collect();
        assert_eq!(amounts, vec![dec("900"), dec("800")]);
        assert_eq!(history[1].actor_role, Role::Client);
        assert_eq!(history[1].note.as_deref(), Some("tighter scope"));
    }

    #[tokio::test]
    async fn payment_proof_visible_to_owner_and_admin_only() {
        let (engine, _) = engine();
        let project = accepted_project(&engine).await;
        let err = engine.payment_proof_url(&client(), &project.id).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "payment_proof", .. }));

        engine
            .submit_payment_proof_upload(&client(), &project.id, b"scan".to_vec())
            .await
            .unwrap();
        assert!(engine.payment_proof_url(&admin(), &project.id).await.is_ok());
        let err = engine
            .payment_proof_url(&freelancer(), &project.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "unauthorized");
        assert_eq!(engine.escrow(&project.id).await.unwrap().escrow_amount, dec("900"));
    }

    #[tokio::test]
    async fn file_download_follows_payment_proof_rule() {
        let (engine, _) = engine();
        let project = accepted_project(&engine).await;
        let project = engine
            .submit_payment_proof_upload(&client(), &project.id, b"statement".to_vec())
            .await
            .unwrap();
        let reference = project.escrow.unwrap().payment_proof_reference.unwrap();

        engine.authorize_file_download(&client(), &reference).await.unwrap();
        engine.authorize_file_download(&admin(), &reference).await.unwrap();
        for who in [freelancer(), rival(), Actor::client("mallory")] {
            let err = engine
                .authorize_file_download(&who, &reference)
                .await
                .unwrap_err();
            assert_eq!(err.code(), "unauthorized", "{who}");
        }

        let err = engine
            .authorize_file_download(&client(), "0000")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "file", .. }));
        engine.authorize_file_download(&admin(), "0000").await.unwrap();
    }
}
