//! The engine handle and the snapshot plumbing every operation shares.
//!
//! An operation is written as an inner `async fn` that takes the open
//! snapshot, loads what it needs, checks authorization and the transition
//! table, stages its writes and returns the updated record together with the
//! notifications it wants sent. [`Engine::finish`] then commits (or aborts
//! on error) and only after a successful commit dispatches the outbox.

use std::sync::Arc;

use hireline_core::{Actor, FeeRate, Project, Role};
use hireline_storage::{MarketStorage, Record, StorageExt, Versioned};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::collaborators::{FileStore, MemoryFileStore, Notifier, TracingNotifier};
use crate::error::EngineError;
use crate::event::{Envelope, Outbox};

/// Engine settings fixed at start-up.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineConfig {
    /// Platform fee applied when a proposal is accepted.
    pub platform_fee: FeeRate,
}

/// The lifecycle engine over a storage backend `S`.
pub struct Engine<S: MarketStorage> {
    storage: Arc<S>,
    notifier: Arc<dyn Notifier>,
    files: Arc<dyn FileStore>,
    config: EngineConfig,
}

impl<S: MarketStorage> Clone for Engine<S> {
    fn clone(&self) -> Self {
        Engine {
            storage: Arc::clone(&self.storage),
            notifier: Arc::clone(&self.notifier),
            files: Arc::clone(&self.files),
            config: self.config,
        }
    }
}

/// The result of an inner operation: the value returned to the caller plus
/// the notifications to send once committed.
pub(crate) struct Applied<T> {
    pub value: T,
    pub outbox: Outbox,
}

impl<T> Applied<T> {
    pub(crate) fn new(value: T, outbox: Outbox) -> Self {
        Applied { value, outbox }
    }
}

impl<S: MarketStorage> Engine<S> {
    /// An engine that logs notifications and keeps files in memory.
    pub fn new(storage: Arc<S>, config: EngineConfig) -> Self {
        Engine {
            storage,
            notifier: Arc::new(TracingNotifier),
            files: Arc::new(MemoryFileStore::default()),
            config,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_file_store(mut self, files: Arc<dyn FileStore>) -> Self {
        self.files = files;
        self
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn files(&self) -> &dyn FileStore {
        self.files.as_ref()
    }

    pub(crate) async fn begin(&self) -> Result<S::Snapshot, EngineError> {
        Ok(self.storage.begin_snapshot().await?)
    }

    /// Commit on success, abort on failure, then dispatch notifications.
    pub(crate) async fn finish<T>(
        &self,
        snapshot: S::Snapshot,
        operation: &'static str,
        result: Result<Applied<T>, EngineError>,
    ) -> Result<T, EngineError> {
        match result {
            Ok(applied) => {
                self.storage.commit_snapshot(snapshot).await?;
                self.dispatch(applied.outbox.into_envelopes()).await;
                Ok(applied.value)
            }
            Err(err) => {
                if let Err(abort) = self.storage.abort_snapshot(snapshot).await {
                    warn!(operation, error = %abort, "snapshot abort failed");
                }
                debug!(operation, code = err.code(), error = %err, "operation refused");
                Err(err)
            }
        }
    }

    async fn dispatch(&self, envelopes: Vec<Envelope>) {
        for envelope in envelopes {
            if let Err(e) = self
                .notifier
                .notify(&envelope.recipient, &envelope.notification)
                .await
            {
                warn!(
                    recipient = %envelope.recipient,
                    kind = %envelope.notification.kind,
                    error = %e,
                    "notification not delivered"
                );
            }
        }
    }

    pub(crate) async fn load_for_update<R: Record>(
        &self,
        snapshot: &mut S::Snapshot,
        id: &str,
    ) -> Result<Versioned<R>, EngineError> {
        Ok(self.storage.load_for_update::<R>(snapshot, id).await?)
    }

    pub(crate) async fn children_for_update<R: Record>(
        &self,
        snapshot: &mut S::Snapshot,
        project_id: &str,
    ) -> Result<Vec<Versioned<R>>, EngineError> {
        Ok(self
            .storage
            .children_for_update::<R>(snapshot, project_id)
            .await?)
    }

    pub(crate) async fn save<R: Record>(
        &self,
        snapshot: &mut S::Snapshot,
        read_at: i64,
        record: &R,
    ) -> Result<i64, EngineError> {
        Ok(self.storage.update(snapshot, read_at, record).await?)
    }

    pub(crate) async fn create<R: Record>(
        &self,
        snapshot: &mut S::Snapshot,
        record: &R,
    ) -> Result<(), EngineError> {
        Ok(self.storage.insert(snapshot, record).await?)
    }
}

pub(crate) fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Trimmed text, or a validation error naming `field` if it is blank.
pub(crate) fn required_text(field: &'static str, value: &str) -> Result<String, EngineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation(field, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

/// Trimmed text, None if blank.
pub(crate) fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ──────────────────────────────────────────────
// Authorization
// ──────────────────────────────────────────────

pub(crate) fn unauthorized(
    actor: &Actor,
    operation: &'static str,
    entity: &'static str,
    id: &str,
) -> EngineError {
    EngineError::Unauthorized {
        actor: actor.to_string(),
        operation,
        entity,
        id: id.to_string(),
    }
}

/// Require the actor to be the project's client.
pub(crate) fn require_client(
    actor: &Actor,
    project: &Project,
    operation: &'static str,
    entity: &'static str,
    id: &str,
) -> Result<(), EngineError> {
    if actor.role == Role::Client && project.is_client(&actor.user_id) {
        Ok(())
    } else {
        Err(unauthorized(actor, operation, entity, id))
    }
}

/// Require the actor to be the project's assigned freelancer.
pub(crate) fn require_freelancer(
    actor: &Actor,
    project: &Project,
    operation: &'static str,
    entity: &'static str,
    id: &str,
) -> Result<(), EngineError> {
    if actor.role == Role::Freelancer && project.is_freelancer(&actor.user_id) {
        Ok(())
    } else {
        Err(unauthorized(actor, operation, entity, id))
    }
}

pub(crate) fn require_admin(
    actor: &Actor,
    operation: &'static str,
    entity: &'static str,
    id: &str,
) -> Result<(), EngineError> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(unauthorized(actor, operation, entity, id))
    }
}

/// Client owner and assigned freelancer, skipping an unassigned slot.
pub(crate) fn parties(project: &Project) -> Vec<&str> {
    std::iter::once(project.client_id.as_str())
        .chain(project.freelancer_id.as_deref())
        .collect()
}


#[cfg(test)]
mod tests {
    use super::testkit::*;
    use super::*;
    use async_trait::async_trait;
    use hireline_core::{ProjectStatus, ProposalStatus};
    use hireline_storage::MemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::collaborators::NotifyError;
    use crate::event::Notification;

    #[derive(Default)]
    struct FailingNotifier {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _user_id: &str, _n: &Notification) -> Result<(), NotifyError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(NotifyError("mail relay down".into()))
        }
    }

    #[tokio::test]
    async fn notifier_failure_keeps_committed_transition() {
        let notifier = Arc::new(FailingNotifier::default());
        let engine = Engine::new(Arc::new(MemoryStorage::new()), EngineConfig::default())
            .with_notifier(notifier.clone());

        let project = open_project(&engine).await;
        let proposal = propose(&engine, &freelancer(), &project.id, "900").await;
        let acceptance = engine
            .accept_proposal(&client(), &proposal.id)
            .await
            .unwrap();
        assert_eq!(acceptance.proposal.status, ProposalStatus::Accepted);

        let stored = engine.proposal(&proposal.id).await.unwrap();
        assert_eq!(stored.status, ProposalStatus::Accepted);
        let project = engine.project(&project.id).await.unwrap();
        assert_eq!(project.status, ProjectStatus::Open);
        assert_eq!(
            project.accepted_proposal_id.as_deref(),
            Some(proposal.id.as_str())
        );
        assert!(project.escrow.is_some());
        // Every envelope was still attempted.
        assert!(notifier.attempts.load(Ordering::SeqCst) >= 3);
    }
}
