//! Narrow interfaces to the collaborators the engine does not own:
//! notification delivery and binary file storage.
//!
//! Identity is not a trait here. Callers resolve the current user themselves
//! and pass an [`Actor`](hireline_core::Actor) into each operation.

use std::collections::HashMap;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

use crate::event::{Envelope, Notification};

// ──────────────────────────────────────────────
// Notifications
// ──────────────────────────────────────────────

#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Fire-and-forget notification delivery.
///
/// Called after a transition has committed. A failure is logged by the engine
/// and never rolls the transition back.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: &str, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes every notification to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, user_id: &str, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            recipient = user_id,
            kind = %notification.kind,
            project_id = %notification.project_id,
            subject_id = %notification.subject_id,
            "notification"
        );
        Ok(())
    }
}

/// Fans notifications out to any number of subscribers, e.g. a streaming
/// front end. Delivery with no live subscriber is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Envelope>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        BroadcastNotifier { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify(&self, user_id: &str, notification: &Notification) -> Result<(), NotifyError> {
        let envelope = Envelope {
            recipient: user_id.to_string(),
            notification: notification.clone(),
        };
        if self.tx.send(envelope).is_err() {
            tracing::debug!(recipient = user_id, "no notification subscribers");
        }
        Ok(())
    }
}

// ──────────────────────────────────────────────
// File storage
// ──────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("refusing to store an empty file")]
    Empty,
    #[error("unknown file reference '{0}'")]
    UnknownReference(String),
    #[error("file store backend error: {0}")]
    Backend(String),
}

/// Binary storage for attachments and payment-proof images. The engine only
/// ever persists the returned reference.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn store(&self, bytes: Vec<u8>) -> Result<String, FileStoreError>;

    async fn resolve(&self, reference: &str) -> Result<String, FileStoreError>;
}

/// Content-addressed in-process file store. References are the SHA-256 hex
/// digest of the content; URLs are `<prefix>/<reference>`.
#[derive(Debug)]
pub struct MemoryFileStore {
    url_prefix: String,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryFileStore {
    pub fn new(url_prefix: impl Into<String>) -> Self {
        MemoryFileStore {
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
            blobs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, reference: &str) -> Option<Vec<u8>> {
        self.blobs.read().await.get(reference).cloned()
    }
}

impl Default for MemoryFileStore {
    fn default() -> Self {
        Self::new("/files")
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn store(&self, bytes: Vec<u8>) -> Result<String, FileStoreError> {
        if bytes.is_empty() {
            return Err(FileStoreError::Empty);
        }
        let reference: String = Sha256::digest(&bytes)
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
        self.blobs.write().await.insert(reference.clone(), bytes);
        Ok(reference)
    }

    async fn resolve(&self, reference: &str) -> Result<String, FileStoreError> {
        if !self.blobs.read().await.contains_key(reference) {
            return Err(FileStoreError::UnknownReference(reference.to_string()));
        }
        Ok(format!("{}/{}", self.url_prefix, reference))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use serde_json::json;

    #[tokio::test]
    async fn file_store_is_content_addressed() {
        let files = MemoryFileStore::new("https://files.example/proofs/");
        let a = files.store(b"receipt".to_vec()).await.unwrap();
        let b = files.store(b"receipt".to_vec()).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(
            files.resolve(&a).await.unwrap(),
            format!("https://files.example/proofs/{a}")
        );
        assert_eq!(files.get(&a).await.unwrap(), b"receipt");
    }

    #[tokio::test]
    async fn file_store_rejects_empty_and_unknown() {
        let files = MemoryFileStore::default();
        assert!(matches!(files.store(Vec::new()).await, Err(FileStoreError::Empty)));
        assert!(matches!(
            files.resolve("nope").await,
            Err(FileStoreError::UnknownReference(r)) if r == "nope"
        ));
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let notifier = BroadcastNotifier::new(8);
        let n = Notification::new(EventKind::ProjectCompleted, "p1", "p1", json!({}));
        // No subscriber yet: still Ok.
        notifier.notify("alice", &n).await.unwrap();

        let mut rx = notifier.subscribe();
        notifier.notify("bob", &n).await.unwrap();
        let got = rx.recv().await.unwrap();
        assert_eq!(got.recipient, "bob");
        assert_eq!(got.notification.kind, EventKind::ProjectCompleted);
    }
}
