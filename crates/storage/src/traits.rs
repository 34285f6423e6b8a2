use async_trait::async_trait;

use crate::error::StorageError;
use crate::record::{Document, RecordKind};

/// The storage trait behind the Hireline engine.
///
/// A `MarketStorage` implementation provides durable, transactional storage
/// for versioned record documents (projects and their proposals, milestones
/// and deliverables).
///
/// ## Snapshot Semantics
///
/// All mutating operations take `&mut Self::Snapshot`, a type representing an
/// in-progress transaction. The lifecycle is:
///
/// 1. `begin_snapshot()`: start a transaction, returns a `Snapshot`
/// 2. Call mutating methods with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)`: commit and consume the transaction
///    OR `abort_snapshot(snapshot)`: roll back and consume the transaction
///
/// Writes made through a snapshot are visible to later reads through the
/// same snapshot and invisible to everyone else until commit. Dropping a
/// snapshot without committing discards its writes.
///
/// ## OCC Conflict Detection
///
/// `update_record` is conditional on `version = expected_version`. The check
/// runs when the update is issued and again, for every buffered write, when
/// the snapshot commits. Any mismatch returns
/// `Err(StorageError::ConcurrentConflict { .. })` and nothing is applied.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` to be used in axum
/// application state and across async task boundaries.
#[async_trait]
pub trait MarketStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    /// Begin a new snapshot (transaction).
    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    /// Commit a snapshot, making all of its writes durable at once.
    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    /// Abort (roll back) a snapshot, discarding all writes.
    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Record operations (within snapshot) ──────────────────────────────────

    /// Insert a new record at version 0.
    ///
    /// Returns `Err(StorageError::AlreadyExists)` if (kind, id) is taken.
    async fn insert_record(
        &self,
        snapshot: &mut Self::Snapshot,
        kind: RecordKind,
        id: &str,
        parent_id: Option<&str>,
        body: serde_json::Value,
    ) -> Result<(), StorageError>;

    /// Read a record as seen by this snapshot.
    ///
    /// Returns `Err(StorageError::NotFound)` if the record does not exist.
    async fn get_record_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        kind: RecordKind,
        id: &str,
    ) -> Result<Document, StorageError>;

    /// Replace a record's body, conditional on its current version.
    ///
    /// Returns the new version number on success.
    async fn update_record(
        &self,
        snapshot: &mut Self::Snapshot,
        kind: RecordKind,
        id: &str,
        expected_version: i64,
        body: serde_json::Value,
    ) -> Result<i64, StorageError>;

    /// All records of `kind` whose parent is `parent_id`, as seen by this
    /// snapshot, in insertion order.
    async fn list_records_for_update(
        &self,
        snapshot: &mut Self::Snapshot,
        kind: RecordKind,
        parent_id: &str,
    ) -> Result<Vec<Document>, StorageError>;

    // ── Query operations (latest committed state) ────────────────────────────

    /// Read a committed record.
    ///
    /// Returns `Err(StorageError::NotFound)` if the record does not exist.
    async fn get_record(&self, kind: RecordKind, id: &str) -> Result<Document, StorageError>;

    /// List committed records of `kind`, optionally restricted to one parent,
    /// in insertion order.
    async fn list_records(
        &self,
        kind: RecordKind,
        parent_id: Option<&str>,
    ) -> Result<Vec<Document>, StorageError>;
}
