//! In-process `MarketStorage` backend with optional JSON-file durability.
//!
//! Committed records live in a single table guarded by an async mutex.
//! Snapshots buffer their writes and never touch the table until commit,
//! where every buffered write is re-validated against the committed
//! version under the lock and then applied all-or-nothing.
//!
//! `MemoryStorage::open(path)` backs the same table with a JSON file. Each
//! commit writes the whole next state to `<path>.tmp` and renames it over
//! `path` before the in-memory table is swapped, so a failed write leaves
//! both memory and disk at the previous commit.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::record::{Document, RecordKind};
use crate::traits::MarketStorage;

/// On-disk format version of the JSON store.
const STORE_FORMAT: u32 = 1;

/// Sequence placeholder for inserts not yet committed; sorts them last.
const UNCOMMITTED_SEQ: u64 = u64::MAX;

type Key = (RecordKind, String);

#[derive(Debug, Clone, Default)]
struct Tables {
    next_seq: u64,
    docs: BTreeMap<Key, Document>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStore {
    format: u32,
    next_seq: u64,
    records: Vec<Document>,
}

impl Tables {
    fn from_persisted(store: PersistedStore) -> Result<Self, StorageError> {
        if store.format != STORE_FORMAT {
            return Err(StorageError::Backend(format!(
                "unsupported store format {} (expected {})",
                store.format, STORE_FORMAT
            )));
        }
        let mut docs = BTreeMap::new();
        for doc in store.records {
            docs.insert((doc.kind, doc.id.clone()), doc);
        }
        Ok(Tables {
            next_seq: store.next_seq,
            docs,
        })
    }

    fn to_persisted(&self) -> PersistedStore {
        let mut records: Vec<Document> = self.docs.values().cloned().collect();
        records.sort_by_key(|d| d.seq);
        PersistedStore {
            format: STORE_FORMAT,
            next_seq: self.next_seq,
            records,
        }
    }

    /// Validate every buffered write against committed state.
    fn check(&self, writes: &BTreeMap<Key, PendingWrite>) -> Result<(), StorageError> {
        for ((kind, id), write) in writes {
            let committed = self.docs.get(&(*kind, id.clone()));
            match (write.base_version, committed) {
                (None, None) => {}
                (None, Some(_)) => {
                    return Err(StorageError::AlreadyExists {
                        kind: *kind,
                        id: id.clone(),
                    })
                }
                (Some(base), Some(doc)) if doc.version == base => {}
                (Some(base), _) => {
                    return Err(StorageError::ConcurrentConflict {
                        kind: *kind,
                        id: id.clone(),
                        expected_version: base,
                    })
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, writes: BTreeMap<Key, PendingWrite>) {
        for (key, write) in writes {
            let mut doc = write.doc;
            if write.base_version.is_none() {
                doc.seq = self.next_seq;
                self.next_seq += 1;
            }
            self.docs.insert(key, doc);
        }
    }

    fn list(&self, kind: RecordKind, parent_id: Option<&str>) -> Vec<Document> {
        self.docs
            .values()
            .filter(|d| d.kind == kind)
            .filter(|d| parent_id.is_none() || d.parent_id.as_deref() == parent_id)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone)]
struct PendingWrite {
    /// Version the write was based on; None for an insert.
    base_version: Option<i64>,
    doc: Document,
}

/// Buffered writes of one in-flight transaction.
#[derive(Debug, Default)]
pub struct MemorySnapshot {
    writes: BTreeMap<Key, PendingWrite>,
}

impl MemorySnapshot {
    /// Number of records this snapshot would write on commit.
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }
}

/// The in-memory (optionally file-backed) storage backend.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: Mutex<Tables>,
    path: Option<PathBuf>,
}

impl MemoryStorage {
    /// A volatile store; contents are lost when it is dropped.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store persisted to `path`. Loads existing contents if the file exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let tables = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let store: PersistedStore = serde_json::from_slice(&bytes)?;
                let tables = Tables::from_persisted(store)?;
                tracing::info!(
                    path = %path.display(),
                    records = tables.docs.len(),
                    "loaded record store"
                );
                tables
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "creating new record store");
                Tables::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(MemoryStorage {
            tables: Mutex::new(tables),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn persist(path: &Path, tables: &Tables) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(&tables.to_persisted())?;
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// The record as this snapshot sees it: buffered write first, then committed.
    async fn visible(
        &self,
        snapshot: &MemorySnapshot,
        kind: RecordKind,
        id: &str,
    ) -> Option<Document> {
        let key = (kind, id.to_string());
        if let Some(w) = snapshot.writes.get(&key) {
            return Some(w.doc.clone());
        }
        self.tables.lock().await.docs.get(&key).cloned()
    }
}

#[async_trait]
impl MarketStorage for MemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        Ok(MemorySnapshot::default())
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        if snapshot.writes.is_empty() {
            return Ok(());
        }
        let mut tables = self.tables.lock().await;
        tables.check(&snapshot.writes)?;
        match &self.path {
            None => tables.apply(snapshot.writes),
            Some(path) => {
                let mut next = tables.clone();
                next.apply(snapshot.writes);
                Self::persist(path, &next).await?;
                *tables = next;
            }
        }
        Ok(())
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        tracing::debug!(discarded = snapshot.writes.len(), "snapshot aborted");
        Ok(())
    }

    async fn insert_record(
        &self,
        snapshot: &mut MemorySnapshot,
        kind: RecordKind,
        id: &str,
        parent_id: Option<&str>,
        body: serde_json::Value,
    ) -> Result<(), StorageError> {
        if self.visible(snapshot, kind, id).await.is_some() {
            return Err(StorageError::AlreadyExists {
                kind,
                id: id.to_string(),
            });
        }
        let doc = Document {
            kind,
            id: id.to_string(),
            parent_id: parent_id.map(str::to_owned),
            version: 0,
            seq: UNCOMMITTED_SEQ,
            body,
        };
        snapshot.writes.insert(
            (kind, id.to_string()),
            PendingWrite {
                base_version: None,
                doc,
            },
        );
        Ok(())
    }

    async fn get_record_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        kind: RecordKind,
        id: &str,
    ) -> Result<Document, StorageError> {
        self.visible(snapshot, kind, id)
            .await
            .ok_or_else(|| StorageError::NotFound {
                kind,
                id: id.to_string(),
            })
    }

    async fn update_record(
        &self,
        snapshot: &mut MemorySnapshot,
        kind: RecordKind,
        id: &str,
        expected_version: i64,
        body: serde_json::Value,
    ) -> Result<i64, StorageError> {
        let current =
            self.visible(snapshot, kind, id)
                .await
                .ok_or_else(|| StorageError::NotFound {
                    kind,
                    id: id.to_string(),
                })?;
        if current.version != expected_version {
            return Err(StorageError::ConcurrentConflict {
                kind,
                id: id.to_string(),
                expected_version,
            });
        }
        let new_version = expected_version + 1;
        let doc = Document {
            version: new_version,
            body,
            ..current
        };
        let key = (kind, id.to_string());
        let base_version = match snapshot.writes.get(&key) {
            Some(prior) => prior.base_version,
            None => Some(expected_version),
        };
        snapshot
            .writes
            .insert(key, PendingWrite { base_version, doc });
        Ok(new_version)
    }

    async fn list_records_for_update(
        &self,
        snapshot: &mut MemorySnapshot,
        kind: RecordKind,
        parent_id: &str,
    ) -> Result<Vec<Document>, StorageError> {
        let mut by_id: BTreeMap<String, Document> = self
            .tables
            .lock()
            .await
            .list(kind, Some(parent_id))
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();
        for ((k, id), write) in &snapshot.writes {
            if *k == kind && write.doc.parent_id.as_deref() == Some(parent_id) {
                by_id.insert(id.clone(), write.doc.clone());
            }
        }
        let mut docs: Vec<Document> = by_id.into_values().collect();
        docs.sort_by(|a, b| a.seq.cmp(&b.seq).then_with(|| a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn get_record(&self, kind: RecordKind, id: &str) -> Result<Document, StorageError> {
        self.tables
            .lock()
            .await
            .docs
            .get(&(kind, id.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                kind,
                id: id.to_string(),
            })
    }

    async fn list_records(
        &self,
        kind: RecordKind,
        parent_id: Option<&str>,
    ) -> Result<Vec<Document>, StorageError> {
        let mut docs = self.tables.lock().await.list(kind, parent_id);
        docs.sort_by_key(|d| d.seq);
        Ok(docs)
    }
}
