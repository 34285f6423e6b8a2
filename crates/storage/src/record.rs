use std::fmt;

use hireline_core::{Deliverable, Milestone, Project, Proposal};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// The four persisted record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Project,
    Proposal,
    Milestone,
    Deliverable,
}

impl RecordKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            RecordKind::Project => "project",
            RecordKind::Proposal => "proposal",
            RecordKind::Milestone => "milestone",
            RecordKind::Deliverable => "deliverable",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record as stored in the backend: an opaque JSON body plus the keys and
/// version the backend needs for conditional updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub kind: RecordKind,
    pub id: String,
    /// Owning project id for child records; None for projects.
    pub parent_id: Option<String>,
    pub version: i64,
    /// Commit order, assigned by the backend on insert.
    pub seq: u64,
    pub body: serde_json::Value,
}

/// A typed record that can be stored as a [`Document`].
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: RecordKind;

    fn record_id(&self) -> &str;

    fn parent_id(&self) -> Option<&str>;
}

/// A decoded record together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<R> {
    pub record: R,
    pub version: i64,
}

impl<R: Record> Versioned<R> {
    pub fn from_document(doc: Document) -> Result<Self, serde_json::Error> {
        Ok(Versioned {
            record: serde_json::from_value(doc.body)?,
            version: doc.version,
        })
    }
}

impl Record for Project {
    const KIND: RecordKind = RecordKind::Project;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        None
    }
}

impl Record for Proposal {
    const KIND: RecordKind = RecordKind::Proposal;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.project_id)
    }
}

impl Record for Milestone {
    const KIND: RecordKind = RecordKind::Milestone;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.project_id)
    }
}

impl Record for Deliverable {
    const KIND: RecordKind = RecordKind::Deliverable;

    fn record_id(&self) -> &str {
        &self.id
    }

    fn parent_id(&self) -> Option<&str> {
        Some(&self.project_id)
    }
}
