//! Conformance test suite for `MarketStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `MarketStorage` implementation can run to verify correctness. The suite
//! covers:
//!
//! - **Initialization**: inserts, duplicate detection, parent listing
//! - **Atomic commit**: all-or-nothing semantics for multi-record snapshots,
//!   isolation of uncommitted writes
//! - **Version validation / OCC**: optimistic concurrency conflict detection
//! - **Concurrency**: real `tokio::spawn` races on the same record
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use hireline_storage::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn memory_conformance() {
//!     let report = run_conformance_suite(|| async { MemoryStorage::new() }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod commit;
mod concurrent;
mod init;
mod version;

use std::fmt;
use std::future::Future;

use crate::record::RecordKind;
use crate::{MarketStorage, StorageError};

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "init", "commit", "version").
    pub category: String,
    /// Test name (e.g. "insert_creates_record_at_version_0").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(init::run_init_tests(&factory).await);
    results.extend(commit::run_commit_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn body(state: &str) -> serde_json::Value {
    serde_json::json!({ "state": state })
}

fn state_of(doc: &crate::Document) -> String {
    doc.body
        .get("state")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

/// Insert `(kind, id)` with the given state in its own committed snapshot.
async fn seed<S: MarketStorage>(
    storage: &S,
    kind: RecordKind,
    id: &str,
    parent_id: Option<&str>,
    state: &str,
) -> Result<(), String> {
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .insert_record(&mut snap, kind, id, parent_id, body(state))
        .await
        .map_err(|e| format!("insert {kind}/{id}: {e}"))?;
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit {kind}/{id}: {e}"))
}

/// Update `(kind, id)` from `expected_version` in its own snapshot and commit.
async fn update_and_commit<S: MarketStorage>(
    storage: &S,
    kind: RecordKind,
    id: &str,
    expected_version: i64,
    state: &str,
) -> Result<i64, StorageError> {
    let mut snap = storage.begin_snapshot().await?;
    match storage
        .update_record(&mut snap, kind, id, expected_version, body(state))
        .await
    {
        Ok(v) => {
            storage.commit_snapshot(snap).await?;
            Ok(v)
        }
        Err(e) => {
            let _ = storage.abort_snapshot(snap).await;
            Err(e)
        }
    }
}
