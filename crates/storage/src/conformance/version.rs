use std::future::Future;

use super::{body, seed, state_of, update_and_commit, TestResult};
use crate::record::RecordKind;
use crate::{MarketStorage, StorageError};

pub(super) async fn run_version_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "version",
        "version_increments_sequentially",
        version_increments_sequentially(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "update_with_wrong_version_returns_conflict",
        update_with_wrong_version_returns_conflict(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "conflict_carries_expected_version",
        conflict_carries_expected_version(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "stale_snapshot_loses_to_newer_commit",
        stale_snapshot_loses_to_newer_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "version",
        "update_preserves_parent",
        update_preserves_parent(factory).await,
    ));

    results
}

async fn version_increments_sequentially<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(&storage, RecordKind::Project, "p-1", None, "open").await?;

    for (expected, state) in ["in_progress", "in_review", "completed"].iter().enumerate() {
        let expected = expected as i64;
        let new_version = update_and_commit(&storage, RecordKind::Project, "p-1", expected, state)
            .await
            .map_err(|e| format!("update from v{expected}: {e}"))?;
        if new_version != expected + 1 {
            return Err(format!("expected v{}, got v{new_version}", expected + 1));
        }
    }

    let doc = storage
        .get_record(RecordKind::Project, "p-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if doc.version != 3 || state_of(&doc) != "completed" {
        return Err(format!("expected completed v3, got {} v{}", doc.body, doc.version));
    }
    Ok(())
}

async fn update_with_wrong_version_returns_conflict<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(&storage, RecordKind::Project, "p-1", None, "open").await?;

    for wrong in [1, 5, -1] {
        match update_and_commit(&storage, RecordKind::Project, "p-1", wrong, "in_progress").await {
            Err(StorageError::ConcurrentConflict { .. }) => {}
            other => {
                return Err(format!(
                    "expected ConcurrentConflict for version {wrong}, got {other:?}"
                ))
            }
        }
    }

    let doc = storage
        .get_record(RecordKind::Project, "p-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if doc.version != 0 || state_of(&doc) != "open" {
        return Err("failed update changed the record".to_string());
    }
    Ok(())
}

async fn conflict_carries_expected_version<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(&storage, RecordKind::Deliverable, "d-1", Some("p-1"), "submitted").await?;

    match update_and_commit(&storage, RecordKind::Deliverable, "d-1", 4, "approved").await {
        Err(StorageError::ConcurrentConflict {
            kind,
            id,
            expected_version,
        }) => {
            if kind != RecordKind::Deliverable || id != "d-1" || expected_version != 4 {
                return Err(format!(
                    "conflict has wrong fields: {kind}/{id} expected {expected_version}"
                ));
            }
            Ok(())
        }
        other => Err(format!("expected ConcurrentConflict, got {other:?}")),
    }
}

/// Two snapshots read the same version; the second to commit must fail even
/// though its update was accepted when issued.
async fn stale_snapshot_loses_to_newer_commit<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(&storage, RecordKind::Project, "p-1", None, "open").await?;

    let mut first = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin first: {e}"))?;
    let mut second = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin second: {e}"))?;

    storage
        .update_record(&mut first, RecordKind::Project, "p-1", 0, body("cancelled"))
        .await
        .map_err(|e| format!("first update: {e}"))?;
    let second_staged = storage
        .update_record(&mut second, RecordKind::Project, "p-1", 0, body("in_progress"))
        .await;

    storage
        .commit_snapshot(first)
        .await
        .map_err(|e| format!("first commit: {e}"))?;

    let second_outcome = match second_staged {
        Ok(_) => storage.commit_snapshot(second).await,
        Err(e) => {
            let _ = storage.abort_snapshot(second).await;
            Err(e)
        }
    };
    if !matches!(second_outcome, Err(StorageError::ConcurrentConflict { .. })) {
        return Err(format!(
            "stale snapshot should conflict, got {second_outcome:?}"
        ));
    }

    let doc = storage
        .get_record(RecordKind::Project, "p-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if state_of(&doc) != "cancelled" || doc.version != 1 {
        return Err(format!("expected cancelled v1, got {} v{}", doc.body, doc.version));
    }
    Ok(())
}

async fn update_preserves_parent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(&storage, RecordKind::Milestone, "m-1", Some("p-9"), "pending").await?;
    update_and_commit(&storage, RecordKind::Milestone, "m-1", 0, "in_progress")
        .await
        .map_err(|e| format!("update: {e}"))?;
    let listed = storage
        .list_records(RecordKind::Milestone, Some("p-9"))
        .await
        .map_err(|e| format!("list: {e}"))?;
    if listed.len() != 1 || listed[0].version != 1 {
        return Err("updated record no longer listed under its parent".to_string());
    }
    Ok(())
}
