use std::future::Future;

use super::{body, seed, state_of, TestResult};
use crate::record::RecordKind;
use crate::{MarketStorage, StorageError};

pub(super) async fn run_commit_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "commit",
        "uncommitted_insert_invisible_to_readers",
        uncommitted_insert_invisible_to_readers(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "snapshot_reads_its_own_writes",
        snapshot_reads_its_own_writes(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "multi_record_updates_all_visible_after_commit",
        multi_record_updates_all_visible_after_commit(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "multi_record_updates_none_visible_after_abort",
        multi_record_updates_none_visible_after_abort(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "conflicting_commit_applies_nothing",
        conflicting_commit_applies_nothing(factory).await,
    ));
    results.push(TestResult::from_result(
        "commit",
        "for_update_listing_includes_pending_inserts",
        for_update_listing_includes_pending_inserts(factory).await,
    ));

    results
}

async fn uncommitted_insert_invisible_to_readers<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .insert_record(&mut snap, RecordKind::Project, "p-1", None, body("open"))
        .await
        .map_err(|e| format!("insert: {e}"))?;

    let before = storage.get_record(RecordKind::Project, "p-1").await;
    if !matches!(before, Err(StorageError::NotFound { .. })) {
        return Err(format!("uncommitted insert visible: {before:?}"));
    }
    storage
        .abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;
    let after = storage.get_record(RecordKind::Project, "p-1").await;
    if !matches!(after, Err(StorageError::NotFound { .. })) {
        return Err(format!("aborted insert visible: {after:?}"));
    }
    Ok(())
}

async fn snapshot_reads_its_own_writes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(&storage, RecordKind::Project, "p-1", None, "open").await?;

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .update_record(&mut snap, RecordKind::Project, "p-1", 0, body("in_progress"))
        .await
        .map_err(|e| format!("update: {e}"))?;
    let seen = storage
        .get_record_for_update(&mut snap, RecordKind::Project, "p-1")
        .await
        .map_err(|e| format!("read back: {e}"))?;
    let committed = storage
        .get_record(RecordKind::Project, "p-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    let _ = storage.abort_snapshot(snap).await;

    if state_of(&seen) != "in_progress" || seen.version != 1 {
        return Err(format!(
            "snapshot should see its own write at version 1, saw {} v{}",
            seen.body, seen.version
        ));
    }
    if state_of(&committed) != "open" || committed.version != 0 {
        return Err("uncommitted update leaked to committed state".to_string());
    }
    Ok(())
}

async fn multi_record_updates_all_visible_after_commit<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(&storage, RecordKind::Project, "p-1", None, "open").await?;
    seed(&storage, RecordKind::Proposal, "a", Some("p-1"), "pending").await?;
    seed(&storage, RecordKind::Proposal, "b", Some("p-1"), "pending").await?;

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    for (kind, id, state) in [
        (RecordKind::Proposal, "a", "accepted"),
        (RecordKind::Proposal, "b", "rejected"),
        (RecordKind::Project, "p-1", "escrow_pending"),
    ] {
        storage
            .update_record(&mut snap, kind, id, 0, body(state))
            .await
            .map_err(|e| format!("update {id}: {e}"))?;
    }
    storage
        .commit_snapshot(snap)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    for (kind, id, state) in [
        (RecordKind::Proposal, "a", "accepted"),
        (RecordKind::Proposal, "b", "rejected"),
        (RecordKind::Project, "p-1", "escrow_pending"),
    ] {
        let doc = storage
            .get_record(kind, id)
            .await
            .map_err(|e| format!("get {id}: {e}"))?;
        if state_of(&doc) != state || doc.version != 1 {
            return Err(format!("{id}: expected {state} v1, got {} v{}", doc.body, doc.version));
        }
    }
    Ok(())
}

async fn multi_record_updates_none_visible_after_abort<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(&storage, RecordKind::Proposal, "a", Some("p-1"), "pending").await?;
    seed(&storage, RecordKind::Proposal, "b", Some("p-1"), "pending").await?;

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    for id in ["a", "b"] {
        storage
            .update_record(&mut snap, RecordKind::Proposal, id, 0, body("rejected"))
            .await
            .map_err(|e| format!("update {id}: {e}"))?;
    }
    storage
        .abort_snapshot(snap)
        .await
        .map_err(|e| format!("abort: {e}"))?;

    for id in ["a", "b"] {
        let doc = storage
            .get_record(RecordKind::Proposal, id)
            .await
            .map_err(|e| format!("get {id}: {e}"))?;
        if state_of(&doc) != "pending" || doc.version != 0 {
            return Err(format!("{id}: aborted write became visible"));
        }
    }
    Ok(())
}

/// Two records updated in one snapshot, one of which was changed underneath
/// it: commit fails and neither write lands.
async fn conflicting_commit_applies_nothing<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(&storage, RecordKind::Proposal, "a", Some("p-1"), "pending").await?;
    seed(&storage, RecordKind::Proposal, "b", Some("p-1"), "pending").await?;

    let mut slow = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin slow: {e}"))?;
    storage
        .update_record(&mut slow, RecordKind::Proposal, "a", 0, body("accepted"))
        .await
        .map_err(|e| format!("slow update a: {e}"))?;
    storage
        .update_record(&mut slow, RecordKind::Proposal, "b", 0, body("rejected"))
        .await
        .map_err(|e| format!("slow update b: {e}"))?;

    super::update_and_commit(&storage, RecordKind::Proposal, "b", 0, "withdrawn")
        .await
        .map_err(|e| format!("fast update b: {e}"))?;

    match storage.commit_snapshot(slow).await {
        Err(StorageError::ConcurrentConflict { .. }) => {}
        other => return Err(format!("expected ConcurrentConflict, got {other:?}")),
    }

    let a = storage
        .get_record(RecordKind::Proposal, "a")
        .await
        .map_err(|e| format!("get a: {e}"))?;
    if state_of(&a) != "pending" || a.version != 0 {
        return Err("partial commit: record a was written".to_string());
    }
    let b = storage
        .get_record(RecordKind::Proposal, "b")
        .await
        .map_err(|e| format!("get b: {e}"))?;
    if state_of(&b) != "withdrawn" {
        return Err("winning write to b was overwritten".to_string());
    }
    Ok(())
}

async fn for_update_listing_includes_pending_inserts<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(&storage, RecordKind::Deliverable, "d-1", Some("p-1"), "submitted").await?;

    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    storage
        .insert_record(&mut snap, RecordKind::Deliverable, "d-2", Some("p-1"), body("submitted"))
        .await
        .map_err(|e| format!("insert: {e}"))?;
    let listed = storage
        .list_records_for_update(&mut snap, RecordKind::Deliverable, "p-1")
        .await
        .map_err(|e| format!("list: {e}"))?;
    let _ = storage.abort_snapshot(snap).await;

    let ids: Vec<_> = listed.into_iter().map(|d| d.id).collect();
    if ids != ["d-1", "d-2"] {
        return Err(format!("expected [d-1, d-2], got {ids:?}"));
    }
    Ok(())
}
