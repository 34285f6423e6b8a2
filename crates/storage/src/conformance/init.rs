use std::future::Future;

use super::{body, seed, state_of, TestResult};
use crate::record::RecordKind;
use crate::{MarketStorage, StorageError};

pub(super) async fn run_init_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "init",
        "insert_creates_record_at_version_0",
        insert_creates_record_at_version_0(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "insert_preserves_body_and_parent",
        insert_preserves_body_and_parent(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "double_insert_returns_already_exists",
        double_insert_returns_already_exists(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "same_id_different_kind_is_independent",
        same_id_different_kind_is_independent(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "missing_record_returns_not_found",
        missing_record_returns_not_found(factory).await,
    ));
    results.push(TestResult::from_result(
        "init",
        "list_filters_by_parent",
        list_filters_by_parent(factory).await,
    ));

    results
}

async fn insert_creates_record_at_version_0<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(&storage, RecordKind::Project, "p-1", None, "open").await?;
    let doc = storage
        .get_record(RecordKind::Project, "p-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if doc.version != 0 {
        return Err(format!("expected version 0, got {}", doc.version));
    }
    Ok(())
}

async fn insert_preserves_body_and_parent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(&storage, RecordKind::Proposal, "pr-1", Some("p-1"), "pending").await?;
    let doc = storage
        .get_record(RecordKind::Proposal, "pr-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if state_of(&doc) != "pending" {
        return Err(format!("expected body state 'pending', got {}", doc.body));
    }
    if doc.parent_id.as_deref() != Some("p-1") {
        return Err(format!("expected parent p-1, got {:?}", doc.parent_id));
    }
    if doc.kind != RecordKind::Proposal || doc.id != "pr-1" {
        return Err(format!("wrong keys: {}/{}", doc.kind, doc.id));
    }
    Ok(())
}

async fn double_insert_returns_already_exists<S, F, Fut>(factory: &F) -> Result<(), String>
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
    let inserted = storage
        .insert_record(&mut snap, RecordKind::Project, "p-1", None, body("again"))
        .await;
    // A backend may detect the duplicate on insert or on commit.
    let outcome = match inserted {
        Ok(()) => storage.commit_snapshot(snap).await,
        Err(e) => {
            let _ = storage.abort_snapshot(snap).await;
            Err(e)
        }
    };
    match outcome {
        Err(StorageError::AlreadyExists { kind, id }) => {
            if kind != RecordKind::Project || id != "p-1" {
                return Err(format!("AlreadyExists has wrong fields: {kind}/{id}"));
            }
        }
        other => return Err(format!("expected AlreadyExists, got {other:?}")),
    }

    let doc = storage
        .get_record(RecordKind::Project, "p-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if state_of(&doc) != "open" {
        return Err("duplicate insert overwrote the original".to_string());
    }
    Ok(())
}

async fn same_id_different_kind_is_independent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(&storage, RecordKind::Milestone, "x", Some("p-1"), "pending").await?;
    seed(&storage, RecordKind::Deliverable, "x", Some("p-1"), "submitted").await?;
    let m = storage
        .get_record(RecordKind::Milestone, "x")
        .await
        .map_err(|e| format!("get milestone: {e}"))?;
    let d = storage
        .get_record(RecordKind::Deliverable, "x")
        .await
        .map_err(|e| format!("get deliverable: {e}"))?;
    if state_of(&m) != "pending" || state_of(&d) != "submitted" {
        return Err("records of different kinds collided".to_string());
    }
    Ok(())
}

async fn missing_record_returns_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    match storage.get_record(RecordKind::Project, "ghost").await {
        Err(StorageError::NotFound { kind, id }) if kind == RecordKind::Project && id == "ghost" => {}
        other => return Err(format!("get: expected NotFound, got {other:?}")),
    }
    let mut snap = storage
        .begin_snapshot()
        .await
        .map_err(|e| format!("begin: {e}"))?;
    let for_update = storage
        .get_record_for_update(&mut snap, RecordKind::Project, "ghost")
        .await;
    let update = storage
        .update_record(&mut snap, RecordKind::Project, "ghost", 0, body("x"))
        .await;
    let _ = storage.abort_snapshot(snap).await;
    if !matches!(for_update, Err(StorageError::NotFound { .. })) {
        return Err(format!("for_update: expected NotFound, got {for_update:?}"));
    }
    if !matches!(update, Err(StorageError::NotFound { .. })) {
        return Err(format!("update: expected NotFound, got {update:?}"));
    }
    Ok(())
}

async fn list_filters_by_parent<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = factory().await;
    seed(&storage, RecordKind::Proposal, "a", Some("p-1"), "pending").await?;
    seed(&storage, RecordKind::Proposal, "b", Some("p-2"), "pending").await?;
    seed(&storage, RecordKind::Proposal, "c", Some("p-1"), "pending").await?;

    let ids = |docs: Vec<crate::Document>| docs.into_iter().map(|d| d.id).collect::<Vec<_>>();

    let p1 = storage
        .list_records(RecordKind::Proposal, Some("p-1"))
        .await
        .map_err(|e| format!("list: {e}"))?;
    if ids(p1) != ["a", "c"] {
        return Err("parent filter returned wrong records or order".to_string());
    }
    let all = storage
        .list_records(RecordKind::Proposal, None)
        .await
        .map_err(|e| format!("list all: {e}"))?;
    if ids(all) != ["a", "b", "c"] {
        return Err("unfiltered list returned wrong records or order".to_string());
    }
    Ok(())
}
