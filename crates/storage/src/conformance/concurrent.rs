use std::future::Future;
use std::sync::Arc;

use super::{body, seed, state_of, TestResult};
use crate::record::RecordKind;
use crate::{MarketStorage, StorageError};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_updates_exactly_one_wins",
        concurrent_updates_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_inserts_exactly_one_wins",
        concurrent_inserts_exactly_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_multi_record_snapshots_one_wins",
        concurrent_multi_record_snapshots_one_wins(factory).await,
    ));
    results.push(TestResult::from_result(
        "concurrent",
        "concurrent_updates_different_records_all_succeed",
        concurrent_updates_different_records_all_succeed(factory).await,
    ));

    results
}

/// Outcome of one racing task: `Ok(true)` if it committed, `Ok(false)` if it
/// lost to a conflicting writer, `Err` for anything else.
///
/// A backend may report the conflict when the write is issued or when the
/// snapshot commits; both count as losing.
async fn finish<S: MarketStorage>(
    storage: &S,
    snap: S::Snapshot,
    staged: Result<(), StorageError>,
) -> Result<bool, StorageError> {
    if let Err(e) = staged {
        let _ = storage.abort_snapshot(snap).await;
        return match e {
            StorageError::ConcurrentConflict { .. } | StorageError::AlreadyExists { .. } => {
                Ok(false)
            }
            other => Err(other),
        };
    }
    match storage.commit_snapshot(snap).await {
        Ok(()) => Ok(true),
        Err(StorageError::ConcurrentConflict { .. }) | Err(StorageError::AlreadyExists { .. }) => {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

async fn tally(
    handles: Vec<tokio::task::JoinHandle<Result<bool, StorageError>>>,
) -> Result<(usize, usize), String> {
    let mut winners = 0usize;
    let mut losers = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        } else {
            losers += 1;
        }
    }
    Ok((winners, losers))
}

fn expect_one_winner(winners: usize, losers: usize) -> Result<(), String> {
    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    if losers != N - 1 {
        return Err(format!("expected {} losers, got {losers}", N - 1));
    }
    Ok(())
}

// ── Concurrent update: exactly one wins ─────────────────────────────────────

/// N tasks each open a snapshot and update the same record from version 0.
/// Exactly one commit succeeds and the committed body is the winner's.
async fn concurrent_updates_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed(storage.as_ref(), RecordKind::Project, "p-1", None, "open").await?;

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let staged = s
                .update_record(&mut snap, RecordKind::Project, "p-1", 0, body(&format!("writer-{i}")))
                .await
                .map(|_| ());
            finish(s.as_ref(), snap, staged).await
        }));
    }

    let (winners, losers) = tally(handles).await?;
    expect_one_winner(winners, losers)?;

    let doc = storage
        .get_record(RecordKind::Project, "p-1")
        .await
        .map_err(|e| format!("get: {e}"))?;
    if doc.version != 1 {
        return Err(format!("expected final version 1, got {}", doc.version));
    }
    if !state_of(&doc).starts_with("writer-") {
        return Err(format!("unexpected final body {}", doc.body));
    }
    Ok(())
}

// ── Concurrent insert: exactly one wins ─────────────────────────────────────

async fn concurrent_inserts_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let staged = s
                .insert_record(&mut snap, RecordKind::Proposal, "pr-1", Some("p-1"), body("pending"))
                .await;
            finish(s.as_ref(), snap, staged).await
        }));
    }

    let (winners, losers) = tally(handles).await?;
    expect_one_winner(winners, losers)?;

    let listed = storage
        .list_records(RecordKind::Proposal, Some("p-1"))
        .await
        .map_err(|e| format!("list: {e}"))?;
    if listed.len() != 1 {
        return Err(format!("expected 1 stored proposal, got {}", listed.len()));
    }
    Ok(())
}

// ── Multi-record snapshots on overlapping records ───────────────────────────

/// Each task marks a different proposal accepted and every other proposal
/// rejected, plus updates the parent project, all in one snapshot. Exactly
/// one snapshot commits, and the committed state has exactly one accepted
/// proposal.
async fn concurrent_multi_record_snapshots_one_wins<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    seed(storage.as_ref(), RecordKind::Project, "p-1", None, "open").await?;
    for i in 0..N {
        seed(
            storage.as_ref(),
            RecordKind::Proposal,
            &format!("pr-{i}"),
            Some("p-1"),
            "pending",
        )
        .await?;
    }

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let staged = async {
                for j in 0..N {
                    let state = if i == j { "accepted" } else { "rejected" };
                    s.update_record(&mut snap, RecordKind::Proposal, &format!("pr-{j}"), 0, body(state))
                        .await?;
                }
                s.update_record(&mut snap, RecordKind::Project, "p-1", 0, body(&format!("pr-{i}")))
                    .await?;
                Ok::<(), StorageError>(())
            }
            .await;
            finish(s.as_ref(), snap, staged).await
        }));
    }

    let (winners, losers) = tally(handles).await?;
    expect_one_winner(winners, losers)?;

    let proposals = storage
        .list_records(RecordKind::Proposal, Some("p-1"))
        .await
        .map_err(|e| format!("list: {e}"))?;
    let accepted: Vec<_> = proposals
        .iter()
        .filter(|d| state_of(d) == "accepted")
        .map(|d| d.id.clone())
        .collect();
    if accepted.len() != 1 {
        return Err(format!("expected 1 accepted proposal, got {accepted:?}"));
    }
    let project = storage
        .get_record(RecordKind::Project, "p-1")
        .await
        .map_err(|e| format!("get project: {e}"))?;
    if state_of(&project) != accepted[0] {
        return Err(format!(
            "project points at {} but {} was accepted",
            project.body, accepted[0]
        ));
    }
    Ok(())
}

// ── Concurrent updates to different records: all succeed ────────────────────

/// N tasks each update a different record. All succeed: no false conflicts
/// when there is no contention.
async fn concurrent_updates_different_records_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: MarketStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(factory().await);
    for i in 0..N {
        seed(
            storage.as_ref(),
            RecordKind::Milestone,
            &format!("m-{i}"),
            Some("p-1"),
            "pending",
        )
        .await?;
    }

    let mut handles = Vec::new();
    for i in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let staged = s
                .update_record(&mut snap, RecordKind::Milestone, &format!("m-{i}"), 0, body("in_progress"))
                .await
                .map(|_| ());
            finish(s.as_ref(), snap, staged).await
        }));
    }

    let (winners, _) = tally(handles).await?;
    if winners != N {
        return Err(format!("expected all {N} to succeed, got {winners}"));
    }
    for i in 0..N {
        let doc = storage
            .get_record(RecordKind::Milestone, &format!("m-{i}"))
            .await
            .map_err(|e| format!("get m-{i}: {e}"))?;
        if doc.version != 1 || state_of(&doc) != "in_progress" {
            return Err(format!("m-{i} not updated"));
        }
    }
    Ok(())
}
