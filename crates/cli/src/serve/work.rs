//! Deliverable and milestone routes.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use hireline_core::{Deliverable, Milestone, NewDeliverable, NewMilestone};
use hireline_engine::Resubmission;
use serde::Deserialize;
use serde_json::{json, Value};

use super::handlers::{parse_body, parse_optional_body, ApiResult, NoteBody, ReasonBody};
use super::identity::CurrentUser;
use super::state::AppState;

#[derive(Debug, Deserialize)]
struct RevisionBody {
    notes: String,
}

// ── Deliverables ──────────────────────────────────────────────────────────────

/// POST /projects/{id}/deliverables
pub(crate) async fn handle_submit_deliverable(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(project_id): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Deliverable>)> {
    let input: NewDeliverable = parse_body(&body)?;
    let deliverable = state
        .engine
        .submit_deliverable(&actor, &project_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(deliverable)))
}

/// GET /projects/{id}/deliverables
pub(crate) async fn handle_list_deliverables(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let deliverables = state.engine.deliverables(&project_id).await?;
    Ok(Json(json!({ "deliverables": deliverables })))
}

/// GET /deliverables/{id}
pub(crate) async fn handle_get_deliverable(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Deliverable>> {
    Ok(Json(state.engine.deliverable(&id).await?))
}

/// GET /deliverables/{id}/revisions
pub(crate) async fn handle_list_revisions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let revisions = state.engine.revisions(&id).await?;
    Ok(Json(json!({ "deliverable_id": id, "revisions": revisions })))
}

/// POST /deliverables/{id}/review
pub(crate) async fn handle_mark_under_review(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Deliverable>> {
    Ok(Json(state.engine.mark_under_review(&actor, &id).await?))
}

/// POST /deliverables/{id}/approve
pub(crate) async fn handle_approve_deliverable(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Deliverable>> {
    Ok(Json(state.engine.approve_deliverable(&actor, &id).await?))
}

/// POST /deliverables/{id}/request-revision
pub(crate) async fn handle_request_revision(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Deliverable>> {
    let RevisionBody { notes } = parse_body(&body)?;
    Ok(Json(state.engine.request_revision(&actor, &id, &notes).await?))
}

/// POST /deliverables/{id}/reject
pub(crate) async fn handle_reject_deliverable(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Deliverable>> {
    let ReasonBody { reason } = parse_optional_body(&body)?;
    let deliverable = state
        .engine
        .reject_deliverable(&actor, &id, reason.as_deref())
        .await?;
    Ok(Json(deliverable))
}

/// POST /deliverables/{id}/resubmit
pub(crate) async fn handle_resubmit_deliverable(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Deliverable>> {
    let changes: Resubmission = parse_optional_body(&body)?;
    Ok(Json(state.engine.resubmit_deliverable(&actor, &id, changes).await?))
}

// ── Milestones ────────────────────────────────────────────────────────────────

/// POST /projects/{id}/milestones
pub(crate) async fn handle_create_milestone(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(project_id): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Milestone>)> {
    let input: NewMilestone = parse_body(&body)?;
    let milestone = state
        .engine
        .create_milestone(&actor, &project_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(milestone)))
}

/// GET /projects/{id}/milestones
pub(crate) async fn handle_list_milestones(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let milestones = state.engine.milestones(&project_id).await?;
    Ok(Json(json!({ "milestones": milestones })))
}

/// GET /milestones/{id}
pub(crate) async fn handle_get_milestone(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Milestone>> {
    Ok(Json(state.engine.milestone(&id).await?))
}

/// POST /milestones/{id}/start
pub(crate) async fn handle_start_milestone(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Milestone>> {
    Ok(Json(state.engine.start_milestone(&actor, &id).await?))
}

/// POST /milestones/{id}/complete
pub(crate) async fn handle_complete_milestone(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Milestone>> {
    Ok(Json(state.engine.complete_milestone(&actor, &id).await?))
}

/// POST /milestones/{id}/approve
pub(crate) async fn handle_approve_milestone(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Milestone>> {
    Ok(Json(state.engine.approve_milestone(&actor, &id).await?))
}

/// POST /milestones/{id}/request-changes
pub(crate) async fn handle_request_milestone_changes(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Milestone>> {
    let NoteBody { note } = parse_optional_body(&body)?;
    let milestone = state
        .engine
        .request_milestone_changes(&actor, &id, note)
        .await?;
    Ok(Json(milestone))
}
