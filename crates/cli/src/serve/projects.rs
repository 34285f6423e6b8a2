//! Project and escrow routes.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hireline_core::{Escrow, NewProject, Project, ProjectStatus};
use hireline_engine::{CancelRequest, EngineError, ReleaseRequest};
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::ApiError;
use super::handlers::{parse_body, parse_optional_body, ApiResult, NoteBody};
use super::identity::{viewer, CurrentUser};
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct ProjectFilter {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentProofBody {
    reference: String,
}

#[derive(Debug, Deserialize)]
struct PaymentProofUpload {
    content_base64: String,
}

/// POST /projects
pub(crate) async fn handle_create_project(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Project>)> {
    let input: NewProject = parse_body(&body)?;
    let project = state.engine.create_project(&actor, input).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

/// GET /projects?status=open
pub(crate) async fn handle_list_projects(
    State(state): State<Arc<AppState>>,
    user: Option<CurrentUser>,
    filter: Result<Query<ProjectFilter>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(filter) = filter.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let status = match filter.status.as_deref() {
        None => None,
        Some(s) => Some(ProjectStatus::parse(s).ok_or_else(|| {
            ApiError::bad_request(format!("unknown project status '{}'", s))
        })?),
    };
    let projects: Vec<Project> = state
        .engine
        .projects(status)
        .await?
        .into_iter()
        .map(|p| p.redacted_for(viewer(&user)))
        .collect();
    Ok(Json(json!({ "projects": projects })))
}

/// GET /projects/{id}
pub(crate) async fn handle_get_project(
    State(state): State<Arc<AppState>>,
    user: Option<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Project>> {
    let project = state.engine.project(&id).await?;
    Ok(Json(project.redacted_for(viewer(&user))))
}

/// POST /projects/{id}/submit-for-review
pub(crate) async fn handle_submit_for_review(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Project>> {
    let project = state.engine.submit_for_review(&actor, &id).await?;
    Ok(Json(project.redacted_for(Some(&actor))))
}

/// POST /projects/{id}/cancel
pub(crate) async fn handle_cancel_project(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Project>> {
    let request: CancelRequest = parse_optional_body(&body)?;
    let project = state.engine.cancel_project(&actor, &id, request).await?;
    Ok(Json(project.redacted_for(Some(&actor))))
}

// ── Escrow ────────────────────────────────────────────────────────────────────

/// GET /projects/{id}/escrow
pub(crate) async fn handle_get_escrow(
    State(state): State<Arc<AppState>>,
    user: Option<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Escrow>> {
    let project = state.engine.project(&id).await?.redacted_for(viewer(&user));
    let escrow = project.escrow.ok_or_else(|| EngineError::NotFound {
        entity: "escrow",
        id: id.clone(),
    })?;
    Ok(Json(escrow))
}

/// POST /projects/{id}/escrow/payment-proof
pub(crate) async fn handle_submit_payment_proof(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Project>> {
    let proof: PaymentProofBody = parse_body(&body)?;
    let project = state
        .engine
        .submit_payment_proof(&actor, &id, &proof.reference)
        .await?;
    Ok(Json(project.redacted_for(Some(&actor))))
}

/// POST /projects/{id}/escrow/payment-proof-upload
pub(crate) async fn handle_upload_payment_proof(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Project>> {
    let upload: PaymentProofUpload = parse_body(&body)?;
    let bytes = BASE64
        .decode(upload.content_base64.trim())
        .map_err(|e| ApiError::bad_request(format!("content_base64 is not valid base64: {}", e)))?;
    let project = state
        .engine
        .submit_payment_proof_upload(&actor, &id, bytes)
        .await?;
    Ok(Json(project.redacted_for(Some(&actor))))
}

/// GET /projects/{id}/escrow/payment-proof
pub(crate) async fn handle_get_payment_proof(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let url = state.engine.payment_proof_url(&actor, &id).await?;
    Ok(Json(json!({ "project_id": id, "url": url })))
}

/// POST /projects/{id}/escrow/verify
pub(crate) async fn handle_verify_payment(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Project>> {
    let NoteBody { note } = parse_optional_body(&body)?;
    let project = state.engine.verify_payment(&actor, &id, note).await?;
    Ok(Json(project.redacted_for(Some(&actor))))
}

/// POST /projects/{id}/escrow/request-release
pub(crate) async fn handle_request_release(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Project>> {
    let project = state.engine.request_release(&actor, &id).await?;
    Ok(Json(project.redacted_for(Some(&actor))))
}

/// POST /projects/{id}/escrow/release
pub(crate) async fn handle_release_escrow(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Project>> {
    let request: ReleaseRequest = parse_body(&body)?;
    let project = state.engine.release_escrow(&actor, &id, request).await?;
    Ok(Json(project.redacted_for(Some(&actor))))
}

/// POST /projects/{id}/escrow/dispute
pub(crate) async fn handle_dispute_escrow(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Project>> {
    let NoteBody { note } = parse_optional_body(&body)?;
    let project = state.engine.dispute_escrow(&actor, &id, note).await?;
    Ok(Json(project.redacted_for(Some(&actor))))
}

/// POST /projects/{id}/escrow/refund
pub(crate) async fn handle_refund_escrow(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Project>> {
    let NoteBody { note } = parse_optional_body(&body)?;
    let project = state.engine.refund_escrow(&actor, &id, note).await?;
    Ok(Json(project.redacted_for(Some(&actor))))
}
