//! Proposal and negotiation routes.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use hireline_core::{NewProposal, Proposal};
use hireline_engine::{Acceptance, CounterOffer};
use serde_json::{json, Value};

use super::handlers::{parse_body, parse_optional_body, ApiResult, ReasonBody};
use super::identity::CurrentUser;
use super::state::AppState;

/// POST /projects/{id}/proposals
pub(crate) async fn handle_submit_proposal(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(project_id): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Proposal>)> {
    let input: NewProposal = parse_body(&body)?;
    let proposal = state
        .engine
        .submit_proposal(&actor, &project_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(proposal)))
}

/// GET /projects/{id}/proposals
pub(crate) async fn handle_list_proposals(
    State(state): State<Arc<AppState>>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let proposals = state.engine.proposals(&project_id).await?;
    Ok(Json(json!({ "proposals": proposals })))
}

/// GET /proposals/{id}
pub(crate) async fn handle_get_proposal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Proposal>> {
    Ok(Json(state.engine.proposal(&id).await?))
}

/// GET /proposals/{id}/history
pub(crate) async fn handle_negotiation_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let history = state.engine.negotiation_history(&id).await?;
    Ok(Json(json!({ "proposal_id": id, "history": history })))
}

/// POST /proposals/{id}/counter
pub(crate) async fn handle_counter_offer(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Proposal>> {
    let offer: CounterOffer = parse_body(&body)?;
    Ok(Json(state.engine.counter_offer(&actor, &id, offer).await?))
}

/// POST /proposals/{id}/accept
pub(crate) async fn handle_accept_proposal(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Acceptance>> {
    Ok(Json(state.engine.accept_proposal(&actor, &id).await?))
}

/// POST /proposals/{id}/decline
pub(crate) async fn handle_decline_proposal(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Proposal>> {
    let ReasonBody { reason } = parse_optional_body(&body)?;
    Ok(Json(state.engine.decline_proposal(&actor, &id, reason).await?))
}

/// POST /proposals/{id}/withdraw
pub(crate) async fn handle_withdraw_proposal(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Proposal>> {
    Ok(Json(state.engine.withdraw_proposal(&actor, &id).await?))
}
