//! Shared handler plumbing plus the routes that touch no engagement record:
//! health, stored files and the fallback.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::error::ApiError;
use super::identity::CurrentUser;
use super::state::AppState;

pub(crate) type ApiResult<T> = Result<T, ApiError>;

/// Decode a required JSON request body.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {}", e)))
}

/// Decode a JSON body that may be omitted entirely.
pub(crate) fn parse_optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> ApiResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_body(body)
}

/// `{"note": ...}`, optional.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct NoteBody {
    #[serde(default)]
    pub(crate) note: Option<String>,
}

/// `{"reason": ...}`, optional.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ReasonBody {
    #[serde(default)]
    pub(crate) reason: Option<String>,
}

/// GET /health
pub(crate) async fn handle_health() -> impl IntoResponse {
    let response = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(response))
}

/// GET /files/{reference}
///
/// Stored files are payment proofs and carry the same access rule.
pub(crate) async fn handle_get_file(
    State(state): State<Arc<AppState>>,
    CurrentUser(actor): CurrentUser,
    Path(reference): Path<String>,
) -> ApiResult<Response> {
    state
        .engine
        .authorize_file_download(&actor, &reference)
        .await?;
    let bytes = state
        .files
        .get(&reference)
        .await
        .ok_or_else(|| ApiError::not_found(format!("file {} not found", reference)))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}

/// Fallback for unmatched routes.
pub(crate) async fn handle_not_found() -> ApiError {
    ApiError::not_found("no such route")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_optional_body_is_default() {
        let note: NoteBody = parse_optional_body(&Bytes::from_static(b"  \n")).unwrap();
        assert!(note.note.is_none());
        let note: NoteBody = parse_optional_body(&Bytes::from_static(b"{\"note\":\"ok\"}")).unwrap();
        assert_eq!(note.note.as_deref(), Some("ok"));
    }

    #[test]
    fn malformed_body_is_a_bad_request() {
        let err = parse_body::<NoteBody>(&Bytes::from_static(b"{not json")).unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(parse_body::<NoteBody>(&Bytes::new()).is_err());
    }
}
