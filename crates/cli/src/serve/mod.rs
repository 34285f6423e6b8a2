//! `hireline serve` -- HTTP JSON API over the engagement engine.
//!
//! Callers identify themselves with `X-User-Id` and `X-User-Role` headers;
//! engine refusals come back as `{"error", "message", "details"}` with a
//! status derived from the error kind.
//!
//! Security features:
//! - CORS headers on all responses (permissive)
//! - Per-IP rate limiting (default: 120 req/min, configurable)
//! - Optional API key authentication
//!
//! Endpoints:
//! - GET  /health
//! - POST /projects, GET /projects[?status=], GET /projects/{id}
//! - POST /projects/{id}/submit-for-review, POST /projects/{id}/cancel
//! - POST /projects/{id}/proposals, GET /projects/{id}/proposals
//! - GET  /proposals/{id}, GET /proposals/{id}/history
//! - POST /proposals/{id}/{counter,accept,decline,withdraw}
//! - GET  /projects/{id}/escrow
//! - POST /projects/{id}/escrow/{payment-proof,payment-proof-upload,verify,
//!   request-release,release,dispute,refund}
//! - GET  /projects/{id}/escrow/payment-proof
//! - POST /projects/{id}/deliverables, GET /projects/{id}/deliverables
//! - GET  /deliverables/{id}, GET /deliverables/{id}/revisions
//! - POST /deliverables/{id}/{review,approve,request-revision,reject,resubmit}
//! - POST /projects/{id}/milestones, GET /projects/{id}/milestones
//! - GET  /milestones/{id}
//! - POST /milestones/{id}/{start,complete,approve,request-changes}
//! - GET  /files/{reference}

mod error;
mod handlers;
mod identity;
mod middleware;
mod projects;
mod proposals;
mod state;
mod work;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::routing::{get, post};
use axum::{middleware as axum_middleware, Router};
use hireline_engine::{Engine, EngineConfig, MemoryFileStore};
use hireline_storage::{MemoryStorage, StorageError};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};

use crate::config::{Config, ConfigError};

use self::handlers::{handle_get_file, handle_health, handle_not_found};
use self::middleware::{auth_middleware, rate_limit_middleware};
use self::projects::*;
use self::proposals::*;
use self::state::{AppState, RateLimiter};
use self::work::*;

/// Maximum request body size: 10 MB. Payment-proof uploads arrive base64
/// encoded inside JSON.
const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Rate limit window duration in seconds.
const RATE_LIMIT_WINDOW_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ServeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("could not open record store: {0}")]
    Storage(#[from] StorageError),
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/files/{reference}", get(handle_get_file))
        // projects
        .route(
            "/projects",
            post(handle_create_project).get(handle_list_projects),
        )
        .route("/projects/{id}", get(handle_get_project))
        .route(
            "/projects/{id}/submit-for-review",
            post(handle_submit_for_review),
        )
        .route("/projects/{id}/cancel", post(handle_cancel_project))
        // proposals
        .route(
            "/projects/{id}/proposals",
            post(handle_submit_proposal).get(handle_list_proposals),
        )
        .route("/proposals/{id}", get(handle_get_proposal))
        .route("/proposals/{id}/history", get(handle_negotiation_history))
        .route("/proposals/{id}/counter", post(handle_counter_offer))
        .route("/proposals/{id}/accept", post(handle_accept_proposal))
        .route("/proposals/{id}/decline", post(handle_decline_proposal))
        .route("/proposals/{id}/withdraw", post(handle_withdraw_proposal))
        // escrow
        .route("/projects/{id}/escrow", get(handle_get_escrow))
        .route(
            "/projects/{id}/escrow/payment-proof",
            post(handle_submit_payment_proof).get(handle_get_payment_proof),
        )
        .route(
            "/projects/{id}/escrow/payment-proof-upload",
            post(handle_upload_payment_proof),
        )
        .route("/projects/{id}/escrow/verify", post(handle_verify_payment))
        .route(
            "/projects/{id}/escrow/request-release",
            post(handle_request_release),
        )
        .route("/projects/{id}/escrow/release", post(handle_release_escrow))
        .route("/projects/{id}/escrow/dispute", post(handle_dispute_escrow))
        .route("/projects/{id}/escrow/refund", post(handle_refund_escrow))
        // deliverables
        .route(
            "/projects/{id}/deliverables",
            post(handle_submit_deliverable).get(handle_list_deliverables),
        )
        .route("/deliverables/{id}", get(handle_get_deliverable))
        .route("/deliverables/{id}/revisions", get(handle_list_revisions))
        .route("/deliverables/{id}/review", post(handle_mark_under_review))
        .route("/deliverables/{id}/approve", post(handle_approve_deliverable))
        .route(
            "/deliverables/{id}/request-revision",
            post(handle_request_revision),
        )
        .route("/deliverables/{id}/reject", post(handle_reject_deliverable))
        .route(
            "/deliverables/{id}/resubmit",
            post(handle_resubmit_deliverable),
        )
        // milestones
        .route(
            "/projects/{id}/milestones",
            post(handle_create_milestone).get(handle_list_milestones),
        )
        .route("/milestones/{id}", get(handle_get_milestone))
        .route("/milestones/{id}/start", post(handle_start_milestone))
        .route("/milestones/{id}/complete", post(handle_complete_milestone))
        .route("/milestones/{id}/approve", post(handle_approve_milestone))
        .route(
            "/milestones/{id}/request-changes",
            post(handle_request_milestone_changes),
        )
        .fallback(handle_not_found)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

/// Build the engine from `config` and serve until Ctrl+C.
pub async fn start_server(config: Config) -> Result<(), ServeError> {
    config.validate()?;
    let platform_fee = config.fee_rate()?;

    let storage = match &config.storage.data_file {
        Some(path) => MemoryStorage::open(path).await?,
        None => {
            tracing::warn!("no data file configured; records are kept in memory only");
            MemoryStorage::new()
        }
    };

    let files = Arc::new(MemoryFileStore::new(
        config.files.public_url_prefix.clone(),
    ));
    let engine = Engine::new(Arc::new(storage), EngineConfig { platform_fee })
        .with_file_store(files.clone());

    if config.server.api_key.is_some() {
        tracing::info!("API key authentication enabled");
    }
    tracing::info!(
        rate_limit = config.server.rate_limit,
        platform_fee = %platform_fee,
        "engine ready"
    );

    let state = Arc::new(AppState {
        engine,
        files,
        rate_limiter: RateLimiter::new(config.server.rate_limit),
        api_key: config.server.api_key.clone(),
    });

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "hireline listening");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}
