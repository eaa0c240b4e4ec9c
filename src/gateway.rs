//! HTTP boundary
//!
//! - `POST /invoke`        dispatch one capability call, answer with the envelope
//! - `GET  /capabilities`  registry metadata
//! - `GET  /health`        liveness plus store connectivity
//! - `GET  /`              service banner

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;

use crate::api_errors::AppError;
use crate::app_state::AppState;
use crate::dispatcher::{InvocationRequest, InvocationResult};
use crate::errors::{CapabilityError, ErrorKind};

pub const SERVICE_NAME: &str = "capability-gateway";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/invoke", post(invoke))
        .route("/capabilities", get(list_capabilities))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn invoke(
    State(state): State<Arc<AppState>>,
    body: Result<Json<InvocationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<InvocationResult>), AppError> {
    let Json(request) = body?;
    let capability = request.capability.clone();
    let classification = request.classification;
    let dispatch = state.dispatcher().invoke(request);

    let result = match state.config.invoke_timeout() {
        None => dispatch.await,
        Some(limit) => match tokio::time::timeout(limit, dispatch).await {
            Ok(result) => result,
            Err(_) => {
                // The dispatch task keeps running and still writes its audit event.
                warn!(capability = %capability, timeout = ?limit, "invocation timed out");
                let err = CapabilityError::fault(format!(
                    "capability '{capability}' timed out after {} ms",
                    limit.as_millis()
                ));
                let envelope = InvocationResult::failure(
                    err,
                    classification,
                    limit.as_secs_f64() * 1000.0,
                );
                return Ok((StatusCode::GATEWAY_TIMEOUT, Json(envelope)));
            }
        },
    };

    let status = match result.error_kind {
        Some(ErrorKind::CapabilityNotFound) => StatusCode::NOT_FOUND,
        _ => StatusCode::OK,
    };
    Ok((status, Json(result)))
}

async fn list_capabilities(State(state): State<Arc<AppState>>) -> Json<Value> {
    let capabilities = state.registry().list();
    Json(json!({
        "total": capabilities.len(),
        "capabilities": capabilities,
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let audit = state.audit();
    Json(json!({
        "status": "UP",
        "service": SERVICE_NAME,
        "version": VERSION,
        "timestamp": Utc::now(),
        "store_connected": audit.is_available(),
        "capabilities": state.registry().len(),
        "audit_failed_appends": audit.failed_appends(),
    }))
}

async fn banner(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": VERSION,
        "started_at": state.started_at,
        "endpoints": {
            "invoke": "POST /invoke",
            "capabilities": "GET /capabilities",
            "health": "GET /health",
        },
    }))
}

async fn not_found() -> impl IntoResponse {
    AppError::not_found("no such route")
}
