//! REST endpoints for chat turns and session lifecycle.
//!
//! The tenant id is taken from the `x-tenant-id` header, which the upstream
//! auth layer sets after verifying the caller.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::agent::ChatService;
use crate::error::Error;
use crate::tenant::TenantId;

/// Header carrying the verified tenant id.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Shared state for the chat routes.
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<ChatService>,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
}

fn tenant_from(headers: &HeaderMap) -> Option<TenantId> {
    headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(TenantId::parse)
}

fn error_body(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "error": code, "message": message.into() })),
    )
        .into_response()
}

fn missing_tenant() -> Response {
    error_body(
        StatusCode::UNAUTHORIZED,
        "unauthenticated",
        "Missing tenant identity",
    )
}

/// Map a session error to a status code and user-facing guidance. Internal
/// details stay in the logs.
fn error_response(err: &Error) -> Response {
    match err {
        Error::CredentialMissing { .. } => error_body(
            StatusCode::PRECONDITION_FAILED,
            "integration_missing",
            "Please connect your Meta Ads account in Settings to start chatting.",
        ),
        Error::CredentialInvalid { reason, .. } => error_body(
            StatusCode::PRECONDITION_FAILED,
            "integration_invalid",
            if reason.contains("ad account") {
                "Please select an ad account in Settings before chatting.".to_string()
            } else {
                "Your Meta Ads connection looks incomplete. Please reconnect it in Settings."
                    .to_string()
            },
        ),
        Error::ProfileIncomplete { missing, .. } => error_body(
            StatusCode::PRECONDITION_FAILED,
            "profile_incomplete",
            format!(
                "Please complete your business profile (missing: {}).",
                missing.join(", ")
            ),
        ),
        Error::SessionBusy { .. } => error_body(
            StatusCode::CONFLICT,
            "session_busy",
            "A reply is still being generated. Please wait for it to finish.",
        ),
        Error::IntegrationExpired { .. } => error_body(
            StatusCode::UNAUTHORIZED,
            "integration_expired",
            "Your Meta Ads connection has expired. Please reconnect your account in Settings.",
        ),
        Error::AgentTimeout { .. } => error_body(
            StatusCode::GATEWAY_TIMEOUT,
            "agent_timeout",
            "The assistant took too long to respond. Please try again.",
        ),
        Error::TurnCancelled { .. } => error_body(
            StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            "turn_cancelled",
            "The request was cancelled.",
        ),
        Error::ToolBudgetExhausted { .. } => error_body(
            StatusCode::INTERNAL_SERVER_ERROR,
            "tool_budget_exhausted",
            "The assistant could not finish this request. Try asking something more specific.",
        ),
        Error::Llm { .. } => error_body(
            StatusCode::BAD_GATEWAY,
            "llm_unavailable",
            "The assistant is temporarily unavailable. Please try again.",
        ),
        Error::Storage { .. } | Error::Config(_) => error_body(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Something went wrong. Please try again.",
        ),
    }
}

/// POST /api/chat
///
/// Runs one turn. The turn runs in its own task; if the client goes away the
/// turn is cancelled at its next tool boundary.
async fn chat(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<ChatRequest>,
) -> Response {
    let Some(tenant) = tenant_from(&headers) else {
        return missing_tenant();
    };
    if body.message.trim().is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "empty_message", "Message is empty");
    }

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let service = Arc::clone(&state.service);
    let turn_tenant = tenant.clone();
    let outcome = tokio::spawn(async move {
        service.chat(&turn_tenant, &body.message, cancel).await
    })
    .await;

    match outcome {
        Ok(Ok(result)) => Json(result).into_response(),
        Ok(Err(e)) => {
            if e.needs_tenant_action() || matches!(e, Error::SessionBusy { .. }) {
                tracing::info!(tenant = %tenant, error = %e, "Chat turn rejected");
            } else {
                tracing::error!(tenant = %tenant, error = %e, "Chat turn failed");
            }
            error_response(&e)
        }
        Err(e) => {
            tracing::error!(tenant = %tenant, error = %e, "Chat task panicked");
            error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Something went wrong. Please try again.",
            )
        }
    }
}

/// DELETE /api/session
async fn close_session(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    let Some(tenant) = tenant_from(&headers) else {
        return missing_tenant();
    };
    let closed = state.service.close(&tenant).await;
    Json(json!({ "closed": closed })).into_response()
}

/// GET /health
async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "active_sessions": state.service.sessions().len().await,
    }))
}

/// Build the chat REST routes.
pub fn chat_routes(state: ApiState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/session", delete(close_session))
        .route("/health", get(health))
        .with_state(state)
}

/// CORS for the configured frontend origins. Unparseable origins are skipped.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(TENANT_HEADER),
        ])
        .allow_credentials(true)
}
