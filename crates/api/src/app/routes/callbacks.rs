//! Provider callback endpoint.
//!
//! Responses use the provider's own `{code, msg}` envelope. Anything other
//! than 200 makes the provider retry, which is safe because the receiver is
//! idempotent.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde_json::json;
use tracing::{error, warn};

use songforge_infra::{CallbackError, CallbackOutcome};

use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route("/provider", post(provider_callback))
}

fn reply(status: StatusCode, msg: impl Into<String>) -> axum::response::Response {
    (status, Json(json!({ "code": status.as_u16(), "msg": msg.into() }))).into_response()
}

/// POST /callbacks/provider
pub async fn provider_callback(
    Extension(services): Extension<Arc<AppServices>>,
    body: Bytes,
) -> axum::response::Response {
    match services.callbacks.handle_bytes(&body).await {
        Ok(CallbackOutcome::NotFound { correlation_id }) => {
            reply(StatusCode::NOT_FOUND, format!("no job for task {correlation_id}"))
        }
        Ok(_) => reply(StatusCode::OK, "ok"),
        Err(e @ CallbackError::InvalidPayload(_)) | Err(e @ CallbackError::MissingCorrelationId) => {
            warn!(error = %e, "rejected provider callback");
            reply(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(CallbackError::Store(msg)) => {
            error!(error = %msg, "provider callback failed");
            reply(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}
