use std::sync::Arc;

use axum::{
    extract::{Extension, Json, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use tracing::info;

use songforge_infra::ledger::CreditLedger;

use crate::app::dto::{CreditsResponse, GrantRequest};
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::UserContext;
use crate::middleware::admin_token_matches;

/// GET /credits
pub async fn get_credits(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
) -> axum::response::Response {
    match services.stores.ledger.account(user.user_id()).await {
        Ok(account) => Json(CreditsResponse::from(account)).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

/// POST /credits/grant
pub async fn grant_credits(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Result<Json<GrantRequest>, JsonRejection>,
) -> axum::response::Response {
    if !admin_token_matches(&headers, services.admin_token.as_deref()) {
        return errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", "invalid admin token");
    }
    let Json(request) = match body {
        Ok(b) => b,
        Err(e) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.body_text()),
    };

    match services.stores.ledger.grant(request.user_id, request.amount).await {
        Ok(false) => errors::json_error(StatusCode::BAD_REQUEST, "validation_error", "amount must be positive"),
        Ok(true) => {
            info!(user_id = %request.user_id, amount = request.amount, "credits granted");
            match services.stores.ledger.account(request.user_id).await {
                Ok(account) => Json(CreditsResponse::from(account)).into_response(),
                Err(e) => errors::ledger_error_to_response(e),
            }
        }
        Err(e) => errors::ledger_error_to_response(e),
    }
}
