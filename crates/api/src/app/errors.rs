use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use songforge_infra::GenerationError;
use songforge_infra::jobs::JobStoreError;
use songforge_infra::ledger::LedgerError;
use songforge_providers::ProviderError;

pub fn generation_error_to_response(err: GenerationError) -> axum::response::Response {
    match err {
        GenerationError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        GenerationError::InsufficientCredits => json_error(
            StatusCode::PAYMENT_REQUIRED,
            "insufficient_credits",
            "no generation credits left",
        ),
        GenerationError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        GenerationError::Provider(e) => provider_error_to_response(e),
        GenerationError::Persistence(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "persistence_error", msg)
        }
    }
}

fn provider_error_to_response(err: ProviderError) -> axum::response::Response {
    let code = match err {
        ProviderError::Auth(_) | ProviderError::Quota(_) => "provider_unavailable",
        _ => "provider_error",
    };
    json_error(StatusCode::BAD_GATEWAY, code, err.to_string())
}

pub fn store_error_to_response(err: JobStoreError) -> axum::response::Response {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
}

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    match err {
        LedgerError::Credit(e) => json_error(StatusCode::BAD_REQUEST, "credit_error", e.to_string()),
        LedgerError::Storage(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", msg),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
