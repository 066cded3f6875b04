use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use songforge_core::JobId;
use songforge_infra::jobs::JobStore;

use crate::app::dto::JobResponse;
use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::UserContext;

pub fn router() -> Router {
    Router::new().route("/:id", get(get_job))
}

/// GET /jobs/:id
///
/// Polling fallback for clients that missed the live stream. Jobs owned by
/// other users are reported as missing.
pub async fn get_job(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(user): Extension<UserContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match id.parse() {
        Ok(v) => v,
        Err(_) => return errors::json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"),
    };

    match services.stores.jobs.get(job_id).await {
        Ok(Some(job)) if job.user_id == user.user_id() => Json(JobResponse::from(&job)).into_response(),
        Ok(_) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "job not found"),
        Err(e) => errors::store_error_to_response(e),
    }
}
