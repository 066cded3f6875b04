use std::sync::Arc;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use songforge_infra::WorkerStats;
use songforge_infra::jobs::JobStore;

use crate::app::dto::WorkerStatsResponse;
use crate::app::errors;
use crate::app::services::AppServices;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /worker/stats
pub async fn worker_stats(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(stats): Extension<Arc<WorkerStats>>,
) -> axum::response::Response {
    match services.stores.jobs.stats().await {
        Ok(queue) => Json(WorkerStatsResponse {
            worker: stats.snapshot(),
            queue,
        })
        .into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}
