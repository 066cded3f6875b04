//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, providers, intake and callback receiver
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use songforge_infra::{Worker, WorkerConfig, WorkerHandle};

use crate::config::AppConfig;
use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Router plus the background worker serving it.
#[derive(Debug)]
pub struct Application {
    pub router: Router,
    pub worker: WorkerHandle,
    pub services: Arc<AppServices>,
}

/// Build the full application from configuration (public entrypoint used by `main.rs`).
pub async fn build_app(config: &AppConfig) -> anyhow::Result<Application> {
    let services = services::build_services(config).await?;
    Ok(assemble(services, config.worker_config()))
}

/// Spawn a worker over `services` and mount every route.
///
/// Must be called inside a tokio runtime.
pub fn assemble(services: AppServices, worker_config: WorkerConfig) -> Application {
    let worker = Worker::new(
        services.stores.clone(),
        services.providers.clone(),
        services.bus.clone(),
        worker_config,
    )
    .spawn();
    let services = Arc::new(services);
    let router = router(services.clone(), &worker);
    Application {
        router,
        worker,
        services,
    }
}

pub fn router(services: Arc<AppServices>, worker: &WorkerHandle) -> Router {
    let user_scoped = routes::user_router().route_layer(axum::middleware::from_fn(middleware::user_middleware));

    Router::new()
        .merge(routes::public_router())
        .merge(user_scoped)
        .layer(
            ServiceBuilder::new()
                .layer(Extension(services))
                .layer(Extension(worker.stats_handle())),
        )
}
