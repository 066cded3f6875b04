use axum::{
    routing::{get, post},
    Router,
};

pub mod callbacks;
pub mod credits;
pub mod generate;
pub mod jobs;
pub mod songs;
pub mod stream;
pub mod system;

/// Routes that act on behalf of the caller in `x-user-id`.
pub fn user_router() -> Router {
    Router::new()
        .nest("/generate", generate::router())
        .nest("/songs", songs::router())
        .nest("/jobs", jobs::router())
        .route("/credits", get(credits::get_credits))
}

/// Routes reached by providers, operators and unauthenticated stream clients.
pub fn public_router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/worker/stats", get(system::worker_stats))
        .nest("/stream", stream::router())
        .nest("/callbacks", callbacks::router())
        .route("/credits/grant", post(credits::grant_credits))
}
