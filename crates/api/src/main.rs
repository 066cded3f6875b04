use anyhow::Context;

use songforge_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    songforge_observability::init();

    let config = AppConfig::from_env();
    if config.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN not set; credit grants are disabled");
    }
    if config.callback_url.is_none() {
        tracing::warn!("no callback url configured; generations complete by polling only");
    }

    let app = songforge_api::app::build_app(&config).await?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    let worker = app.worker;
    axum::serve(listener, app.router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .context("server error")?;

    worker.shutdown().await;
    Ok(())
}
