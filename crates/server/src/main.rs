//! Process entry point

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use speaches_config::{ModelAliases, Settings};
use speaches_server::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone())),
        )
        .init();

    let aliases = ModelAliases::load(&settings.model_aliases_path)
        .context("failed to load the model alias file")?;

    let address = format!("{}:{}", settings.host, settings.port);
    let state = AppState::new(settings, aliases);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!(%address, "speaches listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for the shutdown signal");
    }
}
