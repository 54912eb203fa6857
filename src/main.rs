use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use qwen_chat_server::{
    config::AppConfig,
    routes,
    services::model::QwenChatModel,
    state::{AppState, Landing},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let model = QwenChatModel::load(&config.model)
        .await
        .with_context(|| format!("loading {}", config.model.model_id))?;

    let landing = if config.serve_ui { Landing::ChatPage } else { Landing::Liveness };
    let state = Arc::new(AppState::new(Arc::new(model), landing));

    let app = routes::create_router().with_state(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;

    tracing::info!("🚀 {} chat running at http://{}", config.model.model_id, addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install Ctrl-C handler: {}", e);
    }
    tracing::info!("Shutting down");
}
