use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tracing::info;

use checkout_api as api;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(&cfg.log_level, cfg.log_json);

    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = api::events::EventSender::new(event_tx);

    let sink: Arc<dyn api::events::AnalyticsSink> = Arc::new(api::events::TracingSink);
    tokio::spawn(api::events::process_events(event_rx, sink));

    let state = api::build_state(cfg.clone(), event_sender)
        .context("failed to build application state")?;
    let app = api::app(state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port configuration")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!(%addr, environment = %cfg.environment, "checkout service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install shutdown handler");
        return;
    }
    info!("shutdown signal received");
}
