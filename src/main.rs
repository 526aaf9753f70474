use std::sync::Arc;

use tce_proxy::api::{self, AppState};
use tce_proxy::config::AppConfig;
use tce_proxy::metrics::Metrics;
use tce_proxy::upstream::{ReqwestTransport, UpstreamFetcher};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cfg = AppConfig::from_env()?;
    init_tracing(cfg.log_json);

    let transport = ReqwestTransport::try_new()?;
    let fetcher = UpstreamFetcher::new(Arc::new(transport), cfg.retry.clone());

    tracing::info!(
        attempts = cfg.retry.len(),
        worst_case_ms = cfg.retry.worst_case().as_millis() as u64,
        allowed_hosts = %cfg.allowed_hosts,
        "upstream policy loaded"
    );

    let state = AppState {
        fetcher,
        allowed_hosts: cfg.allowed_hosts.clone(),
        upstream_base: cfg.upstream_base.clone(),
        egress_url: cfg.egress_url.clone(),
        metrics: Metrics::new()?,
    };

    let app = api::router(state);

    let listen_addr = cfg.listen_addr();
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;

    tracing::info!(%listen_addr, "starting tce-proxy");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("tce-proxy exited cleanly");

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term_signal) => term_signal.recv().await,
            Err(error) => {
                tracing::warn!(%error, "failed to install SIGTERM handler");
                None
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
