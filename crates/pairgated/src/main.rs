//! pairgated — the gateway daemon.
//!
//! Wires the routing core together and serves the inbound API:
//! registry and session index, least-loaded balancer, health monitor,
//! and the axum surface. Configuration comes from the environment, with
//! a few CLI overrides for local runs.
//!
//! # Usage
//!
//! ```text
//! BACKEND_SERVERS=http://10.0.0.1:3001,http://10.0.0.2:3001 pairgated
//! pairgated --backend-servers http://localhost:3001 --port 8080
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use pairgate_api::{build_router, ApiState};
use pairgate_balancer::{Forwarder, RetryPolicy, Selector};
use pairgate_client::UpstreamClient;
use pairgate_core::GatewayConfig;
use pairgate_health::HealthMonitor;
use pairgate_registry::ServerRegistry;

/// Hard cap on connection draining at shutdown.
const DRAIN_CAP: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "pairgated", about = "Session-aware HTTP gateway daemon")]
struct Cli {
    /// Listen port (overrides PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Comma-separated backend origins (overrides BACKEND_SERVERS).
    #[arg(long)]
    backend_servers: Option<String>,

    /// Per-backend session capacity (overrides MAX_SESSIONS_PER_SERVER).
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Health sweep interval in milliseconds (overrides HEALTH_CHECK_INTERVAL).
    #[arg(long)]
    health_check_interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| tracing_subscriber::EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| {
            tracing_subscriber::EnvFilter::new("info,pairgated=debug,pairgate=debug")
        });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let mut config = match cli.backend_servers.as_deref() {
        Some(raw) => GatewayConfig::from_env_with_backends(raw)?,
        None => GatewayConfig::from_env()?,
    };
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(max) = cli.max_sessions {
        config.max_sessions_per_server = max;
    }
    if let Some(ms) = cli.health_check_interval_ms {
        config.health_check_interval = Duration::from_millis(ms);
    }

    info!(
        backends = config.backend_urls.len(),
        max_sessions = config.max_sessions_per_server,
        request_timeout_ms = config.request_timeout.as_millis() as u64,
        health_interval_ms = config.health_check_interval.as_millis() as u64,
        "configuration loaded"
    );

    let config = Arc::new(config);

    // ── Routing core ───────────────────────────────────────────────

    let client = UpstreamClient::new(config.request_timeout);
    let registry = Arc::new(ServerRegistry::new(
        &config.backend_urls,
        client.clone(),
        config.max_sessions_per_server,
        config.session_cache_ttl,
    ));
    let selector = Arc::new(Selector::new(registry.clone()));
    let forwarder = Arc::new(Forwarder::new(
        selector.clone(),
        registry.clone(),
        client,
        RetryPolicy {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
        },
    ));
    let monitor = Arc::new(HealthMonitor::new(
        registry.clone(),
        config.health_check_interval,
    ));
    monitor.start();

    // ── API server ─────────────────────────────────────────────────

    let state = ApiState {
        registry,
        selector,
        forwarder,
        monitor: monitor.clone(),
        config: config.clone(),
        started_at: epoch_ms(),
    };
    let router = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "gateway listening");

    let (drained_tx, mut drained_rx) = watch::channel(false);
    let shutdown_monitor = monitor.clone();
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        shutdown_monitor.stop();
        let _ = drained_tx.send(true);
    });

    // Drain gracefully, but never hang past the cap.
    tokio::select! {
        result = server => result?,
        _ = async {
            let _ = drained_rx.changed().await;
            tokio::time::sleep(DRAIN_CAP).await;
        } => {
            warn!(cap_secs = DRAIN_CAP.as_secs(), "drain window expired, exiting");
        }
    }

    info!("gateway stopped");
    Ok(())
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
