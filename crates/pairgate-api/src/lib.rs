//! pairgate-api — the gateway's inbound HTTP surface.
//!
//! Thin axum handlers over the routing core: pairing is forwarded
//! through the load balancer, session operations resolve through the
//! registry, and the read-only surfaces snapshot whatever the registry
//! and monitor already know.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | Service banner and endpoint catalog |
//! | GET | `/pair/{number}` | Forwarded pairing request |
//! | DELETE | `/delete-session/{sessionId}` | Delete a session wherever it lives |
//! | GET | `/find-session/{sessionId}` | Locate a session's backend |
//! | GET | `/health` | Fleet, balancer, monitor, and index state |
//! | GET | `/stats` | Per-backend counters and cache statistics |
//! | GET | `/servers` | Descriptive backend list |
//! | GET | `/total-sessions` | Fresh capacity view with recommendations |
//! | POST | `/health/check/{serverId}` | Force a probe of one backend |
//! | POST | `/servers/reset/{serverId}` | Force a backend back to healthy |

pub mod handlers;

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use pairgate_balancer::{Forwarder, Selector};
use pairgate_core::GatewayConfig;
use pairgate_health::HealthMonitor;
use pairgate_registry::ServerRegistry;
use tower_http::trace::TraceLayer;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<ServerRegistry>,
    pub selector: Arc<Selector>,
    pub forwarder: Arc<Forwarder>,
    pub monitor: Arc<HealthMonitor>,
    pub config: Arc<GatewayConfig>,
    /// Unix ms when the process came up.
    pub started_at: u64,
}

/// Build the complete gateway router.
pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(handlers::service_banner))
        .route("/pair/{number}", get(handlers::pair))
        .route("/delete-session/{session_id}", delete(handlers::delete_session))
        .route("/find-session/{session_id}", get(handlers::find_session))
        .route("/health", get(handlers::health))
        .route("/stats", get(handlers::stats))
        .route("/servers", get(handlers::servers))
        .route("/total-sessions", get(handlers::total_sessions))
        .route("/health/check/{server_id}", post(handlers::force_check))
        .route("/servers/reset/{server_id}", post(handlers::reset_server))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
