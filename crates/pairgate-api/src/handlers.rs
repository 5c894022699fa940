//! Gateway HTTP handlers.
//!
//! Every JSON response carries `ok` and `timestamp`; upstream bodies on
//! the pairing and deletion paths are passed through verbatim so
//! clients see the backend's authoritative verdict.

use std::net::SocketAddr;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Path, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures_util::future::join_all;
use pairgate_balancer::{ForwardError, SelectError};
use pairgate_client::{PairOutcome, ProxyRequest};
use pairgate_core::{validate_pair_number, validate_session_id};
use pairgate_registry::{BackendStatus, RegistryError};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::ApiState;

/// Largest inbound body the gateway will buffer for forwarding.
const MAX_BODY_BYTES: usize = 1024 * 1024;

// ── Response envelope ──────────────────────────────────────────────

/// Wrap a payload object with `ok: true` and a timestamp.
fn envelope(mut value: Value) -> Json<Value> {
    if let Value::Object(map) = &mut value {
        map.insert("ok".to_string(), json!(true));
        map.insert("timestamp".to_string(), json!(now_ms()));
    }
    Json(value)
}

/// A failing JSON response with `ok: false` and a timestamp.
fn failure(status: StatusCode, message: &str, code: Option<&str>) -> Response {
    let mut body = json!({
        "ok": false,
        "error": message,
        "timestamp": now_ms(),
    });
    if let (Value::Object(map), Some(code)) = (&mut body, code) {
        map.insert("code".to_string(), json!(code));
    }
    (status, Json(body)).into_response()
}

/// Relay an upstream status and body without rewriting either.
fn passthrough(status: u16, content_type: Option<HeaderValue>, body: Bytes) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type =
        content_type.unwrap_or_else(|| HeaderValue::from_static("application/json"));
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

// ── Pairing ────────────────────────────────────────────────────────

/// GET /pair/{number}
pub async fn pair(
    State(state): State<ApiState>,
    Path(number): Path<String>,
    req: Request,
) -> Response {
    if let Err(e) = validate_pair_number(&number) {
        return failure(StatusCode::BAD_REQUEST, &e.to_string(), None);
    }

    let (parts, body) = req.into_parts();
    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return failure(
                StatusCode::BAD_REQUEST,
                &format!("failed to read request body: {e}"),
                None,
            );
        }
    };
    let client_ip = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string());

    let proxy_request = ProxyRequest {
        method: parts.method,
        path: parts.uri.path().to_string(),
        headers: parts.headers,
        body,
        client_ip,
    };

    let forwarded = match state.forwarder.forward(&proxy_request).await {
        Ok(forwarded) => forwarded,
        Err(ForwardError::Select(e)) => return capacity_failure(e),
        Err(ForwardError::Transport(t)) => {
            return failure(
                StatusCode::SERVICE_UNAVAILABLE,
                &format!("Failed to reach any API server: {t}"),
                None,
            );
        }
    };

    if forwarded.response.body.is_empty() {
        warn!(backend = %forwarded.backend_id, "empty response from upstream on pairing");
        return failure(
            StatusCode::BAD_GATEWAY,
            "Empty response from upstream server",
            None,
        );
    }

    // Post-success bookkeeping: hint the new session to its backend.
    // Failures here are logged, never surfaced — the client gets the
    // upstream verdict either way.
    match serde_json::from_slice::<PairOutcome>(&forwarded.response.body) {
        Ok(outcome) if outcome.ok => match outcome.session_key() {
            Some(session_key) => {
                if let Err(e) = state.registry.record_pairing(&forwarded.backend_id, session_key) {
                    error!(backend = %forwarded.backend_id, error = %e, "failed to index paired session");
                }
            }
            None => warn!(backend = %forwarded.backend_id, "pairing response carries no session key"),
        },
        Ok(_) => debug!(backend = %forwarded.backend_id, "upstream declined pairing"),
        Err(e) => debug!(backend = %forwarded.backend_id, error = %e, "unparseable pairing response"),
    }

    let content_type = forwarded.response.headers.get(CONTENT_TYPE).cloned();
    passthrough(
        forwarded.response.status.as_u16(),
        content_type,
        forwarded.response.body,
    )
}

/// Map a selection failure onto its 503 message.
fn capacity_failure(err: SelectError) -> Response {
    let message = match err {
        SelectError::AllFull { max } => format!("All API servers are full ({max}/{max})"),
        SelectError::AllUnavailable => "All API servers are currently unavailable".to_string(),
        SelectError::NoActiveServers => "No active API servers available".to_string(),
    };
    failure(StatusCode::SERVICE_UNAVAILABLE, &message, Some(err.code()))
}

// ── Session operations ─────────────────────────────────────────────

/// DELETE /delete-session/{session_id}
pub async fn delete_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Response {
    if let Err(e) = validate_session_id(&session_id) {
        return failure(StatusCode::BAD_REQUEST, &e.to_string(), None);
    }

    let location = match state.registry.find_session_backend(&session_id).await {
        Some(location) => location,
        None => {
            return failure(
                StatusCode::NOT_FOUND,
                "Session not found on any server",
                None,
            );
        }
    };

    match state
        .registry
        .delete_session(&location.backend_id, &session_id)
        .await
    {
        Ok(outcome) => envelope(json!({
            "message": "Session deleted",
            "server": outcome.backend_id,
            "newSessionCount": outcome.new_session_count,
        }))
        .into_response(),
        Err(RegistryError::UpstreamStatus { status, body, .. }) => {
            passthrough(status, None, Bytes::from(body))
        }
        Err(RegistryError::Transport(t)) => failure(
            StatusCode::SERVICE_UNAVAILABLE,
            &format!("Failed to delete session: {t}"),
            None,
        ),
        Err(RegistryError::UnknownBackend(id)) => failure(
            StatusCode::NOT_FOUND,
            &format!("Unknown backend: {id}"),
            None,
        ),
        Err(e) => failure(StatusCode::SERVICE_UNAVAILABLE, &e.to_string(), None),
    }
}

/// GET /find-session/{session_id}
pub async fn find_session(
    State(state): State<ApiState>,
    Path(session_id): Path<String>,
) -> Response {
    if let Err(e) = validate_session_id(&session_id) {
        return failure(StatusCode::BAD_REQUEST, &e.to_string(), None);
    }

    match state.registry.find_session_backend(&session_id).await {
        Some(location) => envelope(json!({
            "found": true,
            "sessionId": session_id,
            "server": location.backend_id,
            "cached": location.cached,
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "ok": false,
                "found": false,
                "error": "Session not found on any server",
                "timestamp": now_ms(),
            })),
        )
            .into_response(),
    }
}

// ── Read-only surfaces ─────────────────────────────────────────────

/// GET /health
pub async fn health(State(state): State<ApiState>) -> Response {
    let totals = state.registry.totals();
    envelope(json!({
        "summary": totals,
        "servers": state.registry.all_backends(),
        "loadBalancer": {
            "strategy": "least-loaded",
            "tieBreak": "round-robin",
            "cursor": state.selector.cursor_position(),
        },
        "healthMonitor": state.monitor.status(),
        "sessionMapping": state.registry.index_info(),
    }))
    .into_response()
}

/// GET /stats
pub async fn stats(State(state): State<ApiState>) -> Response {
    let (backends, index, cache) = state.registry.stats();
    envelope(json!({
        "servers": backends,
        "sessionIndex": { "size": index.size },
        "countCache": cache,
        "uptimeMs": now_ms().saturating_sub(state.started_at),
    }))
    .into_response()
}

/// GET /servers
pub async fn servers(State(state): State<ApiState>) -> Response {
    let servers: Vec<Value> = state
        .registry
        .all_backends()
        .into_iter()
        .map(|s| {
            json!({
                "id": s.id,
                "url": s.url,
                "status": s.status,
                "isActive": s.is_active,
                "sessionCount": s.session_count,
                "lastChecked": s.last_checked,
            })
        })
        .collect();
    envelope(json!({
        "count": servers.len(),
        "servers": servers,
    }))
    .into_response()
}

/// GET /total-sessions
///
/// Forces a fresh count per backend; backends that cannot be probed
/// fall back to their last-known count and flag the payload as
/// degraded. This surface never fails.
pub async fn total_sessions(State(state): State<ApiState>) -> Response {
    let max = state.registry.max_sessions();
    let ids = state.registry.backend_ids();
    let fresh = join_all(ids.iter().map(|id| {
        let registry = state.registry.clone();
        let id = id.clone();
        async move {
            let count = registry.session_count(&id).await;
            (id, count)
        }
    }))
    .await;

    let mut degraded = false;
    let mut total = 0usize;
    let mut servers = Vec::with_capacity(fresh.len());
    for (id, result) in fresh {
        let (count, stale) = match result {
            Ok(count) => (count, false),
            Err(e) => {
                debug!(backend = %id, error = %e, "fresh count unavailable, using last known");
                degraded = true;
                let last_known = state.registry.get(&id).map(|s| s.session_count).unwrap_or(0);
                (last_known, true)
            }
        };
        total += count;
        servers.push(json!({
            "id": id,
            "sessions": count,
            "max": max,
            "utilization": percentage(count, max),
            "stale": stale,
        }));
    }

    let capacity = ids.len() * max;
    let snapshots = state.registry.all_backends();
    let unhealthy = snapshots
        .iter()
        .filter(|s| s.status == BackendStatus::Unhealthy)
        .count();

    let mut alerts: Vec<String> = Vec::new();
    if degraded {
        alerts.push("Some backends could not be probed; their counts may be stale".to_string());
    }
    if unhealthy > 0 {
        alerts.push(format!("{unhealthy} backend(s) are unhealthy"));
    }

    let utilization = percentage(total, capacity);
    let mut recommendations: Vec<String> = Vec::new();
    if utilization >= 80.0 {
        recommendations.push("Fleet is above 80% capacity; consider adding backends".to_string());
    }
    if unhealthy > 0 {
        recommendations.push("Investigate unhealthy backends before they shrink capacity".to_string());
    }

    envelope(json!({
        "summary": {
            "totalSessions": total,
            "capacity": capacity,
            "available": capacity.saturating_sub(total),
            "utilization": utilization,
            "degraded": degraded,
        },
        "servers": servers,
        "alerts": alerts,
        "recommendations": recommendations,
    }))
    .into_response()
}

// ── Operator actions ───────────────────────────────────────────────

/// POST /health/check/{server_id}
pub async fn force_check(
    State(state): State<ApiState>,
    Path(server_id): Path<String>,
) -> Response {
    match state.monitor.check_server(&server_id).await {
        Ok(snapshot) => envelope(json!({
            "message": "Health check completed",
            "server": snapshot,
        }))
        .into_response(),
        Err(e) => failure(StatusCode::NOT_FOUND, &e.to_string(), None),
    }
}

/// POST /servers/reset/{server_id}
pub async fn reset_server(
    State(state): State<ApiState>,
    Path(server_id): Path<String>,
) -> Response {
    match state.registry.reset_to_healthy(&server_id) {
        Ok(snapshot) => envelope(json!({
            "message": format!("{server_id} reset to healthy"),
            "server": snapshot,
        }))
        .into_response(),
        Err(e) => failure(StatusCode::NOT_FOUND, &e.to_string(), None),
    }
}

// ── Banner ─────────────────────────────────────────────────────────

/// GET /
pub async fn service_banner(State(state): State<ApiState>) -> Response {
    envelope(json!({
        "service": "pairgate",
        "version": env!("CARGO_PKG_VERSION"),
        "backends": state.registry.len(),
        "endpoints": {
            "GET /pair/{number}": "Create a session for a phone number",
            "DELETE /delete-session/{sessionId}": "Delete a session wherever it lives",
            "GET /find-session/{sessionId}": "Locate the backend owning a session",
            "GET /health": "Fleet, balancer, monitor, and index state",
            "GET /stats": "Per-backend counters and cache statistics",
            "GET /servers": "Backend list",
            "GET /total-sessions": "Fresh capacity view",
            "POST /health/check/{serverId}": "Force a probe of one backend",
            "POST /servers/reset/{serverId}": "Force a backend back to healthy",
        },
    }))
    .into_response()
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64 * 1000.0).round() / 10.0
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use pairgate_balancer::{Forwarder, RetryPolicy, Selector};
    use pairgate_client::UpstreamClient;
    use pairgate_core::GatewayConfig;
    use pairgate_health::HealthMonitor;
    use pairgate_registry::{ServerRegistry, StatusPatch};
    use tower::ServiceExt;

    fn test_state(urls: &[&str]) -> ApiState {
        let config = Arc::new(GatewayConfig::for_backends(urls.iter().copied()).unwrap());
        let client = UpstreamClient::new(Duration::from_millis(500));
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
                max_retries: 0,
                retry_delay: Duration::from_millis(10),
            },
        ));
        let monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            config.health_check_interval,
        ));
        ApiState {
            registry,
            selector,
            forwarder,
            monitor,
            config,
            started_at: now_ms(),
        }
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn call(state: ApiState, method: &str, uri: &str) -> Response {
        let router = crate::build_router(state);
        let req = HttpRequest::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        router.oneshot(req).await.unwrap()
    }

    #[tokio::test]
    async fn banner_lists_endpoints() {
        let resp = call(test_state(&["http://a:1"]), "GET", "/").await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["ok"], json!(true));
        assert!(body["timestamp"].is_u64());
        assert!(body["endpoints"].is_object());
    }

    #[tokio::test]
    async fn pair_rejects_bad_numbers() {
        let state = test_state(&["http://a:1"]);
        let resp = call(state.clone(), "GET", "/pair/12ab").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = call(state, "GET", "/pair/12345").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["ok"], json!(false));
    }

    #[tokio::test]
    async fn pair_maps_all_full_to_literal_message() {
        let state = test_state(&["http://a:1", "http://b:2"]);
        for id in ["server-1", "server-2"] {
            state
                .registry
                .update_status(id, BackendStatus::Full, StatusPatch::default())
                .unwrap();
        }

        let resp = call(state, "GET", "/pair/33612345678").await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(resp).await;
        assert_eq!(body["error"], json!("All API servers are full (25/25)"));
        assert_eq!(body["code"], json!("ALL_FULL"));
    }

    #[tokio::test]
    async fn pair_maps_all_unavailable() {
        let state = test_state(&["http://a:1"]);
        state
            .registry
            .update_status("server-1", BackendStatus::Unhealthy, StatusPatch::default())
            .unwrap();

        let resp = call(state, "GET", "/pair/33612345678").await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(resp).await;
        assert_eq!(body["code"], json!("ALL_UNAVAILABLE"));
    }

    #[tokio::test]
    async fn find_session_rejects_bad_ids() {
        let resp = call(test_state(&["http://a:1"]), "GET", "/find-session/short").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn find_session_unresolved_is_404() {
        // The only backend refuses connections, so every stage misses.
        let resp = call(
            test_state(&["http://127.0.0.1:1"]),
            "GET",
            "/find-session/sess-none00000",
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = body_json(resp).await;
        assert_eq!(body["found"], json!(false));
    }

    #[tokio::test]
    async fn delete_session_rejects_bad_ids() {
        let resp = call(
            test_state(&["http://a:1"]),
            "DELETE",
            "/delete-session/bad.id",
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_session_unresolved_is_404() {
        let resp = call(
            test_state(&["http://127.0.0.1:1"]),
            "DELETE",
            "/delete-session/sess-none00000",
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_all_sections() {
        let resp = call(test_state(&["http://a:1", "http://b:2"]), "GET", "/health").await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["ok"], json!(true));
        assert_eq!(body["summary"]["total_backends"], json!(2));
        assert_eq!(body["servers"].as_array().unwrap().len(), 2);
        assert_eq!(body["loadBalancer"]["strategy"], json!("least-loaded"));
        assert_eq!(body["healthMonitor"]["enabled"], json!(false));
        assert_eq!(body["sessionMapping"]["size"], json!(0));
    }

    #[tokio::test]
    async fn servers_lists_fleet() {
        let resp = call(test_state(&["http://a:1", "http://b:2"]), "GET", "/servers").await;
        let body = body_json(resp).await;
        assert_eq!(body["count"], json!(2));
        assert_eq!(body["servers"][0]["id"], json!("server-1"));
        assert_eq!(body["servers"][0]["isActive"], json!(true));
    }

    #[tokio::test]
    async fn stats_reports_counters_and_cache() {
        let resp = call(test_state(&["http://a:1"]), "GET", "/stats").await;
        let body = body_json(resp).await;
        assert_eq!(body["ok"], json!(true));
        assert!(body["servers"][0]["counters"]["health_checks"].is_u64());
        assert!(body["countCache"]["hits"].is_u64());
    }

    #[tokio::test]
    async fn total_sessions_degrades_instead_of_failing() {
        let state = test_state(&["http://127.0.0.1:1"]);
        state
            .registry
            .update_status(
                "server-1",
                BackendStatus::Healthy,
                StatusPatch {
                    session_count: Some(7),
                    ..StatusPatch::default()
                },
            )
            .unwrap();

        let resp = call(state, "GET", "/total-sessions").await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = body_json(resp).await;
        assert_eq!(body["summary"]["degraded"], json!(true));
        // Last-known count is used in place of the failed probe.
        assert_eq!(body["summary"]["totalSessions"], json!(7));
        assert_eq!(body["servers"][0]["stale"], json!(true));
        assert!(!body["alerts"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn force_check_unknown_backend_is_404() {
        let resp = call(test_state(&["http://a:1"]), "POST", "/health/check/server-9").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reset_unknown_backend_is_404() {
        let resp = call(test_state(&["http://a:1"]), "POST", "/servers/reset/server-9").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reset_forces_backend_healthy() {
        let state = test_state(&["http://a:1"]);
        state
            .registry
            .update_status("server-1", BackendStatus::Unhealthy, StatusPatch::error("down"))
            .unwrap();

        let resp = call(state.clone(), "POST", "/servers/reset/server-1").await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["server"]["status"], json!("healthy"));
        assert_eq!(state.registry.get("server-1").unwrap().status, BackendStatus::Healthy);
    }
}
