//! Request forwarding with retry and failover.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use http::header::{ACCEPT, CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue};
use pairgate_client::{ProxyRequest, UpstreamClient, UpstreamResponse};
use pairgate_registry::{BackendStatus, ServerRegistry, StatusPatch};
use regex::Regex;
use tracing::{debug, warn};

use crate::error::ForwardError;
use crate::selector::{SelectedBackend, Selector};

const GATEWAY_USER_AGENT: &str = concat!("pairgate/", env!("CARGO_PKG_VERSION"));

/// Retry knobs for transport failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Base delay; attempt `n` waits `retry_delay × (n+1)`.
    pub retry_delay: Duration,
}

/// A forwarded response plus the backend that served it.
#[derive(Debug, Clone)]
pub struct ForwardedResponse {
    pub backend_id: String,
    pub response: UpstreamResponse,
}

/// Forwards inbound requests to a selected backend, retrying transport
/// failures against re-selected backends.
pub struct Forwarder {
    selector: Arc<Selector>,
    registry: Arc<ServerRegistry>,
    client: UpstreamClient,
    retry: RetryPolicy,
}

impl Forwarder {
    pub fn new(
        selector: Arc<Selector>,
        registry: Arc<ServerRegistry>,
        client: UpstreamClient,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            selector,
            registry,
            client,
            retry,
        }
    }

    /// Forward a request to the optimal backend.
    ///
    /// Any HTTP status from upstream is a success. On transport failure
    /// the offending backend is marked unhealthy (refused, timeout,
    /// aborted), the attempt backs off linearly, and a fresh selection
    /// is made — up to `max_retries` retries. A failed re-selection
    /// surfaces the original transport error, not the selection error.
    pub async fn forward(&self, request: &ProxyRequest) -> Result<ForwardedResponse, ForwardError> {
        let mut backend = self.selector.select_optimal_backend().await?;
        let mut attempt: u32 = 0;

        loop {
            let target = self.target_url(&backend, &request.path);
            let headers = self.build_headers(request, &backend.id);
            debug!(backend = %backend.id, target = %target, attempt, "forwarding request");

            let err = match self
                .client
                .request(request.method.clone(), &target, headers, request.body.clone())
                .await
            {
                Ok(response) => {
                    return Ok(ForwardedResponse {
                        backend_id: backend.id,
                        response,
                    });
                }
                Err(err) => err,
            };

            warn!(backend = %backend.id, error = %err, attempt, "forward attempt failed");
            if err.kind.marks_backend_unhealthy() {
                let _ = self.registry.update_status(
                    &backend.id,
                    BackendStatus::Unhealthy,
                    StatusPatch::error(err.to_string()),
                );
            }

            if attempt >= self.retry.max_retries {
                return Err(ForwardError::Transport(err));
            }

            tokio::time::sleep(self.retry.retry_delay * (attempt + 1)).await;
            backend = match self.selector.select_optimal_backend().await {
                Ok(next) => next,
                Err(select_err) => {
                    debug!(error = %select_err, "re-selection failed, surfacing transport error");
                    return Err(ForwardError::Transport(err));
                }
            };
            attempt += 1;
        }
    }

    /// Compose the upstream URL, applying the pair-path rewrite the
    /// upstream expects.
    fn target_url(&self, backend: &SelectedBackend, path: &str) -> String {
        let trailing = self.registry.pair_trailing_slash(&backend.id);
        format!("{}{}", backend.url, rewrite_pair_path(path, trailing))
    }

    /// Copy the inbound headers and overlay the proxy set.
    fn build_headers(&self, request: &ProxyRequest, backend_id: &str) -> HeaderMap {
        let mut headers = request.headers.clone();

        if let Some(ip) = &request.client_ip {
            let forwarded = match headers.get(x_forwarded_for()) {
                Some(existing) => match existing.to_str() {
                    Ok(prior) => format!("{prior}, {ip}"),
                    Err(_) => ip.clone(),
                },
                None => ip.clone(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded) {
                headers.insert(x_forwarded_for(), value);
            }
        }

        if let Ok(value) = HeaderValue::from_str(backend_id) {
            headers.insert(HeaderName::from_static("x-proxy-server"), value);
        }
        if let Ok(value) = HeaderValue::from_str(&now_ms().to_string()) {
            headers.insert(HeaderName::from_static("x-proxy-timestamp"), value);
        }
        headers.insert(USER_AGENT, HeaderValue::from_static(GATEWAY_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if !request.body.is_empty() {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        headers
    }
}

fn x_forwarded_for() -> HeaderName {
    HeaderName::from_static("x-forwarded-for")
}

/// Append the trailing slash on exact `/pair/<segment>` paths.
///
/// The upstream pair endpoint lives at `/pair/<n>/`; nothing else is
/// rewritten.
fn rewrite_pair_path(path: &str, trailing_slash: bool) -> String {
    static PAIR_PATH: OnceLock<Regex> = OnceLock::new();
    let pattern = PAIR_PATH.get_or_init(|| Regex::new(r"^/pair/[^/]+$").expect("pair path pattern"));

    if trailing_slash && pattern.is_match(path) {
        format!("{path}/")
    } else {
        path.to_string()
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
