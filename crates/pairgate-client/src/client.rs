//! One-shot HTTP/1.1 client for backend origins.
//!
//! Each call opens a fresh connection, performs the exchange under a
//! hard timeout, and buffers the response body. The fleet is small and
//! the call rate modest, so per-call connections keep failure handling
//! simple: a broken backend fails the connect, not a pooled stream.

use std::time::{Duration, Instant};

use bytes::Bytes;
use http::header::{
    ACCEPT, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING, USER_AGENT,
};
use http::{HeaderMap, Method, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::{FetchError, TransportError};
use crate::payload::SessionListing;

const CLIENT_USER_AGENT: &str = concat!("pairgate/", env!("CARGO_PKG_VERSION"));

/// An inbound request captured for forwarding: method, origin-form path,
/// headers, buffered body, and the caller's address when known.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: Option<String>,
}

impl ProxyRequest {
    /// A bare GET for the given path, no inherited headers.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            client_ip: None,
        }
    }
}

/// A buffered upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Wall-clock duration of the exchange, in milliseconds.
    pub elapsed_ms: u64,
}

/// Outbound HTTP client with a fixed per-request timeout.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Perform one HTTP exchange against an absolute `http://` URL.
    ///
    /// Every HTTP status is a successful return; only transport failures
    /// error. Hop-by-hop headers in `headers` are dropped and replaced.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<UpstreamResponse, TransportError> {
        let started = Instant::now();
        let exchange = self.exchange(method, url, headers, body);
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result.map(|(status, headers, body)| UpstreamResponse {
                status,
                headers,
                body,
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
            Err(_) => Err(TransportError::timed_out(url)),
        }
    }

    async fn exchange(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<(StatusCode, HeaderMap, Bytes), TransportError> {
        let uri: Uri = url
            .parse()
            .map_err(|e| TransportError::other(format!("invalid upstream URL {url}: {e}")))?;
        let host = uri
            .host()
            .ok_or_else(|| TransportError::other(format!("upstream URL has no host: {url}")))?;
        let authority = format!("{host}:{}", uri.port_u16().unwrap_or(80));
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let stream = TcpStream::connect(&authority)
            .await
            .map_err(|e| TransportError::from_io(url, &e))?;
        let io = TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake::<_, Full<Bytes>>(io)
            .await
            .map_err(|e| TransportError::from_hyper(url, &e))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "upstream connection closed with error");
            }
        });

        let mut req = http::Request::builder()
            .method(method)
            .uri(path)
            .body(Full::new(body))
            .map_err(|e| TransportError::other(format!("failed to build request for {url}: {e}")))?;
        for (name, value) in headers.iter() {
            // Hop-by-hop and framing headers are ours to set.
            if name == HOST || name == CONTENT_LENGTH || name == CONNECTION || name == TRANSFER_ENCODING
            {
                continue;
            }
            req.headers_mut().append(name.clone(), value.clone());
        }
        let host_value = authority
            .parse()
            .map_err(|_| TransportError::other(format!("invalid authority for {url}")))?;
        req.headers_mut().insert(HOST, host_value);

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| TransportError::from_hyper(url, &e))?;
        let (parts, incoming) = resp.into_parts();
        let collected = incoming
            .collect()
            .await
            .map_err(|e| TransportError::from_hyper(url, &e))?
            .to_bytes();

        Ok((parts.status, parts.headers, collected))
    }

    /// Fetch and decode `GET <base_url>/sessions`.
    ///
    /// Returns the listing and the exchange duration in milliseconds.
    pub async fn fetch_sessions(
        &self,
        base_url: &str,
    ) -> Result<(SessionListing, u64), FetchError> {
        let url = format!("{base_url}/sessions");
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, "application/json".parse().expect("static header"));
        headers.insert(USER_AGENT, CLIENT_USER_AGENT.parse().expect("static header"));

        let resp = self
            .request(Method::GET, &url, headers, Bytes::new())
            .await?;
        if resp.status != StatusCode::OK {
            return Err(FetchError::Status {
                url,
                status: resp.status.as_u16(),
            });
        }

        let listing = serde_json::from_slice(&resp.body).map_err(|e| FetchError::Decode {
            url,
            message: e.to_string(),
        })?;
        Ok((listing, resp.elapsed_ms))
    }

    /// Issue `POST <base_url>/logout/<session_id>` with an empty JSON body.
    ///
    /// The raw response is returned for the caller to inspect; a 404 is
    /// a meaningful answer here, not an error.
    pub async fn logout(
        &self,
        base_url: &str,
        session_id: &str,
    ) -> Result<UpstreamResponse, TransportError> {
        let url = format!("{base_url}/logout/{session_id}");
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, "application/json".parse().expect("static header"));
        headers.insert(CONTENT_TYPE, "application/json".parse().expect("static header"));
        headers.insert(USER_AGENT, CLIENT_USER_AGENT.parse().expect("static header"));

        self.request(Method::POST, &url, headers, Bytes::from_static(b"{}"))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_to_closed_port_is_refused() {
        let client = UpstreamClient::new(Duration::from_millis(500));
        // Port 1 is never listening.
        let err = client
            .request(Method::GET, "http://127.0.0.1:1/sessions", HeaderMap::new(), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::TransportKind::Refused);
    }

    #[tokio::test]
    async fn invalid_url_is_other() {
        let client = UpstreamClient::new(Duration::from_millis(500));
        let err = client
            .request(Method::GET, "not a url", HeaderMap::new(), Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::TransportKind::Other);
    }

    #[tokio::test]
    async fn fetch_sessions_propagates_refused_connect() {
        let client = UpstreamClient::new(Duration::from_millis(500));
        let err = client.fetch_sessions("http://127.0.0.1:1").await.unwrap_err();
        match err {
            FetchError::Transport(t) => assert_eq!(t.kind, crate::TransportKind::Refused),
            other => panic!("expected transport error, got {other:?}"),
        }
    }

    #[test]
    fn proxy_request_get_is_bare() {
        let req = ProxyRequest::get("/sessions");
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.path, "/sessions");
        assert!(req.body.is_empty());
        assert!(req.client_ip.is_none());
    }
}
