//! Environment-driven gateway configuration.

use std::time::Duration;

/// Runtime configuration for the gateway process.
///
/// Every knob is read from the environment; defaults match the documented
/// contract. Backend URLs are canonicalized (no trailing slash) at load
/// time so the rest of the system can compose target URLs by simple
/// concatenation.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Canonicalized backend origins, in configured order. The order is
    /// load-bearing: backend ids (`server-1..N`) and round-robin fairness
    /// are both positional.
    pub backend_urls: Vec<String>,
    /// Session capacity per backend before it is considered full.
    pub max_sessions_per_server: usize,
    /// Timeout applied to every outbound HTTP call.
    pub request_timeout: Duration,
    /// Interval between health-monitor sweeps.
    pub health_check_interval: Duration,
    /// Freshness window for cached per-backend session counts.
    pub session_cache_ttl: Duration,
    /// Maximum forwarding retries after the initial attempt.
    pub max_retries: u32,
    /// Base retry delay; scaled linearly by attempt number.
    pub retry_delay: Duration,
    /// Inbound listen port.
    pub port: u16,
    /// Log filter handed to the tracing subscriber.
    pub log_level: String,
}

impl GatewayConfig {
    /// Load configuration from the environment.
    ///
    /// `BACKEND_SERVERS` is required (comma-separated absolute origins);
    /// everything else falls back to the documented default.
    pub fn from_env() -> anyhow::Result<Self> {
        let raw = std::env::var("BACKEND_SERVERS")
            .map_err(|_| anyhow::anyhow!("BACKEND_SERVERS must be set (comma-separated origins)"))?;
        Self::from_env_with_backends(&raw)
    }

    /// Load environment knobs around an explicit backend list (used by
    /// CLI overrides).
    pub fn from_env_with_backends(raw: &str) -> anyhow::Result<Self> {
        let backend_urls = parse_backend_list(raw)?;

        Ok(Self {
            backend_urls,
            max_sessions_per_server: env_parse("MAX_SESSIONS_PER_SERVER", 25)?,
            request_timeout: Duration::from_millis(env_parse("REQUEST_TIMEOUT", 5_000)?),
            health_check_interval: Duration::from_millis(env_parse("HEALTH_CHECK_INTERVAL", 10_000)?),
            session_cache_ttl: Duration::from_millis(env_parse("SESSION_CACHE_TTL", 5_000)?),
            max_retries: env_parse("MAX_RETRIES", 3)?,
            retry_delay: Duration::from_millis(env_parse("RETRY_DELAY", 1_000)?),
            port: env_parse("PORT", 3_000)?,
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Build a configuration for the given fleet with default knobs.
    ///
    /// Used by tests and by CLI overrides; the URLs still go through
    /// canonicalization.
    pub fn for_backends<I, S>(urls: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let backend_urls = urls
            .into_iter()
            .map(|u| canonicalize_backend_url(u.as_ref()))
            .collect::<anyhow::Result<Vec<_>>>()?;
        anyhow::ensure!(!backend_urls.is_empty(), "at least one backend URL is required");

        Ok(Self {
            backend_urls,
            max_sessions_per_server: 25,
            request_timeout: Duration::from_millis(5_000),
            health_check_interval: Duration::from_millis(10_000),
            session_cache_ttl: Duration::from_millis(5_000),
            max_retries: 3,
            retry_delay: Duration::from_millis(1_000),
            port: 3_000,
            log_level: "info".to_string(),
        })
    }
}

/// Split and canonicalize a comma-separated backend list.
fn parse_backend_list(raw: &str) -> anyhow::Result<Vec<String>> {
    let urls = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(canonicalize_backend_url)
        .collect::<anyhow::Result<Vec<_>>>()?;
    anyhow::ensure!(!urls.is_empty(), "BACKEND_SERVERS must name at least one origin");
    Ok(urls)
}

/// Canonicalize a backend origin: scheme-checked, no trailing slash.
///
/// The fleet speaks plain HTTP inside the deployment; TLS origins are
/// rejected at load time rather than failing per-request later.
pub fn canonicalize_backend_url(raw: &str) -> anyhow::Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    anyhow::ensure!(
        trimmed.starts_with("http://"),
        "backend URL must be an absolute http:// origin: {raw}"
    );
    anyhow::ensure!(
        trimmed.len() > "http://".len(),
        "backend URL is missing a host: {raw}"
    );
    Ok(trimmed.to_string())
}

fn env_parse<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {name}={raw}: {e}")),
        Err(_) => Ok(default),
    }
}
