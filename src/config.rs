//! Typed configuration for the cloud upload buffer (§6).

use crate::error::CacheError;
use std::time::Duration;

/// Cloud endpoint the worker uploads batches to.
#[derive(Clone, Debug)]
pub struct EndpointConfig {
    pub url: String,
    pub auth_token: String,
}

/// Fully resolved configuration for an [`crate::Orchestrator`].
///
/// Construct via [`CacheConfigBuilder`], or [`CacheConfig::from_env`] for the
/// CLI binary.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub redis_url: String,
    pub endpoint: Option<EndpointConfig>,
    pub batch_size: usize,
    pub upload_splay: u64,
    pub max_retry: u32,
    pub retry_queue_limit: usize,
    pub fail_ttl: u64,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            endpoint: None,
            batch_size: 100,
            upload_splay: 10,
            max_retry: 10,
            retry_queue_limit: 10,
            fail_ttl: 604_800,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl CacheConfig {
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::new()
    }

    /// Load configuration from environment variables, falling back to
    /// [`CacheConfig::default`] values where unset.
    ///
    /// Recognized variables: `CACHE_REDIS_URL`, `CACHE_ENDPOINT_URL`,
    /// `CACHE_ENDPOINT_AUTH_TOKEN`, `CACHE_BATCH_SIZE`, `CACHE_UPLOAD_SPLAY`,
    /// `CACHE_MAX_RETRY`, `CACHE_RETRY_QUEUE_LIMIT`, `CACHE_FAIL_TTL`.
    pub fn from_env() -> Result<Self, CacheError> {
        let mut builder = CacheConfigBuilder::new();

        if let Ok(url) = std::env::var("CACHE_REDIS_URL") {
            builder = builder.redis_url(url);
        }
        if let (Ok(url), Ok(token)) = (
            std::env::var("CACHE_ENDPOINT_URL"),
            std::env::var("CACHE_ENDPOINT_AUTH_TOKEN"),
        ) {
            builder = builder.endpoint(url, token);
        }
        if let Some(v) = parse_env("CACHE_BATCH_SIZE")? {
            builder = builder.batch_size(v);
        }
        if let Some(v) = parse_env("CACHE_UPLOAD_SPLAY")? {
            builder = builder.upload_splay(v);
        }
        if let Some(v) = parse_env("CACHE_MAX_RETRY")? {
            builder = builder.max_retry(v);
        }
        if let Some(v) = parse_env("CACHE_RETRY_QUEUE_LIMIT")? {
            builder = builder.retry_queue_limit(v);
        }
        if let Some(v) = parse_env("CACHE_FAIL_TTL")? {
            builder = builder.fail_ttl(v);
        }

        builder.build()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>, CacheError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| CacheError::Config(format!("{name} is not a valid value: {raw}"))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => {
            Err(CacheError::Config(format!("{name} is not valid unicode")))
        }
    }
}

/// Builder for [`CacheConfig`].
#[must_use = "builders do nothing unless you call .build()"]
pub struct CacheConfigBuilder {
    inner: CacheConfig,
}

impl CacheConfigBuilder {
    pub fn new() -> Self {
        Self {
            inner: CacheConfig::default(),
        }
    }

    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.inner.redis_url = url.into();
        self
    }

    pub fn endpoint(mut self, url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        self.inner.endpoint = Some(EndpointConfig {
            url: url.into(),
            auth_token: auth_token.into(),
        });
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.inner.batch_size = batch_size;
        self
    }

    pub fn upload_splay(mut self, upload_splay: u64) -> Self {
        self.inner.upload_splay = upload_splay;
        self
    }

    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.inner.max_retry = max_retry;
        self
    }

    pub fn retry_queue_limit(mut self, retry_queue_limit: usize) -> Self {
        self.inner.retry_queue_limit = retry_queue_limit;
        self
    }

    pub fn fail_ttl(mut self, fail_ttl: u64) -> Self {
        self.inner.fail_ttl = fail_ttl;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.inner.request_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.inner.connect_timeout = timeout;
        self
    }

    /// Validate and produce the final config.
    ///
    /// Requires `endpoint` to have been set — `endpoint.url` and
    /// `endpoint.auth_token` are required per §6.
    pub fn build(self) -> Result<CacheConfig, CacheError> {
        if self.inner.endpoint.is_none() {
            return Err(CacheError::Config(
                "endpoint.url and endpoint.auth_token are required".to_string(),
            ));
        }
        if self.inner.batch_size == 0 {
            return Err(CacheError::Config("batch_size must be >= 1".to_string()));
        }
        Ok(self.inner)
    }
}

impl Default for CacheConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
