//! client config

use std::time::Duration;

/// Default marketplace REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://console.vast.ai/api/v0";

/// Marketplace client config.
#[derive(Debug, Clone)]
pub struct MarketplaceConfig {
    /// REST API base url, without trailing slash
    pub base_url: String,
    /// API key sent as bearer token
    pub api_key: String,
    /// HTTP request timeout for vendor calls
    pub request_timeout: Duration,
    /// interval between instance status polls while waiting for readiness
    pub poll_interval: Duration,
    /// hard deadline for an instance to become ready
    pub ready_timeout: Duration,
    /// timeout of a single application health probe
    pub health_timeout: Duration,
    /// HTTP path probed on every exposed port
    pub health_path: String,
}

impl MarketplaceConfig {
    /// create new config with default parameters.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(15),
            ready_timeout: Duration::from_secs(10 * 60),
            health_timeout: Duration::from_secs(5),
            health_path: "/health".to_string(),
        }
    }

    /// set base url.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// set request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// set readiness polling interval and deadline.
    pub fn with_readiness(mut self, poll_interval: Duration, ready_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.ready_timeout = ready_timeout;
        self
    }

    /// set health probe path and timeout.
    pub fn with_health_check(mut self, path: impl Into<String>, timeout: Duration) -> Self {
        let path = path.into();
        self.health_path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        self.health_timeout = timeout;
        self
    }
}
