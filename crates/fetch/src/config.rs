//! Client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::error::{ApiError, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/api";
pub const DEFAULT_API_VERSION: &str = "v1";
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for [`CachedFetchClient`](crate::CachedFetchClient)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Origin plus API prefix, e.g. `https://care.example.org/api`
    pub base_url: String,

    /// Version segment appended to `base_url`; `None` for unversioned APIs
    pub api_version: Option<String>,

    /// Maximum age of a cached GET response
    pub cache_ttl: Duration,

    /// Deadline for a single request, refresh-and-retry included
    pub timeout: Duration,

    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_version: Some(DEFAULT_API_VERSION.to_string()),
            cache_ttl: DEFAULT_CACHE_TTL,
            timeout: DEFAULT_TIMEOUT,
            user_agent: format!("care-dashboard/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn with_api_version(mut self, version: Option<&str>) -> Self {
        self.api_version = version.map(str::to_string);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Turn an endpoint into a full URL.
    ///
    /// Absolute `http(s)://` endpoints are used as-is; anything else is
    /// joined as `<base_url>/<api_version>/<endpoint>`.
    pub fn resolve(&self, endpoint: &str) -> Result<Url> {
        if is_absolute(endpoint) {
            return Url::parse(endpoint)
                .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", endpoint, e)));
        }

        let mut joined = self.base_url.trim_end_matches('/').to_string();
        if let Some(version) = self
            .api_version
            .as_deref()
            .map(|v| v.trim_matches('/'))
            .filter(|v| !v.is_empty())
        {
            joined.push('/');
            joined.push_str(version);
        }

        let path = endpoint.trim_start_matches('/');
        if !path.is_empty() {
            joined.push('/');
            joined.push_str(path);
        }

        Url::parse(&joined).map_err(|e| ApiError::InvalidUrl(format!("{}: {}", joined, e)))
    }
}

fn is_absolute(endpoint: &str) -> bool {
    let lower = endpoint.get(..8).unwrap_or(endpoint).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}
