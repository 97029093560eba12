//! Client configuration and listing options

use crate::download::ChunkPolicy;
use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Everything a [`RegistryClient`](crate::registry::RegistryClient) needs to talk to one registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Registry address, with or without scheme (`registry.example.com:5000`)
    pub registry: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Pre-encoded basic credential (`base64(user:pass)`), used when username/password are absent
    pub auth: Option<String>,
    pub skip_tls: bool,
    /// Per-request timeout in seconds
    pub timeout: u64,
    /// Catalog page size (`n=` parameter)
    pub page_size: usize,
    /// Bound on each tag listing made during enrichment, in seconds
    pub tag_timeout: u64,
    /// Tolerance subtracted from token lifetimes, in seconds
    pub clock_skew: u64,
    /// Maximum number of repositories enriched at once
    pub max_concurrency: usize,
    pub chunk: ChunkPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            registry: String::new(),
            username: None,
            password: None,
            auth: None,
            skip_tls: false,
            timeout: 60,
            page_size: 100,
            tag_timeout: 5,
            clock_skew: 10,
            max_concurrency: 16,
            chunk: ChunkPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(registry: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            ..Self::default()
        }
    }

    /// Reads `REGISTRY_ADDRESS`, `REGISTRY_USERNAME`, `REGISTRY_PASSWORD`, `SKIP_TLS` and `CHUNK_SIZE`
    pub fn from_env() -> Result<Self> {
        let registry = env::var("REGISTRY_ADDRESS")
            .map_err(|_| RegistryError::Config("REGISTRY_ADDRESS not set".to_string()))?;
        let mut config = Self::new(registry);
        config.username = env::var("REGISTRY_USERNAME").ok();
        config.password = env::var("REGISTRY_PASSWORD").ok();
        config.skip_tls = env::var("SKIP_TLS").is_ok_and(|v| v == "true" || v == "1");
        if let Ok(size) = env::var("CHUNK_SIZE") {
            config.chunk.size_floor = size
                .parse()
                .map_err(|_| RegistryError::Config(format!("invalid CHUNK_SIZE: {}", size)))?;
        }
        Ok(config)
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    pub fn with_skip_tls(mut self, skip_tls: bool) -> Self {
        self.skip_tls = skip_tls;
        self
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_tag_timeout(mut self, seconds: u64) -> Self {
        self.tag_timeout = seconds;
        self
    }

    pub fn with_clock_skew(mut self, seconds: u64) -> Self {
        self.clock_skew = seconds;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_chunk_policy(mut self, chunk: ChunkPolicy) -> Self {
        self.chunk = chunk;
        self
    }

    pub fn has_credentials(&self) -> bool {
        (self.username.is_some() && self.password.is_some()) || self.auth.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.registry.trim().is_empty() {
            return Err(RegistryError::Config("registry address cannot be empty".to_string()));
        }
        if self.page_size == 0 {
            return Err(RegistryError::Config("page size must be positive".to_string()));
        }
        if self.max_concurrency == 0 {
            return Err(RegistryError::Config("max concurrency must be positive".to_string()));
        }
        self.chunk.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn tag_timeout(&self) -> Duration {
        Duration::from_secs(self.tag_timeout)
    }

    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew)
    }
}

/// Options for repository listing
///
/// `start`/`end` select the window `[start, end)` of the full catalog; `end == 0` lists everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListOptions {
    pub with_tags: bool,
    pub start: usize,
    pub end: usize,
    /// Keep only repositories in this namespace (the part before the last `/`)
    pub namespace: Option<String>,
    /// Keep only repositories whose name starts with this prefix
    pub prefix: Option<String>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags(mut self, with_tags: bool) -> Self {
        self.with_tags = with_tags;
        self
    }

    pub fn window(mut self, start: usize, end: usize) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.start > self.end {
            return Err(RegistryError::InvalidWindow {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    /// Applies the namespace/prefix filters to one repository name
    pub fn matches(&self, name: &str) -> bool {
        if let Some(prefix) = &self.prefix {
            if !name.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(namespace) = &self.namespace {
            if crate::registry::records::namespace_of(name) != namespace {
                return false;
            }
        }
        true
    }
}
