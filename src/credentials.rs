//! Docker credential file lookup
//!
//! Reads `$HOME/.docker/config.json`:
//!
//! ```json
//! {"auths": {"registry.example.com": {"auth": "dXNlcjpwYXNz"}}}
//! ```
//!
//! Keys may carry a scheme or path (`https://index.docker.io/v1/`); they are
//! compared by host. Docker Hub is known under several hosts, and an entry for
//! any of them applies to all.

use crate::error::{RegistryError, Result};
use crate::registry::auth::decode_basic;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

const DOCKER_HUB_HOSTS: [&str; 3] = ["docker.io", "index.docker.io", "registry-1.docker.io"];

#[derive(Debug, Default, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: HashMap<String, DockerAuth>,
}

#[derive(Debug, Default, Deserialize)]
struct DockerAuth {
    #[serde(default)]
    auth: String,
}

/// `$HOME/.docker/config.json`, when `HOME` is set
pub fn docker_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".docker").join("config.json"))
}

/// Username and password stored for `registry` in the docker credential file
pub fn docker_credentials(registry: &str) -> Result<Option<(String, String)>> {
    match docker_config_path() {
        Some(path) => credentials_from_file(&path, registry),
        None => Ok(None),
    }
}

/// Same lookup against an explicit config file; a missing file yields `None`
pub fn credentials_from_file(path: &Path, registry: &str) -> Result<Option<(String, String)>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no docker credential file");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };
    let config: DockerConfig = serde_json::from_slice(&data).map_err(|e| {
        RegistryError::Credentials(format!("invalid docker config {}: {}", path.display(), e))
    })?;

    let wanted = normalize_host(registry);
    let entry = config
        .auths
        .iter()
        .find(|(key, _)| same_registry(&normalize_host(key), &wanted));

    match entry {
        Some((key, auth)) if !auth.auth.is_empty() => {
            debug!(registry, entry = %key, "using docker credentials");
            decode_basic(&auth.auth).map(Some)
        }
        _ => Ok(None),
    }
}

/// Host (and port) of a registry address or credential-file key
fn normalize_host(address: &str) -> String {
    let address = address.trim();
    let without_scheme = address
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(address);
    without_scheme
        .split('/')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn same_registry(a: &str, b: &str) -> bool {
    a == b || (DOCKER_HUB_HOSTS.contains(&a) && DOCKER_HUB_HOSTS.contains(&b))
}
