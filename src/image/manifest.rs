//! Manifest fetching and parsing
//!
//! [`ManifestService`] turns `repository + reference` into an [`Image`].
//! [`RegistryManifests`] is the default implementation: it asks the registry
//! for a docker schema-2 or OCI manifest, then fetches the config blob it
//! names. Manifest lists and OCI indexes are rejected; pick a platform
//! manifest by digest instead.

use super::{Image, ImageConfig, Manifest};
use crate::error::{RegistryError, Result};
use crate::registry::operations::{ManifestResponse, RegistryEndpoint};
use async_trait::async_trait;
use tracing::debug;

pub const MEDIA_TYPE_DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const MEDIA_TYPE_DOCKER_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// Media types sent in `Accept` when asking for an image manifest
pub const ACCEPTED_MANIFESTS: [&str; 2] = [MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_OCI_MANIFEST];

#[async_trait]
pub trait ManifestService: Send + Sync {
    async fn image(&self, repository: &str, reference: &str) -> Result<Image>;
}

pub struct RegistryManifests {
    endpoint: RegistryEndpoint,
}

impl RegistryManifests {
    pub fn new(endpoint: RegistryEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl ManifestService for RegistryManifests {
    async fn image(&self, repository: &str, reference: &str) -> Result<Image> {
        let response = self
            .endpoint
            .get_manifest(repository, reference, &ACCEPTED_MANIFESTS)
            .await?;
        let digest = response.digest.clone();
        let manifest = parse_manifest(&response)?;

        debug!(
            repository,
            reference,
            layers = manifest.layers.len(),
            "fetching image config {}",
            manifest.config.digest
        );
        let config_blob = self
            .endpoint
            .get_blob(repository, &manifest.config.digest)
            .await?;
        let config: ImageConfig = serde_json::from_slice(&config_blob)?;

        Ok(Image {
            repository: repository.to_string(),
            reference: reference.to_string(),
            digest,
            manifest,
            config,
        })
    }
}

/// Parses a single-platform manifest, rejecting lists, indexes and schema 1
pub fn parse_manifest(response: &ManifestResponse) -> Result<Manifest> {
    let content_type = response
        .content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim();
    if content_type == MEDIA_TYPE_DOCKER_LIST || content_type == MEDIA_TYPE_OCI_INDEX {
        return Err(RegistryError::Manifest(format!(
            "{} is a multi-platform index; request a platform manifest by digest",
            content_type
        )));
    }

    let value: serde_json::Value = serde_json::from_slice(&response.data)?;
    if value.get("manifests").is_some() {
        return Err(RegistryError::Manifest(
            "manifest is a multi-platform index; request a platform manifest by digest".to_string(),
        ));
    }
    let manifest: Manifest = serde_json::from_value(value)
        .map_err(|e| RegistryError::Manifest(format!("unsupported manifest: {}", e)))?;
    if manifest.schema_version != 2 {
        return Err(RegistryError::Manifest(format!(
            "unsupported schema version {}",
            manifest.schema_version
        )));
    }
    Ok(manifest)
}
