//! Manifest operations for registry client

use super::RegistryEndpoint;
use crate::error::Result;
use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::debug;

/// Raw manifest as served by the registry
#[derive(Debug, Clone)]
pub struct ManifestResponse {
    pub data: Vec<u8>,
    pub content_type: String,
    /// `Docker-Content-Digest`, when the registry sends it
    pub digest: Option<String>,
}

impl RegistryEndpoint {
    /// GET /v2/{name}/manifests/{reference} accepting the given media types
    pub async fn get_manifest(
        &self,
        repository: &str,
        reference: &str,
        accept: &[&str],
    ) -> Result<ManifestResponse> {
        let url = self.url(&format!("/v2/{}/manifests/{}", repository, reference))?;
        debug!(%url, "fetching manifest");

        let operation = format!("manifest fetch for {}:{}", repository, reference);
        let request = self
            .request(Method::GET, url)
            .header(ACCEPT, accept.join(", "));
        let response = self.send_checked(request, &operation).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let digest = response
            .headers()
            .get("docker-content-digest")
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());
        let data = response.bytes().await?.to_vec();

        Ok(ManifestResponse {
            data,
            content_type,
            digest,
        })
    }
}
