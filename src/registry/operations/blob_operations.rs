//! Blob operations for registry client
//!
//! Implements Docker Registry v2 blob reads:
//! - Blob length probe (HEAD /v2/{name}/blobs/{digest})
//! - Whole blob download (GET /v2/{name}/blobs/{digest})
//! - Ranged blob download (`Range: bytes=<start>-<end>`)

use super::RegistryEndpoint;
use crate::download::ByteRange;
use crate::error::{RegistryError, Result};
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::{Method, Response};
use tracing::debug;

/// Adds the `sha256:` prefix to bare hex digests
pub fn normalize_digest(digest: &str) -> String {
    if digest.contains(':') {
        digest.to_string()
    } else {
        format!("sha256:{}", digest)
    }
}

impl RegistryEndpoint {
    /// Path of a blob below the registry base, `/v2/{name}/blobs/{digest}`
    pub fn blob_path(repository: &str, digest: &str) -> String {
        format!("/v2/{}/blobs/{}", repository, normalize_digest(digest))
    }

    /// Blob size from the `Content-Length` of a HEAD request
    pub async fn blob_length(&self, repository: &str, digest: &str) -> Result<u64> {
        let url = self.url(&Self::blob_path(repository, digest))?;
        debug!(%url, "probing blob length");

        let operation = format!("blob length probe for {}", digest);
        let response = self
            .send_checked(self.request(Method::HEAD, url), &operation)
            .await?;

        // HEAD bodies are empty, so read the header rather than `content_length()`
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| RegistryError::Status {
                operation,
                status: response.status(),
                message: "response carries no Content-Length".to_string(),
            })
    }

    /// Downloads a whole blob into memory
    pub async fn get_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>> {
        let url = self.url(&Self::blob_path(repository, digest))?;
        debug!(%url, "fetching blob");

        let operation = format!("blob download for {}", digest);
        let response = self
            .send_checked(self.request(Method::GET, url), &operation)
            .await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Sends a ranged GET for `blob_path` and returns the raw response.
    ///
    /// The status is left to the caller: a registry may answer `200` with the
    /// whole blob when ranges are unsupported.
    pub async fn get_range(&self, blob_path: &str, range: &ByteRange) -> Result<Response> {
        let url = self.url(blob_path)?;
        debug!(%url, range = %range.header(), part = range.index, "fetching blob range");
        self.send(self.request(Method::GET, url).header(RANGE, range.header()))
            .await
    }
}
