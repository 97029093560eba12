//! Registry API v2 calls over the authenticating transport
//!
//! [`RegistryEndpoint`] binds a base URL to a [`TokenAuthTransport`]. Its
//! operations are split by resource the way the API is:
//! - repository operations: catalog pages, tag lists
//! - manifest operations: manifest fetch with content negotiation
//! - blob operations: length probe, whole and ranged downloads

pub mod blob_operations;
pub mod manifest_operations;
pub mod repository_operations;

pub use manifest_operations::ManifestResponse;
pub use repository_operations::CatalogPage;

use crate::error::{RegistryError, Result};
use crate::registry::transport::TokenAuthTransport;
use reqwest::header::LINK;
use reqwest::{Method, RequestBuilder, Response};
use url::Url;

#[derive(Clone)]
pub struct RegistryEndpoint {
    base: String,
    transport: TokenAuthTransport,
}

impl RegistryEndpoint {
    /// `base` is `scheme://host[:port]`; a missing scheme defaults to https
    pub fn new(base: &str, transport: TokenAuthTransport) -> Result<Self> {
        let base = normalize_base(base);
        Url::parse(&base)?;
        Ok(Self { base, transport })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn transport(&self) -> &TokenAuthTransport {
        &self.transport
    }

    /// Absolute URL for an API path such as `/v2/_catalog`
    pub fn url(&self, path: &str) -> Result<Url> {
        let separator = if path.starts_with('/') { "" } else { "/" };
        Ok(Url::parse(&format!("{}{}{}", self.base, separator, path))?)
    }

    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.transport.http().request(method, url)
    }

    /// Builds and sends through the transport (credentials, challenge, retry)
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let request = builder.build()?;
        self.transport.send(request).await
    }

    /// Sends and turns any non-success status into [`RegistryError::Status`]
    pub async fn send_checked(&self, builder: RequestBuilder, operation: &str) -> Result<Response> {
        let response = self.send(builder).await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(RegistryError::from_response(operation, response).await)
        }
    }

    /// Pings `/v2/`; succeeds only when the registry accepts our credentials
    pub async fn ping(&self) -> Result<()> {
        let url = self.url("/v2/")?;
        self.send_checked(self.request(Method::GET, url), "registry ping")
            .await
            .map(|_| ())
    }
}

pub(crate) fn normalize_base(address: &str) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.contains("://") {
        address.to_string()
    } else {
        format!("https://{}", address)
    }
}

/// Target of a `Link: <...>; rel="next"` header, resolved against `current`
pub(crate) fn next_link(response: &Response, current: &Url) -> Option<Url> {
    let header = response.headers().get(LINK)?.to_str().ok()?;
    parse_next_link(header, current)
}

fn parse_next_link(header: &str, current: &Url) -> Option<Url> {
    header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| p.trim().replace(' ', "") == "rel=\"next\"" || p.trim() == "rel=next");
        if !is_next {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        current.join(target).ok()
    })
}
