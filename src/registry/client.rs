//! Registry client facade
//!
//! [`RegistryClient`] owns one [`TokenAuthTransport`] (and so one token cache)
//! and exposes everything built on top of it: catalog listing with
//! enrichment, tags, manifests, images and blob downloads. It is cheap to
//! clone; clones share the transport.

use crate::config::{ClientConfig, ListOptions};
use crate::credentials::docker_credentials;
use crate::download::{ChunkedDownloader, LayerDownloader, verify_file_digest};
use crate::error::{RegistryError, Result};
use crate::image::{Image, ManifestService, RegistryManifests};
use crate::registry::api::RegistryApi;
use crate::registry::auth::Credential;
use crate::registry::catalog::PaginatedCatalog;
use crate::registry::enricher::{ConcurrentEnricher, RepositoryStream};
use crate::registry::operations::{CatalogPage, ManifestResponse, RegistryEndpoint};
use crate::registry::records::Repository;
use crate::registry::transport::{TokenAuthTransport, build_http_client};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

pub struct RegistryClientBuilder {
    config: ClientConfig,
    credential: Option<Credential>,
    manifests: Option<Arc<dyn ManifestService>>,
    credential_store: bool,
}

impl RegistryClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            credential: None,
            manifests: None,
            credential_store: true,
        }
    }

    /// Overrides the credential derived from the configuration
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_manifest_service(mut self, manifests: Arc<dyn ManifestService>) -> Self {
        self.manifests = Some(manifests);
        self
    }

    /// Skips the docker credential file when the configuration carries no credentials
    pub fn without_credential_store(mut self) -> Self {
        self.credential_store = false;
        self
    }

    pub fn build(self) -> Result<RegistryClient> {
        self.config.validate()?;

        let credential = match self.credential {
            Some(credential) => credential,
            None => resolve_credential(&self.config, self.credential_store)?,
        };
        let http = build_http_client(&self.config)?;
        let transport = TokenAuthTransport::new(http, credential, self.config.clock_skew());
        let endpoint = RegistryEndpoint::new(&self.config.registry, transport)?;
        let host = host_of(endpoint.base())?;
        let manifests = self
            .manifests
            .unwrap_or_else(|| Arc::new(RegistryManifests::new(endpoint.clone())));

        debug!(registry = %endpoint.base(), "registry client ready");
        Ok(RegistryClient {
            inner: Arc::new(ClientInner {
                endpoint,
                config: self.config,
                manifests,
                host,
            }),
        })
    }
}

fn resolve_credential(config: &ClientConfig, use_store: bool) -> Result<Credential> {
    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        return Ok(Credential::basic(username, password));
    }
    if let Some(auth) = &config.auth {
        return Ok(Credential::encoded(auth));
    }
    if use_store {
        if let Some((username, password)) = docker_credentials(&config.registry)? {
            return Ok(Credential::basic(username, password));
        }
    }
    Ok(Credential::Anonymous)
}

fn host_of(base: &str) -> Result<String> {
    let url = Url::parse(base)?;
    let host = url
        .host_str()
        .ok_or_else(|| RegistryError::Config(format!("registry address {} has no host", base)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

struct ClientInner {
    endpoint: RegistryEndpoint,
    config: ClientConfig,
    manifests: Arc<dyn ManifestService>,
    host: String,
}

#[derive(Clone)]
pub struct RegistryClient {
    inner: Arc<ClientInner>,
}

impl RegistryClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        RegistryClientBuilder::new(config).build()
    }

    pub fn builder(config: ClientConfig) -> RegistryClientBuilder {
        RegistryClientBuilder::new(config)
    }

    /// Builds a client and checks that the registry accepts it
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let client = Self::new(config)?;
        client.ping().await?;
        info!(registry = %client.registry_host(), "connected to registry");
        Ok(client)
    }

    pub async fn ping(&self) -> Result<()> {
        self.inner.endpoint.ping().await
    }

    /// `host[:port]` of the registry
    pub fn registry_host(&self) -> &str {
        &self.inner.host
    }

    pub fn endpoint(&self) -> &RegistryEndpoint {
        &self.inner.endpoint
    }

    pub fn transport(&self) -> &TokenAuthTransport {
        self.inner.endpoint.transport()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    fn api(&self) -> Arc<dyn RegistryApi> {
        Arc::new(self.clone())
    }

    pub fn catalog(&self) -> PaginatedCatalog {
        PaginatedCatalog::new(self.api(), self.inner.config.page_size)
    }

    pub fn enricher(&self) -> ConcurrentEnricher {
        ConcurrentEnricher::new(
            self.api(),
            self.inner.config.tag_timeout(),
            self.inner.config.max_concurrency,
        )
    }

    pub fn chunked_downloader(&self) -> ChunkedDownloader {
        ChunkedDownloader::new(self.inner.endpoint.clone(), self.inner.config.chunk)
    }

    pub async fn catalog_page(&self, page_size: usize, last: &str) -> Result<CatalogPage> {
        self.inner.endpoint.catalog_page(page_size, last).await
    }

    /// Drains [`repositories_stream`](Self::repositories_stream); the first page error is returned
    pub async fn repositories(&self, options: &ListOptions) -> Result<Vec<Repository>> {
        let repositories = self.repositories_stream(options)?.collect_all().await?;
        info!(repositories = repositories.len(), with_tags = options.with_tags, "repositories listed");
        Ok(repositories)
    }

    /// Streams repositories as they are enriched, paging and enriching concurrently
    pub fn repositories_stream(&self, options: &ListOptions) -> Result<RepositoryStream> {
        self.enricher().pipeline(&self.catalog(), options)
    }

    pub async fn tags(&self, repository: &str) -> Result<Vec<String>> {
        self.inner.endpoint.list_tags(repository).await
    }

    pub async fn manifest(&self, repository: &str, reference: &str, accept: &[&str]) -> Result<ManifestResponse> {
        self.inner.endpoint.get_manifest(repository, reference, accept).await
    }

    pub async fn blob_length(&self, repository: &str, digest: &str) -> Result<u64> {
        self.inner.endpoint.blob_length(repository, digest).await
    }

    pub async fn image(&self, repository: &str, reference: &str) -> Result<Image> {
        self.inner.manifests.image(repository, reference).await
    }

    /// Downloads one blob to `target` and checks its digest; a mismatching file is removed
    pub async fn download_blob(&self, repository: &str, digest: &str, target: &Path) -> Result<()> {
        let length = self.blob_length(repository, digest).await?;
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let blob_path = RegistryEndpoint::blob_path(repository, digest);
        self.chunked_downloader().download(&blob_path, length, target).await?;

        if let Err(err) = verify_file_digest(target, digest).await {
            warn!(digest, target = %target.display(), "removing blob that failed verification");
            let _ = tokio::fs::remove_file(target).await;
            return Err(err);
        }
        Ok(())
    }

    /// Downloads every layer of `image` to `<prefix>.<index>.<hex>.tgz`
    pub async fn download_image(&self, image: &Image, prefix: &str) -> Result<Vec<PathBuf>> {
        if let Some(parent) = Path::new(prefix).parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        LayerDownloader::new(
            self.inner.endpoint.clone(),
            self.chunked_downloader(),
            self.inner.config.max_concurrency,
        )
        .download_layers(&image.repository, image.layers(), prefix)
        .await
    }
}

#[async_trait]
impl RegistryApi for RegistryClient {
    async fn catalog_page(&self, page_size: usize, last: &str) -> Result<CatalogPage> {
        RegistryClient::catalog_page(self, page_size, last).await
    }

    async fn tags(&self, repository: &str) -> Result<Vec<String>> {
        RegistryClient::tags(self, repository).await
    }

    async fn image(&self, repository: &str, reference: &str) -> Result<Image> {
        RegistryClient::image(self, repository, reference).await
    }
}
