//! Registry calls the listing engine depends on
//!
//! The catalog, the enricher and the lazy records only see this trait, so
//! they can be driven by a [`RegistryClient`](crate::registry::RegistryClient)
//! or by an in-memory fake.

use crate::error::Result;
use crate::image::Image;
use crate::registry::operations::CatalogPage;
use async_trait::async_trait;

#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Up to `page_size` names after the cursor `last` (`""` = from the start)
    async fn catalog_page(&self, page_size: usize, last: &str) -> Result<CatalogPage>;

    /// Every tag of one repository
    async fn tags(&self, repository: &str) -> Result<Vec<String>>;

    /// Manifest and config of `repository:reference`
    async fn image(&self, repository: &str, reference: &str) -> Result<Image>;
}
