//! Repository operations for registry client
//!
//! Implements Docker Registry v2 repository-level operations:
//! - Catalog paging (GET /v2/_catalog?n=<n>&last=<cursor>)
//! - Tag listing (GET /v2/{name}/tags/list), following `Link` pages

use super::{RegistryEndpoint, next_link};
use crate::error::Result;
use reqwest::Method;
use serde::Deserialize;
use tracing::debug;

/// One page of the repository catalog
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogPage {
    pub names: Vec<String>,
    /// No further pages follow this one
    pub end: bool,
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    repositories: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TagListResponse {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

impl RegistryEndpoint {
    /// Fetches up to `page_size` repository names after `last` (`""` = from the start).
    ///
    /// The page is the last one when it is short or carries no `Link: rel="next"`.
    pub async fn catalog_page(&self, page_size: usize, last: &str) -> Result<CatalogPage> {
        let mut url = self.url("/v2/_catalog")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("n", &page_size.to_string());
            if !last.is_empty() {
                query.append_pair("last", last);
            }
        }

        debug!(%url, "fetching catalog page");
        let response = self
            .send_checked(self.request(Method::GET, url.clone()), "catalog listing")
            .await?;
        let has_next = next_link(&response, &url).is_some();
        let body = response.bytes().await?;
        let page: CatalogResponse = serde_json::from_slice(&body)?;
        let names = page.repositories.unwrap_or_default();

        let end = !has_next || names.len() < page_size;
        Ok(CatalogPage { names, end })
    }

    /// Lists every tag of `repository`
    pub async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let mut url = self.url(&format!("/v2/{}/tags/list", repository))?;
        let mut tags = Vec::new();
        loop {
            debug!(%url, "fetching tag page");
            let operation = format!("tag listing for {}", repository);
            let response = self
                .send_checked(self.request(Method::GET, url.clone()), &operation)
                .await?;
            let next = next_link(&response, &url);
            let body = response.bytes().await?;
            let page: TagListResponse = serde_json::from_slice(&body)?;
            tags.extend(page.tags.unwrap_or_default());

            match next {
                Some(next) if next != url => url = next,
                _ => break,
            }
        }
        Ok(tags)
    }
}
