//! Repository and tag records with memoized lazy fields
//!
//! A record loads its tags (or image) on first access and keeps whatever came
//! back, success or failure, for its whole lifetime. Clones share the loaded
//! value. Enrichment fills the tag cell ahead of time so callers never wait.

use crate::error::{RegistryError, Result};
use crate::image::Image;
use crate::registry::api::RegistryApi;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

/// Error stored on a record; shared because every clone reports the same failure
pub type SharedError = Arc<RegistryError>;

type TagsCell = OnceCell<std::result::Result<Vec<Tag>, SharedError>>;
type ImageCell = OnceCell<std::result::Result<Image, SharedError>>;

/// Namespace of a repository name: everything before the last `/`, or `""`
pub fn namespace_of(name: &str) -> &str {
    name.rsplit_once('/').map(|(namespace, _)| namespace).unwrap_or("")
}

#[derive(Clone)]
pub struct Repository {
    name: String,
    namespace: String,
    tags: Arc<TagsCell>,
    api: Arc<dyn RegistryApi>,
    tag_timeout: Duration,
}

impl Repository {
    pub fn new(name: impl Into<String>, api: Arc<dyn RegistryApi>, tag_timeout: Duration) -> Self {
        let name = name.into();
        Self {
            namespace: namespace_of(&name).to_string(),
            name,
            tags: Arc::new(OnceCell::new()),
            api,
            tag_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Tags of this repository, fetched on the first call under the tag timeout
    pub async fn tags(&self) -> std::result::Result<&[Tag], SharedError> {
        let loaded = self
            .tags
            .get_or_init(|| async { self.fetch_tags().await.map_err(Arc::new) })
            .await;
        loaded.as_deref().map_err(Arc::clone)
    }

    /// Tags if they have already been loaded successfully
    pub fn loaded_tags(&self) -> Option<&[Tag]> {
        self.tags.get().and_then(|loaded| loaded.as_deref().ok())
    }

    /// Failure recorded by the tag load, if it happened and failed
    pub fn tag_error(&self) -> Option<&SharedError> {
        self.tags.get().and_then(|loaded| loaded.as_ref().err())
    }

    /// Names of loaded tags, empty when none were loaded
    pub fn tag_names(&self) -> Vec<&str> {
        self.loaded_tags()
            .map(|tags| tags.iter().map(Tag::name).collect())
            .unwrap_or_default()
    }

    async fn fetch_tags(&self) -> Result<Vec<Tag>> {
        let names = tokio::time::timeout(self.tag_timeout, self.api.tags(&self.name))
            .await
            .map_err(|_| RegistryError::Timeout {
                operation: format!("tag listing for {}", self.name),
                seconds: self.tag_timeout.as_secs(),
            })??;
        Ok(names
            .into_iter()
            .map(|tag| Tag::new(&self.name, tag, Arc::clone(&self.api)))
            .collect())
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("tags", &self.tags.get())
            .finish()
    }
}

#[derive(Clone)]
pub struct Tag {
    name: String,
    full_name: String,
    repo_name: String,
    image: Arc<ImageCell>,
    api: Arc<dyn RegistryApi>,
}

impl Tag {
    pub fn new(repo_name: &str, name: impl Into<String>, api: Arc<dyn RegistryApi>) -> Self {
        let name = name.into();
        Self {
            full_name: format!("{}:{}", repo_name, name),
            repo_name: repo_name.to_string(),
            name,
            image: Arc::new(OnceCell::new()),
            api,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `<repository>:<tag>`
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn repo_name(&self) -> &str {
        &self.repo_name
    }

    /// Image behind this tag, fetched once
    pub async fn image(&self) -> std::result::Result<&Image, SharedError> {
        let loaded = self
            .image
            .get_or_init(|| async {
                self.api
                    .image(&self.repo_name, &self.name)
                    .await
                    .map_err(Arc::new)
            })
            .await;
        loaded.as_ref().map_err(Arc::clone)
    }

    pub fn image_error(&self) -> Option<&SharedError> {
        self.image.get().and_then(|loaded| loaded.as_ref().err())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tag")
            .field("full_name", &self.full_name)
            .field("image_loaded", &self.image.initialized())
            .finish()
    }
}
