//! Concurrent per-repository enrichment
//!
//! Names flow from the catalog through a bounded queue into a driver task.
//! The driver applies the namespace/prefix filters, waits for a semaphore
//! permit and spawns one task per repository into a `JoinSet`. Each task
//! loads the repository's tags under the tag timeout, records success or
//! failure on the record, and publishes it as soon as it is done.
//!
//! A page error is forwarded as the last item of the stream. Dropping the
//! stream aborts the page producer, the driver and every in-flight task.

use crate::config::ListOptions;
use crate::error::{RegistryError, Result};
use crate::registry::api::RegistryApi;
use crate::registry::catalog::{NAME_QUEUE, PaginatedCatalog};
use crate::registry::records::Repository;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ConcurrentEnricher {
    api: Arc<dyn RegistryApi>,
    tag_timeout: Duration,
    max_concurrency: usize,
}

impl ConcurrentEnricher {
    pub fn new(api: Arc<dyn RegistryApi>, tag_timeout: Duration, max_concurrency: usize) -> Self {
        Self {
            api,
            tag_timeout,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Enriches a known list of names
    pub fn enrich(&self, names: Vec<String>, with_tags: bool) -> RepositoryStream {
        let (name_tx, name_rx) = mpsc::channel(NAME_QUEUE);
        let feeder = tokio::spawn(async move {
            for name in names {
                if name_tx.send(Ok(name)).await.is_err() {
                    return;
                }
            }
        });

        let options = ListOptions::new().with_tags(with_tags);
        let mut stream = self.spawn_driver(name_rx, options);
        stream.handles.push(feeder.abort_handle());
        stream
    }

    /// Runs catalog paging and enrichment as one pipeline.
    ///
    /// An inverted window is rejected before any request is made.
    pub fn pipeline(&self, catalog: &PaginatedCatalog, options: &ListOptions) -> Result<RepositoryStream> {
        options.validate()?;

        let (name_tx, name_rx) = mpsc::channel(NAME_QUEUE);
        let producer = {
            let catalog = catalog.clone();
            let (start, end) = (options.start, options.end);
            tokio::spawn(async move { catalog.pump(start, end, name_tx).await })
        };

        let mut stream = self.spawn_driver(name_rx, options.clone());
        stream.handles.push(producer.abort_handle());
        Ok(stream)
    }

    fn spawn_driver(&self, names: mpsc::Receiver<Result<String>>, options: ListOptions) -> RepositoryStream {
        let (tx, rx) = mpsc::channel(self.max_concurrency.max(NAME_QUEUE));
        let driver = Driver {
            api: Arc::clone(&self.api),
            tag_timeout: self.tag_timeout,
            permits: Arc::new(Semaphore::new(self.max_concurrency)),
            options,
        };
        let handle = tokio::spawn(driver.run(names, tx));
        RepositoryStream {
            rx,
            handles: vec![handle.abort_handle()],
        }
    }
}

struct Driver {
    api: Arc<dyn RegistryApi>,
    tag_timeout: Duration,
    permits: Arc<Semaphore>,
    options: ListOptions,
}

impl Driver {
    async fn run(self, mut names: mpsc::Receiver<Result<String>>, out: mpsc::Sender<Result<Repository>>) {
        let mut tasks = JoinSet::new();

        while let Some(item) = names.recv().await {
            let name = match item {
                Ok(name) => name,
                Err(err) => {
                    tasks.shutdown().await;
                    let _ = out.send(Err(err)).await;
                    return;
                }
            };
            if !self.options.matches(&name) {
                debug!(repository = %name, "filtered out");
                continue;
            }

            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };
            let repository = Repository::new(name, Arc::clone(&self.api), self.tag_timeout);
            let with_tags = self.options.with_tags;
            let publish = out.clone();
            tasks.spawn(async move {
                let _permit = permit;
                if with_tags {
                    if let Err(err) = repository.tags().await {
                        warn!(repository = repository.name(), error = %err, "tag listing failed");
                    }
                }
                let _ = publish.send(Ok(repository)).await;
            });

            while let Some(joined) = tasks.try_join_next() {
                if let Err(err) = joined {
                    let _ = out.send(Err(RegistryError::from(err))).await;
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                let _ = out.send(Err(RegistryError::from(err))).await;
            }
        }
        debug!("enrichment finished");
    }
}

/// Repositories in completion order; a page error is the final item
pub struct RepositoryStream {
    rx: mpsc::Receiver<Result<Repository>>,
    handles: Vec<AbortHandle>,
}

impl RepositoryStream {
    pub async fn recv(&mut self) -> Option<Result<Repository>> {
        self.rx.recv().await
    }

    /// Collects every repository; the first error ends the collection
    pub async fn collect_all(mut self) -> Result<Vec<Repository>> {
        let mut repositories = Vec::new();
        while let Some(item) = self.recv().await {
            repositories.push(item?);
        }
        Ok(repositories)
    }
}

impl Stream for RepositoryStream {
    type Item = Result<Repository>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for RepositoryStream {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;
    use crate::registry::operations::CatalogPage;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeRegistry {
        repositories: Vec<String>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        fail_page: bool,
        tag_delay: Duration,
    }

    impl FakeRegistry {
        fn new(repositories: &[&str]) -> Arc<Self> {
            Arc::new(Self::with_delay(repositories, Duration::from_millis(20)))
        }

        fn with_delay(repositories: &[&str], tag_delay: Duration) -> Self {
            Self {
                repositories: repositories.iter().map(|s| s.to_string()).collect(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                fail_page: false,
                tag_delay,
            }
        }
    }

    // Decrements on drop, so cancelled calls are counted out too
    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl RegistryApi for FakeRegistry {
        async fn catalog_page(&self, _page_size: usize, last: &str) -> Result<CatalogPage> {
            if self.fail_page {
                return Err(RegistryError::Auth("catalog refused".to_string()));
            }
            if !last.is_empty() {
                return Ok(CatalogPage { names: vec![], end: true });
            }
            Ok(CatalogPage {
                names: self.repositories.clone(),
                end: true,
            })
        }

        async fn tags(&self, repository: &str) -> Result<Vec<String>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            let _in_flight = InFlight(&self.in_flight);
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.tag_delay).await;
            if repository.starts_with("broken") {
                return Err(RegistryError::Auth("denied".to_string()));
            }
            Ok(vec!["latest".to_string()])
        }

        async fn image(&self, _repository: &str, _reference: &str) -> Result<Image> {
            Err(RegistryError::Manifest("unused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failures_are_recorded_per_repository() {
        let api = FakeRegistry::new(&["app", "broken/one", "lib/tool"]);
        let enricher = ConcurrentEnricher::new(api.clone(), Duration::from_secs(5), 4);
        let names = api.repositories.clone();
        let mut repositories = enricher.enrich(names, true).collect_all().await.unwrap();
        repositories.sort_by(|a, b| a.name().cmp(b.name()));

        assert_eq!(repositories.len(), 3);
        assert_eq!(repositories[0].tag_names(), vec!["latest"]);
        assert!(repositories[1].tag_error().is_some());
        assert_eq!(repositories[2].namespace(), "lib");
        assert!(repositories[2].tag_error().is_none());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let names: Vec<String> = (0..20).map(|i| format!("repo{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let api = FakeRegistry::new(&refs);
        let enricher = ConcurrentEnricher::new(api.clone(), Duration::from_secs(5), 3);
        let repositories = enricher.enrich(names, true).collect_all().await.unwrap();
        assert_eq!(repositories.len(), 20);
        assert!(api.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_without_tags_nothing_is_loaded() {
        let api = FakeRegistry::new(&["a", "b"]);
        let enricher = ConcurrentEnricher::new(api.clone(), Duration::from_secs(5), 4);
        let repositories = enricher.enrich(vec!["a".into(), "b".into()], false).collect_all().await.unwrap();
        assert!(repositories.iter().all(|r| r.loaded_tags().is_none()));
        assert_eq!(api.peak.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pipeline_filters_and_streams() {
        let api = FakeRegistry::new(&["lib/a", "lib/b", "other/c", "top"]);
        let catalog = PaginatedCatalog::new(api.clone(), 100);
        let enricher = ConcurrentEnricher::new(api, Duration::from_secs(5), 4);

        let options = ListOptions::new().namespace("lib");
        let stream = enricher.pipeline(&catalog, &options).unwrap();
        let mut names: Vec<String> = stream
            .map(|item| item.unwrap().name().to_string())
            .collect()
            .await;
        names.sort();
        assert_eq!(names, vec!["lib/a", "lib/b"]);
    }

    #[tokio::test]
    async fn test_pipeline_forwards_page_error() {
        let api = Arc::new(FakeRegistry {
            fail_page: true,
            ..FakeRegistry::with_delay(&[], Duration::ZERO)
        });
        let catalog = PaginatedCatalog::new(api.clone(), 100);
        let enricher = ConcurrentEnricher::new(api, Duration::from_secs(5), 4);
        let stream = enricher.pipeline(&catalog, &ListOptions::new()).unwrap();
        assert!(matches!(stream.collect_all().await, Err(RegistryError::Auth(_))));
    }

    #[tokio::test]
    async fn test_pipeline_rejects_inverted_window() {
        let api = FakeRegistry::new(&["a"]);
        let catalog = PaginatedCatalog::new(api.clone(), 100);
        let enricher = ConcurrentEnricher::new(api, Duration::from_secs(5), 4);
        let result = enricher.pipeline(&catalog, &ListOptions::new().window(3, 1));
        assert!(matches!(result, Err(RegistryError::InvalidWindow { .. })));
    }

    #[tokio::test]
    async fn test_dropping_the_stream_cancels_tag_fetches() {
        let api = Arc::new(FakeRegistry::with_delay(&["a", "b", "c", "d"], Duration::from_secs(30)));
        let catalog = PaginatedCatalog::new(api.clone(), 100);
        let enricher = ConcurrentEnricher::new(api.clone(), Duration::from_secs(60), 4);
        let stream = enricher
            .pipeline(&catalog, &ListOptions::new().with_tags(true))
            .unwrap();

        let started = tokio::time::Instant::now();
        while api.in_flight.load(Ordering::SeqCst) < 4 {
            assert!(started.elapsed() < Duration::from_secs(5), "tag fetches never started");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        drop(stream);

        let dropped = tokio::time::Instant::now();
        while api.in_flight.load(Ordering::SeqCst) > 0 {
            assert!(dropped.elapsed() < Duration::from_secs(5), "tag fetches outlived the stream");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(api.peak.load(Ordering::SeqCst), 4);
    }
}
