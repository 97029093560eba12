//! Cursor-paginated repository listing
//!
//! The catalog endpoint hands out names a page at a time; the cursor for the
//! next page is the last name of the previous one. [`PaginatedCatalog`] walks
//! the pages, drops names it has already seen, and applies the `[start, end)`
//! window either to the collected list or while streaming.

use crate::error::{RegistryError, Result};
use crate::registry::api::RegistryApi;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Capacity of the queue between page fetching and its consumer
pub const NAME_QUEUE: usize = 64;

#[derive(Clone)]
pub struct PaginatedCatalog {
    api: Arc<dyn RegistryApi>,
    page_size: usize,
}

impl PaginatedCatalog {
    pub fn new(api: Arc<dyn RegistryApi>, page_size: usize) -> Self {
        Self {
            api,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Names in `[start, end)` of the catalog; `end == 0` means no upper bound
    pub async fn list(&self, start: usize, end: usize) -> Result<Vec<String>> {
        check_window(start, end)?;

        let mut pager = Pager::new(self.page_size, end);
        let mut names = Vec::new();
        while let Some(page) = pager.next_page(self.api.as_ref()).await? {
            names.extend(page);
        }

        let stop = if end == 0 { names.len() } else { end.min(names.len()) };
        let begin = start.min(stop);
        debug!(total = names.len(), begin, stop, "catalog listed");
        Ok(names.drain(begin..stop).collect())
    }

    /// Spawns a task pushing windowed names into a bounded queue.
    ///
    /// A page error arrives as the final item. The task ends early when the
    /// receiver is dropped.
    pub fn stream(&self, start: usize, end: usize) -> Result<mpsc::Receiver<Result<String>>> {
        check_window(start, end)?;
        let (tx, rx) = mpsc::channel(NAME_QUEUE);
        let catalog = self.clone();
        tokio::spawn(async move { catalog.pump(start, end, tx).await });
        Ok(rx)
    }

    /// Sends names in `[start, end)` to `tx` as each page decodes
    pub(crate) async fn pump(&self, start: usize, end: usize, tx: mpsc::Sender<Result<String>>) {
        let mut pager = Pager::new(self.page_size, end);
        let mut position = 0usize;
        loop {
            let page = match pager.next_page(self.api.as_ref()).await {
                Ok(Some(page)) => page,
                Ok(None) => return,
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    return;
                }
            };
            for name in page {
                let in_window = position >= start && (end == 0 || position < end);
                position += 1;
                if in_window && tx.send(Ok(name)).await.is_err() {
                    debug!("catalog consumer went away");
                    return;
                }
            }
        }
    }
}

fn check_window(start: usize, end: usize) -> Result<()> {
    if start > end {
        return Err(RegistryError::InvalidWindow { start, end });
    }
    Ok(())
}

/// Cursor state across catalog pages
struct Pager {
    page_size: usize,
    bound: usize,
    cursor: String,
    seen: HashSet<String>,
    total: usize,
    done: bool,
}

impl Pager {
    fn new(page_size: usize, bound: usize) -> Self {
        Self {
            page_size,
            bound,
            cursor: String::new(),
            seen: HashSet::new(),
            total: 0,
            done: false,
        }
    }

    /// Unseen names of the next page, or `None` once the listing is over
    async fn next_page(&mut self, api: &dyn RegistryApi) -> Result<Option<Vec<String>>> {
        if self.done {
            return Ok(None);
        }

        let page = api.catalog_page(self.page_size, &self.cursor).await?;
        debug!(cursor = %self.cursor, names = page.names.len(), end = page.end, "catalog page");

        match page.names.last() {
            None => self.done = true,
            // A cursor that does not move would fetch the same page forever
            Some(last) if *last == self.cursor => self.done = true,
            Some(last) => self.cursor = last.clone(),
        }
        if page.end {
            self.done = true;
        }

        let fresh: Vec<String> = page
            .names
            .into_iter()
            .filter(|name| self.seen.insert(name.clone()))
            .collect();
        self.total += fresh.len();
        if self.bound > 0 && self.total >= self.bound {
            self.done = true;
        }
        Ok(Some(fresh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;
    use crate::registry::operations::CatalogPage;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// In-memory catalog that serves `names` in sorted pages, optionally failing on one page
    struct FakeCatalog {
        names: Vec<String>,
        fail_on_page: Option<usize>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeCatalog {
        fn new(count: usize) -> Arc<Self> {
            Self::failing(count, None)
        }

        fn failing(count: usize, fail_on_page: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                names: (0..count).map(|i| format!("repo{:03}", i)).collect(),
                fail_on_page,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RegistryApi for FakeCatalog {
        async fn catalog_page(&self, page_size: usize, last: &str) -> Result<CatalogPage> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(last.to_string());
                calls.len() - 1
            };
            if self.fail_on_page == Some(call) {
                return Err(RegistryError::Auth("page refused".to_string()));
            }
            let names: Vec<String> = self
                .names
                .iter()
                .filter(|n| last.is_empty() || n.as_str() > last)
                .take(page_size)
                .cloned()
                .collect();
            let end = names.len() < page_size
                || names.last().map(String::as_str) == self.names.last().map(String::as_str);
            Ok(CatalogPage { names, end })
        }

        async fn tags(&self, _repository: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn image(&self, _repository: &str, _reference: &str) -> Result<Image> {
            Err(RegistryError::Manifest("unused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_window_returns_prefix_in_order() {
        let api = FakeCatalog::new(25);
        let catalog = PaginatedCatalog::new(api.clone(), 4);
        let names = catalog.list(0, 10).await.unwrap();
        assert_eq!(names, (0..10).map(|i| format!("repo{:03}", i)).collect::<Vec<_>>());
        // 3 pages reach 12 names, which covers the bound
        assert_eq!(api.calls(), 3);
    }

    #[tokio::test]
    async fn test_unbounded_and_clamped_windows() {
        let catalog = PaginatedCatalog::new(FakeCatalog::new(25), 10);
        assert_eq!(catalog.list(0, 0).await.unwrap().len(), 25);
        assert_eq!(catalog.list(20, 100).await.unwrap().len(), 5);
        assert!(catalog.list(30, 40).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_inverted_window_is_rejected_without_requests() {
        let api = FakeCatalog::new(25);
        let catalog = PaginatedCatalog::new(api.clone(), 10);
        let err = catalog.list(10, 5).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidWindow { start: 10, end: 5 }));
        assert!(catalog.stream(10, 5).is_err());
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test]
    async fn test_page_error_aborts_listing() {
        let catalog = PaginatedCatalog::new(FakeCatalog::failing(25, Some(1)), 10);
        assert!(matches!(catalog.list(0, 0).await, Err(RegistryError::Auth(_))));

        let catalog = PaginatedCatalog::new(FakeCatalog::failing(25, Some(1)), 10);
        let mut rx = catalog.stream(0, 0).unwrap();
        let mut received = Vec::new();
        while let Some(item) = rx.recv().await {
            received.push(item);
        }
        assert_eq!(received.iter().filter(|r| r.is_ok()).count(), 10);
        assert!(matches!(received.last(), Some(Err(RegistryError::Auth(_)))));
    }

    #[tokio::test]
    async fn test_stream_applies_window() {
        let catalog = PaginatedCatalog::new(FakeCatalog::new(25), 7);
        let mut rx = catalog.stream(5, 12).unwrap();
        let mut names = Vec::new();
        while let Some(item) = rx.recv().await {
            names.push(item.unwrap());
        }
        assert_eq!(names, (5..12).map(|i| format!("repo{:03}", i)).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_duplicates_across_pages_are_dropped() {
        struct Overlapping;

        #[async_trait]
        impl RegistryApi for Overlapping {
            async fn catalog_page(&self, _page_size: usize, last: &str) -> Result<CatalogPage> {
                let names = match last {
                    "" => vec!["a", "b", "c"],
                    "c" => vec!["c", "d", "e"],
                    _ => vec![],
                };
                Ok(CatalogPage {
                    names: names.into_iter().map(String::from).collect(),
                    end: false,
                })
            }
            async fn tags(&self, _repository: &str) -> Result<Vec<String>> {
                Ok(Vec::new())
            }
            async fn image(&self, _repository: &str, _reference: &str) -> Result<Image> {
                Err(RegistryError::Manifest("unused".to_string()))
            }
        }

        let catalog = PaginatedCatalog::new(Arc::new(Overlapping), 3);
        assert_eq!(catalog.list(0, 0).await.unwrap(), vec!["a", "b", "c", "d", "e"]);
    }
}
