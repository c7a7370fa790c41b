use std::sync::Arc;

use chrono::Utc;

use crate::db::Repository;
use crate::error::Result;
use crate::models::NewFeedItem;

use super::fetcher::FetchFeed;
use super::normalizer::normalize_entry;

/// What one `ingest` call did, for logging and for callers that want counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestReport {
    pub urls_fetched: usize,
    pub urls_failed: usize,
    pub items_inserted: usize,
}

/// Drives fetch -> normalize -> dedup-check -> persist for a batch of feed
/// URLs. One URL's failure never aborts the rest of the batch, and there is
/// no batch-level transaction: every insertion stands alone.
pub struct Ingestor {
    fetcher: Box<dyn FetchFeed>,
    repo: Arc<Repository>,
}

impl Ingestor {
    pub fn new(fetcher: Box<dyn FetchFeed>, repo: Arc<Repository>) -> Self {
        Self { fetcher, repo }
    }

    /// Ingest every URL in the batch sequentially. Re-running with the same
    /// URLs is always safe: the store keeps at most one row per
    /// (link, feed_url).
    pub async fn ingest(&self, urls: &[String]) -> IngestReport {
        let mut report = IngestReport::default();

        for url in urls {
            tracing::info!(url = %url, "fetching feed");

            match self.ingest_one(url).await {
                Ok(inserted) => {
                    report.urls_fetched += 1;
                    report.items_inserted += inserted;
                }
                Err(e) => {
                    report.urls_failed += 1;
                    tracing::warn!(url = %url, error = %e, "feed ingestion failed, skipping");
                }
            }
        }

        report
    }

    async fn ingest_one(&self, url: &str) -> Result<usize> {
        let fetched = self.fetcher.fetch(url).await?;
        let source = fetched.title.unwrap_or_default();
        let fetched_at = Utc::now();

        let mut inserted = 0;
        for entry in &fetched.entries {
            let Some(item) = normalize_entry(entry, url, &source, fetched_at) else {
                continue;
            };

            match self.store_item(item).await {
                Ok(true) => inserted += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "failed to store item, continuing");
                }
            }
        }

        Ok(inserted)
    }

    /// Existence check first, then insert-if-absent as the second line of
    /// defense: concurrent runs for users sharing a feed URL can race between
    /// the two, and the unique constraint settles it.
    async fn store_item(&self, item: NewFeedItem) -> Result<bool> {
        if self.repo.item_exists(&item.link, &item.feed_url).await? {
            return Ok(false);
        }

        self.repo.insert_item(item).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::feed::FetchFeed;
    use crate::models::{FetchedFeed, RawEntry};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    struct CannedFetcher {
        feeds: HashMap<String, FetchedFeed>,
    }

    #[async_trait]
    impl FetchFeed for CannedFetcher {
        async fn fetch(&self, url: &str) -> crate::error::Result<FetchedFeed> {
            self.feeds
                .get(url)
                .cloned()
                .ok_or_else(|| AppError::Other(anyhow::anyhow!("connection refused")))
        }
    }

    fn entry(link: &str) -> RawEntry {
        RawEntry {
            title: Some(format!("post {link}")),
            link: Some(link.to_string()),
            published: Some(Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap()),
            description: Some("<p>text</p>".to_string()),
        }
    }

    async fn setup(feeds: HashMap<String, FetchedFeed>) -> (tempfile::TempDir, Arc<Repository>, Ingestor) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let repo = Arc::new(Repository::new(path.to_str().unwrap()).await.unwrap());
        let ingestor = Ingestor::new(Box::new(CannedFetcher { feeds }), repo.clone());
        (dir, repo, ingestor)
    }

    #[tokio::test]
    async fn reingesting_the_same_feed_stores_each_link_once() {
        let url = "https://example.com/rss".to_string();
        let mut feeds = HashMap::new();
        feeds.insert(
            url.clone(),
            FetchedFeed {
                title: Some("Example".to_string()),
                entries: vec![entry("https://example.com/1"), entry("https://example.com/2")],
            },
        );
        let (_dir, repo, ingestor) = setup(feeds).await;

        let first = ingestor.ingest(std::slice::from_ref(&url)).await;
        assert_eq!(first.items_inserted, 2);

        let second = ingestor.ingest(std::slice::from_ref(&url)).await;
        assert_eq!(second.items_inserted, 0);

        assert_eq!(repo.count_items(&[url]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn new_entries_appear_on_refetch() {
        let url = "https://example.com/rss".to_string();
        let mut feeds = HashMap::new();
        feeds.insert(
            url.clone(),
            FetchedFeed {
                title: Some("Example".to_string()),
                entries: vec![entry("https://example.com/1"), entry("https://example.com/2")],
            },
        );
        let (_dir, repo, mut ingestor) = setup(feeds).await;

        ingestor.ingest(std::slice::from_ref(&url)).await;

        // The feed now carries one new entry alongside the old two.
        ingestor.fetcher = Box::new(CannedFetcher {
            feeds: HashMap::from([(
                url.clone(),
                FetchedFeed {
                    title: Some("Example".to_string()),
                    entries: vec![
                        entry("https://example.com/1"),
                        entry("https://example.com/2"),
                        entry("https://example.com/3"),
                    ],
                },
            )]),
        });

        let report = ingestor.ingest(std::slice::from_ref(&url)).await;
        assert_eq!(report.items_inserted, 1);
        assert_eq!(repo.count_items(&[url]).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn one_failing_url_does_not_abort_the_batch() {
        let good = "https://example.com/rss".to_string();
        let bad = "https://down.example.com/rss".to_string();
        let mut feeds = HashMap::new();
        feeds.insert(
            good.clone(),
            FetchedFeed {
                title: None,
                entries: vec![entry("https://example.com/1")],
            },
        );
        let (_dir, repo, ingestor) = setup(feeds).await;

        let report = ingestor.ingest(&[bad.clone(), good.clone()]).await;
        assert_eq!(report.urls_failed, 1);
        assert_eq!(report.urls_fetched, 1);
        assert_eq!(report.items_inserted, 1);

        // The failing URL left the store untouched.
        assert_eq!(repo.count_items(&[bad]).await.unwrap(), 0);
        assert_eq!(repo.count_items(&[good]).await.unwrap(), 1);
    }
}
