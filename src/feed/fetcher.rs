use std::time::Duration;

use async_trait::async_trait;
use feed_rs::parser;
use reqwest::Client;

use crate::error::Result;
use crate::models::{FetchedFeed, RawEntry};

/// Fetch seam for the ingestion pipeline. The orchestrator only sees this
/// trait, so tests can drive it with canned feeds.
#[async_trait]
pub trait FetchFeed: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedFeed>;
}

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("feedspool/1.0")
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }
}

#[async_trait]
impl FetchFeed for FeedFetcher {
    /// Retrieve one feed document and parse it as RSS or Atom. The feed's
    /// self-declared title rides along in the result, so the caller never
    /// needs a second request to learn it.
    async fn fetch(&self, url: &str) -> Result<FetchedFeed> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
        }

        let bytes = response.bytes().await?;
        let feed = parser::parse(&bytes[..])?;

        let title = feed.title.map(|t| t.content);

        let entries: Vec<RawEntry> = feed
            .entries
            .into_iter()
            .map(|entry| {
                // Prefer the summary as the description, fall back to content
                let description = entry
                    .summary
                    .map(|s| s.content)
                    .or_else(|| entry.content.and_then(|c| c.body));

                RawEntry {
                    title: entry.title.map(|t| t.content),
                    link: entry.links.first().map(|l| l.href.clone()),
                    published: entry.published.or(entry.updated),
                    description,
                }
            })
            .collect();

        Ok(FetchedFeed { title, entries })
    }
}

impl Default for FeedFetcher {
    fn default() -> Self {
        Self::new()
    }
}
