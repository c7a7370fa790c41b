use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry as it came out of the feed parser, before normalization.
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub description: Option<String>,
}

/// A parsed feed document: its self-declared title plus its entries.
///
/// The title is captured from the same parse that produced the entries so the
/// display source name never costs a second request.
#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub title: Option<String>,
    pub entries: Vec<RawEntry>,
}

/// A normalized item ready for insertion into the store.
#[derive(Debug, Clone)]
pub struct NewFeedItem {
    pub title: String,
    pub link: String,
    /// Canonical RFC 3339 UTC string; sorts lexicographically.
    pub published_at: String,
    pub source: String,
    pub description: String,
    pub feed_url: String,
}

/// A stored item as served to readers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    #[serde(rename = "date")]
    pub published_at: String,
    pub source: String,
    pub description: String,
    #[serde(skip)]
    pub feed_url: String,
}

/// One page of items plus the numbers the pager needs.
#[derive(Debug, Clone, Serialize)]
pub struct PaginatedFeedItems {
    pub items: Vec<FeedItem>,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
    pub total_items: u64,
}
