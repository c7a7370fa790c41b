use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Days, Local, TimeZone, Utc};

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::feed::format_timestamp;
use crate::models::{FeedItem, PaginatedFeedItems, Subscription};

pub const DEFAULT_PER_PAGE: u32 = 100;

/// Validated pagination parameters. Raw query values go through `clamped`
/// exactly once, at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Pagination {
    /// page < 1 becomes 1; per_page < 1 becomes the default. No upper bound
    /// here; the token API enforces its own cap separately.
    pub fn clamped(page: i64, per_page: i64) -> Self {
        Self {
            page: if page < 1 { 1 } else { page as u32 },
            per_page: if per_page < 1 {
                DEFAULT_PER_PAGE
            } else {
                per_page as u32
            },
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.per_page as u64
    }
}

/// A named day window for the token API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Today,
    Yesterday,
}

impl Period {
    pub fn parse(s: &str) -> Option<Period> {
        match s {
            "today" => Some(Period::Today),
            "yesterday" => Some(Period::Yesterday),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Today => "today",
            Period::Yesterday => "yesterday",
        }
    }
}

/// Half-open `[start, end)` bounds for the period, anchored to local
/// midnight and expressed in the store's canonical timestamp form. An item
/// published exactly at midnight belongs to the later day.
pub fn day_range(period: Period, now: DateTime<Local>) -> (String, String) {
    let midnight = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time");
    let start_of_today = Local
        .from_local_datetime(&midnight)
        .earliest()
        .expect("local midnight resolves")
        .with_timezone(&Utc);

    let (start, end) = match period {
        Period::Today => (
            start_of_today,
            start_of_today + Days::new(1),
        ),
        Period::Yesterday => (
            start_of_today - Days::new(1),
            start_of_today,
        ),
    };

    (format_timestamp(start), format_timestamp(end))
}

/// Read-only access to ingested items, shared by the web path and the token
/// API. Fully decoupled from ingestion timing: it only reads the store.
#[derive(Clone)]
pub struct QueryService {
    repo: Arc<Repository>,
}

impl QueryService {
    pub fn new(repo: Arc<Repository>) -> Self {
        Self { repo }
    }

    pub async fn count_items(&self, feed_urls: &[String]) -> Result<u64> {
        self.repo.count_items(feed_urls).await
    }

    pub async fn list_items(
        &self,
        feed_urls: &[String],
        limit: u32,
        offset: u64,
    ) -> Result<Vec<FeedItem>> {
        self.repo.list_items(feed_urls, limit, offset).await
    }

    pub async fn list_items_in_period(
        &self,
        feed_urls: &[String],
        period: Period,
        now: DateTime<Local>,
    ) -> Result<Vec<FeedItem>> {
        let (start, end) = day_range(period, now);
        self.repo.list_items_in_range(feed_urls, &start, &end).await
    }

    /// One page of a user's aggregated items, with pager totals.
    pub async fn page(
        &self,
        feed_urls: &[String],
        pagination: Pagination,
    ) -> Result<PaginatedFeedItems> {
        let total_items = self.count_items(feed_urls).await?;
        let items = self
            .list_items(feed_urls, pagination.per_page, pagination.offset())
            .await?;

        let total_pages = total_items.div_ceil(pagination.per_page as u64) as u32;

        Ok(PaginatedFeedItems {
            items,
            page: pagination.page,
            per_page: pagination.per_page,
            total_pages,
            total_items,
        })
    }
}

/// Replace each item's source with the subscription's own title where one
/// was set. An empty subscription title keeps the feed's self-declared name.
pub fn apply_title_overrides(items: &mut [FeedItem], subscriptions: &[Subscription]) {
    let overrides: HashMap<&str, &str> = subscriptions
        .iter()
        .filter(|s| !s.title.trim().is_empty())
        .map(|s| (s.feed_url.as_str(), s.title.as_str()))
        .collect();

    for item in items.iter_mut() {
        if let Some(title) = overrides.get(item.feed_url.as_str()) {
            item.source = (*title).to_string();
        }
    }
}

/// Narrow a user's subscriptions by tag and/or source URL before querying.
pub fn filter_subscriptions<'a>(
    subscriptions: &'a [Subscription],
    tag: &str,
    source: &str,
) -> Vec<&'a Subscription> {
    let tag = tag.trim();
    let source = source.trim();

    subscriptions
        .iter()
        .filter(|s| source.is_empty() || s.feed_url == source)
        .filter(|s| tag.is_empty() || s.has_tag(tag))
        .collect()
}

/// Distinct tags across a user's subscriptions, case-insensitively unique,
/// sorted.
pub fn collect_tags(subscriptions: &[Subscription]) -> Vec<String> {
    let mut unique: HashMap<String, String> = HashMap::new();
    for sub in subscriptions {
        for tag in sub.tag_list() {
            unique.entry(tag.to_lowercase()).or_insert_with(|| tag.to_string());
        }
    }

    let mut tags: Vec<String> = unique.into_values().collect();
    tags.sort();
    tags
}

/// Guard for the token API's latest-N path: N must be in 1..=max.
pub fn validate_limit(limit: i64, max: i64) -> Result<u32> {
    if limit <= 0 {
        return Err(AppError::InvalidRequest(
            "limit must be a positive integer".to_string(),
        ));
    }
    if limit > max {
        return Err(AppError::InvalidRequest(format!("limit must be <= {max}")));
    }
    Ok(limit as u32)
}
