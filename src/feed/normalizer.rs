use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;

use crate::models::{NewFeedItem, RawEntry};

fn tag_regex() -> &'static Regex {
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    TAG_RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("tag regex is valid"))
}

/// Remove every `<...>` span from the input. This is deliberately not an
/// HTML sanitizer: entities stay encoded and malformed nesting is not
/// repaired.
pub fn strip_tags(input: &str) -> String {
    tag_regex().replace_all(input, "").into_owned()
}

/// Canonical stored form for publish dates: RFC 3339 in UTC with second
/// precision. All stored dates share this exact shape, so lexicographic
/// order is chronological order and range bounds can be compared as strings.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Shape one raw entry into a storable item.
///
/// An entry without a link has no dedup key and is dropped. A missing
/// publish date falls back to `fetched_at` rather than dropping the item.
pub fn normalize_entry(
    entry: &RawEntry,
    feed_url: &str,
    source: &str,
    fetched_at: DateTime<Utc>,
) -> Option<NewFeedItem> {
    let link = entry.link.as_deref()?.to_string();
    if link.is_empty() {
        return None;
    }

    let published_at = format_timestamp(entry.published.unwrap_or(fetched_at));

    Some(NewFeedItem {
        title: entry.title.clone().unwrap_or_else(|| "Untitled".to_string()),
        link,
        published_at,
        source: source.to_string(),
        description: strip_tags(entry.description.as_deref().unwrap_or_default()),
        feed_url: feed_url.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(link: Option<&str>, published: Option<DateTime<Utc>>) -> RawEntry {
        RawEntry {
            title: Some("An article".to_string()),
            link: link.map(str::to_string),
            published,
            description: Some("<p>Hello <b>world</b></p>".to_string()),
        }
    }

    #[test]
    fn strips_markup_but_keeps_entities() {
        assert_eq!(strip_tags("<p>a &amp; b</p>"), "a &amp; b");
        assert_eq!(strip_tags("no tags here"), "no tags here");
        assert_eq!(strip_tags("<img src='x'>text<br/>"), "text");
    }

    #[test]
    fn timestamps_share_one_sortable_shape() {
        let early = Utc.with_ymd_and_hms(2026, 8, 1, 9, 30, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap();
        let a = format_timestamp(early);
        let b = format_timestamp(late);
        assert_eq!(a, "2026-08-01T09:30:00Z");
        assert!(a < b);
    }

    #[test]
    fn missing_date_falls_back_to_fetch_time() {
        let fetched_at = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap();
        let item = normalize_entry(
            &entry(Some("https://example.com/a"), None),
            "https://example.com/rss",
            "Example",
            fetched_at,
        )
        .unwrap();
        assert_eq!(item.published_at, "2026-08-07T12:00:00Z");
        assert_eq!(item.description, "Hello world");
    }

    #[test]
    fn entry_without_link_is_dropped() {
        let fetched_at = Utc.with_ymd_and_hms(2026, 8, 7, 12, 0, 0).unwrap();
        assert!(normalize_entry(&entry(None, None), "https://example.com/rss", "", fetched_at).is_none());
        assert!(normalize_entry(&entry(Some(""), None), "https://example.com/rss", "", fetched_at).is_none());
    }
}
