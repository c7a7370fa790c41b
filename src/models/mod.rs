mod item;
mod user;

pub use item::{FeedItem, FetchedFeed, NewFeedItem, PaginatedFeedItems, RawEntry};
pub use user::{ApiToken, RefreshSetting, Role, Subscription, User, DEFAULT_REFRESH_INTERVAL_MINUTES};
