mod fetcher;
mod ingest;
mod normalizer;

pub use fetcher::{FeedFetcher, FetchFeed};
pub use ingest::{IngestReport, Ingestor};
pub use normalizer::{format_timestamp, normalize_entry, strip_tags};
