use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;

pub use interfaces::defs::{EntryDocument, FeedDocument, FeedDocumentSource, KeyValueStore, PublishedTime};

pub const DEFAULT_FETCH_LIMIT: u32 = 15;
pub const MIN_FETCH_LIMIT: u32 = 1;
pub const MAX_FETCH_LIMIT: u32 = 50;

pub const UNKNOWN_SOURCE_NAME: &str = "Unknown Channel";

/// A configured feed endpoint. Serialized as `{"url": .., "name": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub url: String,
    #[serde(default = "unknown_source_name")]
    pub name: String,
}

fn unknown_source_name() -> String {
    UNKNOWN_SOURCE_NAME.to_string()
}

/// Persisted feed list.
///
/// Decoding is per record: entries without a string `url` are dropped with a
/// warning, and a missing or non-string `name` becomes the placeholder name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SourceList(pub Vec<Source>);

impl<'de> Deserialize<'de> for SourceList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let records = Vec::<Value>::deserialize(deserializer)?;
        Ok(Self(records.into_iter().filter_map(source_from_record).collect()))
    }
}

impl From<Vec<Source>> for SourceList {
    fn from(sources: Vec<Source>) -> Self {
        Self(sources)
    }
}

fn source_from_record(record: Value) -> Option<Source> {
    let url = record
        .get("url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty());
    let Some(url) = url else {
        warn!("Dropping stored feed without a url: {}", record);
        return None;
    };

    let name = record
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(unknown_source_name);
    Some(Source {
        url: url.to_string(),
        name,
    })
}

/// One entry pulled from a source, keyed by a durable id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub title: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
    pub published_display: String,
    pub source_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchStatus {
    Ok,
    Error,
}

/// Why a single source produced no items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    HttpStatus(u16),
    /// Neither feed metadata nor entries could be read.
    EmptyParse,
    Transport(String),
    DeadlineExceeded { seconds: u64 },
}

impl FetchFailure {
    pub fn into_error(self, url: &str) -> AggregatorError {
        match self {
            FetchFailure::EmptyParse => AggregatorError::MalformedFeed {
                url: url.to_string(),
                reason: self.to_string(),
            },
            other => AggregatorError::SourceUnreachable {
                url: url.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchFailure::HttpStatus(code) => write!(f, "HTTP Error {}", code),
            FetchFailure::EmptyParse => f.write_str("Empty/Failed Parse"),
            FetchFailure::Transport(message) => write!(f, "Error parsing feed: {}", message),
            FetchFailure::DeadlineExceeded { seconds } => {
                write!(f, "No response within {}s", seconds)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub source_url: String,
    pub feed_title: Option<String>,
    pub feed_link: String,
    pub items: Vec<Item>,
    pub status: FetchStatus,
    pub error: Option<FetchFailure>,
}

impl FetchResult {
    pub fn failed(source_url: &str, failure: FetchFailure) -> Self {
        Self {
            source_url: source_url.to_string(),
            feed_title: None,
            feed_link: source_url.to_string(),
            items: Vec::new(),
            status: FetchStatus::Error,
            error: Some(failure),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == FetchStatus::Ok
    }
}

/// Maximum number of entries kept per source per fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FetchLimit(u32);

impl FetchLimit {
    pub fn new(value: u32) -> Result<Self> {
        if (MIN_FETCH_LIMIT..=MAX_FETCH_LIMIT).contains(&value) {
            Ok(Self(value))
        } else {
            Err(AggregatorError::OutOfRange {
                value,
                min: MIN_FETCH_LIMIT,
                max: MAX_FETCH_LIMIT,
            })
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for FetchLimit {
    fn default() -> Self {
        Self(DEFAULT_FETCH_LIMIT)
    }
}

impl fmt::Display for FetchLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub max_feed_size_mb: usize,
    pub max_redirects: usize,
    /// Upper bound on one source's whole fetch, retries included.
    pub deadline_seconds: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (compatible; feed-aggregator/0.1)".to_string(),
            timeout_seconds: 20,
            max_retries: 2,
            retry_delay_ms: 500,
            max_feed_size_mb: 10,
            max_redirects: 5,
            deadline_seconds: 45,
        }
    }
}

/// Outcome of one aggregation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    /// Unseen items, newest first.
    pub items: Vec<Item>,
    pub error_count: usize,
    pub source_count: usize,
    /// Number of distinct item ids fetched across all healthy sources.
    pub universe_size: usize,
    /// Ledger entries dropped by reconciliation during this pass.
    pub pruned: usize,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("Could not fetch {url}: {reason}")]
    SourceUnreachable { url: String, reason: String },

    #[error("Feed at {url} is malformed: {reason}")]
    MalformedFeed { url: String, reason: String },

    #[error("Feed already registered: {url}")]
    DuplicateSource { url: String },

    #[error("No feed at position {index} (have {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Feed not registered: {url}")]
    SourceNotFound { url: String },

    #[error("Value {value} is outside {min}..={max}")]
    OutOfRange { value: u32, min: u32, max: u32 },

    #[error("Invalid feed URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AggregatorError>;
