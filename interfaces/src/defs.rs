use async_trait::async_trait;
use chrono::{DateTime, Utc};

// Contracts between the aggregation core and the things it does not own:
// whoever turns a feed url into a document, and whoever keeps persisted state.
// Implementations are expected to be cheap to share behind an `Arc`.

/// Publish time of an entry, either understood by the parser or left as the raw text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishedTime {
    Parsed(DateTime<Utc>),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryDocument {
    pub id: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    pub published: Option<PublishedTime>,
}

/// A retrieved feed, as reported by the parsing collaborator.
///
/// `status` is the HTTP status when the document came over HTTP. `malformed` is
/// set when the parser hit a problem, whether or not it still recovered content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedDocument {
    pub status: Option<u16>,
    pub malformed: bool,
    pub malformed_cause: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub entries: Vec<EntryDocument>,
}

impl FeedDocument {
    /// True when the document carries any feed-level metadata.
    pub fn has_header(&self) -> bool {
        self.title.is_some() || self.link.is_some()
    }
}

#[async_trait]
pub trait FeedDocumentSource: Send + Sync {
    /// Retrieve and parse the document behind `url`.
    ///
    /// Transport failures are errors. HTTP statuses and parse problems are not;
    /// they are reported on the returned document.
    async fn retrieve(&self, url: &str) -> anyhow::Result<FeedDocument>;
}

#[async_trait]
impl<S: FeedDocumentSource + ?Sized> FeedDocumentSource for std::sync::Arc<S> {
    async fn retrieve(&self, url: &str) -> anyhow::Result<FeedDocument> {
        (**self).retrieve(url).await
    }
}

/// Whole-value persistence for one piece of state.
pub trait KeyValueStore<T>: Send + Sync {
    /// `Ok(None)` means nothing has been stored yet.
    fn load(&self) -> anyhow::Result<Option<T>>;
    fn save(&self, value: &T) -> anyhow::Result<()>;
}

impl<T, S: KeyValueStore<T> + ?Sized> KeyValueStore<T> for std::sync::Arc<S> {
    fn load(&self) -> anyhow::Result<Option<T>> {
        (**self).load()
    }

    fn save(&self, value: &T) -> anyhow::Result<()> {
        (**self).save(value)
    }
}
