use crate::types::{
    EntryDocument, FeedDocument, FeedDocumentSource, FetchFailure, FetchLimit, FetchResult,
    FetchStatus, Item, PublishedTime, UNKNOWN_SOURCE_NAME,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const NO_TITLE: &str = "No Title";
pub const NO_LINK: &str = "#";
pub const UNKNOWN_DATE: &str = "Unknown date";
const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Fetches one source at a time and normalizes what comes back.
///
/// Never fails: every problem ends up as an error [`FetchResult`].
pub struct FeedSource {
    documents: Arc<dyn FeedDocumentSource>,
    deadline: Duration,
}

impl FeedSource {
    pub fn new(documents: Arc<dyn FeedDocumentSource>, deadline: Duration) -> Self {
        Self { documents, deadline }
    }

    pub async fn fetch(&self, url: &str, limit: FetchLimit) -> FetchResult {
        info!("Fetching: {}", url);

        let document = match tokio::time::timeout(self.deadline, self.documents.retrieve(url)).await {
            Ok(Ok(document)) => document,
            Ok(Err(e)) => {
                error!("Critical error fetching/parsing feed {}: {:#}", url, e);
                return FetchResult::failed(url, FetchFailure::Transport(format!("{:#}", e)));
            }
            Err(_) => {
                warn!("Gave up on {} after {:?}", url, self.deadline);
                return FetchResult::failed(
                    url,
                    FetchFailure::DeadlineExceeded {
                        seconds: self.deadline.as_secs(),
                    },
                );
            }
        };

        classify(url, document, limit)
    }
}

/// Turn a retrieved document into a result, keeping at most `limit` entries in feed order.
pub fn classify(url: &str, document: FeedDocument, limit: FetchLimit) -> FetchResult {
    if document.malformed {
        warn!(
            "Feed issues with {}: {}",
            url,
            document.malformed_cause.as_deref().unwrap_or("Unknown issue")
        );
    }

    if let Some(status) = document.status.filter(|status| *status != 200) {
        warn!("HTTP Error {} for feed: {}", status, url);
        return FetchResult::failed(url, FetchFailure::HttpStatus(status));
    }
    if !document.has_header() && document.entries.is_empty() {
        warn!("Feed seems empty or parsing failed for {}", url);
        return FetchResult::failed(url, FetchFailure::EmptyParse);
    }

    let feed_name = document.title.as_deref().unwrap_or(UNKNOWN_SOURCE_NAME);
    let items = document
        .entries
        .iter()
        .take(limit.get() as usize)
        .filter_map(|entry| normalize_entry(entry, feed_name))
        .collect();

    FetchResult {
        source_url: url.to_string(),
        feed_link: document.link.clone().unwrap_or_else(|| url.to_string()),
        feed_title: document.title,
        items,
        status: FetchStatus::Ok,
        error: None,
    }
}

/// Build an [`Item`] from an entry. Entries with neither id nor link are dropped.
pub fn normalize_entry(entry: &EntryDocument, source_name: &str) -> Option<Item> {
    let id = entry.id.clone().or_else(|| entry.link.clone())?;

    let (published_at, published_display) = match &entry.published {
        Some(PublishedTime::Parsed(at)) => (Some(*at), at.format(DISPLAY_FORMAT).to_string()),
        Some(PublishedTime::Text(text)) => (None, text.clone()),
        None => (None, UNKNOWN_DATE.to_string()),
    };

    Some(Item {
        id,
        title: entry.title.clone().unwrap_or_else(|| NO_TITLE.to_string()),
        link: entry.link.clone().unwrap_or_else(|| NO_LINK.to_string()),
        published_at,
        published_display,
        source_name: source_name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use interfaces::memory::StaticFeedSource;

    const URL: &str = "https://example.com/feed.xml";

    fn entry(id: &str) -> EntryDocument {
        EntryDocument {
            id: Some(id.to_string()),
            link: Some(format!("https://example.com/{id}")),
            title: Some(format!("Title {id}")),
            published: None,
        }
    }

    fn document(entries: Vec<EntryDocument>) -> FeedDocument {
        FeedDocument {
            status: Some(200),
            title: Some("Example Channel".to_string()),
            link: Some("https://example.com/".to_string()),
            entries,
            ..FeedDocument::default()
        }
    }

    fn limit(n: u32) -> FetchLimit {
        FetchLimit::new(n).unwrap()
    }

    #[test]
    fn keeps_first_entries_in_feed_order() {
        let entries = (0..100).map(|i| entry(&format!("item-{i}"))).collect();
        let result = classify(URL, document(entries), limit(10));

        assert!(result.is_ok());
        let ids: Vec<String> = result.items.iter().map(|item| item.id.clone()).collect();
        let expected: Vec<String> = (0..10).map(|i| format!("item-{i}")).collect();
        assert_eq!(ids, expected);
        assert_eq!(result.feed_title.as_deref(), Some("Example Channel"));
        assert_eq!(result.feed_link, "https://example.com/");
    }

    #[test]
    fn non_200_status_is_an_error() {
        let mut doc = document(vec![entry("a")]);
        doc.status = Some(404);
        let result = classify(URL, doc, limit(5));

        assert_eq!(result.status, FetchStatus::Error);
        assert!(result.items.is_empty());
        assert_eq!(result.error, Some(FetchFailure::HttpStatus(404)));
    }

    #[test]
    fn missing_status_is_fine() {
        let mut doc = document(vec![entry("a")]);
        doc.status = None;
        assert!(classify(URL, doc, limit(5)).is_ok());
    }

    #[test]
    fn empty_document_is_a_failed_parse() {
        let doc = FeedDocument {
            status: Some(200),
            malformed: true,
            malformed_cause: Some("not xml".to_string()),
            ..FeedDocument::default()
        };
        let result = classify(URL, doc, limit(5));
        assert_eq!(result.error, Some(FetchFailure::EmptyParse));
    }

    #[test]
    fn header_only_feed_is_ok_and_empty() {
        let result = classify(URL, document(Vec::new()), limit(5));
        assert!(result.is_ok());
        assert!(result.items.is_empty());
    }

    #[test]
    fn entry_defaults_fill_missing_fields() {
        let bare = EntryDocument {
            id: None,
            link: Some("https://example.com/watch?v=1".to_string()),
            title: None,
            published: Some(PublishedTime::Text("Tue, 05 Mar 2024".to_string())),
        };
        let item = normalize_entry(&bare, "Channel").unwrap();
        assert_eq!(item.id, "https://example.com/watch?v=1");
        assert_eq!(item.title, NO_TITLE);
        assert_eq!(item.published_at, None);
        assert_eq!(item.published_display, "Tue, 05 Mar 2024");
        assert_eq!(item.source_name, "Channel");

        let id_only = EntryDocument {
            id: Some("yt:video:2".to_string()),
            ..EntryDocument::default()
        };
        let item = normalize_entry(&id_only, "Channel").unwrap();
        assert_eq!(item.link, NO_LINK);
        assert_eq!(item.published_display, UNKNOWN_DATE);

        assert!(normalize_entry(&EntryDocument::default(), "Channel").is_none());
    }

    #[test]
    fn parsed_publish_time_is_formatted_for_display() {
        let mut dated = entry("a");
        let at = Utc.with_ymd_and_hms(2024, 3, 2, 9, 5, 7).unwrap();
        dated.published = Some(PublishedTime::Parsed(at));

        let item = normalize_entry(&dated, "Channel").unwrap();
        assert_eq!(item.published_at, Some(at));
        assert_eq!(item.published_display, "2024-03-02 09:05:07");
    }

    #[test]
    fn limit_applies_before_dropping_entries_without_id() {
        let entries = vec![entry("a"), EntryDocument::default(), entry("c")];
        let result = classify(URL, document(entries), limit(2));
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].id, "a");
    }

    #[test]
    fn untitled_feed_labels_items_with_placeholder() {
        let mut doc = document(vec![entry("a")]);
        doc.title = None;
        let result = classify(URL, doc, limit(5));
        assert_eq!(result.feed_title, None);
        assert_eq!(result.items[0].source_name, UNKNOWN_SOURCE_NAME);
    }

    #[tokio::test]
    async fn collaborator_errors_become_error_results() {
        let documents = Arc::new(StaticFeedSource::new());
        documents.fail(URL, "connection refused");
        let source = FeedSource::new(documents, Duration::from_secs(5));

        let result = source.fetch(URL, limit(5)).await;
        assert_eq!(result.status, FetchStatus::Error);
        assert_eq!(
            result.error,
            Some(FetchFailure::Transport("connection refused".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_source_hits_the_deadline() {
        let documents = Arc::new(StaticFeedSource::new());
        documents.stall(URL);
        let source = FeedSource::new(documents, Duration::from_secs(3));

        let result = source.fetch(URL, limit(5)).await;
        assert_eq!(result.error, Some(FetchFailure::DeadlineExceeded { seconds: 3 }));
    }
}
