use crate::types::{EntryDocument, FeedDocument, PublishedTime};
use feed_rs::model::{Entry, Feed, Link, Text};
use feed_rs::parser::{self, Parser};
use tracing::{debug, warn};

/// Turns raw RSS, Atom or JSON Feed bytes into a [`FeedDocument`].
#[derive(Debug, Default, Clone, Copy)]
pub struct FeedParser;

impl FeedParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a document body. Never fails: parse problems are reported through
    /// `malformed` and leave the document without header or entries.
    pub fn parse_document(&self, content: &[u8]) -> FeedDocument {
        debug!("Parsing feed content ({} bytes)", content.len());

        match build_parser().parse(content) {
            Ok(feed) => document_from_feed(feed),
            Err(e) => {
                warn!("Failed to parse feed: {}", e);
                FeedDocument {
                    malformed: true,
                    malformed_cause: Some(e.to_string()),
                    ..FeedDocument::default()
                }
            }
        }
    }
}

// Entries without an id fall back to their link instead of a generated hash.
fn build_parser() -> Parser {
    parser::Builder::new()
        .id_generator(|links: &[Link], _title: &Option<Text>, _uri: Option<&str>| {
            links.first().map(|link| link.href.clone()).unwrap_or_default()
        })
        .build()
}

fn document_from_feed(feed: Feed) -> FeedDocument {
    let title = feed.title.and_then(|t| non_empty(t.content));
    let link = preferred_link(&feed.links);
    let entries: Vec<EntryDocument> = feed.entries.into_iter().map(entry_document).collect();

    debug!("Parsed feed with {} entries", entries.len());
    FeedDocument {
        status: None,
        malformed: false,
        malformed_cause: None,
        title,
        link,
        entries,
    }
}

fn entry_document(entry: Entry) -> EntryDocument {
    let published = match (entry.published, entry.updated) {
        (Some(published), _) => Some(PublishedTime::Parsed(published)),
        // only an update stamp: keep it for display, it does not order the entry
        (None, Some(updated)) => Some(PublishedTime::Text(updated.to_rfc2822())),
        (None, None) => None,
    };

    EntryDocument {
        id: non_empty(entry.id),
        link: entry.links.first().and_then(|link| non_empty(link.href.clone())),
        title: entry.title.and_then(|t| non_empty(t.content)),
        published,
    }
}

fn preferred_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|link| link.rel.as_deref() == Some("alternate"))
        .or_else(|| links.first())
        .and_then(|link| non_empty(link.href.clone()))
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == value.len() {
        Some(value)
    } else {
        Some(trimmed.to_string())
    }
}
