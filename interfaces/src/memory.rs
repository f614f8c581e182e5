//! In-memory collaborators for tests and embedders that keep state elsewhere.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail};
use async_trait::async_trait;

use crate::defs::{FeedDocument, FeedDocumentSource, KeyValueStore};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
enum Scripted {
    Document(FeedDocument),
    Failure(String),
    Stall,
}

/// Serves canned documents by url. Unknown urls answer with an HTTP 404 document.
#[derive(Debug, Default)]
pub struct StaticFeedSource {
    documents: Mutex<HashMap<String, Scripted>>,
    requests: Mutex<Vec<String>>,
}

impl StaticFeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: impl Into<String>, document: FeedDocument) {
        lock(&self.documents).insert(url.into(), Scripted::Document(document));
    }

    /// Make retrieval of `url` fail as a transport error would.
    pub fn fail(&self, url: impl Into<String>, message: impl Into<String>) {
        lock(&self.documents).insert(url.into(), Scripted::Failure(message.into()));
    }

    /// Make retrieval of `url` never complete.
    pub fn stall(&self, url: impl Into<String>) {
        lock(&self.documents).insert(url.into(), Scripted::Stall);
    }

    pub fn remove(&self, url: &str) {
        lock(&self.documents).remove(url);
    }

    /// Urls requested so far, in request order.
    pub fn requests(&self) -> Vec<String> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl FeedDocumentSource for StaticFeedSource {
    async fn retrieve(&self, url: &str) -> anyhow::Result<FeedDocument> {
        lock(&self.requests).push(url.to_string());
        let scripted = lock(&self.documents).get(url).cloned();

        match scripted {
            Some(Scripted::Document(document)) => Ok(document),
            Some(Scripted::Failure(message)) => Err(anyhow!(message)),
            Some(Scripted::Stall) => std::future::pending().await,
            None => Ok(FeedDocument {
                status: Some(404),
                ..FeedDocument::default()
            }),
        }
    }
}

/// Keeps the stored value in memory and counts successful saves.
#[derive(Debug)]
pub struct MemoryStore<T> {
    value: Mutex<Option<T>>,
    saves: AtomicUsize,
    read_only: AtomicBool,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            saves: AtomicUsize::new(0),
            read_only: AtomicBool::new(false),
        }
    }

    pub fn with_value(value: T) -> Self {
        Self {
            value: Mutex::new(Some(value)),
            ..Self::new()
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// While read-only, every save fails and the stored value is left alone.
    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }
}

impl<T: Clone> MemoryStore<T> {
    pub fn value(&self) -> Option<T> {
        lock(&self.value).clone()
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> KeyValueStore<T> for MemoryStore<T> {
    fn load(&self) -> anyhow::Result<Option<T>> {
        Ok(lock(&self.value).clone())
    }

    fn save(&self, value: &T) -> anyhow::Result<()> {
        if self.read_only.load(Ordering::SeqCst) {
            bail!("store is read-only");
        }
        *lock(&self.value) = Some(value.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::EntryDocument;

    #[tokio::test]
    async fn static_source_serves_inserted_documents() {
        let source = StaticFeedSource::new();
        source.insert(
            "https://example.com/feed",
            FeedDocument {
                status: Some(200),
                title: Some("Example".to_string()),
                entries: vec![EntryDocument {
                    id: Some("a".to_string()),
                    ..EntryDocument::default()
                }],
                ..FeedDocument::default()
            },
        );

        let document = source.retrieve("https://example.com/feed").await.unwrap();
        assert_eq!(document.title.as_deref(), Some("Example"));
        assert_eq!(document.entries.len(), 1);

        let missing = source.retrieve("https://example.com/other").await.unwrap();
        assert_eq!(missing.status, Some(404));
        assert!(!missing.has_header());

        assert_eq!(
            source.requests(),
            vec!["https://example.com/feed", "https://example.com/other"]
        );
    }

    #[tokio::test]
    async fn static_source_reports_scripted_failures() {
        let source = StaticFeedSource::new();
        source.fail("https://example.com/feed", "connection reset");

        let err = source.retrieve("https://example.com/feed").await.unwrap_err();
        assert_eq!(err.to_string(), "connection reset");
    }

    #[test]
    fn memory_store_round_trips_and_can_refuse_writes() {
        let store = MemoryStore::<Vec<u32>>::new();
        assert_eq!(store.load().unwrap(), None);

        store.save(&vec![1, 2]).unwrap();
        assert_eq!(store.value(), Some(vec![1, 2]));
        assert_eq!(store.saves(), 1);

        store.set_read_only(true);
        assert!(store.save(&vec![3]).is_err());
        assert_eq!(store.value(), Some(vec![1, 2]));
        assert_eq!(store.saves(), 1);
    }
}
