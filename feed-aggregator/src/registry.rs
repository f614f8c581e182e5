use crate::store::{load_or_default, save_logged, SharedStore};
use crate::types::{AggregatorError, Result, Source, SourceList};
use std::collections::HashSet;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

/// Ordered list of configured feeds, keyed by url.
pub struct SourceRegistry {
    sources: RwLock<Vec<Source>>,
    store: SharedStore<SourceList>,
}

impl SourceRegistry {
    pub fn load(store: SharedStore<SourceList>) -> Self {
        let SourceList(stored) = load_or_default(store.as_ref(), "feed list");

        let mut seen = HashSet::new();
        let sources: Vec<Source> = stored
            .into_iter()
            .filter(|source| {
                let fresh = seen.insert(source.url.clone());
                if !fresh {
                    warn!("Dropping duplicate stored feed: {}", source.url);
                }
                fresh
            })
            .collect();
        debug!("Loaded {} feeds", sources.len());

        Self {
            sources: RwLock::new(sources),
            store,
        }
    }

    pub async fn snapshot(&self) -> Vec<Source> {
        self.sources.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.sources.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sources.read().await.is_empty()
    }

    pub async fn contains(&self, url: &str) -> bool {
        self.sources.read().await.iter().any(|source| source.url == url)
    }

    /// Append a source. Fails if its url is already registered.
    pub async fn insert(&self, source: Source) -> Result<()> {
        let mut sources = self.sources.write().await;
        if sources.iter().any(|existing| existing.url == source.url) {
            return Err(AggregatorError::DuplicateSource { url: source.url });
        }

        info!("Added feed: {} - {}", source.name, source.url);
        sources.push(source);
        save_logged(&self.store, SourceList(sources.clone()), "feed list").await;
        Ok(())
    }

    /// Remove the source with this url.
    pub async fn remove(&self, url: &str) -> Result<Source> {
        let mut sources = self.sources.write().await;
        let position = sources
            .iter()
            .position(|source| source.url == url)
            .ok_or_else(|| AggregatorError::SourceNotFound { url: url.to_string() })?;

        let removed = sources.remove(position);
        save_logged(&self.store, SourceList(sources.clone()), "feed list").await;
        info!("Removed feed: {} - {}", removed.name, removed.url);
        Ok(removed)
    }

    /// Url of the source currently at `index`.
    pub async fn url_at(&self, index: usize) -> Result<String> {
        let sources = self.sources.read().await;
        sources
            .get(index)
            .map(|source| source.url.clone())
            .ok_or(AggregatorError::IndexOutOfRange {
                index,
                len: sources.len(),
            })
    }

    pub async fn rename(&self, url: &str, name: &str) -> Result<()> {
        let mut sources = self.sources.write().await;
        let source = sources
            .iter_mut()
            .find(|source| source.url == url)
            .ok_or_else(|| AggregatorError::SourceNotFound { url: url.to_string() })?;

        info!("Renamed feed {}: {} -> {}", url, source.name, name);
        source.name = name.to_string();
        save_logged(&self.store, SourceList(sources.clone()), "feed list").await;
        Ok(())
    }
}

/// Accept only absolute http(s) urls with a host.
pub fn validate_feed_url(url: &str) -> Result<()> {
    let invalid = |reason: &str| AggregatorError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("only http and https feeds are supported"));
    }
    if parsed.host().is_none() {
        return Err(invalid("missing host"));
    }
    Ok(())
}
