use crate::fetcher::HttpFeedSource;
use crate::ledger::SeenLedger;
use crate::registry::{validate_feed_url, SourceRegistry};
use crate::settings::SettingsStore;
use crate::sources::FeedSource;
use crate::store::Stores;
use crate::types::{
    AggregatorError, FeedDocumentSource, FetchConfig, FetchLimit, FetchResult, Item,
    RefreshReport, Result, Source, UNKNOWN_SOURCE_NAME,
};
use chrono::Utc;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub fetch: FetchConfig,
    /// Queue a background refresh after sources are added or removed.
    pub refresh_on_change: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            refresh_on_change: true,
        }
    }
}

/// Receives every finished refresh. Holds `None` until the first pass completes.
pub type ReportReceiver = watch::Receiver<Option<Arc<RefreshReport>>>;

/// Ties the registry, ledger and settings to the fetch pipeline.
///
/// Cheap to clone; clones share state. At most one refresh pass runs at a time.
#[derive(Clone)]
pub struct FeedAggregator {
    inner: Arc<Inner>,
}

struct Inner {
    source: FeedSource,
    registry: SourceRegistry,
    ledger: SeenLedger,
    settings: SettingsStore,
    refresh_gate: Arc<Mutex<()>>,
    reports: watch::Sender<Option<Arc<RefreshReport>>>,
    refresh_on_change: bool,
}

impl FeedAggregator {
    pub fn new(
        documents: Arc<dyn FeedDocumentSource>,
        stores: Stores,
        config: AggregatorConfig,
    ) -> Self {
        let deadline = Duration::from_secs(config.fetch.deadline_seconds);
        let (reports, _) = watch::channel(None);

        let inner = Inner {
            source: FeedSource::new(documents, deadline),
            registry: SourceRegistry::load(stores.sources),
            ledger: SeenLedger::load(stores.ledger),
            settings: SettingsStore::load(stores.settings),
            refresh_gate: Arc::new(Mutex::new(())),
            reports,
            refresh_on_change: config.refresh_on_change,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// HTTP fetching with JSON stores in `data_dir`.
    pub fn open(data_dir: impl AsRef<Path>, config: AggregatorConfig) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        info!("Using data directory {}", data_dir.display());

        let documents = Arc::new(HttpFeedSource::new(config.fetch.clone())?);
        Ok(Self::new(documents, Stores::json_in(data_dir), config))
    }

    /// Run one pass, waiting behind any pass already in flight.
    pub async fn refresh(&self) -> RefreshReport {
        let _pass = self.inner.refresh_gate.lock().await;
        self.inner.run_pass().await
    }

    /// Start a pass in the background unless one is already running.
    ///
    /// Returns whether a new pass was started. The result arrives on [`subscribe`](Self::subscribe).
    pub fn request_refresh(&self) -> bool {
        let pass = match self.inner.refresh_gate.clone().try_lock_owned() {
            Ok(pass) => pass,
            Err(_) => {
                debug!("Refresh already in progress, request coalesced");
                return false;
            }
        };

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _pass = pass;
            inner.run_pass().await;
        });
        true
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.refresh_gate.try_lock().is_err()
    }

    pub fn subscribe(&self) -> ReportReceiver {
        self.inner.reports.subscribe()
    }

    /// Most recent finished pass, if any.
    pub fn last_report(&self) -> Option<Arc<RefreshReport>> {
        self.inner.reports.borrow().clone()
    }

    /// Register a feed after confirming it can be fetched. The feed title becomes its name.
    pub async fn add_source(&self, url: &str) -> Result<Source> {
        let url = url.trim();
        validate_feed_url(url)?;
        if self.inner.registry.contains(url).await {
            warn!("Feed already in the list: {}", url);
            return Err(AggregatorError::DuplicateSource {
                url: url.to_string(),
            });
        }

        let limit = self.inner.settings.fetch_limit().await;
        let probe = self.inner.source.fetch(url, limit).await;
        if let Some(failure) = probe.error {
            warn!("Could not add feed {}: {}", url, failure);
            return Err(failure.into_error(url));
        }

        let source = Source {
            url: url.to_string(),
            name: probe
                .feed_title
                .unwrap_or_else(|| format!("Unknown ({})", url)),
        };
        self.inner.registry.insert(source.clone()).await?;
        self.after_change();
        Ok(source)
    }

    pub async fn remove_source(&self, url: &str) -> Result<Source> {
        let removed = self.inner.registry.remove(url).await?;
        self.after_change();
        Ok(removed)
    }

    /// Remove by position in the current list.
    pub async fn remove_source_at(&self, index: usize) -> Result<Source> {
        let url = self.inner.registry.url_at(index).await?;
        self.remove_source(&url).await
    }

    pub async fn rename_source(&self, url: &str, name: &str) -> Result<()> {
        self.inner.registry.rename(url, name).await
    }

    /// Returns false if the item was already seen.
    pub async fn mark_seen(&self, id: &str) -> bool {
        self.inner.ledger.mark_seen(id).await
    }

    pub async fn set_fetch_limit(&self, value: u32) -> Result<FetchLimit> {
        self.inner.settings.set_fetch_limit(value).await
    }

    pub async fn sources(&self) -> Vec<Source> {
        self.inner.registry.snapshot().await
    }

    pub async fn fetch_limit(&self) -> FetchLimit {
        self.inner.settings.fetch_limit().await
    }

    pub async fn seen_ids(&self) -> Vec<String> {
        self.inner.ledger.ids().await
    }

    fn after_change(&self) {
        if self.inner.refresh_on_change {
            self.request_refresh();
        }
    }
}

impl Inner {
    async fn run_pass(&self) -> RefreshReport {
        let sources = self.registry.snapshot().await;
        let limit = self.settings.fetch_limit().await;
        info!("Fetching {} feeds, up to {} items each", sources.len(), limit);

        let results = join_all(
            sources
                .iter()
                .map(|source| self.source.fetch(&source.url, limit)),
        )
        .await;

        let (mut items, error_count) = merge_results(&sources, results);
        sort_newest_first(&mut items);

        let universe: HashSet<String> = items.iter().map(|item| item.id.clone()).collect();
        let reconciled = self.ledger.reconcile(&universe).await;
        let fetched = items.len();
        let unseen = filter_unseen(items, &reconciled.seen);

        if unseen.is_empty() {
            if error_count > 0 {
                info!("No new items ({} feed errors)", error_count);
            } else if fetched == 0 {
                info!("No items found in feeds");
            } else {
                info!("All fetched items have been marked as viewed");
            }
        } else {
            info!(
                "Displaying {} new items ({} feed errors)",
                unseen.len(),
                error_count
            );
        }

        let report = RefreshReport {
            items: unseen,
            error_count,
            source_count: sources.len(),
            universe_size: universe.len(),
            pruned: reconciled.pruned,
            finished_at: Utc::now(),
        };
        self.reports.send_replace(Some(Arc::new(report.clone())));
        report
    }
}

/// Collect items from healthy results, labelled with each source's stored name.
///
/// Returns the items in source order and the number of failed sources.
pub fn merge_results(sources: &[Source], results: Vec<FetchResult>) -> (Vec<Item>, usize) {
    let names: HashMap<&str, &str> = sources
        .iter()
        .map(|source| (source.url.as_str(), source.name.as_str()))
        .collect();

    let mut items = Vec::new();
    let mut error_count = 0;

    for result in results {
        if let Some(failure) = &result.error {
            warn!("Failed to process feed: {} - {}", result.source_url, failure);
            error_count += 1;
            continue;
        }

        let name = names
            .get(result.source_url.as_str())
            .copied()
            .unwrap_or(UNKNOWN_SOURCE_NAME);
        items.extend(result.items.into_iter().map(|mut item| {
            item.source_name = name.to_string();
            item
        }));
    }

    (items, error_count)
}

/// Newest first. Undated items keep their relative order after all dated ones.
pub fn sort_newest_first(items: &mut [Item]) {
    items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
}

pub fn filter_unseen(items: Vec<Item>, seen: &HashSet<String>) -> Vec<Item> {
    items
        .into_iter()
        .filter(|item| !seen.contains(&item.id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FetchFailure, FetchStatus};
    use chrono::{DateTime, TimeZone};

    fn at(day: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap())
    }

    fn item(id: &str, published_at: Option<DateTime<Utc>>) -> Item {
        Item {
            id: id.to_string(),
            title: id.to_uppercase(),
            link: format!("https://example.com/{id}"),
            published_at,
            published_display: String::new(),
            source_name: "Feed Title".to_string(),
        }
    }

    fn ids(items: &[Item]) -> Vec<&str> {
        items.iter().map(|item| item.id.as_str()).collect()
    }

    fn ok(url: &str, items: Vec<Item>) -> FetchResult {
        FetchResult {
            source_url: url.to_string(),
            feed_title: Some("Feed Title".to_string()),
            feed_link: url.to_string(),
            items,
            status: FetchStatus::Ok,
            error: None,
        }
    }

    #[test]
    fn sort_puts_undated_last_and_keeps_ties_stable() {
        let mut items = vec![
            item("undated-1", None),
            item("old", at(1)),
            item("tie-a", at(5)),
            item("undated-2", None),
            item("new", at(9)),
            item("tie-b", at(5)),
        ];
        sort_newest_first(&mut items);
        assert_eq!(
            ids(&items),
            vec!["new", "tie-a", "tie-b", "old", "undated-1", "undated-2"]
        );
    }

    #[test]
    fn merge_relabels_and_counts_failures() {
        let sources = vec![
            Source {
                url: "https://a.example/feed".to_string(),
                name: "My Name For A".to_string(),
            },
            Source {
                url: "https://b.example/feed".to_string(),
                name: "B".to_string(),
            },
        ];
        let results = vec![
            ok("https://a.example/feed", vec![item("a1", at(1)), item("a2", at(2))]),
            FetchResult::failed("https://b.example/feed", FetchFailure::HttpStatus(500)),
        ];

        let (items, errors) = merge_results(&sources, results);
        assert_eq!(errors, 1);
        assert_eq!(ids(&items), vec!["a1", "a2"]);
        assert!(items.iter().all(|item| item.source_name == "My Name For A"));
    }

    #[test]
    fn filter_drops_seen_ids_in_order() {
        let items = vec![item("a", at(3)), item("b", at(2)), item("c", at(1))];
        let seen: HashSet<String> = ["b".to_string(), "zzz".to_string()].into();
        assert_eq!(ids(&filter_unseen(items, &seen)), vec!["a", "c"]);
    }
}
