use crate::ledger::LedgerMap;
use crate::settings::Settings;
use crate::types::{AggregatorError, KeyValueStore, Result, SourceList};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};

pub const FEEDS_FILE: &str = "feeds.json";
pub const VIEWED_FILE: &str = "viewed.json";
pub const CONFIG_FILE: &str = "config.json";

/// A JSON document on disk holding one value of `T`.
///
/// Saves go to a temp file in the same directory which is then renamed over the
/// target, so readers see either the old or the new document.
#[derive(Debug)]
pub struct JsonFileStore<T> {
    path: PathBuf,
    _value: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _value: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T> KeyValueStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> anyhow::Result<Option<T>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        let value = serde_json::from_str(&content)?;
        debug!("Loaded {}", self.path.display());
        Ok(Some(value))
    }

    fn save(&self, value: &T) -> anyhow::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut file = NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, value)?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(&self.path)?;
        debug!("Saved {}", self.path.display());
        Ok(())
    }
}

/// Shared handle to the store behind one piece of state.
pub type SharedStore<T> = Arc<dyn KeyValueStore<T>>;

/// The three stores backing an aggregator.
pub struct Stores {
    pub sources: SharedStore<SourceList>,
    pub ledger: SharedStore<LedgerMap>,
    pub settings: SharedStore<Settings>,
}

impl Stores {
    /// `feeds.json`, `viewed.json` and `config.json` inside `dir`.
    pub fn json_in(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            sources: Arc::new(JsonFileStore::<SourceList>::new(dir.join(FEEDS_FILE))),
            ledger: Arc::new(JsonFileStore::<LedgerMap>::new(dir.join(VIEWED_FILE))),
            settings: Arc::new(JsonFileStore::<Settings>::new(dir.join(CONFIG_FILE))),
        }
    }
}

/// Load a value, falling back to `T::default()` when the store is empty or unreadable.
pub fn load_or_default<T: Default>(store: &dyn KeyValueStore<T>, what: &str) -> T {
    match store.load() {
        Ok(Some(value)) => value,
        Ok(None) => {
            debug!("No stored {}, starting empty", what);
            T::default()
        }
        Err(e) => {
            warn!("Could not read stored {}: {}. Using defaults.", what, e);
            T::default()
        }
    }
}

/// Save a value, logging instead of failing. Returns whether the save went through.
pub async fn save_logged<T: Send + 'static>(store: &SharedStore<T>, value: T, what: &str) -> bool {
    match save(store, value).await {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to save {}: {}", what, e);
            false
        }
    }
}

/// Runs the write on the blocking pool.
pub async fn save<T: Send + 'static>(store: &SharedStore<T>, value: T) -> Result<()> {
    let store = Arc::clone(store);
    match tokio::task::spawn_blocking(move || store.save(&value)).await {
        Ok(saved) => saved.map_err(|e| AggregatorError::Persistence(e.to_string())),
        Err(e) => Err(AggregatorError::Persistence(format!("save task failed: {}", e))),
    }
}
