use crate::store::{load_or_default, save_logged, SharedStore};
use crate::types::{FetchLimit, Result, DEFAULT_FETCH_LIMIT};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Per-run settings, stored as `{"videos_per_channel": 15}`.
///
/// Keys this crate does not know about are carried through saves untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(
        default = "default_videos_per_channel",
        deserialize_with = "videos_per_channel_or_default"
    )]
    pub videos_per_channel: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_videos_per_channel() -> u32 {
    DEFAULT_FETCH_LIMIT
}

// a non-integer limit must not cost the other keys in the file
fn videos_per_channel_or_default<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(raw
        .as_u64()
        .and_then(|value| u32::try_from(value).ok())
        .unwrap_or_else(|| {
            warn!("Stored videos_per_channel {} is not a count, using {}", raw, DEFAULT_FETCH_LIMIT);
            DEFAULT_FETCH_LIMIT
        }))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            videos_per_channel: DEFAULT_FETCH_LIMIT,
            extra: Map::new(),
        }
    }
}

impl Settings {
    /// The stored limit, or the default when the stored value is out of range.
    pub fn fetch_limit(&self) -> FetchLimit {
        FetchLimit::new(self.videos_per_channel).unwrap_or_default()
    }
}

pub struct SettingsStore {
    settings: RwLock<Settings>,
    store: SharedStore<Settings>,
}

impl SettingsStore {
    pub fn load(store: SharedStore<Settings>) -> Self {
        let mut settings: Settings = load_or_default(store.as_ref(), "settings");
        if FetchLimit::new(settings.videos_per_channel).is_err() {
            warn!(
                "Stored videos_per_channel {} is out of range, using {}",
                settings.videos_per_channel, DEFAULT_FETCH_LIMIT
            );
            settings.videos_per_channel = DEFAULT_FETCH_LIMIT;
        }

        Self {
            settings: RwLock::new(settings),
            store,
        }
    }

    pub async fn fetch_limit(&self) -> FetchLimit {
        self.settings.read().await.fetch_limit()
    }

    pub async fn set_fetch_limit(&self, value: u32) -> Result<FetchLimit> {
        let limit = FetchLimit::new(value)?;

        let mut settings = self.settings.write().await;
        settings.videos_per_channel = limit.get();
        save_logged(&self.store, settings.clone(), "settings").await;

        info!("Fetch limit set to {}", limit);
        Ok(limit)
    }
}
