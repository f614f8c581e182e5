use crate::store::{load_or_default, save_logged, SharedStore};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Persisted form of the ledger: item id to `true`.
///
/// Values are not interpreted, so a stray non-boolean entry still counts as seen.
pub type LedgerMap = BTreeMap<String, Value>;

/// Ids of items already marked as seen.
///
/// One lock covers both the in-memory set and its persistence, so marking an
/// item and reconciling after a refresh never interleave.
pub struct SeenLedger {
    seen: Mutex<HashSet<String>>,
    store: SharedStore<LedgerMap>,
}

/// Ledger state right after reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub seen: HashSet<String>,
    pub pruned: usize,
}

impl SeenLedger {
    pub fn load(store: SharedStore<LedgerMap>) -> Self {
        let stored: LedgerMap = load_or_default(store.as_ref(), "viewed items");
        // presence is the signal, the stored value is not consulted
        let seen: HashSet<String> = stored.into_keys().collect();
        debug!("Loaded {} viewed items", seen.len());

        Self {
            seen: Mutex::new(seen),
            store,
        }
    }

    /// Record `id` as seen and persist right away. Returns false if it was already seen.
    pub async fn mark_seen(&self, id: &str) -> bool {
        if id.is_empty() {
            warn!("Ignoring mark-seen without an item id");
            return false;
        }

        let mut seen = self.seen.lock().await;
        if !seen.insert(id.to_string()) {
            return false;
        }
        save_logged(&self.store, to_map(&seen), "viewed items").await;
        info!("Marked as viewed: {}", id);
        true
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.seen.lock().await.contains(id)
    }

    pub async fn len(&self) -> usize {
        self.seen.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.seen.lock().await.is_empty()
    }

    /// Seen ids in sorted order.
    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.seen.lock().await.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Drop every id that is not in `universe`, persisting only if something changed.
    pub async fn reconcile(&self, universe: &HashSet<String>) -> Reconciled {
        let mut seen = self.seen.lock().await;
        let kept = intersect(&seen, universe);
        let pruned = seen.len() - kept.len();

        if pruned > 0 {
            info!("Pruning viewed list: removed {} old entries", pruned);
            save_logged(&self.store, to_map(&kept), "viewed items").await;
            *seen = kept;
        }

        Reconciled {
            seen: seen.clone(),
            pruned,
        }
    }
}

/// Ledger ids that still appear in the fetched universe.
pub fn intersect(seen: &HashSet<String>, universe: &HashSet<String>) -> HashSet<String> {
    seen.intersection(universe).cloned().collect()
}

fn to_map(seen: &HashSet<String>) -> LedgerMap {
    seen.iter().map(|id| (id.clone(), Value::Bool(true))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use interfaces::memory::MemoryStore;
    use std::sync::Arc;

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn stored(ids: &[&str]) -> LedgerMap {
        ids.iter().map(|id| (id.to_string(), Value::Bool(true))).collect()
    }

    #[test]
    fn intersect_keeps_only_shared_ids() {
        assert_eq!(intersect(&set(&["a", "b", "z"]), &set(&["a", "b", "c"])), set(&["a", "b"]));
        assert!(intersect(&set(&["a"]), &set(&[])).is_empty());
        assert!(intersect(&set(&[]), &set(&["a"])).is_empty());
    }

    #[tokio::test]
    async fn mark_seen_persists_immediately_once() {
        let store = Arc::new(MemoryStore::<LedgerMap>::new());
        let ledger = SeenLedger::load(store.clone());

        assert!(ledger.mark_seen("a").await);
        assert_eq!(store.value(), Some(stored(&["a"])));
        assert!(!ledger.mark_seen("a").await);
        assert!(!ledger.mark_seen("").await);
        assert_eq!(store.saves(), 1);
        assert!(ledger.contains("a").await);
    }

    #[tokio::test]
    async fn reconcile_prunes_stale_ids_and_persists() {
        let store = Arc::new(MemoryStore::with_value(stored(&["a", "z"])));
        let ledger = SeenLedger::load(store.clone());

        let reconciled = ledger.reconcile(&set(&["a", "b"])).await;

        assert_eq!(reconciled.seen, set(&["a"]));
        assert_eq!(reconciled.pruned, 1);
        assert_eq!(store.value(), Some(stored(&["a"])));
        assert_eq!(ledger.ids().await, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn reconcile_without_changes_does_not_write() {
        let store = Arc::new(MemoryStore::with_value(stored(&["a"])));
        let ledger = SeenLedger::load(store.clone());

        let reconciled = ledger.reconcile(&set(&["a", "b"])).await;

        assert_eq!(reconciled.pruned, 0);
        assert_eq!(store.saves(), 0);
    }

    #[tokio::test]
    async fn non_boolean_values_still_mark_ids_seen() {
        let mut raw = LedgerMap::new();
        raw.insert("a".to_string(), Value::from(1));
        raw.insert("b".to_string(), Value::Null);
        let store = Arc::new(MemoryStore::with_value(raw));
        let ledger = SeenLedger::load(store.clone());

        assert!(ledger.contains("a").await);
        assert!(ledger.contains("b").await);

        ledger.reconcile(&set(&["a"])).await;
        assert_eq!(store.value(), Some(stored(&["a"])));
    }

    #[tokio::test]
    async fn failed_save_keeps_in_memory_state() {
        let store = Arc::new(MemoryStore::<LedgerMap>::new());
        store.set_read_only(true);
        let ledger = SeenLedger::load(store.clone());

        assert!(ledger.mark_seen("a").await);
        assert!(ledger.contains("a").await);
        assert_eq!(store.value(), None);
    }
}
