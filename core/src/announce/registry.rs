//! In-memory registry of observed peer announces.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::debug;

use crate::runtime::{AnnounceObserver, DestinationHash};

use super::payload;

/// One observed announce, keyed by destination hash.
#[derive(Debug, Clone, Serialize)]
pub struct AnnounceEntry {
    /// Announced destination hash, hex-encoded.
    pub destination_hash_hex: String,
    /// Display name extracted from the announce app-data, possibly empty.
    pub display_name: String,
    /// Unix seconds of the most recent observation.
    pub last_seen: u64,
    /// Length of the observed app-data in bytes.
    pub app_data_len: usize,
}

/// Registry of observed announces. Unbounded; most-recent-write-wins per
/// destination. Callers that need a cap apply it on the snapshot.
#[derive(Debug, Default)]
pub struct AnnounceRegistry {
    entries: Mutex<HashMap<String, AnnounceEntry>>,
}

impl AnnounceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an announce, replacing any previous entry for the same
    /// destination.
    pub fn record(&self, entry: AnnounceEntry) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(entry.destination_hash_hex.clone(), entry);
    }

    /// Copy of all entries sorted by last-seen, newest first. The copy is
    /// taken under the lock; sorting happens outside it.
    pub fn snapshot(&self) -> Vec<AnnounceEntry> {
        let mut entries: Vec<AnnounceEntry> = {
            let guard = self.entries.lock().unwrap();
            guard.values().cloned().collect()
        };
        entries.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        entries
    }

    /// Number of distinct destinations observed.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether no announces have been observed.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

/// Announce observer feeding the registry.
pub(crate) struct RegistryObserver {
    registry: Arc<AnnounceRegistry>,
}

impl RegistryObserver {
    pub(crate) fn new(registry: Arc<AnnounceRegistry>) -> Self {
        Self { registry }
    }
}

impl AnnounceObserver for RegistryObserver {
    fn received_announce(&self, destination: DestinationHash, app_data: &[u8]) {
        let dest_hex = hex::encode(destination);
        let display_name = payload::display_name_from_app_data(app_data);
        if display_name.is_empty() {
            debug!(dest = %dest_hex, "announce rx");
        } else {
            debug!(dest = %dest_hex, name = %display_name, "announce rx");
        }
        self.registry.record(AnnounceEntry {
            destination_hash_hex: dest_hex,
            display_name,
            last_seen: unix_now(),
            app_data_len: app_data.len(),
        });
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hash: &str, seen: u64) -> AnnounceEntry {
        AnnounceEntry {
            destination_hash_hex: hash.to_string(),
            display_name: String::new(),
            last_seen: seen,
            app_data_len: 0,
        }
    }

    #[test]
    fn test_record_and_snapshot_sorted() {
        let registry = AnnounceRegistry::new();
        registry.record(entry("aa", 10));
        registry.record(entry("bb", 30));
        registry.record(entry("cc", 20));

        let snapshot = registry.snapshot();
        let order: Vec<&str> = snapshot
            .iter()
            .map(|e| e.destination_hash_hex.as_str())
            .collect();
        assert_eq!(order, vec!["bb", "cc", "aa"]);
    }

    #[test]
    fn test_most_recent_write_wins() {
        let registry = AnnounceRegistry::new();
        registry.record(entry("aa", 10));
        let mut updated = entry("aa", 50);
        updated.display_name = "Alice".into();
        registry.record(updated);

        assert_eq!(registry.len(), 1);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].last_seen, 50);
        assert_eq!(snapshot[0].display_name, "Alice");
    }

    #[test]
    fn test_observer_decodes_display_name() {
        let registry = Arc::new(AnnounceRegistry::new());
        let observer = RegistryObserver::new(registry.clone());

        let app_data = payload::compose_app_data("Alice", None, None);
        observer.received_announce([7u8; 16], &app_data);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].display_name, "Alice");
        assert_eq!(snapshot[0].destination_hash_hex, hex::encode([7u8; 16]));
        assert_eq!(snapshot[0].app_data_len, app_data.len());
    }
}
