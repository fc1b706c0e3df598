// =============================================================================
// Local TTL-Tier Cache
// =============================================================================
//
// A process-wide map of key -> (value, insertion_instant). The crate runs on
// a multithreaded tokio runtime (`#[tokio::main]`, as the teacher's main.rs
// sets up), so read-modify-write access is guarded by a short parking_lot
// mutex rather than relying on single-threaded cooperative access.
//
// Entries are lazily pruned on read when expired; there is no background
// sweep, matching the shared cache adapter's "lazily pruned" contract.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Entry {
    value: String,
    inserted_at: Instant,
    ttl: Duration,
}

pub struct LocalTier {
    entries: Mutex<HashMap<String, Entry>>,
}

impl LocalTier {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.get_with_age(key).map(|(value, _)| value)
    }

    /// Same lookup as `get`, plus how long ago the entry was stored. Used by
    /// callers that need to report data freshness (e.g. "this snapshot is 3
    /// minutes old") rather than just its content.
    pub fn get_with_age(&self, key: &str) -> Option<(String, Duration)> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < entry.ttl => {
                Some((entry.value.clone(), entry.inserted_at.elapsed()))
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: String, value: String, ttl: Duration) {
        self.entries.lock().insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    pub fn delete(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LocalTier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let tier = LocalTier::new();
        tier.set("k".into(), "v".into(), Duration::from_secs(5));
        assert_eq!(tier.get("k"), Some("v".to_string()));
    }

    #[test]
    fn expired_entry_is_pruned_on_read() {
        let tier = LocalTier::new();
        tier.set("k".into(), "v".into(), Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(tier.get("k"), None);
        assert!(tier.is_empty());
    }

    #[test]
    fn get_with_age_reports_elapsed_time() {
        let tier = LocalTier::new();
        tier.set("k".into(), "v".into(), Duration::from_secs(5));
        std::thread::sleep(Duration::from_millis(20));
        let (value, age) = tier.get_with_age("k").unwrap();
        assert_eq!(value, "v");
        assert!(age >= Duration::from_millis(20));
    }

    #[test]
    fn missing_key_returns_none() {
        let tier = LocalTier::new();
        assert_eq!(tier.get("nope"), None);
    }

    #[test]
    fn delete_removes_entry() {
        let tier = LocalTier::new();
        tier.set("k".into(), "v".into(), Duration::from_secs(5));
        tier.delete("k");
        assert_eq!(tier.get("k"), None);
    }
}
