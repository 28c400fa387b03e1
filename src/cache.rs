//! Process-local metadata cache behind a capability trait, so a distributed
//! cache can later back the registry without touching call sites.

use dashmap::DashMap;
use serde_json::Value;
use std::time::{Duration, Instant};

/// Get/set/delete by string key. Values are JSON so callers stay agnostic
/// of what the backing store can hold.
pub trait MetadataCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&self, key: &str, value: Value);
    fn delete(&self, key: &str);
    fn delete_prefix(&self, prefix: &str);
}

/// In-memory TTL cache. Entries expire `ttl` after insertion; expired
/// entries are dropped on read.
pub struct TtlCache {
    entries: DashMap<String, (Value, Instant)>,
    ttl: Duration,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }
}

impl MetadataCache for TtlCache {
    fn get(&self, key: &str) -> Option<Value> {
        let expired = match self.entries.get(key) {
            Some(entry) => {
                if entry.value().1.elapsed() < self.ttl {
                    return Some(entry.value().0.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    fn set(&self, key: &str, value: Value) {
        self.entries
            .insert(key.to_string(), (value, Instant::now()));
    }

    fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    fn delete_prefix(&self, prefix: &str) {
        self.entries.retain(|k, _| !k.starts_with(prefix));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_get_roundtrip() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set("a", json!({"x": 1}));
        assert_eq!(cache.get("a"), Some(json!({"x": 1})));
        assert_eq!(cache.get("b"), None);
    }

    #[test]
    fn zero_ttl_expires_immediately() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.set("a", json!(1));
        assert_eq!(cache.get("a"), None);
    }

    #[test]
    fn delete_and_prefix_delete() {
        let cache = TtlCache::new(Duration::from_secs(60));
        cache.set("count:products:", json!(3));
        cache.set("count:products:qty > 1", json!(1));
        cache.set("count:orders:", json!(9));
        cache.delete_prefix("count:products:");
        assert_eq!(cache.get("count:products:"), None);
        assert_eq!(cache.get("count:products:qty > 1"), None);
        assert_eq!(cache.get("count:orders:"), Some(json!(9)));

        cache.delete("count:orders:");
        assert_eq!(cache.get("count:orders:"), None);
    }
}
