use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Retained<V> {
    value: V,
    last_seen: Instant,
}

/// Keeps keys visible for `ttl` after they were last upserted.
///
/// Per-key operations are independently safe across threads. A snapshot
/// taken while upserts or sweeps run may or may not include keys touched
/// concurrently, no cross-key consistency is offered.
#[derive(Debug)]
pub struct RetentionRegistry<K: Eq + Hash, V = ()> {
    entries: DashMap<K, Retained<V>>,
    ttl: Duration,
}

impl<K, V> RetentionRegistry<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Records the key as seen at `now`, replacing any stored value
    pub fn upsert(&self, key: K, value: V, now: Instant) {
        self.entries.insert(
            key,
            Retained {
                value,
                last_seen: now,
            },
        );
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Currently retained keys. Cloned out so callers never hold
    /// shard locks while rendering
    pub fn snapshot(&self) -> Vec<K> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Drops every key with `last_seen + ttl < now`, returns how many went
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| !is_stale(entry.last_seen, ttl, now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Strict expiry, an entry exactly `ttl` old is still alive
pub(crate) fn is_stale(last_seen: Instant, ttl: Duration, now: Instant) -> bool {
    last_seen
        .checked_add(ttl)
        .is_some_and(|deadline| now > deadline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(120);

    #[test]
    fn sweep_keeps_fresh_and_future_keys() {
        let registry: RetentionRegistry<&str> = RetentionRegistry::new(TTL);
        let now = Instant::now() + Duration::from_secs(3600);

        registry.upsert("w1", (), now - Duration::from_secs(3600));
        registry.upsert("w2", (), now);
        registry.upsert("w3", (), now + Duration::from_secs(3600));

        assert_eq!(registry.sweep(now), 1);

        let mut keys = registry.snapshot();
        keys.sort();
        assert_eq!(keys, vec!["w2", "w3"]);
    }

    #[test]
    fn expiry_is_strict() {
        let registry: RetentionRegistry<u32> = RetentionRegistry::new(TTL);
        let start = Instant::now();
        registry.upsert(1, (), start);

        assert_eq!(registry.sweep(start + TTL), 0);
        assert!(registry.contains(&1));

        assert_eq!(registry.sweep(start + TTL + Duration::from_millis(1)), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn upsert_refreshes_last_seen() {
        let registry: RetentionRegistry<u32, &str> = RetentionRegistry::new(TTL);
        let start = Instant::now();
        registry.upsert(7, "old", start);
        registry.upsert(7, "new", start + Duration::from_secs(100));

        registry.sweep(start + Duration::from_secs(150));
        assert_eq!(registry.get(&7), Some("new"));
    }

    #[test]
    fn evicted_key_can_return() {
        let registry: RetentionRegistry<u32> = RetentionRegistry::new(TTL);
        let start = Instant::now();
        registry.upsert(1, (), start);
        registry.sweep(start + TTL * 2);
        assert!(!registry.contains(&1));

        registry.upsert(1, (), start + TTL * 3);
        assert_eq!(registry.snapshot(), vec![1]);
    }

    #[test]
    fn concurrent_upsert_and_sweep() {
        let registry: Arc<RetentionRegistry<u32>> = Arc::new(RetentionRegistry::new(TTL));
        let start = Instant::now();

        let writers: Vec<_> = (0..4)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        registry.upsert(t * 1000 + i, (), start);
                    }
                })
            })
            .collect();

        let sweeper = {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    registry.sweep(start);
                    let _ = registry.snapshot();
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        sweeper.join().unwrap();

        assert_eq!(registry.len(), 4000);
    }
}
