//! Sample store holding the latest value of every topic.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

/// The last accepted value for a topic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// The gauge value.
    pub value: f64,
    /// When the value was written.
    pub observed_at: Instant,
}

impl Sample {
    /// Check if this sample is stale at `now`.
    ///
    /// Samples written after `now` count as fresh.
    pub fn is_stale(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.observed_at) >= window
    }
}

/// Store statistics.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Total samples written.
    pub writes: u64,
    /// Samples removed because they went stale.
    pub evictions: u64,
}

/// Thread-safe topic → sample table.
///
/// Topics are kept ordered so snapshots come out sorted by name. Both mutating
/// operations hold the write lock for their whole duration, so a topic is
/// either exported or evicted by exactly one caller.
#[derive(Default)]
pub struct SampleStore {
    samples: RwLock<BTreeMap<String, Sample>>,
    stats: RwLock<StoreStats>,
}

impl SampleStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the sample for `topic`.
    pub fn write(&self, topic: &str, value: f64, now: Instant) {
        let sample = Sample {
            value,
            observed_at: now,
        };

        {
            let mut samples = self.samples.write();
            match samples.get_mut(topic) {
                Some(existing) => *existing = sample,
                None => {
                    samples.insert(topic.to_string(), sample);
                }
            }
        }

        self.stats.write().writes += 1;
    }

    /// Return every fresh `(topic, value)` in topic order, removing stale topics.
    pub fn snapshot_and_evict(&self, now: Instant, window: Duration) -> Vec<(String, f64)> {
        let mut samples = self.samples.write();
        let mut evicted = 0u64;

        samples.retain(|topic, sample| {
            if sample.is_stale(now, window) {
                debug!(topic = %topic, "Purging stale topic");
                evicted += 1;
                false
            } else {
                true
            }
        });

        let snapshot = samples
            .iter()
            .map(|(topic, sample)| (topic.clone(), sample.value))
            .collect();
        drop(samples);

        if evicted > 0 {
            self.stats.write().evictions += evicted;
        }

        snapshot
    }

    /// Remove stale topics without producing a snapshot.
    pub fn evict_stale(&self, now: Instant, window: Duration) -> usize {
        let mut samples = self.samples.write();
        let before = samples.len();

        samples.retain(|_, sample| !sample.is_stale(now, window));

        let removed = before - samples.len();

        if removed > 0 {
            debug!(
                removed,
                remaining = samples.len(),
                "Cleaned up stale topics"
            );
            drop(samples);
            self.stats.write().evictions += removed as u64;
        }

        removed
    }

    /// Look up the current sample for a topic.
    pub fn get(&self, topic: &str) -> Option<Sample> {
        self.samples.read().get(topic).copied()
    }

    /// All stored topics in order.
    pub fn topics(&self) -> Vec<String> {
        self.samples.read().keys().cloned().collect()
    }

    /// Number of stored topics.
    pub fn len(&self) -> usize {
        self.samples.read().len()
    }

    /// Check if no topics are stored.
    pub fn is_empty(&self) -> bool {
        self.samples.read().is_empty()
    }

    /// Get store statistics.
    pub fn stats(&self) -> StoreStats {
        self.stats.read().clone()
    }
}

/// Create a shareable store handle.
pub type SharedStore = Arc<SampleStore>;

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(150);

    #[test]
    fn test_write_overwrites() {
        let store = SampleStore::new();
        let t1 = Instant::now();
        let t2 = t1 + Duration::from_secs(1);

        store.write("sensor/temp", 20.0, t1);
        store.write("sensor/temp", 21.5, t2);

        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get("sensor/temp"),
            Some(Sample {
                value: 21.5,
                observed_at: t2
            })
        );
        assert_eq!(store.stats().writes, 2);
    }

    #[test]
    fn test_snapshot_sorted() {
        let store = SampleStore::new();
        let now = Instant::now();

        store.write("b/1", 1.0, now);
        store.write("a/2", 2.0, now);
        store.write("c/0", 0.0, now);

        let snapshot = store.snapshot_and_evict(now, WINDOW);
        let topics: Vec<&str> = snapshot.iter().map(|(t, _)| t.as_str()).collect();

        assert_eq!(topics, vec!["a/2", "b/1", "c/0"]);
    }

    #[test]
    fn test_eviction_boundary() {
        let store = SampleStore::new();
        let start = Instant::now();

        store.write("fresh", 1.0, start);
        store.write("edge", 2.0, start);

        let almost = start + WINDOW - Duration::from_millis(1);
        let snapshot = store.snapshot_and_evict(almost, WINDOW);
        assert_eq!(snapshot.len(), 2);

        store.write("fresh", 3.0, start + WINDOW);
        let snapshot = store.snapshot_and_evict(start + WINDOW, WINDOW);

        assert_eq!(snapshot, vec![("fresh".to_string(), 3.0)]);
        assert!(store.get("edge").is_none());
        assert_eq!(store.stats().evictions, 1);

        let snapshot = store.snapshot_and_evict(start + WINDOW, WINDOW);
        assert!(snapshot.iter().all(|(t, _)| t != "edge"));
    }

    #[test]
    fn test_future_write_counts_as_fresh() {
        let store = SampleStore::new();
        let now = Instant::now();

        store.write("late", 5.0, now + Duration::from_secs(10));

        assert_eq!(
            store.snapshot_and_evict(now, WINDOW),
            vec![("late".to_string(), 5.0)]
        );
    }

    #[test]
    fn test_evict_stale() {
        let store = SampleStore::new();
        let start = Instant::now();

        store.write("old", 1.0, start);
        store.write("new", 1.0, start + Duration::from_secs(100));

        assert_eq!(store.evict_stale(start + WINDOW, WINDOW), 1);
        assert_eq!(store.topics(), vec!["new".to_string()]);
        assert_eq!(store.evict_stale(start + WINDOW, WINDOW), 0);
    }

    #[test]
    fn test_empty_store() {
        let store = SampleStore::new();

        assert!(store.is_empty());
        assert!(store.snapshot_and_evict(Instant::now(), WINDOW).is_empty());
    }

    #[test]
    fn test_concurrent_writers_distinct_topics() {
        let store = Arc::new(SampleStore::new());
        let writers = 8;
        let start = Arc::new(std::sync::Barrier::new(writers));
        let now = Instant::now();

        let handles: Vec<_> = (0..writers)
            .map(|i| {
                let store = store.clone();
                let start = start.clone();
                std::thread::spawn(move || {
                    start.wait();
                    for j in 0..200 {
                        store.write(&format!("w{i}/t{j:03}"), 0.0, now);
                        store.write(&format!("w{i}/t{j:03}"), (i * 1000 + j) as f64, now);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = store.snapshot_and_evict(now, WINDOW);
        assert_eq!(snapshot.len(), writers * 200);
        assert_eq!(store.stats().writes, (writers * 400) as u64);

        for (topic, value) in snapshot {
            let (w, t) = topic.split_once('/').unwrap();
            let i: usize = w[1..].parse().unwrap();
            let j: usize = t[1..].parse().unwrap();
            assert_eq!(value, (i * 1000 + j) as f64);
        }
    }

    #[test]
    fn test_concurrent_snapshots_evict_once() {
        let store = Arc::new(SampleStore::new());
        let start = Instant::now();

        for i in 0..100 {
            store.write(&format!("topic/{i}"), i as f64, start);
        }

        let later = start + WINDOW;
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.snapshot_and_evict(later, WINDOW))
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().is_empty());
        }

        assert!(store.is_empty());
        assert_eq!(store.stats().evictions, 100);
    }
}
