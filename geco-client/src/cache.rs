//! Cache of the last config block read from the device.

use std::time::Duration;
use tokio::time::Instant;

/// Default maximum age of a cached block before a write requires a fresh read.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct Entry {
    raw: Vec<u8>,
    stored_at: Instant,
}

/// The raw config block a read-modify-write starts from.
///
/// Owned by the client's exchange state, so it is only touched while the
/// exchange lock is held.
#[derive(Debug, Clone)]
pub struct ConfigWriteCache {
    entry: Option<Entry>,
    max_age: Duration,
}

impl ConfigWriteCache {
    pub fn new(max_age: Duration) -> Self {
        Self {
            entry: None,
            max_age,
        }
    }

    /// Replaces the cached block.
    pub fn store(&mut self, raw: Vec<u8>) {
        self.entry = Some(Entry {
            raw,
            stored_at: Instant::now(),
        });
    }

    /// Returns the cached block if it is fresh enough to write from.
    pub fn usable(&self) -> Option<&[u8]> {
        self.entry
            .as_ref()
            .filter(|entry| entry.stored_at.elapsed() <= self.max_age)
            .map(|entry| entry.raw.as_slice())
    }

    /// Returns the cached block regardless of age.
    pub fn raw(&self) -> Option<&[u8]> {
        self.entry.as_ref().map(|entry| entry.raw.as_slice())
    }

    pub fn age(&self) -> Option<Duration> {
        self.entry.as_ref().map(|entry| entry.stored_at.elapsed())
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }
}

impl Default for ConfigWriteCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_staleness() {
        let mut cache = ConfigWriteCache::new(Duration::from_secs(60));
        assert!(cache.usable().is_none());

        cache.store(vec![1, 2, 3]);
        assert_eq!(cache.usable(), Some(&[1u8, 2, 3][..]));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.usable().is_none());
        // Still available for diagnostics.
        assert_eq!(cache.raw(), Some(&[1u8, 2, 3][..]));
        assert!(cache.age().unwrap() >= Duration::from_secs(61));

        cache.store(vec![4]);
        assert_eq!(cache.usable(), Some(&[4u8][..]));
    }

    #[test]
    fn test_clear() {
        let mut cache = ConfigWriteCache::default();
        assert_eq!(cache.max_age(), DEFAULT_MAX_AGE);
        cache.store(vec![0; 100]);
        cache.clear();
        assert!(cache.raw().is_none());
    }
}
