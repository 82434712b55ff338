//! Quarantine table for misbehaving backends
//!
//! Backends that trip a quarantine rule are excluded from selection until
//! their entry expires. Expired entries are semantically absent immediately;
//! the eviction loop only reclaims the memory.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::time::interval;
use tracing::{debug, trace};

/// Concurrent map from backend URL to quarantine expiry
#[derive(Debug, Default)]
pub struct BanTable {
    entries: DashMap<String, Instant>,
}

impl BanTable {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Quarantine a backend until now + `duration`.
    ///
    /// Overwrites any existing entry unconditionally, even when the new
    /// expiry is earlier than the old one.
    pub fn ban(&self, url: &str, duration: Duration) {
        self.entries.insert(url.to_string(), Instant::now() + duration);
    }

    /// Check whether a backend is currently quarantined.
    ///
    /// Correct regardless of whether the eviction loop is running: an
    /// expired entry counts as absent even before it is removed.
    pub fn is_banned(&self, url: &str) -> bool {
        self.entries
            .get(url)
            .map(|expiry| Instant::now() < *expiry)
            .unwrap_or(false)
    }

    /// Number of entries physically present, including expired ones
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove entries whose expiry has passed
    fn evict_expired(&self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, expiry| *expiry > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(removed, "evicted expired quarantine entries");
        }
    }

    /// Launch the background sweeper, waking every `interval` to reclaim
    /// expired entries. Runs for the lifetime of the process.
    pub fn start_eviction_loop(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let table = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // skip the immediate tick
            loop {
                ticker.tick().await;
                trace!("quarantine eviction sweep");
                table.evict_expired();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_ban_and_is_banned_expiry() {
        let table = BanTable::new();
        let url = "http://a.example";

        table.ban(url, Duration::from_millis(100));
        assert!(table.is_banned(url));

        sleep(Duration::from_millis(120)).await;
        assert!(!table.is_banned(url));
        // Expired but not yet swept: entry is still physically present.
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_is_banned_unknown_url() {
        let table = BanTable::new();
        assert!(!table.is_banned("http://never-seen.example"));
    }

    #[tokio::test]
    async fn test_ban_overwrite_is_last_write_wins() {
        let table = BanTable::new();
        let url = "http://a.example";

        // A shorter second ban overwrites the longer first one.
        table.ban(url, Duration::from_secs(60));
        table.ban(url, Duration::from_millis(50));
        assert!(table.is_banned(url));

        sleep(Duration::from_millis(80)).await;
        assert!(!table.is_banned(url));

        // And a longer second ban extends the exclusion.
        table.ban(url, Duration::from_millis(20));
        table.ban(url, Duration::from_secs(60));
        sleep(Duration::from_millis(50)).await;
        assert!(table.is_banned(url));
    }

    #[tokio::test]
    async fn test_eviction_loop_removes_expired_entries() {
        let table = Arc::new(BanTable::new());
        table.start_eviction_loop(Duration::from_millis(50));

        table.ban("http://a.example", Duration::from_millis(30));
        table.ban("http://b.example", Duration::from_secs(60));
        assert_eq!(table.len(), 2);

        sleep(Duration::from_millis(150)).await;
        assert!(!table.is_banned("http://a.example"));
        assert!(table.is_banned("http://b.example"));
        // The sweeper reclaimed only the expired entry.
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_bans_and_reads() {
        let table = Arc::new(BanTable::new());
        let mut handles = Vec::new();

        for i in 0..50 {
            let table = Arc::clone(&table);
            handles.push(tokio::spawn(async move {
                let url = format!("http://backend-{}.example", i % 5);
                table.ban(&url, Duration::from_secs(30));
                assert!(table.is_banned(&url));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(table.len(), 5);
    }
}
