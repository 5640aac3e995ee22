//! In-process cache of the card listing.
//!
//! Owned by the `Catalog` that fills it; every write path through the catalog
//! invalidates it. A listing fetched before an invalidation is never stored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::models::Card;

struct Snapshot {
    taken_at: Instant,
    cards: Vec<Card>,
}

pub struct ListCache {
    ttl: Duration,
    /// Bumped by every invalidation.
    generation: AtomicU64,
    slot: RwLock<Option<Snapshot>>,
}

impl ListCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            generation: AtomicU64::new(0),
            slot: RwLock::new(None),
        }
    }

    /// Returns the cached listing if it is younger than the TTL.
    pub async fn get(&self) -> Option<Vec<Card>> {
        let slot = self.slot.read().await;
        slot.as_ref()
            .filter(|snap| snap.taken_at.elapsed() < self.ttl)
            .map(|snap| snap.cards.clone())
    }

    /// Read before fetching a listing and hand it back to `put`.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Stores `cards` unless an invalidation happened since `generation` was
    /// read. Returns whether the snapshot was kept.
    pub async fn put(&self, generation: u64, cards: Vec<Card>) -> bool {
        let mut slot = self.slot.write().await;
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        *slot = Some(Snapshot {
            taken_at: Instant::now(),
            cards,
        });
        true
    }

    pub async fn invalidate(&self) {
        let mut slot = self.slot.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        *slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_invalidate() {
        let cache = ListCache::new(Duration::from_secs(60));
        assert!(cache.get().await.is_none());

        assert!(cache.put(cache.generation(), Vec::new()).await);
        assert_eq!(cache.get().await.map(|c| c.len()), Some(0));

        cache.invalidate().await;
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_never_hits() {
        let cache = ListCache::new(Duration::ZERO);
        cache.put(cache.generation(), Vec::new()).await;
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn test_listing_fetched_before_invalidation_is_dropped() {
        let cache = ListCache::new(Duration::from_secs(60));
        let before = cache.generation();

        cache.invalidate().await;
        assert!(!cache.put(before, Vec::new()).await);
        assert!(cache.get().await.is_none());

        assert!(cache.put(cache.generation(), Vec::new()).await);
        assert!(cache.get().await.is_some());
    }
}
