//! Click tracking, trending offers and the referral leaderboard.

use crate::keys::Keyspace;
use crate::store::{SharedStore, StoreResult};

/// Ranking counters over the shared store.
#[derive(Clone)]
pub struct Rankings {
    store: SharedStore,
    keys: Keyspace,
}

impl std::fmt::Debug for Rankings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rankings")
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl Rankings {
    /// Create ranking counters.
    #[must_use]
    pub const fn new(store: SharedStore, keys: Keyspace) -> Self {
        Self { store, keys }
    }

    /// Count a click on `entity_id` and bump it in the trending ranking.
    ///
    /// `viewer_id`, when given, is added to the entity's viewer set.
    ///
    /// # Errors
    ///
    /// Returns a store error if any counter cannot be updated.
    pub async fn track_click(&self, entity_id: &str, viewer_id: Option<&str>) -> StoreResult<()> {
        self.store.incr(&self.keys.offer_clicks(entity_id), 1).await?;
        self.store
            .zincrby(&self.keys.trending(), entity_id, 1.0)
            .await?;
        if let Some(viewer) = viewer_id {
            self.store
                .sadd(&self.keys.offer_viewers(entity_id), viewer)
                .await?;
        }
        Ok(())
    }

    /// Up to `n` entity ids by descending click score.
    ///
    /// # Errors
    ///
    /// Returns a store error if the ranking cannot be read.
    pub async fn trending_top(&self, n: usize) -> StoreResult<Vec<String>> {
        Ok(self
            .store
            .zrevrange_withscores(&self.keys.trending(), n)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    /// Add `delta` (which may be fractional or negative) to `entity_id` on
    /// the leaderboard; returns the new score.
    ///
    /// # Errors
    ///
    /// Returns a store error if the score cannot be updated.
    pub async fn leaderboard_increment(&self, entity_id: &str, delta: f64) -> StoreResult<f64> {
        self.store
            .zincrby(&self.keys.leaderboard(), entity_id, delta)
            .await
    }

    /// Up to `n` `(entity_id, score)` pairs by descending score.
    ///
    /// # Errors
    ///
    /// Returns a store error if the leaderboard cannot be read.
    pub async fn leaderboard_top(&self, n: usize) -> StoreResult<Vec<(String, f64)>> {
        self.store
            .zrevrange_withscores(&self.keys.leaderboard(), n)
            .await
    }

    /// Total clicks recorded for `entity_id`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the counter cannot be read.
    pub async fn click_count(&self, entity_id: &str) -> StoreResult<u64> {
        Ok(self
            .store
            .get(&self.keys.offer_clicks(entity_id))
            .await?
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(0))
    }

    /// Distinct viewers recorded for `entity_id`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the set cannot be read.
    pub async fn viewer_count(&self, entity_id: &str) -> StoreResult<u64> {
        self.store.scard(&self.keys.offer_viewers(entity_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn rankings() -> Rankings {
        Rankings::new(Arc::new(MemoryStore::new()), Keyspace::root())
    }

    #[tokio::test]
    async fn test_track_click_updates_counters() {
        let rankings = rankings();
        rankings.track_click("7", Some("u1")).await.unwrap();
        rankings.track_click("7", Some("u1")).await.unwrap();
        rankings.track_click("7", Some("u2")).await.unwrap();
        rankings.track_click("7", None).await.unwrap();

        assert_eq!(rankings.click_count("7").await.unwrap(), 4);
        assert_eq!(rankings.viewer_count("7").await.unwrap(), 2);
        assert_eq!(rankings.click_count("8").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_trending_is_descending() {
        let rankings = rankings();
        for (offer, clicks) in [("a", 1), ("b", 3), ("c", 2)] {
            for _ in 0..clicks {
                rankings.track_click(offer, None).await.unwrap();
            }
        }

        assert_eq!(rankings.trending_top(2).await.unwrap(), vec!["b", "c"]);
        assert_eq!(rankings.trending_top(10).await.unwrap(), vec!["b", "c", "a"]);
        assert!(rankings.trending_top(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_leaderboard_accumulates_arbitrary_deltas() {
        let rankings = rankings();
        rankings.leaderboard_increment("alice", 150.0).await.unwrap();
        rankings.leaderboard_increment("bob", 99.5).await.unwrap();
        let total = rankings.leaderboard_increment("bob", 75.0).await.unwrap();
        assert!((total - 174.5).abs() < f64::EPSILON);

        let top = rankings.leaderboard_top(5).await.unwrap();
        assert_eq!(top[0].0, "bob");
        assert_eq!(top[1], ("alice".to_string(), 150.0));
        assert!(rankings.leaderboard_top(0).await.unwrap().is_empty());
    }
}
