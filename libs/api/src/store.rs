use std::future::Future;
use std::pin::Pin;

use crate::{Compaction, StoreError};

// ════════════════════════════════════════════════════════════════
//  Replay Cache
// ════════════════════════════════════════════════════════════════

/// Windowed replay cache: an ordered `(topic, offset) → payload` store
/// with a parallel TTL index.
///
/// Per topic the backend keeps two sorted sets:
/// - the primary set, payloads scored by `offset`;
/// - the TTL index, offsets scored by `expires_at = now + window`.
///
/// Each method must be atomic as a single store operation; nothing is
/// atomic across methods or across the two writes inside `create`.
///
/// Implementations: `storage_memory::MemoryCacheStore`,
/// `storage_redis::RedisCacheStore`.
pub trait CacheStore: Send + Sync {
    /// Insert `payload` into the primary set under `offset`, then add the
    /// offset to the TTL index.
    ///
    /// The writes are independent: if the second one fails the entry is
    /// never evicted. Nothing is rolled back on error.
    fn create(
        &self,
        topic: &str,
        payload: &str,
        offset: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>>;

    /// All payloads with offset `>= from_offset`, ascending, duplicates
    /// included. Does not look at expiry: only compaction removes entries.
    fn read(
        &self,
        topic: &str,
        from_offset: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, StoreError>> + Send + '_>>;

    /// Compaction pass.
    ///
    /// Drops every TTL reference with `expires_at <= now`, then removes
    /// every primary entry in `[min(expired), max(expired)]`. Entries
    /// written into that range after the batch expired are evicted too.
    /// No-op when nothing has expired.
    fn delete(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Compaction, StoreError>> + Send + '_>>;
}

/// Inclusive `[min, max]` of the expired offsets, `None` for an empty batch.
pub fn eviction_range(expired: &[i64]) -> Option<(i64, i64)> {
    let min = expired.iter().copied().min()?;
    let max = expired.iter().copied().max()?;
    Some((min, max))
}
