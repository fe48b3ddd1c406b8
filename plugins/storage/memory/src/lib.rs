use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use cache_api::{eviction_range, CacheStore, Compaction, StoreError};

// ═══════════════════════════════════════════════════════════════
//  TopicCache
// ═══════════════════════════════════════════════════════════════

/// Два "sorted set'а" одного topic'а.
#[derive(Default)]
struct TopicCache {
    /// Основной набор: (offset, payload). Как и в Redis, одинаковые
    /// payload'ы с разными offset'ами — разные элементы, а порядок при
    /// равном offset'е лексикографический.
    entries: BTreeSet<(i64, String)>,
    /// TTL-индекс: offset → expires_at. Повторная запись того же offset'а
    /// передвигает срок, как ZADD для существующего member'а.
    ttl: HashMap<i64, Instant>,
}

// ═══════════════════════════════════════════════════════════════
//  MemoryCacheStore
// ═══════════════════════════════════════════════════════════════

/// In-memory `CacheStore`. Для локального запуска без Redis и для тестов.
///
/// Время берётся из `tokio::time::Instant`, поэтому TTL-окно
/// управляется через `tokio::time::pause()/advance()`.
pub struct MemoryCacheStore {
    topics: RwLock<HashMap<String, TopicCache>>,
    window: Duration,
}

impl MemoryCacheStore {
    pub fn new(window: Duration) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Количество записей в основном наборе topic'а (включая истёкшие,
    /// но ещё не вычищенные).
    pub async fn len(&self, topic: &str) -> usize {
        self.topics
            .read()
            .await
            .get(topic)
            .map_or(0, |t| t.entries.len())
    }
}

impl CacheStore for MemoryCacheStore {
    fn create(
        &self,
        topic: &str,
        payload: &str,
        offset: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let topic = topic.to_string();
        let payload = payload.to_string();
        Box::pin(async move {
            let mut topics = self.topics.write().await;
            let cache = topics.entry(topic).or_default();
            cache.entries.insert((offset, payload));
            cache.ttl.insert(offset, Instant::now() + self.window);
            Ok(())
        })
    }

    fn read(
        &self,
        topic: &str,
        from_offset: i64,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, StoreError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let topics = self.topics.read().await;
            let Some(cache) = topics.get(&topic) else {
                return Ok(Vec::new());
            };
            let result: Vec<String> = cache
                .entries
                .range((from_offset, String::new())..)
                .map(|(_, payload)| payload.clone())
                .collect();
            tracing::debug!(topic = %topic, offset = from_offset, count = result.len(), "read cached entries");
            Ok(result)
        })
    }

    fn delete(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Compaction, StoreError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let now = Instant::now();
            let mut topics = self.topics.write().await;
            let Some(cache) = topics.get_mut(&topic) else {
                return Ok(Compaction::default());
            };

            let expired: Vec<i64> = cache
                .ttl
                .iter()
                .filter(|(_, expires_at)| **expires_at <= now)
                .map(|(offset, _)| *offset)
                .collect();
            let Some((min, max)) = eviction_range(&expired) else {
                return Ok(Compaction::default());
            };

            for offset in &expired {
                cache.ttl.remove(offset);
            }

            let before = cache.entries.len();
            cache.entries.retain(|(offset, _)| *offset < min || *offset > max);
            let evicted = before - cache.entries.len();

            Ok(Compaction {
                expired: expired.len(),
                evicted,
                range: Some((min, max)),
            })
        })
    }
}
