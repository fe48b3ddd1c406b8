use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use cache_api::CacheStore;

/// Periodically run `CacheStore::delete` for one topic until `token` is
/// cancelled. Failed passes are logged and retried on the next tick.
pub fn spawn_compaction(
    topic: String,
    cache: Arc<dyn CacheStore>,
    every: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately; nothing can have expired yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = token.cancelled() => break,
            }

            match cache.delete(&topic).await {
                Ok(c) if c.is_noop() => {
                    tracing::debug!(topic = %topic, "no expired entries");
                }
                Ok(c) => {
                    tracing::info!(
                        topic = %topic,
                        expired = c.expired,
                        evicted = c.evicted,
                        range = ?c.range,
                        "compacted expired entries"
                    );
                }
                Err(e) => {
                    tracing::error!(topic = %topic, error = ?e, "compaction failed");
                }
            }
        }
        tracing::debug!(topic = %topic, "compaction stopped");
    })
}

#[cfg(test)]
mod tests {
    use storage_memory::MemoryCacheStore;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn evicts_expired_entries_on_schedule() {
        let cache = Arc::new(MemoryCacheStore::new(Duration::from_secs(10)));
        for offset in 10..20 {
            cache.create("t", &offset.to_string(), offset).await.unwrap();
        }
        let token = CancellationToken::new();
        let handle = spawn_compaction("t".into(), cache.clone(), Duration::from_secs(3), token.clone());

        // Ticks at 3, 6, 9: nothing expired yet.
        tokio::time::sleep(Duration::from_secs(9) + Duration::from_millis(500)).await;
        assert_eq!(cache.read("t", 0).await.unwrap().len(), 10);

        // Tick at 12 evicts the batch that expired at 10.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(cache.read("t", 0).await.unwrap().is_empty());

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_cancel() {
        let cache = Arc::new(MemoryCacheStore::new(Duration::from_secs(1)));
        let token = CancellationToken::new();
        let handle = spawn_compaction("t".into(), cache, Duration::from_secs(60), token.clone());

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
