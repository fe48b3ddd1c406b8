//! Redis-backed `CacheStore`.
//!
//! Layout per topic `T`:
//! - `T` — sorted set, member `"{offset}:{payload}"`, score `offset`;
//! - `T:ttl` — sorted set, member `"{offset}"`, score expiry in Unix ns.
//!
//! The offset prefix keeps equal payloads at different offsets apart
//! (a sorted set would otherwise collapse them into one member).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use redis::aio::MultiplexedConnection;

use cache_api::{
    eviction_range, expires_at_ns, now_ns, with_default_scheme, CacheStore, Compaction,
    StoreError,
};

const ZADD: &str = "ZADD";
const ZRANGEBYSCORE: &str = "ZRANGEBYSCORE";
const ZREMRANGEBYSCORE: &str = "ZREMRANGEBYSCORE";

fn ttl_key(topic: &str) -> String {
    format!("{topic}:ttl")
}

fn encode_member(offset: i64, payload: &str) -> String {
    format!("{offset}:{payload}")
}

fn decode_member(member: &str) -> Result<&str, StoreError> {
    member
        .split_once(':')
        .filter(|(offset, _)| offset.parse::<i64>().is_ok())
        .map(|(_, payload)| payload)
        .ok_or_else(|| StoreError::format_err(format!("cache member without offset prefix: '{member}'")))
}

fn io_err<'a>(op: &'static str, topic: &'a str) -> impl FnOnce(redis::RedisError) -> StoreError + 'a {
    move |e| StoreError::io(format!("{op} {topic}: {e}"))
}

// ═══════════════════════════════════════════════════════════════
//  RedisCacheStore
// ═══════════════════════════════════════════════════════════════

pub struct RedisCacheStore {
    connections: Vec<MultiplexedConnection>,
    next: AtomicUsize,
    window: Duration,
}

impl RedisCacheStore {
    /// Open `pool_size` multiplexed connections to `url`.
    ///
    /// `url` may be a bare `host:port`; `redis://` is assumed then.
    pub async fn connect(url: &str, pool_size: usize, window: Duration) -> Result<Self, StoreError> {
        if pool_size == 0 {
            return Err(StoreError::config("redis pool size must be at least 1"));
        }
        let url = with_default_scheme(url, "redis");
        let client = redis::Client::open(url.as_str())
            .map_err(|e| StoreError::config(format!("redis url '{url}': {e}")))?;

        let mut connections = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let conn = client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| StoreError::io(format!("connect {url}: {e}")))?;
            connections.push(conn);
        }
        tracing::info!(url = %url, pool_size, window_secs = window.as_secs(), "redis cache connected");

        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
            window,
        })
    }

    /// Round-robin по пулу. Клон multiplexed-соединения дешёвый.
    fn connection(&self) -> MultiplexedConnection {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections[i].clone()
    }
}

impl CacheStore for RedisCacheStore {
    fn create(
        &self,
        topic: &str,
        payload: &str,
        offset: i64,
    ) -> Pin<Box<dyn Future<Output = Result<(), StoreError>> + Send + '_>> {
        let topic = topic.to_string();
        let member = encode_member(offset, payload);
        Box::pin(async move {
            let mut conn = self.connection();

            tracing::debug!(topic = %topic, offset, "creating cache entry");
            let _: i64 = redis::cmd(ZADD)
                .arg(&topic)
                .arg(offset)
                .arg(&member)
                .query_async(&mut conn)
                .await
                .map_err(io_err(ZADD, &topic))?;

            let ttl = ttl_key(&topic);
            let expires_at = expires_at_ns(self.window);
            tracing::debug!(topic = %topic, offset, expires_at, "creating time to live entry");
            let _: i64 = redis::cmd(ZADD)
                .arg(&ttl)
                .arg(expires_at)
                .arg(offset)
                .query_async(&mut conn)
                .await
                .map_err(io_err(ZADD, &ttl))?;
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
            let mut conn = self.connection();
            let members: Vec<String> = redis::cmd(ZRANGEBYSCORE)
                .arg(&topic)
                .arg(from_offset)
                .arg("+inf")
                .query_async(&mut conn)
                .await
                .map_err(io_err(ZRANGEBYSCORE, &topic))?;

            let payloads = members
                .iter()
                .map(|m| decode_member(m).map(str::to_string))
                .collect::<Result<Vec<_>, _>>()?;
            tracing::debug!(topic = %topic, offset = from_offset, count = payloads.len(), "read cached entries");
            Ok(payloads)
        })
    }

    fn delete(
        &self,
        topic: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Compaction, StoreError>> + Send + '_>> {
        let topic = topic.to_string();
        Box::pin(async move {
            let mut conn = self.connection();
            let ttl = ttl_key(&topic);
            let now = now_ns();

            let members: Vec<String> = redis::cmd(ZRANGEBYSCORE)
                .arg(&ttl)
                .arg("-inf")
                .arg(now)
                .query_async(&mut conn)
                .await
                .map_err(io_err(ZRANGEBYSCORE, &ttl))?;
            let expired = members
                .iter()
                .map(|m| m.parse::<i64>())
                .collect::<Result<Vec<_>, _>>()?;

            let Some((min, max)) = eviction_range(&expired) else {
                return Ok(Compaction::default());
            };

            let removed: i64 = redis::cmd(ZREMRANGEBYSCORE)
                .arg(&ttl)
                .arg("-inf")
                .arg(now)
                .query_async(&mut conn)
                .await
                .map_err(io_err(ZREMRANGEBYSCORE, &ttl))?;
            tracing::debug!(key = %ttl, removed, "removed expired ttl entries");

            let evicted: i64 = redis::cmd(ZREMRANGEBYSCORE)
                .arg(&topic)
                .arg(min)
                .arg(max)
                .query_async(&mut conn)
                .await
                .map_err(io_err(ZREMRANGEBYSCORE, &topic))?;

            Ok(Compaction {
                expired: removed.max(0) as usize,
                evicted: evicted.max(0) as usize,
                range: Some((min, max)),
            })
        })
    }
}
