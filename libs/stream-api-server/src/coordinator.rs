use bytes::Bytes;
use tokio::sync::mpsc;

use broker::{Broker, BrokerError};
use cache_api::CacheStore;

// ═══════════════════════════════════════════════════════════════
//  Request coordinator — replay from cache, then live tail
// ═══════════════════════════════════════════════════════════════

/// Почему закончился поток клиента.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Клиент отключился; подписка снята.
    ClientGone,
    /// Broker остановлен (shutdown); канал закрыт им самим.
    BrokerStopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub replayed: usize,
    pub live: usize,
    pub end: StreamEnd,
}

/// Обслужить одного клиента, пока он подключён.
///
/// 1. `offset > 0` — отдать из кэша всё начиная с `offset`, по порядку.
///    Ошибка кэша логируется, replay пропускается.
/// 2. Подписаться на broker и отдавать каждый новый payload.
/// 3. Клиент ушёл (`out` закрыт) — отписаться ровно один раз.
///
/// Между (1) и (2) есть окно: опубликованное в нём не попадёт ни в
/// replay, ни в подписку.
pub async fn stream_topic(
    topic: &str,
    cache: &dyn CacheStore,
    broker: &Broker,
    offset: i64,
    out: mpsc::Sender<Bytes>,
) -> StreamSummary {
    let mut summary = StreamSummary { replayed: 0, live: 0, end: StreamEnd::ClientGone };

    if offset > 0 {
        match cache.read(topic, offset).await {
            Ok(payloads) => {
                tracing::info!(topic = %topic, offset, count = payloads.len(), "replaying cached entries");
                for payload in payloads {
                    if out.send(Bytes::from(payload)).await.is_err() {
                        return summary;
                    }
                    summary.replayed += 1;
                }
            }
            Err(e) => {
                tracing::error!(topic = %topic, offset, error = ?e, "cache read failed, skipping replay");
            }
        }
    }

    let mut subscription = match broker.subscribe().await {
        Ok(sub) => sub,
        Err(BrokerError::Stopped) | Err(BrokerError::NotSubscribed(_)) => {
            summary.end = StreamEnd::BrokerStopped;
            return summary;
        }
    };
    let id = subscription.id();

    loop {
        tokio::select! {
            biased;

            _ = out.closed() => break,

            payload = subscription.recv() => match payload {
                Some(payload) => {
                    if out.send(payload).await.is_err() {
                        break;
                    }
                    summary.live += 1;
                }
                None => {
                    summary.end = StreamEnd::BrokerStopped;
                    return summary;
                }
            },
        }
    }

    // Drop the receiver first so a publish blocked on this subscriber
    // fails fast instead of holding up the unsubscribe request.
    let (_, rx) = subscription.into_parts();
    drop(rx);
    if let Err(e) = broker.unsubscribe(id).await {
        tracing::warn!(topic = %topic, %id, error = %e, "unsubscribe failed");
    }
    summary
}
