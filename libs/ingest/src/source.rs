use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use broker::{Broker, BrokerError};
use cache_api::{CacheStore, Record};

use crate::{IngestError, Upstream};

// ═══════════════════════════════════════════════════════════════
//  Ingest loop — upstream line → cache.create() → broker.publish()
// ═══════════════════════════════════════════════════════════════

/// Счётчики одного прогона ingest loop'а.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Записи, сохранённые в кэш и опубликованные.
    pub published: u64,
    /// Строки, которые не удалось разобрать.
    pub malformed: u64,
    /// Записи, не сохранённые в кэш (и поэтому не опубликованные).
    pub cache_failures: u64,
}

/// Читать записи до конца потока.
///
/// Порядок на каждую запись: сначала `create`, потом `publish`, так что
/// подписчик никогда не получает payload, который не попал в кэш.
/// Битые строки и ошибки кэша логируются и пропускаются. Пустые строки
/// (heartbeat upstream'а) игнорируются.
///
/// `Ok` — upstream закрыл поток. `Err(Broker(Stopped))` — broker
/// остановлен (shutdown).
pub async fn ingest_lines<R>(
    mut reader: R,
    topic: &str,
    cache: &dyn CacheStore,
    broker: &Broker,
) -> Result<IngestStats, IngestError>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = IngestStats::default();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = trim_line_end(&buf);
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let record = match Record::from_line(line) {
            Ok(record) => record,
            Err(e) => {
                stats.malformed += 1;
                tracing::warn!(
                    topic = %topic,
                    error = %e,
                    line = %String::from_utf8_lossy(line),
                    "skipping malformed upstream record"
                );
                continue;
            }
        };

        if let Err(e) = cache.create(topic, &record.data, record.offset).await {
            stats.cache_failures += 1;
            tracing::error!(topic = %topic, offset = record.offset, error = ?e, "cache write failed, record not published");
            continue;
        }

        let delivered = broker.publish(Bytes::from(record.data)).await?;
        stats.published += 1;
        tracing::debug!(topic = %topic, offset = record.offset, delivered, "published record");
    }

    Ok(stats)
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Подключиться к upstream и крутить ingest loop.
///
/// Возвращается только с ошибкой: upstream недоступен, ответил не 200,
/// оборвал или закрыл поток, либо broker остановлен. Повторных
/// подключений нет — для владельца процесса это фатально.
pub async fn run_ingest(
    upstream: Upstream,
    topic: String,
    cache: Arc<dyn CacheStore>,
    broker: Broker,
) -> Result<(), IngestError> {
    let reader = upstream.connect().await?;
    tracing::info!(topic = %topic, url = %upstream.url(), "ingest started");

    let stats = ingest_lines(reader, &topic, &*cache, &broker).await;
    match stats {
        Ok(stats) => {
            tracing::error!(topic = %topic, ?stats, "upstream closed the stream");
            Err(IngestError::StreamClosed)
        }
        Err(IngestError::Broker(BrokerError::Stopped)) => {
            tracing::info!(topic = %topic, "broker stopped, ingest finished");
            Err(IngestError::Broker(BrokerError::Stopped))
        }
        Err(e) => Err(e),
    }
}
