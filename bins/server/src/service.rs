use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use broker::Broker;
use cache_api::CacheStore;
use ingest::{run_ingest, spawn_compaction, IngestError, Upstream};
use stream_api_server::{TopicRoute, TopicState};

use crate::config::{ServerConfig, TopicConfig};

/// Ingest loop'ы всех topic'ов: первая завершившаяся задача роняет процесс.
pub type IngestSet = JoinSet<(String, Result<(), IngestError>)>;

/// Один topic: broker, ingest loop, compaction и маршрут.
pub struct TopicService {
    name: String,
    broker_task: JoinHandle<()>,
    compaction_task: JoinHandle<()>,
}

impl TopicService {
    /// Поднять все задачи topic'а. Ingest loop попадает в `ingests`,
    /// маршрут возвращается для сборки роутера.
    pub fn start(
        topic: &TopicConfig,
        config: &ServerConfig,
        upstream: Upstream,
        cache: Arc<dyn CacheStore>,
        ingests: &mut IngestSet,
        token: &CancellationToken,
    ) -> (Self, TopicRoute) {
        let name = topic.name.clone();
        let (broker, broker_task) = Broker::spawn(&name, config.subscriber_buffer, token.clone());

        let compaction_task = spawn_compaction(
            name.clone(),
            cache.clone(),
            Duration::from_secs(config.compaction_interval_secs),
            token.clone(),
        );

        {
            let name = name.clone();
            let cache = cache.clone();
            let broker = broker.clone();
            ingests.spawn(async move {
                let result = run_ingest(upstream, name.clone(), cache, broker).await;
                (name, result)
            });
        }

        let path = config.route_path(topic);
        tracing::info!(topic = %name, path = %path, "registered topic");

        let route = TopicRoute {
            path,
            state: TopicState { topic: name.clone(), cache, broker },
        };
        (Self { name, broker_task, compaction_task }, route)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Дождаться остановки broker'а и compaction (после отмены token'а).
    pub async fn stopped(self) {
        if let Err(e) = self.broker_task.await {
            tracing::error!(topic = %self.name, error = %e, "broker task failed");
        }
        if let Err(e) = self.compaction_task.await {
            tracing::error!(topic = %self.name, error = %e, "compaction task failed");
        }
        tracing::debug!(topic = %self.name, "topic stopped");
    }
}
