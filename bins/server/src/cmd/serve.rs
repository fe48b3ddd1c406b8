use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use cache_api::CacheStore;
use ingest::Upstream;
use storage_memory::MemoryCacheStore;
use storage_redis::RedisCacheStore;

use crate::config::{ServeArgs, ServerConfig, StorageKind};
use crate::error::ServerError;
use crate::mapper::PathMapper;
use crate::service::{IngestSet, TopicService};

/// Сколько ждать закрытия открытых клиентских потоков после shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("stream-cache starting");

    // --- Load config ---
    let mut config = ServerConfig::load(&args.config)?;
    config.apply_overrides(&args);
    config.validate()?;
    tracing::info!(
        config = %args.config,
        backend = %config.backend_url,
        storage = ?config.cache.storage,
        expiry_secs = config.cache.expiry_in_seconds,
        topics = config.topics.len(),
        "loaded config"
    );

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();

    // --- Cache store, shared by all topics ---
    let window = Duration::from_secs(config.cache.expiry_in_seconds);
    let cache: Arc<dyn CacheStore> = match config.cache.storage {
        StorageKind::Redis => {
            let store = RedisCacheStore::connect(&config.cache.redis_url, config.cache.pool_size, window).await?;
            tracing::info!(url = %config.cache.redis_url, pool_size = config.cache.pool_size, "connected to redis");
            Arc::new(store)
        }
        StorageKind::Memory => {
            tracing::warn!("using in-memory cache, replay does not survive restarts");
            Arc::new(MemoryCacheStore::new(window))
        }
    };

    let client = reqwest::Client::builder()
        .build()
        .map_err(|e| ServerError::Config { context: "http client", detail: e.to_string() })?;
    let mapper = PathMapper::new(config.backend_paths.clone());

    // --- One service per topic ---
    let mut ingests = IngestSet::new();
    let mut services = Vec::with_capacity(config.topics.len());
    let mut routes = Vec::with_capacity(config.topics.len());
    for topic in &config.topics {
        let upstream_path = mapper.upstream_path(&topic.path);
        let upstream = Upstream::new(client.clone(), &config.backend_url, upstream_path, &config.api_key);
        let (service, route) =
            TopicService::start(topic, &config, upstream, cache.clone(), &mut ingests, &token);
        services.push(service);
        routes.push(route);
    }

    // --- API server ---
    let app = stream_api_server::router(routes);
    let bind_address = config.bind_address.clone();
    let api_token = token.clone();
    let mut api_handle =
        tokio::spawn(async move { stream_api_server::run(&bind_address, app, api_token).await });

    tracing::info!("server ready");

    // --- Wait for a signal or the first fatal failure ---
    let outcome = tokio::select! {
        signal = shutdown_signal() => match signal {
            Ok(()) => {
                tracing::info!("shutting down...");
                Ok(())
            }
            Err(e) => Err(ServerError::Signal(e)),
        },
        Some(joined) = ingests.join_next() => match joined {
            Ok((topic, result)) => {
                let source = result.err().unwrap_or(ingest::IngestError::StreamClosed);
                tracing::error!(topic = %topic, error = %source, "ingest failed, shutting down");
                Err(ServerError::Ingest { topic, source })
            }
            Err(e) => Err(ServerError::Task(e)),
        },
        served = &mut api_handle => match served {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!(address = %config.bind_address, error = %e, "api server failed");
                Err(ServerError::Bind(e))
            }
            Err(e) => Err(ServerError::Task(e)),
        },
    };

    // Signal all tasks to stop cooperatively
    token.cancel();
    ingests.abort_all();
    while ingests.join_next().await.is_some() {}

    for service in services {
        let name = service.name().to_string();
        if tokio::time::timeout(DRAIN_TIMEOUT, service.stopped()).await.is_err() {
            tracing::warn!(topic = %name, "topic did not stop in time");
        }
    }

    if !api_handle.is_finished() {
        match tokio::time::timeout(DRAIN_TIMEOUT, &mut api_handle).await {
            Ok(_) => {}
            Err(_) => {
                tracing::warn!("client streams still open, aborting api server");
                api_handle.abort();
            }
        }
    }

    tracing::info!("shutdown complete");
    outcome
}

/// SIGINT (ctrl-c) или SIGTERM.
#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
