pub mod coordinator;
mod http;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;

use broker::Broker;
use cache_api::CacheStore;

pub use coordinator::{stream_topic, StreamEnd, StreamSummary};

/// Всё, что нужно обработчику одного topic'а.
pub struct TopicState {
    pub topic: String,
    pub cache: Arc<dyn CacheStore>,
    pub broker: Broker,
}

/// Публичный путь topic'а и его состояние.
pub struct TopicRoute {
    pub path: String,
    pub state: TopicState,
}

/// Роутер: `GET /healthcheck` + `GET {path}` на каждый topic.
pub fn router(routes: Vec<TopicRoute>) -> Router {
    let mut app = Router::new().route("/healthcheck", get(http::handle_healthcheck));
    for route in routes {
        tracing::info!(topic = %route.state.topic, path = %route.path, "bound stream route");
        app = app.route(
            &route.path,
            get(http::handle_stream).with_state(Arc::new(route.state)),
        );
    }
    app
}

/// HTTP API сервер. Останавливается по `shutdown`.
pub async fn run(
    bind_address: &str,
    app: Router,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    tracing::info!(address = %bind_address, "api server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}
