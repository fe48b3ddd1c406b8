use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::mpsc;

use cache_api::parse_offset;

use crate::coordinator::stream_topic;
use crate::TopicState;

/// Ёмкость канала между coordinator'ом и телом ответа. Маленькая, чтобы
/// медленный клиент быстро упирался в broker, как и прямая запись в сокет.
const BODY_BUFFER: usize = 1;

// ═══════════════════════════════════════════════════════════════
//  GET /healthcheck
// ═══════════════════════════════════════════════════════════════

pub(crate) async fn handle_healthcheck() -> StatusCode {
    StatusCode::OK
}

// ═══════════════════════════════════════════════════════════════
//  GET {prefix}{path}?timepoint=N
// ═══════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub(crate) struct StreamParams {
    timepoint: Option<String>,
}

pub(crate) async fn handle_stream(
    State(state): State<Arc<TopicState>>,
    Query(params): Query<StreamParams>,
) -> Response {
    let raw = params.timepoint.as_deref().unwrap_or("");
    let offset = match parse_offset(raw) {
        Ok(offset) => offset,
        Err(e) => {
            tracing::warn!(topic = %state.topic, timepoint = %raw, error = %e, "rejected stream request");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };
    tracing::info!(topic = %state.topic, offset, "user connected");

    let (tx, rx) = mpsc::channel::<Bytes>(BODY_BUFFER);
    let task_state = state.clone();
    tokio::spawn(async move {
        let summary = stream_topic(
            &task_state.topic,
            &*task_state.cache,
            &task_state.broker,
            offset,
            tx,
        )
        .await;
        tracing::info!(
            topic = %task_state.topic,
            replayed = summary.replayed,
            live = summary.live,
            end = ?summary.end,
            "user disconnected"
        );
    });

    let body = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok::<_, Infallible>(chunk), rx))
    });
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body),
    )
        .into_response()
}
