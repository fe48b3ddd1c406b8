//! HTTP-level tests for the stream routes.
//!
//! A real router is built over the in-memory cache store and live
//! brokers; requests go through `tower::ServiceExt::oneshot` and the
//! chunked body is read frame by frame.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use broker::Broker;
use cache_api::CacheStore;
use storage_memory::MemoryCacheStore;
use stream_api_server::{router, TopicRoute, TopicState};

const TOPIC: &str = "stream-filing-history";
const PATH: &str = "/streaming-api-cache/filings";

struct TestApp {
    app: axum::Router,
    cache: Arc<MemoryCacheStore>,
    broker: Broker,
    token: CancellationToken,
}

fn test_app() -> TestApp {
    let token = CancellationToken::new();
    let cache = Arc::new(MemoryCacheStore::new(Duration::from_secs(60)));
    let (broker, _) = Broker::spawn(TOPIC, 4, token.clone());
    let app = router(vec![TopicRoute {
        path: PATH.into(),
        state: TopicState {
            topic: TOPIC.into(),
            cache: cache.clone() as Arc<dyn CacheStore>,
            broker: broker.clone(),
        },
    }]);
    TestApp { app, cache, broker, token }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn next_chunk(body: &mut Body) -> String {
    let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
        .await
        .expect("timed out waiting for a chunk")
        .expect("body ended")
        .unwrap();
    String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap()
}

async fn wait_for_subscribers(broker: &Broker, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while broker.subscriber_count().await.unwrap() != n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriber count never reached target");
}

// ---------------------------------------------------------------
// Health
// ---------------------------------------------------------------

#[tokio::test]
async fn test_healthcheck() {
    let t = test_app();

    let resp = t.app.oneshot(get("/healthcheck")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let t = test_app();
    let resp = t.app.oneshot(get("/streaming-api-cache/unknown")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------
// Offset validation
// ---------------------------------------------------------------

#[tokio::test]
async fn test_malformed_timepoint_is_rejected() {
    let t = test_app();

    let resp = t.app.oneshot(get(&format!("{PATH}?timepoint=abc"))).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"malformed offset 'abc'");
    assert_eq!(t.broker.subscriber_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_negative_timepoint_is_rejected() {
    let t = test_app();

    let resp = t.app.oneshot(get(&format!("{PATH}?timepoint=-3"))).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(t.broker.subscriber_count().await.unwrap(), 0);
}

// ---------------------------------------------------------------
// Replay + live tail
// ---------------------------------------------------------------

#[tokio::test]
async fn test_replay_from_timepoint_then_live() {
    let t = test_app();
    for offset in 10..20 {
        t.cache.create(TOPIC, &format!("{{id : {offset}}}"), offset).await.unwrap();
    }

    let resp = t.app.oneshot(get(&format!("{PATH}?timepoint=15"))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let mut body = resp.into_body();

    for offset in 15..20 {
        assert_eq!(next_chunk(&mut body).await, format!("{{id : {offset}}}"));
    }

    wait_for_subscribers(&t.broker, 1).await;
    t.cache.create(TOPIC, "{id : 20}", 20).await.unwrap();
    t.broker.publish("{id : 20}").await.unwrap();
    assert_eq!(next_chunk(&mut body).await, "{id : 20}");
}

#[tokio::test]
async fn test_no_timepoint_is_live_only() {
    let t = test_app();
    t.cache.create(TOPIC, "cached", 1).await.unwrap();

    let resp = t.app.oneshot(get(PATH)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let mut body = resp.into_body();

    wait_for_subscribers(&t.broker, 1).await;
    t.broker.publish("Hello world").await.unwrap();
    assert_eq!(next_chunk(&mut body).await, "Hello world");
}

#[tokio::test]
async fn test_empty_timepoint_is_live_only() {
    let t = test_app();
    t.cache.create(TOPIC, "cached", 1).await.unwrap();

    let resp = t.app.oneshot(get(&format!("{PATH}?timepoint="))).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let mut body = resp.into_body();

    wait_for_subscribers(&t.broker, 1).await;
    t.broker.publish("live").await.unwrap();
    assert_eq!(next_chunk(&mut body).await, "live");
}

#[tokio::test]
async fn test_two_clients_each_get_every_publish() {
    let t = test_app();
    let mut first = t.app.clone().oneshot(get(PATH)).await.unwrap().into_body();
    let mut second = t.app.clone().oneshot(get(PATH)).await.unwrap().into_body();

    wait_for_subscribers(&t.broker, 2).await;
    t.broker.publish("a").await.unwrap();
    t.broker.publish("b").await.unwrap();

    for body in [&mut first, &mut second] {
        assert_eq!(next_chunk(body).await, "a");
        assert_eq!(next_chunk(body).await, "b");
    }
}

// ---------------------------------------------------------------
// Disconnect
// ---------------------------------------------------------------

#[tokio::test]
async fn test_disconnect_unsubscribes() {
    let t = test_app();
    let mut staying = t.app.clone().oneshot(get(PATH)).await.unwrap().into_body();
    let leaving = t.app.clone().oneshot(get(PATH)).await.unwrap().into_body();
    wait_for_subscribers(&t.broker, 2).await;

    drop(leaving);
    wait_for_subscribers(&t.broker, 1).await;

    assert_eq!(t.broker.publish("after").await.unwrap(), 1);
    assert_eq!(next_chunk(&mut staying).await, "after");
}

// ---------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------

#[tokio::test]
async fn test_broker_shutdown_ends_body() {
    let t = test_app();
    let mut body = t.app.clone().oneshot(get(PATH)).await.unwrap().into_body();
    wait_for_subscribers(&t.broker, 1).await;

    t.token.cancel();

    let end = tokio::time::timeout(Duration::from_secs(5), body.frame()).await.unwrap();
    assert!(end.is_none());
}
