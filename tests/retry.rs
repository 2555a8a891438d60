mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Reply, ScriptedTransport, envelope};
use courier::config::{RetryConfig, RetryKind};
use courier::retry::RetryInterceptor;
use courier::{
    CallState, Client, ClientConfig, EventKind, ExponentialBackoff, Method, Request, RetryPolicy,
    TransportError,
};
use serde_json::{Value, json};
use tokio_test::assert_ok;

fn request() -> Arc<Request> {
    Request::builder(Method::Get, "https://api.example.com", "/v1/orders").build()
}

fn assert_close(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual < expected + Duration::from_millis(5),
        "expected about {expected:?}, got {actual:?}"
    );
}

fn backoff() -> Arc<ExponentialBackoff> {
    Arc::new(ExponentialBackoff::new(
        Duration::from_secs(1),
        2.0,
        Duration::from_secs(10),
        0.0,
        3,
    ))
}

#[tokio::test(start_paused = true)]
async fn exponential_backoff_spaces_attempts_and_stops_at_the_limit() {
    let transport = ScriptedTransport::new([Reply::fail(TransportError::Connection(
        "reset by peer".into(),
    ))]);
    let policy = backoff();
    let client = Client::builder(transport.clone()).retry(policy.clone()).build();

    let err = client.execute::<Value>(request()).await.unwrap_err();
    assert!(matches!(err, courier::Error::Transport(TransportError::Connection(_))));

    let times = transport.call_times();
    assert_eq!(times.len(), 3);
    assert_close(times[1] - times[0], Duration::from_secs(1));
    assert_close(times[2] - times[1], Duration::from_secs(2));

    let delays: Vec<_> = (1..=3).map(|attempt| policy.delay(attempt, &err)).collect();
    assert_eq!(
        delays,
        vec![
            Some(Duration::from_secs(1)),
            Some(Duration::from_secs(2)),
            Some(Duration::from_secs(4)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn recovers_after_a_transient_failure() {
    let transport = ScriptedTransport::new([
        Reply::fail(TransportError::Status(503)),
        Reply::ok(&envelope(0, json!({ "orders": [] }))),
    ]);
    let client = Client::builder(transport.clone()).retry(backoff()).build();
    let mut events = client.events().subscribe();

    let response = assert_ok!(client.execute::<Value>(request()).await);
    assert_eq!(response.data(), &json!({ "orders": [] }));
    assert_eq!(transport.calls(), 2);

    let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok().map(|e| e.kind)).collect();
    assert!(matches!(kinds[0], EventKind::RetryScheduled { attempt: 1, .. }));
    assert_eq!(kinds[1], EventKind::RetrySucceeded { attempts: 2 });
}

#[tokio::test(start_paused = true)]
async fn permanent_errors_are_not_retried() {
    let transport = ScriptedTransport::new([Reply::ok("not json")]);
    let client = Client::builder(transport.clone()).retry(backoff()).build();

    let err = client.execute::<Value>(request()).await.unwrap_err();
    assert!(matches!(err, courier::Error::MalformedPayload { .. }));
    assert_eq!(transport.calls(), 1);

    let transport = ScriptedTransport::new([Reply::fail(TransportError::BadUrl("::".into()))]);
    let client = Client::builder(transport.clone()).retry(backoff()).build();
    client.execute::<Value>(request()).await.unwrap_err();
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhaustion_is_published() {
    let transport = ScriptedTransport::new([Reply::fail(TransportError::Status(500))]);
    let client = Client::builder(transport)
        .config(ClientConfig {
            retry: RetryConfig {
                kind: RetryKind::Fixed,
                max_attempts: 2,
                base_delay_ms: 100,
                jitter: 0.0,
                ..RetryConfig::default()
            },
            ..ClientConfig::default()
        })
        .build();
    let mut events = client.events().subscribe();

    client.execute::<Value>(request()).await.unwrap_err();

    let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok().map(|e| e.kind)).collect();
    assert_eq!(kinds.len(), 2);
    assert_eq!(
        kinds[1],
        EventKind::RetriesExhausted {
            attempts: 2,
            error: "server responded with status 500".into(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_the_backoff_sleep() {
    let transport = ScriptedTransport::new([Reply::fail(TransportError::Status(503))]);
    let slow_policy = Arc::new(ExponentialBackoff::new(
        Duration::from_secs(30),
        2.0,
        Duration::from_secs(60),
        0.0,
        5,
    ));
    let client = Client::builder(transport.clone())
        .interceptor(Arc::new(RetryInterceptor::new(slow_policy)))
        .no_retry()
        .build();

    let call = client.request(request());
    let task = tokio::spawn({
        let call = call.clone();
        async move { call.execute::<Value>().await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;
    call.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(call.state(), CallState::Cancelled);
    assert_eq!(transport.calls(), 1);
}
