mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{Reply, ScriptedTransport, SlowStorage, envelope};
use courier::{CacheConfig, Client, Error, MemoryStorage, Method, Request, TransportError};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone, Deserialize, PartialEq)]
struct Balance {
    amount: i64,
}

fn balance_request(ttl: Duration) -> Arc<Request> {
    Request::builder(Method::Get, "https://api.example.com", "/v1/balance")
        .success_when(|code| code.to_i64() == 0)
        .cache(CacheConfig::new(ttl))
        .build()
}

#[tokio::test]
async fn cached_responses_live_for_their_ttl() {
    let now = Arc::new(Mutex::new(Utc::now()));
    let clock_source = Arc::clone(&now);
    let transport = ScriptedTransport::new([Reply::ok(&envelope(0, json!({ "amount": 10 })))]);
    let client = Client::builder(transport.clone())
        .storage(Arc::new(MemoryStorage::new()))
        .clock(Arc::new(move || -> DateTime<Utc> { *clock_source.lock().unwrap() }))
        .build();

    let request = balance_request(Duration::from_secs(5));
    client.execute::<Balance>(Arc::clone(&request)).await.unwrap();

    let advance = |secs: i64| *now.lock().unwrap() += chrono::Duration::seconds(secs);

    advance(3);
    let call = client.request(Arc::clone(&request));
    assert!(call.has_cache().await);
    let cached = call.load_cache::<Balance>().await.unwrap().unwrap();
    assert!(cached.is_from_cache());
    assert_eq!(cached.data(), &Balance { amount: 10 });

    advance(3);
    assert!(!call.has_cache().await);
    assert!(call.load_cache::<Balance>().await.unwrap().is_none());
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn failed_calls_are_not_cached() {
    let transport = ScriptedTransport::new([Reply::ok(
        &json!({ "code": 7, "msg": "insufficient balance" }).to_string(),
    )]);
    let client = Client::builder(transport)
        .storage(Arc::new(MemoryStorage::new()))
        .build();

    let request = balance_request(Duration::from_secs(60));
    let err = client.execute::<Balance>(Arc::clone(&request)).await.unwrap_err();
    assert!(matches!(err, Error::ValidationFailed { .. }));
    assert_eq!(err.message(), Some("insufficient balance"));
    assert!(!client.request(request).has_cache().await);
}

#[tokio::test(start_paused = true)]
async fn cache_then_network_emits_both_when_the_cache_is_faster() {
    let storage = SlowStorage::new(Duration::from_millis(10));
    let transport = ScriptedTransport::new([
        Reply::ok(&envelope(0, json!({ "amount": 1 }))),
        Reply::ok(&envelope(0, json!({ "amount": 2 }))).after(Duration::from_millis(50)),
    ]);
    let client = Client::builder(transport.clone()).storage(storage.clone()).build();
    let request = balance_request(Duration::from_secs(60));

    // Seed the cache with A.
    client.execute::<Balance>(Arc::clone(&request)).await.unwrap();

    let emitted: Vec<_> = client
        .request(request)
        .execute_with_cache::<Balance>()
        .collect()
        .await;

    let emitted: Vec<(i64, bool)> = emitted
        .into_iter()
        .map(|r| r.map(|r| (r.data().amount, r.is_from_cache())).unwrap())
        .collect();
    assert_eq!(emitted, vec![(1, true), (2, false)]);
}

#[tokio::test(start_paused = true)]
async fn cache_then_network_drops_the_cache_when_the_network_wins() {
    let storage = SlowStorage::new(Duration::from_millis(10));
    let transport = ScriptedTransport::new([
        Reply::ok(&envelope(0, json!({ "amount": 1 }))),
        Reply::ok(&envelope(0, json!({ "amount": 2 }))).after(Duration::from_millis(5)),
    ]);
    let client = Client::builder(transport.clone()).storage(storage.clone()).build();
    let request = balance_request(Duration::from_secs(60));

    client.execute::<Balance>(Arc::clone(&request)).await.unwrap();
    let reads_before = storage.reads_finished();

    let emitted: Vec<_> = client
        .request(request)
        .execute_with_cache::<Balance>()
        .collect()
        .await;

    assert_eq!(emitted.len(), 1);
    let only = emitted.into_iter().next().unwrap().unwrap();
    assert_eq!(only.data().amount, 2);
    assert!(!only.is_from_cache());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(storage.read_started());
    assert_eq!(storage.reads_finished(), reads_before);
}

#[tokio::test(start_paused = true)]
async fn cache_then_network_surfaces_network_errors_after_a_hit() {
    let storage = SlowStorage::new(Duration::from_millis(1));
    let transport = ScriptedTransport::new([
        Reply::ok(&envelope(0, json!({ "amount": 1 }))),
        Reply::fail(TransportError::Status(502)).after(Duration::from_millis(20)),
    ]);
    let client = Client::builder(transport)
        .storage(storage)
        .no_retry()
        .build();
    let request = balance_request(Duration::from_secs(60));
    client.execute::<Balance>(Arc::clone(&request)).await.unwrap();

    let emitted: Vec<_> = client
        .request(request)
        .execute_with_cache::<Balance>()
        .collect()
        .await;

    assert_eq!(emitted.len(), 2);
    assert!(emitted[0].as_ref().unwrap().is_from_cache());
    assert!(matches!(
        emitted[1],
        Err(Error::Transport(TransportError::Status(502)))
    ));
}

#[tokio::test]
async fn cache_keys_are_stable_per_request() {
    let transport = ScriptedTransport::new([]);
    let client = Client::builder(transport).build();
    let a = client.request(balance_request(Duration::from_secs(60)));
    let b = client.request(balance_request(Duration::from_secs(60)));
    let shorter = client.request(balance_request(Duration::from_secs(30)));

    assert_eq!(a.cache_key().await, b.cache_key().await);
    assert_ne!(a.cache_key().await, shorter.cache_key().await);
    assert_eq!(a.fingerprint().await, shorter.fingerprint().await);
}

#[tokio::test(start_paused = true)]
async fn cache_presence_checks_read_storage_once() {
    let storage = SlowStorage::new(Duration::from_millis(1));
    let transport = ScriptedTransport::new([Reply::ok(&envelope(0, json!({ "amount": 3 })))]);
    let client = Client::builder(transport).storage(storage.clone()).build();
    let request = balance_request(Duration::from_secs(60));
    client.execute::<Balance>(Arc::clone(&request)).await.unwrap();

    let reads_before = storage.reads_finished();
    assert!(client.request(request).has_cache().await);
    assert_eq!(storage.reads_finished(), reads_before + 1);
}
