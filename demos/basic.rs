//! Walks through deduplication, caching, validation and retries against a
//! fake in-process backend.
//!
//! ```text
//! RUST_LOG=courier=debug cargo run --example basic
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use courier::{
    CacheConfig, Client, ClientConfig, Context, Empty, ExponentialBackoff, LoggerInterceptor,
    MemoryStorage, Method, Request, TransportError, from_fn,
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Pretends to be a remote API. `/flaky` fails twice before answering.
struct FakeBackend {
    calls: AtomicUsize,
    flaky: AtomicUsize,
}

#[async_trait]
impl courier::Transport for FakeBackend {
    async fn execute(&self, ctx: &Context) -> Result<Bytes, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(80)).await;

        let body = match ctx.request().path() {
            "/v1/profile" => json!({ "code": 0, "data": { "name": "Ada", "plan": "pro" }, "msg": "ok" }),
            "/v1/withdraw" => json!({ "code": 4002, "msg": "insufficient balance" }),
            "/v1/flaky" if self.flaky.fetch_add(1, Ordering::SeqCst) < 2 => {
                return Err(TransportError::Connection("connection reset".into()));
            }
            "/v1/flaky" => json!({ "code": 0, "data": null }),
            other => return Err(TransportError::BadUrl(other.to_owned())),
        };
        Ok(Bytes::from(body.to_string()))
    }
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Profile {
    name: String,
    plan: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("courier=info")),
        )
        .init();

    let backend = Arc::new(FakeBackend {
        calls: AtomicUsize::new(0),
        flaky: AtomicUsize::new(0),
    });
    let config = ClientConfig::load(None)?;
    let client = Client::builder(backend.clone())
        .config(config)
        .storage(Arc::new(MemoryStorage::new()))
        .retry(Arc::new(ExponentialBackoff::new(
            Duration::from_millis(100),
            2.0,
            Duration::from_secs(1),
            0.2,
            4,
        )))
        .interceptor(Arc::new(LoggerInterceptor::new()))
        .interceptor(from_fn("auth", 100, |mut ctx, next| async move {
            ctx.headers_mut().set("Authorization", "Bearer demo-token");
            next.run(ctx).await
        }))
        .build();

    let profile = || {
        Request::builder(Method::Get, "https://api.example.com", "/v1/profile")
            .success_when(|code| code.to_i64() == 0)
            .cache(CacheConfig::new(Duration::from_secs(300)))
            .build()
    };

    // Five identical calls at once share a single backend call.
    let calls: Vec<_> = (0..5)
        .map(|_| {
            let client = client.clone();
            let request = profile();
            tokio::spawn(async move { client.execute::<Profile>(request).await })
        })
        .collect();
    for call in calls {
        println!("profile: {:?}", call.await??.data());
    }
    println!("backend calls so far: {}", backend.calls.load(Ordering::SeqCst));

    // The cached copy arrives first, then the fresh one.
    let mut updates = client.request(profile()).execute_with_cache::<Profile>();
    while let Some(update) = updates.next().await {
        let update = update?;
        println!("cache-then-network: from_cache={} {:?}", update.is_from_cache(), update.data());
    }

    // Business failures keep the server's message.
    let withdraw = Request::builder(Method::Post, "https://api.example.com", "/v1/withdraw")
        .param("amount", 1_000)
        .success_when(|code| code.to_i64() == 0)
        .build();
    if let Err(err) = client.execute::<Empty>(withdraw).await {
        println!("withdraw failed: {err} ({})", err.message().unwrap_or("no message"));
    }

    // Transient failures are retried with backoff.
    let flaky = Request::builder(Method::Get, "https://api.example.com", "/v1/flaky").build();
    client.execute::<Empty>(flaky).await?;
    println!("flaky endpoint recovered after retries");

    Ok(())
}
