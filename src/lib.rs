//! # courier
//!
//! Async request orchestration middleware. Courier sits between application
//! code and a pluggable [`Transport`] and adds, around every call:
//!
//! - an ordered interceptor chain,
//! - deduplication of identical in-flight calls,
//! - response caching with TTL and app-version invalidation,
//! - business-level validation of `{code, data, msg}` envelopes,
//! - retries with exponential or fixed backoff,
//! - per-call cancellation and a cache-then-network stream.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use bytes::Bytes;
//! use courier::{CacheConfig, Client, Context, MemoryStorage, Method, Request, TransportError};
//! use courier::transport::Transport;
//!
//! struct Canned;
//!
//! #[async_trait]
//! impl Transport for Canned {
//!     async fn execute(&self, _ctx: &Context) -> Result<Bytes, TransportError> {
//!         Ok(Bytes::from_static(br#"{"code":0,"data":{"name":"ada"},"msg":"ok"}"#))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder(Arc::new(Canned))
//!         .storage(Arc::new(MemoryStorage::new()))
//!         .build();
//!
//!     let request = Request::builder(Method::Get, "https://api.example.com", "/v1/me")
//!         .success_when(|code| code.to_i64() == 0)
//!         .cache(CacheConfig::new(Duration::from_secs(60)))
//!         .build();
//!
//!     let me = client.execute::<serde_json::Value>(request).await?;
//!     println!("{}", me.data());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod context;
pub mod dedup;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod interceptor;
pub mod orchestrator;
pub mod request;
pub mod response;
pub mod retry;
pub mod transport;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CacheManager, CacheMetadata, MemoryStorage, NoopStorage, Storage};
pub use client::{Client, ClientBuilder};
pub use crate::config::ClientConfig;
pub use context::{Context, Deduplicate, LoadingText, ShowLoading};
pub use error::{Error, Result, TransportError};
pub use events::{Event, EventBus, EventKind};
pub use interceptor::{Interceptor, LoggerInterceptor, Next, from_fn};
pub use orchestrator::{CacheThenNetwork, CallState, Orchestrator};
pub use request::{CacheConfig, FieldFilter, Method, Request};
pub use response::{Code, Empty, KeyMap, Response};
pub use retry::{ExponentialBackoff, FixedInterval, NoRetry, RetryPolicy};
pub use transport::Transport;
