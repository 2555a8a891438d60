//! The client: long-lived owner of the transport, cache, registry and stages.
//!
//! A [`Client`] is cheap to clone and meant to be shared. Each call gets its own
//! [`Orchestrator`] from [`Client::request`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::cache::{CacheManager, Clock, NoopStorage, Storage};
use crate::config::ClientConfig;
use crate::dedup::{DedupInterceptor, Registry};
use crate::error::Result;
use crate::events::{EventBus, PresentationInterceptor};
use crate::interceptor::{Handler, Interceptor, build_chain};
use crate::orchestrator::Orchestrator;
use crate::request::Request;
use crate::response::{KeyMap, ParsingInterceptor, Response};
use crate::retry::{RetryInterceptor, RetryPolicy};
use crate::transport::{self, Transport};

struct ClientInner {
    transport: Arc<dyn Transport>,
    cache: CacheManager,
    registry: Registry,
    interceptors: Vec<Arc<dyn Interceptor>>,
    core: Vec<Arc<dyn Interceptor>>,
    key_map: KeyMap,
    default_timeout: Duration,
    events: EventBus,
}

/// Request orchestration client.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use courier::{Client, Request, Method, MemoryStorage};
/// # use courier::transport::Transport;
/// # async fn demo(transport: Arc<dyn Transport>) -> courier::Result<()> {
///
/// let client = Client::builder(transport)
///     .storage(Arc::new(MemoryStorage::new()))
///     .build();
///
/// let request = Request::builder(Method::Get, "https://api.example.com", "/v1/me").build();
/// let me = client.execute::<serde_json::Value>(request).await?;
/// println!("{:?}", me.data());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn builder(transport: Arc<dyn Transport>) -> ClientBuilder {
        ClientBuilder::new(transport)
    }

    /// Creates the orchestrator for one call.
    pub fn request(&self, request: Arc<Request>) -> Orchestrator {
        Orchestrator::new(self.clone(), request)
    }

    /// Shorthand for `request(request).execute::<T>()`.
    pub async fn execute<T>(&self, request: Arc<Request>) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        self.request(request).execute::<T>().await
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn cache(&self) -> &CacheManager {
        &self.inner.cache
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn key_map(&self) -> &KeyMap {
        &self.inner.key_map
    }

    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Builds a fresh chain: user stages by priority, then parsing and dedup,
    /// then the transport. Parsing sits above dedup so every caller sharing an
    /// execution decodes and validates the payload against its own request.
    pub(crate) fn chain(&self) -> Handler {
        build_chain(
            &self.inner.interceptors,
            &self.inner.core,
            transport::terminal(Arc::clone(&self.inner.transport)),
        )
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.inner.interceptors.iter().map(|i| i.name()).collect();
        f.debug_struct("Client")
            .field("interceptors", &names)
            .field("key_map", &self.inner.key_map)
            .field("default_timeout", &self.inner.default_timeout)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    storage: Arc<dyn Storage>,
    config: ClientConfig,
    interceptors: Vec<Arc<dyn Interceptor>>,
    retry: Option<Arc<dyn RetryPolicy>>,
    key_map: Option<KeyMap>,
    clock: Option<Clock>,
    presentation: bool,
}

impl ClientBuilder {
    fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            storage: Arc::new(NoopStorage),
            config: ClientConfig::default(),
            interceptors: Vec::new(),
            retry: None,
            key_map: None,
            clock: None,
            presentation: false,
        }
    }

    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    #[must_use]
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a user stage. Order among equal priorities is registration order.
    #[must_use]
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Overrides the retry policy built from the configuration.
    #[must_use]
    pub fn retry(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry = Some(policy);
        self
    }

    #[must_use]
    pub fn no_retry(self) -> Self {
        self.retry(Arc::new(crate::retry::NoRetry))
    }

    /// Overrides the configured default key map.
    #[must_use]
    pub fn key_map(mut self, key_map: KeyMap) -> Self {
        self.key_map = Some(key_map);
        self
    }

    /// Installs a [`PresentationInterceptor`] publishing to the client's event bus.
    #[must_use]
    pub fn presentation(mut self) -> Self {
        self.presentation = true;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the client. Spawns the deduplication registry, so it must be
    /// called from within a tokio runtime.
    pub fn build(self) -> Client {
        let config = self.config;
        let registry = Registry::new(config.deduplication, config.identifier_cache_capacity);
        let events = EventBus::new(config.event_capacity);

        let mut cache = CacheManager::new(self.storage, registry.clone(), config.app_version.clone());
        if let Some(clock) = self.clock {
            cache = cache.with_clock(clock);
        }

        let mut interceptors = self.interceptors;
        let policy = self.retry.unwrap_or_else(|| config.retry.build_policy());
        if policy.max_attempts() > 1 {
            interceptors.push(Arc::new(RetryInterceptor::new(policy).with_events(events.clone())));
        }
        if self.presentation {
            interceptors.push(Arc::new(PresentationInterceptor::new(events.clone())));
        }

        let key_map = self.key_map.unwrap_or_else(|| config.key_map.clone());
        let core: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(ParsingInterceptor::new(key_map.clone())),
            Arc::new(DedupInterceptor::new(registry.clone())),
        ];

        debug!(
            interceptors = interceptors.len(),
            deduplication = config.deduplication,
            app_version = %config.app_version,
            "client built"
        );

        Client {
            inner: Arc::new(ClientInner {
                transport: self.transport,
                cache,
                registry,
                interceptors,
                core,
                key_map,
                default_timeout: config.default_timeout(),
                events,
            }),
        }
    }
}
