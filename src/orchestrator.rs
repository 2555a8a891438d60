//! Per-call orchestration.
//!
//! An [`Orchestrator`] drives one logical call through the client's chain. It
//! owns the call's [`CallState`], published on a `watch` channel:
//!
//! ```text
//! Idle ──execute──▶ Running ──▶ Succeeded | Failed
//!   │                  │
//!   └──────cancel──────┴──▶ Cancelled
//! ```
//!
//! Cancelling interrupts user stages and retry sleeps, detaches the call from
//! any shared execution, and tells the transport to abandon its attempt. A
//! cancelled call stays cancelled.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use futures::Stream;
use futures::channel::mpsc;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::client::Client;
use crate::context::{Cancellation, Context};
use crate::error::{Error, Result};
use crate::events::EventKind;
use crate::fingerprint;
use crate::request::Request;
use crate::response::{Response, decode};

/// Lifecycle of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

/// Drives a single request. Clones share the same state and cancellation.
#[derive(Clone)]
pub struct Orchestrator {
    client: Client,
    request: Arc<Request>,
    state: Arc<watch::Sender<CallState>>,
}

impl Orchestrator {
    pub(crate) fn new(client: Client, request: Arc<Request>) -> Self {
        let (state, _) = watch::channel(CallState::Idle);
        Self {
            client,
            request,
            state: Arc::new(state),
        }
    }

    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    /// Watches state transitions.
    pub fn subscribe(&self) -> watch::Receiver<CallState> {
        self.state.subscribe()
    }

    /// Requests cancellation. Has no effect once the call has finished.
    pub fn cancel(&self) {
        let cancelled = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = CallState::Cancelled;
                true
            }
        });
        if cancelled {
            debug!(url = %self.request.url(), "call cancelled");
        }
    }

    /// Runs the call through the chain and decodes its data into `T`.
    ///
    /// A successful, typed response is offered to the cache; a failed save is
    /// only logged. A response whose data does not decode into `T` fails the
    /// call and is published as [`EventKind::Failed`].
    pub async fn execute<T>(&self) -> Result<Response<T>>
    where
        T: DeserializeOwned,
    {
        if !self.begin() {
            return Err(Error::Cancelled);
        }

        let timeout = self
            .request
            .timeout()
            .unwrap_or_else(|| self.client.default_timeout());
        let cancellation = Cancellation::new(self.state.subscribe());
        let ctx = Context::with_cancellation(Arc::clone(&self.request), timeout, cancellation.clone());
        let chain = self.client.chain();

        let outcome = tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(Error::Cancelled),
            outcome = chain(ctx) => outcome,
        };

        let outcome = match outcome {
            Ok(response) => {
                let typed = response.clone().into_typed::<T>();
                match &typed {
                    Ok(_) if !response.is_from_cache() => {
                        self.client.cache().save(&self.request, &response).await;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(url = %self.request.url(), error = %err, "response data did not decode");
                        self.client.events().publish(
                            self.request.url(),
                            EventKind::Failed {
                                error: err.to_string(),
                            },
                        );
                    }
                }
                typed
            }
            Err(err) => Err(err),
        };

        self.finish(if outcome.is_ok() {
            CallState::Succeeded
        } else {
            CallState::Failed
        });
        outcome
    }

    /// Reads the cached response for this request, if a live one exists.
    pub async fn load_cache<T>(&self) -> Result<Option<Response<T>>>
    where
        T: DeserializeOwned,
    {
        let Some(metadata) = self.client.cache().load(&self.request).await else {
            return Ok(None);
        };
        let key_map = self
            .request
            .key_map()
            .unwrap_or_else(|| self.client.key_map());
        let response = decode(metadata.payload, Arc::clone(&self.request), key_map)?.from_cache();
        let typed = response.into_typed::<T>()?;
        self.client
            .events()
            .publish(self.request.url(), EventKind::CacheHit);
        Ok(Some(typed))
    }

    /// Whether a live cache entry exists for this request.
    pub async fn has_cache(&self) -> bool {
        self.client.cache().exists(&self.request).await
    }

    /// Emits the cached response (if any) and then the network response.
    ///
    /// Both run concurrently. The network result always ends the stream; a
    /// cache hit is emitted only if it arrives first. Cache failures are
    /// logged and skipped. Dropping the stream cancels the call.
    pub fn execute_with_cache<T>(&self) -> CacheThenNetwork<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded();
        let this = self.clone();

        let driver = tokio::spawn(async move {
            let network = this.execute::<T>();
            let cache = this.load_cache::<T>();
            tokio::pin!(network);
            tokio::pin!(cache);
            let mut cache_done = false;

            loop {
                tokio::select! {
                    biased;
                    outcome = &mut network => {
                        let _ = tx.unbounded_send(outcome);
                        break;
                    }
                    loaded = &mut cache, if !cache_done => {
                        cache_done = true;
                        match loaded {
                            Ok(Some(response)) => {
                                let _ = tx.unbounded_send(Ok(response));
                            }
                            Ok(None) => {}
                            Err(err) => {
                                warn!(url = %this.request.url(), error = %err, "ignoring unreadable cache entry");
                            }
                        }
                    }
                }
            }
        });

        CacheThenNetwork {
            rx,
            driver: driver.abort_handle(),
            orchestrator: self.clone(),
        }
    }

    /// The deduplication fingerprint of this request's descriptor.
    pub async fn fingerprint(&self) -> String {
        let canonical = fingerprint::dedup_canonical(
            self.request.method(),
            &self.request.url(),
            self.request.headers(),
            self.request.params(),
            self.request.dedup_filter(),
        );
        self.client.registry().identifier(canonical).await
    }

    /// The cache key of this request, when it is cacheable.
    pub async fn cache_key(&self) -> Option<String> {
        let config = self.request.cache()?;
        Some(self.client.cache().key(&self.request, config).await)
    }

    fn begin(&self) -> bool {
        let mut started = false;
        self.state.send_if_modified(|state| {
            if *state == CallState::Cancelled {
                return false;
            }
            *state = CallState::Running;
            started = true;
            true
        });
        started
    }

    fn finish(&self, terminal: CallState) {
        self.state.send_if_modified(|state| {
            if *state == CallState::Cancelled {
                false
            } else {
                *state = terminal;
                true
            }
        });
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("request", &self.request)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Stream returned by [`Orchestrator::execute_with_cache`].
pub struct CacheThenNetwork<T> {
    rx: mpsc::UnboundedReceiver<Result<Response<T>>>,
    driver: AbortHandle,
    orchestrator: Orchestrator,
}

impl<T> Stream for CacheThenNetwork<T> {
    type Item = Result<Response<T>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }
}

impl<T> Drop for CacheThenNetwork<T> {
    fn drop(&mut self) {
        self.orchestrator.cancel();
        self.driver.abort();
    }
}
