//! In-flight request deduplication.
//!
//! Concurrent calls with the same fingerprint share one execution. The
//! registry of in-flight executions, plus a bounded memo of canonical strings
//! to identifiers, is owned by a single actor task; callers reach it only
//! through commands with `oneshot` replies.
//!
//! ## Lifecycle of a shared execution
//!
//! 1. The first caller registers an entry and the actor spawns the work, raced
//!    against the call's timeout.
//! 2. Later callers with the same fingerprint attach to the entry and await
//!    the same outcome.
//! 3. When the work finishes, its task tells the actor to remove the entry.
//!    Removal is generation-checked, so it happens exactly once.
//!
//! ## Cancellation
//!
//! Attachment is reference counted. A caller that is cancelled, or whose
//! future is dropped, detaches. The execution is aborted only when the last
//! caller detaches before it completes.

use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    num::NonZeroUsize,
    future::Future,
    sync::Arc,
    time::Duration,
};

use futures::future::{FutureExt, Shared};
use lru::LruCache;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{Error, Result, TransportError};
use crate::fingerprint;
use crate::interceptor::{BoxFuture, Interceptor, Next};
use crate::response::Response;

type SharedOutcome<T> = Shared<BoxFuture<Result<T>>>;
type ErasedOutcome = Arc<dyn Any + Send + Sync>;
type StartFn = Box<dyn FnOnce(u64) -> (ErasedOutcome, AbortHandle) + Send>;

/// Messages understood by the registry actor.
enum RegistryCommand {
    /// Resolve a canonical string to its identifier, using the memo.
    Identifier {
        canonical: String,
        resp: oneshot::Sender<String>,
    },
    /// Attach to the execution registered under `fingerprint`, or start one.
    Join {
        fingerprint: String,
        type_id: TypeId,
        start: StartFn,
        resp: oneshot::Sender<Joined>,
    },
    /// A waiter stopped waiting before the execution completed.
    Detach { fingerprint: String, generation: u64 },
    /// The execution finished; drop its entry.
    Complete { fingerprint: String, generation: u64 },
    /// Number of executions currently registered.
    InFlight { resp: oneshot::Sender<usize> },
}

struct Joined {
    generation: u64,
    outcome: ErasedOutcome,
    registered: bool,
}

struct Entry {
    generation: u64,
    type_id: TypeId,
    outcome: ErasedOutcome,
    abort: AbortHandle,
    waiters: usize,
}

/// State owned by the actor task.
struct RegistryState {
    entries: HashMap<String, Entry>,
    /// Entries replaced by a caller expecting another result type, keyed by
    /// generation. Their waiters can still detach and cancel them.
    displaced: HashMap<u64, Entry>,
    next_generation: u64,
    /// Canonical string to identifier. `None` when memoisation is off.
    memo: Option<LruCache<String, String>>,
}

impl RegistryState {
    fn new(memo_capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            displaced: HashMap::new(),
            next_generation: 0,
            memo: NonZeroUsize::new(memo_capacity).map(LruCache::new),
        }
    }

    fn handle(&mut self, command: RegistryCommand) {
        match command {
            RegistryCommand::Identifier { canonical, resp } => {
                let id = self.identifier(canonical);
                let _ = resp.send(id);
            }
            RegistryCommand::Join {
                fingerprint,
                type_id,
                start,
                resp,
            } => self.join(fingerprint, type_id, start, resp),
            RegistryCommand::Detach {
                fingerprint,
                generation,
            } => self.detach(&fingerprint, generation),
            RegistryCommand::Complete {
                fingerprint,
                generation,
            } => {
                if self.remove(&fingerprint, generation).is_some() {
                    debug!(%fingerprint, generation, "shared execution completed");
                }
            }
            RegistryCommand::InFlight { resp } => {
                let _ = resp.send(self.entries.len() + self.displaced.len());
            }
        }
    }

    fn identifier(&mut self, canonical: String) -> String {
        let Some(memo) = self.memo.as_mut() else {
            return fingerprint::identifier_for(&canonical);
        };
        if let Some(id) = memo.get(&canonical) {
            return id.clone();
        }
        let id = fingerprint::identifier_for(&canonical);
        memo.put(canonical, id.clone());
        id
    }

    fn join(
        &mut self,
        fingerprint: String,
        type_id: TypeId,
        start: StartFn,
        resp: oneshot::Sender<Joined>,
    ) {
        let attached = match self.entries.get_mut(&fingerprint) {
            Some(entry) if entry.type_id == type_id => {
                entry.waiters += 1;
                Some(Joined {
                    generation: entry.generation,
                    outcome: Arc::clone(&entry.outcome),
                    registered: false,
                })
            }
            Some(_) => {
                if let Some(entry) = self.entries.remove(&fingerprint) {
                    debug!(
                        %fingerprint,
                        generation = entry.generation,
                        "in-flight entry has a different result type, replacing it"
                    );
                    self.displaced.insert(entry.generation, entry);
                }
                None
            }
            None => None,
        };

        let joined = match attached {
            Some(joined) => joined,
            None => {
                self.next_generation += 1;
                let generation = self.next_generation;
                let (outcome, abort) = start(generation);
                self.entries.insert(
                    fingerprint.clone(),
                    Entry {
                        generation,
                        type_id,
                        outcome: Arc::clone(&outcome),
                        abort,
                        waiters: 1,
                    },
                );
                Joined {
                    generation,
                    outcome,
                    registered: true,
                }
            }
        };

        let generation = joined.generation;
        if resp.send(joined).is_err() {
            // The caller went away while waiting for the reply.
            self.detach(&fingerprint, generation);
        }
    }

    fn entry_mut(&mut self, fingerprint: &str, generation: u64) -> Option<&mut Entry> {
        match self.entries.get_mut(fingerprint) {
            Some(entry) if entry.generation == generation => Some(entry),
            _ => self.displaced.get_mut(&generation),
        }
    }

    /// Drops the entry of `generation`, live or displaced.
    fn remove(&mut self, fingerprint: &str, generation: u64) -> Option<Entry> {
        if self
            .entries
            .get(fingerprint)
            .is_some_and(|entry| entry.generation == generation)
        {
            return self.entries.remove(fingerprint);
        }
        self.displaced.remove(&generation)
    }

    fn detach(&mut self, fingerprint: &str, generation: u64) {
        let Some(entry) = self.entry_mut(fingerprint, generation) else {
            return;
        };
        entry.waiters = entry.waiters.saturating_sub(1);
        if entry.waiters == 0 {
            entry.abort.abort();
            self.remove(fingerprint, generation);
            debug!(%fingerprint, generation, "last waiter detached, shared execution aborted");
        }
    }
}

async fn run_registry(mut rx: mpsc::UnboundedReceiver<RegistryCommand>, memo_capacity: usize) {
    let mut state = RegistryState::new(memo_capacity);
    while let Some(command) = rx.recv().await {
        state.handle(command);
    }
    debug!("deduplication registry stopped");
}

/// Sends `Complete` when the spawned execution ends, however it ends.
struct CompletionGuard {
    tx: mpsc::UnboundedSender<RegistryCommand>,
    fingerprint: String,
    generation: u64,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(RegistryCommand::Complete {
            fingerprint: std::mem::take(&mut self.fingerprint),
            generation: self.generation,
        });
    }
}

/// Sends `Detach` if the waiter stops before the execution completes.
struct WaiterGuard {
    tx: mpsc::UnboundedSender<RegistryCommand>,
    fingerprint: String,
    generation: u64,
    armed: bool,
}

impl WaiterGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.tx.send(RegistryCommand::Detach {
                fingerprint: std::mem::take(&mut self.fingerprint),
                generation: self.generation,
            });
        }
    }
}

/// Races `work` against `timeout`; the loser is dropped.
async fn with_timeout<T, F>(timeout: Duration, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, work)
        .await
        .unwrap_or(Err(Error::TimedOut { after: timeout }))
}

/// Handle to the in-flight registry.
///
/// Cloning is cheap; every clone talks to the same actor task. The actor stops
/// once every handle, and every execution it spawned, is gone.
#[derive(Clone)]
pub struct Registry {
    tx: mpsc::UnboundedSender<RegistryCommand>,
    enabled: bool,
}

impl Registry {
    /// Default capacity of the identifier memo.
    pub const DEFAULT_IDENTIFIER_CAPACITY: usize = 100;

    /// Spawns the registry actor. Must be called from within a tokio runtime.
    ///
    /// `enabled` is the global deduplication switch; when it is off every call
    /// runs its own execution. `identifier_capacity` bounds the memo of
    /// canonical strings to identifiers; the least recently used entry is
    /// evicted first.
    pub fn new(enabled: bool, identifier_capacity: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_registry(rx, identifier_capacity));
        Self { tx, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Resolves `canonical` to its stable identifier.
    ///
    /// Falls back to hashing directly if the actor is unavailable.
    pub async fn identifier(&self, canonical: String) -> String {
        let (resp, rx) = oneshot::channel();
        let fallback = fingerprint::identifier_for(&canonical);
        if self
            .tx
            .send(RegistryCommand::Identifier { canonical, resp })
            .is_err()
        {
            return fallback;
        }
        rx.await.unwrap_or(fallback)
    }

    /// Number of executions currently shared through the registry.
    pub async fn in_flight(&self) -> usize {
        let (resp, rx) = oneshot::channel();
        if self.tx.send(RegistryCommand::InFlight { resp }).is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Runs `work` for the call described by `ctx`, sharing it with any
    /// identical call already in flight.
    ///
    /// Deduplication is skipped when it is switched off globally, on the
    /// request, or through the [`Deduplicate`](crate::context::Deduplicate)
    /// side-channel value. Either way `work` is raced against the context's
    /// timeout.
    pub async fn execute_with_deduplication<T, F>(&self, ctx: &Context, work: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let timeout = ctx.timeout();
        if !self.enabled || !ctx.deduplicate() {
            return with_timeout(timeout, work).await;
        }

        let request = ctx.request();
        let canonical = fingerprint::dedup_canonical(
            request.method(),
            &request.url(),
            ctx.headers(),
            ctx.params(),
            request.dedup_filter(),
        );
        let fingerprint = self.identifier(canonical).await;
        self.share(fingerprint, timeout, work).await
    }

    /// Runs `work` under `fingerprint`, or awaits the execution already
    /// registered under it.
    pub async fn share<T, F>(&self, fingerprint: String, timeout: Duration, work: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let tx = self.tx.clone();
        let task_fingerprint = fingerprint.clone();
        let start: StartFn = Box::new(move |generation| {
            let guard = CompletionGuard {
                tx,
                fingerprint: task_fingerprint,
                generation,
            };
            let task = tokio::spawn(async move {
                let _guard = guard;
                with_timeout(timeout, work).await
            });
            let abort = task.abort_handle();
            let outcome: BoxFuture<Result<T>> = Box::pin(async move {
                match task.await {
                    Ok(outcome) => outcome,
                    Err(err) if err.is_cancelled() => Err(Error::Cancelled),
                    Err(err) => Err(Error::Transport(TransportError::Other(format!(
                        "shared execution failed: {err}"
                    )))),
                }
            });
            let outcome: SharedOutcome<T> = outcome.shared();
            (Arc::new(outcome) as ErasedOutcome, abort)
        });

        let (resp, rx) = oneshot::channel();
        self.tx
            .send(RegistryCommand::Join {
                fingerprint: fingerprint.clone(),
                type_id: TypeId::of::<SharedOutcome<T>>(),
                start,
                resp,
            })
            .map_err(|_| registry_stopped())?;
        let joined = rx.await.map_err(|_| registry_stopped())?;

        let mut guard = WaiterGuard {
            tx: self.tx.clone(),
            fingerprint: fingerprint.clone(),
            generation: joined.generation,
            armed: true,
        };
        if joined.registered {
            debug!(%fingerprint, generation = joined.generation, "registered shared execution");
        } else {
            debug!(%fingerprint, generation = joined.generation, "attached to in-flight execution");
        }

        let outcome = joined
            .outcome
            .downcast::<SharedOutcome<T>>()
            .map_err(|_| Error::TypeMismatch {
                expected: type_name::<T>(),
                found: "a different in-flight result type".into(),
            })?;

        let result = outcome.as_ref().clone().await;
        guard.disarm();
        result
    }
}

fn registry_stopped() -> Error {
    warn!("deduplication registry is not running");
    Error::Transport(TransportError::Other(
        "deduplication registry is not running".into(),
    ))
}

/// Core stage that shares identical in-flight calls.
pub struct DedupInterceptor {
    registry: Registry,
}

impl DedupInterceptor {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }
}

impl Interceptor for DedupInterceptor {
    fn name(&self) -> &str {
        "dedup"
    }

    fn intercept(&self, ctx: Context, next: Next) -> BoxFuture<Result<Response>> {
        let registry = self.registry.clone();
        Box::pin(async move {
            let work_ctx = ctx.clone();
            let shared = registry
                .execute_with_deduplication(&ctx, async move { next.run(work_ctx).await })
                .await?;
            Ok(shared.for_request(Arc::clone(ctx.request())))
        })
    }
}
