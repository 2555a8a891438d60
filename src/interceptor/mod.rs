//! Interceptor pipeline: composable before/after logic around a request.
//!
//! Each interceptor wraps the rest of the chain, enabling request rewriting,
//! short-circuit responses, retries and response post-processing without
//! coupling call sites to infrastructure concerns.
//!
//! ## Core types
//!
//! - [`Interceptor`]: trait implemented by every stage.
//! - [`Next`]: handle to the remainder of the chain; call [`Next::run`] to
//!   advance. It may be called zero, one, or many times.
//! - [`Handler`]: type-erased, cheaply-cloneable composed chain.
//! - [`build_chain`]: folds user stages (sorted by priority) and the core
//!   stages into one [`Handler`].
//! - [`from_fn`]: adapts an async closure into an [`Interceptor`].
//! - [`LoggerInterceptor`]: built-in request/outcome logger.
//!
//! ## Ordering
//!
//! User stages run in descending [`Interceptor::priority`] on the way in and
//! in the reverse order on the way out. Ties keep registration order. Core
//! stages are appended after every user stage, in the order given.

use std::{cmp::Reverse, future::Future, pin::Pin, sync::Arc};

use tokio::time::Instant;
use tracing::{info, warn};

use crate::context::Context;
use crate::error::Result;
use crate::response::Response;

/// A pinned, boxed, `Send` future as returned by interceptors.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A type-erased, reference-counted chain entry point.
///
/// The [`Arc`] wrapper makes handlers cheap to clone so that [`Next`] can be
/// handed to a stage, and invoked repeatedly, without copying closures.
pub type Handler = Arc<dyn Fn(Context) -> BoxFuture<Result<Response>> + Send + Sync + 'static>;

/// The remainder of the chain below the current interceptor.
///
/// # Examples
///
/// ```rust,no_run
/// use courier::{context::Context, error::Result, interceptor::{BoxFuture, Interceptor, Next}};
/// use courier::response::Response;
///
/// struct PassThrough;
///
/// impl Interceptor for PassThrough {
///     fn name(&self) -> &str {
///         "pass-through"
///     }
///
///     fn intercept(&self, ctx: Context, next: Next) -> BoxFuture<Result<Response>> {
///         Box::pin(async move { next.run(ctx).await })
///     }
/// }
/// ```
#[derive(Clone)]
pub struct Next {
    inner: Handler,
}

impl Next {
    pub fn new(inner: Handler) -> Self {
        Self { inner }
    }

    /// Invokes the rest of the chain with `ctx` and returns its outcome.
    pub async fn run(&self, ctx: Context) -> Result<Response> {
        (self.inner)(ctx).await
    }
}

/// The core trait for every pipeline stage.
///
/// Implementors receive a [`Context`] and a [`Next`]. They may:
///
/// - **Pass through**: `next.run(ctx).await`.
/// - **Short-circuit**: return a result without calling `next`.
/// - **Decorate**: call `next`, then inspect or replace the outcome.
/// - **Repeat**: call `next` again with a fresh clone of the context.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync`; one instance serves every call.
/// - `intercept` returns a `'static` future, so clone whatever state the future
///   needs out of `&self` first.
pub trait Interceptor: Send + Sync {
    /// A short name used in logs.
    fn name(&self) -> &str;

    /// Larger values run earlier on the way in.
    fn priority(&self) -> i32 {
        0
    }

    fn intercept(&self, ctx: Context, next: Next) -> BoxFuture<Result<Response>>;
}

/// Composes `user` (stably sorted by descending priority), then `core` (as
/// given), around `terminal` into a single handler.
///
/// The fold runs right to left so the first stage in the final order is the
/// outermost. The function holds no state; call it per request.
pub fn build_chain(
    user: &[Arc<dyn Interceptor>],
    core: &[Arc<dyn Interceptor>],
    terminal: Handler,
) -> Handler {
    let mut ordered: Vec<Arc<dyn Interceptor>> = user.to_vec();
    ordered.sort_by_key(|interceptor| Reverse(interceptor.priority()));
    ordered.extend(core.iter().cloned());

    ordered
        .into_iter()
        .rev()
        .fold(terminal, |inner, interceptor| {
            let next = Next::new(inner);
            let handler: Handler =
                Arc::new(move |ctx: Context| interceptor.intercept(ctx, next.clone()));
            handler
        })
}

/// An [`Interceptor`] backed by an async closure. Build one with [`from_fn`].
pub struct FnInterceptor<F> {
    name: String,
    priority: i32,
    f: F,
}

/// Adapts an async closure into an [`Interceptor`].
///
/// # Examples
///
/// ```rust,no_run
/// use courier::interceptor::from_fn;
///
/// let auth = from_fn("auth", 100, |mut ctx, next| async move {
///     ctx.headers_mut().set("Authorization", "Bearer token");
///     next.run(ctx).await
/// });
/// ```
pub fn from_fn<F, Fut>(name: impl Into<String>, priority: i32, f: F) -> Arc<dyn Interceptor>
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    Arc::new(FnInterceptor {
        name: name.into(),
        priority,
        f,
    })
}

impl<F, Fut> Interceptor for FnInterceptor<F>
where
    F: Fn(Context, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn intercept(&self, ctx: Context, next: Next) -> BoxFuture<Result<Response>> {
        Box::pin((self.f)(ctx, next))
    }
}

/// Built-in interceptor that logs each call's method, URL, outcome, and duration.
///
/// Emits one `tracing` record after the rest of the chain completes:
///
/// ```text
/// GET https://api.example.com/users - ok code=0 cache=false (12.3ms)
/// ```
///
/// `LoggerInterceptor` never short-circuits.
pub struct LoggerInterceptor {
    priority: i32,
}

impl LoggerInterceptor {
    pub const DEFAULT_PRIORITY: i32 = 10_000;

    pub fn new() -> Self {
        Self {
            priority: Self::DEFAULT_PRIORITY,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Default for LoggerInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Interceptor for LoggerInterceptor {
    fn name(&self) -> &str {
        "logger"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn intercept(&self, ctx: Context, next: Next) -> BoxFuture<Result<Response>> {
        Box::pin(async move {
            let start = Instant::now();
            let method = ctx.request().method().clone();
            let url = ctx.request().url();

            let outcome = next.run(ctx).await;
            let duration = start.elapsed();

            match &outcome {
                Ok(response) => info!(
                    "{} {} - ok code={} cache={} ({:?})",
                    method,
                    url,
                    response.code(),
                    response.is_from_cache(),
                    duration
                ),
                Err(error) => warn!("{} {} - failed: {} ({:?})", method, url, error, duration),
            }

            outcome
        })
    }
}
