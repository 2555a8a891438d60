//! Per-call context: the mutable overlay interceptors work on.
//!
//! A [`Context`] wraps the immutable [`Request`] with copies of its headers and
//! parameters that interceptors may rewrite, an open typed side-channel
//! ([`Extensions`]) for signalling between stages, the effective timeout, and
//! the call's cancellation signal.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use tokio::sync::watch;

use crate::orchestrator::CallState;
use crate::request::{Headers, Parameters, Request};

/// Asks presentation stages to show a loading indicator for this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShowLoading(pub bool);

/// Text shown alongside the loading indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadingText(pub String);

/// Overrides the request's deduplication switch for this call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deduplicate(pub bool);

/// Type-erased side-channel map: used to pass per-call values between
/// interceptors without requiring them to know about each other's types.
///
/// Values are reference counted so a context can be cloned cheaply when a stage
/// re-runs the rest of the chain.
#[derive(Default, Clone)]
pub struct Extensions {
    map: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create a new empty extensions map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous value of the same type
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Get a value from the extensions map
    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Remove a value from the extensions map, returning whether one was present
    pub fn remove<T>(&mut self) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.map.remove(&TypeId::of::<T>()).is_some()
    }

    pub fn contains<T>(&self) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.map.contains_key(&TypeId::of::<T>())
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// Observes whether the owning call has been cancelled.
#[derive(Debug, Clone)]
pub struct Cancellation {
    state: watch::Receiver<CallState>,
}

impl Cancellation {
    pub(crate) fn new(state: watch::Receiver<CallState>) -> Self {
        Self { state }
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        let (_, state) = watch::channel(CallState::Running);
        Self { state }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow() == CallState::Cancelled
    }

    /// Resolves once the call is cancelled; pends forever if it never is.
    pub async fn cancelled(&self) {
        let mut state = self.state.clone();
        let observed = state
            .wait_for(|state| *state == CallState::Cancelled)
            .await
            .is_ok();
        if !observed {
            std::future::pending::<()>().await;
        }
    }
}

/// The mutable request overlay for one call.
#[derive(Debug, Clone)]
pub struct Context {
    request: Arc<Request>,
    headers: Headers,
    params: Parameters,
    extensions: Extensions,
    timeout: Duration,
    cancellation: Cancellation,
}

impl Context {
    /// Create a context whose overlay starts as a copy of `request`.
    pub fn new(request: Arc<Request>, timeout: Duration) -> Self {
        Self::with_cancellation(request, timeout, Cancellation::never())
    }

    pub(crate) fn with_cancellation(
        request: Arc<Request>,
        timeout: Duration,
        cancellation: Cancellation,
    ) -> Self {
        Self {
            headers: request.headers().clone(),
            params: request.params().clone(),
            request,
            extensions: Extensions::new(),
            timeout,
            cancellation,
        }
    }

    /// The immutable descriptor this overlay was created from.
    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Shorthand for `extensions_mut().insert(value)`.
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.extensions.insert(value);
    }

    /// Shorthand for `extensions().get::<T>()`.
    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.extensions.get::<T>()
    }

    /// The effective timeout of one top-level execution.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cancellation(&self) -> &Cancellation {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the owning call is cancelled.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Whether this call may share an in-flight execution. A [`Deduplicate`]
    /// side-channel value takes precedence over the request's own switch.
    pub fn deduplicate(&self) -> bool {
        self.get::<Deduplicate>()
            .map_or(self.request.deduplicate(), |flag| flag.0)
    }

    /// Whether a loading indicator was requested, and its text.
    pub fn loading(&self) -> Option<Option<&str>> {
        match self.get::<ShowLoading>() {
            Some(ShowLoading(true)) => Some(self.get::<LoadingText>().map(|t| t.0.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Method;

    fn request() -> Arc<Request> {
        Request::builder(Method::Get, "https://a.io", "/x")
            .header("Accept", "json")
            .param("page", 1)
            .build()
    }

    #[test]
    fn overlay_does_not_touch_the_descriptor() {
        let req = request();
        let mut ctx = Context::new(Arc::clone(&req), Duration::from_secs(1));
        ctx.headers_mut().set("Authorization", "Bearer t");
        ctx.params_mut().insert("page", 2);

        assert_eq!(ctx.headers().get("authorization"), Some("Bearer t"));
        assert!(req.headers().get("authorization").is_none());
        assert_eq!(req.params().get("page"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn cloned_contexts_share_extension_values() {
        let mut ctx = Context::new(request(), Duration::from_secs(1));
        ctx.insert(LoadingText("Saving".into()));
        ctx.insert(ShowLoading(true));
        let copy = ctx.clone();
        assert_eq!(copy.loading(), Some(Some("Saving")));
    }

    #[test]
    fn side_channel_overrides_request_deduplication() {
        let mut ctx = Context::new(request(), Duration::from_secs(1));
        assert!(ctx.deduplicate());
        ctx.insert(Deduplicate(false));
        assert!(!ctx.deduplicate());
    }

    #[tokio::test]
    async fn cancellation_follows_call_state() {
        let (tx, rx) = watch::channel(CallState::Running);
        let cancellation = Cancellation::new(rx);
        assert!(!cancellation.is_cancelled());

        let waiter = tokio::spawn({
            let cancellation = cancellation.clone();
            async move { cancellation.cancelled().await }
        });
        tx.send_replace(CallState::Cancelled);
        waiter.await.unwrap();
        assert!(cancellation.is_cancelled());
    }
}
