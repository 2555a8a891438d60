//! Presentation and observability events.
//!
//! Stages publish [`Event`]s to an [`EventBus`]; UI layers and diagnostics
//! subscribe to it. Publishing never fails: with no subscribers the event is
//! dropped.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::interceptor::{BoxFuture, Interceptor, Next};
use crate::response::Response;

/// Something a presentation layer may want to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    LoadingStarted { text: Option<String> },
    LoadingFinished,
    /// The server rejected the call; `message` is what it said.
    ValidationFailed { code: String, message: Option<String> },
    TimedOut { after: Duration },
    Failed { error: String },
    RetryScheduled { attempt: u32, delay: Duration, error: String },
    RetrySucceeded { attempts: u32 },
    RetriesExhausted { attempts: u32, error: String },
    CacheHit,
}

/// A published event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub url: String,
    pub kind: EventKind,
    pub published_at: DateTime<Utc>,
}

/// Broadcast channel for [`Event`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Create a new bus; slow subscribers lag once `capacity` events queue up.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, url: impl Into<String>, kind: EventKind) {
        let event = Event {
            url: url.into(),
            kind,
            published_at: Utc::now(),
        };
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// Publishes loading and failure events for each call.
///
/// Loading events are emitted only when the call carries
/// [`ShowLoading(true)`](crate::context::ShowLoading); the optional
/// [`LoadingText`](crate::context::LoadingText) travels with the start event.
/// Failures are always published, except cancellations.
pub struct PresentationInterceptor {
    events: EventBus,
    priority: i32,
}

impl PresentationInterceptor {
    pub const DEFAULT_PRIORITY: i32 = 20_000;

    pub fn new(events: EventBus) -> Self {
        Self {
            events,
            priority: Self::DEFAULT_PRIORITY,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Interceptor for PresentationInterceptor {
    fn name(&self) -> &str {
        "presentation"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn intercept(&self, ctx: Context, next: Next) -> BoxFuture<Result<Response>> {
        let events = self.events.clone();
        let url = ctx.request().url();
        let loading = ctx.loading().map(|text| text.map(str::to_owned));

        Box::pin(async move {
            if let Some(text) = loading.clone() {
                events.publish(&url, EventKind::LoadingStarted { text });
            }

            let outcome = next.run(ctx).await;

            if loading.is_some() {
                events.publish(&url, EventKind::LoadingFinished);
            }
            match &outcome {
                Ok(response) if response.is_from_cache() => events.publish(&url, EventKind::CacheHit),
                Ok(_) | Err(Error::Cancelled) => {}
                Err(Error::ValidationFailed { response, .. }) => events.publish(
                    &url,
                    EventKind::ValidationFailed {
                        code: response.code().to_string(),
                        message: response.message().map(str::to_owned),
                    },
                ),
                Err(Error::TimedOut { after }) => {
                    events.publish(&url, EventKind::TimedOut { after: *after })
                }
                Err(err) => events.publish(
                    &url,
                    EventKind::Failed {
                        error: err.to_string(),
                    },
                ),
            }

            outcome
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{LoadingText, ShowLoading};
    use crate::interceptor::{Handler, build_chain, from_fn};
    use crate::request::{Method, Request};
    use crate::response::{KeyMap, decode};
    use bytes::Bytes;
    use std::sync::Arc;

    fn terminal(body: &'static [u8]) -> Handler {
        Arc::new(move |ctx: Context| -> BoxFuture<Result<Response>> {
            Box::pin(async move {
                decode(
                    Bytes::from_static(body),
                    Arc::clone(ctx.request()),
                    &KeyMap::default(),
                )
            })
        })
    }

    fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }

    #[tokio::test]
    async fn publishes_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish("https://a.io", EventKind::LoadingFinished);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn loading_events_wrap_the_call() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let mark = from_fn("mark", i32::MAX, |mut ctx: Context, next: Next| async move {
            ctx.insert(ShowLoading(true));
            ctx.insert(LoadingText("Loading profile".into()));
            next.run(ctx).await
        });
        let presentation: Arc<dyn Interceptor> = Arc::new(PresentationInterceptor::new(bus.clone()));
        let chain = build_chain(&[mark, presentation], &[], terminal(br#"{"code":0}"#));

        let request = Request::builder(Method::Get, "https://a.io", "/me").build();
        chain(Context::new(request, Duration::from_secs(1))).await.unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![
                EventKind::LoadingStarted {
                    text: Some("Loading profile".into())
                },
                EventKind::LoadingFinished,
            ]
        );
    }

    #[tokio::test]
    async fn validation_failures_carry_the_server_message() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let presentation: Arc<dyn Interceptor> = Arc::new(PresentationInterceptor::new(bus.clone()));
        let chain = build_chain(
            &[presentation],
            &[],
            terminal(br#"{"code":7,"msg":"insufficient balance"}"#),
        );

        let request = Request::builder(Method::Post, "https://a.io", "/pay")
            .success_when(|code| code.to_i64() == 0)
            .build();
        let err = chain(Context::new(request, Duration::from_secs(1)))
            .await
            .unwrap_err();

        assert_eq!(err.message(), Some("insufficient balance"));
        assert_eq!(
            drain(&mut rx),
            vec![EventKind::ValidationFailed {
                code: "7".into(),
                message: Some("insufficient balance".into()),
            }]
        );
    }
}
