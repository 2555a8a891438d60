#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use courier::cache::{CacheMetadata, MemoryStorage, Storage};
use courier::transport::Transport;
use courier::{Context, Request, TransportError};
use tokio::time::Instant;

/// One scripted reply: wait `delay`, then answer with `outcome`.
#[derive(Clone)]
pub struct Reply {
    pub delay: Duration,
    pub outcome: Result<Bytes, TransportError>,
}

impl Reply {
    pub fn ok(body: &str) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Ok(Bytes::from(body.to_owned())),
        }
    }

    pub fn fail(error: TransportError) -> Self {
        Self {
            delay: Duration::ZERO,
            outcome: Err(error),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// In-memory transport replaying a script. The last reply repeats once the
/// script runs out.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    last: Mutex<Option<Reply>>,
    calls: AtomicUsize,
    call_times: Mutex<Vec<Instant>>,
    cancels: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(replies.into_iter().collect()),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    fn next_reply(&self) -> Reply {
        let mut script = self.script.lock().unwrap();
        let mut last = self.last.lock().unwrap();
        if let Some(reply) = script.pop_front() {
            *last = Some(reply.clone());
            return reply;
        }
        last.clone()
            .unwrap_or_else(|| Reply::fail(TransportError::Other("script is empty".into())))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, _ctx: &Context) -> Result<Bytes, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        let reply = self.next_reply();
        tokio::time::sleep(reply.delay).await;
        reply.outcome
    }

    fn cancel(&self, _request: &Request) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// Storage whose reads take `delay`, recording whether a read ever finished.
pub struct SlowStorage {
    inner: MemoryStorage,
    delay: Duration,
    reads_finished: AtomicUsize,
    read_started: AtomicBool,
}

impl SlowStorage {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStorage::new(),
            delay,
            reads_finished: AtomicUsize::new(0),
            read_started: AtomicBool::new(false),
        })
    }

    pub fn reads_finished(&self) -> usize {
        self.reads_finished.load(Ordering::SeqCst)
    }

    pub fn read_started(&self) -> bool {
        self.read_started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Storage for SlowStorage {
    async fn get(&self, key: &str) -> Option<CacheMetadata> {
        self.read_started.store(true, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.reads_finished.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, metadata: CacheMetadata) -> bool {
        self.inner.set(key, metadata).await
    }

    async fn exists(&self, key: &str) -> bool {
        self.inner.exists(key).await
    }
}

pub fn envelope(code: i64, data: serde_json::Value) -> String {
    serde_json::json!({ "code": code, "data": data, "msg": "ok" }).to_string()
}
