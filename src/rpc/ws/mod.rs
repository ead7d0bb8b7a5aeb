//! WebSocket transport (C3) — the hot path: a persistent, multiplexed
//! connection with lock-free request correlation (`slots`), batched writes
//! (`ring`), automatic reconnection, and subscription fan-out onto a
//! caller-configurable executor.
//!
//! Grounded in the teacher's `rpc::ws::WsClient` for the overall shape
//! (builder, `Inner` behind an `Arc`, reader/writer split, `Subscription`
//! drop-guard) but replaces its `Mutex<HashMap<u64, Sender>>` correlation
//! table with the lock-free [`slots::SlotTable`] the design calls for, and
//! adds the reconnect state machine and ring-buffer batching the teacher
//! never implemented.

pub mod ring;
pub mod slots;

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::codec::{self, Incoming};
use crate::config::WaitStrategy;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::external::MetricsSink;
use crate::rpc::Transport;

use ring::{Frame, RingBuffer};
use slots::{Allocation, CompleteResult, Occupancy, SlotTable};

const STATE_CONNECTING: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_CLOSING: u8 = 2;
const STATE_RECONNECTING: u8 = 3;
const STATE_TERMINATED: u8 = 4;

const RECONNECT_BASE_MS: u64 = 100;
const RECONNECT_MAX_MS: u64 = 5_000;
const RECONNECT_ATTEMPTS_PER_CYCLE: u32 = 5;
const SWEEP_PERIOD: Duration = Duration::from_millis(100);
const MAX_POLL_GROWTH_MS: u64 = 10_000;

pub struct WsClientBuilder {
    url: Url,
    connect_timeout: Duration,
    table_capacity: usize,
    ring_capacity: usize,
    default_request_timeout: Duration,
    wait_strategy: WaitStrategy,
    metrics: Arc<dyn MetricsSink>,
    executor: Arc<dyn Executor>,
}

impl WsClientBuilder {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            connect_timeout: Duration::from_secs(15),
            table_capacity: 65_536,
            ring_capacity: 4_096,
            default_request_timeout: Duration::from_secs(30),
            wait_strategy: WaitStrategy::Yielding,
            metrics: Arc::new(crate::external::NoopMetricsSink),
            executor: crate::executor::get_or_create(),
        }
    }

    #[must_use]
    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    #[must_use]
    pub fn table_capacity(mut self, n: usize) -> Self {
        self.table_capacity = n;
        self
    }

    #[must_use]
    pub fn ring_capacity(mut self, n: usize) -> Self {
        self.ring_capacity = n;
        self
    }

    #[must_use]
    pub fn default_request_timeout(mut self, d: Duration) -> Self {
        self.default_request_timeout = d;
        self
    }

    /// How a caller's retry-the-push wait behaves when the write ring is
    /// momentarily full (see [`Inner::call`]). `Yielding` gives the writer
    /// one scheduling turn; `Blocking` waits a short fixed slice of real
    /// time, trading latency for a better chance the writer has drained
    /// more space under sustained load.
    #[must_use]
    pub fn wait_strategy(mut self, s: WaitStrategy) -> Self {
        self.wait_strategy = s;
        self
    }

    #[must_use]
    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    #[must_use]
    pub fn executor(mut self, exec: Arc<dyn Executor>) -> Self {
        self.executor = exec;
        self
    }

    pub async fn connect(self) -> Result<WsClient> {
        let inner = Arc::new(Inner {
            url: self.url,
            state: AtomicU8::new(STATE_CONNECTING),
            table: SlotTable::new(self.table_capacity),
            occupancy: Occupancy::default(),
            ring: RingBuffer::new(self.ring_capacity, self.metrics.clone()),
            subs: Mutex::new(std::collections::HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            reconnect_attempts: AtomicU32::new(0),
            default_request_timeout: self.default_request_timeout,
            wait_strategy: self.wait_strategy,
            connect_timeout: self.connect_timeout,
            metrics: self.metrics,
            executor: self.executor,
        });

        inner.clone().establish().await?;
        inner.state.store(STATE_OPEN, Ordering::Release);

        let sweeper = tokio::spawn(Inner::sweeper_loop(inner.clone()));
        inner.tasks.lock().unwrap().push(sweeper);

        Ok(WsClient { inner })
    }
}

pub(crate) type SubCallback = Arc<dyn Fn(Value) + Send + Sync>;

struct Inner {
    url: Url,
    state: AtomicU8,
    table: SlotTable,
    occupancy: Occupancy,
    ring: RingBuffer,
    subs: Mutex<std::collections::HashMap<String, SubCallback>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    reconnect_attempts: AtomicU32,
    default_request_timeout: Duration,
    wait_strategy: WaitStrategy,
    connect_timeout: Duration,
    metrics: Arc<dyn MetricsSink>,
    executor: Arc<dyn Executor>,
}

impl Inner {
    /// Open the socket and spawn the reader/writer pair. On an unrecoverable
    /// disconnect they signal back here via the `broken` channel so
    /// `reconnect_loop` can take over.
    async fn establish(self: Arc<Self>) -> Result<()> {
        let (stream, _resp) = tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(self.url.as_str()))
            .await
            .map_err(|_| Error::Timeout(self.connect_timeout))?
            .map_err(Error::from)?;

        let (mut write, mut read) = stream.split();
        let (broken_tx, broken_rx) = mpsc::channel::<()>(1);

        let writer_inner = self.clone();
        let writer_broken = broken_tx.clone();
        let writer = tokio::spawn(async move {
            loop {
                if writer_inner.ring.is_empty() {
                    tokio::task::yield_now().await;
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    if writer_inner.is_terminal() {
                        return;
                    }
                    continue;
                }
                let batch = writer_inner.ring.drain_batch(256);
                let n = batch.len();
                for (i, frame) in batch.into_iter().enumerate() {
                    let msg = Message::Text(String::from_utf8_lossy(&frame.bytes).into_owned());
                    let res = if i + 1 == n { write.send(msg).await } else { write.feed(msg).await };
                    if let Err(e) = res {
                        warn!(error = %e, "websocket write failed");
                        let _ = writer_broken.try_send(());
                        return;
                    }
                }
            }
        });

        let reader_inner = self.clone();
        let reader_broken = broken_tx;
        let reader = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => reader_inner.dispatch(text.as_bytes()),
                    Ok(Message::Binary(bytes)) => reader_inner.dispatch(&bytes),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "websocket read failed");
                        break;
                    }
                }
            }
            let _ = reader_broken.try_send(());
        });

        let watchdog_inner = self.clone();
        let watchdog = tokio::spawn(async move {
            let mut broken_rx = broken_rx;
            let _ = broken_rx.recv().await;
            watchdog_inner.on_connection_broken().await;
        });

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(writer);
        tasks.push(reader);
        tasks.push(watchdog);
        Ok(())
    }

    fn dispatch(&self, bytes: &[u8]) {
        match codec::parse_incoming(bytes) {
            Ok(Incoming::Response(env)) => {
                let Some(id) = env.id else {
                    warn!("response envelope missing id, dropping");
                    return;
                };
                let outcome = match env.error {
                    Some(err) => Err(Error::from(crate::error::RpcErrorObj::from(err))),
                    None => Ok(env.result.unwrap_or(Value::Null)),
                };
                if self.table.complete(id, outcome) == CompleteResult::Completed {
                    self.occupancy.dec();
                }
            }
            Ok(Incoming::Notification(note)) => {
                let sub_id = note.params.subscription;
                let result = note.params.result;
                let cb = self.subs.lock().unwrap().get(&sub_id).cloned();
                if let Some(cb) = cb {
                    self.dispatch_notification(cb, result);
                }
            }
            Err(e) => {
                debug!(error = %e, "dropping unparseable frame");
            }
        }
    }

    /// Hand a notification off to the callback executor. Never runs the
    /// callback inline on the reader task (spec §4.8); a callback panic is
    /// caught and logged rather than taking down the worker.
    fn dispatch_notification(&self, cb: SubCallback, result: Value) {
        self.executor.spawn(Box::pin(async move {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cb(result)));
            if outcome.is_err() {
                warn!("subscription callback panicked; swallowed per spec");
            }
        }));
    }

    fn is_terminal(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_TERMINATED
    }

    async fn on_connection_broken(self: Arc<Self>) {
        let prev = self.state.swap(STATE_RECONNECTING, Ordering::AcqRel);
        if prev == STATE_TERMINATED || prev == STATE_CLOSING {
            return;
        }
        self.metrics.on_reconnect(self.reconnect_attempts.load(Ordering::Relaxed));

        for attempt in 1..=RECONNECT_ATTEMPTS_PER_CYCLE {
            self.reconnect_attempts.store(attempt, Ordering::Relaxed);
            let base = RECONNECT_BASE_MS.saturating_mul(1u64 << (attempt - 1).min(20));
            let delay = Duration::from_millis(base.min(RECONNECT_MAX_MS));
            tokio::time::sleep(delay).await;

            debug!(attempt, "attempting websocket reconnect");
            match self.clone().establish().await {
                Ok(()) => {
                    self.state.store(STATE_OPEN, Ordering::Release);
                    self.reconnect_attempts.store(0, Ordering::Relaxed);
                    return;
                }
                Err(e) => warn!(attempt, error = %e, "reconnect attempt failed"),
            }
        }

        warn!("reconnect attempts exhausted, terminating connection");
        self.state.store(STATE_TERMINATED, Ordering::Release);
        self.table.fail_all(|| Error::TransportClosed);
    }

    async fn sweeper_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(SWEEP_PERIOD).await;
            if self.is_terminal() {
                return;
            }
            let n = self.table.sweep_timeouts();
            if n > 0 {
                self.metrics.on_timeout("unknown");
            }
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        if self.is_terminal() {
            return Err(Error::TransportClosed);
        }
        let id = self.table.next_id();
        let rx = match self.table.allocate(id, Some(self.default_request_timeout)) {
            Allocation::Ok(rx) => rx,
            Allocation::Backpressure => {
                self.metrics.on_backpressure();
                return Err(Error::Backpressure);
            }
        };
        self.occupancy.inc();

        let mut buf = Vec::with_capacity(128);
        codec::encode_request_into(&mut buf, method, &params, id)?;
        if let Err(frame) = self.ring.push(Frame { bytes: buf }) {
            // Ring briefly full; the slot is already reserved so give the
            // writer one scheduling turn (or a short real wait, depending on
            // `wait_strategy`) and retry the same frame once before failing.
            match self.wait_strategy {
                WaitStrategy::Yielding => tokio::task::yield_now().await,
                WaitStrategy::Blocking => tokio::time::sleep(Duration::from_millis(1)).await,
            }
            if let Err(_frame) = self.ring.push(frame) {
                if self.table.complete(id, Err(Error::Backpressure)) == CompleteResult::Completed {
                    self.occupancy.dec();
                }
                self.metrics.on_backpressure();
                return Err(Error::Backpressure);
            }
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::TransportClosed),
        }
    }

    fn shutdown(&self) {
        let prev = self.state.swap(STATE_TERMINATED, Ordering::AcqRel);
        if prev == STATE_TERMINATED {
            return;
        }
        self.table.fail_all(|| Error::TransportClosed);
        let mut tasks = self.tasks.lock().unwrap();
        for t in tasks.drain(..) {
            t.abort();
        }
    }
}

/// WebSocket transport handle. Cheap to clone; all clones share the same
/// connection, slot table, and subscription registry.
#[derive(Clone)]
pub struct WsClient {
    inner: Arc<Inner>,
}

impl WsClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(Error::from)?;
        WsClientBuilder::new(url).connect().await
    }

    pub fn builder(url: Url) -> WsClientBuilder {
        WsClientBuilder::new(url)
    }

    /// Register a subscription callback for `sub_id`, as returned by
    /// `eth_subscribe`. Internal: the public subscribe flow lives in
    /// [`crate::subscription`], which owns id bookkeeping and the drop
    /// guard; this only wires the dispatch table.
    pub(crate) fn register_subscription(&self, sub_id: String, cb: SubCallback) {
        self.inner.subs.lock().unwrap().insert(sub_id, cb);
    }

    pub(crate) fn deregister_subscription(&self, sub_id: &str) -> bool {
        self.inner.subs.lock().unwrap().remove(sub_id).is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_terminal()
    }

    pub fn close(&self) {
        self.inner.shutdown();
    }
}

#[async_trait]
impl Transport for WsClient {
    #[instrument(skip(self, params), fields(method))]
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.inner.call(method, params).await
    }

    fn supports_subscriptions(&self) -> bool {
        true
    }
}

/// The growth schedule used by send-and-wait (C7): `p, 2p, 4p, ...` capped
/// at [`MAX_POLL_GROWTH_MS`]. Exposed here since it's the same doubling
/// shape as reconnect backoff and both are tiny pure functions worth sharing
/// a single definition of "truth" for.
pub fn next_poll_interval(current: Duration) -> Duration {
    let doubled = current.as_millis().saturating_mul(2) as u64;
    Duration::from_millis(doubled.min(MAX_POLL_GROWTH_MS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_doubles_and_caps() {
        let mut p = Duration::from_millis(500);
        p = next_poll_interval(p);
        assert_eq!(p, Duration::from_millis(1_000));
        p = next_poll_interval(p);
        assert_eq!(p, Duration::from_millis(2_000));
        for _ in 0..10 {
            p = next_poll_interval(p);
        }
        assert_eq!(p, Duration::from_millis(MAX_POLL_GROWTH_MS));
    }
}
