//! Per-relay connection supervisor.
//!
//! One supervisor owns one URL and at most one live socket at a time. It
//! runs the full connection lifecycle: connect with timeout, reader task,
//! exponential-backoff reconnect, and a liveness probe that force-closes a
//! socket which has gone quiet. Everything above the socket (dispatch,
//! subscriptions, acks) lives in the orchestrator, reached through a weak
//! one-way delegate so ownership stays a strict tree.
//!
//! Timer discipline: at most one reconnect timer and one liveness timer
//! exist at a time; replacing either aborts the previous task.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::ClientOptions;
use crate::relays::types::{ConnectionDelegate, ConnectionStatus, RelayError};
use crate::transport::{FrameSink, Transport};
use crate::types::filter::Filter;
use crate::util::{now_millis, validate_relay_url};

/// Fixed connection-establishment timeout.
pub(crate) const CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Fixed pseudo-subscription id for liveness probes, so they never
/// accumulate server-side.
const PING_SUBSCRIPTION_ID: &str = "ping";

/// Backoff delay for reconnect attempt `n` (1-based):
/// `min(max, base * 2^(n-1))`.
pub(crate) fn reconnect_delay_ms(attempt: u32, base: u64, max: u64) -> u64 {
    let shift = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u64 << shift).min(max)
}

pub(crate) struct RelayConnection {
    url: String,
    options: ClientOptions,
    transport: Arc<dyn Transport>,
    delegate: Weak<dyn ConnectionDelegate>,

    status: RwLock<ConnectionStatus>,
    was_previously_open: AtomicBool,
    reconnect_attempts: AtomicU32,
    last_inbound_ms: AtomicU64,
    is_shutdown: AtomicBool,

    sink: tokio::sync::Mutex<Option<Box<dyn FrameSink>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    liveness_task: Mutex<Option<JoinHandle<()>>>,
}

impl RelayConnection {
    pub fn new(
        url: String,
        options: ClientOptions,
        transport: Arc<dyn Transport>,
        delegate: Weak<dyn ConnectionDelegate>,
    ) -> Arc<Self> {
        Arc::new(Self {
            url,
            options,
            transport,
            delegate,
            status: RwLock::new(ConnectionStatus::Idle),
            was_previously_open: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
            last_inbound_ms: AtomicU64::new(0),
            is_shutdown: AtomicBool::new(false),
            sink: tokio::sync::Mutex::new(None),
            reader_task: Mutex::new(None),
            reconnect_task: Mutex::new(None),
            liveness_task: Mutex::new(None),
        })
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.read()
    }

    pub fn is_open(&self) -> bool {
        self.status().is_open()
    }

    /// Establish the socket, with the fixed 30 s timeout. On success runs
    /// the Open entry actions and notifies the delegate.
    pub async fn connect(self: &Arc<Self>) -> Result<(), RelayError> {
        if self.is_shutdown.load(Ordering::SeqCst) {
            return Err(RelayError::ConnectionClosed);
        }
        validate_relay_url(&self.url)?;

        {
            let status = self.status.read();
            if matches!(*status, ConnectionStatus::Open | ConnectionStatus::Connecting) {
                return Ok(());
            }
        }

        // One active socket per URL: clear out any previous reader/sink
        // before opening a new one.
        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
        self.sink.lock().await.take();

        *self.status.write() = ConnectionStatus::Connecting;

        let connect = self.transport.connect(&self.url);
        let (sink, stream) =
            match tokio::time::timeout(Duration::from_millis(CONNECT_TIMEOUT_MS), connect).await {
                Err(_) => {
                    *self.status.write() = ConnectionStatus::Failed;
                    self.maybe_schedule_reconnect();
                    return Err(RelayError::ConnectTimeout);
                }
                Ok(Err(e)) => {
                    *self.status.write() = ConnectionStatus::Failed;
                    self.maybe_schedule_reconnect();
                    return Err(RelayError::ConnectFailed(e.to_string()));
                }
                Ok(Ok(pair)) => pair,
            };

        if self.is_shutdown.load(Ordering::SeqCst) {
            return Err(RelayError::ConnectionClosed);
        }

        *self.sink.lock().await = Some(sink);
        self.spawn_reader(stream);

        *self.status.write() = ConnectionStatus::Open;
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.last_inbound_ms.store(now_millis(), Ordering::SeqCst);

        let reconnected = self.was_previously_open.load(Ordering::SeqCst);
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.on_open(&self.url, reconnected);
        }
        self.was_previously_open.store(true, Ordering::SeqCst);
        self.start_liveness();

        tracing::info!(relay = %self.url, reconnected, "connection open");
        Ok(())
    }

    fn spawn_reader(self: &Arc<Self>, mut stream: crate::transport::FrameStream) {
        let conn = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(text) => {
                        conn.last_inbound_ms.store(now_millis(), Ordering::SeqCst);
                        if let Some(delegate) = conn.delegate.upgrade() {
                            delegate.on_frame(&conn.url, &text);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(relay = %conn.url, error = %e, "socket error");
                        break;
                    }
                }
            }
            tracing::debug!(relay = %conn.url, "reader finished");
            conn.handle_closed("connection closed").await;
        });
        if let Some(previous) = self.reader_task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Send one text frame. A failed send tears the connection down and
    /// lets the reconnect path take over.
    pub async fn send(self: &Arc<Self>, text: &str) -> Result<(), RelayError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(RelayError::ConnectionClosed)?;
        if let Err(e) = sink.send(text).await {
            tracing::warn!(relay = %self.url, error = %e, "send failed, closing socket");
            guard.take();
            drop(guard);
            let conn = Arc::clone(self);
            tokio::spawn(async move {
                conn.handle_closed("send failed").await;
            });
            return Err(RelayError::SendFailed(e.to_string()));
        }
        Ok(())
    }

    /// Socket-down path shared by reader exit, send failure and liveness
    /// timeout. Runs at most once per established socket.
    async fn handle_closed(self: &Arc<Self>, reason: &str) {
        if self.is_shutdown.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut status = self.status.write();
            if matches!(
                *status,
                ConnectionStatus::Closed | ConnectionStatus::Failed | ConnectionStatus::Idle
            ) {
                return;
            }
            *status = ConnectionStatus::Closed;
        }

        if let Some(task) = self.liveness_task.lock().take() {
            task.abort();
        }
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close(1000, "closing").await;
        }

        if self.was_previously_open.load(Ordering::SeqCst) {
            if let Some(delegate) = self.delegate.upgrade() {
                delegate.on_disconnect(&self.url, reason);
            }
        }

        self.maybe_schedule_reconnect();
    }

    fn maybe_schedule_reconnect(self: &Arc<Self>) {
        if self.options.auto_reconnect && !self.is_shutdown.load(Ordering::SeqCst) {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let delay = reconnect_delay_ms(
            attempt,
            self.options.reconnect_interval_ms,
            self.options.max_reconnect_interval_ms,
        );
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.on_reconnecting(&self.url, attempt);
        }
        tracing::debug!(relay = %self.url, attempt, delay_ms = delay, "reconnect scheduled");

        let conn = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            if conn.is_shutdown.load(Ordering::SeqCst) {
                return;
            }
            // A failed attempt reschedules itself from inside connect().
            if let Err(e) = conn.connect().await {
                tracing::debug!(relay = %conn.url, error = %e, "reconnect attempt failed");
            }
        });
        if let Some(previous) = self.reconnect_task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Liveness loop: if nothing arrived for two intervals the socket is
    /// considered dead; otherwise probe with a fixed CLOSE/REQ pair that
    /// any relay answers with at least an EOSE.
    fn start_liveness(self: &Arc<Self>) {
        if let Some(task) = self.liveness_task.lock().take() {
            task.abort();
        }
        let interval = self.options.ping_interval_ms;
        if interval == 0 {
            return;
        }

        let conn = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let ping_close = crate::relays::types::ClientMessage::Close {
                subscription_id: PING_SUBSCRIPTION_ID,
            }
            .to_json();
            let ping_filter = Filter::new().limit(1);
            let ping_req = crate::relays::types::ClientMessage::Req {
                subscription_id: PING_SUBSCRIPTION_ID,
                filter: &ping_filter,
            }
            .to_json();

            loop {
                tokio::time::sleep(Duration::from_millis(interval)).await;
                if conn.is_shutdown.load(Ordering::SeqCst) || !conn.is_open() {
                    return;
                }

                let idle = now_millis().saturating_sub(conn.last_inbound_ms.load(Ordering::SeqCst));
                if idle > 2 * interval {
                    tracing::warn!(relay = %conn.url, idle_ms = idle, "liveness timeout");
                    let dead = Arc::clone(&conn);
                    tokio::spawn(async move {
                        dead.handle_closed("liveness timeout").await;
                    });
                    return;
                }

                if conn.send(&ping_close).await.is_err() || conn.send(&ping_req).await.is_err() {
                    // send() already tore the connection down.
                    return;
                }
            }
        });
        *self.liveness_task.lock() = Some(handle);
    }

    /// Final teardown on client close: cancel every timer, close the socket
    /// and refuse all further work. Never reconnects afterwards.
    pub async fn shutdown(&self, code: u16, reason: &str) {
        self.is_shutdown.store(true, Ordering::SeqCst);
        if let Some(task) = self.reconnect_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.liveness_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.reader_task.lock().take() {
            task.abort();
        }
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close(code, reason).await;
        }
        *self.status.write() = ConnectionStatus::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_formula_reference_values() {
        let delays: Vec<u64> = (1..=6)
            .map(|n| reconnect_delay_ms(n, 1_000, 30_000))
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000]);
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        assert_eq!(reconnect_delay_ms(64, 1_000, 30_000), 30_000);
        assert_eq!(reconnect_delay_ms(1, 0, 30_000), 0);
    }
}
