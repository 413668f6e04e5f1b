//! Supervised live channel.
//!
//! One [`LiveStreamClient`] owns one server-push WebSocket channel: a single
//! tokio task runs the connect / read / reconnect loop and exposes nothing
//! but state transitions and parsed messages. Frames that fail to parse are
//! logged and dropped; transport errors put the channel into `Reconnecting`
//! with a fixed retry delay, and only `dispose()` makes it `Closed`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use lantern_proto::{parse_frame, StreamMessage};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::model::{ConnectionPhase, ConnectionState};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5_000);

struct ChannelStateInner {
    phase: ConnectionPhase,
    consecutive_failures: u32,
    last_error: Option<String>,
    reconnecting_since: Option<Instant>,
}

/// Shared, lock-guarded view of one channel's connection state. The
/// lifecycle monitor holds a clone to measure sustained reconnection.
#[derive(Clone)]
pub struct ChannelHandle {
    inner: Arc<Mutex<ChannelStateInner>>,
}

impl ChannelHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChannelStateInner {
                phase: ConnectionPhase::Connecting,
                consecutive_failures: 0,
                last_error: None,
                reconnecting_since: None,
            })),
        }
    }

    pub fn state(&self) -> ConnectionState {
        let inner = self.inner.lock();
        ConnectionState {
            phase: inner.phase,
            consecutive_failures: inner.consecutive_failures,
            last_error: inner.last_error.clone(),
        }
    }

    /// How long the channel has been continuously reconnecting, if it is.
    pub fn reconnecting_for(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        inner.reconnecting_since.map(|since| since.elapsed())
    }

    fn mark_open(&self) {
        let mut inner = self.inner.lock();
        if inner.phase != ConnectionPhase::Open {
            info!("live channel open");
        }
        inner.phase = ConnectionPhase::Open;
        inner.consecutive_failures = 0;
        inner.last_error = None;
        inner.reconnecting_since = None;
    }

    fn mark_reconnecting(&self, error: String) {
        let mut inner = self.inner.lock();
        if inner.phase == ConnectionPhase::Closed {
            return;
        }
        inner.phase = ConnectionPhase::Reconnecting;
        inner.consecutive_failures += 1;
        inner.last_error = Some(error);
        if inner.reconnecting_since.is_none() {
            inner.reconnecting_since = Some(Instant::now());
        }
    }

    fn mark_closed(&self) {
        let mut inner = self.inner.lock();
        inner.phase = ConnectionPhase::Closed;
        inner.reconnecting_since = None;
    }
}

pub struct LiveStreamClient {
    handle: ChannelHandle,
    disposed: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl LiveStreamClient {
    /// Open a channel and start its supervision task. Parsed messages are
    /// delivered through `events` in arrival order.
    pub fn connect(
        url: String,
        reconnect_delay: Duration,
        events: mpsc::UnboundedSender<StreamMessage>,
    ) -> Self {
        let handle = ChannelHandle::new();
        let disposed = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_channel(
            url,
            reconnect_delay,
            events,
            handle.clone(),
            Arc::clone(&disposed),
        ));
        Self { handle, disposed, task: Some(task) }
    }

    pub fn health(&self) -> ConnectionState {
        self.handle.state()
    }

    pub fn handle(&self) -> ChannelHandle {
        self.handle.clone()
    }

    /// Tear the channel down for good. Terminal: no reconnect attempt is
    /// scheduled afterwards.
    pub async fn dispose(&mut self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.handle.mark_closed();
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for LiveStreamClient {
    fn drop(&mut self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.handle.mark_closed();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_channel(
    url: String,
    reconnect_delay: Duration,
    events: mpsc::UnboundedSender<StreamMessage>,
    handle: ChannelHandle,
    disposed: Arc<AtomicBool>,
) {
    loop {
        if disposed.load(Ordering::SeqCst) {
            break;
        }

        match connect_async(&url).await {
            Ok((mut ws, _)) => {
                debug!(%url, "live channel transport connected");
                let mut reason = "server closed the stream".to_owned();
                while let Some(frame) = ws.next().await {
                    match frame {
                        Ok(Message::Text(text)) => {
                            handle.mark_open();
                            match parse_frame(&text) {
                                Ok(message) => {
                                    if events.send(message).is_err() {
                                        // Subscriber gone; nothing left to do.
                                        handle.mark_closed();
                                        return;
                                    }
                                }
                                Err(err) => {
                                    warn!(%err, "unparseable frame dropped");
                                }
                            }
                        }
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {
                            // Pings and binary frames still count as liveness.
                            handle.mark_open();
                        }
                        Err(err) => {
                            reason = err.to_string();
                            break;
                        }
                    }
                }
                if disposed.load(Ordering::SeqCst) {
                    break;
                }
                handle.mark_reconnecting(reason);
            }
            Err(err) => {
                if disposed.load(Ordering::SeqCst) {
                    break;
                }
                handle.mark_reconnecting(err.to_string());
            }
        }

        debug!(delay_ms = reconnect_delay.as_millis() as u64, "scheduling reconnect");
        sleep(reconnect_delay).await;
    }

    handle.mark_closed();
}
