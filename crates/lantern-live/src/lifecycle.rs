//! Terminal-condition monitoring.
//!
//! Both participants observe explicit `ended`/`resolved` frames. A
//! lost-person client additionally infers an implicit end: from its point of
//! view a dropped connection and "the searcher closed the app" look the
//! same, so sustained reconnection (>= 5 s) is treated as the session being
//! over, with a periodic status poll as the authoritative backstop. A
//! searcher client never infers an end; searchers terminate sessions
//! deliberately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use lantern_proto::StreamMessage;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant};
use tracing::{debug, info, warn};

use crate::api::RescueApi;
use crate::model::{Role, SessionStatus, TerminalKind};

pub const DEFAULT_RECONNECT_GRACE: Duration = Duration::from_millis(5_000);
pub const DEFAULT_STATUS_POLL_INTERVAL: Duration = Duration::from_millis(10_000);
const HEURISTIC_TICK: Duration = Duration::from_millis(500);

/// Notification capability, injected so tests can substitute a spy and so
/// no process-wide singleton exists.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, kind: TerminalKind);
}

/// Default no-op notifier.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _kind: TerminalKind) {}
}

pub type TerminalCallback = Arc<dyn Fn(TerminalKind) + Send + Sync>;

/// Provides the "how long has the watched channel been reconnecting" signal.
/// Implemented by [`crate::stream::ChannelHandle`]; a trait so the monitor
/// is testable without a live socket.
pub trait ReconnectSignal: Send + Sync + 'static {
    fn reconnecting_for(&self) -> Option<Duration>;
}

impl ReconnectSignal for crate::stream::ChannelHandle {
    fn reconnecting_for(&self) -> Option<Duration> {
        crate::stream::ChannelHandle::reconnecting_for(self)
    }
}

pub struct SessionLifecycleMonitor {
    role: Role,
    session_id: String,
    api: Arc<dyn RescueApi>,
    notifier: Arc<dyn Notifier>,
    on_terminal: TerminalCallback,
    reconnect_grace: Duration,
    poll_interval: Duration,
    fired: AtomicBool,
    /// The last successful poll said the session is alive; the reconnect
    /// heuristic stands down until this instant.
    server_alive_until: Mutex<Option<Instant>>,
}

impl SessionLifecycleMonitor {
    pub fn new(
        role: Role,
        session_id: impl Into<String>,
        api: Arc<dyn RescueApi>,
        notifier: Arc<dyn Notifier>,
        on_terminal: TerminalCallback,
    ) -> Self {
        Self {
            role,
            session_id: session_id.into(),
            api,
            notifier,
            on_terminal,
            reconnect_grace: DEFAULT_RECONNECT_GRACE,
            poll_interval: DEFAULT_STATUS_POLL_INTERVAL,
            fired: AtomicBool::new(false),
            server_alive_until: Mutex::new(None),
        }
    }

    pub fn with_timing(mut self, reconnect_grace: Duration, poll_interval: Duration) -> Self {
        self.reconnect_grace = reconnect_grace;
        self.poll_interval = poll_interval;
        self
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Feed every received stream message through here; explicit terminal
    /// frames fire for both roles.
    pub fn observe(&self, msg: &StreamMessage) {
        match msg {
            StreamMessage::Ended { .. } => self.fire(TerminalKind::Ended),
            StreamMessage::Resolved { .. } => self.fire(TerminalKind::Resolved),
            StreamMessage::NotFound => {
                // A session the server does not know about cannot come back.
                self.fire(TerminalKind::Ended)
            }
            StreamMessage::Session { status: Some(status), .. } => {
                match SessionStatus::from_wire(status) {
                    Some(SessionStatus::Ended) => self.fire(TerminalKind::Ended),
                    Some(SessionStatus::Resolved) => self.fire(TerminalKind::Resolved),
                    _ => {}
                }
            }
            _ => {}
        }
    }

    /// Run the implicit-end heuristic and the status-poll backstop.
    ///
    /// Lost-person clients only; for a searcher this spawns nothing and
    /// lifecycle is driven purely by [`observe`](Self::observe).
    pub fn spawn(self: &Arc<Self>, signal: Arc<dyn ReconnectSignal>) -> Option<JoinHandle<()>> {
        if self.role == Role::Searcher {
            return None;
        }
        let monitor = Arc::clone(self);
        Some(tokio::spawn(async move {
            monitor.run(signal).await;
        }))
    }

    async fn run(&self, signal: Arc<dyn ReconnectSignal>) {
        let mut tick = interval(HEURISTIC_TICK);
        let mut poll = interval(self.poll_interval);
        loop {
            if self.has_fired() {
                break;
            }
            tokio::select! {
                // The poll is authoritative; when both timers are due it
                // must run before the heuristic looks at the channel.
                biased;
                _ = poll.tick() => self.poll_backstop().await,
                _ = tick.tick() => self.check_reconnect_heuristic(signal.as_ref()),
            }
        }
        debug!(session_id = %self.session_id, "lifecycle monitor stopped");
    }

    fn check_reconnect_heuristic(&self, signal: &dyn ReconnectSignal) {
        if let Some(alive_until) = *self.server_alive_until.lock() {
            if Instant::now() < alive_until {
                return;
            }
        }
        if let Some(outage) = signal.reconnecting_for() {
            if outage >= self.reconnect_grace {
                info!(
                    session_id = %self.session_id,
                    outage_ms = outage.as_millis() as u64,
                    "sustained connection loss, treating session as ended"
                );
                self.fire(TerminalKind::Ended);
            }
        }
    }

    async fn poll_backstop(&self) {
        match self.api.session_status(&self.session_id).await {
            Ok(response) => {
                if !response.exists {
                    self.fire(TerminalKind::Ended);
                    return;
                }
                match response.status.as_deref().map(SessionStatus::from_wire) {
                    Some(Some(SessionStatus::Ended)) => self.fire(TerminalKind::Ended),
                    Some(Some(SessionStatus::Resolved)) => self.fire(TerminalKind::Resolved),
                    _ => {
                        // Server says the session is alive; the heuristic
                        // defers to it until the next poll has had a chance
                        // to run.
                        *self.server_alive_until.lock() =
                            Some(Instant::now() + self.poll_interval + HEURISTIC_TICK);
                    }
                }
            }
            Err(err) => {
                // Poll failures prove nothing either way.
                warn!(%err, session_id = %self.session_id, "status poll failed");
            }
        }
    }

    fn fire(&self, kind: TerminalKind) {
        if self.fired.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(session_id = %self.session_id, ?kind, "session terminal");
        (self.on_terminal)(kind);
        self.notifier.notify(kind);
    }
}
