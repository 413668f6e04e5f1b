//! The engine facade.
//!
//! [`SessionEngine::start`] wires everything together: two supervised live
//! channels feeding the state store, the sampler feeding the throttled
//! reporter, the route negotiator, and the lifecycle monitor. The UI layer
//! talks only to this facade — snapshots out, route selection in.
//!
//! `shutdown()` tears the whole thing down: the sampler subscription is
//! released, both channels go `Closed` with no further reconnects, and every
//! spawned task is stopped. Nothing outlives the engine.

use std::sync::Arc;

use lantern_proto::RouteAlternative;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::api::RescueApi;
use crate::config::EngineConfig;
use crate::error::{EngineError, SampleError};
use crate::geo::{session_metrics, SessionMetrics};
use crate::lifecycle::{
    Notifier, ReconnectSignal, SessionLifecycleMonitor, TerminalCallback,
};
use crate::model::{ConnectionHealth, Role, SessionState, TerminalKind};
use crate::reporter::PositionReporter;
use crate::routes::{RouteNegotiator, RouteSnapshot};
use crate::sampler::{GeoSampler, LocationBackend};
use crate::store::SessionStateStore;
use crate::stream::LiveStreamClient;

/// Fans one terminal event out to every registered callback; callbacks
/// registered after the fact are invoked immediately with the recorded kind.
#[derive(Default)]
struct TerminalDispatcher {
    callbacks: Mutex<Vec<TerminalCallback>>,
    fired: Mutex<Option<TerminalKind>>,
}

impl TerminalDispatcher {
    fn register(&self, callback: TerminalCallback) {
        if let Some(kind) = *self.fired.lock() {
            callback(kind);
            return;
        }
        self.callbacks.lock().push(callback);
    }

    fn dispatch(&self, kind: TerminalKind) {
        {
            let mut fired = self.fired.lock();
            if fired.is_some() {
                return;
            }
            *fired = Some(kind);
        }
        for callback in self.callbacks.lock().iter() {
            callback(kind);
        }
    }
}

pub struct SessionEngine {
    config: EngineConfig,
    store: Arc<SessionStateStore>,
    negotiator: Arc<RouteNegotiator>,
    dispatcher: Arc<TerminalDispatcher>,
    sampler: GeoSampler,
    session_client: LiveStreamClient,
    profile_client: LiveStreamClient,
    apply_task: Option<JoinHandle<()>>,
    reporter_task: Option<JoinHandle<()>>,
    monitor_task: Option<JoinHandle<()>>,
}

impl SessionEngine {
    /// Bring the engine up for one session.
    ///
    /// Fails fast on configuration problems and on sampler acquisition
    /// errors (a denied location permission must reach the caller; it is
    /// not retried internally).
    pub async fn start(
        config: EngineConfig,
        api: Arc<dyn RescueApi>,
        backend: Arc<dyn LocationBackend>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let store = Arc::new(SessionStateStore::new(config.session_id.clone()));
        let dispatcher = Arc::new(TerminalDispatcher::default());

        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let (profile_tx, profile_rx) = mpsc::unbounded_channel();
        let session_client = LiveStreamClient::connect(
            config.session_stream_url(),
            config.reconnect_delay,
            session_tx,
        );
        let profile_client = LiveStreamClient::connect(
            config.profile_stream_url(),
            config.reconnect_delay,
            profile_tx,
        );

        let dispatcher_cb = Arc::clone(&dispatcher);
        let store_terminal = Arc::clone(&store);
        let monitor = Arc::new(
            SessionLifecycleMonitor::new(
                config.role,
                config.session_id.clone(),
                Arc::clone(&api),
                notifier,
                // Inferred ends (heuristic, backstop poll, not_found) reach
                // the snapshot through the store, not through a frame.
                Arc::new(move |kind| {
                    store_terminal.mark_terminal(kind);
                    dispatcher_cb.dispatch(kind);
                }),
            )
            .with_timing(config.reconnect_grace, config.status_poll_interval),
        );
        let monitor_task = monitor
            .spawn(Arc::new(session_client.handle()) as Arc<dyn ReconnectSignal>);

        let apply_task = tokio::spawn(apply_loop(
            session_rx,
            profile_rx,
            Arc::clone(&store),
            Arc::clone(&monitor),
        ));

        let mut sampler = GeoSampler::new(backend);
        let samples = sampler
            .start(config.high_accuracy)
            .await
            .map_err(sample_to_engine_error)?;
        let reporter = PositionReporter::new(
            Arc::clone(&api),
            Arc::clone(&store),
            config.role,
            config.report_target_id(),
            config.report_interval,
        );
        let reporter_task = Some(reporter.spawn(samples));

        let negotiator = Arc::new(RouteNegotiator::new(
            Arc::clone(&api),
            Arc::clone(&store),
            config.session_id.clone(),
        ));

        info!(session_id = %config.session_id, role = ?config.role, "session engine started");
        Ok(Self {
            config,
            store,
            negotiator,
            dispatcher,
            sampler,
            session_client,
            profile_client,
            apply_task: Some(apply_task),
            reporter_task,
            monitor_task,
        })
    }

    /// Independent copy of the current session state.
    pub fn snapshot(&self) -> SessionState {
        self.store.snapshot()
    }

    /// Distance/ETA between the participants, once both are located.
    pub fn metrics(&self) -> Option<SessionMetrics> {
        session_metrics(&self.store.snapshot())
    }

    /// Register a callback for the terminal transition. Fires at most once
    /// per engine; registering after the fact fires immediately.
    pub fn on_terminal(&self, callback: TerminalCallback) {
        self.dispatcher.register(callback);
    }

    pub fn connection_health(&self) -> ConnectionHealth {
        ConnectionHealth {
            session_channel: self.session_client.health(),
            profile_channel: self.profile_client.health(),
        }
    }

    /// Current route alternative set and selection.
    pub fn routes(&self) -> RouteSnapshot {
        self.negotiator.snapshot()
    }

    /// Refresh the alternative set from the server.
    pub async fn fetch_routes(&self) -> Result<Vec<RouteAlternative>, EngineError> {
        self.negotiator.fetch_alternatives().await
    }

    /// Select a route alternative by id (validated locally first).
    pub async fn select(&self, route_id: &str) -> Result<(), EngineError> {
        self.negotiator.select(route_id).await
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    /// Tear everything down. All tasks are stopped, both channels end up
    /// `Closed`, and the sampler subscription is released.
    pub async fn shutdown(mut self) {
        debug!(session_id = %self.config.session_id, "engine shutting down");
        self.sampler.stop();
        if let Some(task) = self.reporter_task.take() {
            task.abort();
            let _ = task.await;
        }
        self.session_client.dispose().await;
        self.profile_client.dispose().await;
        if let Some(task) = self.apply_task.take() {
            task.abort();
            let _ = task.await;
        }
        if let Some(task) = self.monitor_task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

async fn apply_loop(
    mut session_rx: mpsc::UnboundedReceiver<lantern_proto::StreamMessage>,
    mut profile_rx: mpsc::UnboundedReceiver<lantern_proto::StreamMessage>,
    store: Arc<SessionStateStore>,
    monitor: Arc<SessionLifecycleMonitor>,
) {
    let mut session_open = true;
    let mut profile_open = true;
    // Per-channel ordering is preserved (one receiver each); there is no
    // ordering guarantee across the two channels and the merge rules do not
    // need one.
    while session_open || profile_open {
        tokio::select! {
            maybe = session_rx.recv(), if session_open => match maybe {
                Some(msg) => {
                    store.apply_session_message(&msg);
                    monitor.observe(&msg);
                }
                None => session_open = false,
            },
            maybe = profile_rx.recv(), if profile_open => match maybe {
                Some(msg) => {
                    store.apply_profile_message(&msg);
                    monitor.observe(&msg);
                }
                None => profile_open = false,
            },
        }
    }
}

fn sample_to_engine_error(err: SampleError) -> EngineError {
    match err {
        SampleError::PermissionDenied => EngineError::Permission,
        other => EngineError::Transport(other.to_string()),
    }
}
