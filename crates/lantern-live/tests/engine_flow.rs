//! Whole-engine flow: live frames in, snapshots and terminal events out.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use lantern_live::api::RescueApi;
use lantern_live::error::{EngineError, SampleError};
use lantern_live::model::{Position, Role, SessionStatus, TerminalKind};
use lantern_live::sampler::{LocationBackend, Sample, WatchGuard};
use lantern_live::{
    EngineConfig, GeoPoint, Notifier, RouteAlternative, RouteKind, SessionEngine,
};
use lantern_proto::{
    RouteAlternativesRequest, SelectRouteRequest, SessionRoutesResponse,
    SessionStatusResponse,
};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::Message;

/// In-memory coordination server for the REST side.
#[derive(Default)]
struct LocalApi {
    searcher_reports: Mutex<Vec<GeoPoint>>,
    alternatives: Mutex<Vec<RouteAlternative>>,
    selected: Mutex<Option<String>>,
    select_calls: AtomicUsize,
    session_gone: AtomicBool,
}

#[async_trait]
impl RescueApi for LocalApi {
    async fn report_searcher_location(
        &self,
        _session_id: &str,
        point: GeoPoint,
    ) -> Result<(), EngineError> {
        self.searcher_reports.lock().push(point);
        Ok(())
    }

    async fn report_profile_location(
        &self,
        _profile_id: &str,
        _point: GeoPoint,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    async fn compute_route_alternatives(
        &self,
        _request: RouteAlternativesRequest,
    ) -> Result<Vec<RouteAlternative>, EngineError> {
        Ok(self.alternatives.lock().clone())
    }

    async fn session_route_alternatives(
        &self,
        _session_id: &str,
    ) -> Result<SessionRoutesResponse, EngineError> {
        Ok(SessionRoutesResponse {
            alternatives: self.alternatives.lock().clone(),
            selected: self.selected.lock().clone(),
        })
    }

    async fn select_route(
        &self,
        _session_id: &str,
        request: SelectRouteRequest,
    ) -> Result<(), EngineError> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        *self.selected.lock() = Some(request.route_id);
        Ok(())
    }

    async fn session_status(
        &self,
        _session_id: &str,
    ) -> Result<SessionStatusResponse, EngineError> {
        if self.session_gone.load(Ordering::SeqCst) {
            return Ok(SessionStatusResponse { exists: false, status: None });
        }
        Ok(SessionStatusResponse { exists: true, status: Some("active".into()) })
    }
}

/// Location backend that emits one fix and stays quiet.
struct OneFixBackend {
    point: GeoPoint,
}

#[async_trait]
impl LocationBackend for OneFixBackend {
    async fn watch(
        &self,
        _high_accuracy: bool,
    ) -> Result<(mpsc::UnboundedReceiver<Sample>, WatchGuard), SampleError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(Position::new(self.point)));
        // Keep the sender alive so the reporter loop stays up.
        let guard = WatchGuard::new(move || drop(tx));
        Ok((rx, guard))
    }
}

struct RecordingNotifier(Mutex<Vec<TerminalKind>>);

impl Notifier for RecordingNotifier {
    fn notify(&self, kind: TerminalKind) {
        self.0.lock().push(kind);
    }
}

/// Serves the session and profile channels on one listener, routed by path.
/// The test drives frame emission through the two `Notify` handles.
fn spawn_stream_server(
    listener: TcpListener,
    send_ended: Arc<Notify>,
    send_late_lost: Arc<Notify>,
) {
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            let send_ended = Arc::clone(&send_ended);
            let send_late_lost = Arc::clone(&send_late_lost);
            tokio::spawn(async move {
                let path = Arc::new(Mutex::new(String::new()));
                let seen_path = Arc::clone(&path);
                let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    *seen_path.lock() = req.uri().path().to_owned();
                    Ok(resp)
                };
                let Ok(mut ws) = accept_hdr_async(stream, callback).await else { return };
                let path = path.lock().clone();

                if path.starts_with("/ws/sessions/") {
                    let frame = r#"{"type":"session","sessionId":"s1","status":"active",
                        "searcher":{"geopoint":{"lat":34.19655,"lng":43.88534}}}"#;
                    if ws.send(Message::Text(frame.to_string())).await.is_err() {
                        return;
                    }
                    send_ended.notified().await;
                    let _ = ws
                        .send(Message::Text(r#"{"type":"ended","sessionId":"s1"}"#.to_string()))
                        .await;
                } else {
                    let frame = r#"{"type":"lost_update","data":{"id":"p1",
                        "geopoint":{"_latitude":34.19625,"_longitude":43.88504}}}"#;
                    if ws.send(Message::Text(frame.to_string())).await.is_err() {
                        return;
                    }
                    send_late_lost.notified().await;
                    let _ = ws
                        .send(Message::Text(
                            r#"{"type":"lost_update","data":{"id":"p1",
                                "geopoint":{"_latitude":34.2,"_longitude":43.9}}}"#
                                .to_string(),
                        ))
                        .await;
                }
                // Hold the connection until the engine closes it.
                while ws.next().await.is_some() {}
            });
        }
    });
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn wait_until(mut check: impl FnMut() -> bool, what: &str) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn searcher_session_end_to_end() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let send_ended = Arc::new(Notify::new());
    let send_late_lost = Arc::new(Notify::new());
    spawn_stream_server(listener, Arc::clone(&send_ended), Arc::clone(&send_late_lost));

    let api = Arc::new(LocalApi::default());
    *api.alternatives.lock() = vec![
        RouteAlternative {
            id: "r1".into(),
            index: 0,
            kind: RouteKind::Shortest,
            distance_meters: 45.0,
            duration_seconds: 33,
            geometry: vec![GeoPoint::new(34.19655, 43.88534), GeoPoint::new(34.19625, 43.88504)],
        },
        RouteAlternative {
            id: "r2".into(),
            index: 1,
            kind: RouteKind::Walking,
            distance_meters: 52.0,
            duration_seconds: 38,
            geometry: vec![GeoPoint::new(34.19655, 43.88534), GeoPoint::new(34.19625, 43.88504)],
        },
    ];
    let backend = Arc::new(OneFixBackend { point: GeoPoint::new(34.19655, 43.88534) });
    let notifier = Arc::new(RecordingNotifier(Mutex::new(Vec::new())));

    let mut config = EngineConfig::new("s1", "p1", Role::Searcher);
    config.rest_base_url = "http://127.0.0.1:1".into(); // never used: api is injected
    config.stream_base_url = format!("ws://{addr}");
    config.reconnect_delay = Duration::from_millis(100);

    let engine = SessionEngine::start(
        config,
        Arc::clone(&api) as Arc<dyn RescueApi>,
        backend,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    )
    .await
    .unwrap();

    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&fired);
    engine.on_terminal(Arc::new(move |kind| sink.lock().push(kind)));

    // Both live channels deliver; the merged snapshot goes active with both
    // participants located.
    wait_until(
        || {
            let snap = engine.snapshot();
            snap.status == SessionStatus::Active
                && snap.searcher_location.is_some()
                && snap.lost_person_location.is_some()
        },
        "active snapshot with both locations",
    )
    .await;

    // ~43 m apart, a ~31 s walk.
    wait_until(
        || {
            engine.metrics().is_some_and(|m| {
                (40.0..47.0).contains(&m.distance_meters)
                    && (28..=34).contains(&m.eta_seconds)
            })
        },
        "distance and ETA in range",
    )
    .await;

    // The single sampled fix was uploaded immediately.
    wait_until(|| !api.searcher_reports.lock().is_empty(), "position upload").await;
    assert_eq!(api.searcher_reports.lock()[0], GeoPoint::new(34.19655, 43.88534));

    // Route negotiation: two alternatives, explicit selection required.
    let alternatives = engine.fetch_routes().await.unwrap();
    assert_eq!(alternatives.len(), 2);
    assert!(engine.routes().selected.is_none());
    engine.select("r2").await.unwrap();
    assert_eq!(engine.routes().selected.as_deref(), Some("r2"));
    assert_eq!(engine.snapshot().selected_route_id.as_deref(), Some("r2"));

    // Explicit end: terminal fires exactly once, for callback and notifier.
    send_ended.notify_one();
    wait_until(|| !fired.lock().is_empty(), "terminal callback").await;
    assert_eq!(fired.lock().as_slice(), &[TerminalKind::Ended]);
    assert_eq!(notifier.0.lock().as_slice(), &[TerminalKind::Ended]);

    // A straggler lost_update is parsed but changes nothing.
    let frozen = engine.snapshot();
    send_late_lost.notify_one();
    tokio::time::sleep(Duration::from_millis(300)).await;
    let after = engine.snapshot();
    assert_eq!(after.status, SessionStatus::Ended);
    assert_eq!(
        after.lost_person_location.map(|l| l.position.point),
        frozen.lost_person_location.map(|l| l.position.point)
    );
    assert_eq!(fired.lock().len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn backstop_end_reaches_the_snapshot() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    spawn_stream_server(listener, Arc::new(Notify::new()), Arc::new(Notify::new()));

    let api = Arc::new(LocalApi::default());
    api.session_gone.store(true, Ordering::SeqCst);
    let backend = Arc::new(OneFixBackend { point: GeoPoint::new(34.19625, 43.88504) });
    let notifier = Arc::new(RecordingNotifier(Mutex::new(Vec::new())));

    let mut config = EngineConfig::new("s1", "p1", Role::LostPerson);
    config.stream_base_url = format!("ws://{addr}");
    config.reconnect_delay = Duration::from_millis(100);
    config.status_poll_interval = Duration::from_millis(200);

    let engine = SessionEngine::start(
        config,
        Arc::clone(&api) as Arc<dyn RescueApi>,
        backend,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    )
    .await
    .unwrap();

    // The server no longer knows the session. The backstop poll ends it, and
    // the snapshot agrees with the terminal notification: no frame ever said
    // "ended", yet the snapshot must not stay live.
    wait_until(
        || engine.snapshot().status == SessionStatus::Ended,
        "snapshot to reach Ended via the backstop poll",
    )
    .await;
    assert_eq!(notifier.0.lock().as_slice(), &[TerminalKind::Ended]);

    engine.shutdown().await;
}
