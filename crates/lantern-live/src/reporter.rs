//! Throttled upload of the local participant's position.
//!
//! The sampler can emit fixes at whatever cadence the platform provides; the
//! reporter uploads at most one per `min_interval` (the very first fix is
//! always sent immediately), keeps at most one upload in flight, and while
//! one is in flight remembers only the single most recent fix to send right
//! after it completes. Upload failures never stop the loop; the next
//! eligible fix is the retry.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use lantern_proto::GeoPoint;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::api::RescueApi;
use crate::error::{EngineError, SampleError};
use crate::model::Role;
use crate::sampler::Sample;
use crate::store::SessionStateStore;

pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(30_000);

/// What the reporter loop observed; surfaced through the status callback so
/// the caller can drive health indicators without the loop ever crashing.
#[derive(Debug)]
pub enum ReporterEvent {
    Uploaded(GeoPoint),
    UploadFailed(EngineError),
    SampleFailed(SampleError),
}

pub type StatusCallback = Arc<dyn Fn(ReporterEvent) + Send + Sync>;

pub struct PositionReporter {
    api: Arc<dyn RescueApi>,
    store: Arc<SessionStateStore>,
    role: Role,
    /// Session id for searchers, profile id for lost persons.
    target_id: String,
    min_interval: Duration,
    on_status: Option<StatusCallback>,
}

impl PositionReporter {
    pub fn new(
        api: Arc<dyn RescueApi>,
        store: Arc<SessionStateStore>,
        role: Role,
        target_id: impl Into<String>,
        min_interval: Duration,
    ) -> Self {
        Self {
            api,
            store,
            role,
            target_id: target_id.into(),
            min_interval,
            on_status: None,
        }
    }

    pub fn with_status_callback(mut self, callback: StatusCallback) -> Self {
        self.on_status = Some(callback);
        self
    }

    /// Drive the reporter until the sample channel closes.
    pub fn spawn(self, samples: mpsc::UnboundedReceiver<Sample>) -> JoinHandle<()> {
        tokio::spawn(self.run(samples))
    }

    async fn run(self, mut samples: mpsc::UnboundedReceiver<Sample>) {
        let mut last_sent_at: Option<Instant> = None;
        let mut pending: Option<GeoPoint> = None;
        let mut in_flight: Option<BoxFuture<'static, Result<GeoPoint, EngineError>>> = None;

        loop {
            tokio::select! {
                result = async {
                    match in_flight.as_mut() {
                        Some(upload) => upload.await,
                        // Unreachable: the branch is guarded below.
                        None => std::future::pending().await,
                    }
                }, if in_flight.is_some() => {
                    in_flight = None;
                    self.finish_upload(result);
                    if let Some(point) = pending.take() {
                        last_sent_at = Some(Instant::now());
                        in_flight = Some(self.upload(point));
                    }
                }
                maybe = samples.recv() => {
                    let sample = match maybe {
                        Some(sample) => sample,
                        None => break,
                    };
                    match sample {
                        Err(err) => {
                            warn!(%err, "location sample failed");
                            self.emit(ReporterEvent::SampleFailed(err));
                        }
                        Ok(position) => {
                            self.store.record_local_position(self.role, position);
                            let point = position.point;
                            if in_flight.is_some() {
                                // Keep only the freshest fix for afterwards.
                                pending = Some(point);
                            } else if last_sent_at
                                .map_or(true, |t| t.elapsed() >= self.min_interval)
                            {
                                last_sent_at = Some(Instant::now());
                                in_flight = Some(self.upload(point));
                            } else {
                                debug!("throttled position sample dropped");
                            }
                        }
                    }
                }
            }
        }

        // Sampler went away; let an outstanding upload finish before exiting.
        if let Some(upload) = in_flight.as_mut() {
            let result = upload.await;
            self.finish_upload(result);
        }
    }

    fn upload(&self, point: GeoPoint) -> BoxFuture<'static, Result<GeoPoint, EngineError>> {
        let api = Arc::clone(&self.api);
        let role = self.role;
        let target_id = self.target_id.clone();
        Box::pin(async move {
            match role {
                Role::Searcher => api.report_searcher_location(&target_id, point).await,
                Role::LostPerson => api.report_profile_location(&target_id, point).await,
            }
            .map(|()| point)
        })
    }

    fn finish_upload(&self, result: Result<GeoPoint, EngineError>) {
        match result {
            Ok(point) => {
                debug!(lat = point.lat, lng = point.lng, "position reported");
                self.emit(ReporterEvent::Uploaded(point));
            }
            Err(err) => {
                warn!(%err, "position upload failed; next eligible sample retries");
                self.emit(ReporterEvent::UploadFailed(err));
            }
        }
    }

    fn emit(&self, event: ReporterEvent) {
        if let Some(callback) = &self.on_status {
            callback(event);
        }
    }
}
