//! Continuous position sampling.
//!
//! The platform's location primitive (CoreLocation, FusedLocationProvider,
//! a GPS daemon, ...) is injected behind [`LocationBackend`]; [`GeoSampler`]
//! adds the scoped-acquisition discipline: every `start` is paired with
//! exactly one teardown, on `stop` or on drop, and the sampler can be
//! restarted any number of times without leaking a subscription.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::SampleError;
use crate::model::Position;

/// One emission from the platform location source.
pub type Sample = Result<Position, SampleError>;

/// The platform continuous-location primitive.
///
/// `watch` opens one subscription and streams samples into the returned
/// receiver until the paired [`WatchGuard`] is dropped. Errors are delivered
/// in-band; the backend never retries on its own.
#[async_trait]
pub trait LocationBackend: Send + Sync + 'static {
    async fn watch(
        &self,
        high_accuracy: bool,
    ) -> Result<(mpsc::UnboundedReceiver<Sample>, WatchGuard), SampleError>;
}

/// Teardown handle for one backend subscription. Dropping it releases the
/// underlying platform watch.
pub struct WatchGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl WatchGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self { release: Some(Box::new(release)) }
    }

    /// A guard for backends with nothing to release (tests, replays).
    pub fn noop() -> Self {
        Self { release: None }
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Wraps a [`LocationBackend`] with start/stop lifecycle management.
pub struct GeoSampler {
    backend: Arc<dyn LocationBackend>,
    active: Option<WatchGuard>,
}

impl GeoSampler {
    pub fn new(backend: Arc<dyn LocationBackend>) -> Self {
        Self { backend, active: None }
    }

    /// Open a sampling subscription. An already-running subscription is torn
    /// down first, so repeated starts never stack watches.
    pub async fn start(
        &mut self,
        high_accuracy: bool,
    ) -> Result<mpsc::UnboundedReceiver<Sample>, SampleError> {
        self.stop();
        let (rx, guard) = self.backend.watch(high_accuracy).await?;
        self.active = Some(guard);
        debug!(high_accuracy, "location sampling started");
        Ok(rx)
    }

    /// Release the current subscription, if any.
    pub fn stop(&mut self) {
        if self.active.take().is_some() {
            debug!("location sampling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }
}
