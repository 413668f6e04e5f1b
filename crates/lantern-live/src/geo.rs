//! Pure geographic math: great-circle distance, walking ETA, bounds clamping.

use geo::{Distance, Haversine, Point};
use lantern_proto::GeoPoint;

use crate::model::SessionState;

/// Average walking speed used for ETA estimates, in meters per second.
pub const WALKING_SPEED_MPS: f64 = 1.4;

/// Great-circle distance between two points in meters (haversine).
#[inline]
pub fn distance_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    Haversine::distance(Point::new(a.lng, a.lat), Point::new(b.lng, b.lat))
}

/// Walking ETA in whole seconds for `distance_meters` at the given speed.
/// Returns 0 for non-positive distances; speeds at or below zero fall back
/// to [`WALKING_SPEED_MPS`].
pub fn eta_seconds(distance_meters: f64, speed_mps: f64) -> u64 {
    if distance_meters <= 0.0 {
        return 0;
    }
    let speed = if speed_mps > 0.0 { speed_mps } else { WALKING_SPEED_MPS };
    (distance_meters / speed).ceil() as u64
}

/// A latitude/longitude bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

/// Clamp a point into `bounds`, component-wise.
pub fn clamp_to_bounds(p: GeoPoint, bounds: Bounds) -> GeoPoint {
    GeoPoint {
        lat: p.lat.clamp(bounds.min_lat, bounds.max_lat),
        lng: p.lng.clamp(bounds.min_lng, bounds.max_lng),
    }
}

/// Distance and walking ETA between the two participants of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionMetrics {
    pub distance_meters: f64,
    pub eta_seconds: u64,
}

/// Derive [`SessionMetrics`] from a state snapshot; `None` until both
/// participant locations are known.
pub fn session_metrics(state: &SessionState) -> Option<SessionMetrics> {
    let searcher = state.searcher_location.as_ref()?.position.point;
    let lost = state.lost_person_location.as_ref()?.position.point;
    let distance = distance_meters(searcher, lost);
    Some(SessionMetrics {
        distance_meters: distance,
        eta_seconds: eta_seconds(distance, WALKING_SPEED_MPS),
    })
}
