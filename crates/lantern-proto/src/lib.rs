//! Shared wire types for server ↔ engine communication.
//! Keeping this in a dedicated crate allows the dashboard tooling to reuse
//! the frame definitions without pulling in the engine runtime.

use serde::{Deserialize, Serialize};

mod frame;

pub use frame::{parse_frame, FrameError, SearcherInfo, StreamMessage};

/// A WGS84 coordinate pair.
///
/// The server emits geopoints under several field-naming conventions
/// (`lat`/`lng`, `latitude`/`longitude`, and the `_latitude`/`_longitude`
/// form produced by its document store). All of them deserialize into this
/// one shape; serialization always uses `lat`/`lng`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    #[serde(alias = "latitude", alias = "_latitude")]
    pub lat: f64,
    #[serde(alias = "longitude", alias = "_longitude")]
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// The route flavors the navigation service precomputes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteKind {
    Shortest,
    Fastest,
    Walking,
}

/// One precomputed path between searcher and lost person.
///
/// Alternatives are immutable once fetched; a refreshed set always replaces
/// the previous one wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteAlternative {
    pub id: String,
    pub index: u32,
    pub kind: RouteKind,
    pub distance_meters: f64,
    pub duration_seconds: u64,
    pub geometry: Vec<GeoPoint>,
}

/// Body for the position-report endpoints.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LocationReport {
    pub lat: f64,
    pub lng: f64,
}

impl From<GeoPoint> for LocationReport {
    fn from(p: GeoPoint) -> Self {
        Self { lat: p.lat, lng: p.lng }
    }
}

/// Body for `POST /navigation/route-alternatives`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteAlternativesRequest {
    pub from_lat: f64,
    pub from_lng: f64,
    pub to_lat: f64,
    pub to_lng: f64,
}

/// Response of `GET /navigation/sessions/{id}/route-alternatives`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRoutesResponse {
    #[serde(default)]
    pub alternatives: Vec<RouteAlternative>,
    #[serde(default)]
    pub selected: Option<String>,
}

/// Body for `POST /navigation/sessions/{id}/select-route`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectRouteRequest {
    pub route_id: String,
    pub route_index: u32,
}

/// Response of `GET /sessions/{id}/status`, the lifecycle backstop poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub exists: bool,
    #[serde(default)]
    pub status: Option<String>,
}
