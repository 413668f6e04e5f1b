//! Engine-side data model.
//!
//! [`SessionState`] is owned exclusively by the store; everything handed out
//! of the engine is a deep copy, so all of these types are plain `Clone`
//! values with no interior sharing.

use std::time::SystemTime;

use lantern_proto::GeoPoint;

/// Which participant this client is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Searcher,
    LostPerson,
}

/// One sampled position fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub point: GeoPoint,
    pub captured_at: SystemTime,
}

impl Position {
    pub fn new(point: GeoPoint) -> Self {
        Self { point, captured_at: SystemTime::now() }
    }
}

/// Where a participant location came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationOrigin {
    /// Sampled locally on this device.
    SelfReport,
    /// Received over a live channel.
    Remote,
}

/// Last-known position of one participant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticipantLocation {
    pub position: Position,
    pub origin: LocationOrigin,
}

/// Session lifecycle status. `Ended` and `Resolved` are sinks: once reached,
/// no message moves the status again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Active,
    Ended,
    Resolved,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Ended | SessionStatus::Resolved)
    }

    /// Map a wire status string. Unknown strings yield `None` and leave the
    /// stored status untouched.
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SessionStatus::Pending),
            "active" => Some(SessionStatus::Active),
            "ended" => Some(SessionStatus::Ended),
            "resolved" | "found" => Some(SessionStatus::Resolved),
            _ => None,
        }
    }
}

/// The merged view of one live session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub session_id: String,
    pub status: SessionStatus,
    pub searcher_location: Option<ParticipantLocation>,
    pub lost_person_location: Option<ParticipantLocation>,
    pub last_event_at: Option<SystemTime>,
    pub selected_route_id: Option<String>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            status: SessionStatus::Pending,
            searcher_location: None,
            lost_person_location: None,
            last_event_at: None,
            selected_route_id: None,
        }
    }
}

/// Why the session reached a terminal state, as reported to `on_terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    Ended,
    Resolved,
}

/// Connection phase of one live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

/// Health snapshot of one live channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self { phase: ConnectionPhase::Connecting, consecutive_failures: 0, last_error: None }
    }
}

/// Health of both live channels, as exposed to the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionHealth {
    pub session_channel: ConnectionState,
    pub profile_channel: ConnectionState,
}
