//! The single in-memory source of truth for a live session.
//!
//! Both live channels and the local sampler feed into this store; everything
//! else (UI, metrics, lifecycle) reads deep-copy snapshots. The mutex keeps
//! writers serialized and snapshots consistent; no lock is ever held across
//! an await point.

use std::time::SystemTime;

use lantern_proto::{GeoPoint, StreamMessage};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::model::{
    LocationOrigin, ParticipantLocation, Position, Role, SessionState, SessionStatus,
    TerminalKind,
};

pub struct SessionStateStore {
    inner: Mutex<SessionState>,
}

impl SessionStateStore {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self { inner: Mutex::new(SessionState::new(session_id)) }
    }

    /// Independent deep copy of the current state.
    pub fn snapshot(&self) -> SessionState {
        self.inner.lock().clone()
    }

    /// Apply a message received on the session channel.
    pub fn apply_session_message(&self, msg: &StreamMessage) {
        self.apply(msg, Channel::Session);
    }

    /// Apply a message received on the profile channel.
    pub fn apply_profile_message(&self, msg: &StreamMessage) {
        self.apply(msg, Channel::Profile);
    }

    /// Record a locally sampled position for this client's own role.
    ///
    /// Ignored once the session is terminal, same as channel messages.
    pub fn record_local_position(&self, role: Role, position: Position) {
        let mut state = self.inner.lock();
        if state.status.is_terminal() {
            debug!(session_id = %state.session_id, "dropping local fix for terminal session");
            return;
        }
        let location = ParticipantLocation { position, origin: LocationOrigin::SelfReport };
        match role {
            Role::Searcher => state.searcher_location = Some(location),
            Role::LostPerson => state.lost_person_location = Some(location),
        }
    }

    /// Record the confirmed route selection (the negotiator calls this only
    /// after the server acknowledged the selection).
    pub fn record_selected_route(&self, route_id: Option<String>) {
        self.inner.lock().selected_route_id = route_id;
    }

    /// Force the session into a terminal status.
    ///
    /// This is how inferred ends reach the snapshot: the reconnect
    /// heuristic, the status-poll backstop, and `not_found` frames all
    /// terminate through here rather than through a stream message. The
    /// sticky rule still holds; an already-terminal status never moves.
    pub fn mark_terminal(&self, kind: TerminalKind) {
        let mut state = self.inner.lock();
        if state.status.is_terminal() {
            return;
        }
        state.status = match kind {
            TerminalKind::Ended => SessionStatus::Ended,
            TerminalKind::Resolved => SessionStatus::Resolved,
        };
        state.last_event_at = Some(SystemTime::now());
    }

    fn apply(&self, msg: &StreamMessage, channel: Channel) {
        let mut state = self.inner.lock();

        if state.status.is_terminal() {
            // Terminal states are sticky; the message is logged but dropped.
            debug!(
                session_id = %state.session_id,
                ?channel,
                ?msg,
                "message ignored: session already terminal"
            );
            return;
        }

        match msg {
            StreamMessage::Session { status, searcher, .. } => {
                if let Some(point) = searcher.as_ref().and_then(|s| s.geopoint) {
                    state.searcher_location = Some(remote_location(point));
                }
                match status.as_deref().map(SessionStatus::from_wire) {
                    Some(Some(next)) => self.advance_status(&mut state, next),
                    Some(None) => {
                        warn!(status = ?status, "unrecognized session status, keeping current");
                        self.mark_active_if_located(&mut state);
                    }
                    None => self.mark_active_if_located(&mut state),
                }
            }
            StreamMessage::LostUpdate { geopoint, .. } => {
                // Location only; a lost update never moves the status.
                if let Some(point) = geopoint {
                    state.lost_person_location = Some(remote_location(*point));
                }
            }
            StreamMessage::Ended { .. } => {
                state.status = SessionStatus::Ended;
            }
            StreamMessage::Resolved { geopoint, .. } => {
                // Take a final fix if one rode along, then freeze.
                if let Some(point) = geopoint {
                    state.lost_person_location = Some(remote_location(*point));
                }
                state.status = SessionStatus::Resolved;
            }
            StreamMessage::NotFound => {
                // Terminality for not-found is decided by the lifecycle
                // monitor, which sees the same message and routes it through
                // `mark_terminal`; only the receipt is recorded here.
                debug!(session_id = %state.session_id, ?channel, "not_found frame");
            }
            StreamMessage::Unknown => {
                debug!(?channel, "unknown frame type, dropped");
                return;
            }
        }

        state.last_event_at = Some(SystemTime::now());
    }

    fn advance_status(&self, state: &mut SessionState, next: SessionStatus) {
        // Pending never comes back once a location is known.
        if next == SessionStatus::Pending && has_any_location(state) {
            state.status = SessionStatus::Active;
        } else {
            state.status = next;
        }
    }

    fn mark_active_if_located(&self, state: &mut SessionState) {
        if state.status == SessionStatus::Pending && has_any_location(state) {
            state.status = SessionStatus::Active;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Channel {
    Session,
    Profile,
}

fn remote_location(point: GeoPoint) -> ParticipantLocation {
    ParticipantLocation { position: Position::new(point), origin: LocationOrigin::Remote }
}

fn has_any_location(state: &SessionState) -> bool {
    state.searcher_location.is_some() || state.lost_person_location.is_some()
}
