//! Live session synchronization and navigation coordination.
//!
//! This crate keeps a searcher and a lost-person client informed of each
//! other's position and routing in near-real time over unreliable,
//! server-pushed channels. It consumes two live update streams with
//! automatic reconnection, samples and throttle-uploads the local position,
//! merges differently-shaped payloads into one [`model::SessionState`],
//! negotiates route alternatives, and drives the found/ended lifecycle so
//! both participants observe it consistently.
//!
//! The entry point is [`engine::SessionEngine`]; everything underneath it is
//! public so hosts with unusual wiring (headless monitors, replay tooling)
//! can assemble the pieces themselves.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod geo;
pub mod lifecycle;
pub mod model;
pub mod reporter;
pub mod routes;
pub mod sampler;
pub mod store;
pub mod stream;

pub use api::{HttpApi, RescueApi};
pub use config::EngineConfig;
pub use engine::SessionEngine;
pub use error::{EngineError, SampleError};
pub use lantern_proto::{parse_frame, GeoPoint, RouteAlternative, RouteKind, StreamMessage};
pub use lifecycle::{NoopNotifier, Notifier};
pub use model::{
    ConnectionHealth, ConnectionPhase, ConnectionState, Role, SessionState, SessionStatus,
    TerminalKind,
};
pub use sampler::{GeoSampler, LocationBackend, WatchGuard};
pub use store::SessionStateStore;
