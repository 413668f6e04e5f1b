use std::env;

use tokio::time::Duration;
use url::Url;

use crate::error::EngineError;
use crate::lifecycle::{DEFAULT_RECONNECT_GRACE, DEFAULT_STATUS_POLL_INTERVAL};
use crate::model::Role;
use crate::reporter::DEFAULT_REPORT_INTERVAL;
use crate::stream::DEFAULT_RECONNECT_DELAY;

/// Engine configuration for one live session.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Base URL of the coordination REST API.
    pub rest_base_url: String,
    /// Base URL of the live-stream endpoint (`ws://` or `wss://`).
    pub stream_base_url: String,
    pub session_id: String,
    pub profile_id: String,
    pub role: Role,
    pub high_accuracy: bool,
    pub report_interval: Duration,
    pub reconnect_delay: Duration,
    pub reconnect_grace: Duration,
    pub status_poll_interval: Duration,
}

impl EngineConfig {
    pub fn new(
        session_id: impl Into<String>,
        profile_id: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            rest_base_url: "http://127.0.0.1:8080".to_owned(),
            stream_base_url: "ws://127.0.0.1:8080".to_owned(),
            session_id: session_id.into(),
            profile_id: profile_id.into(),
            role,
            high_accuracy: true,
            report_interval: DEFAULT_REPORT_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            reconnect_grace: DEFAULT_RECONNECT_GRACE,
            status_poll_interval: DEFAULT_STATUS_POLL_INTERVAL,
        }
    }

    /// Load endpoint URLs from `LANTERN_API_URL` / `LANTERN_STREAM_URL`,
    /// falling back to localhost defaults.
    pub fn from_env(
        session_id: impl Into<String>,
        profile_id: impl Into<String>,
        role: Role,
    ) -> Self {
        let mut config = Self::new(session_id, profile_id, role);
        if let Ok(api) = env::var("LANTERN_API_URL") {
            config.rest_base_url = api;
        }
        if let Ok(stream) = env::var("LANTERN_STREAM_URL") {
            config.stream_base_url = normalize_stream_base(&stream);
        }
        config
    }

    pub fn session_stream_url(&self) -> String {
        format!(
            "{}/ws/sessions/{}",
            self.stream_base_url.trim_end_matches('/'),
            self.session_id
        )
    }

    pub fn profile_stream_url(&self) -> String {
        format!(
            "{}/ws/profiles/{}",
            self.stream_base_url.trim_end_matches('/'),
            self.profile_id
        )
    }

    /// The id position reports are filed under for this role.
    pub fn report_target_id(&self) -> &str {
        match self.role {
            Role::Searcher => &self.session_id,
            Role::LostPerson => &self.profile_id,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.session_id.is_empty() {
            return Err(EngineError::NotFound("empty session id".to_owned()));
        }
        Url::parse(&self.rest_base_url)
            .map_err(|e| EngineError::Transport(format!("bad rest url: {e}")))?;
        let stream = Url::parse(&self.stream_base_url)
            .map_err(|e| EngineError::Transport(format!("bad stream url: {e}")))?;
        match stream.scheme() {
            "ws" | "wss" => Ok(()),
            other => Err(EngineError::Transport(format!(
                "stream url must be ws:// or wss://, got {other}://"
            ))),
        }
    }
}

/// Accept bare hosts for the stream endpoint: localhost stays plaintext,
/// anything else is assumed TLS.
fn normalize_stream_base(base: &str) -> String {
    if base.starts_with("ws://") || base.starts_with("wss://") {
        base.trim_end_matches('/').to_owned()
    } else if base.contains("localhost") || base.contains("127.0.0.1") {
        format!("ws://{}", base.trim_end_matches('/'))
    } else {
        format!("wss://{}", base.trim_end_matches('/'))
    }
}
