//! REST surface of the coordination server.
//!
//! The engine only ever talks to the server through [`RescueApi`], so every
//! collaborator (reporter, negotiator, lifecycle poll) can be exercised
//! against a test double. [`HttpApi`] is the production implementation.

use async_trait::async_trait;
use lantern_proto::{
    GeoPoint, LocationReport, RouteAlternative, RouteAlternativesRequest,
    SelectRouteRequest, SessionRoutesResponse, SessionStatusResponse,
};
use reqwest::StatusCode;

use crate::error::EngineError;

#[async_trait]
pub trait RescueApi: Send + Sync + 'static {
    /// `POST /sessions/{id}/searcher/location`
    async fn report_searcher_location(
        &self,
        session_id: &str,
        point: GeoPoint,
    ) -> Result<(), EngineError>;

    /// `POST /profiles/{id}/location`
    async fn report_profile_location(
        &self,
        profile_id: &str,
        point: GeoPoint,
    ) -> Result<(), EngineError>;

    /// `POST /navigation/route-alternatives`
    async fn compute_route_alternatives(
        &self,
        request: RouteAlternativesRequest,
    ) -> Result<Vec<RouteAlternative>, EngineError>;

    /// `GET /navigation/sessions/{id}/route-alternatives`
    async fn session_route_alternatives(
        &self,
        session_id: &str,
    ) -> Result<SessionRoutesResponse, EngineError>;

    /// `POST /navigation/sessions/{id}/select-route`
    async fn select_route(
        &self,
        session_id: &str,
        request: SelectRouteRequest,
    ) -> Result<(), EngineError>;

    /// `GET /sessions/{id}/status`
    async fn session_status(
        &self,
        session_id: &str,
    ) -> Result<SessionStatusResponse, EngineError>;
}

/// reqwest-backed implementation against the coordination server.
pub struct HttpApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into().trim_end_matches('/').to_owned() }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn check_status(status: StatusCode, context: &str) -> Result<(), EngineError> {
    if status == StatusCode::NOT_FOUND {
        return Err(EngineError::NotFound(context.to_owned()));
    }
    if !status.is_success() {
        return Err(EngineError::Transport(format!("{context}: HTTP {status}")));
    }
    Ok(())
}

#[async_trait]
impl RescueApi for HttpApi {
    async fn report_searcher_location(
        &self,
        session_id: &str,
        point: GeoPoint,
    ) -> Result<(), EngineError> {
        let url = self.endpoint(&format!("/sessions/{session_id}/searcher/location"));
        let resp = self
            .http
            .post(&url)
            .json(&LocationReport::from(point))
            .send()
            .await
            .map_err(|e| EngineError::Upload(e.to_string()))?;
        check_status(resp.status(), "searcher location report")
            .map_err(|e| match e {
                EngineError::Transport(msg) => EngineError::Upload(msg),
                other => other,
            })
    }

    async fn report_profile_location(
        &self,
        profile_id: &str,
        point: GeoPoint,
    ) -> Result<(), EngineError> {
        let url = self.endpoint(&format!("/profiles/{profile_id}/location"));
        let resp = self
            .http
            .post(&url)
            .json(&LocationReport::from(point))
            .send()
            .await
            .map_err(|e| EngineError::Upload(e.to_string()))?;
        check_status(resp.status(), "profile location report")
            .map_err(|e| match e {
                EngineError::Transport(msg) => EngineError::Upload(msg),
                other => other,
            })
    }

    async fn compute_route_alternatives(
        &self,
        request: RouteAlternativesRequest,
    ) -> Result<Vec<RouteAlternative>, EngineError> {
        let url = self.endpoint("/navigation/route-alternatives");
        let resp = self.http.post(&url).json(&request).send().await?;
        check_status(resp.status(), "route alternatives")?;
        Ok(resp.json().await?)
    }

    async fn session_route_alternatives(
        &self,
        session_id: &str,
    ) -> Result<SessionRoutesResponse, EngineError> {
        let url = self.endpoint(&format!("/navigation/sessions/{session_id}/route-alternatives"));
        let resp = self.http.get(&url).send().await?;
        check_status(resp.status(), "session route alternatives")?;
        Ok(resp.json().await?)
    }

    async fn select_route(
        &self,
        session_id: &str,
        request: SelectRouteRequest,
    ) -> Result<(), EngineError> {
        let url = self.endpoint(&format!("/navigation/sessions/{session_id}/select-route"));
        let resp = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::Selection(e.to_string()))?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(EngineError::NotFound("route selection".to_owned()));
        }
        if !resp.status().is_success() {
            return Err(EngineError::Selection(format!("HTTP {}", resp.status())));
        }
        Ok(())
    }

    async fn session_status(
        &self,
        session_id: &str,
    ) -> Result<SessionStatusResponse, EngineError> {
        let url = self.endpoint(&format!("/sessions/{session_id}/status"));
        let resp = self.http.get(&url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            // The backstop poll treats an absent session as a definitive
            // answer, not a transport failure.
            return Ok(SessionStatusResponse { exists: false, status: None });
        }
        check_status(resp.status(), "session status")?;
        Ok(resp.json().await?)
    }
}
