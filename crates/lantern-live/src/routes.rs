//! Route alternative negotiation.
//!
//! The negotiator owns the full lifecycle of the alternative set: fetches
//! replace the set wholesale (a stale geometry can never pair with a fresh
//! metric), selection is validated locally before any network call, and the
//! local selection only moves after the server confirmed it.

use std::sync::Arc;

use lantern_proto::{
    GeoPoint, RouteAlternative, RouteAlternativesRequest, SelectRouteRequest,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::api::RescueApi;
use crate::error::EngineError;
use crate::store::SessionStateStore;

/// Read-only view of the current alternative set, handed to the UI layer.
#[derive(Debug, Clone, Default)]
pub struct RouteSnapshot {
    pub alternatives: Vec<RouteAlternative>,
    pub selected: Option<String>,
}

#[derive(Default)]
struct RouteSet {
    alternatives: Vec<RouteAlternative>,
    selected_id: Option<String>,
}

pub struct RouteNegotiator {
    api: Arc<dyn RescueApi>,
    store: Arc<SessionStateStore>,
    session_id: String,
    inner: Mutex<RouteSet>,
}

impl RouteNegotiator {
    pub fn new(
        api: Arc<dyn RescueApi>,
        store: Arc<SessionStateStore>,
        session_id: impl Into<String>,
    ) -> Self {
        Self { api, store, session_id: session_id.into(), inner: Mutex::new(RouteSet::default()) }
    }

    /// Fetch the session's current alternatives, replacing any previous set.
    ///
    /// If the server already knows a selection it is adopted; otherwise a
    /// degenerate single-alternative set is auto-selected (best effort — a
    /// failed persistence attempt leaves the set unselected).
    pub async fn fetch_alternatives(&self) -> Result<Vec<RouteAlternative>, EngineError> {
        let response = self.api.session_route_alternatives(&self.session_id).await?;
        self.replace(response.alternatives.clone(), response.selected);
        self.auto_select_single().await;
        Ok(response.alternatives)
    }

    /// Ask the server to compute fresh alternatives between two points and
    /// adopt them as the new set.
    pub async fn compute_alternatives(
        &self,
        from: GeoPoint,
        to: GeoPoint,
    ) -> Result<Vec<RouteAlternative>, EngineError> {
        let request = RouteAlternativesRequest {
            from_lat: from.lat,
            from_lng: from.lng,
            to_lat: to.lat,
            to_lng: to.lng,
        };
        let alternatives = self.api.compute_route_alternatives(request).await?;
        self.replace(alternatives.clone(), None);
        self.auto_select_single().await;
        Ok(alternatives)
    }

    /// Select one alternative by id.
    ///
    /// Fails closed: an id that is not in the current set is rejected before
    /// any network call, and on a server error the previous selection stays.
    pub async fn select(&self, route_id: &str) -> Result<(), EngineError> {
        let route_index = {
            let set = self.inner.lock();
            match set.alternatives.iter().find(|alt| alt.id == route_id) {
                Some(alt) => alt.index,
                None => {
                    return Err(EngineError::Selection(format!(
                        "unknown route id {route_id}"
                    )))
                }
            }
        };

        let request =
            SelectRouteRequest { route_id: route_id.to_owned(), route_index };
        self.api.select_route(&self.session_id, request).await?;

        self.commit_selection(route_id);
        Ok(())
    }

    /// The currently selected alternative, if any.
    pub fn selected_route(&self) -> Option<RouteAlternative> {
        let set = self.inner.lock();
        let id = set.selected_id.as_deref()?;
        set.alternatives.iter().find(|alt| alt.id == id).cloned()
    }

    pub fn snapshot(&self) -> RouteSnapshot {
        let set = self.inner.lock();
        RouteSnapshot {
            alternatives: set.alternatives.clone(),
            selected: set.selected_id.clone(),
        }
    }

    fn replace(&self, alternatives: Vec<RouteAlternative>, selected: Option<String>) {
        // A remembered selection only survives if it still names a member of
        // the fresh set.
        let selected = selected
            .filter(|id| alternatives.iter().any(|alt| &alt.id == id));
        debug!(
            count = alternatives.len(),
            selected = selected.as_deref().unwrap_or("-"),
            "route alternative set replaced"
        );
        let mut set = self.inner.lock();
        set.alternatives = alternatives;
        set.selected_id = selected.clone();
        drop(set);
        self.store.record_selected_route(selected);
    }

    async fn auto_select_single(&self) {
        let lone = {
            let set = self.inner.lock();
            if set.selected_id.is_none() && set.alternatives.len() == 1 {
                Some((set.alternatives[0].id.clone(), set.alternatives[0].index))
            } else {
                None
            }
        };
        let Some((route_id, route_index)) = lone else { return };

        let request = SelectRouteRequest { route_id: route_id.clone(), route_index };
        match self.api.select_route(&self.session_id, request).await {
            Ok(()) => self.commit_selection(&route_id),
            Err(err) => {
                warn!(%err, route_id, "auto-select of lone alternative not persisted");
            }
        }
    }

    fn commit_selection(&self, route_id: &str) {
        let mut set = self.inner.lock();
        // The set may have been replaced while the request was in flight; a
        // selection for a route that no longer exists is discarded.
        if !set.alternatives.iter().any(|alt| alt.id == route_id) {
            warn!(route_id, "confirmed selection no longer in the current set");
            return;
        }
        set.selected_id = Some(route_id.to_owned());
        drop(set);
        self.store.record_selected_route(Some(route_id.to_owned()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::SpyApi;
    use lantern_proto::RouteKind;
    use std::sync::atomic::Ordering;

    fn alternative(id: &str, index: u32, kind: RouteKind) -> RouteAlternative {
        RouteAlternative {
            id: id.to_owned(),
            index,
            kind,
            distance_meters: 1200.0 + index as f64,
            duration_seconds: 900,
            geometry: vec![GeoPoint::new(34.19, 43.88), GeoPoint::new(34.20, 43.89)],
        }
    }

    fn negotiator(api: &Arc<SpyApi>) -> RouteNegotiator {
        RouteNegotiator::new(
            Arc::clone(api) as Arc<dyn RescueApi>,
            Arc::new(SessionStateStore::new("s1")),
            "s1",
        )
    }

    #[tokio::test]
    async fn select_unknown_id_fails_before_any_network_call() {
        let api = Arc::new(SpyApi::default());
        *api.alternatives.lock() = vec![alternative("r1", 0, RouteKind::Walking)];
        let negotiator = negotiator(&api);
        negotiator.fetch_alternatives().await.unwrap();
        let calls_before = api.select_calls.load(Ordering::SeqCst);

        let err = negotiator.select("missing").await.unwrap_err();
        assert!(matches!(err, EngineError::Selection(_)));
        assert_eq!(api.select_calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn successful_select_is_idempotent() {
        let api = Arc::new(SpyApi::default());
        *api.alternatives.lock() = vec![
            alternative("r1", 0, RouteKind::Shortest),
            alternative("r2", 1, RouteKind::Fastest),
        ];
        let negotiator = negotiator(&api);
        negotiator.fetch_alternatives().await.unwrap();
        // Two alternatives: nothing auto-selected.
        assert!(negotiator.selected_route().is_none());

        negotiator.select("r2").await.unwrap();
        assert_eq!(negotiator.snapshot().selected.as_deref(), Some("r2"));
        negotiator.select("r2").await.unwrap();
        assert_eq!(negotiator.snapshot().selected.as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn failed_select_keeps_previous_selection() {
        let api = Arc::new(SpyApi::default());
        *api.alternatives.lock() = vec![
            alternative("r1", 0, RouteKind::Shortest),
            alternative("r2", 1, RouteKind::Fastest),
        ];
        let negotiator = negotiator(&api);
        negotiator.fetch_alternatives().await.unwrap();
        negotiator.select("r1").await.unwrap();

        api.fail_select.store(true, Ordering::SeqCst);
        let err = negotiator.select("r2").await.unwrap_err();
        assert!(matches!(err, EngineError::Selection(_)));
        assert_eq!(negotiator.snapshot().selected.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn lone_alternative_is_auto_selected_and_persisted() {
        let api = Arc::new(SpyApi::default());
        *api.alternatives.lock() = vec![alternative("only", 0, RouteKind::Walking)];
        let negotiator = negotiator(&api);
        negotiator.fetch_alternatives().await.unwrap();

        assert_eq!(negotiator.snapshot().selected.as_deref(), Some("only"));
        assert_eq!(api.selected.lock().as_deref(), Some("only"));
    }

    #[tokio::test]
    async fn auto_select_failure_leaves_set_usable() {
        let api = Arc::new(SpyApi::default());
        *api.alternatives.lock() = vec![alternative("only", 0, RouteKind::Walking)];
        api.fail_select.store(true, Ordering::SeqCst);
        let negotiator = negotiator(&api);
        let alternatives = negotiator.fetch_alternatives().await.unwrap();

        assert_eq!(alternatives.len(), 1);
        assert!(negotiator.snapshot().selected.is_none());
    }

    #[tokio::test]
    async fn compute_sends_the_leg_and_adopts_the_result() {
        let api = Arc::new(SpyApi::default());
        *api.alternatives.lock() = vec![alternative("only", 0, RouteKind::Walking)];
        let negotiator = negotiator(&api);

        let from = GeoPoint::new(34.19655, 43.88534);
        let to = GeoPoint::new(34.19625, 43.88504);
        let alternatives = negotiator.compute_alternatives(from, to).await.unwrap();
        assert_eq!(alternatives.len(), 1);

        let request = api.compute_requests.lock()[0];
        assert_eq!(request.from_lat, from.lat);
        assert_eq!(request.from_lng, from.lng);
        assert_eq!(request.to_lat, to.lat);
        assert_eq!(request.to_lng, to.lng);

        // Computed sets behave like fetched ones: the lone alternative is
        // auto-selected and persisted.
        assert_eq!(negotiator.snapshot().selected.as_deref(), Some("only"));
        assert_eq!(api.selected.lock().as_deref(), Some("only"));
    }

    #[tokio::test]
    async fn refetch_replaces_set_wholesale() {
        let api = Arc::new(SpyApi::default());
        *api.alternatives.lock() = vec![
            alternative("r1", 0, RouteKind::Shortest),
            alternative("r2", 1, RouteKind::Fastest),
        ];
        let negotiator = negotiator(&api);
        negotiator.fetch_alternatives().await.unwrap();
        negotiator.select("r1").await.unwrap();

        // Server recomputed: r1 is gone, the remembered server-side
        // selection no longer applies.
        *api.alternatives.lock() = vec![alternative("r3", 0, RouteKind::Walking)];
        *api.selected.lock() = Some("r1".to_owned());
        negotiator.fetch_alternatives().await.unwrap();

        let snapshot = negotiator.snapshot();
        assert_eq!(snapshot.alternatives.len(), 1);
        assert_eq!(snapshot.alternatives[0].id, "r3");
        // The stale selection was dropped, and the lone fresh alternative
        // took its place.
        assert_eq!(snapshot.selected.as_deref(), Some("r3"));
    }

    #[tokio::test]
    async fn server_known_selection_is_adopted() {
        let api = Arc::new(SpyApi::default());
        *api.alternatives.lock() = vec![
            alternative("r1", 0, RouteKind::Shortest),
            alternative("r2", 1, RouteKind::Fastest),
        ];
        *api.selected.lock() = Some("r2".to_owned());
        let negotiator = negotiator(&api);
        negotiator.fetch_alternatives().await.unwrap();

        let selected = negotiator.selected_route().unwrap();
        assert_eq!(selected.id, "r2");
        assert_eq!(selected.kind, RouteKind::Fastest);
    }
}
