use crate::store::{ListStore, StoreError};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use toolrec::{ExternalId, SinkKeys};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ListStore>,
    pub keys: SinkKeys,
}

impl AppState {
    pub fn new(store: Arc<dyn ListStore>, keys: SinkKeys) -> AppState {
        AppState { store, keys }
    }

    async fn popular(&self) -> Result<Vec<ExternalId>, StoreError> {
        self.store.get_list(&self.keys.popular()).await
    }

    /// Users without a list of their own get the global one
    async fn or_popular(&self, key: String) -> Result<Vec<ExternalId>, StoreError> {
        let list = self.store.get_list(&key).await?;
        if list.is_empty() {
            debug!("{} is empty, serving popular", key);
            return self.popular().await;
        }
        Ok(list)
    }
}

pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        ApiError(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!("Store request failed: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"type": "error", "code": "STORE_ERROR"})),
        )
            .into_response()
    }
}

type ListResponse = Result<Json<Vec<ExternalId>>, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/recommend/history/:user_id", get(get_history))
        .route("/recommend/discovery/:user_id", get(get_discovery))
        .route("/recommend/related/:item_id", get(get_related))
        .route("/recommend/popular", get(get_popular))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The user's most-weighted items, popular when the user has none
pub async fn get_history(State(state): State<AppState>, Path(user_id): Path<String>) -> ListResponse {
    let key = state.keys.history(&ExternalId::parse(&user_id));
    Ok(Json(state.or_popular(key).await?))
}

/// Items the user has not tried yet, popular when there is nothing to suggest
pub async fn get_discovery(State(state): State<AppState>, Path(user_id): Path<String>) -> ListResponse {
    let key = state.keys.discovery(&ExternalId::parse(&user_id));
    Ok(Json(state.or_popular(key).await?))
}

pub async fn get_related(State(state): State<AppState>, Path(item_id): Path<String>) -> ListResponse {
    let key = state.keys.related(&ExternalId::parse(&item_id));
    Ok(Json(state.store.get_list(&key).await?))
}

pub async fn get_popular(State(state): State<AppState>) -> ListResponse {
    Ok(Json(state.popular().await?))
}

pub async fn health(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => Json(json!({"status": "ok"})).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "error", "detail": e.to_string()})),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::{body::Body, http::Request};
    use serde_json::Value;
    use tower::ServiceExt;

    async fn app() -> Router {
        let store = MemoryStore::new();
        let keys = SinkKeys::new();
        store
            .insert(keys.popular(), vec![ExternalId::Int(10), ExternalId::Int(11)])
            .await;
        store
            .insert(keys.history(&ExternalId::Int(1)), vec![ExternalId::Int(12)])
            .await;
        store
            .insert(
                keys.discovery(&ExternalId::from("alice")),
                vec![ExternalId::from("mill")],
            )
            .await;
        store
            .insert(keys.related(&ExternalId::Int(10)), vec![ExternalId::Int(11)])
            .await;

        router(AppState::new(Arc::new(store), keys))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn serves_history() {
        let (status, body) = get(app().await, "/recommend/history/1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([12]));
    }

    #[tokio::test]
    async fn unknown_users_get_popular() {
        let (_, history) = get(app().await, "/recommend/history/999").await;
        let (_, discovery) = get(app().await, "/recommend/discovery/999").await;
        assert_eq!(history, json!([10, 11]));
        assert_eq!(discovery, json!([10, 11]));
    }

    #[tokio::test]
    async fn text_ids_pass_through() {
        let (status, body) = get(app().await, "/recommend/discovery/alice").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(["mill"]));
    }

    #[tokio::test]
    async fn related_has_no_fallback() {
        let (_, known) = get(app().await, "/recommend/related/10").await;
        let (_, unknown) = get(app().await, "/recommend/related/77").await;
        assert_eq!(known, json!([11]));
        assert_eq!(unknown, json!([]));
    }

    #[tokio::test]
    async fn serves_popular_and_health() {
        let (_, popular) = get(app().await, "/recommend/popular").await;
        let (status, health) = get(app().await, "/health").await;
        assert_eq!(popular, json!([10, 11]));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn store_failures_are_reported() {
        let app = router(AppState::new(Arc::new(MemoryStore::unavailable()), SinkKeys::new()));

        let (status, body) = get(app.clone(), "/recommend/popular").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"type": "error", "code": "STORE_ERROR"}));

        let (status, body) = get(app, "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "error");
    }
}
