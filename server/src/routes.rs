//! Route definitions for the relay's liveness API

use axum::{routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::app_state::AppState;
use crate::handlers::*;

// Liveness routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api", get(api_banner))
}

// Oracle relay routes
pub fn oracle_routes() -> Router<AppState> {
    Router::new()
        .route("/api/oracles", get(list_oracles))
        .route("/api/relay/stats", get(relay_stats))
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(oracle_routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::models::{AccountHandle, Identity, IdentityStatus, IndexSet};
    use crate::services::{RegistrySnapshot, RelayStats};

    fn state() -> AppState {
        let registry = RegistrySnapshot::from(vec![Identity::new(
            AccountHandle::new("0x0000000000000000000000000000000000000001"),
            IndexSet::new([1, 2, 3]),
            IdentityStatus::Registered,
        )]);
        let stats = Arc::new(RelayStats::default());
        stats.record_request();
        stats.record_zero_match();
        AppState::new(registry, stats)
    }

    async fn get_json(uri: &str) -> (StatusCode, Value) {
        let response = app(state())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let response = app(state())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn api_banner_matches_the_dapp_contract() {
        let (status, body) = get_json("/api").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "An API for use with your Dapp!");
    }

    #[tokio::test]
    async fn oracles_and_stats_are_exposed() {
        let (_, oracles) = get_json("/api/oracles").await;
        assert_eq!(oracles["data"]["count"], 1);
        assert_eq!(oracles["data"]["oracles"][0]["indexes"], serde_json::json!([1, 2, 3]));
        assert_eq!(oracles["data"]["oracles"][0]["status"], "registered");

        let (_, stats) = get_json("/api/relay/stats").await;
        assert_eq!(stats["success"], true);
        assert_eq!(stats["data"]["requests_received"], 1);
        assert_eq!(stats["data"]["zero_match_requests"], 1);
    }
}
