//! HTTP routing configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::app::AppState;

use super::handlers::{
    enqueue_send_funds_handler, get_job_handler, health_check_handler, list_jobs_handler,
    liveness_handler, metrics_handler, provision_default_wallet_handler, readiness_handler,
    requeue_job_handler, send_funds_handler, transaction_history_handler,
    wallet_overview_handler,
};

/// Requests still running after this are answered with 408.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            REQUEST_TIMEOUT,
        ));

    let user_routes = Router::new()
        .route("/{user_id}/wallets", get(wallet_overview_handler))
        .route(
            "/{user_id}/wallets/default",
            post(provision_default_wallet_handler),
        )
        .route(
            "/{user_id}/wallets/{wallet_id}/history",
            get(transaction_history_handler),
        )
        .route(
            "/{user_id}/wallets/{wallet_id}/send",
            post(send_funds_handler),
        )
        .route(
            "/{user_id}/wallets/{wallet_id}/send/async",
            post(enqueue_send_funds_handler),
        );

    let job_routes = Router::new()
        .route("/", get(list_jobs_handler))
        .route("/{job_id}", get(get_job_handler))
        .route("/{job_id}/requeue", post(requeue_job_handler));

    let health_routes = Router::new()
        .route("/", get(health_check_handler))
        .route("/live", get(liveness_handler))
        .route("/ready", get(readiness_handler));

    Router::new()
        .nest("/users", user_routes)
        .nest("/jobs", job_routes)
        .nest("/health", health_routes)
        .route("/metrics", get(metrics_handler))
        .layer(middleware)
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::app::provisioning::ProvisioningSettings;
    use crate::app::scheduler::SchedulerConfig;
    use crate::app::service::{ServiceDependencies, WalletService};
    use crate::test_utils::{InMemoryStore, MockNotifier, MockRemoteWalletService};

    fn router_with(store: Arc<InMemoryStore>, remote: Arc<MockRemoteWalletService>) -> Router {
        let service = WalletService::new(ServiceDependencies {
            wallets: store.clone(),
            jobs: store,
            wallet_service: remote,
            notifier: Arc::new(MockNotifier::new()),
            provisioning: ProvisioningSettings::default(),
            scheduler: SchedulerConfig::default(),
        });
        create_router(Arc::new(AppState::new(Arc::new(service))))
    }

    fn router() -> Router {
        router_with(
            Arc::new(InMemoryStore::new()),
            Arc::new(MockRemoteWalletService::new()),
        )
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_liveness() {
        let response = router()
            .oneshot(Request::get("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readiness_reports_unhealthy_database() {
        let store = Arc::new(InMemoryStore::new());
        store.set_healthy(false);
        let response = router_with(store, Arc::new(MockRemoteWalletService::new()))
            .oneshot(Request::get("/health/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_health_is_degraded_when_wallet_service_down() {
        let remote = Arc::new(MockRemoteWalletService::new());
        remote.set_healthy(false);
        let response = router_with(Arc::new(InMemoryStore::new()), remote)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["wallet_service"], "unhealthy");
    }

    #[tokio::test]
    async fn test_metrics_without_recorder_is_not_found() {
        let response = router()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let uri = format!("/jobs/{}", uuid::Uuid::new_v4());
        let response = router()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "not_found");
    }

    #[tokio::test]
    async fn test_list_jobs_rejects_unknown_status() {
        let response = router()
            .oneshot(
                Request::get("/jobs?status=done")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_provision_rejects_invalid_email() {
        let response = router()
            .oneshot(
                Request::post("/users/u1/wallets/default")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"email":"nope"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "validation_error");
    }

    #[tokio::test]
    async fn test_overview_of_user_without_wallets_is_empty() {
        let response = router()
            .oneshot(Request::get("/users/u1/wallets").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["user_id"], "u1");
        assert_eq!(json["wallets"].as_array().map(Vec::len), Some(0));
    }
}
