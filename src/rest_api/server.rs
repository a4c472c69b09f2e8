//! Axum HTTP server for the REST API

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::ControllerState;
use crate::{Error, Result};

use super::handlers;

/// Metrics endpoint handler
#[cfg(feature = "metrics")]
async fn metrics_handler() -> std::result::Result<String, axum::http::StatusCode> {
    use prometheus_client::encoding::text::encode;
    let mut buffer = String::new();
    encode(&mut buffer, &crate::controller::metrics::REGISTRY)
        .map_err(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(buffer)
}

/// Endpoints that need no cluster access
fn health_routes() -> Router {
    let router = Router::new().route("/health", get(handlers::health));
    #[cfg(feature = "metrics")]
    let router = router.route("/metrics", get(metrics_handler));
    router
}

/// Full router: health routes plus the Store endpoints
pub fn router(state: Arc<ControllerState>) -> Router {
    let stores = Router::new()
        .route("/api/v1/stores", get(handlers::list_stores))
        .route("/api/v1/stores/{namespace}/{name}", get(handlers::get_store))
        .with_state(state);

    health_routes()
        .merge(stores)
        .layer(TraceLayer::new_for_http())
}

/// Run the REST API server
pub async fn run_server(state: Arc<ControllerState>, port: u16) -> Result<()> {
    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("REST API server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::Mutex;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, Response, StatusCode};
    use tower::ServiceExt;

    use crate::config::{BackoffConfig, OperatorConfig};
    use crate::controller::{Reconciler, RetryTracker};
    use crate::testing::{InMemoryMetadataStore, InMemoryObjectStore, InMemoryStoreApi};

    async fn get_body(path: &str) -> (StatusCode, String) {
        let response = health_routes()
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, body) = get_body("/health").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[cfg(feature = "metrics")]
    #[tokio::test]
    async fn test_metrics_endpoint() {
        crate::controller::metrics::inc_state_transition("PENDING");

        let (status, body) = get_body("/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("store_state_transitions_total"));
    }

    /// Client whose requests are answered with an empty StoreList
    fn recording_client(paths: Arc<Mutex<Vec<String>>>) -> kube::Client {
        let service = tower::service_fn(move |req: Request<kube::client::Body>| {
            let paths = paths.clone();
            async move {
                paths.lock().unwrap().push(req.uri().path().to_string());
                let list = serde_json::json!({
                    "apiVersion": "cninf.uman.test/v1",
                    "kind": "StoreList",
                    "metadata": { "resourceVersion": "1" },
                    "items": []
                });
                let response = Response::builder()
                    .status(StatusCode::OK)
                    .header("content-type", "application/json")
                    .body(kube::client::Body::from(serde_json::to_vec(&list).unwrap()))
                    .unwrap();
                Ok::<_, Infallible>(response)
            }
        });
        kube::Client::new(service, "default")
    }

    fn state_for(client: kube::Client, namespace: Option<&str>) -> Arc<ControllerState> {
        let reconciler = Reconciler::new(
            Arc::new(InMemoryStoreApi::default()),
            Arc::new(InMemoryObjectStore::default()),
            Arc::new(InMemoryMetadataStore::default()),
            &OperatorConfig::default(),
        );
        Arc::new(ControllerState {
            client,
            reconciler,
            retries: RetryTracker::default(),
            backoff: BackoffConfig::default(),
            namespace: namespace.map(str::to_string),
        })
    }

    async fn list_path(namespace: Option<&str>) -> String {
        let paths = Arc::new(Mutex::new(Vec::new()));
        let state = state_for(recording_client(paths.clone()), namespace);

        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/stores")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let paths = paths.lock().unwrap();
        assert_eq!(paths.len(), 1);
        paths[0].clone()
    }

    #[tokio::test]
    async fn test_list_stores_stays_in_watched_namespace() {
        assert_eq!(
            list_path(Some("team-a")).await,
            "/apis/cninf.uman.test/v1/namespaces/team-a/stores"
        );
    }

    #[tokio::test]
    async fn test_list_stores_cluster_wide() {
        assert_eq!(list_path(None).await, "/apis/cninf.uman.test/v1/stores");
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (status, _) = get_body("/api/v1/nodes").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
