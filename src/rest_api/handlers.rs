//! HTTP handlers for the REST API

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use kube::api::Api;
use tracing::{error, instrument};

use crate::controller::ControllerState;
use crate::crd::Store;

use super::dto::{
    ErrorResponse, HealthResponse, StoreDetailResponse, StoreListResponse, StoreSummary,
};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Health check endpoint
#[instrument]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// List Stores in the watched namespace, or in all of them
#[instrument(skip(state))]
pub async fn list_stores(
    State(state): State<Arc<ControllerState>>,
) -> Result<Json<StoreListResponse>, ApiError> {
    let api: Api<Store> = match &state.namespace {
        Some(ns) => Api::namespaced(state.client.clone(), ns),
        None => Api::all(state.client.clone()),
    };

    match api.list(&Default::default()).await {
        Ok(stores) => {
            let items: Vec<StoreSummary> = stores.items.iter().map(StoreSummary::from).collect();
            let total = items.len();
            Ok(Json(StoreListResponse { items, total }))
        }
        Err(e) => {
            error!("Failed to list stores: {:?}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("list_failed", &e.to_string())),
            ))
        }
    }
}

/// Get a specific Store
#[instrument(skip(state), fields(name = %name, namespace = %namespace))]
pub async fn get_store(
    State(state): State<Arc<ControllerState>>,
    Path((namespace, name)): Path<(String, String)>,
) -> Result<Json<StoreDetailResponse>, ApiError> {
    let api: Api<Store> = Api::namespaced(state.client.clone(), &namespace);

    match api.get_opt(&name).await {
        Ok(Some(store)) => Ok(Json(StoreDetailResponse::from(&store))),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                "not_found",
                &format!("Store {}/{} not found", namespace, name),
            )),
        )),
        Err(e) => {
            error!("Failed to get store {}/{}: {:?}", namespace, name, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("get_failed", &e.to_string())),
            ))
        }
    }
}
