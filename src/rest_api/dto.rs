//! Response bodies for the REST API

use kube::ResourceExt;
use serde::{Deserialize, Serialize};

use crate::crd::{Store, StoreSpec, StoreStatus};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

/// One row of the Store listing
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSummary {
    pub name: String,
    pub namespace: String,
    pub state: String,
    pub bucket: String,
    pub shared: bool,
    pub locked: bool,
}

impl From<&Store> for StoreSummary {
    fn from(store: &Store) -> Self {
        let bucket = store.bucket();
        Self {
            name: store.name_any(),
            namespace: store.namespace().unwrap_or_default(),
            state: store.state().as_str().to_string(),
            bucket: bucket.name,
            shared: store.spec.shared,
            locked: bucket.locked,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreListResponse {
    pub items: Vec<StoreSummary>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDetailResponse {
    pub name: String,
    pub namespace: String,
    pub spec: StoreSpec,
    pub status: StoreStatus,
    pub finalizers: Vec<String>,
    /// Deletion has been requested and teardown is pending
    pub deleting: bool,
    pub created_at: Option<String>,
}

impl From<&Store> for StoreDetailResponse {
    fn from(store: &Store) -> Self {
        Self {
            name: store.name_any(),
            namespace: store.namespace().unwrap_or_default(),
            spec: store.spec.clone(),
            status: store.status.clone().unwrap_or_default(),
            finalizers: store.finalizers().to_vec(),
            deleting: store.metadata.deletion_timestamp.is_some(),
            created_at: store
                .metadata
                .creation_timestamp
                .as_ref()
                .map(|t| t.0.to_rfc3339()),
        }
    }
}
