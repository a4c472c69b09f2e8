//! Access to Store objects in the cluster
//!
//! The reconciler only talks to the API server through [`StoreApi`], so a
//! pass can be driven against an in-memory cluster in tests.

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Event;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use tracing::instrument;

use crate::crd::{Store, StoreStatus};
use crate::error::Result;
use crate::FIELD_MANAGER;

/// Identity of a Store: stable for the object's lifetime
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn from_store(store: &Store) -> Self {
        Self::new(
            store.namespace().unwrap_or_else(|| "default".to_string()),
            store.name_any(),
        )
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

/// Kubernetes Event attached to a Store
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreEvent {
    pub type_: EventType,
    pub reason: String,
    pub message: String,
}

impl StoreEvent {
    pub fn normal(reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: EventType::Normal,
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    pub fn warning(reason: &str, message: impl Into<String>) -> Self {
        Self {
            type_: EventType::Warning,
            reason: reason.to_string(),
            message: message.into(),
        }
    }
}

/// Reads and writes of Store objects
#[async_trait]
pub trait StoreApi: Send + Sync {
    /// Fetch the latest copy of a Store, `None` if it no longer exists
    async fn get(&self, key: &ObjectKey) -> Result<Option<Store>>;

    /// Replace the status subresource, returning the updated object
    async fn patch_status(&self, store: &Store, status: &StoreStatus) -> Result<Store>;

    /// Replace the finalizer list, returning the updated object
    ///
    /// The write is conditional on the resource version of `store`; a stale
    /// copy is rejected with a conflict.
    async fn set_finalizers(&self, store: &Store, finalizers: Vec<String>) -> Result<Store>;

    async fn record_event(&self, store: &Store, event: &StoreEvent) -> Result<()>;
}

/// [`StoreApi`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStoreApi {
    client: Client,
}

impl KubeStoreApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Store> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn api_for(&self, store: &Store) -> Api<Store> {
        self.api(&store.namespace().unwrap_or_else(|| "default".to_string()))
    }
}

#[async_trait]
impl StoreApi for KubeStoreApi {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Store>> {
        Ok(self.api(&key.namespace).get_opt(&key.name).await?)
    }

    #[instrument(skip(self, store, status), fields(name = %store.name_any(), state = %status.state))]
    async fn patch_status(&self, store: &Store, status: &StoreStatus) -> Result<Store> {
        let patch = json!({ "status": status });
        let updated = self
            .api_for(store)
            .patch_status(
                &store.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(updated)
    }

    #[instrument(skip(self, store), fields(name = %store.name_any()))]
    async fn set_finalizers(&self, store: &Store, finalizers: Vec<String>) -> Result<Store> {
        // resourceVersion turns the merge patch into a compare-and-swap
        let patch = json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": store.resource_version(),
            }
        });
        let updated = self
            .api_for(store)
            .patch(
                &store.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(updated)
    }

    async fn record_event(&self, store: &Store, event: &StoreEvent) -> Result<()> {
        let namespace = store.namespace().unwrap_or_else(|| "default".to_string());
        let events: Api<Event> = Api::namespaced(self.client.clone(), &namespace);

        let time = chrono::Utc::now();
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-event-", store.name_any())),
                ..Default::default()
            },
            type_: Some(event.type_.as_str().to_string()),
            reason: Some(event.reason.clone()),
            message: Some(event.message.clone()),
            involved_object: store.object_ref(&()),
            reporting_component: Some(FIELD_MANAGER.to_string()),
            first_timestamp: Some(Time(time)),
            last_timestamp: Some(Time(time)),
            count: Some(1),
            ..Default::default()
        };

        events.create(&PostParams::default(), &event).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::StoreSpec;

    #[test]
    fn test_object_key_from_store() {
        let mut store = Store::new(
            "logs",
            StoreSpec {
                name: "logs".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(ObjectKey::from_store(&store), ObjectKey::new("default", "logs"));

        store.metadata.namespace = Some("team-a".to_string());
        let key = ObjectKey::from_store(&store);
        assert_eq!(key.to_string(), "team-a/logs");
    }

    #[test]
    fn test_event_constructors() {
        let event = StoreEvent::warning("ProvisioningFailed", "bucket create failed");
        assert_eq!(event.type_.as_str(), "Warning");
        assert_eq!(event.reason, "ProvisioningFailed");

        assert_eq!(StoreEvent::normal("Created", "ok").type_, EventType::Normal);
    }
}
