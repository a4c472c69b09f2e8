//! Metadata records published for consumers of a Store
//!
//! Each Store gets one ConfigMap named `<spec.name>-configmap` in its own
//! namespace, holding the bucket name and its provider location.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use tracing::{info, instrument, warn};

use crate::crd::Store;
use crate::error::{Error, Result};
use crate::FIELD_MANAGER;

pub const BUCKET_KEY: &str = "bucket";
pub const LOCATION_KEY: &str = "location";
/// Label pointing a record back at the Store that owns it
pub const STORE_LABEL: &str = "cninf.uman.test/store";

/// Identity of a metadata record
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub namespace: String,
    pub name: String,
}

impl RecordKey {
    pub fn for_store(store: &Store) -> Self {
        Self {
            namespace: store.namespace().unwrap_or_else(|| "default".to_string()),
            name: format!("{}-configmap", store.spec.name),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Value of a metadata record
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetadataRecord {
    pub bucket: String,
    /// Provider-assigned location; empty when the provider reports none
    pub location: String,
    pub labels: BTreeMap<String, String>,
    pub owner: Option<OwnerReference>,
}

impl MetadataRecord {
    pub fn for_store(store: &Store, bucket: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            location: location.into(),
            labels: standard_labels(store),
            owner: Some(owner_reference(store)),
        }
    }

    pub fn data(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (BUCKET_KEY.to_string(), self.bucket.clone()),
            (LOCATION_KEY.to_string(), self.location.clone()),
        ])
    }
}

/// Keyed record store holding resource location metadata
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get_record(&self, key: &RecordKey) -> Result<Option<MetadataRecord>>;

    /// Create or overwrite a record
    async fn put_record(&self, key: &RecordKey, record: &MetadataRecord) -> Result<()>;

    /// Delete a record; deleting a missing record succeeds
    async fn delete_record(&self, key: &RecordKey) -> Result<()>;
}

/// Labels applied to every record the operator writes
pub fn standard_labels(store: &Store) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), "store".to_string());
    labels.insert("app.kubernetes.io/instance".to_string(), store.name_any());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        FIELD_MANAGER.to_string(),
    );
    labels.insert(STORE_LABEL.to_string(), store.name_any());
    labels
}

/// Create an OwnerReference for garbage collection
pub fn owner_reference(store: &Store) -> OwnerReference {
    OwnerReference {
        api_version: Store::api_version(&()).to_string(),
        kind: Store::kind(&()).to_string(),
        name: store.name_any(),
        uid: store.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Metadata store backed by Kubernetes ConfigMaps
#[derive(Clone)]
pub struct ConfigMapMetadataStore {
    client: Client,
}

impl ConfigMapMetadataStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, key: &RecordKey) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &key.namespace)
    }
}

#[async_trait]
impl MetadataStore for ConfigMapMetadataStore {
    #[instrument(skip(self), fields(record = %key))]
    async fn get_record(&self, key: &RecordKey) -> Result<Option<MetadataRecord>> {
        let cm = self.api(key).get_opt(&key.name).await?;
        Ok(cm.map(|cm| record_from_config_map(&cm)))
    }

    #[instrument(skip(self, record), fields(record = %key, bucket = %record.bucket))]
    async fn put_record(&self, key: &RecordKey, record: &MetadataRecord) -> Result<()> {
        let cm = build_config_map(key, record);

        // Server-side apply creates the ConfigMap or converges an existing one
        self.api(key)
            .patch(
                &key.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&cm),
            )
            .await?;

        info!("Applied ConfigMap {}", key);
        Ok(())
    }

    #[instrument(skip(self), fields(record = %key))]
    async fn delete_record(&self, key: &RecordKey) -> Result<()> {
        match self.api(key).delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => info!("Deleted ConfigMap {}", key),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                warn!("ConfigMap {} not found, already deleted", key);
            }
            Err(e) => return Err(Error::KubeError(e)),
        }

        Ok(())
    }
}

fn build_config_map(key: &RecordKey, record: &MetadataRecord) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(key.name.clone()),
            namespace: Some(key.namespace.clone()),
            labels: if record.labels.is_empty() {
                None
            } else {
                Some(record.labels.clone())
            },
            owner_references: record.owner.clone().map(|owner| vec![owner]),
            ..Default::default()
        },
        data: Some(record.data()),
        ..Default::default()
    }
}

fn record_from_config_map(cm: &ConfigMap) -> MetadataRecord {
    let value = |k: &str| {
        cm.data
            .as_ref()
            .and_then(|d| d.get(k))
            .cloned()
            .unwrap_or_default()
    };

    MetadataRecord {
        bucket: value(BUCKET_KEY),
        location: value(LOCATION_KEY),
        labels: cm.metadata.labels.clone().unwrap_or_default(),
        owner: cm
            .metadata
            .owner_references
            .as_ref()
            .and_then(|refs| refs.iter().find(|r| r.controller == Some(true)).cloned()),
    }
}
