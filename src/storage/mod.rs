//! External collaborators that hold the provisioned resources
//!
//! The object store owns the buckets; the metadata store publishes where a
//! bucket lives so workloads can find it.

mod http;
pub mod metadata;
pub mod object_store;

pub use http::HttpObjectStore;
pub use metadata::{ConfigMapMetadataStore, MetadataRecord, MetadataStore, RecordKey};
pub use object_store::{wait_for_bucket, ObjectStoreClient};
