//! Custom Resource Definitions for the Store operator
//!
//! This module defines the `Store` CRD and its status types.

mod store;


pub use store::{validate_bucket_name, BucketSpec, Store, StoreSpec, StoreState, StoreStatus};
