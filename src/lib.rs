//! Store operator: provisions object-store buckets for `Store` resources
//!
//! Each `Store` is reconciled toward a bucket plus a ConfigMap describing
//! where the bucket lives, and torn down again when the `Store` is deleted.

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod storage;

#[cfg(feature = "rest-api")]
pub mod rest_api;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::error::{Error, Result};

/// Field manager and `managed-by` label value used for every write
pub const FIELD_MANAGER: &str = "store-operator";
