//! Store Custom Resource Definition
//!
//! A Store declares an object-store bucket together with the ConfigMap that
//! publishes its location to workloads in the same namespace.

use std::fmt;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Shortest bucket name accepted by S3-compatible stores
const BUCKET_NAME_MIN_LEN: usize = 3;
/// Longest bucket name accepted by S3-compatible stores
const BUCKET_NAME_MAX_LEN: usize = 63;

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cninf.uman.test",
    version = "v1",
    kind = "Store",
    namespaced,
    status = "StoreStatus",
    shortname = "st",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Bucket","type":"string","jsonPath":".status.bucket"}"#,
    printcolumn = r#"{"name":"Shared","type":"boolean","jsonPath":".spec.shared"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StoreSpec {
    /// User-chosen storage name; also the bucket name when `shared` is set
    pub name: String,

    /// Use a global bucket named after `name` instead of a namespaced one.
    /// Shared buckets are always created with object lock enabled.
    #[serde(default)]
    pub shared: bool,

    /// Enable object lock on the bucket
    #[serde(default)]
    pub locked: bool,
}

impl StoreSpec {
    /// Validate the spec before anything is provisioned
    pub fn validate(&self) -> Result<(), String> {
        validate_bucket_name(&self.name).map_err(|e| format!("spec.name: {}", e))
    }
}

/// Check a name against the S3 bucket naming rules
pub fn validate_bucket_name(name: &str) -> Result<(), String> {
    if name.len() < BUCKET_NAME_MIN_LEN || name.len() > BUCKET_NAME_MAX_LEN {
        return Err(format!(
            "'{}' must be between {} and {} characters long",
            name, BUCKET_NAME_MIN_LEN, BUCKET_NAME_MAX_LEN
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return Err(format!(
            "'{}' may only contain lowercase letters, digits, '-' and '.'",
            name
        ));
    }

    let alnum = |c: Option<char>| c.is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    if !alnum(name.chars().next()) || !alnum(name.chars().last()) {
        return Err(format!(
            "'{}' must start and end with a letter or digit",
            name
        ));
    }

    Ok(())
}

/// Lifecycle state reported in `status.state`
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoreState {
    /// Never reconciled
    #[default]
    #[serde(rename = "")]
    Empty,
    Pending,
    Creating,
    Created,
    Deleting,
    Deleted,
    Error,
}

impl StoreState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreState::Empty => "EMPTY",
            StoreState::Pending => "PENDING",
            StoreState::Creating => "CREATING",
            StoreState::Created => "CREATED",
            StoreState::Deleting => "DELETING",
            StoreState::Deleted => "DELETED",
            StoreState::Error => "ERROR",
        }
    }

    /// Whether a status write may move from `self` to `next`
    ///
    /// Rewriting the current state is always allowed so an interrupted
    /// sequence can restart its own phase. Teardown may start from anywhere.
    pub fn can_transition_to(self, next: StoreState) -> bool {
        use StoreState::*;

        if self == next {
            return true;
        }

        matches!(
            (self, next),
            (_, Deleting)
                | (Empty, Pending)
                | (Pending | Error, Creating)
                | (Creating, Created | Error)
                | (Deleting, Deleted | Error)
        )
    }
}

impl fmt::Display for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status subresource of a Store, written only by the operator
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatus {
    #[serde(default)]
    pub state: StoreState,

    /// Human-readable message about the latest transition
    #[serde(default)]
    pub message: String,

    /// Bucket backing this Store, recorded before it is created
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    /// Whether the bucket was created with object lock
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,

    /// Name of the metadata ConfigMap in the Store's namespace
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// RFC 3339 timestamp of the last state change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

/// Bucket derived from a Store's spec and namespace
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketSpec {
    pub name: String,
    pub locked: bool,
}

impl Store {
    /// Current lifecycle state; a missing status counts as EMPTY
    pub fn state(&self) -> StoreState {
        self.status
            .as_ref()
            .map(|s| s.state)
            .unwrap_or_default()
    }

    /// Derive the bucket this Store owns
    ///
    /// Shared buckets live in a global namespace and are named after the
    /// Store itself; they are always locked.
    pub fn bucket(&self) -> BucketSpec {
        if self.spec.shared {
            BucketSpec {
                name: self.spec.name.clone(),
                locked: true,
            }
        } else {
            let namespace = self.namespace().unwrap_or_else(|| "default".to_string());
            BucketSpec {
                name: format!("{}-{}", namespace, self.spec.name),
                locked: self.spec.locked,
            }
        }
    }

    /// Validate the spec and the bucket name derived from it
    pub fn validate(&self) -> Result<(), String> {
        self.spec.validate()?;
        validate_bucket_name(&self.bucket().name).map_err(|e| format!("bucket name: {}", e))
    }
}
