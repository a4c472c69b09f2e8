//! Bucket operations against an object store

use async_trait::async_trait;
use tracing::debug;

use crate::config::BucketWaitConfig;
use crate::error::{Error, Result};

/// Idempotent bucket management
///
/// Implementations must treat "already exists" on create and "not found" on
/// delete as success so that a retried sequence converges.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Create a bucket, optionally with object lock enabled
    ///
    /// Creating a bucket that already exists with the same lock setting
    /// succeeds.
    async fn create_bucket(&self, name: &str, locked: bool) -> Result<()>;

    async fn bucket_exists(&self, name: &str) -> Result<bool>;

    /// Location assigned by the provider, if it reports one
    async fn bucket_location(&self, name: &str) -> Result<Option<String>>;

    /// Delete a bucket; deleting a missing bucket succeeds
    async fn delete_bucket(&self, name: &str) -> Result<()>;
}

/// Poll until a bucket is visible
///
/// Object stores may be eventually consistent, so a successful create does
/// not guarantee the bucket can be read back right away. Running out of
/// attempts is reported as a timeout, which the reconciler retries.
pub async fn wait_for_bucket(
    client: &dyn ObjectStoreClient,
    name: &str,
    config: &BucketWaitConfig,
) -> Result<()> {
    let attempts = config.max_attempts.max(1);

    for attempt in 1..=attempts {
        if client.bucket_exists(name).await? {
            debug!("Bucket {} visible after {} poll(s)", name, attempt);
            return Ok(());
        }
        if attempt < attempts {
            tokio::time::sleep(config.interval()).await;
        }
    }

    Err(Error::Timeout(format!(
        "bucket {} not visible after {} attempts",
        name, attempts
    )))
}
