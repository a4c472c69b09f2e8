//! Finalizer handling for Store cleanup
//!
//! The finalizer keeps a Store object around until its bucket and metadata
//! record are gone:
//! 1. It is attached before any external resource is created
//! 2. It is removed only after teardown of every external resource succeeded

use kube::ResourceExt;
use tracing::info;

use crate::crd::Store;
use crate::error::Result;

use super::store_api::StoreApi;

/// Finalizer name used to protect Store resources
pub const STORE_FINALIZER: &str = "stores.cninf.uman.test/finalizer";

/// Check if the Store has our finalizer
pub fn has_finalizer(store: &Store) -> bool {
    store.finalizers().iter().any(|f| f == STORE_FINALIZER)
}

/// Add the finalizer if it is not present yet
///
/// Returns the latest copy of the Store, which must be used for any write
/// that follows.
pub async fn add_finalizer(api: &dyn StoreApi, store: Store) -> Result<Store> {
    if has_finalizer(&store) {
        return Ok(store);
    }

    let mut finalizers: Vec<String> = store.finalizers().to_vec();
    finalizers.push(STORE_FINALIZER.to_string());

    let updated = api.set_finalizers(&store, finalizers).await?;
    info!("Added finalizer to Store: {}", store.name_any());
    Ok(updated)
}

/// Remove the finalizer after cleanup is complete
///
/// Once the finalizer list is empty, Kubernetes completes the deletion of
/// the Store.
pub async fn remove_finalizer(api: &dyn StoreApi, store: &Store) -> Result<()> {
    if !has_finalizer(store) {
        return Ok(());
    }

    let finalizers: Vec<String> = store
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != STORE_FINALIZER)
        .cloned()
        .collect();

    api.set_finalizers(store, finalizers).await?;
    info!("Removed finalizer from Store: {}", store.name_any());
    Ok(())
}
