//! Main reconciler for Store resources
//!
//! Implements the controller pattern using kube-rs runtime. Each pass reads
//! the latest Store, asks the state machine what to do, and runs at most one
//! sequence (create or teardown). Every status write is awaited before the
//! next step so that an interrupted pass resumes from what was persisted.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Config as ControllerConfig, Controller},
        watcher::Config,
    },
    ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{BackoffConfig, BucketWaitConfig, OperatorConfig};
use crate::crd::{Store, StoreState};
use crate::error::{Error, Result};
use crate::storage::{
    wait_for_bucket, MetadataRecord, MetadataStore, ObjectStoreClient, RecordKey,
};
use crate::FIELD_MANAGER;

use super::backoff::{calculate_backoff, RetryTracker};
use super::finalizers::{add_finalizer, remove_finalizer};
use super::state_machine::{decide_for, Decision};
use super::store_api::{ObjectKey, StoreApi, StoreEvent};

#[cfg(feature = "metrics")]
const CONTROLLER_NAME: &str = "store";

/// Result of a pass that did not fail
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing left to do until the Store changes
    Done,
    /// Look at the Store again after the interval
    Requeue(Duration),
}

impl From<Outcome> for Action {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Done => Action::await_change(),
            Outcome::Requeue(after) => Action::requeue(after),
        }
    }
}

/// Drives Stores toward their declared state
///
/// Collaborators are injected so that a pass can run against fakes.
pub struct Reconciler {
    stores: Arc<dyn StoreApi>,
    object_store: Arc<dyn ObjectStoreClient>,
    metadata: Arc<dyn MetadataStore>,
    bucket_wait: BucketWaitConfig,
    resync: Duration,
}

impl Reconciler {
    pub fn new(
        stores: Arc<dyn StoreApi>,
        object_store: Arc<dyn ObjectStoreClient>,
        metadata: Arc<dyn MetadataStore>,
        config: &OperatorConfig,
    ) -> Self {
        Self {
            stores,
            object_store,
            metadata,
            bucket_wait: config.bucket_wait.clone(),
            resync: config.resync(),
        }
    }

    /// Run one reconciliation pass for a Store
    ///
    /// A Store that no longer exists is already fully torn down. Failures
    /// of a create or teardown step are recorded as ERROR on the Store and
    /// returned so the caller retries.
    #[instrument(skip(self), fields(store = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Outcome> {
        let Some(store) = self.stores.get(key).await? else {
            info!("Store {} not found. Ignoring since object must be deleted.", key);
            return Ok(Outcome::Done);
        };

        let decision = decide_for(&store);
        debug!("Store {} is {}: {:?}", key, store.state(), decision);

        match decision {
            Decision::Ignore => Ok(Outcome::Done),
            Decision::Teardown => self.teardown(store).await,
            Decision::Observe { attach_finalizer } => {
                if attach_finalizer {
                    add_finalizer(self.stores.as_ref(), store).await?;
                }
                Ok(Outcome::Requeue(self.resync))
            }
            Decision::Provision {
                attach_finalizer,
                initialize,
            } => {
                // The finalizer goes on before anything external exists
                let mut store = if attach_finalizer {
                    add_finalizer(self.stores.as_ref(), store).await?
                } else {
                    store
                };
                if initialize {
                    self.write_status(&mut store, StoreState::Pending, "Trying to create Store")
                        .await?;
                }
                self.provision(store).await
            }
        }
    }

    async fn provision(&self, mut store: Store) -> Result<Outcome> {
        match self.create_resources(&mut store).await {
            Ok(bucket) => {
                self.emit(
                    &store,
                    StoreEvent::normal("Created", format!("Bucket {} is ready", bucket)),
                )
                .await;
                Ok(Outcome::Requeue(self.resync))
            }
            Err(e) => Err(self.fail(&mut store, "ProvisioningFailed", e).await),
        }
    }

    /// Create sequence; returns the bucket name
    async fn create_resources(&self, store: &mut Store) -> Result<String> {
        // Names go out with CREATING, before anything external exists, so
        // teardown never depends on the current spec
        let validation = store.validate();
        if validation.is_ok() {
            record_target(store);
        }
        self.write_status(store, StoreState::Creating, "Creating storage")
            .await?;

        validation.map_err(Error::ValidationError)?;
        let bucket = store.bucket();
        let key = RecordKey::for_store(store);
        ensure_same_target(store, &bucket.name, &key)?;

        self.object_store
            .create_bucket(&bucket.name, bucket.locked)
            .await?;
        wait_for_bucket(self.object_store.as_ref(), &bucket.name, &self.bucket_wait).await?;

        let location = match self.object_store.bucket_location(&bucket.name).await {
            Ok(location) => location.unwrap_or_default(),
            Err(e) => {
                warn!("Could not read location of bucket {}: {}", bucket.name, e);
                String::new()
            }
        };

        let record = MetadataRecord::for_store(store, &bucket.name, location);
        self.metadata.put_record(&key, &record).await?;
        info!("Metadata record {} points at bucket {}", key, bucket.name);

        self.write_status(store, StoreState::Created, "Storage created")
            .await?;

        Ok(bucket.name)
    }

    async fn teardown(&self, mut store: Store) -> Result<Outcome> {
        if let Err(e) = self.delete_resources(&mut store).await {
            return Err(self.fail(&mut store, "TeardownFailed", e).await);
        }

        // Only now may Kubernetes forget the Store
        remove_finalizer(self.stores.as_ref(), &store).await?;
        info!("Cleanup complete for Store: {}", ObjectKey::from_store(&store));
        Ok(Outcome::Done)
    }

    /// Teardown sequence
    async fn delete_resources(&self, store: &mut Store) -> Result<()> {
        self.write_status(store, StoreState::Deleting, "Deleting storage")
            .await?;

        match provisioned_target(store) {
            None => info!(
                "Nothing was provisioned for Store {}, skipping external cleanup",
                store.name_any()
            ),
            Some((bucket, key)) => {
                if self.object_store.bucket_exists(&bucket).await? {
                    self.object_store.delete_bucket(&bucket).await?;
                } else {
                    info!("Bucket {} already absent", bucket);
                }

                if self.metadata.get_record(&key).await?.is_some() {
                    self.metadata.delete_record(&key).await?;
                } else {
                    info!("Metadata record {} already absent", key);
                }
            }
        }

        self.write_status(store, StoreState::Deleted, "Storage deleted")
            .await?;
        self.emit(store, StoreEvent::normal("Deleted", "Storage deleted"))
            .await;
        Ok(())
    }

    /// Record a failed sequence step as ERROR and hand the error back
    ///
    /// If the sequence never persisted its first state there is nothing
    /// consistent to overwrite, so the status is left as it was. A failing
    /// ERROR write is logged and the original error is still returned.
    async fn fail(&self, store: &mut Store, reason: &str, err: Error) -> Error {
        error!("{} for Store {}: {}", reason, store.name_any(), err);

        if !store.state().can_transition_to(StoreState::Error) {
            return err;
        }

        if let Err(status_err) = self
            .write_status(store, StoreState::Error, err.to_string())
            .await
        {
            error!("Failed to update Store status: {}", status_err);
            return err;
        }

        self.emit(store, StoreEvent::warning(reason, err.to_string()))
            .await;
        err
    }

    /// Persist a state transition and refresh `store` from the response
    async fn write_status(
        &self,
        store: &mut Store,
        next: StoreState,
        message: impl Into<String>,
    ) -> Result<()> {
        let current = store.state();
        if !current.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: current,
                to: next,
            });
        }

        let mut status = store.status.clone().unwrap_or_default();
        if current != next || status.last_transition_time.is_none() {
            status.last_transition_time = Some(chrono::Utc::now().to_rfc3339());
        }
        status.state = next;
        status.message = message.into();
        status.observed_generation = store.metadata.generation;

        *store = self.stores.patch_status(store, &status).await?;

        #[cfg(feature = "metrics")]
        super::metrics::inc_state_transition(next.as_str());

        info!(
            "Store {} status updated to: {} - {}",
            store.name_any(),
            next,
            status.message
        );
        Ok(())
    }

    /// Events are informational; failing to record one never fails a pass
    async fn emit(&self, store: &Store, event: StoreEvent) {
        if let Err(e) = self.stores.record_event(store, &event).await {
            warn!(
                "Failed to record {} event for Store {}: {}",
                event.reason,
                store.name_any(),
                e
            );
        }
    }
}

/// Remember the bucket and record a Store is about to provision
///
/// Names already recorded are kept: they describe what may exist.
fn record_target(store: &mut Store) {
    let bucket = store.bucket();
    let key = RecordKey::for_store(store);
    let status = store.status.get_or_insert_with(Default::default);
    status.bucket.get_or_insert(bucket.name);
    status.locked.get_or_insert(bucket.locked);
    status.record.get_or_insert(key.name);
}

/// Reject a spec that now derives different names than were provisioned
fn ensure_same_target(store: &Store, bucket: &str, key: &RecordKey) -> Result<()> {
    let status = store.status.as_ref();
    let recorded_bucket = status.and_then(|s| s.bucket.as_deref());
    let recorded_record = status.and_then(|s| s.record.as_deref());

    if recorded_bucket.is_some_and(|b| b != bucket)
        || recorded_record.is_some_and(|r| r != key.name)
    {
        return Err(Error::ValidationError(format!(
            "spec.name and spec.shared cannot change once storage is provisioned (bucket {})",
            recorded_bucket.unwrap_or_default()
        )));
    }
    Ok(())
}

/// Bucket and record recorded by the create sequence, if it ever started
fn provisioned_target(store: &Store) -> Option<(String, RecordKey)> {
    let status = store.status.as_ref()?;
    let bucket = status.bucket.clone()?;
    let key = match &status.record {
        Some(name) => RecordKey {
            namespace: store.namespace().unwrap_or_else(|| "default".to_string()),
            name: name.clone(),
        },
        None => RecordKey::for_store(store),
    };
    Some((bucket, key))
}

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub reconciler: Reconciler,
    pub retries: RetryTracker,
    pub backoff: BackoffConfig,
    /// Namespace being watched; `None` for all namespaces
    pub namespace: Option<String>,
}

/// Main entry point to start the controller
///
/// Watches Stores in the state's namespace, or cluster-wide when it is
/// `None`, until a termination signal arrives.
pub async fn run_controller(state: Arc<ControllerState>, concurrency: u16) -> Result<()> {
    let client = state.client.clone();
    let (stores, config_maps): (Api<Store>, Api<ConfigMap>) = match &state.namespace {
        Some(ns) => (
            Api::namespaced(client.clone(), ns),
            Api::namespaced(client.clone(), ns),
        ),
        None => (Api::all(client.clone()), Api::all(client.clone())),
    };

    info!("Starting Store controller");

    // Verify CRD exists
    match stores.list(&Default::default()).await {
        Ok(_) => info!("Store CRD is available"),
        Err(e) => {
            error!("Store CRD not found. Please install the CRD first: {:?}", e);
            return Err(Error::ConfigError("Store CRD not installed".to_string()));
        }
    }

    let managed_by = format!("app.kubernetes.io/managed-by={}", FIELD_MANAGER);

    Controller::new(stores, Config::default())
        // A metadata record edited or deleted behind our back triggers a pass
        .owns::<ConfigMap>(config_maps, Config::default().labels(&managed_by))
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => warn!("Reconcile error: {:?}", e),
            }
        })
        .await;

    info!("Store controller stopped");
    Ok(())
}

/// The main reconciliation function
///
/// This function is called whenever:
/// - A Store is created, updated, or deleted
/// - An owned metadata ConfigMap changes
/// - The requeue timer expires
#[instrument(skip(store, ctx), fields(name = %store.name_any(), namespace = store.namespace()))]
async fn reconcile(store: Arc<Store>, ctx: Arc<ControllerState>) -> Result<Action> {
    let key = ObjectKey::from_store(&store);
    let started = Instant::now();

    let result = ctx.reconciler.reconcile(&key).await;

    let elapsed = started.elapsed();
    debug!("Pass for {} took {:?}", key, elapsed);
    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile_duration_seconds(CONTROLLER_NAME, elapsed.as_secs_f64());

    if result.is_ok() {
        ctx.retries.reset(&key);
    }
    result.map(Action::from)
}

/// Error policy determines how to handle reconciliation errors
fn error_policy(store: Arc<Store>, error: &Error, ctx: Arc<ControllerState>) -> Action {
    let key = ObjectKey::from_store(&store);
    let delay = retry_delay(&ctx.retries, &ctx.backoff, &key, error);

    error!(
        "Reconciliation error for {} ({}): {}; retrying in {:?}",
        key,
        error.kind(),
        error,
        delay
    );
    #[cfg(feature = "metrics")]
    super::metrics::inc_reconcile_error(CONTROLLER_NAME, error.kind().as_str());

    Action::requeue(delay)
}

/// Delay before retrying a failed Store
///
/// Retriable errors back off exponentially per Store; the rest wait the
/// maximum delay since only a spec change is likely to help.
pub fn retry_delay(
    retries: &RetryTracker,
    backoff: &BackoffConfig,
    key: &ObjectKey,
    error: &Error,
) -> Duration {
    let attempt = retries.record_failure(key);
    if error.is_retriable() {
        calculate_backoff(attempt, backoff)
    } else {
        Duration::from_secs(backoff.max_secs)
    }
}
