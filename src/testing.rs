//! In-memory collaborators for driving reconciliation in tests
//!
//! Each fake keeps its state behind a mutex and can be told to fail the
//! next N calls of an operation with a transient error.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;

use crate::controller::{ObjectKey, StoreApi, StoreEvent, STORE_FINALIZER};
use crate::crd::{Store, StoreState, StoreStatus};
use crate::error::{Error, Result};
use crate::storage::{MetadataRecord, MetadataStore, ObjectStoreClient, RecordKey};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Operations that can be made to fail
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    CreateBucket,
    BucketExists,
    BucketLocation,
    DeleteBucket,
    GetRecord,
    PutRecord,
    DeleteRecord,
    PatchStatus,
    SetFinalizers,
    RecordEvent,
}

/// Scripted outcomes per operation; `None` lets a call through
#[derive(Debug, Default)]
struct Failures {
    pending: HashMap<Op, VecDeque<Option<String>>>,
}

impl Failures {
    fn push(&mut self, op: Op, successes: usize, times: usize, message: &str) {
        let queue = self.pending.entry(op).or_default();
        queue.extend(std::iter::repeat(None).take(successes));
        queue.extend(std::iter::repeat(Some(message.to_string())).take(times));
    }

    fn check(&mut self, op: Op) -> Result<()> {
        match self.pending.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(Some(message)) => Err(Error::Transient(message)),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Object store
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FakeBucket {
    pub locked: bool,
}

#[derive(Debug, Default)]
struct ObjectStoreState {
    buckets: BTreeMap<String, FakeBucket>,
    /// Polls that still report a bucket as missing
    hidden: HashMap<String, u32>,
    location: Option<String>,
    failures: Failures,
    exists_calls: usize,
    create_calls: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    state: Mutex<ObjectStoreState>,
}

impl InMemoryObjectStore {
    pub fn with_location(location: &str) -> Self {
        let store = Self::default();
        lock(&store.state).location = Some(location.to_string());
        store
    }

    pub fn fail_next(&self, op: Op, times: usize, message: &str) {
        lock(&self.state).failures.push(op, 0, times, message);
    }

    /// Report an existing bucket as missing for the next `polls` lookups
    pub fn hide_for_polls(&self, name: &str, polls: u32) {
        lock(&self.state).hidden.insert(name.to_string(), polls);
    }

    pub fn bucket(&self, name: &str) -> Option<FakeBucket> {
        lock(&self.state).buckets.get(name).cloned()
    }

    pub fn bucket_names(&self) -> Vec<String> {
        lock(&self.state).buckets.keys().cloned().collect()
    }

    pub fn insert_bucket(&self, name: &str, locked: bool) {
        lock(&self.state)
            .buckets
            .insert(name.to_string(), FakeBucket { locked });
    }

    pub fn exists_calls(&self) -> usize {
        lock(&self.state).exists_calls
    }

    pub fn create_calls(&self) -> usize {
        lock(&self.state).create_calls
    }
}

#[async_trait]
impl ObjectStoreClient for InMemoryObjectStore {
    async fn create_bucket(&self, name: &str, locked: bool) -> Result<()> {
        let mut state = lock(&self.state);
        state.create_calls += 1;
        state.failures.check(Op::CreateBucket)?;

        match state.buckets.get(name) {
            Some(existing) if existing.locked != locked => Err(Error::Conflict(format!(
                "bucket {} already exists with a different lock setting",
                name
            ))),
            Some(_) => Ok(()),
            None => {
                state
                    .buckets
                    .insert(name.to_string(), FakeBucket { locked });
                Ok(())
            }
        }
    }

    async fn bucket_exists(&self, name: &str) -> Result<bool> {
        let mut state = lock(&self.state);
        state.exists_calls += 1;
        state.failures.check(Op::BucketExists)?;

        if let Some(remaining) = state.hidden.get_mut(name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(false);
            }
        }
        Ok(state.buckets.contains_key(name))
    }

    async fn bucket_location(&self, name: &str) -> Result<Option<String>> {
        let mut state = lock(&self.state);
        state.failures.check(Op::BucketLocation)?;

        if !state.buckets.contains_key(name) {
            return Err(Error::NotFound(format!("bucket {}", name)));
        }
        Ok(state.location.clone())
    }

    async fn delete_bucket(&self, name: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.failures.check(Op::DeleteBucket)?;
        state.buckets.remove(name);
        Ok(())
    }
}

// ============================================================================
// Metadata store
// ============================================================================

#[derive(Debug, Default)]
struct MetadataState {
    records: BTreeMap<RecordKey, MetadataRecord>,
    failures: Failures,
    put_calls: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    state: Mutex<MetadataState>,
}

impl InMemoryMetadataStore {
    pub fn fail_next(&self, op: Op, times: usize, message: &str) {
        lock(&self.state).failures.push(op, 0, times, message);
    }

    pub fn record(&self, key: &RecordKey) -> Option<MetadataRecord> {
        lock(&self.state).records.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).records.len()
    }

    pub fn put_calls(&self) -> usize {
        lock(&self.state).put_calls
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn get_record(&self, key: &RecordKey) -> Result<Option<MetadataRecord>> {
        let mut state = lock(&self.state);
        state.failures.check(Op::GetRecord)?;
        Ok(state.records.get(key).cloned())
    }

    async fn put_record(&self, key: &RecordKey, record: &MetadataRecord) -> Result<()> {
        let mut state = lock(&self.state);
        state.put_calls += 1;
        state.failures.check(Op::PutRecord)?;
        state.records.insert(key.clone(), record.clone());
        Ok(())
    }

    async fn delete_record(&self, key: &RecordKey) -> Result<()> {
        let mut state = lock(&self.state);
        state.failures.check(Op::DeleteRecord)?;
        state.records.remove(key);
        Ok(())
    }
}

// ============================================================================
// Store objects
// ============================================================================

/// One persisted status write and whether our finalizer was on the object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusWrite {
    pub state: StoreState,
    pub message: String,
    pub protected: bool,
}

#[derive(Debug, Default)]
struct StoreApiState {
    objects: BTreeMap<ObjectKey, Store>,
    resource_version: u64,
    writes: Vec<StatusWrite>,
    events: Vec<StoreEvent>,
    failures: Failures,
}

impl StoreApiState {
    fn bump(&mut self, store: &mut Store) {
        self.resource_version += 1;
        store.metadata.resource_version = Some(self.resource_version.to_string());
    }
}

/// API server stand-in with resource versions and deletion semantics
///
/// Once an object marked for deletion has no finalizers left it disappears,
/// as it would in a cluster.
#[derive(Debug, Default)]
pub struct InMemoryStoreApi {
    state: Mutex<StoreApiState>,
}

impl InMemoryStoreApi {
    pub fn insert(&self, mut store: Store) -> Store {
        let mut state = lock(&self.state);
        state.bump(&mut store);
        state
            .objects
            .insert(ObjectKey::from_store(&store), store.clone());
        store
    }

    pub fn store(&self, key: &ObjectKey) -> Option<Store> {
        lock(&self.state).objects.get(key).cloned()
    }

    pub fn mark_for_deletion(&self, key: &ObjectKey) {
        let mut state = lock(&self.state);
        let mut store = match state.objects.get(key) {
            Some(store) => store.clone(),
            None => return,
        };
        store.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        state.bump(&mut store);
        if store.finalizers().is_empty() {
            state.objects.remove(key);
        } else {
            state.objects.insert(key.clone(), store);
        }
    }

    pub fn fail_next(&self, op: Op, times: usize, message: &str) {
        lock(&self.state).failures.push(op, 0, times, message);
    }

    /// Let `successes` calls of `op` through, then fail the next one
    pub fn fail_after(&self, op: Op, successes: usize, message: &str) {
        lock(&self.state).failures.push(op, successes, 1, message);
    }

    pub fn writes(&self) -> Vec<StatusWrite> {
        lock(&self.state).writes.clone()
    }

    pub fn states(&self) -> Vec<StoreState> {
        self.writes().into_iter().map(|w| w.state).collect()
    }

    pub fn events(&self) -> Vec<StoreEvent> {
        lock(&self.state).events.clone()
    }
}

#[async_trait]
impl StoreApi for InMemoryStoreApi {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Store>> {
        Ok(lock(&self.state).objects.get(key).cloned())
    }

    async fn patch_status(&self, store: &Store, status: &StoreStatus) -> Result<Store> {
        let mut state = lock(&self.state);
        state.failures.check(Op::PatchStatus)?;

        let key = ObjectKey::from_store(store);
        let mut stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("store {}", key)))?;

        stored.status = Some(status.clone());
        state.bump(&mut stored);
        state.writes.push(StatusWrite {
            state: status.state,
            message: status.message.clone(),
            protected: stored.finalizers().iter().any(|f| f == STORE_FINALIZER),
        });
        state.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn set_finalizers(&self, store: &Store, finalizers: Vec<String>) -> Result<Store> {
        let mut state = lock(&self.state);
        state.failures.check(Op::SetFinalizers)?;

        let key = ObjectKey::from_store(store);
        let mut stored = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("store {}", key)))?;

        if stored.metadata.resource_version != store.metadata.resource_version {
            return Err(Error::Conflict(format!(
                "store {} was modified; resource version {:?} is stale",
                key, store.metadata.resource_version
            )));
        }

        stored.metadata.finalizers = Some(finalizers);
        state.bump(&mut stored);

        if stored.metadata.deletion_timestamp.is_some() && stored.finalizers().is_empty() {
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, stored.clone());
        }
        Ok(stored)
    }

    async fn record_event(&self, _store: &Store, event: &StoreEvent) -> Result<()> {
        let mut state = lock(&self.state);
        state.failures.check(Op::RecordEvent)?;
        state.events.push(event.clone());
        Ok(())
    }
}
