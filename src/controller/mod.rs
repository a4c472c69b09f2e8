//! Controller module for Store reconciliation
//! This module contains the main controller loop, the lifecycle state
//! machine, and the finalizer protocol for Stores.

mod backoff;
mod finalizers;
#[cfg(feature = "metrics")]
pub mod metrics;
mod reconciler;
pub mod state_machine;
mod store_api;

pub use backoff::{calculate_backoff, RetryTracker};
pub use finalizers::{has_finalizer, STORE_FINALIZER};
pub use reconciler::{retry_delay, run_controller, ControllerState, Outcome, Reconciler};
pub use state_machine::{decide, Decision, LifecyclePhase};
pub use store_api::{EventType, KubeStoreApi, ObjectKey, StoreApi, StoreEvent};
