//! Lifecycle decisions for a Store
//!
//! Level-triggered: the next action is always derived from what is persisted
//! on the object (status state, deletion timestamp, finalizers), never from
//! memory of earlier passes. A pass that crashed half-way is therefore
//! resumed by simply deciding again.

use crate::crd::{Store, StoreState};

use super::finalizers::has_finalizer;

/// Whether the user still wants the Store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecyclePhase {
    Active,
    /// `metadata.deletionTimestamp` is set
    PendingDeletion,
}

impl LifecyclePhase {
    pub fn of(store: &Store) -> Self {
        if store.metadata.deletion_timestamp.is_some() {
            LifecyclePhase::PendingDeletion
        } else {
            LifecyclePhase::Active
        }
    }
}

/// What a reconciliation pass should do
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Being deleted but not protected by us: nothing was provisioned
    Ignore,
    /// Run the teardown sequence, then drop the finalizer
    Teardown,
    /// Run the create sequence
    Provision {
        attach_finalizer: bool,
        /// Write PENDING before provisioning (state was EMPTY)
        initialize: bool,
    },
    /// Nothing to provision; only make sure the finalizer is in place
    Observe { attach_finalizer: bool },
}

/// Decide the next action from the persisted state of a Store
///
/// ERROR is not terminal: while active it retries provisioning, while
/// being deleted it retries teardown. CREATING seen at the start of a pass
/// means an earlier pass was interrupted, so provisioning resumes.
pub fn decide(state: StoreState, phase: LifecyclePhase, has_finalizer: bool) -> Decision {
    match phase {
        LifecyclePhase::PendingDeletion if has_finalizer => Decision::Teardown,
        LifecyclePhase::PendingDeletion => Decision::Ignore,
        LifecyclePhase::Active => {
            let attach_finalizer = !has_finalizer;
            match state {
                StoreState::Empty => Decision::Provision {
                    attach_finalizer,
                    initialize: true,
                },
                StoreState::Pending | StoreState::Creating | StoreState::Error => {
                    Decision::Provision {
                        attach_finalizer,
                        initialize: false,
                    }
                }
                StoreState::Created | StoreState::Deleting | StoreState::Deleted => {
                    Decision::Observe { attach_finalizer }
                }
            }
        }
    }
}

/// [`decide`] applied to a Store object
pub fn decide_for(store: &Store) -> Decision {
    decide(store.state(), LifecyclePhase::of(store), has_finalizer(store))
}
