//! Reconciliation engine
//!
//! Per-kind plugin handlers built from [`ResourceOperation`] rows. A handler
//! decides what to do from the resource's state, calls the CSP plugin, records
//! the outcome as a new condition and persists it through the repository.

pub mod block_storage;
pub mod handler;
pub mod lifecycle;
pub mod operation;
pub mod workspace;

#[cfg(test)]
pub mod testing;

pub use block_storage::{block_change_sku, block_decrease_size, BlockStoragePluginHandler};
pub use handler::{GenericPluginHandler, RejectionCondition};
pub use lifecycle::{condition_for, fail, transition, RECONCILE_ERROR_REASON};
pub use operation::{
    bypass, delegate, delete_in, noop_set_state, set_state, update_in, Delegate,
    ResourceOperation, SetState,
};
pub use workspace::WorkspacePluginHandler;
