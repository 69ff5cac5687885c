//! Domain layer - Resource model and port definitions
//!
//! This module defines the regional resource kinds the engine reconciles and
//! the traits (ports) that store and plugin adapters implement, following
//! hexagonal architecture principles.

pub mod block_storage;
pub mod catalog;
pub mod model;
pub mod ports;
pub mod workspace;

pub use block_storage::{BlockStorage, BlockStorageSpec, BlockStorageStatus};
pub use catalog::{NetworkSku, NetworkSkuSpec, StorageSku, StorageSkuSpec};
pub use model::*;
pub use ports::*;
pub use workspace::{Workspace, WorkspaceSpec, WorkspaceStatus};
