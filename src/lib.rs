//! Cloud Delegator - Sovereign Cloud Reconciliation Engine
//!
//! Drives regional cloud resources (block storage volumes, workspaces) from
//! their desired state to provisioned state by delegating to a cloud service
//! provider (CSP) plugin and recording every transition on the resource.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │          Scheduler (kube-runtime Controller / polling driver)          │
//! └───────────────────────────────┬──────────────────────────────────────┘
//!                                 │ ObjectKey
//! ┌───────────────────────────────┴──────────────────────────────────────┐
//! │  GenericController: fetch ─▶ convert ─▶ handle_reconcile ─▶ requeue    │
//! └───────────────────────────────┬──────────────────────────────────────┘
//!                                 │ domain resource
//! ┌───────────────────────────────┴──────────────────────────────────────┐
//! │  Plugin handler: admission rules + ordered transition table            │
//! │      ResourceOperation: condition ─▶ delegate ─▶ propagate ─▶ persist  │
//! └─────────────┬────────────────────────────────────────┬───────────────┘
//!               │                                        │
//!   ┌───────────┴───────────┐                ┌───────────┴───────────┐
//!   │  CSP plugin (dummy)   │                │  Repository ─▶ store  │
//!   └───────────────────────┘                │  (kube / in-memory)   │
//!                                            └───────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`domain`]: Resource model, lifecycle states and ports
//! - [`delegator`]: Operation composition and per-kind plugin handlers
//! - [`controller`]: Generic controller, drivers and wiring
//! - [`store`]: Object store adapters and the domain repository
//! - [`crd`]: Kubernetes representation of every kind
//! - [`plugins`]: CSP provider plugins
//! - [`error`]: Error types and handling

pub mod config;
pub mod context;
pub mod controller;
pub mod crd;
pub mod delegator;
pub mod domain;
pub mod error;
pub mod manifest;
pub mod metrics;
pub mod plugins;
pub mod store;

// Re-export commonly used types
pub use config::{OperatorConfig, ProviderConfig};
pub use context::Context;
pub use controller::{
    ControllerSet, GenericController, KubeDriver, ObjectStores, PluginSet, PollingDriver,
    ReconcileResult,
};
pub use delegator::{BlockStoragePluginHandler, GenericPluginHandler, ResourceOperation, WorkspacePluginHandler};
pub use domain::{
    BlockStorage, BlockStoragePlugin, PluginHandler, Repository, ResourceState, Stateful,
    Workspace, WorkspacePlugin,
};
pub use error::{Error, ErrorAction, PluginError, PluginResult, Result};
pub use manifest::Manifest;
pub use metrics::ControllerMetrics;
pub use plugins::ProviderFactory;
pub use store::{KubeObjectStore, MappedRepository, MemoryObjectStore, ObjectKey, ObjectStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
