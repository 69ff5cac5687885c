//! Wiring of stores, plugins and handlers into per-kind controllers
//!
//! Plugins are injected explicitly; there is no global registry. One
//! provider supplies a [`PluginSet`], the caller supplies the
//! [`ObjectStores`], and [`ControllerSet::build`] assembles the rest.

use super::GenericController;
use crate::context::Context;
use crate::crd;
use crate::delegator::{BlockStoragePluginHandler, WorkspacePluginHandler};
use crate::domain::{self, BlockStoragePluginRef, WorkspacePluginRef};
use crate::error::Result;
use crate::manifest::Manifest;
use crate::metrics::ControllerMetrics;
use crate::store::{MappedRepository, ObjectStoreRef};
use kube::ResourceExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Plugins of one cloud service provider
#[derive(Clone)]
pub struct PluginSet {
    pub provider: String,
    pub block_storage: BlockStoragePluginRef,
    pub workspace: WorkspacePluginRef,
}

impl std::fmt::Debug for PluginSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginSet")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

/// Object stores of every reconciled kind
#[derive(Clone)]
pub struct ObjectStores {
    pub block_storage: ObjectStoreRef<crd::BlockStorage>,
    pub workspace: ObjectStoreRef<crd::Workspace>,
}

pub type BlockStorageController = GenericController<crd::BlockStorage, domain::BlockStorage>;
pub type WorkspaceController = GenericController<crd::Workspace, domain::Workspace>;

/// One controller per reconciled kind
#[derive(Debug, Clone)]
pub struct ControllerSet {
    pub block_storage: Arc<BlockStorageController>,
    pub workspace: Arc<WorkspaceController>,
}

impl ControllerSet {
    pub fn build(
        stores: ObjectStores,
        plugins: PluginSet,
        requeue_after: Duration,
        metrics: Option<ControllerMetrics>,
    ) -> Self {
        let block_storage = {
            let repo = Arc::new(MappedRepository::new(stores.block_storage.clone()));
            let handler = Arc::new(BlockStoragePluginHandler::new(repo, plugins.block_storage));
            let controller = GenericController::for_mapping(stores.block_storage, handler)
                .with_requeue_after(requeue_after);
            match &metrics {
                Some(m) => controller.with_metrics(m.clone()),
                None => controller,
            }
        };

        let workspace = {
            let repo = Arc::new(MappedRepository::new(stores.workspace.clone()));
            let handler = Arc::new(WorkspacePluginHandler::new(repo, plugins.workspace));
            let controller = GenericController::for_mapping(stores.workspace, handler)
                .with_requeue_after(requeue_after);
            match metrics {
                Some(m) => controller.with_metrics(m),
                None => controller,
            }
        };

        info!(provider = %plugins.provider, ?requeue_after, "Controllers assembled");

        Self {
            block_storage: Arc::new(block_storage),
            workspace: Arc::new(workspace),
        }
    }

    /// Store the manifest's objects, skipping those rejected by admission
    ///
    /// Returns the number of objects stored.
    pub async fn seed(&self, ctx: &Context, manifest: &Manifest) -> Result<usize> {
        let mut stored = 0;

        for obj in &manifest.workspaces {
            match self.workspace.admit(ctx, obj).await {
                Ok(()) => {
                    self.workspace.store().create(ctx, obj).await?;
                    stored += 1;
                }
                Err(err) => warn!(kind = "Workspace", name = %obj.name_any(), error = %err, "Seed rejected"),
            }
        }

        for obj in &manifest.block_storages {
            match self.block_storage.admit(ctx, obj).await {
                Ok(()) => {
                    self.block_storage.store().create(ctx, obj).await?;
                    stored += 1;
                }
                Err(err) => warn!(kind = "BlockStorage", name = %obj.name_any(), error = %err, "Seed rejected"),
            }
        }

        info!(stored, total = manifest.len(), "Manifest seeded");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegator::testing::RecordingPlugin;
    use crate::store::{MemoryObjectStore, ObjectKey};

    #[tokio::test]
    async fn test_build_wires_every_kind() {
        let plugin = Arc::new(RecordingPlugin::new());
        let stores = ObjectStores {
            block_storage: Arc::new(MemoryObjectStore::<crd::BlockStorage>::new()),
            workspace: Arc::new(MemoryObjectStore::<crd::Workspace>::new()),
        };
        let plugins = PluginSet {
            provider: "recording".to_string(),
            block_storage: plugin.clone(),
            workspace: plugin,
        };

        let set = ControllerSet::build(stores, plugins, Duration::from_secs(7), None);
        assert_eq!(set.block_storage.kind(), "BlockStorage");
        assert_eq!(set.workspace.kind(), "Workspace");
        assert_eq!(set.workspace.requeue_after(), Duration::from_secs(7));

        let missing = ObjectKey::namespaced("acme", "nothing");
        let result = set.workspace.reconcile(&Context::new(), &missing).await.unwrap();
        assert!(!result.requeue);
    }

    #[tokio::test]
    async fn test_seed_skips_rejected_objects() {
        let plugin = Arc::new(RecordingPlugin::new());
        let block_storage = Arc::new(MemoryObjectStore::<crd::BlockStorage>::new());
        let workspace = Arc::new(MemoryObjectStore::<crd::Workspace>::new());
        let set = ControllerSet::build(
            ObjectStores {
                block_storage: block_storage.clone(),
                workspace: workspace.clone(),
            },
            PluginSet {
                provider: "recording".to_string(),
                block_storage: plugin.clone(),
                workspace: plugin,
            },
            Duration::ZERO,
            None,
        );

        let manifest = Manifest::parse(
            r#"
apiVersion: workspace.v1.secapi.cloud/v1
kind: Workspace
metadata:
  name: prod
  namespace: acme
  labels:
    internal/tenant: acme
spec: {}
---
apiVersion: storage.v1.secapi.cloud/v1
kind: BlockStorage
metadata:
  name: vol-1
  namespace: acme--prod
  labels:
    internal/tenant: acme
    internal/workspace: prod
spec:
  sizeGB: 10
  skuRef: skus/rd500
---
apiVersion: storage.v1.secapi.cloud/v1
kind: BlockStorage
metadata:
  name: vol-2
  namespace: acme--prod
  labels:
    internal/tenant: acme
    internal/workspace: prod
spec:
  sizeGB: 5
  skuRef: skus/rd500
status:
  state: active
  sizeGB: 10
  skuRef: skus/rd500
"#,
        )
        .unwrap();

        let stored = set.seed(&Context::new(), &manifest).await.unwrap();
        assert_eq!(stored, 2);
        assert_eq!(workspace.len(), 1);
        assert_eq!(block_storage.keys(), vec![ObjectKey::namespaced("acme--prod", "vol-1")]);
    }
}
