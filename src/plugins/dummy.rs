//! Dummy CSP provider
//!
//! Keeps provisioned volumes and workspaces in memory. Useful for local runs
//! and for exercising the engine without a real cloud behind it.

use crate::context::Context;
use crate::domain::{BlockStorage, BlockStoragePlugin, DomainResource, Workspace, WorkspacePlugin};
use crate::error::{PluginError, PluginResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const PROVIDER_NAME: &str = "dummy";

// =============================================================================
// Configuration
// =============================================================================

/// Options of the dummy provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DummyConfig {
    /// Number of `delete` calls answered with "still processing" before the
    /// resource is actually gone
    pub delete_polls: u32,
    /// Largest volume the provider accepts
    pub max_size_gb: Option<u32>,
}

// =============================================================================
// Provider State
// =============================================================================

#[derive(Debug, Clone)]
struct Volume {
    size_gb: u32,
    sku: String,
    created_at: DateTime<Utc>,
}

/// In-memory provider implementing every plugin port
#[derive(Debug, Default)]
pub struct DummyProvider {
    config: DummyConfig,
    volumes: DashMap<String, Volume>,
    workspaces: DashMap<String, DateTime<Utc>>,
    /// Outstanding "still processing" answers per resource being deleted
    deletions: DashMap<String, u32>,
}

impl DummyProvider {
    pub fn new(config: DummyConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn volume_size_gb(&self, id: &str) -> Option<u32> {
        self.volumes.get(id).map(|v| v.size_gb)
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    pub fn has_workspace(&self, id: &str) -> bool {
        self.workspaces.contains_key(id)
    }

    fn id_of<T: DomainResource>(resource: &T) -> String {
        format!("{}/{}", T::KIND, resource.metadata().reference())
    }

    fn check_size(&self, operation: &str, size_gb: u32) -> PluginResult {
        match self.config.max_size_gb {
            Some(max) if size_gb > max => Err(PluginError::failed(
                PROVIDER_NAME,
                operation,
                format!("{} GB exceeds the provider limit of {} GB", size_gb, max),
            )),
            _ => Ok(()),
        }
    }

    /// Count down the polls of an asynchronous delete, true once it is done
    fn deletion_finished(&self, id: &str) -> bool {
        if self.config.delete_polls == 0 {
            return true;
        }
        let mut remaining = self
            .deletions
            .entry(id.to_string())
            .or_insert(self.config.delete_polls);
        if *remaining == 0 {
            drop(remaining);
            self.deletions.remove(id);
            return true;
        }
        *remaining -= 1;
        false
    }
}

#[async_trait]
impl BlockStoragePlugin for DummyProvider {
    async fn create(&self, _ctx: &Context, resource: &mut BlockStorage) -> PluginResult {
        let id = Self::id_of(resource);
        self.check_size("create", resource.spec.size_gb)?;

        let volume = Volume {
            size_gb: resource.spec.size_gb,
            sku: resource.spec.sku_ref.to_string(),
            created_at: Utc::now(),
        };
        info!(
            provider = PROVIDER_NAME,
            volume = %id,
            size_gb = volume.size_gb,
            sku = %volume.sku,
            "Volume created"
        );
        self.volumes.insert(id, volume);
        Ok(())
    }

    async fn delete(&self, _ctx: &Context, resource: &mut BlockStorage) -> PluginResult {
        let id = Self::id_of(resource);
        if !self.volumes.contains_key(&id) {
            debug!(provider = PROVIDER_NAME, volume = %id, "Volume already gone");
            return Ok(());
        }
        if !self.deletion_finished(&id) {
            debug!(provider = PROVIDER_NAME, volume = %id, "Volume deletion in progress");
            return Err(PluginError::StillProcessing);
        }

        if let Some((_, volume)) = self.volumes.remove(&id) {
            info!(
                provider = PROVIDER_NAME,
                volume = %id,
                age = %(Utc::now() - volume.created_at),
                "Volume deleted"
            );
        }
        Ok(())
    }

    async fn increase_size(&self, _ctx: &Context, resource: &mut BlockStorage) -> PluginResult {
        let id = Self::id_of(resource);
        let wanted = resource.spec.size_gb;
        self.check_size("increase_size", wanted)?;

        let mut volume = self.volumes.get_mut(&id).ok_or_else(|| PluginError::NotFound {
            provider: PROVIDER_NAME.to_string(),
            name: id.clone(),
        })?;
        if wanted < volume.size_gb {
            return Err(PluginError::failed(
                PROVIDER_NAME,
                "increase_size",
                format!("cannot shrink from {} GB to {} GB", volume.size_gb, wanted),
            ));
        }

        info!(
            provider = PROVIDER_NAME,
            volume = %id,
            from_gb = volume.size_gb,
            to_gb = wanted,
            "Volume resized"
        );
        volume.size_gb = wanted;
        Ok(())
    }
}

#[async_trait]
impl WorkspacePlugin for DummyProvider {
    async fn create(&self, _ctx: &Context, resource: &mut Workspace) -> PluginResult {
        let id = Self::id_of(resource);
        info!(provider = PROVIDER_NAME, workspace = %id, "Workspace created");
        self.workspaces.insert(id, Utc::now());
        Ok(())
    }

    async fn delete(&self, _ctx: &Context, resource: &mut Workspace) -> PluginResult {
        let id = Self::id_of(resource);
        if !self.workspaces.contains_key(&id) {
            return Ok(());
        }
        if !self.deletion_finished(&id) {
            return Err(PluginError::StillProcessing);
        }
        self.workspaces.remove(&id);
        info!(provider = PROVIDER_NAME, workspace = %id, "Workspace deleted");
        Ok(())
    }
}
