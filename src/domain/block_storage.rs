//! Block storage domain model

use super::model::{
    DomainResource, LifecycleStatus, Metadata, Reference, ResourceState, Stateful,
};
use serde::{Deserialize, Serialize};

/// A block volume in a tenant workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockStorage {
    pub metadata: Metadata,
    pub spec: BlockStorageSpec,
    #[serde(default)]
    pub status: Option<BlockStorageStatus>,
}

/// Desired state of a volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockStorageSpec {
    pub size_gb: u32,
    pub sku_ref: Reference,
    #[serde(default)]
    pub source_image_ref: Option<Reference>,
}

/// Observed state of a volume
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockStorageStatus {
    #[serde(flatten)]
    pub lifecycle: LifecycleStatus,
    #[serde(default)]
    pub size_gb: u32,
    #[serde(default)]
    pub sku_ref: Option<Reference>,
    #[serde(default)]
    pub attached_to: Option<Reference>,
}

impl BlockStorage {
    pub fn new(metadata: Metadata, spec: BlockStorageSpec) -> Self {
        Self {
            metadata,
            spec,
            status: None,
        }
    }

    /// Provisioned size, zero before the first successful create
    pub fn observed_size_gb(&self) -> u32 {
        self.status.as_ref().map(|s| s.size_gb).unwrap_or(0)
    }

    /// Desired size exceeds what the provider has provisioned
    pub fn needs_resize(&self) -> bool {
        self.spec.size_gb > self.observed_size_gb()
    }

    /// Record the provisioned spec in the status
    pub fn mirror_spec(&mut self) {
        let status = self.status.get_or_insert_with(Default::default);
        status.size_gb = self.spec.size_gb;
        status.sku_ref = Some(self.spec.sku_ref.clone());
    }

    pub fn with_state(mut self, state: ResourceState) -> Self {
        self.lifecycle_mut().state = Some(state);
        self
    }
}

impl DomainResource for BlockStorage {
    const KIND: &'static str = "BlockStorage";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

impl Stateful for BlockStorage {
    fn lifecycle(&self) -> Option<&LifecycleStatus> {
        self.status.as_ref().map(|s| &s.lifecycle)
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleStatus {
        &mut self.status.get_or_insert_with(Default::default).lifecycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume(size_gb: u32) -> BlockStorage {
        BlockStorage::new(
            Metadata::new("vol-1", "acme").in_workspace("prod"),
            BlockStorageSpec {
                size_gb,
                sku_ref: Reference::resource("skus/rd500"),
                source_image_ref: None,
            },
        )
    }

    #[test]
    fn test_absent_status_is_pending() {
        let vol = volume(10);
        assert_eq!(vol.current_state(), ResourceState::Pending);
        assert_eq!(vol.raw_state(), None);
        assert_eq!(vol.observed_size_gb(), 0);
        assert!(vol.needs_resize());
    }

    #[test]
    fn test_mirror_spec() {
        let mut vol = volume(20).with_state(ResourceState::Creating);
        vol.mirror_spec();
        let status = vol.status.as_ref().unwrap();
        assert_eq!(status.size_gb, 20);
        assert_eq!(status.sku_ref, Some(Reference::resource("skus/rd500")));
        assert!(!vol.needs_resize());
    }
}
