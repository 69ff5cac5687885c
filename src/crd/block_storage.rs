//! BlockStorage CRD
//!
//! Kubernetes representation of a block volume. The spec is written by the
//! API gateway, the status is owned by the reconciliation engine.

use super::labels::{metadata_from_domain, metadata_to_domain};
use super::{DomainMapping, Lifecycle};
use crate::domain::{self, Reference};
use crate::error::Result;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// BlockStorage CRD
// =============================================================================

/// BlockStorage is a volume provisioned by the region's CSP plugin
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.v1.secapi.cloud",
    version = "v1",
    kind = "BlockStorage",
    plural = "block-storages",
    shortname = "bs",
    status = "BlockStorageStatus",
    printcolumn = r#"{"name": "Size", "type": "integer", "jsonPath": ".spec.sizeGB"}"#,
    printcolumn = r#"{"name": "SKU", "type": "string", "jsonPath": ".spec.skuRef"}"#,
    printcolumn = r#"{"name": "State", "type": "string", "jsonPath": ".status.state"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BlockStorageSpec {
    /// Desired size in GB
    #[serde(rename = "sizeGB")]
    pub size_gb: u32,

    /// Storage SKU the volume is provisioned from
    pub sku_ref: String,

    /// Image to populate the volume from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image_ref: Option<String>,
}

// =============================================================================
// Status
// =============================================================================

/// Status of the BlockStorage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BlockStorageStatus {
    #[serde(flatten)]
    pub lifecycle: Lifecycle,

    /// Provisioned size in GB
    #[serde(default, rename = "sizeGB")]
    pub size_gb: u32,

    /// SKU the volume was provisioned from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku_ref: Option<String>,

    /// Instance the volume is attached to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_to: Option<String>,
}

// =============================================================================
// Domain Mapping
// =============================================================================

impl DomainMapping for BlockStorage {
    type Domain = domain::BlockStorage;

    fn to_domain(&self) -> Result<domain::BlockStorage> {
        let metadata = metadata_to_domain("BlockStorage", &self.metadata)?;
        let status = self
            .status
            .as_ref()
            .map(|s| -> Result<domain::BlockStorageStatus> {
                Ok(domain::BlockStorageStatus {
                    lifecycle: s.lifecycle.to_domain("BlockStorage", &metadata.name)?,
                    size_gb: s.size_gb,
                    sku_ref: s.sku_ref.as_deref().map(Reference::resource),
                    attached_to: s.attached_to.as_deref().map(Reference::resource),
                })
            })
            .transpose()?;

        Ok(domain::BlockStorage {
            spec: domain::BlockStorageSpec {
                size_gb: self.spec.size_gb,
                sku_ref: Reference::resource(&self.spec.sku_ref),
                source_image_ref: self.spec.source_image_ref.as_deref().map(Reference::resource),
            },
            status,
            metadata,
        })
    }

    fn from_domain(resource: &domain::BlockStorage) -> Self {
        BlockStorage {
            metadata: metadata_from_domain(&resource.metadata),
            spec: BlockStorageSpec {
                size_gb: resource.spec.size_gb,
                sku_ref: resource.spec.sku_ref.resource.clone(),
                source_image_ref: resource
                    .spec
                    .source_image_ref
                    .as_ref()
                    .map(|r| r.resource.clone()),
            },
            status: resource.status.as_ref().map(|s| BlockStorageStatus {
                lifecycle: Lifecycle::from_domain(&s.lifecycle),
                size_gb: s.size_gb,
                sku_ref: s.sku_ref.as_ref().map(|r| r.resource.clone()),
                attached_to: s.attached_to.as_ref().map(|r| r.resource.clone()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::labels::TENANT_LABEL;
    use crate::domain::{Metadata, ResourceState, Stateful};
    use kube::ResourceExt;

    #[test]
    fn test_domain_mapping_preserves_state() {
        let mut vol = domain::BlockStorage::new(
            Metadata::new("vol-1", "acme").in_workspace("prod"),
            domain::BlockStorageSpec {
                size_gb: 20,
                sku_ref: Reference::resource("skus/rd500"),
                source_image_ref: None,
            },
        )
        .with_state(ResourceState::Active);
        vol.mirror_spec();

        let cr = BlockStorage::from_domain(&vol);
        assert_eq!(cr.namespace().as_deref(), Some("acme--prod"));
        assert_eq!(cr.labels().get(TENANT_LABEL).map(String::as_str), Some("acme"));
        assert_eq!(cr.status.as_ref().unwrap().lifecycle.state.as_deref(), Some("active"));

        let back = cr.to_domain().unwrap();
        assert_eq!(back, vol);
        assert_eq!(back.current_state(), ResourceState::Active);
    }

    #[test]
    fn test_status_json_shape() {
        let status = BlockStorageStatus {
            lifecycle: Lifecycle {
                state: Some("creating".to_string()),
                conditions: vec![],
            },
            size_gb: 0,
            sku_ref: None,
            attached_to: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "creating");
        assert_eq!(json["sizeGB"], 0);
        assert!(json.get("skuRef").is_none());
    }
}
