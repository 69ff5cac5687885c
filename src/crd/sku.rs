//! SKU CRDs
//!
//! Catalogue entries published per tenant by the provider. They carry no
//! status and are never reconciled.

use super::labels::{metadata_from_domain, metadata_to_domain};
use super::DomainMapping;
use crate::domain;
use crate::error::Result;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Storage SKU offered in the region
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.v1.secapi.cloud",
    version = "v1",
    kind = "StorageSku",
    plural = "storage-skus",
    printcolumn = r#"{"name": "Type", "type": "string", "jsonPath": ".spec.type"}"#,
    printcolumn = r#"{"name": "IOPS", "type": "integer", "jsonPath": ".spec.iops"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct StorageSkuSpec {
    pub iops: i64,

    /// Smallest volume size in GB
    pub min_volume_size: i64,

    /// Media type, e.g. `remote-durable` or `local-ephemeral`
    #[serde(rename = "type")]
    pub storage_type: String,
}

/// Network SKU offered in the region
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "network.v1.secapi.cloud",
    version = "v1",
    kind = "NetworkSku",
    plural = "network-skus",
    printcolumn = r#"{"name": "Bandwidth", "type": "integer", "jsonPath": ".spec.bandwidth"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSkuSpec {
    /// Mbit/s
    pub bandwidth: i64,
    /// Packets per second
    pub packets: i64,
}

impl DomainMapping for StorageSku {
    type Domain = domain::StorageSku;

    fn to_domain(&self) -> Result<domain::StorageSku> {
        Ok(domain::StorageSku {
            metadata: metadata_to_domain("StorageSku", &self.metadata)?,
            spec: domain::StorageSkuSpec {
                iops: self.spec.iops,
                min_volume_size: self.spec.min_volume_size,
                storage_type: self.spec.storage_type.clone(),
            },
        })
    }

    fn from_domain(resource: &domain::StorageSku) -> Self {
        StorageSku {
            metadata: metadata_from_domain(&resource.metadata),
            spec: StorageSkuSpec {
                iops: resource.spec.iops,
                min_volume_size: resource.spec.min_volume_size,
                storage_type: resource.spec.storage_type.clone(),
            },
        }
    }
}

impl DomainMapping for NetworkSku {
    type Domain = domain::NetworkSku;

    fn to_domain(&self) -> Result<domain::NetworkSku> {
        Ok(domain::NetworkSku {
            metadata: metadata_to_domain("NetworkSku", &self.metadata)?,
            spec: domain::NetworkSkuSpec {
                bandwidth: self.spec.bandwidth,
                packets: self.spec.packets,
            },
        })
    }

    fn from_domain(resource: &domain::NetworkSku) -> Self {
        NetworkSku {
            metadata: metadata_from_domain(&resource.metadata),
            spec: NetworkSkuSpec {
                bandwidth: resource.spec.bandwidth,
                packets: resource.spec.packets,
            },
        }
    }
}
