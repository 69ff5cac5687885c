//! Provider catalogue entries
//!
//! SKUs are read-only from the engine's point of view: they are published
//! per tenant and referenced by provisionable resources.

use super::model::{DomainResource, Metadata};
use serde::{Deserialize, Serialize};

/// Storage offering a volume can be provisioned from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSku {
    pub metadata: Metadata,
    pub spec: StorageSkuSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSkuSpec {
    pub iops: i64,
    /// Smallest volume in GB the SKU accepts
    pub min_volume_size: i64,
    #[serde(rename = "type")]
    pub storage_type: String,
}

impl StorageSku {
    /// Whether a volume of `size_gb` fits this SKU
    pub fn accepts_size(&self, size_gb: u32) -> bool {
        i64::from(size_gb) >= self.spec.min_volume_size
    }
}

impl DomainResource for StorageSku {
    const KIND: &'static str = "StorageSku";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/// Network offering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSku {
    pub metadata: Metadata,
    pub spec: NetworkSkuSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSkuSpec {
    /// Mbit/s
    pub bandwidth: i64,
    /// Packets per second
    pub packets: i64,
}

impl DomainResource for NetworkSku {
    const KIND: &'static str = "NetworkSku";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
