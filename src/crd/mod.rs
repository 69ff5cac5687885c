//! Custom Resource Definitions for the sovereign cloud API
//!
//! This module contains the Kubernetes representation of every kind the
//! engine reads or reconciles:
//! - BlockStorage: provisionable block volume
//! - Workspace: tenant workspace
//! - StorageSku / NetworkSku: provider catalogue entries
//!
//! Each type converts to and from its domain counterpart through
//! [`DomainMapping`].

pub mod block_storage;
pub mod labels;
pub mod sku;
pub mod workspace;

pub use block_storage::{BlockStorage, BlockStorageSpec, BlockStorageStatus};
pub use sku::{NetworkSku, NetworkSkuSpec, StorageSku, StorageSkuSpec};
pub use workspace::{Workspace, WorkspaceSpec, WorkspaceStatus};

use crate::domain::{DomainResource, LifecycleStatus, ResourceState, StatusCondition};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{CustomResourceExt, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Conversion between a custom resource and its domain model
pub trait DomainMapping:
    Resource<DynamicType = ()> + Clone + Send + Sync + std::fmt::Debug + 'static
{
    type Domain: DomainResource;

    /// Fails with `Error::Conversion` when the object cannot be represented
    fn to_domain(&self) -> Result<Self::Domain>;

    fn from_domain(resource: &Self::Domain) -> Self;
}

/// Every definition served by this crate, in install order
pub fn definitions() -> Vec<CustomResourceDefinition> {
    vec![
        Workspace::crd(),
        BlockStorage::crd(),
        StorageSku::crd(),
        NetworkSku::crd(),
    ]
}

/// Definitions as one multi-document YAML stream
pub fn render_definitions() -> Result<String> {
    let documents = definitions()
        .iter()
        .map(serde_yaml::to_string)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(documents.join("---\n"))
}

// =============================================================================
// Shared Status Types
// =============================================================================

/// Persisted lifecycle, flattened into every status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Lifecycle {
    /// Pending, Creating, Active, Updating, Deleting, Suspended or Error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Transition history, oldest first
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// One recorded state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub state: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[schemars(with = "String")]
    pub last_transition_at: DateTime<Utc>,
}

impl Lifecycle {
    pub fn to_domain(&self, kind: &str, name: &str) -> Result<LifecycleStatus> {
        let parse = |raw: &str| {
            raw.parse::<ResourceState>().map_err(|reason| Error::Conversion {
                kind: kind.to_string(),
                name: name.to_string(),
                reason,
            })
        };

        let state = self.state.as_deref().map(parse).transpose()?;
        let conditions = self
            .conditions
            .iter()
            .map(|c| {
                Ok(StatusCondition {
                    state: parse(&c.state)?,
                    reason: c.reason.clone(),
                    message: c.message.clone(),
                    last_transition_at: c.last_transition_at,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(LifecycleStatus { state, conditions })
    }

    pub fn from_domain(lifecycle: &LifecycleStatus) -> Self {
        Self {
            state: lifecycle.state.map(|s| s.to_string()),
            conditions: lifecycle
                .conditions
                .iter()
                .map(|c| Condition {
                    state: c.state.to_string(),
                    reason: c.reason.clone(),
                    message: c.message.clone(),
                    last_transition_at: c.last_transition_at,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_definitions() {
        let names: Vec<_> = definitions()
            .into_iter()
            .filter_map(|crd| crd.metadata.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "workspaces.workspace.v1.secapi.cloud",
                "block-storages.storage.v1.secapi.cloud",
                "storage-skus.storage.v1.secapi.cloud",
                "network-skus.network.v1.secapi.cloud",
            ]
        );

        let rendered = render_definitions().unwrap();
        assert_eq!(rendered.matches("kind: CustomResourceDefinition").count(), 4);
    }

    #[test]
    fn test_unknown_state_is_conversion_error() {
        let lifecycle = Lifecycle {
            state: Some("provisioned".to_string()),
            conditions: vec![],
        };
        assert_matches!(
            lifecycle.to_domain("BlockStorage", "vol-1"),
            Err(Error::Conversion { .. })
        );
    }

    #[test]
    fn test_lifecycle_mapping() {
        let now = Utc::now();
        let lifecycle = Lifecycle {
            state: Some("error".to_string()),
            conditions: vec![
                Condition {
                    state: "creating".to_string(),
                    reason: "creating".to_string(),
                    message: "Resource is being created.".to_string(),
                    last_transition_at: now,
                },
                Condition {
                    state: "error".to_string(),
                    reason: "ReconcileError".to_string(),
                    message: "quota exceeded".to_string(),
                    last_transition_at: now,
                },
            ],
        };

        let domain = lifecycle.to_domain("BlockStorage", "vol-1").unwrap();
        assert_eq!(domain.state, Some(ResourceState::Error));
        assert_eq!(domain.conditions[0].state, ResourceState::Creating);
        assert_eq!(Lifecycle::from_domain(&domain), lifecycle);
    }
}
