//! Workspace CRD

use super::labels::{metadata_from_domain, metadata_to_domain};
use super::{DomainMapping, Lifecycle};
use crate::domain;
use crate::error::Result;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Workspace groups the regional resources of a tenant
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "workspace.v1.secapi.cloud",
    version = "v1",
    kind = "Workspace",
    plural = "workspaces",
    shortname = "ws",
    status = "WorkspaceStatus",
    printcolumn = r#"{"name": "State", "type": "string", "jsonPath": ".status.state"}"#,
    printcolumn = r#"{"name": "Resources", "type": "integer", "jsonPath": ".status.resourceCount"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
pub struct WorkspaceSpec {
    /// Provider hints, passed through untouched
    #[serde(flatten)]
    pub properties: BTreeMap<String, String>,
}

/// Status of the Workspace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    #[serde(flatten)]
    pub lifecycle: Lifecycle,

    /// Number of resources living in the workspace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_count: Option<u32>,
}

impl DomainMapping for Workspace {
    type Domain = domain::Workspace;

    fn to_domain(&self) -> Result<domain::Workspace> {
        let metadata = metadata_to_domain("Workspace", &self.metadata)?;
        let status = match &self.status {
            Some(s) => Some(domain::WorkspaceStatus {
                lifecycle: s.lifecycle.to_domain("Workspace", &metadata.name)?,
                resource_count: s.resource_count,
            }),
            None => None,
        };

        Ok(domain::Workspace {
            metadata,
            spec: domain::WorkspaceSpec {
                properties: self.spec.properties.clone(),
            },
            status,
        })
    }

    fn from_domain(resource: &domain::Workspace) -> Self {
        Workspace {
            metadata: metadata_from_domain(&resource.metadata),
            spec: WorkspaceSpec {
                properties: resource.spec.properties.clone(),
            },
            status: resource.status.as_ref().map(|s| WorkspaceStatus {
                lifecycle: Lifecycle::from_domain(&s.lifecycle),
                resource_count: s.resource_count,
            }),
        }
    }
}
