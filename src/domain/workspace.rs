//! Workspace domain model

use super::model::{DomainResource, LifecycleStatus, Metadata, ResourceState, Stateful};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Grouping of resources inside a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub metadata: Metadata,
    #[serde(default)]
    pub spec: WorkspaceSpec,
    #[serde(default)]
    pub status: Option<WorkspaceStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSpec {
    /// Free-form provider hints
    #[serde(flatten)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    #[serde(flatten)]
    pub lifecycle: LifecycleStatus,
    #[serde(default)]
    pub resource_count: Option<u32>,
}

impl Workspace {
    pub fn new(metadata: Metadata) -> Self {
        Self {
            metadata,
            spec: WorkspaceSpec::default(),
            status: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_state(mut self, state: ResourceState) -> Self {
        self.lifecycle_mut().state = Some(state);
        self
    }
}

impl DomainResource for Workspace {
    const KIND: &'static str = "Workspace";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

impl Stateful for Workspace {
    fn lifecycle(&self) -> Option<&LifecycleStatus> {
        self.status.as_ref().map(|s| &s.lifecycle)
    }

    fn lifecycle_mut(&mut self) -> &mut LifecycleStatus {
        &mut self.status.get_or_insert_with(Default::default).lifecycle
    }
}
