//! Shared resource model
//!
//! Metadata, lifecycle state and condition history common to every
//! regional resource kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

// =============================================================================
// Lifecycle State
// =============================================================================

/// Provisioning state of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    Pending,
    Creating,
    Active,
    Updating,
    Deleting,
    Suspended,
    Error,
}

impl ResourceState {
    pub const ALL: [ResourceState; 7] = [
        ResourceState::Pending,
        ResourceState::Creating,
        ResourceState::Active,
        ResourceState::Updating,
        ResourceState::Deleting,
        ResourceState::Suspended,
        ResourceState::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceState::Pending => "pending",
            ResourceState::Creating => "creating",
            ResourceState::Active => "active",
            ResourceState::Updating => "updating",
            ResourceState::Deleting => "deleting",
            ResourceState::Suspended => "suspended",
            ResourceState::Error => "error",
        }
    }
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ResourceState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown resource state '{}'", s))
    }
}

// =============================================================================
// Conditions
// =============================================================================

/// One entry of a resource's transition history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCondition {
    pub state: ResourceState,
    pub reason: String,
    pub message: String,
    pub last_transition_at: DateTime<Utc>,
}

/// Observed lifecycle shared by every status type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleStatus {
    /// Absent means the engine has not looked at the resource yet
    #[serde(default)]
    pub state: Option<ResourceState>,

    /// Append-only, oldest first
    #[serde(default)]
    pub conditions: Vec<StatusCondition>,
}

impl LifecycleStatus {
    pub fn last_condition(&self) -> Option<&StatusCondition> {
        self.conditions.last()
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Identity, scope and bookkeeping of a stored resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,
    pub tenant: String,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Opaque token of the store write this object was read at
    #[serde(default)]
    pub resource_version: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_modified_at: Option<DateTime<Utc>>,
    /// Soft-delete marker
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Metadata {
    pub fn new(name: impl Into<String>, tenant: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tenant: tenant.into(),
            ..Default::default()
        }
    }

    pub fn in_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn scope(&self) -> Scope {
        Scope {
            tenant: self.tenant.clone(),
            workspace: self.workspace.clone(),
        }
    }

    pub fn reference(&self) -> ResourceRef {
        ResourceRef {
            scope: self.scope(),
            name: self.name.clone(),
        }
    }
}

/// Tenant and optional workspace a resource lives in
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub tenant: String,
    #[serde(default)]
    pub workspace: Option<String>,
}

impl Scope {
    pub fn tenant(tenant: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            workspace: None,
        }
    }

    pub fn workspace(tenant: impl Into<String>, workspace: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            workspace: Some(workspace.into()),
        }
    }
}

/// Address of a single resource inside the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub scope: Scope,
    pub name: String,
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.scope.workspace {
            Some(ws) => write!(f, "{}/{}/{}", self.scope.tenant, ws, self.name),
            None => write!(f, "{}/{}", self.scope.tenant, self.name),
        }
    }
}

/// Cross-resource reference, e.g. a SKU or source image
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    pub resource: String,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub workspace: Option<String>,
}

impl Reference {
    pub fn resource(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            ..Default::default()
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.resource)
    }
}

// =============================================================================
// Resource Traits
// =============================================================================

/// Any resource the engine can load and persist
pub trait DomainResource: Clone + Send + Sync + 'static {
    /// Kind name used in logs, errors and metrics
    const KIND: &'static str;

    fn metadata(&self) -> &Metadata;
    fn metadata_mut(&mut self) -> &mut Metadata;

    fn name(&self) -> &str {
        &self.metadata().name
    }
}

/// Resource with a lifecycle driven by the reconciliation engine
pub trait Stateful: DomainResource {
    fn lifecycle(&self) -> Option<&LifecycleStatus>;

    /// Creates the status if it is missing
    fn lifecycle_mut(&mut self) -> &mut LifecycleStatus;

    /// Current state, absent is treated as Pending
    fn current_state(&self) -> ResourceState {
        self.lifecycle()
            .and_then(|l| l.state)
            .unwrap_or(ResourceState::Pending)
    }

    /// Raw persisted state, `None` when never set
    fn raw_state(&self) -> Option<ResourceState> {
        self.lifecycle().and_then(|l| l.state)
    }

    fn conditions(&self) -> &[StatusCondition] {
        self.lifecycle()
            .map(|l| l.conditions.as_slice())
            .unwrap_or(&[])
    }

    /// State of the condition before the latest one
    fn previous_state(&self) -> Option<ResourceState> {
        let conditions = self.conditions();
        if conditions.len() < 2 {
            return None;
        }
        Some(conditions[conditions.len() - 2].state)
    }
}
