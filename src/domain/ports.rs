//! Domain Ports - Core trait definitions for the delegator
//!
//! These traits define the boundaries between the reconciliation engine and
//! external systems: the resource store, the CSP plugins and the handlers the
//! generic controller drives. Adapters implement them to provide concrete
//! functionality.

use crate::context::Context;
use crate::error::{PluginResult, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::block_storage::BlockStorage;
use super::model::{DomainResource, ResourceRef, Scope};
use super::workspace::Workspace;

// =============================================================================
// Resource Store Port
// =============================================================================

/// Filter and pagination for list calls
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    /// Restrict to a tenant or workspace, `None` lists every scope
    pub scope: Option<Scope>,
    /// Page size, `None` returns everything
    pub limit: Option<usize>,
    /// Token returned by the previous page
    pub skip_token: Option<String>,
    /// Label selector, e.g. `tier=gold,size>=100,env=prod-*`
    pub label_selector: Option<String>,
}

impl ListParams {
    pub fn in_scope(scope: Scope) -> Self {
        Self {
            scope: Some(scope),
            ..Default::default()
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip_token(mut self, token: impl Into<String>) -> Self {
        self.skip_token = Some(token.into());
        self
    }

    pub fn selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }
}

/// One page of list results
#[derive(Debug, Clone, PartialEq)]
pub struct ListPage<T> {
    pub items: Vec<T>,
    /// Present when more items are available
    pub next_skip_token: Option<String>,
}

impl<T> ListPage<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_skip_token: None,
        }
    }

    /// Convert every item, failing on the first error
    pub fn try_map<U, F>(self, f: F) -> Result<ListPage<U>>
    where
        F: FnMut(T) -> Result<U>,
    {
        Ok(ListPage {
            items: self.items.into_iter().map(f).collect::<Result<Vec<_>>>()?,
            next_skip_token: self.next_skip_token,
        })
    }
}

/// Typed access to the external resource store
///
/// Writes are guarded by the resource version carried in the metadata; a stale
/// version fails with `Error::Conflict`.
#[async_trait]
pub trait Repository<T: DomainResource>: Send + Sync {
    async fn list(&self, ctx: &Context, params: &ListParams) -> Result<ListPage<T>>;

    /// Fails with `Error::NotFound` when the resource does not exist
    async fn load(&self, ctx: &Context, reference: &ResourceRef) -> Result<T>;

    async fn create(&self, ctx: &Context, resource: &T) -> Result<T>;

    /// Persist the whole resource, status included
    async fn update(&self, ctx: &Context, resource: &T) -> Result<T>;

    /// Hard delete
    async fn delete(&self, ctx: &Context, resource: &T) -> Result<()>;
}

// =============================================================================
// CSP Plugin Ports
// =============================================================================

/// Provider-side provisioning of block volumes
///
/// Implementations may update kind-specific status fields but must never
/// touch the lifecycle state.
#[async_trait]
pub trait BlockStoragePlugin: Send + Sync {
    async fn create(&self, ctx: &Context, resource: &mut BlockStorage) -> PluginResult;

    /// May return `PluginError::StillProcessing` until the volume is gone
    async fn delete(&self, ctx: &Context, resource: &mut BlockStorage) -> PluginResult;

    async fn increase_size(&self, ctx: &Context, resource: &mut BlockStorage) -> PluginResult;
}

/// Provider-side provisioning of workspaces
#[async_trait]
pub trait WorkspacePlugin: Send + Sync {
    async fn create(&self, ctx: &Context, resource: &mut Workspace) -> PluginResult;

    async fn delete(&self, ctx: &Context, resource: &mut Workspace) -> PluginResult;
}

// =============================================================================
// Plugin Handler Port
// =============================================================================

/// Per-kind admission gate and reconciliation step
#[async_trait]
pub trait PluginHandler<T: DomainResource>: Send + Sync {
    /// Evaluate every rejection rule; no side effects
    async fn handle_admission(&self, ctx: &Context, resource: &T) -> Result<()>;

    /// Apply at most one transition. `Ok(true)` asks for a requeue.
    async fn handle_reconcile(&self, ctx: &Context, resource: &mut T) -> Result<bool>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type RepositoryRef<T> = Arc<dyn Repository<T>>;
pub type BlockStoragePluginRef = Arc<dyn BlockStoragePlugin>;
pub type WorkspacePluginRef = Arc<dyn WorkspacePlugin>;
pub type PluginHandlerRef<T> = Arc<dyn PluginHandler<T>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_list_params_builder() {
        let params = ListParams::in_scope(Scope::workspace("acme", "prod"))
            .limit(10)
            .skip_token("acme--prod/vol-9")
            .selector("tier=gold");
        assert_eq!(params.limit, Some(10));
        assert_eq!(params.skip_token.as_deref(), Some("acme--prod/vol-9"));
        assert_eq!(params.label_selector.as_deref(), Some("tier=gold"));
    }

    #[test]
    fn test_list_page_try_map() {
        let page = ListPage {
            items: vec![1, 2, 3],
            next_skip_token: Some("3".to_string()),
        };
        let doubled = page.clone().try_map(|n| Ok(n * 2)).unwrap();
        assert_eq!(doubled.items, vec![2, 4, 6]);
        assert_eq!(doubled.next_skip_token.as_deref(), Some("3"));

        let failed = page.try_map(|n| {
            if n == 2 {
                Err(Error::Validation("two".into()))
            } else {
                Ok(n)
            }
        });
        assert!(failed.is_err());
    }
}
