//! External object store
//!
//! The engine never persists anything itself. Every read and write goes
//! through an [`ObjectStore`] holding the external representation of a
//! resource (a Kubernetes custom resource), and [`MappedRepository`] turns
//! that into the typed domain [`Repository`](crate::domain::Repository).
//!
//! Adapters:
//! - [`KubeObjectStore`]: Kubernetes API server
//! - [`MemoryObjectStore`]: in-process, used by standalone mode and tests

pub mod kubernetes;
pub mod memory;
pub mod repository;
pub mod selector;

pub use kubernetes::KubeObjectStore;
pub use memory::MemoryObjectStore;
pub use repository::MappedRepository;
pub use selector::Selector;

use crate::context::Context;
use crate::crd::Condition;
use crate::error::{Error, Result};
use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use std::sync::Arc;

// =============================================================================
// Object Addressing
// =============================================================================

/// Namespace and name of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn of<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace(),
            name: obj.name_any(),
        }
    }

    /// Inverse of `Display`, used for skip tokens
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('/') {
            Some((ns, name)) => Self::namespaced(ns, name),
            None => Self::cluster(raw),
        }
    }
}

impl std::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Filter and pagination for [`ObjectStore::list`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// `None` lists across all namespaces
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
    pub limit: Option<usize>,
    pub continue_token: Option<String>,
}

/// A page of stored objects
#[derive(Debug, Clone)]
pub struct ObjectList<K> {
    pub items: Vec<K>,
    pub continue_token: Option<String>,
}

// =============================================================================
// Object Store Port
// =============================================================================

/// Versioned store of external objects
///
/// `replace` persists metadata, spec and status in one call and fails with
/// `Error::Conflict` if the object's resource version is stale or missing.
/// `delete` fails the same way when the expected version is not the stored
/// one.
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Clone + Send + Sync + 'static,
{
    async fn get(&self, ctx: &Context, key: &ObjectKey) -> Result<K>;

    async fn list(&self, ctx: &Context, opts: &ListOptions) -> Result<ObjectList<K>>;

    async fn create(&self, ctx: &Context, obj: &K) -> Result<K>;

    async fn replace(&self, ctx: &Context, obj: &K) -> Result<K>;

    /// Remove the object for good
    ///
    /// `resource_version` is the version the caller last read, `None` skips
    /// the check.
    async fn delete(&self, ctx: &Context, key: &ObjectKey, resource_version: Option<&str>) -> Result<()>;

    /// Append `condition` to the raw `status.conditions` of the object
    ///
    /// Works on objects that cannot be converted to their domain model.
    /// Returns false without writing when the last recorded condition is
    /// already the same one.
    async fn record_condition(&self, ctx: &Context, key: &ObjectKey, condition: &Condition) -> Result<bool>;
}

pub type ObjectStoreRef<K> = Arc<dyn ObjectStore<K>>;

/// `status.conditions` of `obj` with `condition` appended, `None` when the
/// last condition already matches it
fn conditions_with<K: Serialize>(obj: &K, condition: &Condition) -> Result<Option<serde_json::Value>> {
    let mut conditions: Vec<Condition> = match serde_json::to_value(obj)?.pointer("/status/conditions") {
        Some(raw) if !raw.is_null() => serde_json::from_value(raw.clone())?,
        _ => Vec::new(),
    };

    let repeated = conditions.last().is_some_and(|last| {
        last.state == condition.state && last.reason == condition.reason && last.message == condition.message
    });
    if repeated {
        return Ok(None);
    }

    conditions.push(condition.clone());
    Ok(Some(serde_json::to_value(conditions)?))
}

fn stale_version(kind: &str, key: &ObjectKey, expected: &str, head: Option<&str>) -> Error {
    Error::Conflict {
        kind: kind.to_string(),
        name: key.to_string(),
        reason: format!(
            "resourceVersion {} is stale, current is {}",
            expected,
            head.unwrap_or_default()
        ),
    }
}
