//! Metadata mapping between custom resources and the domain model
//!
//! Tenant, workspace and region are persisted as `internal/*` labels so that
//! the API server can filter on them. User labels never carry that prefix.

use crate::domain::{Metadata, Scope};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use std::collections::BTreeMap;

pub const INTERNAL_PREFIX: &str = "internal/";
pub const TENANT_LABEL: &str = "internal/tenant";
pub const WORKSPACE_LABEL: &str = "internal/workspace";
pub const REGION_LABEL: &str = "internal/region";
pub const LAST_MODIFIED_ANNOTATION: &str = "internal/last-modified-at";

/// Finalizer held on every resource the engine still has to clean up
pub const CLEANUP_FINALIZER: &str = "secapi.cloud.foundation/cleanup";

/// Separator between tenant and workspace in a namespace name
const SCOPE_SEPARATOR: &str = "--";

/// Namespace holding resources of a scope: `{tenant}` or `{tenant}--{workspace}`
pub fn namespace_for(scope: &Scope) -> String {
    match &scope.workspace {
        Some(ws) => format!("{}{}{}", scope.tenant, SCOPE_SEPARATOR, ws),
        None => scope.tenant.clone(),
    }
}

pub fn is_internal(key: &str) -> bool {
    key.starts_with(INTERNAL_PREFIX)
}

fn user_entries(map: Option<&BTreeMap<String, String>>) -> BTreeMap<String, String> {
    map.into_iter()
        .flatten()
        .filter(|(k, _)| !is_internal(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Build domain metadata from an object's metadata
pub fn metadata_to_domain(kind: &str, meta: &ObjectMeta) -> Result<Metadata> {
    let name = meta.name.clone().unwrap_or_default();
    let conversion = |reason: String| Error::Conversion {
        kind: kind.to_string(),
        name: name.clone(),
        reason,
    };

    if name.is_empty() {
        return Err(conversion("metadata.name is empty".to_string()));
    }

    let labels = meta.labels.as_ref();
    let internal = |key: &str| labels.and_then(|l| l.get(key)).cloned();

    let tenant = internal(TENANT_LABEL)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| conversion(format!("missing label {}", TENANT_LABEL)))?;

    let last_modified_at = match meta
        .annotations
        .as_ref()
        .and_then(|a| a.get(LAST_MODIFIED_ANNOTATION))
    {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(raw)
                .map_err(|e| conversion(format!("bad {}: {}", LAST_MODIFIED_ANNOTATION, e)))?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    Ok(Metadata {
        name: name.clone(),
        tenant,
        workspace: internal(WORKSPACE_LABEL),
        region: internal(REGION_LABEL),
        labels: user_entries(meta.labels.as_ref()),
        annotations: user_entries(meta.annotations.as_ref()),
        resource_version: meta.resource_version.clone().unwrap_or_default(),
        created_at: meta.creation_timestamp.as_ref().map(|t| t.0),
        last_modified_at,
        deleted_at: meta.deletion_timestamp.as_ref().map(|t| t.0),
    })
}

/// Build object metadata from domain metadata
pub fn metadata_from_domain(meta: &Metadata) -> ObjectMeta {
    let mut labels = user_entries(Some(&meta.labels));
    labels.insert(TENANT_LABEL.to_string(), meta.tenant.clone());
    if let Some(ws) = &meta.workspace {
        labels.insert(WORKSPACE_LABEL.to_string(), ws.clone());
    }
    if let Some(region) = &meta.region {
        labels.insert(REGION_LABEL.to_string(), region.clone());
    }

    let mut annotations = user_entries(Some(&meta.annotations));
    if let Some(at) = meta.last_modified_at {
        annotations.insert(LAST_MODIFIED_ANNOTATION.to_string(), at.to_rfc3339());
    }

    ObjectMeta {
        name: Some(meta.name.clone()),
        namespace: Some(namespace_for(&meta.scope())),
        labels: Some(labels),
        annotations: Some(annotations),
        resource_version: Some(meta.resource_version.clone()).filter(|v| !v.is_empty()),
        creation_timestamp: meta.created_at.map(Time),
        deletion_timestamp: meta.deleted_at.map(Time),
        ..Default::default()
    }
}
