//! Multi-document YAML manifests
//!
//! Standalone mode seeds its in-memory stores from a manifest file holding
//! `BlockStorage` and `Workspace` objects in their Kubernetes form.

use crate::crd;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Objects parsed from a manifest, in file order per kind
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    pub block_storages: Vec<crd::BlockStorage>,
    pub workspaces: Vec<crd::Workspace>,
}

impl Manifest {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read manifest {}: {}", path.display(), e))
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut manifest = Manifest::default();

        for document in serde_yaml::Deserializer::from_str(raw) {
            let value = serde_yaml::Value::deserialize(document)?;
            if value.is_null() {
                continue;
            }

            let kind = value
                .get("kind")
                .and_then(|k| k.as_str())
                .ok_or_else(|| Error::Validation("manifest document without kind".into()))?
                .to_string();

            match kind.as_str() {
                "BlockStorage" => manifest.block_storages.push(serde_yaml::from_value(value)?),
                "Workspace" => manifest.workspaces.push(serde_yaml::from_value(value)?),
                other => {
                    return Err(Error::Validation(format!(
                        "unsupported kind '{}' in manifest",
                        other
                    )))
                }
            }
        }

        Ok(manifest)
    }

    pub fn len(&self) -> usize {
        self.block_storages.len() + self.workspaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
