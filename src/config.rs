//! Operator configuration
//!
//! Loaded from an optional YAML file; CLI flags override individual fields.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Operator Configuration
// =============================================================================

/// Top level configuration of the delegator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    /// Delay before a requeued resource is reconciled again, zero means asap
    pub requeue_after_secs: u64,
    /// Upper bound of a single reconcile
    pub reconcile_timeout_secs: u64,
    /// Sweep interval of the standalone driver
    pub poll_interval_secs: u64,
    /// Restrict the Kubernetes watch to one namespace
    pub namespace: Option<String>,
    /// CSP plugin selection
    pub provider: ProviderConfig,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            requeue_after_secs: 300,
            reconcile_timeout_secs: 60,
            poll_interval_secs: 5,
            namespace: None,
            provider: ProviderConfig::default(),
        }
    }
}

impl OperatorConfig {
    /// Read and validate a YAML configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_yaml(&raw)?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reconcile_timeout_secs == 0 {
            return Err(Error::Configuration(
                "reconcileTimeoutSecs must be greater than zero".into(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::Configuration(
                "pollIntervalSecs must be greater than zero".into(),
            ));
        }
        if self.provider.name.trim().is_empty() {
            return Err(Error::Configuration("provider.name must not be empty".into()));
        }
        Ok(())
    }

    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_after_secs)
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

// =============================================================================
// Provider Configuration
// =============================================================================

/// Which CSP plugins to load and their provider specific options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub name: String,
    /// Passed verbatim to the provider
    pub options: serde_yaml::Value,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "dummy".to_string(),
            options: serde_yaml::Value::Null,
        }
    }
}

impl ProviderConfig {
    /// Deserialize the options into the provider's own config type
    pub fn options<T>(&self) -> Result<T>
    where
        T: serde::de::DeserializeOwned + Default,
    {
        if self.options.is_null() {
            return Ok(T::default());
        }
        serde_yaml::from_value(self.options.clone()).map_err(|e| {
            Error::Configuration(format!("invalid options for provider {}: {}", self.name, e))
        })
    }
}
