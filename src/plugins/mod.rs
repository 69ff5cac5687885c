//! CSP provider plugins
//!
//! Each provider implements the plugin ports of [`crate::domain`]. The
//! factory turns a [`ProviderConfig`] into the [`PluginSet`] the controllers
//! are built from.

pub mod dummy;

pub use dummy::{DummyConfig, DummyProvider};

use crate::config::ProviderConfig;
use crate::controller::PluginSet;
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::info;

/// Factory for provider plugin sets
pub struct ProviderFactory;

impl ProviderFactory {
    /// Names accepted by [`ProviderFactory::create`]
    pub const PROVIDERS: &'static [&'static str] = &[dummy::PROVIDER_NAME];

    /// Instantiate the provider selected by `config`
    pub fn create(config: &ProviderConfig) -> Result<PluginSet> {
        match config.name.to_lowercase().as_str() {
            dummy::PROVIDER_NAME => {
                let options: DummyConfig = config.options()?;
                info!(provider = dummy::PROVIDER_NAME, ?options, "Loading provider");
                let provider = Arc::new(DummyProvider::new(options));
                Ok(PluginSet {
                    provider: dummy::PROVIDER_NAME.to_string(),
                    block_storage: provider.clone(),
                    workspace: provider,
                })
            }
            other => Err(Error::Configuration(format!(
                "unknown provider '{}', expected one of: {}",
                other,
                Self::PROVIDERS.join(", ")
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_create_dummy() {
        let set = ProviderFactory::create(&ProviderConfig::default()).unwrap();
        assert_eq!(set.provider, "dummy");
    }

    #[test]
    fn test_provider_name_is_case_insensitive() {
        let config = ProviderConfig {
            name: "Dummy".to_string(),
            ..Default::default()
        };
        assert!(ProviderFactory::create(&config).is_ok());
    }

    #[test]
    fn test_unknown_provider() {
        let config = ProviderConfig {
            name: "aruba".to_string(),
            ..Default::default()
        };
        assert_matches!(
            ProviderFactory::create(&config),
            Err(Error::Configuration(msg)) if msg.contains("aruba")
        );
    }

    #[test]
    fn test_bad_options() {
        let config = ProviderConfig {
            name: "dummy".to_string(),
            options: serde_yaml::from_str("deletePolls: many").unwrap(),
        };
        assert_matches!(ProviderFactory::create(&config), Err(Error::Configuration(_)));
    }
}
