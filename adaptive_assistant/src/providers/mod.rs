//! Built-in capability providers.

pub mod browser;
pub mod system;

use anyhow::{anyhow, Result};
use std::sync::Arc;

use crate::{provider::CapabilityProvider, settings::Settings};

pub use browser::{BrowserAction, BrowserDriver, BrowserProvider, SystemOpenerDriver};
pub use system::{PlannedCommand, SystemCommandProvider};

/// Provider factory for creating providers by kind
pub struct ProviderFactory;

impl ProviderFactory {
    pub fn create(kind: &str, settings: &Settings) -> Result<Arc<dyn CapabilityProvider>> {
        match kind {
            "system" => Ok(Arc::new(SystemCommandProvider::new(&settings.providers.system))),
            "browser" => Ok(Arc::new(BrowserProvider::with_system_opener(&settings.providers.browser))),
            _ => Err(anyhow!("Unknown provider kind: {}", kind)),
        }
    }

    /// Every provider listed in `providers.enabled`, in that order.
    pub fn create_enabled(settings: &Settings) -> Result<Vec<Arc<dyn CapabilityProvider>>> {
        settings
            .providers
            .enabled
            .iter()
            .map(|kind| Self::create(kind, settings))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_enabled_providers_in_order() {
        let mut settings = Settings::default();
        settings.providers.enabled = vec!["browser".to_string(), "system".to_string()];
        let providers = ProviderFactory::create_enabled(&settings).unwrap();
        let ids: Vec<_> = providers.iter().map(|p| p.id().to_string()).collect();
        assert_eq!(ids, vec!["browser", "system"]);
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(ProviderFactory::create("teleporter", &Settings::default()).is_err());
    }
}
