//! Ordered set of registered capability providers.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

use crate::provider::CapabilityProvider;

#[derive(Default)]
pub struct CapabilityRegistry {
    providers: RwLock<Vec<Arc<dyn CapabilityProvider>>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider. A provider whose identity is already registered takes
    /// over the earlier entry's slot, so registration order is unchanged.
    pub fn register(&self, provider: Arc<dyn CapabilityProvider>) {
        let mut providers = self.providers.write();
        let id = provider.id().to_string();

        match providers.iter().position(|existing| existing.id() == id) {
            Some(index) => {
                warn!(provider = %id, "Replacing previously registered provider");
                providers[index] = provider;
            }
            None => {
                info!(provider = %id, "Registering provider");
                providers.push(provider);
            }
        }
    }

    /// Snapshot of the registered providers in registration order.
    pub fn providers(&self) -> Vec<Arc<dyn CapabilityProvider>> {
        self.providers.read().clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.read().iter().map(|p| p.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }
}
