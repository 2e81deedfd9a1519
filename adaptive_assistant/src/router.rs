//! Capability filtering of registered providers.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::{instruction::Instruction, provider::CapabilityProvider, registry::CapabilityRegistry};

/// A provider's positive answer to `can_handle` for one instruction.
#[derive(Clone)]
pub struct CapabilityClaim {
    provider: Arc<dyn CapabilityProvider>,
}

impl CapabilityClaim {
    pub fn new(provider: Arc<dyn CapabilityProvider>) -> Self {
        Self { provider }
    }

    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    pub fn provider(&self) -> &Arc<dyn CapabilityProvider> {
        &self.provider
    }
}

impl fmt::Debug for CapabilityClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityClaim")
            .field("provider", &self.provider.id())
            .finish()
    }
}

pub struct InstructionRouter {
    registry: Arc<CapabilityRegistry>,
}

impl InstructionRouter {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    /// Claims from every provider whose predicate accepts the instruction,
    /// in registration order. An empty result is a valid "no match".
    #[instrument(skip_all, fields(instruction_id = %instruction.id()))]
    pub fn route(&self, instruction: &Instruction) -> Vec<CapabilityClaim> {
        let claims: Vec<CapabilityClaim> = self
            .registry
            .providers()
            .into_iter()
            .filter(|provider| provider.can_handle(instruction))
            .map(CapabilityClaim::new)
            .collect();

        debug!(
            claims = claims.len(),
            providers = ?claims.iter().map(|c| c.provider_id()).collect::<Vec<_>>(),
            "Routed instruction"
        );
        claims
    }
}
