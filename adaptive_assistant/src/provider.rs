use crate::instruction::Instruction;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// A pluggable capability that can claim and execute instructions.
///
/// `can_handle` must be a pure, bounded-time check: the router calls it for
/// every registered provider on every request and assumes it cannot block.
/// `execute` may block on I/O. Returning `Err` (or panicking, or overrunning
/// the timeout) is converted into a failed result by the coordinator.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Unique identity within a registry.
    fn id(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Example instructions offered as hints when nothing matches.
    fn examples(&self) -> Vec<String> {
        Vec::new()
    }

    fn can_handle(&self, instruction: &Instruction) -> bool;

    async fn execute(&self, instruction: &Instruction) -> Result<ProviderOutput>;

    /// Upper bound for one `execute` call. `None` uses the coordinator default.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// True when the provider drives a single exclusive resource and must not
    /// run alongside other providers of the same batch.
    fn requires_exclusive(&self) -> bool {
        false
    }
}

/// What a provider hands back from a completed `execute` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutput {
    pub success: bool,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ProviderOutput {
    pub fn success(payload: Value) -> Self {
        Self {
            success: true,
            payload,
            error: None,
            metadata: Map::new(),
        }
    }

    /// A completed run that did not achieve the requested work.
    pub fn failure(payload: Value, error: impl Into<String>) -> Self {
        Self {
            success: false,
            payload,
            error: Some(error.into()),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
