//! Runs claimed providers and collects one result per claim.

use futures::future::{join_all, FutureExt};
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};

use crate::{
    error::ExecutionFault,
    instruction::Instruction,
    outcome::ExecutionResult,
    provider::CapabilityProvider,
    router::CapabilityClaim,
};

/// How providers of one batch are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One provider at a time, in claim order.
    #[default]
    Sequential,
    /// Non-exclusive providers run together; exclusive ones then run alone, one at a time.
    Concurrent,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub mode: ExecutionMode,
    pub default_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            default_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionCoordinator {
    config: CoordinatorConfig,
}

impl ExecutionCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Execute every claim and return results in claim order, one per claim.
    /// A failing, panicking or stalled provider only affects its own result.
    #[instrument(skip_all, fields(instruction_id = %instruction.id(), claims = claims.len()))]
    pub async fn execute_all(&self, instruction: &Instruction, claims: &[CapabilityClaim]) -> Vec<ExecutionResult> {
        match self.config.mode {
            ExecutionMode::Sequential => {
                let mut results = Vec::with_capacity(claims.len());
                for claim in claims {
                    results.push(self.execute_one(instruction, claim.provider()).await);
                }
                results
            }
            ExecutionMode::Concurrent => self.execute_concurrently(instruction, claims).await,
        }
    }

    async fn execute_concurrently(&self, instruction: &Instruction, claims: &[CapabilityClaim]) -> Vec<ExecutionResult> {
        let (exclusive, shared): (Vec<_>, Vec<_>) = claims
            .iter()
            .enumerate()
            .partition(|(_, claim)| claim.provider().requires_exclusive());

        // Exclusive providers run one at a time once the shared group is done.
        let shared_done = join_all(shared.iter().map(|(index, claim)| async move {
            (*index, self.execute_one(instruction, claim.provider()).await)
        }))
        .await;

        let mut exclusive_done = Vec::with_capacity(exclusive.len());
        for (index, claim) in &exclusive {
            exclusive_done.push((*index, self.execute_one(instruction, claim.provider()).await));
        }

        let mut slots: Vec<Option<ExecutionResult>> = vec![None; claims.len()];
        for (index, result) in shared_done.into_iter().chain(exclusive_done) {
            slots[index] = Some(result);
        }
        slots.into_iter().flatten().collect()
    }

    #[instrument(skip_all, fields(provider = %provider.id()))]
    async fn execute_one(&self, instruction: &Instruction, provider: &Arc<dyn CapabilityProvider>) -> ExecutionResult {
        let id = provider.id();
        let limit = provider.timeout().unwrap_or(self.config.default_timeout);
        let started = Instant::now();

        let guarded = AssertUnwindSafe(provider.execute(instruction)).catch_unwind();
        let outcome = tokio::time::timeout(limit, guarded).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(Ok(output))) => {
                let result = ExecutionResult::from_output(id, output, elapsed);
                if result.success {
                    info!(elapsed_ms = elapsed.as_millis() as u64, "Provider completed");
                } else {
                    warn!(error = ?result.error, "Provider reported failure");
                }
                result
            }
            Ok(Ok(Err(e))) => {
                error!("Provider '{}' execution failed: {:#}", id, e);
                ExecutionResult::from_fault(id, ExecutionFault::Failed(format!("{:#}", e)), elapsed)
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                error!("Provider '{}' panicked: {}", id, message);
                ExecutionResult::from_fault(id, ExecutionFault::Panicked(message), elapsed)
            }
            Err(_) => {
                error!("Provider '{}' execution timed out after {:?}", id, limit);
                ExecutionResult::from_fault(id, ExecutionFault::TimedOut(limit), elapsed)
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
