//! Per-provider execution results and the aggregated outcome of one request.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::{error::ExecutionFault, instruction::Instruction, provider::ProviderOutput};

pub const NO_MATCH_MESSAGE: &str = "No agents available to handle this instruction";

/// Metadata key carrying a persistence failure after a batch.
pub const PERSIST_WARNING_KEY: &str = "learning_persist_warning";

/// Outcome of one provider's `execute` call within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub provider: String,
    pub success: bool,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "duration_ms", with = "duration_ms")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ExecutionResult {
    pub fn from_output(provider: &str, output: ProviderOutput, duration: Duration) -> Self {
        if !output.success {
            let reason = output
                .error
                .clone()
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| "provider reported failure".to_string());
            let mut result = Self::from_fault(provider, ExecutionFault::ReportedFailure(reason), duration);
            result.payload = output.payload;
            result.metadata.extend(output.metadata);
            return result;
        }

        Self {
            provider: provider.to_string(),
            success: true,
            payload: output.payload,
            error: None,
            duration,
            metadata: output.metadata,
        }
    }

    pub fn from_fault(provider: &str, fault: ExecutionFault, duration: Duration) -> Self {
        let mut metadata = Map::new();
        metadata.insert("fault".to_string(), Value::from(fault.kind()));
        // A failed result always carries readable error text.
        let mut error = fault.to_string();
        if error.trim().is_empty() {
            error = format!("provider {}", fault.kind().replace('_', " "));
        }
        Self {
            provider: provider.to_string(),
            success: false,
            payload: Value::Null,
            error: Some(error),
            duration,
            metadata,
        }
    }
}

/// Aggregated result of one `process` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedOutcome {
    pub success: bool,
    pub instruction: String,
    pub instruction_id: uuid::Uuid,
    pub results: Vec<ExecutionResult>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl AggregatedOutcome {
    /// Outcome for a batch that ran; `results` must be in claim order.
    pub fn completed(instruction: &Instruction, results: Vec<ExecutionResult>) -> Self {
        Self {
            success: results.iter().any(|r| r.success),
            instruction: instruction.text().to_string(),
            instruction_id: instruction.id(),
            results,
            timestamp: Utc::now(),
            suggestions: None,
            message: None,
            metadata: Map::new(),
        }
    }

    /// Outcome when no provider claimed the instruction.
    pub fn no_match(instruction: &Instruction, suggestions: Vec<String>) -> Self {
        Self {
            success: false,
            instruction: instruction.text().to_string(),
            instruction_id: instruction.id(),
            results: Vec::new(),
            timestamp: Utc::now(),
            suggestions: Some(suggestions),
            message: Some(NO_MATCH_MESSAGE.to_string()),
            metadata: Map::new(),
        }
    }

    pub fn is_no_match(&self) -> bool {
        self.suggestions.is_some()
    }

    pub fn persist_warning(&self) -> Option<&str> {
        self.metadata.get(PERSIST_WARNING_KEY).and_then(Value::as_str)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_nanos() as f64 / 1_000_000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(millis.max(0.0) / 1000.0))
    }
}
