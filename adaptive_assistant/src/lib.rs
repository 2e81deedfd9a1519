//! Adaptive Assistant - Core Library
//!
//! Routes free-text instructions to capability providers, runs the claims
//! under timeout and panic isolation, and learns per-provider statistics
//! that drive suggestions for unmatched input.

pub mod cli;
pub mod coordinator;
pub mod error;
pub mod instruction;
pub mod learning;
pub mod orchestrator;
pub mod outcome;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod router;
pub mod settings;
pub mod telemetry;

pub use coordinator::{CoordinatorConfig, ExecutionCoordinator, ExecutionMode};
pub use error::{ExecutionFault, LearningStoreError};
pub use instruction::{Instruction, Priority};
pub use learning::AdaptiveLearningStore;
pub use orchestrator::Orchestrator;
pub use outcome::{AggregatedOutcome, ExecutionResult};
pub use provider::{CapabilityProvider, ProviderOutput};
pub use registry::CapabilityRegistry;
pub use router::{CapabilityClaim, InstructionRouter};
pub use settings::Settings;
