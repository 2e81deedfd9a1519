//! Top-level facade: route, execute, learn, and aggregate one instruction.

use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::{
    coordinator::ExecutionCoordinator,
    error::LearningStoreError,
    instruction::Instruction,
    learning::{AdaptiveLearningStore, InMemoryStorage, JsonFileStorage, LoadOutcome, PatternStorage, PatternTable, SledStorage},
    outcome::{AggregatedOutcome, ExecutionResult, PERSIST_WARNING_KEY},
    provider::CapabilityProvider,
    providers::ProviderFactory,
    registry::CapabilityRegistry,
    router::InstructionRouter,
    settings::{LearningBackend, LearningConfig, Settings},
};

const DEFAULT_MAX_SUGGESTIONS: usize = 5;

/// Hints offered for unmatched instructions when nothing better is known.
pub const DEFAULT_FALLBACK_SUGGESTIONS: [&str; 5] = [
    "Try: 'check if file exists in desktop'",
    "Try: 'open chrome and go to gmail'",
    "Try: 'list files in current directory'",
    "Try: 'find all python files'",
    "Try: 'show disk space'",
];

pub struct Orchestrator {
    registry: Arc<CapabilityRegistry>,
    router: InstructionRouter,
    coordinator: ExecutionCoordinator,
    // observe + persist happen under this lock so concurrent batches never
    // interleave updates to the running means.
    learning: Mutex<AdaptiveLearningStore>,
    learning_enabled: bool,
    max_suggestions: usize,
    fallback_suggestions: Vec<String>,
}

impl Orchestrator {
    /// Build an orchestrator around `store`, loading its persisted table.
    pub fn new(mut store: AdaptiveLearningStore, coordinator: ExecutionCoordinator) -> Self {
        match store.load() {
            LoadOutcome::Reset => warn!("Learning state was unreadable and has been reset"),
            outcome => debug!(?outcome, "Learning state loaded"),
        }

        let registry = Arc::new(CapabilityRegistry::new());
        Self {
            router: InstructionRouter::new(registry.clone()),
            registry,
            coordinator,
            learning: Mutex::new(store),
            learning_enabled: true,
            max_suggestions: DEFAULT_MAX_SUGGESTIONS,
            fallback_suggestions: DEFAULT_FALLBACK_SUGGESTIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Orchestrator with storage, limits and providers taken from settings.
    #[instrument(skip(settings))]
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let learning = &settings.learning;
        let store = AdaptiveLearningStore::new(Self::storage_for(learning))
            .with_suggestion_threshold(learning.suggestion_threshold)
            .with_max_patterns(learning.max_patterns);
        let storage = store.storage_description();

        let orchestrator = Self::new(store, ExecutionCoordinator::new(settings.coordinator.to_config()))
            .with_learning_enabled(learning.enabled)
            .with_max_suggestions(learning.max_suggestions)
            .with_fallback_suggestions(learning.fallback_suggestions.clone());

        for provider in ProviderFactory::create_enabled(settings)? {
            orchestrator.register_provider(provider);
        }

        info!(
            storage = %storage,
            mode = ?orchestrator.coordinator.config().mode,
            "Orchestrator initialized with {} providers: {:?}",
            orchestrator.registry.len(),
            orchestrator.list_providers()
        );
        Ok(orchestrator)
    }

    fn storage_for(learning: &LearningConfig) -> Box<dyn PatternStorage> {
        if !learning.enabled {
            return Box::new(InMemoryStorage::default());
        }
        match learning.backend {
            LearningBackend::Json => Box::new(JsonFileStorage::new(&learning.path)),
            LearningBackend::Sled => match SledStorage::open(&learning.path) {
                Ok(storage) => Box::new(storage),
                Err(e) => {
                    warn!("Falling back to in-memory learning state: {}", e);
                    Box::new(InMemoryStorage::default())
                }
            },
            LearningBackend::Memory => Box::new(InMemoryStorage::default()),
        }
    }

    pub fn with_learning_enabled(mut self, enabled: bool) -> Self {
        self.learning_enabled = enabled;
        self
    }

    pub fn with_max_suggestions(mut self, max_suggestions: usize) -> Self {
        self.max_suggestions = max_suggestions;
        self
    }

    /// Static hints appended after learned and provider-supplied suggestions.
    pub fn with_fallback_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.fallback_suggestions = suggestions;
        self
    }

    pub fn register_provider(&self, provider: Arc<dyn CapabilityProvider>) {
        self.registry.register(provider);
    }

    /// Registered provider identities in registration order.
    pub fn list_providers(&self) -> Vec<String> {
        self.registry.ids()
    }

    pub async fn process(&self, text: &str) -> AggregatedOutcome {
        self.process_instruction(Instruction::new(text)).await
    }

    #[instrument(skip_all, fields(instruction_id = %instruction.id(), priority = ?instruction.priority()))]
    pub async fn process_instruction(&self, instruction: Instruction) -> AggregatedOutcome {
        info!("Processing instruction: {}", instruction.text());

        let claims = self.router.route(&instruction);
        if claims.is_empty() {
            info!("No provider claimed the instruction");
            let suggestions = self.unmatched_suggestions().await;
            return AggregatedOutcome::no_match(&instruction, suggestions);
        }

        let results = self.coordinator.execute_all(&instruction, &claims).await;
        let mut outcome = AggregatedOutcome::completed(&instruction, results);

        if self.learning_enabled {
            if let Err(e) = self.learn(&instruction, &outcome.results).await {
                warn!("Learning state not persisted: {}", e);
                outcome
                    .metadata
                    .insert(PERSIST_WARNING_KEY.to_string(), e.to_string().into());
            }
        }

        info!(
            success = outcome.success,
            succeeded = outcome.results.iter().filter(|r| r.success).count(),
            total = outcome.results.len(),
            "Instruction processed"
        );
        outcome
    }

    async fn learn(&self, instruction: &Instruction, results: &[ExecutionResult]) -> Result<(), LearningStoreError> {
        let mut store = self.learning.lock().await;
        for result in results {
            store.observe(instruction, result);
        }
        // The lock stays held so writes reach storage in observation order.
        persist_off_executor(&store).await
    }

    async fn unmatched_suggestions(&self) -> Vec<String> {
        let learned = self.learning.lock().await.suggestions(self.max_suggestions);

        let from_providers = self
            .registry
            .providers()
            .iter()
            .flat_map(|p| p.examples())
            .map(|example| format!("Try: '{}'", example))
            .collect::<Vec<_>>();

        let mut seen = HashSet::new();
        learned
            .into_iter()
            .chain(from_providers)
            .chain(self.fallback_suggestions.iter().cloned())
            .filter(|s| seen.insert(s.clone()))
            .take(self.max_suggestions)
            .collect()
    }

    /// Learned suggestions only, most recent first.
    pub async fn suggestions(&self, top_n: usize) -> Vec<String> {
        self.learning.lock().await.suggestions(top_n)
    }

    pub async fn learning_snapshot(&self) -> PatternTable {
        self.learning.lock().await.patterns().clone()
    }

    /// Write the current table to storage.
    pub async fn flush(&self) -> Result<(), LearningStoreError> {
        let store = self.learning.lock().await;
        persist_off_executor(&store).await
    }
}

async fn persist_off_executor(store: &AdaptiveLearningStore) -> Result<(), LearningStoreError> {
    tokio::task::spawn_blocking(store.persist_task())
        .await
        .map_err(|e| LearningStoreError::Persist(format!("persist task did not complete: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderOutput;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl CapabilityProvider for Echo {
        fn id(&self) -> &str {
            "echo"
        }

        fn examples(&self) -> Vec<String> {
            vec!["echo hello".to_string()]
        }

        fn can_handle(&self, instruction: &Instruction) -> bool {
            instruction.normalized_text().starts_with("echo")
        }

        async fn execute(&self, instruction: &Instruction) -> anyhow::Result<ProviderOutput> {
            Ok(ProviderOutput::success(serde_json::json!(format!("Echo: {}", instruction.text()))))
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(AdaptiveLearningStore::in_memory(), ExecutionCoordinator::default())
    }

    #[tokio::test]
    async fn test_orchestrator_provider_registration() {
        let orchestrator = orchestrator();
        assert!(orchestrator.list_providers().is_empty());

        orchestrator.register_provider(Arc::new(Echo));
        orchestrator.register_provider(Arc::new(Echo));
        assert_eq!(orchestrator.list_providers(), vec!["echo"]);
    }

    #[tokio::test]
    async fn test_orchestrator_learns_from_batch() {
        let orchestrator = orchestrator();
        orchestrator.register_provider(Arc::new(Echo));

        let outcome = orchestrator.process("echo hello").await;
        assert!(outcome.success);
        assert_eq!(outcome.results[0].payload, serde_json::json!("Echo: echo hello"));

        let table = orchestrator.learning_snapshot().await;
        assert_eq!(table.len(), 1);
        assert_eq!(orchestrator.suggestions(5).await, vec!["Similar to: 'echo hello...'"]);
    }

    #[tokio::test]
    async fn test_no_match_uses_provider_examples_then_fallbacks() {
        let orchestrator = orchestrator()
            .with_max_suggestions(2)
            .with_fallback_suggestions(vec!["Try: 'echo hello'".into(), "Try: 'ls'".into(), "Try: 'df'".into()]);
        orchestrator.register_provider(Arc::new(Echo));

        let outcome = orchestrator.process("sing a song").await;
        assert!(!outcome.success);
        assert_eq!(outcome.suggestions.unwrap(), vec!["Try: 'echo hello'", "Try: 'ls'"]);
        assert!(orchestrator.learning_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_from_settings_registers_enabled_providers() {
        let mut settings = Settings::default();
        settings.learning.backend = LearningBackend::Memory;

        let orchestrator = Orchestrator::from_settings(&settings).unwrap();
        assert_eq!(orchestrator.list_providers(), vec!["system", "browser"]);

        settings.providers.enabled.clear();
        let bare = Orchestrator::from_settings(&settings).unwrap();
        let outcome = bare.process("list files").await;
        assert!(outcome.is_no_match());
        assert_eq!(outcome.suggestions.unwrap().len(), settings.learning.max_suggestions);
    }

    #[tokio::test]
    async fn test_bare_orchestrator_still_suggests_on_no_match() {
        let orchestrator = orchestrator();

        let outcome = orchestrator.process("xyzzy unrelated gibberish").await;

        let suggestions = outcome.suggestions.unwrap();
        assert!((1..=5).contains(&suggestions.len()));
        assert_eq!(suggestions, DEFAULT_FALLBACK_SUGGESTIONS.to_vec());
    }

    struct SlowStorage;

    impl PatternStorage for SlowStorage {
        fn load(&self) -> Result<PatternTable, LearningStoreError> {
            Ok(PatternTable::new())
        }

        fn save(&self, _patterns: &PatternTable) -> Result<(), LearningStoreError> {
            std::thread::sleep(std::time::Duration::from_millis(300));
            Ok(())
        }

        fn describe(&self) -> String {
            "slow".to_string()
        }
    }

    #[tokio::test]
    async fn test_persist_does_not_block_the_runtime() {
        let orchestrator = Orchestrator::new(AdaptiveLearningStore::new(Box::new(SlowStorage)), ExecutionCoordinator::default());
        orchestrator.register_provider(Arc::new(Echo));

        let started = std::time::Instant::now();
        let (outcome, ticked_at) = tokio::join!(orchestrator.process("echo hi"), async {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            started.elapsed()
        });

        assert!(outcome.success);
        assert!(started.elapsed() >= std::time::Duration::from_millis(300));
        assert!(ticked_at < std::time::Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_disabled_learning_records_nothing() {
        let orchestrator = orchestrator().with_learning_enabled(false);
        orchestrator.register_provider(Arc::new(Echo));
        orchestrator.process("echo hi").await;
        assert!(orchestrator.learning_snapshot().await.is_empty());
    }
}
