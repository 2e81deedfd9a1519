//! Adaptive learning store: per-(provider, fingerprint) execution statistics.
//!
//! Each pattern keeps O(1) state. Success rate and mean duration are updated
//! with the incremental mean `m += (x - m) / n`, so no history is retained.
//! The table is loaded once through a [`PatternStorage`] backend and written
//! back after every observed batch.

pub mod storage;

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::{error::LearningStoreError, instruction::Instruction, outcome::ExecutionResult};

pub use storage::{InMemoryStorage, JsonFileStorage, PatternStorage, SledStorage};

/// Default success-rate bar a pattern must clear to be suggested.
pub const DEFAULT_SUGGESTION_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PatternKey {
    pub provider: String,
    pub fingerprint: String,
}

impl PatternKey {
    pub fn new(provider: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            fingerprint: fingerprint.into(),
        }
    }
}

/// Running statistics for one pattern key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningPattern {
    pub count: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub last_used: DateTime<Utc>,
}

impl LearningPattern {
    fn empty(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            success_rate: 0.0,
            avg_duration_ms: 0.0,
            last_used: now,
        }
    }

    /// Fold one observation into the running means.
    pub fn record(&mut self, success: bool, duration_ms: f64, now: DateTime<Utc>) {
        self.count += 1;
        self.last_used = now;
        let n = self.count as f64;
        self.avg_duration_ms += (duration_ms - self.avg_duration_ms) / n;
        let x = if success { 1.0 } else { 0.0 };
        self.success_rate += (x - self.success_rate) / n;
    }
}

pub type PatternTable = HashMap<PatternKey, LearningPattern>;

/// What `load` found in storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Nothing stored yet.
    Fresh,
    Loaded(usize),
    /// Stored state was unreadable and has been replaced by an empty table.
    Reset,
}

pub struct AdaptiveLearningStore {
    patterns: PatternTable,
    storage: Arc<dyn PatternStorage>,
    suggestion_threshold: f64,
    // Recency order of `patterns` keys; present only when capped.
    recency: Option<LruCache<PatternKey, ()>>,
}

impl AdaptiveLearningStore {
    pub fn new(storage: Box<dyn PatternStorage>) -> Self {
        Self {
            patterns: HashMap::new(),
            storage: Arc::from(storage),
            suggestion_threshold: DEFAULT_SUGGESTION_THRESHOLD,
            recency: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(InMemoryStorage::default()))
    }

    pub fn with_suggestion_threshold(mut self, threshold: f64) -> Self {
        self.suggestion_threshold = threshold;
        self
    }

    /// Cap the table size, evicting the least recently used pattern on
    /// overflow. Unbounded when never called.
    pub fn with_max_patterns(mut self, max_patterns: Option<usize>) -> Self {
        self.recency = max_patterns.and_then(NonZeroUsize::new).map(LruCache::new);
        self.rebuild_recency();
        self
    }

    /// Replace the in-memory table with the stored one. Never fails: an
    /// unreadable store is logged and treated as empty.
    #[instrument(skip(self), fields(storage = %self.storage.describe()))]
    pub fn load(&mut self) -> LoadOutcome {
        match self.storage.load() {
            Ok(table) if table.is_empty() => {
                self.replace_patterns(PatternTable::new());
                debug!("No stored learning patterns, starting fresh");
                LoadOutcome::Fresh
            }
            Ok(table) => {
                self.replace_patterns(table);
                let count = self.patterns.len();
                info!(patterns = count, "Loaded learning patterns");
                LoadOutcome::Loaded(count)
            }
            Err(e) => {
                warn!("Invalid learning data, starting fresh: {}", e);
                self.replace_patterns(PatternTable::new());
                LoadOutcome::Reset
            }
        }
    }

    fn replace_patterns(&mut self, table: PatternTable) {
        self.patterns = table;
        self.rebuild_recency();
    }

    /// Re-seed the recency order from `last_used`, oldest first, trimming
    /// the table to the cap.
    fn rebuild_recency(&mut self) {
        let Some(recency) = self.recency.as_mut() else { return };
        recency.clear();

        let mut by_age: Vec<_> = self.patterns.iter().map(|(key, p)| (p.last_used, key.clone())).collect();
        by_age.sort();
        for (_, key) in by_age {
            if let Some((evicted, _)) = recency.push(key.clone(), ()) {
                if evicted != key {
                    debug!(provider = %evicted.provider, fingerprint = %evicted.fingerprint, "Dropping learning pattern over capacity");
                    self.patterns.remove(&evicted);
                }
            }
        }
    }

    pub fn persist(&self) -> Result<(), LearningStoreError> {
        self.persist_task()()
    }

    /// A self-contained write of the current table, so the blocking storage
    /// call can run off the async executor.
    pub fn persist_task(&self) -> impl FnOnce() -> Result<(), LearningStoreError> + Send + 'static {
        let storage = Arc::clone(&self.storage);
        let table = self.patterns.clone();
        move || {
            storage.save(&table)?;
            debug!(patterns = table.len(), "Persisted learning patterns");
            Ok(())
        }
    }

    /// Record one provider result for the instruction's pattern.
    pub fn observe(&mut self, instruction: &Instruction, result: &ExecutionResult) {
        let key = PatternKey::new(result.provider.clone(), instruction.fingerprint());
        let now = Utc::now();
        let duration_ms = result.duration.as_nanos() as f64 / 1_000_000.0;

        self.patterns
            .entry(key.clone())
            .or_insert_with(|| LearningPattern::empty(now))
            .record(result.success, duration_ms, now);

        self.touch(key);
    }

    /// Mark `key` most recently used; drops the least recently used pattern
    /// when the cap is exceeded.
    fn touch(&mut self, key: PatternKey) {
        let Some(recency) = self.recency.as_mut() else { return };
        if let Some((evicted, _)) = recency.push(key.clone(), ()) {
            if evicted != key {
                debug!(provider = %evicted.provider, fingerprint = %evicted.fingerprint, "Evicting learning pattern");
                self.patterns.remove(&evicted);
            }
        }
    }

    /// Up to `top_n` hints from patterns above the success threshold, most
    /// recently used first, one per instruction fragment.
    pub fn suggestions(&self, top_n: usize) -> Vec<String> {
        let mut strong: Vec<(&PatternKey, &LearningPattern)> = self
            .patterns
            .iter()
            .filter(|(_, p)| p.success_rate > self.suggestion_threshold)
            .collect();
        strong.sort_by(|(ka, a), (kb, b)| b.last_used.cmp(&a.last_used).then_with(|| ka.cmp(kb)));

        let mut seen = std::collections::HashSet::new();
        strong
            .into_iter()
            .filter(|&(key, _)| seen.insert(key.fingerprint.as_str()))
            .take(top_n)
            .map(|(key, _)| format!("Similar to: '{}...'", key.fingerprint))
            .collect()
    }

    pub fn get(&self, key: &PatternKey) -> Option<&LearningPattern> {
        self.patterns.get(key)
    }

    pub fn patterns(&self) -> &PatternTable {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn storage_description(&self) -> String {
        self.storage.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionFault;
    use crate::provider::ProviderOutput;
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn ok(provider: &str, ms: u64) -> ExecutionResult {
        ExecutionResult::from_output(provider, ProviderOutput::success(serde_json::Value::Null), Duration::from_millis(ms))
    }

    fn failed(provider: &str, ms: u64) -> ExecutionResult {
        ExecutionResult::from_fault(provider, ExecutionFault::Failed("no".into()), Duration::from_millis(ms))
    }

    #[test]
    fn incremental_success_rate_matches_formula() {
        let mut pattern = LearningPattern {
            count: 2,
            success_rate: 0.5,
            avg_duration_ms: 10.0,
            last_used: Utc::now(),
        };
        pattern.record(true, 40.0, Utc::now());

        assert_eq!(pattern.count, 3);
        assert!((pattern.success_rate - (0.5 + (1.0 - 0.5) / 3.0)).abs() < 1e-12);
        assert!((pattern.success_rate - 0.6667).abs() < 1e-4);
        assert!((pattern.avg_duration_ms - 20.0).abs() < 1e-12);
    }

    #[test]
    fn observe_creates_and_updates_pattern() {
        let mut store = AdaptiveLearningStore::in_memory();
        let instruction = Instruction::new("List files in current directory");

        store.observe(&instruction, &ok("system", 10));
        store.observe(&instruction, &failed("system", 30));

        let key = PatternKey::new("system", "list files in current directory");
        let pattern = store.get(&key).expect("pattern exists");
        assert_eq!(pattern.count, 2);
        assert!((pattern.success_rate - 0.5).abs() < 1e-12);
        assert!((pattern.avg_duration_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn failures_are_counted_too() {
        let mut store = AdaptiveLearningStore::in_memory();
        store.observe(&Instruction::new("open gmail"), &failed("browser", 5));
        let pattern = store.get(&PatternKey::new("browser", "open gmail")).unwrap();
        assert_eq!(pattern.count, 1);
        assert_eq!(pattern.success_rate, 0.0);
    }

    #[test]
    fn count_never_decreases() {
        let mut store = AdaptiveLearningStore::in_memory();
        let instruction = Instruction::new("check disk space");
        let key = PatternKey::new("system", "check disk space");
        let mut last = 0;
        for i in 0..10 {
            let result = if i % 3 == 0 { failed("system", i) } else { ok("system", i) };
            store.observe(&instruction, &result);
            let count = store.get(&key).unwrap().count;
            assert!(count > last);
            last = count;
        }
    }

    #[test]
    fn suggestions_filter_threshold_and_order_by_recency() {
        let mut store = AdaptiveLearningStore::in_memory();
        let now = Utc::now();
        let mut insert = |fp: &str, rate: f64, age_secs: i64| {
            store.patterns.insert(
                PatternKey::new("system", fp),
                LearningPattern {
                    count: 5,
                    success_rate: rate,
                    avg_duration_ms: 1.0,
                    last_used: now - ChronoDuration::seconds(age_secs),
                },
            );
        };
        insert("old but good", 1.0, 300);
        insert("recent and good", 0.9, 10);
        insert("exactly threshold", 0.8, 1);
        insert("poor", 0.2, 0);

        assert_eq!(
            store.suggestions(5),
            vec!["Similar to: 'recent and good...'", "Similar to: 'old but good...'"]
        );
        assert_eq!(store.suggestions(1).len(), 1);
        assert!(store.suggestions(0).is_empty());
    }

    #[test]
    fn suggestions_deduplicate_fragments_across_providers() {
        let mut store = AdaptiveLearningStore::in_memory();
        let instruction = Instruction::new("open chrome and find file");
        store.observe(&instruction, &ok("system", 1));
        store.observe(&instruction, &ok("browser", 1));
        assert_eq!(store.suggestions(5), vec!["Similar to: 'open chrome and find file...'"]);
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let mut store = AdaptiveLearningStore::in_memory().with_max_patterns(Some(2));
        store.observe(&Instruction::new("first"), &ok("p", 1));
        store.observe(&Instruction::new("second"), &ok("p", 1));
        store.observe(&Instruction::new("first"), &ok("p", 1));
        store.observe(&Instruction::new("third"), &ok("p", 1));

        assert_eq!(store.len(), 2);
        assert!(store.get(&PatternKey::new("p", "second")).is_none());
        assert!(store.get(&PatternKey::new("p", "first")).is_some());
        assert!(store.get(&PatternKey::new("p", "third")).is_some());
    }

    #[test]
    fn capped_load_keeps_most_recent_patterns() {
        let now = Utc::now();
        let table: PatternTable = [("oldest", 300), ("middle", 60), ("newest", 5)]
            .into_iter()
            .map(|(fp, age_secs)| {
                let pattern = LearningPattern {
                    count: 1,
                    success_rate: 1.0,
                    avg_duration_ms: 1.0,
                    last_used: now - ChronoDuration::seconds(age_secs),
                };
                (PatternKey::new("p", fp), pattern)
            })
            .collect();
        let storage = InMemoryStorage::default();
        storage.save(&table).unwrap();

        let mut store = AdaptiveLearningStore::new(Box::new(storage)).with_max_patterns(Some(2));
        assert_eq!(store.load(), LoadOutcome::Loaded(2));
        assert!(store.get(&PatternKey::new("p", "oldest")).is_none());

        // "middle" is now least recently used.
        store.observe(&Instruction::new("fresh"), &ok("p", 1));
        assert!(store.get(&PatternKey::new("p", "middle")).is_none());
        assert!(store.get(&PatternKey::new("p", "newest")).is_some());
        assert!(store.get(&PatternKey::new("p", "fresh")).is_some());
    }

    #[test]
    fn persist_task_writes_snapshot() {
        let storage = InMemoryStorage::default();
        let mut store = AdaptiveLearningStore::new(Box::new(storage.clone()));
        store.observe(&Instruction::new("check disk space"), &ok("system", 2));

        let task = store.persist_task();
        store.observe(&Instruction::new("list files"), &ok("system", 2));
        task().unwrap();

        assert_eq!(storage.load().unwrap().len(), 1);
    }

    #[test]
    fn unbounded_by_default() {
        let mut store = AdaptiveLearningStore::in_memory();
        for i in 0..100 {
            store.observe(&Instruction::new(format!("instruction {i}")), &ok("p", 1));
        }
        assert_eq!(store.len(), 100);
    }
}
