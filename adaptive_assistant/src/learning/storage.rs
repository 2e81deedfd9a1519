//! Durable backends for the learning table.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::{LearningPattern, PatternKey, PatternTable};
use crate::error::LearningStoreError;

const JSON_FORMAT_VERSION: u32 = 1;
const SLED_KEY_SEPARATOR: u8 = 0x1f;

/// Round-trips the whole pattern table.
pub trait PatternStorage: Send + Sync {
    /// Read the stored table. Absent state is an empty table, not an error.
    fn load(&self) -> Result<PatternTable, LearningStoreError>;

    fn save(&self, patterns: &PatternTable) -> Result<(), LearningStoreError>;

    fn describe(&self) -> String;
}

/// Volatile storage, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    table: Arc<Mutex<PatternTable>>,
}

impl PatternStorage for InMemoryStorage {
    fn load(&self) -> Result<PatternTable, LearningStoreError> {
        Ok(self.table.lock().clone())
    }

    fn save(&self, patterns: &PatternTable) -> Result<(), LearningStoreError> {
        *self.table.lock() = patterns.clone();
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PatternDocument {
    version: u32,
    patterns: Vec<PatternRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PatternRecord {
    provider: String,
    fingerprint: String,
    count: u64,
    success_rate: f64,
    avg_duration_ms: f64,
    last_used: chrono::DateTime<chrono::Utc>,
}

/// Pretty-printed JSON document, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn corrupt(&self, reason: impl ToString) -> LearningStoreError {
        LearningStoreError::Corrupt {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

impl PatternStorage for JsonFileStorage {
    fn load(&self) -> Result<PatternTable, LearningStoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "Learning file not found");
                return Ok(PatternTable::new());
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => return Err(self.corrupt(e)),
            Err(e) => return Err(e.into()),
        };

        if raw.trim().is_empty() {
            return Ok(PatternTable::new());
        }

        let document: PatternDocument = serde_json::from_str(&raw).map_err(|e| self.corrupt(e))?;
        if document.version != JSON_FORMAT_VERSION {
            return Err(self.corrupt(format!("unsupported format version {}", document.version)));
        }

        let mut table = PatternTable::with_capacity(document.patterns.len());
        for record in document.patterns {
            let key = PatternKey::new(record.provider, record.fingerprint);
            let pattern = LearningPattern {
                count: record.count,
                success_rate: record.success_rate,
                avg_duration_ms: record.avg_duration_ms,
                last_used: record.last_used,
            };
            if table.insert(key.clone(), pattern).is_some() {
                return Err(self.corrupt(format!("duplicate pattern {}/{}", key.provider, key.fingerprint)));
            }
        }
        Ok(table)
    }

    fn save(&self, patterns: &PatternTable) -> Result<(), LearningStoreError> {
        let mut records: Vec<PatternRecord> = patterns
            .iter()
            .map(|(key, p)| PatternRecord {
                provider: key.provider.clone(),
                fingerprint: key.fingerprint.clone(),
                count: p.count,
                success_rate: p.success_rate,
                avg_duration_ms: p.avg_duration_ms,
                last_used: p.last_used,
            })
            .collect();
        records.sort_by(|a, b| (&a.provider, &a.fingerprint).cmp(&(&b.provider, &b.fingerprint)));

        let document = PatternDocument {
            version: JSON_FORMAT_VERSION,
            patterns: records,
        };
        let body = serde_json::to_vec_pretty(&document)
            .map_err(|e| LearningStoreError::Persist(e.to_string()))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(&body)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .map_err(|e| LearningStoreError::Persist(format!("{:?}: {}", self.path, e.error)))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}

/// Embedded sled database, one entry per pattern (bincode-encoded).
#[derive(Clone)]
pub struct SledStorage {
    db: Arc<sled::Db>,
    path: PathBuf,
}

impl SledStorage {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LearningStoreError> {
        let path = path.into();
        let db = sled::open(&path)?;
        info!("Learning database opened at {:?}", path);
        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    fn encode_key(key: &PatternKey) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(key.provider.len() + key.fingerprint.len() + 1);
        bytes.extend_from_slice(key.provider.as_bytes());
        bytes.push(SLED_KEY_SEPARATOR);
        bytes.extend_from_slice(key.fingerprint.as_bytes());
        bytes
    }

    fn decode_key(&self, bytes: &[u8]) -> Result<PatternKey, LearningStoreError> {
        let split = bytes
            .iter()
            .position(|b| *b == SLED_KEY_SEPARATOR)
            .ok_or_else(|| self.corrupt("pattern key without separator"))?;
        let provider = std::str::from_utf8(&bytes[..split]).map_err(|e| self.corrupt(e))?;
        let fingerprint = std::str::from_utf8(&bytes[split + 1..]).map_err(|e| self.corrupt(e))?;
        Ok(PatternKey::new(provider, fingerprint))
    }

    fn corrupt(&self, reason: impl ToString) -> LearningStoreError {
        LearningStoreError::Corrupt {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

impl PatternStorage for SledStorage {
    fn load(&self) -> Result<PatternTable, LearningStoreError> {
        let mut table = PatternTable::new();
        for item in self.db.iter() {
            let (key_bytes, value_bytes) = item?;
            let key = self.decode_key(&key_bytes)?;
            let pattern: LearningPattern = bincode::deserialize(&value_bytes).map_err(|e| self.corrupt(e))?;
            table.insert(key, pattern);
        }
        Ok(table)
    }

    fn save(&self, patterns: &PatternTable) -> Result<(), LearningStoreError> {
        let mut batch = sled::Batch::default();

        for item in self.db.iter().keys() {
            let existing = item?;
            let still_present = self
                .decode_key(&existing)
                .map(|key| patterns.contains_key(&key))
                .unwrap_or(false);
            if !still_present {
                batch.remove(existing);
            }
        }

        for (key, pattern) in patterns {
            let value = bincode::serialize(pattern).map_err(|e| LearningStoreError::Persist(e.to_string()))?;
            batch.insert(Self::encode_key(key), value);
        }

        self.db.apply_batch(batch)?;
        self.db.flush()?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sled:{}", self.path.display())
    }
}
