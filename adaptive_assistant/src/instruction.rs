//! Immutable instruction values and the fingerprint used to key learned patterns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Maximum number of characters kept in a fingerprint.
pub const FINGERPRINT_LEN: usize = 50;

/// Request priority as supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl std::str::FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(anyhow::anyhow!("Unknown priority '{}'", other)),
        }
    }
}

/// A single free-form request. Built once and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    id: Uuid,
    text: String,
    created_at: DateTime<Utc>,
    priority: Priority,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    context: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    estimated_duration_minutes: Option<u32>,
}

impl Instruction {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: text.into(),
            created_at: Utc::now(),
            priority: Priority::default(),
            context: HashMap::new(),
            estimated_duration_minutes: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_context(mut self, context: HashMap<String, serde_json::Value>) -> Self {
        self.context = context;
        self
    }

    pub fn with_estimated_duration(mut self, minutes: u32) -> Self {
        self.estimated_duration_minutes = Some(minutes);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn context(&self) -> &HashMap<String, serde_json::Value> {
        &self.context
    }

    pub fn estimated_duration_minutes(&self) -> Option<u32> {
        self.estimated_duration_minutes
    }

    /// Lower-cased text, the form keyword predicates match against.
    pub fn normalized_text(&self) -> String {
        self.text.to_lowercase()
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.text)
    }
}

/// Derive the pattern key fragment for an instruction text.
///
/// Depends on the text only: trims, lower-cases, collapses runs of
/// whitespace and keeps the first [`FINGERPRINT_LEN`] characters.
pub fn fingerprint(text: &str) -> String {
    text.split_whitespace()
        .flat_map(|word| std::iter::once(' ').chain(word.chars().flat_map(char::to_lowercase)))
        .skip(1)
        .take(FINGERPRINT_LEN)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let text = "Do we have college-photo.jpg in Desktop";
        assert_eq!(fingerprint(text), fingerprint(text));
        assert_eq!(fingerprint(text), "do we have college-photo.jpg in desktop");
    }

    #[test]
    fn fingerprint_normalizes_case_and_whitespace() {
        assert_eq!(fingerprint("  List   FILES\tin  here "), "list files in here");
        assert_eq!(fingerprint(""), "");
        assert_eq!(fingerprint("   "), "");
    }

    #[test]
    fn fingerprint_shares_key_for_common_prefix() {
        let prefix = "a".repeat(FINGERPRINT_LEN);
        let first = format!("{prefix} then something");
        let second = format!("{prefix} and something else entirely");
        assert_eq!(fingerprint(&first), fingerprint(&second));
        assert_eq!(fingerprint(&first).chars().count(), FINGERPRINT_LEN);
    }

    #[test]
    fn fingerprint_counts_characters_not_bytes() {
        let text = "é".repeat(80);
        assert_eq!(fingerprint(&text).chars().count(), FINGERPRINT_LEN);
    }

    #[test]
    fn fingerprint_ignores_instruction_metadata() {
        let plain = Instruction::new("check disk space");
        let mut context = HashMap::new();
        context.insert("source".to_string(), serde_json::json!("cli"));
        let rich = Instruction::new("check disk space")
            .with_priority(Priority::Urgent)
            .with_context(context);
        assert_ne!(plain.id(), rich.id());
        assert_eq!(plain.fingerprint(), rich.fingerprint());
    }

    #[test]
    fn priority_parses_and_serializes_lowercase() {
        assert_eq!("URGENT".parse::<Priority>().unwrap(), Priority::Urgent);
        assert!("someday".parse::<Priority>().is_err());
        assert_eq!(serde_json::to_value(Priority::High).unwrap(), serde_json::json!("high"));
    }
}
