//! Per-collection audit trail.
//!
//! Diagnostic only: entries live in memory, are capped per collection and are
//! never persisted or consulted for correctness.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of mutation recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditAction::Insert => write!(f, "insert"),
            AuditAction::Update => write!(f, "update"),
            AuditAction::Delete => write!(f, "delete"),
        }
    }
}

/// One recorded mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    /// The document as written (or as it was, for deletes).
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// Bounded in-memory audit log.
#[derive(Debug)]
pub struct AuditLog {
    capacity: usize,
    entries: Mutex<HashMap<String, VecDeque<AuditEntry>>>,
}

impl AuditLog {
    /// Creates a log retaining at most `capacity` entries per collection.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends an entry, evicting the oldest one when full.
    pub fn record(&self, collection: &str, action: AuditAction, data: Value) {
        let entry = AuditEntry {
            action,
            data,
            timestamp: Utc::now(),
        };
        let mut entries = self.entries.lock();
        let log = entries.entry(collection.to_string()).or_default();
        if log.len() == self.capacity {
            log.pop_front();
        }
        log.push_back(entry);
    }

    /// Entries for `collection`, oldest first.
    pub fn entries(&self, collection: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .get(collection)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keeps_most_recent_entries() {
        let log = AuditLog::new(3);
        for i in 1..=5 {
            log.record("orders", AuditAction::Insert, json!({"id": i.to_string()}));
        }

        let ids: Vec<Value> = log
            .entries("orders")
            .into_iter()
            .map(|entry| entry.data["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!("3"), json!("4"), json!("5")]);
    }

    #[test]
    fn collections_are_independent() {
        let log = AuditLog::new(10);
        log.record("users", AuditAction::Insert, json!({"id": "1"}));
        log.record("slots", AuditAction::Delete, json!({"id": "9"}));

        let users = log.entries("users");
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].action, AuditAction::Insert);
        assert!(log.entries("doctors").is_empty());
    }

    #[test]
    fn action_serializes_lowercase() {
        assert_eq!(serde_json::to_value(AuditAction::Update).unwrap(), json!("update"));
        assert_eq!(AuditAction::Delete.to_string(), "delete");
    }
}
