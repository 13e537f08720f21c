use std::sync::Mutex;

use serde_json::Value;

use crate::activity::AuditSink;

#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub message: String,
    pub context: Value,
    pub source: String,
}

/// Keeps every audit record in memory so tests can assert on the trail.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn contains(&self, message: &str) -> bool {
        self.records().iter().any(|r| r.message == message)
    }

    pub fn with_message(&self, message: &str) -> Vec<AuditRecord> {
        self.records().into_iter().filter(|r| r.message == message).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, message: &str, context: Value, source: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push(AuditRecord { message: message.to_string(), context, source: source.to_string() });
        }
    }
}
