//! Append-only record of oracle outcomes.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::rewrite::Provenance;
use crate::Address;

/// One gateway call: what came back and how far to trust it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationLogEntry {
    pub function_address: Address,
    pub function_name: String,
    /// Accepted oracle text, or the stub
    pub translated_text: String,
    /// In `[0, 1]`; always 0.0 for stubs
    pub confidence: f64,
    pub review_marker_count: u32,
    pub provenance: Provenance,
    /// Why the stub was used
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl TranslationLogEntry {
    /// Returns true if the oracle's text was accepted
    pub fn accepted(&self) -> bool {
        self.provenance == Provenance::Oracle
    }
}

/// Thread-safe log shared by concurrent gateway calls.
///
/// Entries are kept in completion order; use [`TranslationLog::sorted`] for
/// a stable view.
#[derive(Debug, Default)]
pub struct TranslationLog {
    entries: Mutex<Vec<TranslationLogEntry>>,
}

impl TranslationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry
    pub fn append(&self, entry: TranslationLogEntry) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }

    /// Copy of all entries in completion order
    pub fn entries(&self) -> Vec<TranslationLogEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Copy of all entries ordered by function address
    pub fn sorted(&self) -> Vec<TranslationLogEntry> {
        let mut entries = self.entries();
        entries.sort_by_key(|e| e.function_address);
        entries
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(addr: Address) -> TranslationLogEntry {
        TranslationLogEntry {
            function_address: addr,
            function_name: format!("sub_{:04X}", addr),
            translated_text: String::new(),
            confidence: 0.0,
            review_marker_count: 0,
            provenance: Provenance::StubFallback,
            failure_reason: Some("timeout".into()),
        }
    }

    #[test]
    fn test_sorted_view() {
        let log = TranslationLog::new();
        log.append(entry(0x9000));
        log.append(entry(0x8000));

        assert_eq!(log.entries()[0].function_address, 0x9000);
        assert_eq!(log.sorted()[0].function_address, 0x8000);
        assert_eq!(log.len(), 2);
        assert!(!log.sorted()[0].accepted());
    }
}
