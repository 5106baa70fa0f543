//! Fingerprint-keyed cache of parsed AI phase responses.
//!
//! Keys are SHA-256 fingerprints of the phase name, the normalized prompt,
//! the context text and the hash of any attached file bytes. The cache is
//! append-only for the lifetime of the process: the first stored value for
//! a key wins and nothing is ever invalidated. It is passed explicitly to
//! whoever needs it; there is no global instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Collapse runs of whitespace so cosmetic prompt edits share a key.
pub fn normalize_prompt(prompt: &str) -> String {
    prompt.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hex SHA-256 of arbitrary bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Fingerprint of one phase invocation.
pub fn fingerprint(phase: &str, prompt: &str, context: &str, attachment: Option<&[u8]>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(phase.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize_prompt(prompt).as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize_prompt(context).as_bytes());
    hasher.update([0u8]);
    if let Some(bytes) = attachment {
        hasher.update(content_hash(bytes).as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Counters reported after a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Read/append-only response cache shared across runs.
#[derive(Debug, Default)]
pub struct PhaseCache {
    entries: RwLock<HashMap<String, Value>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PhaseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a fingerprint, counting the hit or miss.
    pub fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(v) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(v.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a value unless the key is already present.
    pub fn insert(&self, key: String, value: Value) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.entry(key).or_insert(value);
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            entries: entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
