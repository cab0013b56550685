//! Single-slot "last answer" memo.
//!
//! Holds the fingerprint of the most recent backend-serviced image and the raw
//! body the backend returned for it. The slot is compared pairwise against the
//! next image only; there is no history. Callers that serve requests
//! concurrently must hold a lock across `lookup`, the backend call and `store`
//! (see `proxy::AppState`).

use axum::body::Bytes;

use crate::fingerprint::{is_similar, Fingerprint, DEFAULT_THRESHOLD};

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub response: Bytes,
}

#[derive(Debug)]
pub struct ResponseCache {
    threshold: u32,
    entry: Option<CacheEntry>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl ResponseCache {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            entry: None,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Returns the stored body if `fingerprint` is within the threshold of the
    /// stored one.
    pub fn lookup(&self, fingerprint: Fingerprint) -> Option<Bytes> {
        let entry = self.entry.as_ref()?;
        if is_similar(Some(entry.fingerprint), Some(fingerprint), self.threshold) {
            Some(entry.response.clone())
        } else {
            None
        }
    }

    /// Replaces the slot wholesale.
    pub fn store(&mut self, fingerprint: Fingerprint, response: Bytes) {
        self.entry = Some(CacheEntry {
            fingerprint,
            response,
        });
    }

    pub fn entry(&self) -> Option<&CacheEntry> {
        self.entry.as_ref()
    }
}
