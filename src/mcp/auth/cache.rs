use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use super::VerifiedCredential;

/// Bounded LRU of verification results, keyed by the SHA-256 of the
/// credential. Entries without an expiry are never stored.
pub struct VerificationCache {
    entries: Mutex<LruCache<String, VerifiedCredential>>,
}

fn cache_key(credential: &str) -> String {
    format!("{:x}", Sha256::digest(credential.as_bytes()))
}

impl VerificationCache {
    /// `None` when `capacity` is zero (caching off).
    pub fn new(capacity: usize) -> Option<Self> {
        NonZeroUsize::new(capacity).map(|capacity| Self {
            entries: Mutex::new(LruCache::new(capacity)),
        })
    }

    pub fn get(&self, credential: &str, now: DateTime<Utc>) -> Option<VerifiedCredential> {
        let key = cache_key(credential);
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(entry) if !entry.is_expired_at(now) => Some(entry.clone()),
            Some(_) => {
                entries.pop(&key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, credential: &str, verified: &VerifiedCredential) {
        if verified.expires_at.is_none() {
            return;
        }
        self.entries.lock().put(cache_key(credential), verified.clone());
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
