//! Fingerprint-addressed cache of consultation payloads with lazy TTL expiry.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use parking_lot::RwLock;
use parley_memory::Coordinates;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::pipeline::ConsultationPayload;

/// Default time a payload stays valid.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

const HASH_PREFIX_LEN: usize = 16;

/// Cache key derived from the normalized query and the coarse location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Hashes the trimmed, lower-cased query and appends the location rounded to
    /// `precision` decimal places.
    #[must_use]
    pub fn compute(query: &str, location: Option<&Coordinates>, precision: u32) -> Self {
        let normalized = query.trim().to_lowercase();
        let digest = hex::encode(Sha256::digest(normalized.as_bytes()));
        let prefix = &digest[..HASH_PREFIX_LEN];
        match location {
            Some(location) => {
                let (lat, lng) = location.rounded(precision);
                Self(format!("{prefix}_{lat}_{lng}"))
            }
            None => Self(prefix.to_string()),
        }
    }

    /// Key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
struct CacheSlot {
    payload: Arc<ConsultationPayload>,
    stored_at: Instant,
}

/// Process-wide payload cache. Last write wins per fingerprint.
#[derive(Debug)]
pub struct FingerprintCache {
    ttl: Duration,
    slots: RwLock<HashMap<Fingerprint, CacheSlot>>,
}

impl Default for FingerprintCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl FingerprintCache {
    /// Creates an empty cache whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Validity window.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Payload for `fingerprint` if present and younger than the TTL.
    #[must_use]
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<Arc<ConsultationPayload>> {
        let slots = self.slots.read();
        let slot = slots.get(fingerprint)?;
        (slot.stored_at.elapsed() < self.ttl).then(|| Arc::clone(&slot.payload))
    }

    /// Stores `payload`, replacing whatever the slot held.
    pub fn put(&self, fingerprint: Fingerprint, payload: Arc<ConsultationPayload>) {
        self.slots.write().insert(
            fingerprint,
            CacheSlot {
                payload,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drops expired slots; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|_, slot| slot.stored_at.elapsed() < self.ttl);
        before - slots.len()
    }

    /// Physically stored slots, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// True when no slot is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fusion::FusedOutput,
        specialist::ResultStatus,
        synthesis::{SynthesisResult, FALLBACK_DIRECTIVE},
    };

    fn payload(tag: &str) -> Arc<ConsultationPayload> {
        Arc::new(ConsultationPayload {
            fingerprint: Fingerprint::compute(tag, None, 2),
            domain: "general".into(),
            specialists: Vec::new(),
            fused: FusedOutput::default(),
            synthesis: SynthesisResult {
                directive: FALLBACK_DIRECTIVE.into(),
                status: ResultStatus::Fallback,
                failure: None,
                latency_ms: 0,
            },
        })
    }

    #[test]
    fn fingerprint_normalizes_query() {
        let a = Fingerprint::compute("  Where is the Library? ", None, 2);
        let b = Fingerprint::compute("where is the library?", None, 2);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 16);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn nearby_locations_share_a_slot() {
        let a = Coordinates::new(38.3498, -81.6326).unwrap();
        let b = Coordinates::new(38.3502, -81.6331).unwrap();
        let far = Coordinates::new(38.40, -81.6326).unwrap();
        let fa = Fingerprint::compute("parks", Some(&a), 2);
        assert_eq!(fa, Fingerprint::compute("parks", Some(&b), 2));
        assert_ne!(fa, Fingerprint::compute("parks", Some(&far), 2));
        assert_ne!(fa, Fingerprint::compute("parks", None, 2));
        assert!(fa.as_str().ends_with("_3835_-8163"));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_lazily() {
        let cache = FingerprintCache::new(Duration::from_secs(60));
        let key = Fingerprint::compute("parks", None, 2);
        cache.put(key.clone(), payload("parks"));
        assert!(cache.get(&key).is_some());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get(&key).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn last_write_wins() {
        let cache = FingerprintCache::default();
        let key = Fingerprint::compute("parks", None, 2);
        cache.put(key.clone(), payload("first"));
        let second = payload("second");
        cache.put(key.clone(), Arc::clone(&second));
        assert!(Arc::ptr_eq(&cache.get(&key).unwrap(), &second));
        assert_eq!(cache.ttl(), DEFAULT_CACHE_TTL);
    }
}
