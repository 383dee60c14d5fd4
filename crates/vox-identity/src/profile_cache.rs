//! TTL-only cache for external identity profiles.

use std::collections::HashMap;
use std::sync::Mutex;

use vox_core::{age_exceeds_ms, current_unix_timestamp_ms};

use crate::IdentityProfile;

/// Expiring map keyed by an external identifier (`kind:value`). Entries are
/// evicted lazily on read; TTL is the only invalidation path.
pub struct ProfileCache {
    ttl_ms: u64,
    entries: Mutex<HashMap<String, (u64, IdentityProfile)>>,
}

impl ProfileCache {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            ttl_ms,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<IdentityProfile> {
        let mut entries = self.entries.lock().expect("profile cache poisoned");
        let now = current_unix_timestamp_ms();
        match entries.get(key) {
            Some((inserted_at, profile)) if !age_exceeds_ms(*inserted_at, now, self.ttl_ms) => {
                Some(profile.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: &str, profile: IdentityProfile) {
        let mut entries = self.entries.lock().expect("profile cache poisoned");
        entries.insert(key.to_string(), (current_unix_timestamp_ms(), profile));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("profile cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
