//! Deterministic phone-number resolution with a persisted mapping file.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::sync::Mutex;

use vox_core::write_text_atomic;

use crate::{metadata_string, ChannelMetadata, ResolveError, SubjectId, SubjectResolver};

/// Ordered list of metadata keys that may carry a phone number. The first
/// non-blank value wins; SMS webhooks use `From`, voice transports `Caller`.
pub const PHONE_METADATA_KEYS: [&str; 7] = [
    "From",
    "from",
    "Caller",
    "caller",
    "phone",
    "phone_number",
    "phoneNumber",
];

/// Normalizes a raw phone string to E.164-ish form.
///
/// Strips every non-digit except one leading `+`. Numbers without a leading
/// `+` are assumed NANP: 10 digits gain `+1`, 11 digits starting with `1`
/// gain `+`, anything else gains a bare `+`. Returns `None` only for blank
/// input; normalization is otherwise total and idempotent.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let has_plus = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(|ch| ch.is_ascii_digit()).collect();
    if has_plus {
        return Some(format!("+{digits}"));
    }
    if digits.len() == 10 {
        return Some(format!("+1{digits}"));
    }
    Some(format!("+{digits}"))
}

/// Persisted `normalizedPhone -> subjectId` map, rewritten in full on every
/// new mapping so a restart resolves identically to the run that created it.
pub struct PhoneMappingStore {
    path: PathBuf,
    mappings: Mutex<HashMap<String, String>>,
}

impl PhoneMappingStore {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mappings = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read phone map {}", path.display()))?;
            serde_json::from_str::<HashMap<String, String>>(&raw)
                .with_context(|| format!("failed to parse phone map {}", path.display()))?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            mappings: Mutex::new(mappings),
        })
    }

    /// Returns the subject for a normalized phone, minting and persisting a
    /// new mapping on first sighting.
    pub async fn lookup_or_create(&self, normalized_phone: &str) -> Result<SubjectId> {
        let mut mappings = self.mappings.lock().await;
        if let Some(existing) = mappings.get(normalized_phone) {
            return Ok(SubjectId::new(existing.clone()));
        }
        let subject = format!("phone_{normalized_phone}");
        mappings.insert(normalized_phone.to_string(), subject.clone());
        let rendered = serde_json::to_string_pretty(&*mappings)
            .context("failed to serialize phone map")?;
        write_text_atomic(&self.path, &rendered)?;
        tracing::info!(
            normalized_phone,
            subject_id = subject.as_str(),
            reason_code = "phone_mapping_created",
            "persisted new phone mapping"
        );
        Ok(SubjectId::new(subject))
    }

    pub async fn mapping_count(&self) -> usize {
        self.mappings.lock().await.len()
    }
}

/// Default resolver strategy: pure normalization plus the persisted map.
pub struct PhoneSubjectResolver {
    store: PhoneMappingStore,
}

impl PhoneSubjectResolver {
    pub fn new(store: PhoneMappingStore) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl SubjectResolver for PhoneSubjectResolver {
    async fn resolve(&self, metadata: &mut ChannelMetadata) -> Result<SubjectId, ResolveError> {
        let raw = PHONE_METADATA_KEYS
            .iter()
            .find_map(|key| metadata_string(metadata, key))
            .ok_or(ResolveError::IdentifierNotFound)?;
        let normalized = normalize_phone(&raw).ok_or(ResolveError::IdentifierNotFound)?;
        let subject = self.store.lookup_or_create(&normalized).await?;
        Ok(subject)
    }
}
