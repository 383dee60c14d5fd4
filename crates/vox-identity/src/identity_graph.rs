//! Identity-graph resolver: external profile lookup, metadata enrichment,
//! anonymous fallback, and explicit merge.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use vox_core::current_unix_timestamp_ms;

use crate::{
    metadata_string, normalize_phone, ChannelMetadata, ProfileCache, ResolveError, SubjectId,
    SubjectResolver, PHONE_METADATA_KEYS,
};

const ANONYMOUS_METADATA_KEYS: [&str; 4] =
    ["anonymous_id", "anonymousId", "session_id", "sessionId"];
const USER_ID_METADATA_KEYS: [&str; 3] = ["user_id", "userId", "customer_id"];
const EMAIL_METADATA_KEYS: [&str; 2] = ["email", "Email"];
const DEFAULT_PROFILE_TTL_MS: u64 = 5 * 60 * 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// External identifier kinds, in lookup priority order.
pub enum IdentityKeyKind {
    UserId,
    Email,
    Phone,
}

impl IdentityKeyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKeyKind::UserId => "user_id",
            IdentityKeyKind::Email => "email",
            IdentityKeyKind::Phone => "phone",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// Profile returned by the external identity graph.
pub struct IdentityProfile {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub anonymous_id: Option<String>,
    #[serde(default)]
    pub traits: serde_json::Map<String, Value>,
}

impl IdentityProfile {
    /// Derives the subject id from the canonical id type, preferring
    /// user_id > email > phone > anonymous_id.
    pub fn canonical_subject(&self) -> Option<SubjectId> {
        if let Some(user_id) = self.user_id.as_deref().filter(|v| !v.trim().is_empty()) {
            return Some(SubjectId::new(format!("user_{}", user_id.trim())));
        }
        if let Some(email) = self.email.as_deref().filter(|v| !v.trim().is_empty()) {
            return Some(SubjectId::new(format!(
                "email_{}",
                email.trim().to_ascii_lowercase()
            )));
        }
        if let Some(phone) = self.phone.as_deref().and_then(normalize_phone) {
            return Some(SubjectId::new(format!("phone_{phone}")));
        }
        self.anonymous_id
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .map(|anon| SubjectId::new(format!("anon_{}", anon.trim())))
    }
}

#[async_trait]
/// Boundary to the external identity system. Injected so tests run against
/// in-memory fakes and production wires a real client.
pub trait IdentityGraphClient: Send + Sync {
    async fn lookup_profile(
        &self,
        kind: IdentityKeyKind,
        value: &str,
    ) -> Result<Option<IdentityProfile>>;

    async fn register_identity(&self, profile: &IdentityProfile) -> Result<()>;

    async fn merge_identities(&self, primary: &str, secondary: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
/// Tuning for [`IdentityGraphResolver`].
pub struct IdentityGraphResolverConfig {
    pub profile_ttl_ms: u64,
}

impl Default for IdentityGraphResolverConfig {
    fn default() -> Self {
        Self {
            profile_ttl_ms: DEFAULT_PROFILE_TTL_MS,
        }
    }
}

/// Enrichment-capable resolver strategy backed by an external identity graph.
pub struct IdentityGraphResolver {
    client: Arc<dyn IdentityGraphClient>,
    cache: ProfileCache,
    anonymous_counter: AtomicU64,
}

impl IdentityGraphResolver {
    pub fn new(client: Arc<dyn IdentityGraphClient>, config: IdentityGraphResolverConfig) -> Self {
        Self {
            client,
            cache: ProfileCache::new(config.profile_ttl_ms),
            anonymous_counter: AtomicU64::new(0),
        }
    }

    pub fn cached_profiles(&self) -> usize {
        self.cache.len()
    }

    fn mint_anonymous_id(&self) -> String {
        let sequence = self.anonymous_counter.fetch_add(1, Ordering::Relaxed);
        format!(
            "anon-{}-{}-{}",
            current_unix_timestamp_ms(),
            std::process::id(),
            sequence
        )
    }

    fn lookup_candidate(metadata: &ChannelMetadata) -> Option<(IdentityKeyKind, String)> {
        for key in USER_ID_METADATA_KEYS {
            if let Some(value) = metadata_string(metadata, key) {
                return Some((IdentityKeyKind::UserId, value));
            }
        }
        for key in EMAIL_METADATA_KEYS {
            if let Some(value) = metadata_string(metadata, key) {
                return Some((IdentityKeyKind::Email, value));
            }
        }
        for key in PHONE_METADATA_KEYS {
            if let Some(value) = metadata_string(metadata, key) {
                if let Some(normalized) = normalize_phone(&value) {
                    return Some((IdentityKeyKind::Phone, normalized));
                }
            }
        }
        None
    }

    async fn lookup_with_cache(
        &self,
        kind: IdentityKeyKind,
        value: &str,
    ) -> Option<IdentityProfile> {
        let cache_key = format!("{}:{}", kind.as_str(), value);
        if let Some(profile) = self.cache.get(&cache_key) {
            return Some(profile);
        }
        match self.client.lookup_profile(kind, value).await {
            Ok(Some(profile)) => {
                self.cache.insert(&cache_key, profile.clone());
                Some(profile)
            }
            Ok(None) => None,
            Err(error) => {
                // Lookup failures degrade to a miss; resolution must not
                // become an outage because the graph was briefly unreachable.
                tracing::warn!(
                    kind = kind.as_str(),
                    reason_code = "identity_lookup_failed",
                    error = %error,
                    "identity graph lookup failed; treating as miss"
                );
                None
            }
        }
    }

    fn enrich_metadata(metadata: &mut ChannelMetadata, profile: &IdentityProfile) {
        for (key, value) in &profile.traits {
            metadata.insert(key.clone(), value.clone());
        }
    }
}

#[async_trait]
impl SubjectResolver for IdentityGraphResolver {
    async fn resolve(&self, metadata: &mut ChannelMetadata) -> Result<SubjectId, ResolveError> {
        // A session that already carries an anonymous identifier stays on it.
        for key in ANONYMOUS_METADATA_KEYS {
            if let Some(existing) = metadata_string(metadata, key) {
                return Ok(SubjectId::new(format!("anon_{existing}")));
            }
        }

        let Some((kind, value)) = Self::lookup_candidate(metadata) else {
            return Err(ResolveError::IdentifierNotFound);
        };

        if let Some(profile) = self.lookup_with_cache(kind, &value).await {
            Self::enrich_metadata(metadata, &profile);
            if let Some(subject) = profile.canonical_subject() {
                return Ok(subject);
            }
        }

        // Miss: mint an anonymous identity carrying whatever identifiers we
        // saw, and register it with the graph.
        let anonymous_id = self.mint_anonymous_id();
        let mut profile = IdentityProfile {
            anonymous_id: Some(anonymous_id.clone()),
            ..IdentityProfile::default()
        };
        match kind {
            IdentityKeyKind::UserId => profile.user_id = Some(value.clone()),
            IdentityKeyKind::Email => profile.email = Some(value.clone()),
            IdentityKeyKind::Phone => profile.phone = Some(value.clone()),
        }
        metadata.insert(
            "anonymous_id".to_string(),
            Value::String(anonymous_id.clone()),
        );
        let subject = profile
            .canonical_subject()
            .unwrap_or_else(|| SubjectId::new(format!("anon_{anonymous_id}")));

        if kind == IdentityKeyKind::UserId {
            // The identity write is load-bearing for authenticated users;
            // losing it would detach the account from its history.
            self.client
                .register_identity(&profile)
                .await
                .context("failed to register authenticated identity")?;
        } else {
            let client = Arc::clone(&self.client);
            tokio::spawn(async move {
                match client.register_identity(&profile).await {
                    Ok(()) => tracing::info!(
                        reason_code = "identity_registered",
                        "registered anonymous identity"
                    ),
                    Err(error) => tracing::warn!(
                        reason_code = "identity_register_failed",
                        error = %error,
                        "anonymous identity registration failed"
                    ),
                }
            });
        }

        Ok(subject)
    }

    async fn merge(&self, primary: &SubjectId, secondary: &SubjectId) -> Result<()> {
        self.client
            .merge_identities(primary.as_str(), secondary.as_str())
            .await
            .with_context(|| {
                format!(
                    "failed to merge identity {} into {}",
                    secondary.as_str(),
                    primary.as_str()
                )
            })
    }
}
