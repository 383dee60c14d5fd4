//! Subject identity resolution for the Vox session manager.
//!
//! Maps raw per-channel metadata (SMS webhook fields, voice call headers) to a
//! stable, channel-independent [`SubjectId`]. Two strategies ship here: a
//! deterministic phone-number resolver backed by a persisted mapping file, and
//! an identity-graph resolver that enriches metadata from an external profile
//! service with a TTL cache.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

mod identity_graph;
mod phone;
mod profile_cache;

pub use identity_graph::{
    IdentityGraphClient, IdentityGraphResolver, IdentityGraphResolverConfig, IdentityKeyKind,
    IdentityProfile,
};
pub use phone::{normalize_phone, PhoneMappingStore, PhoneSubjectResolver, PHONE_METADATA_KEYS};
pub use profile_cache::ProfileCache;

/// Channel metadata bag handed in by the transport layer. Resolvers may write
/// enrichment traits back into it.
pub type ChannelMetadata = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
/// Canonical, channel-independent identifier for a conversation participant.
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
/// Failures surfaced by subject resolution.
pub enum ResolveError {
    #[error("no usable identifier found in channel metadata")]
    IdentifierNotFound,
    #[error("identity backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
/// Strategy seam for turning channel metadata into a [`SubjectId`].
pub trait SubjectResolver: Send + Sync {
    async fn resolve(&self, metadata: &mut ChannelMetadata) -> Result<SubjectId, ResolveError>;

    /// Declares two subject identifiers as the same real-world entity.
    /// Failures propagate: downstream consumers rely on merge consistency.
    async fn merge(&self, _primary: &SubjectId, _secondary: &SubjectId) -> Result<()> {
        bail!("resolver strategy does not support identity merge");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates the registered resolver strategies.
pub enum ResolverStrategy {
    Phone,
    IdentityGraph,
}

impl ResolverStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolverStrategy::Phone => "phone",
            ResolverStrategy::IdentityGraph => "identity-graph",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "phone" => Ok(ResolverStrategy::Phone),
            "identity-graph" | "identity_graph" => Ok(ResolverStrategy::IdentityGraph),
            other => bail!("unsupported resolver strategy '{other}' (expected phone|identity-graph)"),
        }
    }
}

/// Explicit registration table from strategy name to constructed resolver.
/// Replaces the original system's filesystem plugin scan.
pub fn resolver_for_strategy(
    strategy: ResolverStrategy,
    state_dir: &Path,
    identity_client: Option<Arc<dyn IdentityGraphClient>>,
) -> Result<Arc<dyn SubjectResolver>> {
    match strategy {
        ResolverStrategy::Phone => {
            let store = PhoneMappingStore::load(state_dir.join("phone-subjects.json"))?;
            Ok(Arc::new(PhoneSubjectResolver::new(store)))
        }
        ResolverStrategy::IdentityGraph => {
            let Some(client) = identity_client else {
                bail!("identity-graph strategy requires an identity client");
            };
            Ok(Arc::new(IdentityGraphResolver::new(
                client,
                IdentityGraphResolverConfig::default(),
            )))
        }
    }
}

pub(crate) fn metadata_string(metadata: &ChannelMetadata, key: &str) -> Option<String> {
    match metadata.get(key) {
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    }
}
