//! Dual-state session persistence for the Vox session manager.
//!
//! The in-memory [`ContextStore`] holds mutable conversational context per
//! subject; the durable [`RunStateStore`] holds opaque execution checkpoints
//! that let an interrupted agent run resume after a tool-approval gate. The
//! [`SessionLifecycle`] ties both together for end-session and idle sweeps.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use vox_core::current_unix_timestamp_ms;
use vox_identity::SubjectId;

mod lifecycle;
mod run_state;

pub use lifecycle::{SessionLifecycle, SessionLifecycleConfig, SweepSummary};
pub use run_state::{
    resolve_run_state_backend, FileRunStateStore, MemoryRunStateStore, ResolvedRunStateBackend,
    RunStateBackend, RunStateStore, DEFAULT_RUN_STATE_MAX_AGE_MS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Role tag for a conversation item.
pub enum ItemRole {
    User,
    Assistant,
    System,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// One role-tagged entry in a subject's conversation history.
pub struct ConversationItem {
    pub role: ItemRole,
    pub content: String,
    pub created_unix_ms: u64,
}

impl ConversationItem {
    pub fn new(role: ItemRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_unix_ms: current_unix_timestamp_ms(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ItemRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ItemRole::Assistant, content)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// Customer facts extracted over the life of a session; last write wins.
pub struct CustomerFacts {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub current_order: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Per-subject mutable conversational aggregate.
pub struct ConversationContext {
    pub items: Vec<ConversationItem>,
    pub customer: CustomerFacts,
    escalation_level: u32,
    pub resolved_issues: Vec<String>,
    pub metadata: serde_json::Map<String, Value>,
    session_start_unix_ms: u64,
    pub last_active_unix_ms: u64,
}

impl ConversationContext {
    pub fn new() -> Self {
        let now = current_unix_timestamp_ms();
        Self {
            items: Vec::new(),
            customer: CustomerFacts::default(),
            escalation_level: 0,
            resolved_issues: Vec::new(),
            metadata: serde_json::Map::new(),
            session_start_unix_ms: now,
            last_active_unix_ms: now,
        }
    }

    pub fn session_start_unix_ms(&self) -> u64 {
        self.session_start_unix_ms
    }

    pub fn escalation_level(&self) -> u32 {
        self.escalation_level
    }

    /// Raises the escalation level by one. The counter is monotonic; nothing
    /// in this subsystem lowers it.
    pub fn escalate(&mut self) -> u32 {
        self.escalation_level = self.escalation_level.saturating_add(1);
        self.escalation_level
    }

    pub fn note_resolved_issue(&mut self, issue: impl Into<String>) {
        self.resolved_issues.push(issue.into());
    }

    pub fn message_count(&self) -> usize {
        self.items.len()
    }
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory map from subject to conversational context. All mutation flows
/// through this interface so per-subject locking could be added later without
/// touching call sites.
pub struct ContextStore {
    contexts: Mutex<HashMap<SubjectId, ConversationContext>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the subject's context, creating an empty one if absent. Never
    /// fails.
    pub async fn get_context(&self, subject_id: &SubjectId) -> ConversationContext {
        let mut contexts = self.contexts.lock().await;
        contexts
            .entry(subject_id.clone())
            .or_insert_with(ConversationContext::new)
            .clone()
    }

    /// Overwrites the subject's context and refreshes its last-active stamp.
    pub async fn save_context(&self, subject_id: &SubjectId, mut context: ConversationContext) {
        context.last_active_unix_ms = current_unix_timestamp_ms();
        let mut contexts = self.contexts.lock().await;
        contexts.insert(subject_id.clone(), context);
    }

    pub async fn remove(&self, subject_id: &SubjectId) -> Option<ConversationContext> {
        let mut contexts = self.contexts.lock().await;
        contexts.remove(subject_id)
    }

    pub async fn contains(&self, subject_id: &SubjectId) -> bool {
        let contexts = self.contexts.lock().await;
        contexts.contains_key(subject_id)
    }

    pub async fn subject_count(&self) -> usize {
        let contexts = self.contexts.lock().await;
        contexts.len()
    }

    /// Subjects whose last activity is older than `idle_max_ms`.
    pub async fn idle_subjects(&self, idle_max_ms: u64) -> Vec<SubjectId> {
        let now = current_unix_timestamp_ms();
        let contexts = self.contexts.lock().await;
        contexts
            .iter()
            .filter(|(_, context)| {
                vox_core::age_exceeds_ms(context.last_active_unix_ms, now, idle_max_ms)
            })
            .map(|(subject_id, _)| subject_id.clone())
            .collect()
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}
