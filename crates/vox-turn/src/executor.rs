//! Capability boundary to the external agent executor.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use vox_session::{ConversationContext, ConversationItem};

/// Default per-turn agent budget forwarded to the executor.
pub const DEFAULT_MAX_TURNS: usize = 10;

/// Short budget for auxiliary generations (greetings) so a slow executor
/// never blocks call setup.
pub const AUXILIARY_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
/// Caller-supplied budgets passed through to the executor.
pub struct TurnOptions {
    pub max_turns: usize,
    pub timeout_ms: Option<u64>,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            timeout_ms: None,
        }
    }
}

impl TurnOptions {
    /// Budget for non-conversational generations such as greetings.
    pub fn auxiliary() -> Self {
        Self {
            max_turns: 1,
            timeout_ms: Some(AUXILIARY_TIMEOUT_MS),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// Tool call awaiting a human decision; surfaced by the executor when a
/// sensitive action needs sign-off.
pub struct PendingApproval {
    pub tool_call_id: String,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
/// One approve/reject decision for a pending tool call.
pub struct ApprovalDecision {
    pub tool_call_id: String,
    pub approved: bool,
}

#[derive(Debug, Clone)]
/// Input to a fresh (or input-carrying resumed) executor run.
pub struct ExecutorInput<'a> {
    pub user_text: &'a str,
    /// Opaque checkpoint from an earlier interrupted run, if any.
    pub prior_state: Option<&'a str>,
}

#[derive(Debug, Clone, Default)]
/// What the executor reports back from one run or resumption.
pub struct ExecutorOutcome {
    pub final_output_text: Option<String>,
    pub new_items: Vec<ConversationItem>,
    pub pending_approvals: Vec<PendingApproval>,
    /// Serialized checkpoint; required whenever approvals are pending.
    pub serialized_state: Option<String>,
    pub current_agent_label: Option<String>,
}

#[derive(Debug, Error)]
/// Failures the executor can report.
pub enum ExecutorError {
    /// The supplied checkpoint string could not be decoded. The caller must
    /// discard the stored record; retrying can never succeed.
    #[error("run-state checkpoint could not be decoded")]
    CorruptedState,
    #[error("executor run failed: {0}")]
    Failed(#[from] anyhow::Error),
}

#[async_trait]
/// Black-box agent executor. Given input (and optionally a prior checkpoint),
/// it returns output text, new conversation items, and zero or more pending
/// tool approvals.
pub trait AgentExecutor: Send + Sync {
    async fn run(
        &self,
        input: ExecutorInput<'_>,
        context: &ConversationContext,
        options: &TurnOptions,
    ) -> Result<ExecutorOutcome, ExecutorError>;

    /// Applies approval decisions to a checkpoint and resumes execution.
    async fn resume(
        &self,
        serialized_state: &str,
        decisions: &[ApprovalDecision],
        context: &ConversationContext,
        options: &TurnOptions,
    ) -> Result<ExecutorOutcome, ExecutorError>;
}
