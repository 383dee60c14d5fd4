//! Dry-run executor for exercising the session stack without a live agent.
//!
//! Deterministic stand-in for the external executor: ordinary messages get a
//! canned echo, messages mentioning a refund pause on a tool-approval gate,
//! and resumption completes the pretend refund.

use anyhow::Result;
use async_trait::async_trait;

use vox_session::{ConversationContext, ConversationItem};
use vox_turn::{
    AgentExecutor, ApprovalDecision, ExecutorError, ExecutorInput, ExecutorOutcome,
    PendingApproval, TurnOptions,
};

const DRY_RUN_STATE_PREFIX: &str = "dry-run-checkpoint:";

pub struct DryRunExecutor;

#[async_trait]
impl AgentExecutor for DryRunExecutor {
    async fn run(
        &self,
        input: ExecutorInput<'_>,
        _context: &ConversationContext,
        _options: &TurnOptions,
    ) -> Result<ExecutorOutcome, ExecutorError> {
        let lowered = input.user_text.to_lowercase();
        if lowered.contains("refund") {
            return Ok(ExecutorOutcome {
                pending_approvals: vec![PendingApproval {
                    tool_call_id: "dry-run-refund-1".to_string(),
                    required: true,
                }],
                serialized_state: Some(format!("{DRY_RUN_STATE_PREFIX}{}", input.user_text)),
                ..ExecutorOutcome::default()
            });
        }
        let reply = format!("[dry-run] You said: {}", input.user_text);
        Ok(ExecutorOutcome {
            final_output_text: Some(reply.clone()),
            new_items: vec![ConversationItem::assistant(reply)],
            current_agent_label: Some("dry-run".to_string()),
            ..ExecutorOutcome::default()
        })
    }

    async fn resume(
        &self,
        serialized_state: &str,
        _decisions: &[ApprovalDecision],
        _context: &ConversationContext,
        _options: &TurnOptions,
    ) -> Result<ExecutorOutcome, ExecutorError> {
        if !serialized_state.starts_with(DRY_RUN_STATE_PREFIX) {
            return Err(ExecutorError::CorruptedState);
        }
        let reply = "[dry-run] Approved; the refund has been submitted.".to_string();
        Ok(ExecutorOutcome {
            final_output_text: Some(reply.clone()),
            new_items: vec![ConversationItem::assistant(reply)],
            current_agent_label: Some("dry-run".to_string()),
            ..ExecutorOutcome::default()
        })
    }
}
