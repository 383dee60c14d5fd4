//! One-turn protocol: load state, invoke the executor, persist, frame result.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};

use vox_identity::SubjectId;
use vox_session::{ContextStore, ConversationContext, ConversationItem, RunStateStore};

use crate::executor::{
    AgentExecutor, ExecutorError, ExecutorInput, ExecutorOutcome, PendingApproval, TurnOptions,
};
use crate::{APOLOGY_RESPONSE, DEFAULT_GREETING, REPEAT_REQUEST_RESPONSE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Terminal status of one processed turn.
pub enum TurnStatus {
    Completed,
    AwaitingApprovals,
    RecoveredError,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStatus::Completed => "completed",
            TurnStatus::AwaitingApprovals => "awaiting_approvals",
            TurnStatus::RecoveredError => "recovered_error",
        }
    }
}

#[derive(Debug, Clone)]
/// Outcome of `process_turn` / `handle_approvals`.
pub struct TurnResult {
    pub status: TurnStatus,
    /// Final response text; absent while approvals are pending.
    pub response: Option<String>,
    pub new_items: Vec<ConversationItem>,
    pub pending_approvals: Vec<PendingApproval>,
    pub current_agent_label: Option<String>,
}

impl TurnResult {
    pub fn awaiting_approvals(&self) -> bool {
        self.status == TurnStatus::AwaitingApprovals
    }

    fn fixed(response: &str, status: TurnStatus) -> Self {
        Self {
            status,
            response: Some(response.to_string()),
            new_items: Vec::new(),
            pending_approvals: Vec::new(),
            current_agent_label: None,
        }
    }
}

/// Drives one conversational turn per call. Stores are injected once at
/// startup; there is no global registry.
pub struct TurnOrchestrator {
    contexts: Arc<ContextStore>,
    run_states: Arc<dyn RunStateStore>,
}

impl TurnOrchestrator {
    pub fn new(contexts: Arc<ContextStore>, run_states: Arc<dyn RunStateStore>) -> Self {
        Self {
            contexts,
            run_states,
        }
    }

    pub async fn process_turn(
        &self,
        subject_id: &SubjectId,
        user_text: &str,
        executor: &dyn AgentExecutor,
        options: &TurnOptions,
    ) -> Result<TurnResult> {
        let user_text = user_text.trim();
        if user_text.is_empty() {
            // No context mutation for blank input.
            return Ok(TurnResult::fixed(
                REPEAT_REQUEST_RESPONSE,
                TurnStatus::Completed,
            ));
        }

        let mut context = self.contexts.get_context(subject_id).await;
        context.items.push(ConversationItem::user(user_text));

        let prior_state = self.run_states.load_state(subject_id).await;
        let input = ExecutorInput {
            user_text,
            prior_state: prior_state.as_deref(),
        };
        let run = run_with_budget(executor, input, &context, options).await;

        match run {
            Ok(outcome) if !outcome.pending_approvals.is_empty() => {
                suspend_for_approvals(
                    &self.contexts,
                    self.run_states.as_ref(),
                    subject_id,
                    context,
                    outcome,
                )
                .await
            }
            Ok(outcome) => {
                complete_turn(
                    &self.contexts,
                    self.run_states.as_ref(),
                    subject_id,
                    context,
                    outcome,
                )
                .await
            }
            Err(error) => {
                // The user's message is already appended; keep it.
                tracing::warn!(
                    subject_id = subject_id.as_str(),
                    reason_code = "executor_run_failed",
                    error = %error,
                    "executor failed; returning recovered error"
                );
                self.contexts.save_context(subject_id, context).await;
                Ok(TurnResult::fixed(
                    APOLOGY_RESPONSE,
                    TurnStatus::RecoveredError,
                ))
            }
        }
    }

}

/// Parks an interrupted run: persist the checkpoint and context, hand the
/// pending approvals back to the caller. Shared by fresh turns and resumed
/// runs that hit another gate.
pub(crate) async fn suspend_for_approvals(
    contexts: &ContextStore,
    run_states: &dyn RunStateStore,
    subject_id: &SubjectId,
    context: ConversationContext,
    outcome: ExecutorOutcome,
) -> Result<TurnResult> {
    let Some(serialized_state) = outcome.serialized_state.as_deref() else {
        // Contract violation: approvals without a checkpoint cannot be
        // resumed, so fold this into the recovered-error path.
        tracing::error!(
            subject_id = subject_id.as_str(),
            reason_code = "executor_missing_checkpoint",
            "executor reported approvals without a checkpoint"
        );
        contexts.save_context(subject_id, context).await;
        return Ok(TurnResult::fixed(
            APOLOGY_RESPONSE,
            TurnStatus::RecoveredError,
        ));
    };
    run_states.save_state(subject_id, serialized_state).await?;
    contexts.save_context(subject_id, context).await;
    tracing::info!(
        subject_id = subject_id.as_str(),
        pending = outcome.pending_approvals.len(),
        reason_code = "turn_awaiting_approvals",
        "turn interrupted for tool approvals"
    );
    Ok(TurnResult {
        status: TurnStatus::AwaitingApprovals,
        response: None,
        new_items: Vec::new(),
        pending_approvals: outcome.pending_approvals,
        current_agent_label: outcome.current_agent_label,
    })
}

pub(crate) async fn run_with_budget(
    executor: &dyn AgentExecutor,
    input: ExecutorInput<'_>,
    context: &ConversationContext,
    options: &TurnOptions,
) -> Result<ExecutorOutcome, ExecutorError> {
    match options.timeout_ms {
        Some(budget_ms) => {
            match tokio::time::timeout(
                Duration::from_millis(budget_ms),
                executor.run(input, context, options),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ExecutorError::Failed(anyhow!(
                    "executor exceeded {budget_ms}ms budget"
                ))),
            }
        }
        None => executor.run(input, context, options).await,
    }
}

/// Shared completion path for ordinary turns and resumed approvals: append
/// produced items, persist context, drop the now-stale checkpoint.
pub(crate) async fn complete_turn(
    contexts: &ContextStore,
    run_states: &dyn RunStateStore,
    subject_id: &SubjectId,
    mut context: ConversationContext,
    outcome: ExecutorOutcome,
) -> Result<TurnResult> {
    context.items.extend(outcome.new_items.iter().cloned());
    contexts.save_context(subject_id, context).await;
    run_states.delete_state(subject_id).await?;

    let response = outcome
        .final_output_text
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| APOLOGY_RESPONSE.to_string());
    Ok(TurnResult {
        status: TurnStatus::Completed,
        response: Some(response),
        new_items: outcome.new_items,
        pending_approvals: Vec::new(),
        current_agent_label: outcome.current_agent_label,
    })
}

/// Auxiliary, non-conversational greeting generation under the short budget.
/// Never touches the stores; any failure falls back to the canned line.
pub async fn generate_greeting(
    executor: &dyn AgentExecutor,
    context: &ConversationContext,
) -> String {
    let options = TurnOptions::auxiliary();
    let input = ExecutorInput {
        user_text: "Greet the caller and offer help in one short sentence.",
        prior_state: None,
    };
    match run_with_budget(executor, input, context, &options).await {
        Ok(outcome) if outcome.pending_approvals.is_empty() => outcome
            .final_output_text
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GREETING.to_string()),
        Ok(_) => DEFAULT_GREETING.to_string(),
        Err(error) => {
            tracing::warn!(
                reason_code = "greeting_generation_failed",
                error = %error,
                "greeting generation failed; using default"
            );
            DEFAULT_GREETING.to_string()
        }
    }
}
