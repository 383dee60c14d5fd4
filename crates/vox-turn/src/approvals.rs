//! Resumption of interrupted turns once approval decisions arrive.

use std::sync::Arc;

use anyhow::{bail, Result};
use serde_json::Value;
use thiserror::Error;

use vox_identity::SubjectId;
use vox_session::{ContextStore, ConversationItem, ItemRole, RunStateStore};

use crate::executor::{AgentExecutor, ApprovalDecision, ExecutorError, TurnOptions};
use crate::orchestrator::{complete_turn, suspend_for_approvals, TurnResult, TurnStatus};
use crate::{APOLOGY_RESPONSE, REJECTED_RESPONSE};

#[derive(Debug, Error)]
/// Failures surfaced by approval handling. `NoPendingState` is the expected
/// outcome for double submissions, timeouts, and unknown subjects; callers
/// treat it as user-correctable, not as a crash.
pub enum ApprovalError {
    #[error("no pending run-state for subject")]
    NoPendingState,
    #[error("stored run-state could not be decoded")]
    CorruptedState,
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
/// Validated approval submission from the external channel layer.
pub struct ApprovalSubmission {
    pub subject_id: SubjectId,
    pub decisions: Vec<ApprovalDecision>,
}

/// Validates the raw submission shape before it reaches the coordinator:
/// `{ "subjectId": string, "decisions": [{ "toolCallId": string, "approved": bool }] }`.
pub fn parse_approval_submission(value: &Value) -> Result<ApprovalSubmission> {
    let Some(object) = value.as_object() else {
        bail!("approval submission must be a JSON object");
    };
    let subject_id = object
        .get("subjectId")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(SubjectId::new);
    let Some(subject_id) = subject_id else {
        bail!("approval submission requires a non-empty subjectId");
    };
    let Some(raw_decisions) = object.get("decisions").and_then(Value::as_array) else {
        bail!("approval submission requires a decisions array");
    };
    if raw_decisions.is_empty() {
        bail!("approval submission requires at least one decision");
    }
    let mut decisions = Vec::with_capacity(raw_decisions.len());
    for (index, raw) in raw_decisions.iter().enumerate() {
        let tool_call_id = raw
            .get("toolCallId")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty());
        let approved = raw.get("approved").and_then(Value::as_bool);
        match (tool_call_id, approved) {
            (Some(tool_call_id), Some(approved)) => decisions.push(ApprovalDecision {
                tool_call_id: tool_call_id.to_string(),
                approved,
            }),
            _ => bail!("decision {index} is missing toolCallId or approved"),
        }
    }
    Ok(ApprovalSubmission {
        subject_id,
        decisions,
    })
}

/// Resumes a turn that paused on tool-approval gates.
pub struct ApprovalCoordinator {
    contexts: Arc<ContextStore>,
    run_states: Arc<dyn RunStateStore>,
}

impl ApprovalCoordinator {
    pub fn new(contexts: Arc<ContextStore>, run_states: Arc<dyn RunStateStore>) -> Self {
        Self {
            contexts,
            run_states,
        }
    }

    pub async fn handle_approvals(
        &self,
        subject_id: &SubjectId,
        decisions: &[ApprovalDecision],
        executor: &dyn AgentExecutor,
        options: &TurnOptions,
    ) -> Result<TurnResult, ApprovalError> {
        let Some(serialized_state) = self.run_states.load_state(subject_id).await else {
            return Err(ApprovalError::NoPendingState);
        };

        if decisions.iter().any(|decision| !decision.approved) {
            // A rejection terminates this branch of execution outright.
            self.run_states.delete_state(subject_id).await?;
            let mut context = self.contexts.get_context(subject_id).await;
            context
                .items
                .push(ConversationItem::new(ItemRole::Assistant, REJECTED_RESPONSE));
            self.contexts.save_context(subject_id, context).await;
            tracing::info!(
                subject_id = subject_id.as_str(),
                reason_code = "approvals_rejected",
                "customer declined pending tool approvals"
            );
            return Ok(TurnResult {
                status: TurnStatus::Completed,
                response: Some(REJECTED_RESPONSE.to_string()),
                new_items: Vec::new(),
                pending_approvals: Vec::new(),
                current_agent_label: None,
            });
        }

        let context = self.contexts.get_context(subject_id).await;
        match executor
            .resume(&serialized_state, decisions, &context, options)
            .await
        {
            Ok(outcome) if !outcome.pending_approvals.is_empty() => {
                // A resumed run can hit another gate; park it again.
                Ok(suspend_for_approvals(
                    &self.contexts,
                    self.run_states.as_ref(),
                    subject_id,
                    context,
                    outcome,
                )
                .await?)
            }
            Ok(outcome) => Ok(complete_turn(
                &self.contexts,
                self.run_states.as_ref(),
                subject_id,
                context,
                outcome,
            )
            .await?),
            Err(ExecutorError::CorruptedState) => {
                // Corruption can never be satisfied by retrying; drop the record.
                self.run_states.delete_state(subject_id).await?;
                tracing::error!(
                    subject_id = subject_id.as_str(),
                    reason_code = "run_state_corrupted",
                    "stored checkpoint undecodable; deleted"
                );
                Err(ApprovalError::CorruptedState)
            }
            Err(ExecutorError::Failed(error)) => {
                // The approvals may already be partially applied; resuming the
                // same checkpoint again risks double side effects.
                self.run_states.delete_state(subject_id).await?;
                tracing::warn!(
                    subject_id = subject_id.as_str(),
                    reason_code = "resume_failed",
                    error = %error,
                    "resumption failed; checkpoint deleted"
                );
                self.contexts.save_context(subject_id, context).await;
                Ok(TurnResult {
                    status: TurnStatus::RecoveredError,
                    response: Some(APOLOGY_RESPONSE.to_string()),
                    new_items: Vec::new(),
                    pending_approvals: Vec::new(),
                    current_agent_label: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use vox_session::{ConversationContext, MemoryRunStateStore, DEFAULT_RUN_STATE_MAX_AGE_MS};

    use super::*;
    use crate::executor::{ExecutorInput, ExecutorOutcome, PendingApproval};

    struct ResumeExecutor {
        outcome: Mutex<Option<Result<ExecutorOutcome, ExecutorError>>>,
        resume_calls: Mutex<usize>,
    }

    impl ResumeExecutor {
        fn new(outcome: Result<ExecutorOutcome, ExecutorError>) -> Self {
            Self {
                outcome: Mutex::new(Some(outcome)),
                resume_calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl AgentExecutor for ResumeExecutor {
        async fn run(
            &self,
            _input: ExecutorInput<'_>,
            _context: &ConversationContext,
            _options: &TurnOptions,
        ) -> Result<ExecutorOutcome, ExecutorError> {
            Ok(ExecutorOutcome::default())
        }

        async fn resume(
            &self,
            _serialized_state: &str,
            _decisions: &[ApprovalDecision],
            _context: &ConversationContext,
            _options: &TurnOptions,
        ) -> Result<ExecutorOutcome, ExecutorError> {
            *self.resume_calls.lock().expect("calls") += 1;
            self.outcome
                .lock()
                .expect("outcome")
                .take()
                .unwrap_or(Ok(ExecutorOutcome::default()))
        }
    }

    fn harness() -> (
        Arc<ContextStore>,
        Arc<MemoryRunStateStore>,
        ApprovalCoordinator,
    ) {
        let contexts = Arc::new(ContextStore::new());
        let run_states = Arc::new(MemoryRunStateStore::new(DEFAULT_RUN_STATE_MAX_AGE_MS));
        let coordinator = ApprovalCoordinator::new(
            Arc::clone(&contexts),
            Arc::clone(&run_states) as Arc<dyn RunStateStore>,
        );
        (contexts, run_states, coordinator)
    }

    fn subject() -> SubjectId {
        SubjectId::new("phone_+14155550100")
    }

    fn approve(tool_call_id: &str) -> ApprovalDecision {
        ApprovalDecision {
            tool_call_id: tool_call_id.to_string(),
            approved: true,
        }
    }

    fn reject(tool_call_id: &str) -> ApprovalDecision {
        ApprovalDecision {
            tool_call_id: tool_call_id.to_string(),
            approved: false,
        }
    }

    #[tokio::test]
    async fn fails_fast_without_pending_state() {
        let (_, _, coordinator) = harness();
        let executor = ResumeExecutor::new(Ok(ExecutorOutcome::default()));
        let result = coordinator
            .handle_approvals(
                &subject(),
                &[approve("t-1")],
                &executor,
                &TurnOptions::default(),
            )
            .await;
        assert!(matches!(result, Err(ApprovalError::NoPendingState)));
        assert_eq!(*executor.resume_calls.lock().expect("calls"), 0);
    }

    #[tokio::test]
    async fn rejection_never_invokes_executor_and_deletes_state() {
        let (contexts, run_states, coordinator) = harness();
        run_states.save_state(&subject(), "ckpt").await.expect("seed");
        let executor = ResumeExecutor::new(Ok(ExecutorOutcome::default()));

        let result = coordinator
            .handle_approvals(
                &subject(),
                &[approve("t-1"), reject("t-2")],
                &executor,
                &TurnOptions::default(),
            )
            .await
            .expect("handled");

        assert_eq!(result.response.as_deref(), Some(REJECTED_RESPONSE));
        assert_eq!(*executor.resume_calls.lock().expect("calls"), 0);
        assert_eq!(run_states.load_state(&subject()).await, None);
        assert_eq!(contexts.get_context(&subject()).await.message_count(), 1);
    }

    #[tokio::test]
    async fn approval_resumes_and_completes() {
        let (contexts, run_states, coordinator) = harness();
        run_states.save_state(&subject(), "ckpt").await.expect("seed");
        let outcome = ExecutorOutcome {
            final_output_text: Some("Refund issued.".to_string()),
            new_items: vec![ConversationItem::assistant("Refund issued.")],
            ..ExecutorOutcome::default()
        };
        let executor = ResumeExecutor::new(Ok(outcome));

        let result = coordinator
            .handle_approvals(
                &subject(),
                &[approve("t-1")],
                &executor,
                &TurnOptions::default(),
            )
            .await
            .expect("handled");

        assert_eq!(result.status, TurnStatus::Completed);
        assert_eq!(result.response.as_deref(), Some("Refund issued."));
        assert_eq!(run_states.load_state(&subject()).await, None);
        assert_eq!(contexts.get_context(&subject()).await.message_count(), 1);
    }

    #[tokio::test]
    async fn corrupted_checkpoint_is_deleted_and_reported() {
        let (_, run_states, coordinator) = harness();
        run_states
            .save_state(&subject(), "garbage")
            .await
            .expect("seed");
        let executor = ResumeExecutor::new(Err(ExecutorError::CorruptedState));

        let result = coordinator
            .handle_approvals(
                &subject(),
                &[approve("t-1")],
                &executor,
                &TurnOptions::default(),
            )
            .await;
        assert!(matches!(result, Err(ApprovalError::CorruptedState)));
        assert_eq!(run_states.load_state(&subject()).await, None);
    }

    #[tokio::test]
    async fn resume_failure_deletes_state_and_recovers() {
        let (_, run_states, coordinator) = harness();
        run_states.save_state(&subject(), "ckpt").await.expect("seed");
        let executor =
            ResumeExecutor::new(Err(ExecutorError::Failed(anyhow::anyhow!("tool blew up"))));

        let result = coordinator
            .handle_approvals(
                &subject(),
                &[approve("t-1")],
                &executor,
                &TurnOptions::default(),
            )
            .await
            .expect("handled");

        assert_eq!(result.status, TurnStatus::RecoveredError);
        assert_eq!(result.response.as_deref(), Some(APOLOGY_RESPONSE));
        assert_eq!(run_states.load_state(&subject()).await, None);
    }

    #[tokio::test]
    async fn resumed_run_can_interrupt_again() {
        let (_, run_states, coordinator) = harness();
        run_states.save_state(&subject(), "ckpt-1").await.expect("seed");
        let outcome = ExecutorOutcome {
            pending_approvals: vec![PendingApproval {
                tool_call_id: "t-2".to_string(),
                required: true,
            }],
            serialized_state: Some("ckpt-2".to_string()),
            ..ExecutorOutcome::default()
        };
        let executor = ResumeExecutor::new(Ok(outcome));

        let result = coordinator
            .handle_approvals(
                &subject(),
                &[approve("t-1")],
                &executor,
                &TurnOptions::default(),
            )
            .await
            .expect("handled");

        assert!(result.awaiting_approvals());
        assert_eq!(
            run_states.load_state(&subject()).await.as_deref(),
            Some("ckpt-2")
        );
    }

    #[test]
    fn submission_parsing_enforces_shape() {
        let valid = json!({
            "subjectId": "phone_+14155550100",
            "decisions": [{ "toolCallId": "t-1", "approved": true }]
        });
        let parsed = parse_approval_submission(&valid).expect("parse");
        assert_eq!(parsed.subject_id.as_str(), "phone_+14155550100");
        assert_eq!(parsed.decisions.len(), 1);

        assert!(parse_approval_submission(&json!({ "decisions": [] })).is_err());
        assert!(parse_approval_submission(&json!({
            "subjectId": "s",
            "decisions": "yes"
        }))
        .is_err());
        assert!(parse_approval_submission(&json!({
            "subjectId": "s",
            "decisions": [{ "toolCallId": "t-1" }]
        }))
        .is_err());
        assert!(parse_approval_submission(&json!("nope")).is_err());
    }
}
