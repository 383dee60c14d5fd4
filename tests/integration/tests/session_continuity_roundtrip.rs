//! End-to-end flows across the resolver, stores, orchestrator, coordinator,
//! and framing layers, using a scripted executor and a real file-backed
//! run-state store.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;

use vox_framing::segment_sms;
use vox_identity::{
    resolver_for_strategy, ChannelMetadata, ResolverStrategy, SubjectId, SubjectResolver,
};
use vox_session::{
    ContextStore, ConversationContext, ConversationItem, FileRunStateStore, RunStateStore,
    SessionLifecycle, SessionLifecycleConfig, DEFAULT_RUN_STATE_MAX_AGE_MS,
};
use vox_turn::{
    parse_approval_submission, AgentExecutor, ApprovalCoordinator, ApprovalError,
    ExecutorError, ExecutorInput, ExecutorOutcome, PendingApproval, TurnOptions,
    TurnOrchestrator, TurnStatus, REJECTED_RESPONSE,
};

struct ScriptedExecutor {
    run_outcomes: AsyncMutex<VecDeque<ExecutorOutcome>>,
    resume_outcomes: AsyncMutex<VecDeque<ExecutorOutcome>>,
}

impl ScriptedExecutor {
    fn new(run_outcomes: Vec<ExecutorOutcome>, resume_outcomes: Vec<ExecutorOutcome>) -> Self {
        Self {
            run_outcomes: AsyncMutex::new(VecDeque::from(run_outcomes)),
            resume_outcomes: AsyncMutex::new(VecDeque::from(resume_outcomes)),
        }
    }
}

#[async_trait]
impl AgentExecutor for ScriptedExecutor {
    async fn run(
        &self,
        _input: ExecutorInput<'_>,
        _context: &ConversationContext,
        _options: &TurnOptions,
    ) -> Result<ExecutorOutcome, ExecutorError> {
        self.run_outcomes
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| ExecutorError::Failed(anyhow::anyhow!("run queue exhausted")))
    }

    async fn resume(
        &self,
        _serialized_state: &str,
        _decisions: &[vox_turn::ApprovalDecision],
        _context: &ConversationContext,
        _options: &TurnOptions,
    ) -> Result<ExecutorOutcome, ExecutorError> {
        self.resume_outcomes
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| ExecutorError::Failed(anyhow::anyhow!("resume queue exhausted")))
    }
}

fn completed(text: &str) -> ExecutorOutcome {
    ExecutorOutcome {
        final_output_text: Some(text.to_string()),
        new_items: vec![ConversationItem::assistant(text)],
        current_agent_label: Some("support".to_string()),
        ..ExecutorOutcome::default()
    }
}

fn interrupted(state: &str, tool_call_id: &str) -> ExecutorOutcome {
    ExecutorOutcome {
        pending_approvals: vec![PendingApproval {
            tool_call_id: tool_call_id.to_string(),
            required: true,
        }],
        serialized_state: Some(state.to_string()),
        ..ExecutorOutcome::default()
    }
}

struct Harness {
    _temp: tempfile::TempDir,
    resolver: Arc<dyn SubjectResolver>,
    contexts: Arc<ContextStore>,
    run_states: Arc<dyn RunStateStore>,
    orchestrator: TurnOrchestrator,
    coordinator: ApprovalCoordinator,
    lifecycle: SessionLifecycle,
}

async fn harness() -> Harness {
    let temp = tempfile::tempdir().expect("tempdir");
    let resolver = resolver_for_strategy(ResolverStrategy::Phone, temp.path(), None)
        .expect("resolver");
    let run_states: Arc<dyn RunStateStore> = Arc::new(FileRunStateStore::new(
        temp.path().join("run-state"),
        DEFAULT_RUN_STATE_MAX_AGE_MS,
    ));
    run_states.init().await.expect("init");
    let contexts = Arc::new(ContextStore::new());
    let orchestrator = TurnOrchestrator::new(Arc::clone(&contexts), Arc::clone(&run_states));
    let coordinator = ApprovalCoordinator::new(Arc::clone(&contexts), Arc::clone(&run_states));
    let lifecycle = SessionLifecycle::new(
        Arc::clone(&contexts),
        Arc::clone(&run_states),
        SessionLifecycleConfig {
            idle_max_ms: 30 * 60 * 1_000,
            run_state_max_age_ms: DEFAULT_RUN_STATE_MAX_AGE_MS,
        },
    );
    Harness {
        _temp: temp,
        resolver,
        contexts,
        run_states,
        orchestrator,
        coordinator,
        lifecycle,
    }
}

fn metadata(value: serde_json::Value) -> ChannelMetadata {
    value.as_object().expect("object").clone()
}

#[tokio::test]
async fn sms_and_voice_requests_share_one_session() {
    let h = harness().await;

    let mut sms = metadata(json!({ "From": "(415) 555-0100", "Body": "hi" }));
    let sms_subject = h.resolver.resolve(&mut sms).await.expect("resolve sms");

    let mut voice = metadata(json!({ "Caller": "+1 415 555 0100" }));
    let voice_subject = h.resolver.resolve(&mut voice).await.expect("resolve voice");

    assert_eq!(sms_subject, voice_subject);
    assert_eq!(sms_subject.as_str(), "phone_+14155550100");

    let executor = ScriptedExecutor::new(
        vec![completed("Hi! What can I do for you?"), completed("Sure thing.")],
        vec![],
    );
    h.orchestrator
        .process_turn(&sms_subject, "hello", &executor, &TurnOptions::default())
        .await
        .expect("sms turn");
    h.orchestrator
        .process_turn(&voice_subject, "one more thing", &executor, &TurnOptions::default())
        .await
        .expect("voice turn");

    // Both turns landed in the same context.
    let context = h.contexts.get_context(&sms_subject).await;
    assert_eq!(context.message_count(), 4);
}

#[tokio::test]
async fn interrupted_turn_resumes_after_approval() {
    let h = harness().await;
    let subject = SubjectId::new("phone_+14155550100");
    let executor = ScriptedExecutor::new(
        vec![interrupted("ckpt-refund", "tool-42")],
        vec![completed("Refund of $42.50 issued.")],
    );

    let first = h
        .orchestrator
        .process_turn(&subject, "refund please", &executor, &TurnOptions::default())
        .await
        .expect("turn");
    assert_eq!(first.status, TurnStatus::AwaitingApprovals);
    assert_eq!(first.response, None);
    assert_eq!(
        h.run_states.load_state(&subject).await.as_deref(),
        Some("ckpt-refund")
    );

    // The submission arrives through the external contract shape.
    let submission = parse_approval_submission(&json!({
        "subjectId": subject.as_str(),
        "decisions": [{ "toolCallId": "tool-42", "approved": true }]
    }))
    .expect("submission");

    let resumed = h
        .coordinator
        .handle_approvals(
            &submission.subject_id,
            &submission.decisions,
            &executor,
            &TurnOptions::default(),
        )
        .await
        .expect("resume");
    assert_eq!(resumed.status, TurnStatus::Completed);
    assert_eq!(resumed.response.as_deref(), Some("Refund of $42.50 issued."));
    assert_eq!(h.run_states.load_state(&subject).await, None);

    // A second submission finds nothing pending.
    let again = h
        .coordinator
        .handle_approvals(
            &submission.subject_id,
            &submission.decisions,
            &executor,
            &TurnOptions::default(),
        )
        .await;
    assert!(matches!(again, Err(ApprovalError::NoPendingState)));
}

#[tokio::test]
async fn rejected_approval_terminates_the_branch() {
    let h = harness().await;
    let subject = SubjectId::new("phone_+14155550100");
    let executor = ScriptedExecutor::new(vec![interrupted("ckpt", "tool-1")], vec![]);

    h.orchestrator
        .process_turn(&subject, "refund please", &executor, &TurnOptions::default())
        .await
        .expect("turn");

    let result = h
        .coordinator
        .handle_approvals(
            &subject,
            &[vox_turn::ApprovalDecision {
                tool_call_id: "tool-1".to_string(),
                approved: false,
            }],
            &executor,
            &TurnOptions::default(),
        )
        .await
        .expect("rejection");
    assert_eq!(result.response.as_deref(), Some(REJECTED_RESPONSE));
    assert_eq!(h.run_states.load_state(&subject).await, None);
    // The resume queue was empty; reaching it would have errored.
}

#[tokio::test]
async fn end_session_resets_context_but_keeps_identity_mapping() {
    let h = harness().await;

    let mut payload = metadata(json!({ "From": "4155550100" }));
    let subject = h.resolver.resolve(&mut payload).await.expect("resolve");

    let executor = ScriptedExecutor::new(vec![completed("Hello!")], vec![]);
    h.orchestrator
        .process_turn(&subject, "hi", &executor, &TurnOptions::default())
        .await
        .expect("turn");
    assert_eq!(h.contexts.get_context(&subject).await.message_count(), 2);

    h.lifecycle.end_session(&subject).await.expect("end");
    let fresh = h.contexts.get_context(&subject).await;
    assert_eq!(fresh.message_count(), 0);

    // Identity mapping outlives the session.
    let mut again = metadata(json!({ "From": "(415) 555-0100" }));
    let resolved = h.resolver.resolve(&mut again).await.expect("resolve again");
    assert_eq!(resolved, subject);
}

#[tokio::test]
async fn long_completed_response_frames_into_numbered_sms_segments() {
    let h = harness().await;
    let subject = SubjectId::new("phone_+14155550100");
    let long_reply = "Here is the full status of your order and the refund we discussed. "
        .repeat(6);
    let executor = ScriptedExecutor::new(vec![completed(long_reply.trim())], vec![]);

    let turn = h
        .orchestrator
        .process_turn(&subject, "status?", &executor, &TurnOptions::default())
        .await
        .expect("turn");
    let response = turn.response.expect("response");

    let segments = segment_sms(&response);
    assert!(segments.len() > 1);
    assert!(segments[0].starts_with(&format!("Part 1/{}: ", segments.len())));
    for segment in &segments {
        assert!(segment.chars().count() <= 160);
    }
}
