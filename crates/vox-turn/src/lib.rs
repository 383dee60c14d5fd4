//! Turn processing for the Vox session manager.
//!
//! Drives one conversational turn against an external agent executor, pauses
//! on tool-approval gates, and resumes interrupted runs once decisions arrive.
//! The executor itself is a black box behind [`AgentExecutor`]; its serialized
//! checkpoint is never interpreted here.

mod approvals;
mod executor;
mod orchestrator;

pub use approvals::{
    parse_approval_submission, ApprovalCoordinator, ApprovalError, ApprovalSubmission,
};
pub use executor::{
    AgentExecutor, ApprovalDecision, ExecutorError, ExecutorInput, ExecutorOutcome,
    PendingApproval, TurnOptions,
};
pub use orchestrator::{generate_greeting, TurnOrchestrator, TurnResult, TurnStatus};

/// Reply for an empty or whitespace-only user message.
pub const REPEAT_REQUEST_RESPONSE: &str =
    "I'm sorry, I didn't catch that. Could you say it again?";

/// Generic recovery reply when the executor failed or produced no text.
pub const APOLOGY_RESPONSE: &str =
    "I'm sorry, something went wrong on our end. Please try again in a moment.";

/// Reply when the customer declines a pending tool approval.
pub const REJECTED_RESPONSE: &str =
    "I understand you don't want me to proceed. Is there anything else I can help you with?";

/// Canned greeting used when the auxiliary greeting generation is slow or fails.
pub const DEFAULT_GREETING: &str = "Thanks for reaching out! How can I help you today?";
