//! Session lifecycle: explicit termination and idle bulk expiry.

use std::sync::Arc;

use anyhow::Result;

use vox_core::current_unix_timestamp_ms;
use vox_identity::SubjectId;

use crate::{ContextStore, RunStateStore};

#[derive(Debug, Clone)]
/// Tuning for the idle sweep.
pub struct SessionLifecycleConfig {
    /// Contexts idle longer than this are expired by `sweep`.
    pub idle_max_ms: u64,
    /// Run-state records older than this are expired by `sweep`.
    pub run_state_max_age_ms: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Counters produced by one sweep pass.
pub struct SweepSummary {
    pub expired_contexts: usize,
    pub expired_run_states: usize,
}

/// Owns end-session and sweeping across both stores. Constructed once at
/// startup and injected wherever termination is triggered.
pub struct SessionLifecycle {
    contexts: Arc<ContextStore>,
    run_states: Arc<dyn RunStateStore>,
    config: SessionLifecycleConfig,
}

impl SessionLifecycle {
    pub fn new(
        contexts: Arc<ContextStore>,
        run_states: Arc<dyn RunStateStore>,
        config: SessionLifecycleConfig,
    ) -> Self {
        Self {
            contexts,
            run_states,
            config,
        }
    }

    /// Removes the subject's context and run-state. Safe on unknown subjects:
    /// the lifecycle event is still emitted with zeroed counters.
    pub async fn end_session(&self, subject_id: &SubjectId) -> Result<()> {
        let removed = self.contexts.remove(subject_id).await;
        self.run_states.delete_state(subject_id).await?;

        let (duration_ms, message_count) = removed
            .map(|context| {
                (
                    current_unix_timestamp_ms()
                        .saturating_sub(context.session_start_unix_ms()),
                    context.message_count(),
                )
            })
            .unwrap_or((0, 0));
        tracing::info!(
            subject_id = subject_id.as_str(),
            duration_ms,
            message_count,
            reason_code = "session_ended",
            "session ended"
        );
        Ok(())
    }

    /// Expires idle contexts and aged run-state in bulk.
    pub async fn sweep(&self) -> Result<SweepSummary> {
        let mut summary = SweepSummary::default();
        for subject_id in self.contexts.idle_subjects(self.config.idle_max_ms).await {
            if self.contexts.remove(&subject_id).await.is_some() {
                summary.expired_contexts = summary.expired_contexts.saturating_add(1);
            }
            self.run_states.delete_state(&subject_id).await?;
        }
        summary.expired_run_states = self
            .run_states
            .cleanup_old_states(self.config.run_state_max_age_ms)
            .await?;
        tracing::info!(
            expired_contexts = summary.expired_contexts,
            expired_run_states = summary.expired_run_states,
            reason_code = "session_sweep_completed",
            "idle sweep completed"
        );
        Ok(summary)
    }
}
