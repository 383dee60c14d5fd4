//! Durable run-state persistence behind a storage-agnostic interface.
//!
//! The checkpoint payload is an uninterpreted string owned by the agent
//! executor; this layer only wraps it with a conversation id and a write
//! timestamp, and ages it out.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use vox_core::{age_exceeds_ms, current_unix_timestamp_ms, write_text_atomic};
use vox_identity::SubjectId;

/// Run-state older than this is treated as abandoned: 24 hours.
pub const DEFAULT_RUN_STATE_MAX_AGE_MS: u64 = 24 * 60 * 60 * 1_000;

const SLOW_OPERATION_WARN_MS: u128 = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunStateRecord {
    conversation_id: String,
    state_string: String,
    timestamp: u64,
}

#[async_trait]
/// Backend-agnostic interface every concrete run-state store implements.
///
/// Read failures degrade to `None` so a storage hiccup looks like "never
/// interrupted"; write and delete failures propagate because silently losing
/// a checkpoint is worse than surfacing the error.
pub trait RunStateStore: Send + Sync {
    async fn init(&self) -> Result<()>;
    async fn save_state(&self, subject_id: &SubjectId, serialized: &str) -> Result<()>;
    async fn load_state(&self, subject_id: &SubjectId) -> Option<String>;
    async fn delete_state(&self, subject_id: &SubjectId) -> Result<()>;
    async fn cleanup_old_states(&self, max_age_ms: u64) -> Result<usize>;
}

/// Mandatory durable backend: one JSON record file per subject.
pub struct FileRunStateStore {
    dir: PathBuf,
    max_age_ms: u64,
}

impl FileRunStateStore {
    pub fn new(dir: impl Into<PathBuf>, max_age_ms: u64) -> Self {
        Self {
            dir: dir.into(),
            max_age_ms,
        }
    }

    fn record_path(&self, subject_id: &SubjectId) -> PathBuf {
        self.dir
            .join(format!("{}.json", sanitize_subject_component(subject_id)))
    }
}

#[async_trait]
impl RunStateStore for FileRunStateStore {
    async fn init(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!("failed to create run-state directory {}", self.dir.display())
        })?;
        Ok(())
    }

    async fn save_state(&self, subject_id: &SubjectId, serialized: &str) -> Result<()> {
        let started = Instant::now();
        let record = RunStateRecord {
            conversation_id: subject_id.as_str().to_string(),
            state_string: serialized.to_string(),
            timestamp: current_unix_timestamp_ms(),
        };
        let rendered =
            serde_json::to_string(&record).context("failed to serialize run-state record")?;
        write_text_atomic(&self.record_path(subject_id), &rendered)?;
        warn_if_slow("save_state", started);
        Ok(())
    }

    async fn load_state(&self, subject_id: &SubjectId) -> Option<String> {
        let started = Instant::now();
        let path = self.record_path(subject_id);
        let state = read_record_tolerant(&path).and_then(|record| {
            let now = current_unix_timestamp_ms();
            if age_exceeds_ms(record.timestamp, now, self.max_age_ms) {
                tracing::info!(
                    subject_id = subject_id.as_str(),
                    reason_code = "run_state_expired",
                    "run-state past max age; treating as absent"
                );
                None
            } else {
                Some(record.state_string)
            }
        });
        warn_if_slow("load_state", started);
        state
    }

    async fn delete_state(&self, subject_id: &SubjectId) -> Result<()> {
        let started = Instant::now();
        let path = self.record_path(subject_id);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to delete run-state {}", path.display()));
            }
        }
        warn_if_slow("delete_state", started);
        Ok(())
    }

    async fn cleanup_old_states(&self, max_age_ms: u64) -> Result<usize> {
        let started = Instant::now();
        if !self.dir.exists() {
            return Ok(0);
        }
        let entries = std::fs::read_dir(&self.dir).with_context(|| {
            format!("failed to read run-state directory {}", self.dir.display())
        })?;
        let now = current_unix_timestamp_ms();
        let mut removed = 0usize;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let expired = match read_record_tolerant(&path) {
                Some(record) => age_exceeds_ms(record.timestamp, now, max_age_ms),
                // Unreadable records can never be resumed; sweep them too.
                None => true,
            };
            if expired {
                std::fs::remove_file(&path).with_context(|| {
                    format!("failed to delete expired run-state {}", path.display())
                })?;
                removed = removed.saturating_add(1);
            }
        }
        warn_if_slow("cleanup_old_states", started);
        Ok(removed)
    }
}

fn read_record_tolerant(path: &std::path::Path) -> Option<RunStateRecord> {
    if !path.exists() {
        return None;
    }
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                reason_code = "run_state_read_failed",
                error = %error,
                "run-state read failed; treating as absent"
            );
            return None;
        }
    };
    match serde_json::from_str::<RunStateRecord>(&raw) {
        Ok(record) => Some(record),
        Err(error) => {
            tracing::warn!(
                path = %path.display(),
                reason_code = "run_state_parse_failed",
                error = %error,
                "run-state record unreadable; treating as absent"
            );
            None
        }
    }
}

fn warn_if_slow(operation: &str, started: Instant) {
    let elapsed_ms = started.elapsed().as_millis();
    if elapsed_ms > SLOW_OPERATION_WARN_MS {
        tracing::warn!(
            operation,
            elapsed_ms = elapsed_ms as u64,
            reason_code = "run_state_slow_operation",
            "run-state operation exceeded latency budget"
        );
    }
}

fn sanitize_subject_component(subject_id: &SubjectId) -> String {
    let mut normalized = String::new();
    for ch in subject_id.as_str().trim().chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            normalized.push(ch);
        } else {
            normalized.push('_');
        }
    }
    if normalized.is_empty() {
        "subject".to_string()
    } else {
        normalized
    }
}

/// Ephemeral backend for tests and single-process deployments.
pub struct MemoryRunStateStore {
    max_age_ms: u64,
    states: Mutex<HashMap<String, (u64, String)>>,
}

impl MemoryRunStateStore {
    pub fn new(max_age_ms: u64) -> Self {
        Self {
            max_age_ms,
            states: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl RunStateStore for MemoryRunStateStore {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn save_state(&self, subject_id: &SubjectId, serialized: &str) -> Result<()> {
        let mut states = self.states.lock().await;
        states.insert(
            subject_id.as_str().to_string(),
            (current_unix_timestamp_ms(), serialized.to_string()),
        );
        Ok(())
    }

    async fn load_state(&self, subject_id: &SubjectId) -> Option<String> {
        let states = self.states.lock().await;
        let (timestamp, state) = states.get(subject_id.as_str())?;
        let now = current_unix_timestamp_ms();
        if age_exceeds_ms(*timestamp, now, self.max_age_ms) {
            return None;
        }
        Some(state.clone())
    }

    async fn delete_state(&self, subject_id: &SubjectId) -> Result<()> {
        let mut states = self.states.lock().await;
        states.remove(subject_id.as_str());
        Ok(())
    }

    async fn cleanup_old_states(&self, max_age_ms: u64) -> Result<usize> {
        let mut states = self.states.lock().await;
        let now = current_unix_timestamp_ms();
        let before = states.len();
        states.retain(|_, (timestamp, _)| !age_exceeds_ms(*timestamp, now, max_age_ms));
        Ok(before.saturating_sub(states.len()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported run-state backends.
pub enum RunStateBackend {
    File,
    Memory,
}

impl RunStateBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStateBackend::File => "file",
            RunStateBackend::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone)]
/// Backend choice plus the reason it was selected, for startup logging.
pub struct ResolvedRunStateBackend {
    pub backend: RunStateBackend,
    pub reason_code: String,
}

/// Resolve the run-state backend from a config value (`auto|file|memory`).
pub fn resolve_run_state_backend(raw: &str) -> Result<ResolvedRunStateBackend> {
    let normalized = raw.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "" | "auto" | "file" => Ok(ResolvedRunStateBackend {
            backend: RunStateBackend::File,
            reason_code: if normalized == "file" {
                "run_state_backend_explicit_file".to_string()
            } else {
                "run_state_backend_default_file".to_string()
            },
        }),
        "memory" => Ok(ResolvedRunStateBackend {
            backend: RunStateBackend::Memory,
            reason_code: "run_state_backend_explicit_memory".to_string(),
        }),
        other => bail!("unsupported run-state backend '{other}' (expected auto|file|memory)"),
    }
}
