//! Vox console: wires the session-continuity stack together and drives it
//! from stdin against the dry-run executor.
//!
//! Commands: plain text sends a turn; `/approve` and `/reject` answer a
//! pending tool approval; `/end` terminates the session; `/sweep` runs the
//! idle sweep; `/quit` exits.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use vox_framing::{segment_sms, VoicePacer, VoicePacingConfig};
use vox_identity::{resolver_for_strategy, ResolverStrategy, SubjectId, SubjectResolver};
use vox_session::{
    resolve_run_state_backend, ContextStore, FileRunStateStore, MemoryRunStateStore,
    RunStateBackend, RunStateStore, SessionLifecycle, SessionLifecycleConfig,
    DEFAULT_RUN_STATE_MAX_AGE_MS,
};
use vox_turn::{
    parse_approval_submission, ApprovalCoordinator, ApprovalError, TurnOptions, TurnOrchestrator,
    TurnResult,
};

mod dry_run;

use dry_run::DryRunExecutor;

const DEFAULT_IDLE_MAX_MS: u64 = 30 * 60 * 1_000;

#[derive(Debug, Parser)]
#[command(name = "vox", about = "Conversation session manager console")]
struct Args {
    /// Directory for the phone map and run-state records.
    #[arg(long, env = "VOX_STATE_DIR", default_value = ".vox")]
    state_dir: std::path::PathBuf,

    /// Run-state backend: auto|file|memory.
    #[arg(long, env = "VOX_RUN_STATE_BACKEND", default_value = "auto")]
    run_state_backend: String,

    /// Run-state records older than this are treated as absent.
    #[arg(long, env = "VOX_RUN_STATE_MAX_AGE_MS", default_value_t = DEFAULT_RUN_STATE_MAX_AGE_MS)]
    run_state_max_age_ms: u64,

    /// Subject resolver strategy: phone|identity-graph.
    #[arg(long, env = "VOX_RESOLVER_STRATEGY", default_value = "phone")]
    resolver_strategy: String,

    /// Output framing: sms|voice.
    #[arg(long, env = "VOX_CHANNEL", default_value = "sms")]
    channel: String,

    /// Contexts idle longer than this are expired by /sweep.
    #[arg(long, env = "VOX_IDLE_MAX_MS", default_value_t = DEFAULT_IDLE_MAX_MS)]
    idle_max_ms: u64,

    /// Simulated caller number for this console session.
    #[arg(long, default_value = "(415) 555-0100")]
    phone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Sms,
    Voice,
}

fn parse_channel(raw: &str) -> Result<Channel> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "sms" => Ok(Channel::Sms),
        "voice" => Ok(Channel::Voice),
        other => bail!("unsupported channel '{other}' (expected sms|voice)"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let channel = parse_channel(&args.channel)?;
    let strategy = ResolverStrategy::parse(&args.resolver_strategy)?;

    let resolved_backend = resolve_run_state_backend(&args.run_state_backend)?;
    tracing::info!(
        backend = resolved_backend.backend.as_str(),
        reason_code = resolved_backend.reason_code,
        "run-state backend selected"
    );
    let run_states: Arc<dyn RunStateStore> = match resolved_backend.backend {
        RunStateBackend::File => Arc::new(FileRunStateStore::new(
            args.state_dir.join("run-state"),
            args.run_state_max_age_ms,
        )),
        RunStateBackend::Memory => Arc::new(MemoryRunStateStore::new(args.run_state_max_age_ms)),
    };
    run_states.init().await?;

    // The console has no identity-graph client; only the phone strategy is
    // wired here. Service deployments inject their client before this call.
    let resolver: Arc<dyn SubjectResolver> =
        resolver_for_strategy(strategy, &args.state_dir, None)?;

    let contexts = Arc::new(ContextStore::new());
    let orchestrator = TurnOrchestrator::new(Arc::clone(&contexts), Arc::clone(&run_states));
    let coordinator = ApprovalCoordinator::new(Arc::clone(&contexts), Arc::clone(&run_states));
    let lifecycle = SessionLifecycle::new(
        Arc::clone(&contexts),
        Arc::clone(&run_states),
        SessionLifecycleConfig {
            idle_max_ms: args.idle_max_ms,
            run_state_max_age_ms: args.run_state_max_age_ms,
        },
    );
    let executor = DryRunExecutor;
    let options = TurnOptions::default();

    let mut metadata = json!({ "From": args.phone })
        .as_object()
        .cloned()
        .context("metadata object")?;
    let subject_id = resolver.resolve(&mut metadata).await?;
    tracing::info!(subject_id = subject_id.as_str(), "console session resolved");
    println!("connected as {subject_id}; type a message, or /approve, /reject, /end, /sweep, /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        match line.as_str() {
            "" => continue,
            "/quit" => break,
            "/end" => {
                lifecycle.end_session(&subject_id).await?;
                println!("session ended");
            }
            "/sweep" => {
                let summary = lifecycle.sweep().await?;
                println!(
                    "sweep: contexts={} run_states={}",
                    summary.expired_contexts, summary.expired_run_states
                );
            }
            "/approve" | "/reject" => {
                let result = submit_decision(
                    &coordinator,
                    &subject_id,
                    line == "/approve",
                    &executor,
                    &options,
                )
                .await;
                match result {
                    Ok(turn) => render(channel, &turn).await?,
                    Err(ApprovalError::NoPendingState) => {
                        println!("nothing is waiting for approval");
                    }
                    Err(ApprovalError::CorruptedState) => {
                        println!("the pending request could not be restored; please start over");
                    }
                    Err(ApprovalError::Persistence(error)) => return Err(error),
                }
            }
            text => {
                let turn = orchestrator
                    .process_turn(&subject_id, text, &executor, &options)
                    .await?;
                render(channel, &turn).await?;
            }
        }
    }
    Ok(())
}

async fn submit_decision(
    coordinator: &ApprovalCoordinator,
    subject_id: &SubjectId,
    approved: bool,
    executor: &DryRunExecutor,
    options: &TurnOptions,
) -> Result<TurnResult, ApprovalError> {
    // Round-trip through the external submission shape so the console
    // exercises the same validation path as a channel webhook would.
    let submission = parse_approval_submission(&json!({
        "subjectId": subject_id.as_str(),
        "decisions": [{ "toolCallId": "dry-run-refund-1", "approved": approved }]
    }))?;
    coordinator
        .handle_approvals(
            &submission.subject_id,
            &submission.decisions,
            executor,
            options,
        )
        .await
}

async fn render(channel: Channel, turn: &TurnResult) -> Result<()> {
    if turn.awaiting_approvals() {
        for approval in &turn.pending_approvals {
            println!(
                "approval needed for tool call {} (reply /approve or /reject)",
                approval.tool_call_id
            );
        }
        return Ok(());
    }
    let Some(response) = turn.response.as_deref() else {
        return Ok(());
    };
    match channel {
        Channel::Sms => {
            for segment in segment_sms(response) {
                println!("SMS> {segment}");
            }
        }
        Channel::Voice => {
            let pacer = VoicePacer::new(VoicePacingConfig::default());
            let fragments: Vec<String> = response
                .split_inclusive(' ')
                .map(str::to_string)
                .collect();
            let (sink, mut source) = mpsc::channel(64);
            let pace = tokio::spawn(async move {
                pacer.pace(tokio_stream::iter(fragments), sink).await
            });
            while let Some(chunk) = source.recv().await {
                if chunk.last {
                    println!("VOICE> <end of turn>");
                } else {
                    println!("VOICE> {}", chunk.text);
                }
            }
            pace.await.context("voice pacing task panicked")??;
        }
    }
    Ok(())
}
