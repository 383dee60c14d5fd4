//! Voice chunk pacing: buffer streamed fragments into TTS-ready chunks
//! under a latency ceiling.

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Clause-boundary search window at the tail of a max-size chunk.
const BOUNDARY_WINDOW: usize = 20;

#[derive(Debug, Clone)]
/// Tuning for [`VoicePacer`].
pub struct VoicePacingConfig {
    /// Buffer at least this much text before emitting mid-stream.
    pub min_chunk_chars: usize,
    /// Hard cap per emitted chunk.
    pub max_chunk_chars: usize,
    /// Ceiling on the artificial inter-chunk delay; a chunk that is ready
    /// late ships immediately.
    pub max_inter_chunk_delay: Duration,
}

impl Default for VoicePacingConfig {
    fn default() -> Self {
        Self {
            min_chunk_chars: 60,
            max_chunk_chars: 200,
            max_inter_chunk_delay: Duration::from_millis(400),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One pacing-sized fragment for the TTS transport. The terminal marker has
/// empty text and `last = true` so the transport can close out the turn.
pub struct VoiceChunk {
    pub text: String,
    pub last: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Counters from one paced turn.
pub struct VoicePacerSummary {
    pub content_chunks: usize,
    pub content_chars: usize,
}

/// Streams executor text fragments into paced TTS chunks.
pub struct VoicePacer {
    config: VoicePacingConfig,
}

impl VoicePacer {
    pub fn new(config: VoicePacingConfig) -> Self {
        Self { config }
    }

    /// Consumes `fragments` exactly once, emitting content chunks followed by
    /// the terminal marker.
    pub async fn pace<S>(
        &self,
        mut fragments: S,
        sink: mpsc::Sender<VoiceChunk>,
    ) -> Result<VoicePacerSummary>
    where
        S: Stream<Item = String> + Unpin,
    {
        let mut summary = VoicePacerSummary::default();
        let mut buffer = String::new();
        let mut last_emit: Option<Instant> = None;

        while let Some(fragment) = fragments.next().await {
            buffer.push_str(&fragment);
            while buffer.chars().count() >= self.config.min_chunk_chars {
                let chunk = carve_chunk(&mut buffer, self.config.max_chunk_chars);
                // Whitespace runs never reach the TTS transport.
                if chunk.trim().is_empty() {
                    continue;
                }
                self.emit(&sink, chunk, &mut last_emit, &mut summary).await?;
            }
        }
        while !buffer.trim().is_empty() {
            let chunk = carve_chunk(&mut buffer, self.config.max_chunk_chars);
            if chunk.trim().is_empty() {
                continue;
            }
            self.emit(&sink, chunk, &mut last_emit, &mut summary).await?;
        }

        sink.send(VoiceChunk {
            text: String::new(),
            last: true,
        })
        .await
        .context("voice sink closed before terminal chunk")?;
        tracing::debug!(
            content_chunks = summary.content_chunks,
            content_chars = summary.content_chars,
            "voice pacing finished"
        );
        Ok(summary)
    }

    async fn emit(
        &self,
        sink: &mpsc::Sender<VoiceChunk>,
        text: String,
        last_emit: &mut Option<Instant>,
        summary: &mut VoicePacerSummary,
    ) -> Result<()> {
        if let Some(previous) = *last_emit {
            let since_last = previous.elapsed();
            if since_last < self.config.max_inter_chunk_delay {
                tokio::time::sleep(self.config.max_inter_chunk_delay - since_last).await;
            }
        }
        summary.content_chunks = summary.content_chunks.saturating_add(1);
        summary.content_chars = summary.content_chars.saturating_add(text.chars().count());
        sink.send(VoiceChunk { text, last: false })
            .await
            .context("voice sink closed mid-turn")?;
        *last_emit = Some(Instant::now());
        Ok(())
    }
}

/// Removes and returns up to `max_chars` from the front of `buffer`,
/// preferring a clause or whitespace break within the tail window.
fn carve_chunk(buffer: &mut String, max_chars: usize) -> String {
    let chars: Vec<char> = buffer.chars().collect();
    let take = if chars.len() <= max_chars {
        chars.len()
    } else {
        let search_start = max_chars.saturating_sub(BOUNDARY_WINDOW);
        let mut cut = max_chars;
        for offset in (search_start..max_chars).rev() {
            if is_break_char(chars[offset]) {
                cut = offset + 1;
                break;
            }
        }
        cut
    };
    let chunk: String = chars[..take].iter().collect();
    *buffer = chars[take..].iter().collect();
    chunk
}

fn is_break_char(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '.' | '!' | '?' | ';' | ',' | ':')
}
