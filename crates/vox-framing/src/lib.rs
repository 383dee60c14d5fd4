//! Channel framing for agent responses.
//!
//! SMS gets size-bounded numbered segments; voice gets latency-bounded chunk
//! pacing for a text-to-speech transport. Both consume the executor's output
//! text exactly once per turn.

mod sms;
mod voice;

pub use sms::{segment_sms, SMS_MULTIPART_PAYLOAD_ESTIMATE, SMS_SINGLE_SEGMENT_MAX};
pub use voice::{VoiceChunk, VoicePacer, VoicePacerSummary, VoicePacingConfig};
