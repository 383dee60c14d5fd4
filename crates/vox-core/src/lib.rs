//! Foundational low-level utilities shared across Vox crates.
//!
//! Provides atomic file-write helpers and millisecond time utilities used by
//! the phone-identity map, run-state persistence, and expiry sweeps.

pub mod atomic_io;
pub mod time_utils;

pub use atomic_io::write_text_atomic;
pub use time_utils::{age_exceeds_ms, current_unix_timestamp_ms};
