/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

/// Returns true when a record written at `written_unix_ms` is strictly older
/// than `max_age_ms` as of `now_unix_ms`. Future timestamps never count as old.
pub fn age_exceeds_ms(written_unix_ms: u64, now_unix_ms: u64, max_age_ms: u64) -> bool {
    now_unix_ms.saturating_sub(written_unix_ms) > max_age_ms
}
