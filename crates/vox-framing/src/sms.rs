//! SMS segmentation: pure splitting into transport-sized numbered parts.

/// A trimmed response at or under this length ships as one unprefixed segment.
pub const SMS_SINGLE_SEGMENT_MAX: usize = 160;

/// Payload estimate per multipart segment; reserves room for a `Part i/n: `
/// prefix when computing the part count.
pub const SMS_MULTIPART_PAYLOAD_ESTIMATE: usize = 153;

/// Word-boundary search window at the tail of each segment budget.
const BOUNDARY_WINDOW: usize = 30;

/// Splits `full_text` into SMS-sized segments.
///
/// Short texts return a single unprefixed segment. Longer texts are numbered
/// `Part i/n: ` and greedily filled up to `160 - prefix` characters,
/// preferring to break on whitespace or punctuation within the last
/// [`BOUNDARY_WINDOW`] characters of the budget. Boundary characters stay in
/// the emitted payload, so stripping prefixes, concatenating, and collapsing
/// whitespace reproduces the input (whitespace-collapsed).
pub fn segment_sms(full_text: &str) -> Vec<String> {
    let trimmed = full_text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let chars: Vec<char> = trimmed.chars().collect();
    if chars.len() <= SMS_SINGLE_SEGMENT_MAX {
        return vec![trimmed.to_string()];
    }

    let total_parts = chars.len().div_ceil(SMS_MULTIPART_PAYLOAD_ESTIMATE);
    let mut segments = Vec::with_capacity(total_parts);
    let mut position = 0usize;
    let mut part = 1usize;
    while position < chars.len() {
        let prefix = format!("Part {part}/{total_parts}: ");
        let budget = SMS_SINGLE_SEGMENT_MAX.saturating_sub(prefix.chars().count());
        let remaining = chars.len() - position;
        let take = if remaining <= budget {
            remaining
        } else {
            boundary_cut(&chars[position..position + budget])
        };
        let payload: String = chars[position..position + take].iter().collect();
        segments.push(format!("{prefix}{payload}"));
        position += take;
        part += 1;
    }
    segments
}

/// Index to cut a full-budget slice at, preferring the last break character
/// in the tail window over a mid-word cut.
fn boundary_cut(window: &[char]) -> usize {
    let budget = window.len();
    let search_start = budget.saturating_sub(BOUNDARY_WINDOW);
    for offset in (search_start..budget).rev() {
        if is_break_char(window[offset]) {
            return offset + 1;
        }
    }
    budget
}

fn is_break_char(ch: char) -> bool {
    ch.is_whitespace() || matches!(ch, '.' | ',' | ';' | ':' | '!' | '?' | '-' | ')')
}
