//! Result snippets: a byte window centered on the earliest query-term
//! occurrence, aligned to word boundaries.

use crate::lsa::tokenize;

/// Snippet window size in bytes.
pub const SNIPPET_SIZE: usize = 300;

/// Extract a window around the first query-term match. Content at or
/// under the window size is returned whole.
#[must_use]
pub fn extract_snippet(content: &str, query: &str) -> String {
    if content.len() <= SNIPPET_SIZE {
        return content.to_owned();
    }

    let lower = content.to_lowercase();
    let best_pos = tokenize(query)
        .iter()
        .filter_map(|term| lower.find(term.as_str()))
        .min();

    let Some(pos) = best_pos else {
        // No term match: take the head of the content.
        return truncate_snippet(content, SNIPPET_SIZE);
    };

    let half = SNIPPET_SIZE / 2;
    let mut start = pos.saturating_sub(half);
    let mut end = (start + SNIPPET_SIZE).min(content.len());
    if end == content.len() {
        start = end.saturating_sub(SNIPPET_SIZE);
    }

    // Nudge both edges onto char boundaries before scanning for spaces.
    while start > 0 && !content.is_char_boundary(start) {
        start += 1;
    }
    while end < content.len() && !content.is_char_boundary(end) {
        end -= 1;
    }

    // Align to word boundaries.
    if start > 0 {
        while start < end && content.as_bytes()[start] != b' ' {
            start += 1;
        }
        start = (start + 1).min(end);
    }
    if end < content.len() {
        while end > start && content.as_bytes()[end - 1] != b' ' {
            end -= 1;
        }
    }

    let prefix = if start > 0 { "..." } else { "" };
    let suffix = if end < content.len() { "..." } else { "" };
    format!("{prefix}{}{suffix}", content[start..end].trim())
}

/// Truncate to `max` bytes on a char boundary, with a trailing marker
/// when anything was cut.
#[must_use]
pub fn truncate_snippet(content: &str, max: usize) -> String {
    if content.len() <= max {
        return content.to_owned();
    }
    let mut end = max;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &content[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_is_returned_whole() {
        assert_eq!(extract_snippet("short text", "text"), "short text");
    }

    #[test]
    fn long_content_without_match_takes_head() {
        let content = "a".repeat(500);
        let snippet = extract_snippet(&content, "zzz");
        assert!(snippet.len() <= SNIPPET_SIZE + 3);
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn window_centers_on_first_term() {
        let filler = "lorem ipsum dolor sit amet ".repeat(30);
        let content = format!("{filler}the JWT token expired here {filler}");
        let snippet = extract_snippet(&content, "JWT");

        assert!(snippet.contains("JWT"));
        assert!(snippet.len() <= SNIPPET_SIZE + 6);
        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn match_near_start_has_no_leading_marker() {
        let tail = " tail words".repeat(60);
        let content = format!("JWT expiry problem{tail}");
        let snippet = extract_snippet(&content, "JWT");
        assert!(snippet.starts_with("JWT"));
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let content = "héllo wörld ".repeat(40);
        let snippet = truncate_snippet(&content, SNIPPET_SIZE);
        assert!(snippet.len() <= SNIPPET_SIZE + 3);
        // Must not panic on multi-byte boundaries and must stay valid UTF-8.
        assert!(snippet.ends_with("..."));
    }
}
