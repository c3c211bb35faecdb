//! Cuts a document body down to a summary for the home page and the feed.
//!
//! An explicit [`CUT_MARKER`] always wins. Otherwise the body is cut at the
//! first paragraph break at or after `short_size` bytes, or at the first
//! code block if that starts earlier, so that a summary never ends inside a
//! code block.

/// Marks the end of the excerpt in a document body.
pub const CUT_MARKER: &str = "<!-- more -->";

/// Returns the excerpt of `body`.
pub fn excerpt(body: &str, short_size: usize) -> &str {
    if let Some(i) = body.find(CUT_MARKER) {
        return &body[..i];
    }

    let mut cut = paragraph_break(body, short_size).unwrap_or_else(|| body.len());
    if let Some(i) = code_block_start(body) {
        cut = cut.min(i);
    }
    &body[..cut]
}

/// Finds the first line break at or after `offset` that is followed by a
/// blank line.
fn paragraph_break(body: &str, offset: usize) -> Option<usize> {
    let mut from = offset.min(body.len());
    while !body.is_char_boundary(from) {
        from += 1;
    }
    while let Some(i) = body[from..].find('\n').map(|i| from + i) {
        let next_line = &body[i + 1..];
        let next_line = &next_line[..next_line.find('\n').unwrap_or_else(|| next_line.len())];
        if next_line.trim().is_empty() {
            return Some(i);
        }
        from = i + 1;
    }
    None
}

/// Finds the start of the first fenced or indented code block.
fn code_block_start(body: &str) -> Option<usize> {
    let mut offset = 0;
    let mut previous_blank = true;
    for line in body.split('\n') {
        let trimmed = line.trim_start_matches(' ');
        let indent = line.len() - trimmed.len();
        let fenced = indent < 4 && (trimmed.starts_with("```") || trimmed.starts_with("~~~"));
        let indented = previous_blank
            && (line.starts_with("    ") || line.starts_with('\t'))
            && !line.trim().is_empty();
        if fenced || indented {
            return Some(offset);
        }
        previous_blank = line.trim().is_empty();
        offset += line.len() + 1;
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cut_marker_wins() {
        let body = "intro\n<!-- more -->\nrest\n```\ncode\n```\n";
        assert_eq!("intro\n", excerpt(body, 0));
    }

    #[test]
    fn test_cut_at_paragraph_break_after_offset() {
        let long = "x".repeat(210);
        let body = format!("para1\n\npara2\n\n{}\n\nmore\n```code\n...\n```", long);
        let cut = excerpt(&body, 200);
        assert_eq!(format!("para1\n\npara2\n\n{}", long), cut);
        assert!(!cut.contains("```"));
    }

    #[test]
    fn test_earlier_fence_wins() {
        let body = "intro\n```\ncode\n```\n\nlong paragraph\n\nend";
        assert_eq!("intro\n", excerpt(body, 10));
    }

    #[test]
    fn test_indented_code_block() {
        let body = "intro\n\n    code\n\nafter\n\nmore";
        assert_eq!("intro\n\n", excerpt(body, 100));
    }

    #[test]
    fn test_indented_continuation_is_not_code() {
        let body = "intro\n    still intro\n\nafter";
        assert_eq!(body, excerpt(body, 100));
    }

    #[test]
    fn test_offset_inside_multibyte_char() {
        let body = "ééé\n\nrest";
        assert_eq!("ééé", excerpt(body, 1));
    }

    #[test]
    fn test_short_body_is_whole() {
        assert_eq!("short", excerpt("short", 200));
    }
}
