//! JSON segmentation utilities for recovering score entries from agent output.
//!
//! Agents frequently emit reports that are almost JSON: objects glued together
//! without separators, stray prose between entries, or a trailing truncated
//! object. This module carves such text into candidate top-level `{...}`
//! substrings so the report validator can try to parse each one.
//!
//! # Segmentation
//!
//! [`segment_top_level_objects`] tracks only `{` / `}` nesting depth. It does not
//! understand string literals, so a brace inside a quoted value can split or merge
//! segments. This is a heuristic recovery path for malformed LLM output, not a JSON
//! parser; callers must still parse every segment.
//!
//! # Example
//!
//! ```
//! use judge_forge::utils::json_extraction::segment_top_level_objects;
//!
//! let text = r#"{"metric": "a", "score": 1} noise {"metric": "b", "score": 2}"#;
//! let segments = segment_top_level_objects(text);
//! assert_eq!(segments.len(), 2);
//! assert_eq!(segments[1], r#"{"metric": "b", "score": 2}"#);
//! ```

/// Result of scanning text for top-level brace segments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SegmentScan<'a> {
    /// Complete top-level `{...}` substrings, in order of appearance.
    pub segments: Vec<&'a str>,
    /// Brace depth left open at the end of the text (a truncated trailing object).
    pub unclosed_braces: usize,
    /// Number of `}` seen while no object was open.
    pub stray_closers: usize,
}

impl SegmentScan<'_> {
    /// Returns true if the text ended inside an unfinished object.
    pub fn is_truncated(&self) -> bool {
        self.unclosed_braces > 0
    }
}

/// Scans `text` and returns every maximal top-level `{...}` substring together with
/// bookkeeping about unbalanced braces.
pub fn scan_top_level_objects(text: &str) -> SegmentScan<'_> {
    let mut scan = SegmentScan::default();
    let mut depth: usize = 0;
    let mut start: Option<usize> = None;

    for (i, c) in text.char_indices() {
        match c {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' => {
                if depth == 0 {
                    scan.stray_closers += 1;
                    continue;
                }
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        scan.segments.push(&text[s..=i]);
                    }
                }
            }
            _ => {}
        }
    }

    scan.unclosed_braces = depth;
    scan
}

/// Returns every maximal top-level `{...}` substring of `text`.
///
/// Unterminated trailing objects and stray closing braces are ignored.
pub fn segment_top_level_objects(text: &str) -> Vec<&str> {
    scan_top_level_objects(text).segments
}

/// Returns a prefix of `s` at most `max` bytes long, cut on a char boundary.
pub fn preview(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
