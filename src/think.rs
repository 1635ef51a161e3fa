//! Separates a model's reasoning block from its answer.

/// Closing marker of a reasoning block.
pub const THINK_CLOSE: &str = "</think>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThinkSplit<'a> {
    /// Text up to and including the closing marker, or all of it when there is no split.
    pub reasoning: &'a str,
    pub answer: &'a str,
}

impl<'a> ThinkSplit<'a> {
    pub fn has_answer(&self) -> bool {
        !self.answer.is_empty()
    }

    /// Reasoning without the `<think>`/`</think>` tags, for display.
    pub fn reasoning_body(&self) -> &'a str {
        let r = self.reasoning.trim_start();
        let r = r.strip_prefix("<think>").unwrap_or(r);
        r.strip_suffix(THINK_CLOSE).unwrap_or(r).trim()
    }
}

/// Split accumulated (possibly partial) output at the first closing marker.
///
/// A marker at offset 0 does not split: the whole text stays in `reasoning`.
/// Stored transcripts were produced with this rule.
pub fn split(text: &str) -> ThinkSplit<'_> {
    match text.find(THINK_CLOSE) {
        Some(idx) if idx > 0 => {
            let end = idx + THINK_CLOSE.len();
            ThinkSplit {
                reasoning: &text[..end],
                answer: &text[end..],
            }
        }
        _ => ThinkSplit {
            reasoning: text,
            answer: "",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_marker_is_all_reasoning() {
        let s = split("no marker here");
        assert_eq!(s.reasoning, "no marker here");
        assert_eq!(s.answer, "");
        assert!(!s.has_answer());
    }

    #[test]
    fn splits_after_marker() {
        let s = split("abc</think>def");
        assert_eq!(s.reasoning, "abc</think>");
        assert_eq!(s.answer, "def");
    }

    #[test]
    fn marker_at_start_does_not_split() {
        let s = split("</think>def");
        assert_eq!(s.reasoning, "</think>def");
        assert_eq!(s.answer, "");
    }

    #[test]
    fn only_first_marker_counts() {
        let s = split("a</think>b</think>c");
        assert_eq!(s.reasoning, "a</think>");
        assert_eq!(s.answer, "b</think>c");
    }

    #[test]
    fn partial_stream_text() {
        assert_eq!(split("<think>still going").answer, "");
        assert_eq!(split("<think>x</thi").reasoning, "<think>x</thi");
        assert_eq!(split("").reasoning, "");
    }

    #[test]
    fn reasoning_body_strips_tags() {
        let s = split("<think>\nweighing options\n</think>\n\nAnswer");
        assert_eq!(s.reasoning_body(), "weighing options");
        assert_eq!(s.answer, "\n\nAnswer");
    }
}
