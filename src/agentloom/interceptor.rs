//! C2 — `KeyTokenInterceptor`. Stream-safe text buffering that withholds
//! any prefix that could grow into a forbidden token (e.g.
//! `<use_mcp_tool>`), so partial tool-call markup never reaches the
//! observer-facing stream. Ported from
//! `examples/original_source/src/utils/stream_parsing_utils.py::TextInterceptor`.
//! See `SPEC_FULL.md` §4.2 and `DESIGN.md` Open Question #3.

/// Buffers streamed assistant text and releases only the portion that is
/// provably safe to show, i.e. cannot be (a prefix of) a forbidden token.
pub struct KeyTokenInterceptor {
    forbidden: Vec<String>,
    buffer: String,
}

impl KeyTokenInterceptor {
    pub fn new(forbidden: Vec<String>) -> Self {
        KeyTokenInterceptor {
            forbidden,
            buffer: String::new(),
        }
    }

    /// True if `text` contains any forbidden token verbatim. Used as a
    /// secondary gate by callers, independent of buffering state.
    pub fn is_unbreakable_string(&self, text: &str) -> bool {
        self.forbidden.iter().any(|tok| text.contains(tok.as_str()))
    }

    /// Feeds one chunk of streamed text. Returns the text that is safe to
    /// forward now, or `None` if everything must stay buffered.
    ///
    /// An empty `delta` with `is_last = false` returns `None` without
    /// otherwise changing buffering behaviour.
    pub fn process(&mut self, delta: &str, is_last: bool) -> Option<String> {
        self.buffer.push_str(delta);

        if is_last {
            let result = std::mem::take(&mut self.buffer);
            for token in &self.forbidden {
                if let Some(pos) = result.find(token.as_str()) {
                    return if pos > 0 {
                        Some(result[..pos].to_string())
                    } else {
                        None
                    };
                }
            }
            return if result.is_empty() { None } else { Some(result) };
        }

        // The whole buffer could still grow into a forbidden token: keep
        // buffering without touching it.
        let might_be_prefix = self.forbidden.iter().any(|tok| {
            tok.len() > self.buffer.len() && tok.starts_with(self.buffer.as_str())
        });
        if might_be_prefix {
            return None;
        }

        // The buffer already contains a complete forbidden token somewhere.
        for token in &self.forbidden {
            if let Some(pos) = self.buffer.find(token.as_str()) {
                if pos > 0 {
                    let result = self.buffer[..pos].to_string();
                    self.buffer = self.buffer[pos..].to_string();
                    return Some(result);
                }
                return None;
            }
        }

        // Otherwise, find the longest safe prefix: scan increasing suffix
        // lengths and keep extending the safe boundary past any suffix
        // that is not itself a strict prefix of a forbidden token.
        let bytes_len = self.buffer.len();
        let mut safe_output_end = 0usize;
        for i in 1..=bytes_len {
            if !self.buffer.is_char_boundary(i) {
                continue;
            }
            let current_suffix = &self.buffer[safe_output_end..i];
            let is_dangerous_suffix = self.forbidden.iter().any(|tok| {
                tok.len() > current_suffix.len() && tok.starts_with(current_suffix)
            });
            if !is_dangerous_suffix {
                safe_output_end = i;
            }
        }

        if safe_output_end == 0 {
            return None;
        }

        let result = self.buffer[..safe_output_end].to_string();
        self.buffer = self.buffer[safe_output_end..].to_string();
        if result.is_empty() {
            None
        } else {
            Some(result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_delta_returns_none() {
        let mut interceptor = KeyTokenInterceptor::new(vec!["<use_mcp_tool>".to_string()]);
        assert!(interceptor.process("", false).is_none());
    }

    #[test]
    fn passes_through_safe_text() {
        let mut interceptor = KeyTokenInterceptor::new(vec!["<use_mcp_tool>".to_string()]);
        assert_eq!(
            interceptor.process("hello world", false),
            Some("hello world".to_string())
        );
    }

    #[test]
    fn withholds_growing_prefix_of_forbidden_token() {
        let mut interceptor = KeyTokenInterceptor::new(vec!["<use_mcp_tool>".to_string()]);
        assert_eq!(interceptor.process("here: <use", false), Some("here: ".to_string()));
        assert!(interceptor.process("_mcp", false).is_none());
        assert!(interceptor.process("_tool>", false).is_none());
        assert_eq!(interceptor.process(" more", false), Some(" more".to_string()));
    }

    #[test]
    fn splits_at_complete_forbidden_token_mid_buffer() {
        let mut interceptor = KeyTokenInterceptor::new(vec!["SECRET".to_string()]);
        let out = interceptor.process("prefix SECRET suffix", false);
        assert_eq!(out, Some("prefix ".to_string()));
    }

    #[test]
    fn forbidden_token_at_start_emits_nothing() {
        let mut interceptor = KeyTokenInterceptor::new(vec!["SECRET".to_string()]);
        assert!(interceptor.process("SECRET trailing", false).is_none());
    }

    #[test]
    fn is_last_flushes_remaining_safe_text() {
        let mut interceptor = KeyTokenInterceptor::new(vec!["<use_mcp_tool>".to_string()]);
        interceptor.process("almost <use_m", false);
        let out = interceptor.process("cp_x", true);
        assert_eq!(out, Some("almost <use_mcp_x".to_string()));
    }

    #[test]
    fn is_last_with_forbidden_token_present_emits_only_prefix() {
        let mut interceptor = KeyTokenInterceptor::new(vec!["<use_mcp_tool>".to_string()]);
        let out = interceptor.process("before <use_mcp_tool> after", true);
        assert_eq!(out, Some("before ".to_string()));
    }

    #[test]
    fn chunking_invariance_matches_single_shot() {
        let whole = "some text before <use_mcp_tool>rest of stream";
        let mut whole_interceptor = KeyTokenInterceptor::new(vec!["<use_mcp_tool>".to_string()]);
        let whole_out = whole_interceptor.process(whole, true).unwrap_or_default();

        let mut chunked_interceptor = KeyTokenInterceptor::new(vec!["<use_mcp_tool>".to_string()]);
        let mut chunked_out = String::new();
        let chunk_size = 3;
        let chars: Vec<char> = whole.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let end = (i + chunk_size).min(chars.len());
            let chunk: String = chars[i..end].iter().collect();
            let is_last = end == chars.len();
            if let Some(out) = chunked_interceptor.process(&chunk, is_last) {
                chunked_out.push_str(&out);
            }
            i = end;
        }
        assert_eq!(chunked_out, whole_out);
    }

    #[test]
    fn is_unbreakable_string_checks_containment_independent_of_buffer() {
        let interceptor = KeyTokenInterceptor::new(vec!["<use_mcp_tool>".to_string()]);
        assert!(interceptor.is_unbreakable_string("a <use_mcp_tool> b"));
        assert!(!interceptor.is_unbreakable_string("nothing here"));
    }
}
