/// Opening marker of an html code block in the model output.
pub const START_FENCE: &str = "```html";
/// Optional modifier the model appends to the opener (```` ```html+ ````).
pub const START_FENCE_MODIFIER: char = '+';
/// Longest opener form, counted in characters.
pub const START_FENCE_MAX_LEN: usize = 8;
pub const END_FENCE: &str = "```";

/// Incremental scanner that yields only the text found between an html
/// opener fence and the next closing fence.
///
/// Fragments can be split anywhere, including inside either fence. Text that
/// could still be the beginning of a fence is held back until the next
/// fragment decides it:
/// - outside a block, at most `START_FENCE_MAX_LEN - 1` trailing characters
///   are kept;
/// - inside a block, the last `END_FENCE.len() - 1` characters are held.
///
/// The line break terminating the opener line belongs to the fence, not to
/// the content. Whatever follows a closing fence in the same fragment is
/// discarded; a new block is only picked up from later fragments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FenceExtractor {
    buffer: String,
    is_capturing: bool,
}

impl FenceExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_capturing(&self) -> bool {
        self.is_capturing
    }

    /// Characters currently held back, waiting for more input.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.is_capturing = false;
    }

    /// Feeds one fragment and returns the content newly known to be inside
    /// a fenced block. Returns an empty string when nothing new is complete.
    pub fn push(&mut self, fragment: &str) -> String {
        self.buffer.push_str(fragment);
        let mut extracted = String::new();

        while !self.buffer.is_empty() {
            if !self.is_capturing {
                let Some(start) = self.buffer.find(START_FENCE) else {
                    let keep_from = tail_start(&self.buffer, START_FENCE_MAX_LEN - 1);
                    self.buffer.drain(..keep_from);
                    break;
                };
                let after_fence = start + START_FENCE.len();
                let Some(suffix_len) = opener_suffix_len(&self.buffer[after_fence..]) else {
                    // The opener line is not finished yet.
                    self.buffer.drain(..start);
                    break;
                };
                self.buffer.drain(..after_fence + suffix_len);
                self.is_capturing = true;
                continue;
            }

            match self.buffer.find(END_FENCE) {
                Some(end) => {
                    extracted.push_str(&self.buffer[..end]);
                    self.buffer.clear();
                    self.is_capturing = false;
                }
                None => {
                    let hold_from = tail_start(&self.buffer, END_FENCE.len() - 1);
                    extracted.push_str(&self.buffer[..hold_from]);
                    self.buffer.drain(..hold_from);
                }
            }
            break;
        }

        extracted
    }
}

/// Byte length of the optional modifier and line break that complete an
/// opener, or `None` while the remaining input is too short to decide.
fn opener_suffix_len(rest: &str) -> Option<usize> {
    let mut consumed = 0;
    let mut remaining = rest;

    match remaining.chars().next() {
        None => return None,
        Some(START_FENCE_MODIFIER) => {
            consumed += START_FENCE_MODIFIER.len_utf8();
            remaining = &remaining[START_FENCE_MODIFIER.len_utf8()..];
        }
        Some(_) => {}
    }

    if remaining.is_empty() {
        return None;
    }
    if remaining.starts_with('\n') {
        consumed += 1;
    } else if let Some(after_cr) = remaining.strip_prefix('\r') {
        if after_cr.is_empty() {
            return None;
        }
        if after_cr.starts_with('\n') {
            consumed += 2;
        }
    }
    Some(consumed)
}

/// Byte index at which the last `keep` characters of `text` begin.
fn tail_start(text: &str, keep: usize) -> usize {
    if keep == 0 {
        return text.len();
    }
    text.char_indices()
        .rev()
        .nth(keep - 1)
        .map(|(index, _)| index)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::FenceExtractor;

    fn extract_all(fragments: &[&str]) -> String {
        let mut extractor = FenceExtractor::new();
        fragments
            .iter()
            .map(|fragment| extractor.push(fragment))
            .collect()
    }

    #[test]
    fn reassembles_fence_split_across_fragments() {
        assert_eq!(
            extract_all(&["```htm", "l\nhello ", "world\n```"]),
            "hello world\n"
        );
    }

    #[test]
    fn output_is_independent_of_chunk_boundaries() {
        let content = "<html>\n  <body class=\"p-4\">héllo ``wörld`` ✓</body>\n</html>";
        let input = format!("Here you go:\n```html\n{content}\n```\nDone.");
        let expected = format!("{content}\n");
        assert_eq!(extract_all(&[&input]), expected);

        let chars: Vec<char> = input.chars().collect();
        for split in 0..=chars.len() {
            let left: String = chars[..split].iter().collect();
            let right: String = chars[split..].iter().collect();
            assert_eq!(
                extract_all(&[&left, &right]),
                expected,
                "split at char {split}"
            );
        }

        let per_char: Vec<String> = chars.iter().map(|ch| ch.to_string()).collect();
        let per_char_refs: Vec<&str> = per_char.iter().map(String::as_str).collect();
        assert_eq!(extract_all(&per_char_refs), expected);
    }

    #[test]
    fn three_way_splits_agree_with_single_fragment() {
        let input = "x```html+\n<p>a</p>\n```";
        let expected = extract_all(&[input]);
        assert_eq!(expected, "<p>a</p>\n");
        let chars: Vec<char> = input.chars().collect();
        for first in 0..=chars.len() {
            for second in first..=chars.len() {
                let a: String = chars[..first].iter().collect();
                let b: String = chars[first..second].iter().collect();
                let c: String = chars[second..].iter().collect();
                assert_eq!(
                    extract_all(&[&a, &b, &c]),
                    expected,
                    "splits at {first}/{second}"
                );
            }
        }
    }

    #[test]
    fn text_without_opener_yields_nothing() {
        assert_eq!(extract_all(&["plain prose ", "with `ticks` and ``", "`js\n"]), "");
    }

    #[test]
    fn text_after_closed_block_is_ignored() {
        let mut extractor = FenceExtractor::new();
        assert_eq!(extractor.push("```html\n<a/>\n```"), "<a/>\n");
        assert!(!extractor.is_capturing());
        assert_eq!(extractor.push("trailing commentary\nmore text"), "");
    }

    #[test]
    fn unterminated_block_holds_back_fence_sized_suffix() {
        let mut extractor = FenceExtractor::new();
        assert_eq!(extractor.push("```html\n<div>abc"), "<div>a");
        assert!(extractor.is_capturing());
        assert_eq!(extractor.pending(), "bc");
    }

    #[test]
    fn modifier_suffix_is_not_content() {
        assert_eq!(extract_all(&["```html+", "\nbody```"]), "body");
        assert_eq!(extract_all(&["```html", "+", "\nbody```"]), "body");
    }

    #[test]
    fn crlf_after_opener_is_consumed() {
        assert_eq!(extract_all(&["```html\r", "\n<b>x</b>\r\n```"]), "<b>x</b>\r\n");
    }

    #[test]
    fn reset_discards_partial_state() {
        let mut extractor = FenceExtractor::new();
        assert_eq!(extractor.push("```html\n<div"), "<d");
        extractor.reset();
        assert!(!extractor.is_capturing());
        assert_eq!(extractor.push("iv>\n```"), "");
    }
}
