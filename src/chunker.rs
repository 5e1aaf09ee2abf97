//! Splits message text into token-bounded chunks at sentence/word boundaries.

const MIN_TOKENS: usize = 50;
const MAX_TOKENS: usize = 1000;
const SEARCH_WINDOW: usize = 100;
const SENTENCE_TERMINATORS: [char; 4] = ['.', '!', '?', '\n'];

/// Approximate token count for a string: `ceil(len/4)`.
fn approx_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}

fn clamp_tokens(tokens: usize) -> usize {
    tokens.clamp(MIN_TOKENS, MAX_TOKENS)
}

/// Split `text` into an ordered sequence of trimmed, non-empty chunks.
///
/// `target_tokens` and `overlap_tokens` are clamped to `[50, 1000]` and
/// `[0, target_tokens/2]` respectively; overlap is forced to zero when
/// `use_overlap` is false.
pub fn chunk(text: &str, target_tokens: usize, overlap_tokens: usize, use_overlap: bool) -> Vec<String> {
    let target_tokens = clamp_tokens(target_tokens);
    let overlap_tokens = if use_overlap {
        overlap_tokens.min(target_tokens / 2)
    } else {
        0
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let bytes = trimmed.as_bytes();
    let len = bytes.len();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut overlap_enabled = use_overlap && overlap_tokens > 0;

    while start < len {
        let target_end = start + target_tokens * 4;
        if target_end >= len {
            push_trimmed(&mut chunks, &trimmed[start..len]);
            break;
        }

        let cut = find_cut(trimmed, target_end, len);

        push_trimmed(&mut chunks, &trimmed[start..cut]);

        let next_start = if overlap_enabled && cut < len {
            cut.saturating_sub(overlap_tokens * 4)
        } else {
            cut
        };

        // Guarantee forward progress; disable overlap for the remainder if a
        // meaningful advance isn't possible.
        let next_start = if next_start <= start {
            overlap_enabled = false;
            start + 1
        } else {
            next_start
        };

        start = next_start;
        if start >= len {
            break;
        }
    }

    chunks
}

/// Default chunk parameters from the control-knob table (target=256, overlap=50).
pub fn chunk_default(text: &str) -> Vec<String> {
    chunk(text, 256, 50, true)
}

fn push_trimmed(chunks: &mut Vec<String>, slice: &str) {
    let trimmed = slice.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

/// Find the cut point near `target_end`, searching within `±SEARCH_WINDOW`
/// chars for, in priority order: a sentence terminator followed by
/// whitespace-or-end, then any whitespace. Falls back to `target_end` itself
/// (clamped to `len`) if nothing is found.
fn find_cut(text: &str, target_end: usize, len: usize) -> usize {
    let lo = target_end.saturating_sub(SEARCH_WINDOW);
    let hi = (target_end + SEARCH_WINDOW).min(len);

    // Restrict the window to char boundaries so slicing never panics.
    let lo = ceil_char_boundary(text, lo);
    let hi = floor_char_boundary(text, hi);
    let target_end = ceil_char_boundary(text, target_end.min(len));

    if lo >= hi {
        return target_end.min(len);
    }

    let window: Vec<(usize, char)> = text[lo..hi].char_indices().map(|(i, c)| (lo + i, c)).collect();

    // Priority 1: sentence terminator followed by whitespace or end-of-text,
    // closest to target_end wins.
    let mut best_sentence: Option<usize> = None;
    for (idx, ch) in &window {
        if SENTENCE_TERMINATORS.contains(ch) {
            let after = idx + ch.len_utf8();
            let ok = after >= len || text[after..].chars().next().map(|c| c.is_whitespace()).unwrap_or(true);
            if ok {
                let cut = after;
                best_sentence = Some(closer(best_sentence, cut, target_end));
            }
        }
    }
    if let Some(cut) = best_sentence {
        return cut;
    }

    // Priority 2: any whitespace.
    let mut best_ws: Option<usize> = None;
    for (idx, ch) in &window {
        if ch.is_whitespace() {
            let cut = idx + ch.len_utf8();
            best_ws = Some(closer(best_ws, cut, target_end));
        }
    }
    if let Some(cut) = best_ws {
        return cut;
    }

    target_end.min(len)
}

fn closer(current: Option<usize>, candidate: usize, target: usize) -> usize {
    match current {
        None => candidate,
        Some(existing) => {
            let d_existing = existing.abs_diff(target);
            let d_candidate = candidate.abs_diff(target);
            if d_candidate < d_existing {
                candidate
            } else {
                existing
            }
        }
    }
}

fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    let len = text.len();
    while idx < len && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx.min(len)
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk("hello world", 256, 50, true);
        assert_eq!(chunks, vec!["hello world"]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk("   ", 256, 50, true).is_empty());
    }

    #[test]
    fn long_text_splits_into_multiple_chunks() {
        let sentence = "The quick brown fox jumps over the lazy dog. ";
        let text = sentence.repeat(60);
        let chunks = chunk(&text, 50, 10, true);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(!c.is_empty());
            assert!(c.len() <= 1000 * 4);
        }
    }

    #[test]
    fn no_overlap_when_disabled() {
        let sentence = "word ".repeat(500);
        let chunks_no_overlap = chunk(&sentence, 50, 10, false);
        assert!(chunks_no_overlap.len() > 1);
    }

    #[test]
    fn parameters_are_clamped() {
        // target below minimum still produces valid progress
        let text = "a ".repeat(2000);
        let chunks = chunk(&text, 1, 10000, true);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn approx_tokens_is_len_over_four_ceiling() {
        assert_eq!(approx_tokens(""), 0);
        assert_eq!(approx_tokens("ab"), 1);
        assert_eq!(approx_tokens("abcd"), 1);
        assert_eq!(approx_tokens("abcde"), 2);
    }

    proptest::proptest! {
        #[test]
        fn chunks_cover_input_without_empty_gaps(s in "\\PC{0,400}") {
            let chunks = chunk_default(&s);
            let trimmed = s.trim();
            if trimmed.is_empty() {
                proptest::prop_assert!(chunks.is_empty());
            } else {
                proptest::prop_assert!(!chunks.is_empty());
                for c in &chunks {
                    proptest::prop_assert!(!c.trim().is_empty());
                }
            }
        }
    }
}
