//! Sentence-aware text chunking shared by the translation and synthesis
//! stages. Both downstream services enforce hard input-length ceilings;
//! the chunker splits arbitrary text into ordered fragments that respect
//! a maximum character count while keeping sentences intact wherever
//! possible.

/// Split text into sentence-like units on `.`, `!` or `?` followed by
/// whitespace. The terminating punctuation stays with its sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().is_some_and(|n| n.is_whitespace()) {
            while chars.peek().is_some_and(|n| n.is_whitespace()) {
                chars.next();
            }
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}

/// Split `text` into fragments of at most `max_chars` characters,
/// accumulating whole sentences greedily. A single sentence longer than
/// the limit becomes its own fragment; the translation service accepts
/// mild overruns, so it is passed through rather than cut mid-word.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    chunk_sentences(text, max_chars, false)
}

/// Synthesis variant of [`chunk_text`]: the synthesis engine has a hard
/// input ceiling, so a sentence longer than `max_chars` is additionally
/// sliced into `max_chars`-sized pieces in sequence order.
pub fn chunk_text_sliced(text: &str, max_chars: usize) -> Vec<String> {
    chunk_sentences(text, max_chars, true)
}

fn chunk_sentences(text: &str, max_chars: usize, slice_oversized: bool) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for sentence in split_sentences(text) {
        let sentence_len = sentence.chars().count();

        if sentence_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if slice_oversized {
                tracing::warn!(
                    "sentence exceeds {} chars, splitting mid-sentence: '{}...'",
                    max_chars,
                    truncate_chars(&sentence, 50)
                );
                chunks.extend(slice_by_chars(&sentence, max_chars));
            } else {
                tracing::warn!(
                    "sentence exceeds {} chars, emitting as oversized fragment: '{}...'",
                    max_chars,
                    truncate_chars(&sentence, 50)
                );
                chunks.push(sentence);
            }
            continue;
        }

        // +1 accounts for the joining space.
        if current_len + sentence_len + 1 > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            current_len = sentence_len;
            current = sentence;
        } else if current.is_empty() {
            current_len = sentence_len;
            current = sentence;
        } else {
            current.push(' ');
            current.push_str(&sentence);
            current_len += sentence_len + 1;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Slice a string into pieces of at most `max_chars` characters, never
/// splitting a code point.
fn slice_by_chars(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars.max(1))
        .map(|piece| piece.iter().collect())
        .collect()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Prepare text for the synthesis engine: drop control characters,
/// replace typographic punctuation the engines mispronounce, and
/// collapse runs of whitespace.
pub fn normalize_for_speech(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{201E}' | '\u{201C}' | '\u{201D}' => cleaned.push('"'),
            '\u{2019}' | '\u{2018}' | '`' => cleaned.push('\''),
            '\u{2013}' | '\u{2014}' => cleaned.push('-'),
            '\u{2026}' => cleaned.push_str("..."),
            c if c.is_control() && c != '\n' && c != '\t' => {}
            c => cleaned.push(c),
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sentences_basic() {
        let sentences = split_sentences("Hello world. This is fine. Bye!");
        assert_eq!(sentences, vec!["Hello world.", "This is fine.", "Bye!"]);
    }

    #[test]
    fn test_split_sentences_keeps_inner_punctuation() {
        // A dot not followed by whitespace is not a boundary.
        let sentences = split_sentences("Version 2.5 is out. Great?  Yes.");
        assert_eq!(sentences, vec!["Version 2.5 is out.", "Great?", "Yes."]);
    }

    #[test]
    fn test_split_sentences_empty() {
        assert!(split_sentences("").is_empty());
        assert!(split_sentences("   \t\n ").is_empty());
    }

    #[test]
    fn test_chunk_text_example() {
        let chunks = chunk_text("Hello world. This is fine.", 15);
        assert_eq!(chunks, vec!["Hello world.", "This is fine."]);
    }

    #[test]
    fn test_chunk_text_accumulates_under_limit() {
        let chunks = chunk_text("One. Two. Three.", 100);
        assert_eq!(chunks, vec!["One. Two. Three."]);
    }

    #[test]
    fn test_chunk_text_oversized_sentence_kept_whole() {
        let long = "A".repeat(40);
        let text = format!("Short one. {}. Short two.", long);
        let chunks = chunk_text(&text, 20);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "Short one.");
        assert_eq!(chunks[1], format!("{}.", long));
        assert_eq!(chunks[2], "Short two.");
    }

    #[test]
    fn test_chunk_text_sliced_hard_slices() {
        let chunks = chunk_text_sliced(&"A".repeat(40), 10);
        assert_eq!(chunks.len(), 4);
        for chunk in &chunks {
            assert_eq!(chunk.chars().count(), 10);
        }
        assert_eq!(chunks.concat(), "A".repeat(40));
    }

    #[test]
    fn test_chunk_text_sliced_multibyte_boundary() {
        let text = "ä".repeat(7);
        let chunks = chunk_text_sliced(&text, 3);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), text);
        assert_eq!(chunks[2].chars().count(), 1);
    }

    #[test]
    fn test_chunk_reconstruction_property() {
        let text = "First sentence here. Second one follows! Third, a bit longer, \
                    question? Fourth wraps it up.";
        for limit in [10, 25, 40, 200] {
            let chunks = chunk_text(text, limit);
            assert!(chunks.iter().all(|c| !c.trim().is_empty()));
            let rejoined = chunks.join(" ");
            let normalize =
                |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
            assert_eq!(normalize(&rejoined), normalize(text), "limit {}", limit);
        }
    }

    #[test]
    fn test_chunk_empty_input() {
        assert!(chunk_text("", 100).is_empty());
        assert!(chunk_text("   ", 100).is_empty());
        assert!(chunk_text_sliced("  \n ", 100).is_empty());
    }

    #[test]
    fn test_normalize_for_speech() {
        assert_eq!(
            normalize_for_speech("\u{201E}Hi\u{201D} \u{2014} it\u{2019}s  fine\u{2026}"),
            r#""Hi" - it's fine..."#
        );
        assert_eq!(normalize_for_speech("a\u{0007}b   c"), "ab c");
    }
}
