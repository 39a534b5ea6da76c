//! Character-window text chunker with overlap.
//!
//! Splits document text into [`DocumentChunk`]s of at most `chunk_size`
//! characters. Consecutive chunks share up to `chunk_overlap` characters so
//! that a passage straddling a boundary is still retrievable from either side.
//!
//! # Algorithm
//!
//! 1. Trim the text and work on `char`s so multi-byte UTF-8 is never split.
//! 2. Take a window of `chunk_size` characters from the current start.
//! 3. If the window does not reach the end of the text, pull its end back to
//!    the last paragraph break (`\n\n`), line break, or space found in the
//!    second half of the window. Otherwise hard-split at `chunk_size`.
//! 4. Emit the trimmed window as a chunk (blank windows are skipped).
//! 5. Start the next window `chunk_overlap` characters before the previous
//!    end, snapped forward to a word start, and always strictly after the
//!    previous start.
//!
//! # Example
//!
//! ```rust
//! use docent_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("doc-123", "Hello world.\n\nSecond paragraph.", 1000, 200);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use chrono::Utc;
use uuid::Uuid;

use crate::models::DocumentChunk;

/// Split text into overlapping chunks.
///
/// # Guarantees
///
/// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
/// - Every chunk's content is non-empty and at most `chunk_size` characters.
/// - `chunk_size` on each chunk equals its content length in characters.
/// - Blank text yields no chunks.
///
/// `chunk_size` of 0 is treated as 1; `chunk_overlap` is clamped below
/// `chunk_size`.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<DocumentChunk> {
    let chunk_size = chunk_size.max(1);
    let overlap = chunk_overlap.min(chunk_size - 1);

    let chars: Vec<char> = text.trim().chars().collect();
    let len = chars.len();
    let mut chunks = Vec::new();
    if len == 0 {
        return chunks;
    }

    let mut start = 0usize;
    loop {
        let hard_end = (start + chunk_size).min(len);
        let end = if hard_end == len {
            len
        } else {
            break_point(&chars, start, hard_end, chunk_size)
        };

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            chunks.push(make_chunk(document_id, chunks.len() as i64, piece));
        }

        if end >= len {
            break;
        }

        let mut next = end.saturating_sub(overlap);
        if next <= start {
            next = end;
        }
        start = snap_to_word_start(&chars, next, end);
    }

    chunks
}

/// Find the preferred split position in `chars[start..hard_end]`.
///
/// Returns the index just after the last `\n\n`, `\n`, or space in the second
/// half of the window, or `hard_end` if none exists.
fn break_point(chars: &[char], start: usize, hard_end: usize, chunk_size: usize) -> usize {
    let floor = start + (chunk_size / 2).max(1);
    if floor >= hard_end {
        return hard_end;
    }
    let window = &chars[floor..hard_end];

    let paragraph = window
        .windows(2)
        .rposition(|w| w[0] == '\n' && w[1] == '\n')
        .map(|i| floor + i + 2);
    if let Some(pos) = paragraph {
        return pos;
    }
    if let Some(i) = window.iter().rposition(|c| *c == '\n') {
        return floor + i + 1;
    }
    if let Some(i) = window.iter().rposition(|c| c.is_whitespace()) {
        return floor + i + 1;
    }
    hard_end
}

/// Move `pos` forward to the start of a word, never past `limit`.
fn snap_to_word_start(chars: &[char], pos: usize, limit: usize) -> usize {
    if pos == 0 || chars[pos - 1].is_whitespace() {
        return pos;
    }
    let mut i = pos;
    while i < limit && !chars[i].is_whitespace() {
        i += 1;
    }
    if i >= limit {
        return pos;
    }
    while i < limit && chars[i].is_whitespace() {
        i += 1;
    }
    i
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> DocumentChunk {
    DocumentChunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        content: text.to_string(),
        chunk_size: text.chars().count() as i64,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", 1000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].content, "Hello, world!");
        assert_eq!(chunks[0].chunk_size, 13);
    }

    #[test]
    fn test_blank_text_yields_nothing() {
        assert!(chunk_text("doc1", "", 1000, 200).is_empty());
        assert!(chunk_text("doc1", "  \n\n  ", 1000, 200).is_empty());
    }

    #[test]
    fn test_chunk_indices_contiguous_and_bounded() {
        let text = (0..200)
            .map(|i| format!("Sentence number {} talks about nothing.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text("doc1", &text, 120, 30);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
            assert!(!c.content.is_empty());
            assert!(c.content.chars().count() <= 120);
            assert_eq!(c.chunk_size, c.content.chars().count() as i64);
        }
    }

    #[test]
    fn test_overlap_repeats_text() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu";
        let chunks = chunk_text("doc1", text, 30, 12);
        assert!(chunks.len() > 1);
        let first_words: Vec<&str> = chunks[0].content.split_whitespace().collect();
        let last_of_first = first_words[first_words.len() - 1];
        assert!(
            chunks[1].content.contains(last_of_first),
            "expected overlap of {:?} in {:?}",
            last_of_first,
            chunks[1].content
        );
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let text = format!("{}\n\n{}", "a".repeat(60), "b".repeat(60));
        let chunks = chunk_text("doc1", &text, 100, 0);
        assert_eq!(chunks[0].content, "a".repeat(60));
        assert_eq!(chunks[1].content, "b".repeat(60));
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        let chunks = chunk_text("doc1", text, 7, 2);
        assert!(!chunks.is_empty());
        for c in &chunks {
            assert!(!c.content.is_empty());
            assert!(c.content.chars().count() <= 7);
        }
    }

    #[test]
    fn test_degenerate_sizes_terminate() {
        let chunks = chunk_text("doc1", "abcdef", 0, 10);
        assert_eq!(chunks.len(), 6);
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = chunk_text("doc1", text, 8, 2);
        let c2 = chunk_text("doc1", text, 8, 2);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.content, b.content);
            assert_eq!(a.chunk_index, b.chunk_index);
        }
    }
}
