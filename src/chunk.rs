//! Overlapping, word-boundary text chunker.
//!
//! Splits extracted document text into [`Chunk`]s of at most `max_chars`
//! characters. Each chunk is an exact slice of the input, so the original
//! text can be rebuilt from the chunks and their `start_char`/`end_char`
//! ranges. Boundaries prefer paragraph breaks, then line breaks, then
//! sentence ends, then any whitespace; a word is only cut when it alone is
//! longer than `max_chars`.
//!
//! Consecutive chunks share up to `overlap` characters so context that
//! straddles a boundary is retrievable from either side.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::ChunkError;
use crate::models::Chunk;

/// Split text into chunks with contiguous indices starting at 0.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_chars: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, ChunkError> {
    if max_chars == 0 {
        return Err(ChunkError::InvalidConfig(
            "chunk size must be greater than zero".to_string(),
        ));
    }
    if overlap >= max_chars {
        return Err(ChunkError::InvalidConfig(format!(
            "overlap ({}) must be smaller than chunk size ({})",
            overlap, max_chars
        )));
    }
    if text.trim().is_empty() {
        return Err(ChunkError::EmptyInput);
    }

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut chunk_index: i64 = 0;

    loop {
        if len - start <= max_chars {
            chunks.push(make_chunk(document_id, chunk_index, &chars, start, len));
            break;
        }

        let end = find_break(&chars, start, start + max_chars);
        chunks.push(make_chunk(document_id, chunk_index, &chars, start, end));
        chunk_index += 1;

        let mut next = end.saturating_sub(overlap);
        // Overlap must begin at a word start.
        while next < end && next > 0 && !chars[next - 1].is_whitespace() {
            next += 1;
        }
        start = if next > start { next } else { end };
    }

    Ok(chunks)
}

/// Pick the end of a chunk starting at `start` whose hard limit is `limit`
/// (`limit < chars.len()`). Returns a position in `(start, limit]`, directly
/// after a whitespace character unless the window holds none.
fn find_break(chars: &[char], start: usize, limit: usize) -> usize {
    let lower = (start + (limit - start) / 2).max(start + 1);

    let last_matching =
        |lo: usize, pred: &dyn Fn(usize) -> bool| (lo..=limit).rev().find(|&p| pred(p));

    let paragraph = |p: usize| p >= 2 && chars[p - 1] == '\n' && chars[p - 2] == '\n';
    let line = |p: usize| chars[p - 1] == '\n';
    let sentence = |p: usize| {
        p >= 2 && chars[p - 1].is_whitespace() && matches!(chars[p - 2], '.' | '!' | '?')
    };
    let word = |p: usize| chars[p - 1].is_whitespace();

    last_matching(lower, &paragraph)
        .or_else(|| last_matching(lower, &line))
        .or_else(|| last_matching(lower, &sentence))
        .or_else(|| last_matching(lower, &word))
        .or_else(|| last_matching(start + 1, &word))
        .unwrap_or(limit)
}

fn make_chunk(document_id: &str, index: i64, chars: &[char], start: usize, end: usize) -> Chunk {
    let text: String = chars[start..end].iter().collect();
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text,
        start_char: start,
        end_char: end,
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rebuild the source text from chunk ranges, dropping overlapping prefixes.
    fn reconstruct(chunks: &[Chunk]) -> String {
        let mut out = String::new();
        let mut covered = 0usize;
        for c in chunks {
            let skip = covered.saturating_sub(c.start_char);
            out.extend(c.text.chars().skip(skip));
            covered = c.end_char;
        }
        out
    }

    fn sample_text() -> String {
        (0..40)
            .map(|i| {
                format!(
                    "Paragraph {} talks about topic number {}. It has two sentences!",
                    i,
                    i * 7
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1", "Hello, world!", 500, 100).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!((chunks[0].start_char, chunks[0].end_char), (0, 13));
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(chunk_text("doc1", "", 500, 100), Err(ChunkError::EmptyInput));
        assert_eq!(
            chunk_text("doc1", " \n\t ", 500, 100),
            Err(ChunkError::EmptyInput)
        );
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            chunk_text("doc1", "text", 0, 0),
            Err(ChunkError::InvalidConfig(_))
        ));
        assert!(matches!(
            chunk_text("doc1", "text", 100, 100),
            Err(ChunkError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_lossless_reconstruction() {
        let text = sample_text();
        let chunks = chunk_text("doc1", &text, 120, 30).unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(reconstruct(&chunks), text);
        assert_eq!(chunks[0].start_char, 0);
        assert_eq!(chunks.last().unwrap().end_char, text.chars().count());
    }

    #[test]
    fn test_lossless_with_multibyte_text() {
        let text = "Ação rápida é necessária. ".repeat(30);
        let chunks = chunk_text("doc1", &text, 50, 10).unwrap();
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_size_and_overlap_bounds() {
        let text = sample_text();
        let chunks = chunk_text("doc1", &text, 120, 30).unwrap();
        for c in &chunks {
            assert!(c.text.chars().count() <= 120);
        }
        for pair in chunks.windows(2) {
            assert!(pair[1].start_char > pair[0].start_char);
            assert!(pair[1].start_char <= pair[0].end_char);
            assert!(pair[0].end_char - pair[1].start_char <= 30);
        }
    }

    #[test]
    fn test_never_splits_inside_word() {
        let text = sample_text();
        let chars: Vec<char> = text.chars().collect();
        let chunks = chunk_text("doc1", &text, 90, 20).unwrap();
        for c in &chunks {
            if c.end_char < chars.len() {
                let inside_word =
                    !chars[c.end_char - 1].is_whitespace() && !chars[c.end_char].is_whitespace();
                assert!(!inside_word, "chunk {} ends mid-word", c.chunk_index);
            }
            if c.start_char > 0 {
                assert!(chars[c.start_char - 1].is_whitespace());
            }
        }
    }

    #[test]
    fn test_prefers_paragraph_breaks() {
        let text = "First paragraph is here.\n\nSecond paragraph follows it closely.";
        let chunks = chunk_text("doc1", text, 40, 0).unwrap();
        assert_eq!(chunks[0].text, "First paragraph is here.\n\n");
    }

    #[test]
    fn test_long_word_is_hard_split() {
        let text = "x".repeat(25);
        let chunks = chunk_text("doc1", &text, 10, 2).unwrap();
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= 10));
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let chunks = chunk_text("doc1", &sample_text(), 60, 15).unwrap();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
            assert_eq!(c.document_id, "doc1");
        }
    }

    #[test]
    fn test_deterministic() {
        let text = sample_text();
        let c1 = chunk_text("doc1", &text, 80, 20).unwrap();
        let c2 = chunk_text("doc1", &text, 80, 20).unwrap();
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.text, b.text);
            assert_eq!(a.hash, b.hash);
            assert_eq!(a.chunk_index, b.chunk_index);
        }
    }
}
