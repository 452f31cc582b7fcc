//! # Text Chunking
//!
//! Splits enriched post text into overlapping chunks for embedding. Chunks
//! target a fixed token budget, cut at paragraph boundaries where possible,
//! and carry a tail overlap so context is not lost at chunk seams.
//!
//! Token counts are approximated by whitespace-separated words, which is
//! accurate enough for sizing chunks against an embedding model's window.

use crate::constants::{CHUNK_OVERLAP_TOKENS, CHUNK_TARGET_TOKENS};

/// One chunk of a post's text, ready for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of the chunk within the post, starting at 0. Used to derive
    /// the stable point id.
    pub index: usize,
    pub text: String,
}

/// Chunks text with the default sizing (≈500-token target, ≈50-token
/// overlap).
pub fn chunk_text(text: &str) -> Vec<Chunk> {
    chunk_text_with(text, CHUNK_TARGET_TOKENS, CHUNK_OVERLAP_TOKENS)
}

/// Chunks text with explicit sizing.
///
/// Paragraphs are packed greedily up to the target; a paragraph larger than
/// the target is split on word windows. Every chunk after the first starts
/// with the last `overlap` words of its predecessor.
pub fn chunk_text_with(text: &str, target: usize, overlap: usize) -> Vec<Chunk> {
    let target = target.max(1);
    let overlap = overlap.min(target / 2);

    let paragraphs: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if paragraphs.is_empty() {
        return Vec::new();
    }

    // Pack paragraphs into word runs no larger than the target.
    let mut runs: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for paragraph in paragraphs {
        let words: Vec<&str> = paragraph.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }
        if !current.is_empty() && current.len() + words.len() > target {
            runs.push(std::mem::take(&mut current));
        }
        if words.len() > target {
            // Oversized paragraph: window it on word boundaries.
            let mut start = 0;
            while start < words.len() {
                let end = (start + target).min(words.len());
                runs.push(words[start..end].to_vec());
                if end == words.len() {
                    break;
                }
                start = end;
            }
        } else {
            current.extend(words);
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }

    // Materialize chunks, prepending the predecessor's tail as overlap.
    let mut chunks = Vec::with_capacity(runs.len());
    let mut previous_tail: Vec<String> = Vec::new();
    for (index, run) in runs.into_iter().enumerate() {
        let mut words: Vec<String> = Vec::with_capacity(previous_tail.len() + run.len());
        if index > 0 {
            words.extend(previous_tail.iter().cloned());
        }
        words.extend(run.iter().map(|w| w.to_string()));

        previous_tail = run
            .iter()
            .rev()
            .take(overlap)
            .rev()
            .map(|w| w.to_string())
            .collect();

        chunks.push(Chunk {
            index,
            text: words.join(" "),
        });
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk_text("").is_empty());
        assert!(chunk_text("   \n\n  ").is_empty());
    }

    #[test]
    fn short_text_yields_single_chunk() {
        let chunks = chunk_text("AI breakthrough announced today.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].text, "AI breakthrough announced today.");
    }

    #[test]
    fn long_text_is_windowed_with_overlap() {
        let text = words(250);
        let chunks = chunk_text_with(&text, 100, 10);
        assert_eq!(chunks.len(), 3);

        // Chunks after the first begin with the predecessor's last words.
        let first_words: Vec<&str> = chunks[0].text.split_whitespace().collect();
        let second_words: Vec<&str> = chunks[1].text.split_whitespace().collect();
        assert_eq!(&second_words[..10], &first_words[first_words.len() - 10..]);

        // Indices are sequential.
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn paragraph_boundaries_are_preferred() {
        let text = format!("{}\n\n{}", words(60), words(60));
        let chunks = chunk_text_with(&text, 100, 10);
        // Two 60-word paragraphs don't fit one 100-word chunk; the cut must
        // land on the paragraph boundary rather than mid-paragraph.
        assert_eq!(chunks.len(), 2);
        let first: Vec<&str> = chunks[0].text.split_whitespace().collect();
        assert_eq!(first.len(), 60);
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = words(1_000);
        assert_eq!(chunk_text(&text), chunk_text(&text));
    }
}
