//! Chunker is an external collaborator per the design: it owns the policy for
//! splitting text into embeddable units. This module defines the trait and a
//! single production implementation (a token-aware line-window splitter); it
//! deliberately does not attempt per-language syntax awareness.

use tiktoken_rs::CoreBPE;

/// One chunk of source text ready for embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
}

pub trait Chunker: Send + Sync {
    /// Split the contents of a file already read into memory.
    fn chunk_file(&self, relative_path: &str, contents: &str) -> Vec<Chunk>;

    /// Split an arbitrary piece of text with no file identity (e.g. a single
    /// historical blob read out of git).
    fn chunk_text(&self, text: &str) -> Vec<Chunk>;
}

/// Splits on line boundaries, packing consecutive lines into a window of at
/// most `target_tokens`, overlapping the last `overlap_lines` lines of each
/// chunk into the next so that embeddings on either side of a chunk boundary
/// still share some context.
pub struct TokenWindowChunker {
    target_tokens: usize,
    overlap_lines: usize,
    bpe: CoreBPE,
}

impl TokenWindowChunker {
    pub fn new(target_tokens: usize, overlap_lines: usize) -> anyhow::Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()?;
        Ok(Self {
            target_tokens,
            overlap_lines,
            bpe,
        })
    }

    fn token_count(&self, s: &str) -> usize {
        self.bpe.encode_ordinary(s).len()
    }

    fn window(&self, lines: &[&str]) -> Vec<Chunk> {
        if lines.is_empty() {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < lines.len() {
            let mut end = start;
            let mut tokens = 0usize;

            while end < lines.len() {
                let line_tokens = self.token_count(lines[end]) + 1;
                if tokens > 0 && tokens + line_tokens > self.target_tokens {
                    break;
                }
                tokens += line_tokens;
                end += 1;
            }

            // A single line that alone exceeds the budget still forms its own
            // chunk; the embedding provider, not the chunker, decides whether
            // that is too large to embed.
            if end == start {
                end = start + 1;
            }

            let text = lines[start..end].join("\n");
            chunks.push(Chunk {
                text,
                start_line: start,
                end_line: end.saturating_sub(1),
            });

            if end >= lines.len() {
                break;
            }
            start = end.saturating_sub(self.overlap_lines).max(start + 1);
        }

        chunks
    }
}

impl Chunker for TokenWindowChunker {
    fn chunk_file(&self, _relative_path: &str, contents: &str) -> Vec<Chunk> {
        let lines: Vec<&str> = contents.lines().collect();
        self.window(&lines)
    }

    fn chunk_text(&self, text: &str) -> Vec<Chunk> {
        let lines: Vec<&str> = text.lines().collect();
        self.window(&lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_produces_no_chunks() {
        let chunker = TokenWindowChunker::new(200, 2).unwrap();
        assert!(chunker.chunk_text("").is_empty());
    }

    #[test]
    fn small_file_is_a_single_chunk() {
        let chunker = TokenWindowChunker::new(200, 2).unwrap();
        let chunks = chunker.chunk_file("a.rs", "fn main() {}\nfn other() {}");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 0);
    }

    #[test]
    fn large_file_is_split_into_multiple_overlapping_chunks() {
        let chunker = TokenWindowChunker::new(20, 2).unwrap();
        let body = (0..200)
            .map(|i| format!("let line_{i} = {i};"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunker.chunk_file("big.rs", &body);
        assert!(chunks.len() > 1);
        // consecutive chunks overlap by at least one line
        for pair in chunks.windows(2) {
            assert!(pair[1].start_line <= pair[0].end_line);
        }
    }
}
