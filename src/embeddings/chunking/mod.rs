
use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

use crate::config::ConfigError;

/// Punctuation ending a sentence, optionally closed by a quote or bracket, then whitespace
static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[.!?]["'\)\]]*\s"#).expect("valid regex"));

/// A window of document text ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The chunk text, exactly as it appears in the document
    pub text: String,
    /// Position of this chunk within the document
    pub index: usize,
    /// Character offset of the chunk within the trimmed document text
    pub start: usize,
}

impl Chunk {
    /// Length of the chunk in characters
    #[inline]
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Configuration for document segmentation, measured in characters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 100,
        }
    }
}

impl ChunkingConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }

        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                self.chunk_overlap,
                self.chunk_size,
            ));
        }

        Ok(())
    }
}

/// Splits document text into bounded, overlapping windows.
///
/// Each window ends at the last paragraph break that fits, falling back to a line break,
/// a sentence end, any whitespace and finally a hard cut at `chunk_size`. The next window
/// starts `chunk_overlap` characters before the previous one ended.
#[derive(Debug, Clone, Copy)]
pub struct Segmenter {
    config: ChunkingConfig,
}

impl Segmenter {
    #[inline]
    pub fn new(config: ChunkingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    #[inline]
    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Segment `text` into chunks; whitespace-only input yields nothing
    #[inline]
    pub fn segment(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.trim().chars().collect();
        let mut chunks = Vec::new();

        if chars.is_empty() {
            return chunks;
        }

        let total = chars.len();
        let mut start = 0;

        loop {
            let end = if total - start <= self.config.chunk_size {
                total
            } else {
                self.window_end(&chars, start)
            };

            let window = chars.get(start..end).unwrap_or_default();
            if window.iter().any(|c| !c.is_whitespace()) {
                chunks.push(Chunk {
                    text: window.iter().collect(),
                    index: chunks.len(),
                    start,
                });
            }

            if end == total {
                break;
            }
            start = end - self.config.chunk_overlap;
        }

        debug!(
            "Segmented {} characters into {} chunks (size {}, overlap {})",
            total,
            chunks.len(),
            self.config.chunk_size,
            self.config.chunk_overlap
        );

        chunks
    }

    /// Pick the end of the window beginning at `start`, which is known not to be the last
    fn window_end(&self, chars: &[char], start: usize) -> usize {
        let hard_end = start + self.config.chunk_size;
        // Never end so early that the next window would fail to advance
        let min_len = (self.config.chunk_overlap + 1).max(self.config.chunk_size / 2);
        let min_end = start + min_len;

        last_end_where(min_end, hard_end, |end| {
            matches!(chars.get(end.saturating_sub(2)..end), Some(['\n', '\n']))
        })
        .or_else(|| {
            last_end_where(min_end, hard_end, |end| {
                matches!(chars.get(end - 1), Some('\n'))
            })
        })
        .or_else(|| last_sentence_end(chars, start, min_end, hard_end))
        .or_else(|| {
            last_end_where(min_end, hard_end, |end| {
                chars.get(end - 1).is_some_and(|c| c.is_whitespace())
            })
        })
        .unwrap_or(hard_end)
    }
}

/// Segment `text` with `config`, rejecting invalid configurations
#[inline]
pub fn segment(text: &str, config: ChunkingConfig) -> Result<Vec<Chunk>, ConfigError> {
    Ok(Segmenter::new(config)?.segment(text))
}

/// Largest end position in `min_end..=max_end` accepted by `accept`
fn last_end_where(min_end: usize, max_end: usize, accept: impl Fn(usize) -> bool) -> Option<usize> {
    (min_end..=max_end).rev().find(|&end| accept(end))
}

fn last_sentence_end(chars: &[char], start: usize, min_end: usize, max_end: usize) -> Option<usize> {
    let window: String = chars.get(start..max_end)?.iter().collect();

    SENTENCE_END
        .find_iter(&window)
        .filter_map(Result::ok)
        .map(|m| {
            // Match offsets are bytes; windows are measured in characters
            start
                + window
                    .char_indices()
                    .take_while(|(byte, _)| *byte < m.end())
                    .count()
        })
        .filter(|end| (min_end..=max_end).contains(end))
        .last()
}
