use docchat_schema::Chunk;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error("no text to chunk")]
    EmptyInput,
    #[error("chunk_size must be greater than zero")]
    ZeroChunkSize,
    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
}

/// Window sizes for the chunker, both counted in chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Default: 1000
    pub chunk_size: usize,
    /// Chars shared by consecutive chunks. Default: 200
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkerConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
        }
    }

    pub fn validate(&self) -> Result<(), ChunkError> {
        if self.chunk_size == 0 {
            return Err(ChunkError::ZeroChunkSize);
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ChunkError::OverlapTooLarge {
                size: self.chunk_size,
                overlap: self.chunk_overlap,
            });
        }
        Ok(())
    }

    fn step(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

/// Fixed-window splitter.
///
/// Window `i` covers chars `[i * step, i * step + chunk_size)` where
/// `step = chunk_size - chunk_overlap`. The sequence ends with the first
/// window that reaches the end of the text, so only the last chunk can be
/// shorter than `chunk_size` and every neighbour pair shares exactly
/// `chunk_overlap` chars.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Result<Self, ChunkError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Lazily split `text`. Calling this again (or cloning the iterator)
    /// restarts from the first chunk.
    pub fn chunks<'a>(&self, text: &'a str) -> Result<Chunks<'a>, ChunkError> {
        if text.is_empty() {
            return Err(ChunkError::EmptyInput);
        }
        Ok(Chunks {
            text,
            size: self.config.chunk_size,
            step: self.config.step(),
            total_chars: text.chars().count(),
            next_byte: 0,
            next_char: 0,
            index: 0,
            done: false,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    size: usize,
    step: usize,
    total_chars: usize,
    next_byte: usize,
    next_char: usize,
    index: usize,
    done: bool,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }

        let rest = &self.text[self.next_byte..];
        let window_end = byte_offset_after(rest, self.size);
        let chunk = Chunk {
            index: self.index,
            start: self.next_char,
            text: rest[..window_end].to_owned(),
        };

        if self.next_byte + window_end >= self.text.len() {
            self.done = true;
        } else {
            self.next_byte += byte_offset_after(rest, self.step);
            self.next_char += self.step;
        }
        self.index += 1;

        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.done {
            0
        } else {
            let remaining_chars = self.total_chars - self.next_char;
            if remaining_chars <= self.size {
                1
            } else {
                1 + (remaining_chars - self.size).div_ceil(self.step)
            }
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks<'_> {}

/// Join chunks back into the source text, dropping the `overlap` chars each
/// chunk shares with its predecessor.
pub fn reassemble(chunks: &[Chunk], overlap: usize) -> String {
    let mut out = String::new();
    for (position, chunk) in chunks.iter().enumerate() {
        if position == 0 {
            out.push_str(&chunk.text);
        } else {
            let skip = byte_offset_after(&chunk.text, overlap);
            out.push_str(&chunk.text[skip..]);
        }
    }
    out
}

fn byte_offset_after(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(offset, _)| offset)
        .unwrap_or(text.len())
}
