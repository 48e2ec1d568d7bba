//! Line-aligned overlapping chunker
//!
//! Slides a fixed-size window over the file content with overlap, then
//! aligns both window edges to line boundaries: the start advances past
//! the next newline (except for the first chunk), the end pulls back so
//! the last byte is a newline (except at end of content). Windows that
//! shrink below the minimum after alignment are skipped. Alignment keeps
//! snippets display-worthy, and overlap preserves symbol context across
//! chunk boundaries.

/// Chunker parameters. Defaults: 512-byte windows, 64-byte overlap,
/// 10-byte minimum, 4096-byte maximum.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub overlap: usize,
    pub min_size: usize,
    pub max_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            overlap: 64,
            min_size: 10,
            max_size: 4096,
        }
    }
}

/// A chunk candidate ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    pub content: String,
    pub start_offset: usize,
    pub end_offset: usize,
    /// 1-based, inclusive
    pub start_line: i64,
    pub end_line: i64,
}

fn count_newlines(data: &[u8]) -> usize {
    data.iter().filter(|&&b| b == b'\n').count()
}

/// Line number of the last line touched by `content[..end]`
fn end_line_at(content: &[u8], end: usize) -> i64 {
    let newlines = count_newlines(&content[..end]);
    if end > 0 && content[end - 1] == b'\n' {
        newlines as i64
    } else {
        newlines as i64 + 1
    }
}

/// Split `content` into line-aligned overlapping chunks.
///
/// Content shorter than the minimum produces nothing; content within one
/// window becomes a single chunk spanning the whole input.
pub fn chunk_content(content: &str, cfg: &ChunkerConfig) -> Vec<ChunkPiece> {
    let bytes = content.as_bytes();
    let len = bytes.len();
    let mut chunks = Vec::new();

    if len < cfg.min_size {
        return chunks;
    }

    if len <= cfg.chunk_size {
        chunks.push(ChunkPiece {
            content: content.to_string(),
            start_offset: 0,
            end_offset: len,
            start_line: 1,
            end_line: end_line_at(bytes, len),
        });
        return chunks;
    }

    let stride = if cfg.chunk_size > cfg.overlap {
        cfg.chunk_size - cfg.overlap
    } else {
        cfg.chunk_size
    };
    let stride = stride.max(1);

    let mut offset = 0usize;
    while offset < len {
        let mut end = (offset + cfg.chunk_size).min(len).min(offset + cfg.max_size);

        // Start on a line boundary: skip to the byte after the next newline
        if offset > 0 {
            while offset < len && bytes[offset] != b'\n' {
                offset += 1;
            }
            if offset < len {
                offset += 1;
            }
        }

        // End on a line boundary: pull back so the last byte is a newline
        if end < len {
            while end > offset && bytes[end - 1] != b'\n' {
                end -= 1;
            }
        }

        if end <= offset {
            // Nothing alignable in this window; nudge forward
            offset += stride.min(100);
            continue;
        }

        if end - offset >= cfg.min_size {
            let start_line = count_newlines(&bytes[..offset]) as i64 + 1;
            chunks.push(ChunkPiece {
                content: content[offset..end].to_string(),
                start_offset: offset,
                end_offset: end,
                start_line,
                end_line: end_line_at(bytes, end),
            });
        }

        offset += stride;
        if end >= len {
            break;
        }
    }

    chunks
}
