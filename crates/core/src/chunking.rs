use crate::error::ConfigError;
use crate::models::{Chunk, ChunkId};

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Fixed-size character window used to split documents. Construct through
/// [`ChunkingConfig::new`] so the window always advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    chunk_size: usize,
    overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ConfigError> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(ConfigError::InvalidChunking {
                chunk_size,
                overlap,
            });
        }

        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn step(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

pub fn chunk(
    document_id: &str,
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>, ConfigError> {
    let config = ChunkingConfig::new(chunk_size, overlap)?;
    Ok(chunk_document(document_id, text, config))
}

pub fn chunk_document(document_id: &str, text: &str, config: ChunkingConfig) -> Vec<Chunk> {
    // Byte offset of every character boundary, including the end of the text.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = boundaries.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut index = 0u64;

    while start < char_count {
        let end = (start + config.chunk_size).min(char_count);
        chunks.push(Chunk {
            id: ChunkId::new(document_id, index),
            text: text[boundaries[start]..boundaries[end]].to_string(),
            start,
            end,
        });

        if end == char_count {
            break;
        }
        start += config.step();
        index += 1;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassemble(chunks: &[Chunk]) -> String {
        let mut text = String::new();
        let mut covered = 0;
        for chunk in chunks {
            let skip = covered - chunk.start;
            text.extend(chunk.text.chars().skip(skip));
            covered = chunk.end;
        }
        text
    }

    #[test]
    fn splits_hello_world_without_overlap() {
        let chunks = chunk("a.txt", "hello world", 5, 0).unwrap();
        let texts: Vec<&str> = chunks.iter().map(|chunk| chunk.text.as_str()).collect();

        assert_eq!(texts, vec!["hello", " worl", "d"]);
        assert_eq!(chunks[2].start, 10);
        assert_eq!(chunks[2].end, 11);
        for (position, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.id, ChunkId::new("a.txt", position as u64));
        }
    }

    #[test]
    fn overlapping_windows_advance_by_step() {
        let chunks = chunk("doc", "abcdefghij", 5, 2).unwrap();
        let spans: Vec<(usize, usize)> = chunks.iter().map(|chunk| (chunk.start, chunk.end)).collect();

        assert_eq!(spans, vec![(0, 5), (3, 8), (6, 10)]);
        assert_eq!(chunks[1].text, "defgh");
        assert_eq!(chunks[2].text, "ghij");
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunk("doc", "", 10, 3).unwrap().is_empty());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(matches!(
            chunk("doc", "text", 4, 4),
            Err(ConfigError::InvalidChunking {
                chunk_size: 4,
                overlap: 4
            })
        ));
        assert!(ChunkingConfig::new(0, 0).is_err());
    }

    #[test]
    fn reassembling_chunks_restores_the_text() {
        let samples = [
            "short",
            "Paragraph one.\n\nParagraph two has more words in it.\n",
            "ünïcödé text ß with multibyte characters 🦀 spread around 🦀🦀",
        ];
        let configs = [(1, 0), (3, 1), (7, 6), (16, 4), (200, 50)];

        for sample in samples {
            for (size, overlap) in configs {
                let chunks = chunk("doc", sample, size, overlap).unwrap();
                assert_eq!(reassemble(&chunks), sample, "size={size} overlap={overlap}");
                assert!(chunks.iter().all(|chunk| chunk.text.chars().count() <= size));
            }
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let text = "The same input should always split at the same places.";
        let config = ChunkingConfig::new(12, 5).unwrap();

        assert_eq!(
            chunk_document("doc", text, config),
            chunk_document("doc", text, config)
        );
    }
}
