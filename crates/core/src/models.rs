use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

/// Identity of a chunk inside the index: the owning document plus the
/// chunk's position in that document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId {
    pub document_id: String,
    pub index: u64,
}

impl ChunkId {
    pub fn new(document_id: impl Into<String>, index: u64) -> Self {
        Self {
            document_id: document_id.into(),
            index,
        }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.document_id, self.index)
    }
}

/// A contiguous slice of a document. `start` and `end` count characters,
/// not bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    PlainText,
    Pdf,
}

/// A document found by a [`crate::DocumentSource`] but not read yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    pub id: String,
    pub path: PathBuf,
    pub kind: DocumentKind,
}

#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub fingerprint: String,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: id.into(),
            fingerprint: fingerprint_text(&text),
            text,
        }
    }
}

pub fn fingerprint_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub chunk_id: ChunkId,
    pub text: String,
    pub vector: Vec<f32>,
    pub fingerprint: String,
    pub indexed_at: DateTime<Utc>,
}

/// One hit of a similarity query. Higher scores are more similar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedPassage {
    pub chunk_id: ChunkId,
    pub text: String,
    pub score: f32,
}

impl RetrievedPassage {
    pub fn document_id(&self) -> &str {
        &self.chunk_id.document_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IngestMode {
    /// Index new and changed documents, then drop documents that vanished.
    Full,
    /// Index new and changed documents only.
    Incremental,
}
