use crate::chunking::{chunk_document, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::models::{Document, DocumentKind, DocumentRef, EmbeddingRecord, IngestMode};
use crate::traits::{DocumentSource, VectorIndex};
use crate::IngestError;
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Text and PDF files below a root directory, recursively.
#[derive(Debug, Clone)]
pub struct FolderSource {
    root: PathBuf,
}

impl FolderSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DocumentSource for FolderSource {
    fn discover(&self) -> Result<Vec<DocumentRef>, IngestError> {
        if !self.root.is_dir() {
            return Err(IngestError::SourceMissing(self.root.display().to_string()));
        }

        let mut documents = Vec::new();

        for entry in WalkDir::new(&self.root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(%error, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let is_hidden = entry.file_name().to_string_lossy().starts_with('.');
            if is_hidden {
                continue;
            }

            let Some(kind) = DocumentKind::from_path(path) else {
                warn!(path = %path.display(), "skipping unsupported file");
                continue;
            };

            match document_id_for(&self.root, path) {
                Ok(id) => documents.push(DocumentRef {
                    id,
                    path: path.to_path_buf(),
                    kind,
                }),
                Err(error) => warn!(path = %path.display(), %error, "skipping file"),
            }
        }

        documents.sort_unstable_by(|left, right| left.id.cmp(&right.id));
        Ok(documents)
    }

    fn read(&self, document: &DocumentRef) -> Result<String, IngestError> {
        document.kind.extractor().extract(&document.path)
    }
}

/// Path relative to the root with `/` separators, stable across platforms.
pub fn document_id_for(root: &Path, path: &Path) -> Result<String, IngestError> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| IngestError::InvalidPath(path.display().to_string()))?;

    let parts: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().to_string())
        .collect();

    if parts.is_empty() {
        return Err(IngestError::InvalidPath(path.display().to_string()));
    }
    Ok(parts.join("/"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDocument {
    pub document_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestionReport {
    pub discovered: usize,
    /// New or changed documents that were (re)chunked and embedded.
    pub indexed: usize,
    pub unchanged: usize,
    /// Documents without any text; they hold no records.
    pub empty: usize,
    pub removed: usize,
    pub chunks_embedded: usize,
    pub failed: Vec<FailedDocument>,
}

impl IngestionReport {
    pub fn succeeded(&self) -> usize {
        self.indexed + self.unchanged + self.empty
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

enum DocumentOutcome {
    Unchanged,
    Empty,
    Indexed { chunks: usize },
}

/// Bring the index in line with `source`.
///
/// Unchanged documents cost no embedding calls. A document that cannot be
/// read or embedded is logged and reported without stopping the batch;
/// storage failures abort it.
pub async fn ingest_documents<S, I, E>(
    source: &S,
    index: &mut I,
    embedder: &E,
    chunking: ChunkingConfig,
    mode: IngestMode,
) -> Result<IngestionReport, IngestError>
where
    S: DocumentSource + ?Sized,
    I: VectorIndex + ?Sized,
    E: Embedder + ?Sized,
{
    let documents = source.discover()?;
    let mut report = IngestionReport {
        discovered: documents.len(),
        ..IngestionReport::default()
    };
    let mut seen = HashSet::with_capacity(documents.len());

    for document in &documents {
        seen.insert(document.id.as_str());

        match ingest_one(source, index, embedder, chunking, document).await {
            Ok(DocumentOutcome::Unchanged) => {
                debug!(document_id = %document.id, "document unchanged");
                report.unchanged += 1;
            }
            Ok(DocumentOutcome::Empty) => {
                debug!(document_id = %document.id, "document has no text");
                report.empty += 1;
            }
            Ok(DocumentOutcome::Indexed { chunks }) => {
                info!(document_id = %document.id, chunks, "document indexed");
                report.indexed += 1;
                report.chunks_embedded += chunks;
            }
            Err(error) if error.is_document_local() => {
                warn!(document_id = %document.id, reason = %error, "document skipped");
                report.failed.push(FailedDocument {
                    document_id: document.id.clone(),
                    reason: error.to_string(),
                });
            }
            Err(error) => return Err(error),
        }
    }

    if mode == IngestMode::Full {
        for document_id in index.document_ids()? {
            if seen.contains(document_id.as_str()) {
                continue;
            }
            let records = index.delete_by_document(&document_id)?;
            info!(document_id = %document_id, records, "removed vanished document");
            report.removed += 1;
        }
    }

    info!(
        ?mode,
        discovered = report.discovered,
        indexed = report.indexed,
        unchanged = report.unchanged,
        empty = report.empty,
        removed = report.removed,
        failed = report.failed_count(),
        "ingestion finished"
    );
    Ok(report)
}

async fn ingest_one<S, I, E>(
    source: &S,
    index: &mut I,
    embedder: &E,
    chunking: ChunkingConfig,
    reference: &DocumentRef,
) -> Result<DocumentOutcome, IngestError>
where
    S: DocumentSource + ?Sized,
    I: VectorIndex + ?Sized,
    E: Embedder + ?Sized,
{
    let document = Document::new(reference.id.clone(), source.read(reference)?);

    let stored = index.fingerprint_for_document(&document.id)?;
    if stored.as_deref() == Some(document.fingerprint.as_str()) {
        return Ok(DocumentOutcome::Unchanged);
    }

    let chunks = chunk_document(&document.id, &document.text, chunking);
    if chunks.is_empty() {
        if stored.is_some() {
            index.delete_by_document(&document.id)?;
        }
        return Ok(DocumentOutcome::Empty);
    }
    let indexed_at = Utc::now();

    // Embed everything before touching the index so a failure leaves the
    // previous version of the document in place.
    let mut records = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let vector = embedder.embed(&chunk.text).await?;
        records.push(EmbeddingRecord {
            chunk_id: chunk.id,
            text: chunk.text,
            vector,
            fingerprint: document.fingerprint.clone(),
            indexed_at,
        });
    }

    index.replace_document(&document.id, &records)?;
    Ok(DocumentOutcome::Indexed {
        chunks: records.len(),
    })
}
