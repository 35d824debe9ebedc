use crate::error::{IndexError, IngestError};
use crate::models::{DocumentRef, EmbeddingRecord, RetrievedPassage};

/// Storage of embedded chunks keyed by `(document_id, index)`.
///
/// Every write is applied completely or not at all.
pub trait VectorIndex {
    /// Insert the record, or replace the one with the same chunk id.
    fn upsert(&mut self, record: &EmbeddingRecord) -> Result<(), IndexError>;

    /// Swap every record of `document_id` for `records` in one step.
    fn replace_document(
        &mut self,
        document_id: &str,
        records: &[EmbeddingRecord],
    ) -> Result<(), IndexError>;

    /// Remove all records of the document, returning how many were removed.
    fn delete_by_document(&mut self, document_id: &str) -> Result<usize, IndexError>;

    /// Most similar records first, at most `top_k` of them.
    fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<RetrievedPassage>, IndexError>;

    fn fingerprint_for_document(&self, document_id: &str) -> Result<Option<String>, IndexError>;

    fn document_ids(&self) -> Result<Vec<String>, IndexError>;

    fn len(&self) -> Result<usize, IndexError>;

    fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len()? == 0)
    }

    /// Vector dimensionality fixed by the first stored record.
    fn dimension(&self) -> Option<usize>;
}

/// Where documents come from.
pub trait DocumentSource {
    fn discover(&self) -> Result<Vec<DocumentRef>, IngestError>;

    fn read(&self, document: &DocumentRef) -> Result<String, IngestError>;
}
