use crate::embeddings::Embedder;
use crate::error::QaError;
use crate::models::RetrievedPassage;
use crate::traits::VectorIndex;
use tracing::debug;

pub const DEFAULT_TOP_K: usize = 5;

/// Embeds questions and looks up their nearest passages.
pub struct Retriever<'a, I: ?Sized, E: ?Sized> {
    index: &'a I,
    embedder: &'a E,
}

impl<'a, I, E> Retriever<'a, I, E>
where
    I: VectorIndex + ?Sized,
    E: Embedder + ?Sized,
{
    pub fn new(index: &'a I, embedder: &'a E) -> Self {
        Self { index, embedder }
    }

    pub async fn retrieve(
        &self,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedPassage>, QaError> {
        let vector = self.embedder.embed(question).await?;
        let passages = self.index.query(&vector, top_k)?;

        debug!(
            top_k,
            hits = passages.len(),
            best_score = passages.first().map(|passage| passage.score),
            "retrieved passages"
        );
        Ok(passages)
    }
}
