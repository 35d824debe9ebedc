use crate::answer::{Answer, AnswerSynthesizer, CompletionService};
use crate::chunking::ChunkingConfig;
use crate::context::{build_context, PassageFormat, DEFAULT_MAX_CONTEXT_CHARS};
use crate::embeddings::Embedder;
use crate::error::{ConfigError, IndexError, IngestError, QaError};
use crate::ingest::{ingest_documents, IngestionReport};
use crate::models::{IngestMode, RetrievedPassage};
use crate::projects::ProjectCatalog;
use crate::retrieval::{Retriever, DEFAULT_TOP_K};
use crate::traits::{DocumentSource, VectorIndex};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub chunking: ChunkingConfig,
    pub top_k: usize,
    pub max_context_chars: usize,
    pub passage_format: PassageFormat,
}

impl PipelineOptions {
    pub fn new(
        chunking: ChunkingConfig,
        top_k: usize,
        max_context_chars: usize,
    ) -> Result<Self, ConfigError> {
        if top_k == 0 {
            return Err(ConfigError::InvalidTopK);
        }
        if max_context_chars == 0 {
            return Err(ConfigError::InvalidContextBudget);
        }

        Ok(Self {
            chunking,
            top_k,
            max_context_chars,
            passage_format: PassageFormat::default(),
        })
    }

    pub fn with_passage_format(mut self, passage_format: PassageFormat) -> Self {
        self.passage_format = passage_format;
        self
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            top_k: DEFAULT_TOP_K,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
            passage_format: PassageFormat::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub passages: Vec<RetrievedPassage>,
    /// Context handed to the completion service, project section included.
    pub context: String,
    pub answer: Answer,
}

/// Owns the index and the external services for one session.
pub struct QaPipeline<I, E, C> {
    index: I,
    embedder: E,
    synthesizer: AnswerSynthesizer<C>,
    options: PipelineOptions,
    projects: ProjectCatalog,
}

impl<I, E, C> QaPipeline<I, E, C>
where
    I: VectorIndex,
    E: Embedder,
    C: CompletionService,
{
    pub fn new(index: I, embedder: E, completion: C, options: PipelineOptions) -> Self {
        Self {
            index,
            embedder,
            synthesizer: AnswerSynthesizer::new(completion),
            options,
            projects: ProjectCatalog::default(),
        }
    }

    pub fn with_projects(mut self, projects: ProjectCatalog) -> Self {
        self.projects = projects;
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.synthesizer = self.synthesizer.with_system_prompt(system_prompt);
        self
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Fail early when the embedder's known dimensionality cannot match the
    /// vectors already stored.
    pub fn check_embedder(&self) -> Result<(), IndexError> {
        match (self.index.dimension(), self.embedder.dimensions()) {
            (Some(expected), Some(actual)) if expected != actual => {
                Err(IndexError::Schema { expected, actual })
            }
            _ => Ok(()),
        }
    }

    pub async fn ingest<S>(
        &mut self,
        source: &S,
        mode: IngestMode,
    ) -> Result<IngestionReport, IngestError>
    where
        S: DocumentSource + ?Sized,
    {
        let report = ingest_documents(
            source,
            &mut self.index,
            &self.embedder,
            self.options.chunking,
            mode,
        )
        .await?;

        if !report.failed.is_empty() {
            warn!(failed = report.failed_count(), "some documents were not indexed");
        }
        Ok(report)
    }

    pub async fn ask(&self, question: &str) -> Result<AskOutcome, QaError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(QaError::EmptyQuestion);
        }

        let passages = Retriever::new(&self.index, &self.embedder)
            .retrieve(question, self.options.top_k)
            .await?;
        let mut context = build_context(
            &passages,
            self.options.max_context_chars,
            self.options.passage_format,
        );
        self.projects.augment(question, &mut context);

        let answer = self.synthesizer.answer(question, &context).await?;
        info!(
            passages = passages.len(),
            context_chars = context.chars().count(),
            grounded = answer.is_grounded(),
            "question answered"
        );

        Ok(AskOutcome {
            passages,
            context,
            answer,
        })
    }

    /// Hand the index back, e.g. to close it at shutdown.
    pub fn into_index(self) -> I {
        self.index
    }
}
