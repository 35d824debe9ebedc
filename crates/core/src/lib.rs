pub mod answer;
pub mod chunking;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod openai;
pub mod orchestrator;
pub mod projects;
pub mod retrieval;
pub mod store;
pub mod stores;
pub mod traits;

#[cfg(test)]
mod testing;

pub use answer::{
    build_prompt, Answer, AnswerSynthesizer, CompletionRequest, CompletionService,
    DEFAULT_SYSTEM_PROMPT, NO_RELEVANT_MATERIAL,
};
pub use chunking::{
    chunk, chunk_document, ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE,
};
pub use context::{
    build_context, ContextBudget, PassageFormat, DEFAULT_MAX_CONTEXT_CHARS, PASSAGE_DELIMITER,
};
pub use embeddings::{CharacterNgramEmbedder, Embedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{ConfigError, IndexError, IngestError, QaError, ServiceError};
pub use extractor::{PdfExtractor, PlainTextExtractor, TextExtractor, TEXT_EXTENSIONS};
pub use ingest::{
    document_id_for, ingest_documents, FailedDocument, FolderSource, IngestionReport,
};
pub use models::{
    fingerprint_text, Chunk, ChunkId, Document, DocumentKind, DocumentRef, EmbeddingRecord,
    IngestMode, RetrievedPassage,
};
pub use openai::{
    ChatSettings, OpenAiChatCompletion, OpenAiConfig, OpenAiEmbedder, DEFAULT_API_BASE,
    DEFAULT_CHAT_MODEL, DEFAULT_EMBEDDING_MODEL, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT,
};
pub use orchestrator::{AskOutcome, PipelineOptions, QaPipeline};
pub use projects::{Project, ProjectCatalog};
pub use retrieval::{Retriever, DEFAULT_TOP_K};
pub use stores::SqliteVectorIndex;
pub use traits::{DocumentSource, VectorIndex};
