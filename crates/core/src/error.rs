use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "invalid chunking config: chunk_size={chunk_size}, overlap={overlap} (chunk_size must be positive and larger than overlap)"
    )]
    InvalidChunking { chunk_size: usize, overlap: usize },

    #[error("context budget must allow at least one character")]
    InvalidContextBudget,

    #[error("top_k must be at least 1")]
    InvalidTopK,

    #[error("missing api key for {0}")]
    MissingApiKey(String),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index store at {path} is unreadable: {details}; delete it and run a full rebuild")]
    Corrupt { path: String, details: String },

    #[error("embedding dimension mismatch: index holds {expected}-d vectors, got {actual}")]
    Schema { expected: usize, actual: usize },

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("embedding service error: {0}")]
    Embedding(String),

    #[error("{service} did not answer within {seconds}s")]
    Timeout { service: &'static str, seconds: u64 },

    #[error("generation error: {0}")]
    Generation(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("unsupported document: {0}")]
    UnsupportedFile(String),

    #[error("document source not found: {0}")]
    SourceMissing(String),

    #[error("path is outside the document root: {0}")]
    InvalidPath(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl IngestError {
    /// Whether the failure only concerns the document being processed, so the
    /// rest of the batch can continue.
    pub fn is_document_local(&self) -> bool {
        match self {
            Self::Io(_)
            | Self::PdfParse(_)
            | Self::UnsupportedFile(_)
            | Self::InvalidPath(_)
            | Self::Service(_) => true,
            Self::Index(error) => matches!(
                error,
                IndexError::Schema { .. } | IndexError::InvalidRecord(_)
            ),
            Self::SourceMissing(_) | Self::Config(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum QaError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

impl QaError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Service(ServiceError::Timeout { .. }))
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
