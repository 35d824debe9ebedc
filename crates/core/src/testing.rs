//! Fakes for the external services, shared by unit tests.

use crate::answer::{CompletionRequest, CompletionService};
use crate::embeddings::{CharacterNgramEmbedder, Embedder};
use crate::error::{IngestError, ServiceError};
use crate::models::{DocumentKind, DocumentRef};
use crate::traits::DocumentSource;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Trigram embedder that counts calls and fails on texts containing
/// `fail_marker`.
#[derive(Default)]
pub struct CountingEmbedder {
    inner: CharacterNgramEmbedder,
    calls: AtomicUsize,
    fail_marker: Option<String>,
}

impl CountingEmbedder {
    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            ..Self::default()
        }
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            inner: CharacterNgramEmbedder { dimensions },
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn dimensions(&self) -> Option<usize> {
        self.inner.dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_marker {
            if text.contains(marker.as_str()) {
                return Err(ServiceError::Embedding(format!("refusing to embed `{marker}`")));
            }
        }
        Ok(self.inner.embed_sync(text))
    }
}

enum Script {
    Reply(String),
    Timeout,
}

pub struct ScriptedCompletion {
    script: Script,
    calls: AtomicUsize,
    last_request: Mutex<Option<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn replying(text: &str) -> Self {
        Self::new(Script::Reply(text.to_string()))
    }

    pub fn timing_out() -> Self {
        Self::new(Script::Timeout)
    }

    fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.last_request.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.last_request.lock() {
            *guard = Some(request.clone());
        }

        match &self.script {
            Script::Reply(text) => Ok(text.clone()),
            Script::Timeout => Err(ServiceError::Timeout {
                service: "completion service",
                seconds: 30,
            }),
        }
    }
}

/// Documents held in memory; `None` content simulates an unreadable file.
#[derive(Default)]
pub struct MemorySource {
    documents: BTreeMap<String, Option<String>>,
}

impl MemorySource {
    pub fn with(mut self, id: &str, text: &str) -> Self {
        self.set(id, text);
        self
    }

    pub fn set(&mut self, id: &str, text: &str) {
        self.documents.insert(id.to_string(), Some(text.to_string()));
    }

    pub fn set_unreadable(&mut self, id: &str) {
        self.documents.insert(id.to_string(), None);
    }

    pub fn remove(&mut self, id: &str) {
        self.documents.remove(id);
    }
}

impl DocumentSource for MemorySource {
    fn discover(&self) -> Result<Vec<DocumentRef>, IngestError> {
        Ok(self
            .documents
            .keys()
            .map(|id| DocumentRef {
                id: id.clone(),
                path: PathBuf::from(id),
                kind: DocumentKind::PlainText,
            })
            .collect())
    }

    fn read(&self, document: &DocumentRef) -> Result<String, IngestError> {
        match self.documents.get(&document.id) {
            Some(Some(text)) => Ok(text.clone()),
            _ => Err(IngestError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("cannot read {}", document.id),
            ))),
        }
    }
}
