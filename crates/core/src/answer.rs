use crate::error::{QaError, ServiceError};
use async_trait::async_trait;
use std::fmt;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly and helpful assistant that answers questions based ONLY on the provided documents. If the information is not in the documents, say so. If the question is about projects, mention that GitHub links are available for all projects.";

pub const NO_RELEVANT_MATERIAL: &str = "No relevant information found in the documents.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
}

/// Prompt in, generated text out.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError>;
}

#[async_trait]
impl<T: CompletionService + ?Sized> CompletionService for Box<T> {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ServiceError> {
        (**self).complete(request).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Generated(String),
    /// Nothing relevant was retrieved; the completion service was not called.
    NoRelevantMaterial,
}

impl Answer {
    pub fn is_grounded(&self) -> bool {
        matches!(self, Self::Generated(_))
    }
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generated(text) => f.write_str(text),
            Self::NoRelevantMaterial => f.write_str(NO_RELEVANT_MATERIAL),
        }
    }
}

pub fn build_prompt(question: &str, context: &str) -> String {
    format!("Context:\n{context}\n\nQuestion: {question}")
}

pub struct AnswerSynthesizer<C> {
    completion: C,
    system_prompt: String,
}

impl<C: CompletionService> AnswerSynthesizer<C> {
    pub fn new(completion: C) -> Self {
        Self {
            completion,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn completion(&self) -> &C {
        &self.completion
    }

    pub async fn answer(&self, question: &str, context: &str) -> Result<Answer, QaError> {
        if context.trim().is_empty() {
            return Ok(Answer::NoRelevantMaterial);
        }

        let request = CompletionRequest {
            system: self.system_prompt.clone(),
            user: build_prompt(question, context),
        };
        let text = self.completion.complete(&request).await?;

        if text.trim().is_empty() {
            return Err(ServiceError::Generation(
                "completion service returned an empty answer".to_string(),
            )
            .into());
        }
        Ok(Answer::Generated(text.trim().to_string()))
    }
}
