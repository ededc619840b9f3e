//! Seams between the pipeline and the services it delegates to.
//!
//! Each hosted dependency sits behind one trait so the orchestrator can be
//! driven by in-memory fakes in tests.

use crate::Result;
use async_trait::async_trait;
use rover_core::{IndexedDocument, PaperInfo, Snippet};
use std::path::Path;

/// One part of a multimodal prompt
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    Inline { mime_type: String, data: Vec<u8> },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn pdf(bytes: Vec<u8>) -> Self {
        Self::Inline {
            mime_type: "application/pdf".to_string(),
            data: bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub parts: Vec<ContentPart>,
    /// Ask the model for a JSON document
    pub json_output: bool,
}

impl GenerateRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            parts: vec![ContentPart::text(prompt)],
            json_output: false,
        }
    }

    pub fn with_json_output(mut self) -> Self {
        self.json_output = true;
        self
    }

    /// Put a binary attachment before the text parts.
    pub fn with_attachment(mut self, part: ContentPart) -> Self {
        self.parts.insert(0, part);
        self
    }

    pub fn has_attachment(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, ContentPart::Inline { .. }))
    }
}

/// Hosted language model
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<String>;
}

/// A corpus as listed by the search service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusSummary {
    pub id: String,
    pub name: String,
}

/// Hosted vector search over named corpora
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn list_corpora(&self) -> Result<Vec<CorpusSummary>>;

    async fn create_corpus(&self, name: &str, description: &str) -> Result<String>;

    async fn index_document(&self, corpus_id: &str, document: &IndexedDocument) -> Result<()>;

    async fn query(&self, corpus_id: &str, text: &str, top_k: usize) -> Result<Vec<Snippet>>;
}

/// Paper metadata and PDF source
#[async_trait]
pub trait PaperSource: Send + Sync {
    /// Exact record for a version-free identifier; `None` when the source has no such paper.
    async fn fetch(&self, arxiv_id: &str) -> Result<Option<PaperInfo>>;

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<PaperInfo>>;

    async fn download_pdf(&self, pdf_url: &str) -> Result<Vec<u8>>;
}

/// Code-search service mapping papers to repositories
#[async_trait]
pub trait RepoSearch: Send + Sync {
    async fn find_by_arxiv_id(&self, arxiv_id: &str) -> Result<Option<String>>;
}

/// Git operations on the local machine
#[async_trait]
pub trait GitHost: Send + Sync {
    async fn shallow_clone(&self, url: &str, dest: &Path) -> Result<()>;

    async fn head_revision(&self, repo: &Path) -> Result<Option<String>>;
}
