//! In-memory fakes of every external service.
//!
//! Each fake counts its calls so tests can assert that cached work is not
//! repeated.

use crate::traits::{
    CorpusSummary, GenerateRequest, GitHost, LanguageModel, PaperSource, RepoSearch, SearchIndex,
};
use crate::{AgentError, Result};
use async_trait::async_trait;
use rover_core::{IndexedDocument, PaperInfo, Snippet};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const FAKE_REVISION: &str = "0123456789abcdef0123456789abcdef01234567";
pub const FAKE_PDF: &[u8] = b"%PDF-1.4 fake paper";

type Handler = Box<dyn Fn(&GenerateRequest) -> Result<String> + Send + Sync>;

pub struct FakeLanguageModel {
    handler: Handler,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl FakeLanguageModel {
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&GenerateRequest) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::with_handler(move |_| Ok(text.clone()))
    }

    pub fn failing<F>(error: F) -> Self
    where
        F: Fn() -> AgentError + Send + Sync + 'static,
    {
        Self::with_handler(move |_| Err(error()))
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for FakeLanguageModel {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let reply = (self.handler)(&request);
        self.requests.lock().unwrap().push(request);
        reply
    }
}

/// Search index holding documents in memory.
///
/// Queries rank a corpus's documents by how many query words they contain.
#[derive(Default)]
pub struct FakeSearchIndex {
    corpora: Mutex<Vec<CorpusSummary>>,
    documents: Mutex<HashMap<String, Vec<IndexedDocument>>>,
    fail_queries: Mutex<Option<fn() -> AgentError>>,
    create_calls: AtomicUsize,
    index_calls: AtomicUsize,
    query_calls: AtomicUsize,
}

impl FakeSearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing corpus with documents.
    pub fn with_corpus(self, name: &str, documents: Vec<IndexedDocument>) -> Self {
        let id = {
            let mut corpora = self.corpora.lock().unwrap();
            let id = (corpora.len() + 1).to_string();
            corpora.push(CorpusSummary {
                id: id.clone(),
                name: name.to_string(),
            });
            id
        };
        self.documents.lock().unwrap().insert(id, documents);
        self
    }

    pub fn fail_queries_with(&self, error: fn() -> AgentError) {
        *self.fail_queries.lock().unwrap() = Some(error);
    }

    pub fn clear_query_failure(&self) {
        *self.fail_queries.lock().unwrap() = None;
    }

    pub fn corpora(&self) -> Vec<CorpusSummary> {
        self.corpora.lock().unwrap().clone()
    }

    pub fn document_count(&self, corpus_id: &str) -> usize {
        self.documents
            .lock()
            .unwrap()
            .get(corpus_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn index_calls(&self) -> usize {
        self.index_calls.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchIndex for FakeSearchIndex {
    async fn list_corpora(&self) -> Result<Vec<CorpusSummary>> {
        Ok(self.corpora())
    }

    async fn create_corpus(&self, name: &str, _description: &str) -> Result<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut corpora = self.corpora.lock().unwrap();
        let id = (corpora.len() + 1).to_string();
        corpora.push(CorpusSummary {
            id: id.clone(),
            name: name.to_string(),
        });
        Ok(id)
    }

    async fn index_document(&self, corpus_id: &str, document: &IndexedDocument) -> Result<()> {
        self.index_calls.fetch_add(1, Ordering::SeqCst);
        let mut documents = self.documents.lock().unwrap();
        let corpus = documents.entry(corpus_id.to_string()).or_default();
        corpus.retain(|d| d.document_id != document.document_id);
        corpus.push(document.clone());
        Ok(())
    }

    async fn query(&self, corpus_id: &str, text: &str, top_k: usize) -> Result<Vec<Snippet>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = *self.fail_queries.lock().unwrap() {
            return Err(error());
        }

        let words: Vec<String> = text
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();
        let documents = self.documents.lock().unwrap();
        let Some(corpus) = documents.get(corpus_id) else {
            return Ok(Vec::new());
        };

        let mut ranked: Vec<(usize, &IndexedDocument)> = corpus
            .iter()
            .map(|doc| {
                let haystack = doc.text.to_lowercase();
                let hits = words.iter().filter(|w| haystack.contains(w.as_str())).count();
                (hits, doc)
            })
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(ranked
            .into_iter()
            .take(top_k)
            .map(|(hits, doc)| {
                let score = (0.3 + 0.2 * hits as f32).min(0.95);
                let mut snippet =
                    Snippet::new(doc.text.clone(), score).with_document_id(&doc.document_id);
                snippet.metadata = doc.metadata.clone();
                snippet
            })
            .collect())
    }
}

/// Paper source over a fixed list of papers.
#[derive(Default)]
pub struct FakePaperSource {
    papers: Vec<PaperInfo>,
    fetch_calls: AtomicUsize,
    search_calls: AtomicUsize,
    download_calls: AtomicUsize,
}

impl FakePaperSource {
    pub fn with_papers(papers: Vec<PaperInfo>) -> Self {
        Self {
            papers,
            ..Self::default()
        }
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaperSource for FakePaperSource {
    async fn fetch(&self, arxiv_id: &str) -> Result<Option<PaperInfo>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.papers.iter().find(|p| p.arxiv_id == arxiv_id).cloned())
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<PaperInfo>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let words: Vec<String> = query
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .collect();
        Ok(self
            .papers
            .iter()
            .filter(|p| {
                let haystack = format!("{} {}", p.title, p.summary).to_lowercase();
                words.iter().any(|w| haystack.contains(w.as_str()))
            })
            .take(max_results)
            .cloned()
            .collect())
    }

    async fn download_pdf(&self, _pdf_url: &str) -> Result<Vec<u8>> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        Ok(FAKE_PDF.to_vec())
    }
}

#[derive(Default)]
pub struct FakeRepoSearch {
    repos: HashMap<String, String>,
    calls: AtomicUsize,
}

impl FakeRepoSearch {
    pub fn with_repo(mut self, arxiv_id: &str, url: &str) -> Self {
        self.repos.insert(arxiv_id.to_string(), url.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepoSearch for FakeRepoSearch {
    async fn find_by_arxiv_id(&self, arxiv_id: &str) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.repos.get(arxiv_id).cloned())
    }
}

/// Git host that "clones" by writing a fixed set of files.
#[derive(Default)]
pub struct FakeGitHost {
    files: Vec<(String, String)>,
    fail: bool,
    clone_calls: AtomicUsize,
}

impl FakeGitHost {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(path, content)| (path.to_string(), content.to_string()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn clone_calls(&self) -> usize {
        self.clone_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GitHost for FakeGitHost {
    async fn shallow_clone(&self, url: &str, dest: &Path) -> Result<()> {
        self.clone_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AgentError::CloneFailed {
                url: url.to_string(),
                detail: "repository not found".to_string(),
            });
        }
        for (rel, content) in &self.files {
            let path = dest.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, content)?;
        }
        Ok(())
    }

    async fn head_revision(&self, _repo: &Path) -> Result<Option<String>> {
        Ok(Some(FAKE_REVISION.to_string()))
    }
}
