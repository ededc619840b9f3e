//! Paper locator: identifiers or free text to paper metadata, plus the PDF cache.

use crate::traits::PaperSource;
use crate::{AgentError, Result};
use rover_core::{ArxivId, PaperInfo, PaperLookup};
use rover_store::{is_nonempty_file, write_atomic};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub struct PaperLocator {
    source: Arc<dyn PaperSource>,
    papers_dir: PathBuf,
    max_options: usize,
}

impl PaperLocator {
    pub fn new(source: Arc<dyn PaperSource>, papers_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            papers_dir: papers_dir.into(),
            max_options: 5,
        }
    }

    pub fn with_max_options(mut self, max_options: usize) -> Self {
        self.max_options = max_options.max(1);
        self
    }

    /// Resolve a bare identifier to one paper, or free text to numbered candidates.
    #[instrument(skip(self))]
    pub async fn resolve(&self, query: &str) -> Result<PaperLookup> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AgentError::NotFound(
                "Enter a paper title or an ArXiv id such as 1706.03762.".to_string(),
            ));
        }

        if let Ok(id) = ArxivId::parse(query) {
            if let Some(paper) = self.source.fetch(id.normalized()).await? {
                info!("Resolved {} to \"{}\"", id, paper.title);
                return Ok(PaperLookup::Single(paper));
            }
            debug!("arXiv has no record for {}, searching instead", id);
        }

        let candidates = self.source.search(query, self.max_options).await?;
        if candidates.is_empty() {
            return Err(AgentError::NotFound(format!(
                "No papers found for \"{}\". Try a different title or an ArXiv id such as 1706.03762.",
                query
            )));
        }
        Ok(PaperLookup::from_candidates(candidates, self.max_options))
    }

    /// Exact record for an identifier.
    #[instrument(skip(self))]
    pub async fn fetch(&self, arxiv_id: &str) -> Result<PaperInfo> {
        let id = ArxivId::parse(arxiv_id)?;
        self.source
            .fetch(id.normalized())
            .await?
            .ok_or_else(|| AgentError::NotFound(format!("No paper found with ArXiv id {}.", id)))
    }

    /// Local PDF location for a paper.
    pub fn pdf_path(&self, paper: &PaperInfo) -> PathBuf {
        let stem = ArxivId::parse(&paper.arxiv_id)
            .map(|id| id.file_stem())
            .unwrap_or_else(|_| paper.arxiv_id.replace(['/', '\\'], "_"));
        self.papers_dir.join(format!("{}.pdf", stem))
    }

    /// Download the PDF unless a non-empty copy is already cached.
    #[instrument(skip(self, paper), fields(arxiv_id = %paper.arxiv_id))]
    pub async fn ensure_pdf(&self, paper: &PaperInfo) -> Result<PathBuf> {
        let path = self.pdf_path(paper);
        if is_nonempty_file(&path) {
            debug!("PDF cache hit: {}", path.display());
            return Ok(path);
        }

        let bytes = self.source.download_pdf(&paper.pdf_url).await?;
        write_atomic(&path, &bytes)?;
        info!("Downloaded {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    /// PDF bytes, downloading first when needed.
    pub async fn read_pdf(&self, paper: &PaperInfo) -> Result<Vec<u8>> {
        let path = match &paper.pdf_path {
            Some(path) if is_nonempty_file(path) => path.clone(),
            _ => self.ensure_pdf(paper).await?,
        };
        Ok(tokio::fs::read(&path).await?)
    }

    pub fn papers_dir(&self) -> &Path {
        &self.papers_dir
    }
}
