//! Repository locator: paper to source-code repository URL.
//!
//! Strategies run in order until one yields a plausible URL: the
//! Papers with Code index, the language model reading the PDF, then a fixed
//! table of well-known papers.

use crate::http::send_json;
use crate::synthesis::Synthesizer;
use crate::traits::RepoSearch;
use crate::{AgentError, Result, Settings};
use async_trait::async_trait;
use reqwest::Client;
use rover_core::{normalize_repo_url, PaperInfo};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const SERVICE: &str = "Papers with Code";

/// Well-known papers and their reference implementations
const KNOWN_REPOS: &[(&str, &str)] = &[
    ("2310.02170", "https://github.com/SALT-NLP/DyLAN"),
    ("1706.03762", "https://github.com/tensorflow/tensor2tensor"),
    ("1810.04805", "https://github.com/google-research/bert"),
    ("1512.03385", "https://github.com/KaimingHe/deep-residual-networks"),
    ("2010.11929", "https://github.com/lucidrains/vit-pytorch"),
    ("2103.00020", "https://github.com/openai/CLIP"),
    ("1411.1784", "https://github.com/eriklindernoren/PyTorch-GAN"),
];

/// Known repository for a version-free arXiv id.
pub fn known_repo(arxiv_id: &str) -> Option<&'static str> {
    KNOWN_REPOS
        .iter()
        .find(|(id, _)| *id == arxiv_id)
        .map(|(_, url)| *url)
}

/// Papers with Code REST client
#[derive(Clone)]
pub struct PwcClient {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl PwcClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            timeout: Duration::from_secs(8),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.pwc_base_url).with_timeout(settings.search_timeout)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct PwcPaper {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PwcRepository {
    url: String,
    #[serde(default)]
    stars: u64,
}

fn most_starred(repositories: Vec<PwcRepository>) -> Option<String> {
    repositories
        .into_iter()
        .max_by_key(|r| r.stars)
        .map(|r| r.url)
}

#[async_trait]
impl RepoSearch for PwcClient {
    #[instrument(skip(self))]
    async fn find_by_arxiv_id(&self, arxiv_id: &str) -> Result<Option<String>> {
        let papers: Page<PwcPaper> = send_json(
            SERVICE,
            self.client
                .get(format!("{}/papers/", self.base_url))
                .query(&[("arxiv_id", arxiv_id)])
                .timeout(self.timeout),
        )
        .await?;
        let Some(paper) = papers.results.into_iter().next() else {
            return Ok(None);
        };

        let repositories: Page<PwcRepository> = send_json(
            SERVICE,
            self.client
                .get(format!("{}/papers/{}/repositories/", self.base_url, paper.id))
                .timeout(self.timeout),
        )
        .await?;
        Ok(most_starred(repositories.results))
    }
}

pub struct RepoLocator {
    search: Arc<dyn RepoSearch>,
    synthesizer: Synthesizer,
}

impl RepoLocator {
    pub fn new(search: Arc<dyn RepoSearch>, synthesizer: Synthesizer) -> Self {
        Self {
            search,
            synthesizer,
        }
    }

    /// Normalised repository URL for `paper`, or `NotFound`.
    #[instrument(skip(self, paper, pdf), fields(arxiv_id = %paper.arxiv_id))]
    pub async fn resolve(&self, paper: &PaperInfo, pdf: Option<Vec<u8>>) -> Result<String> {
        match self.search.find_by_arxiv_id(&paper.arxiv_id).await {
            Ok(Some(url)) => {
                if let Some(url) = plausible(&url) {
                    info!("Repository from code search: {}", url);
                    return Ok(url);
                }
            }
            Ok(None) => debug!("Code search has no repository"),
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => warn!("Code search failed: {}", err),
        }

        if let Some(bytes) = pdf {
            if let Some(url) = self
                .synthesizer
                .extract_repo_url(paper, bytes)
                .await?
                .and_then(|url| plausible(&url))
            {
                info!("Repository from PDF: {}", url);
                return Ok(url);
            }
        }

        if let Some(url) = known_repo(&paper.arxiv_id).and_then(plausible) {
            info!("Repository from known table: {}", url);
            return Ok(url);
        }

        Err(AgentError::NotFound(format!(
            "Could not find a code repository for \"{}\".",
            paper.title
        )))
    }
}

fn plausible(url: &str) -> Option<String> {
    match normalize_repo_url(url) {
        Ok(url) => Some(url),
        Err(err) => {
            debug!("Rejected repository candidate: {}", err);
            None
        }
    }
}
