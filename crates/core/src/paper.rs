//! Paper metadata and ArXiv identifiers

use crate::{CoreError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

static NEW_STYLE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4}\.\d{4,5})(?:v(\d+))?$").expect("valid regex"));
static OLD_STYLE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-z][a-z\-]*(?:\.[A-Z]{2})?/\d{7})(?:v(\d+))?$").expect("valid regex")
});
static ARXIV_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:https?://)?(?:www\.|export\.)?arxiv\.org/(?:abs|pdf)/(.+?)(?:\.pdf)?/?$")
        .expect("valid regex")
});

/// A parsed ArXiv identifier.
///
/// Accepts new-style ids (`1706.03762`, `2310.02170v2`), old-style ids
/// (`hep-th/9901001`), an `arXiv:` prefix, and `arxiv.org/abs|pdf` URLs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArxivId {
    base: String,
    version: Option<u32>,
}

impl ArxivId {
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let candidate = match ARXIV_URL.captures(trimmed) {
            Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or_default(),
            None => trimmed,
        };
        let candidate = candidate
            .strip_prefix("arXiv:")
            .or_else(|| candidate.strip_prefix("arxiv:"))
            .unwrap_or(candidate);

        let caps = NEW_STYLE_ID
            .captures(candidate)
            .or_else(|| OLD_STYLE_ID.captures(candidate))
            .ok_or_else(|| CoreError::InvalidArxivId(input.trim().to_string()))?;

        let base = caps[1].to_string();
        let version = caps.get(2).and_then(|m| m.as_str().parse().ok());
        Ok(Self { base, version })
    }

    /// True when the whole input is an identifier rather than free text.
    pub fn looks_like(input: &str) -> bool {
        Self::parse(input).is_ok()
    }

    /// Identifier without the version suffix; used as the cache and corpus key.
    pub fn normalized(&self) -> &str {
        &self.base
    }

    pub fn version(&self) -> Option<u32> {
        self.version
    }

    /// File-system safe form (`hep-th/9901001` becomes `hep-th_9901001`).
    pub fn file_stem(&self) -> String {
        self.base.replace('/', "_")
    }
}

impl fmt::Display for ArxivId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version {
            Some(v) => write!(f, "{}v{}", self.base, v),
            None => f.write_str(&self.base),
        }
    }
}

/// Normalise any accepted identifier form, falling back to the trimmed input.
pub fn normalize_arxiv_id(input: &str) -> String {
    ArxivId::parse(input)
        .map(|id| id.normalized().to_string())
        .unwrap_or_else(|_| input.trim().to_string())
}

/// Metadata for a resolved paper
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaperInfo {
    /// Version-free ArXiv identifier
    pub arxiv_id: String,

    pub title: String,

    #[serde(default)]
    pub authors: Vec<String>,

    #[serde(default)]
    pub summary: String,

    pub pdf_url: String,

    /// Local PDF path once downloaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_category: Option<String>,
}

impl PaperInfo {
    pub fn new(arxiv_id: impl Into<String>, title: impl Into<String>) -> Self {
        let arxiv_id = normalize_arxiv_id(&arxiv_id.into());
        let pdf_url = format!("https://arxiv.org/pdf/{}", arxiv_id);
        Self {
            arxiv_id,
            title: title.into(),
            authors: Vec::new(),
            summary: String::new(),
            pdf_url,
            pdf_path: None,
            published: None,
            primary_category: None,
        }
    }

    /// Builder pattern: set authors
    pub fn with_authors(mut self, authors: Vec<String>) -> Self {
        self.authors = authors;
        self
    }

    /// Builder pattern: set summary
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Builder pattern: set PDF URL
    pub fn with_pdf_url(mut self, url: impl Into<String>) -> Self {
        self.pdf_url = url.into();
        self
    }

    /// Builder pattern: set local PDF path
    pub fn with_pdf_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pdf_path = Some(path.into());
        self
    }

    pub fn with_published(mut self, published: impl Into<String>) -> Self {
        self.published = Some(published.into());
        self
    }

    pub fn with_primary_category(mut self, category: impl Into<String>) -> Self {
        self.primary_category = Some(category.into());
        self
    }

    /// First two authors, with an ellipsis when there are more.
    pub fn author_line(&self) -> String {
        let mut line = self
            .authors
            .iter()
            .take(2)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if self.authors.len() > 2 {
            line.push_str("...");
        }
        line
    }

    /// Summary cut to `max_chars` characters with a trailing ellipsis.
    pub fn summary_preview(&self, max_chars: usize) -> String {
        if self.summary.chars().count() <= max_chars {
            return self.summary.clone();
        }
        let mut preview: String = self.summary.chars().take(max_chars).collect();
        preview.push_str("...");
        preview
    }

    pub fn abs_url(&self) -> String {
        format!("https://arxiv.org/abs/{}", self.arxiv_id)
    }
}

/// One numbered candidate of an ambiguous search
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaperOption {
    /// 1-based position shown to the user
    pub index: usize,

    #[serde(flatten)]
    pub paper: PaperInfo,
}

/// Outcome of resolving a user query to a paper
#[derive(Debug, Clone, PartialEq)]
pub enum PaperLookup {
    Single(PaperInfo),
    NeedsSelection(Vec<PaperOption>),
}

impl PaperLookup {
    /// Number candidates from 1, keeping at most `max`.
    pub fn from_candidates(candidates: Vec<PaperInfo>, max: usize) -> Self {
        let options = candidates
            .into_iter()
            .take(max.max(1))
            .enumerate()
            .map(|(i, paper)| PaperOption { index: i + 1, paper })
            .collect();
        Self::NeedsSelection(options)
    }

    pub fn needs_selection(&self) -> bool {
        matches!(self, Self::NeedsSelection(_))
    }
}
