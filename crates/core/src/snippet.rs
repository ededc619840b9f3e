//! Retrieval results, citations and indexed documents

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metadata key holding a document's repository-relative path
pub const FILE_PATH_KEY: &str = "file_path";
/// Metadata key holding the paper tag a document was indexed under
pub const PAPER_TAG_KEY: &str = "paper";

const EXCERPT_CHARS: usize = 300;
const HIGH_CONFIDENCE_SCORE: f32 = 0.5;

/// A retrieved fragment of source text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snippet {
    pub text: String,
    pub score: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Snippet {
    pub fn new(text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            score,
            document_id: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_document_id(mut self, id: impl Into<String>) -> Self {
        self.document_id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Repository-relative path, from metadata or the `tag::path` document id.
    pub fn file_path(&self) -> String {
        if let Some(path) = self.metadata.get(FILE_PATH_KEY) {
            return path.clone();
        }
        match &self.document_id {
            Some(id) => id
                .split_once("::")
                .map(|(_, path)| path.to_string())
                .unwrap_or_else(|| id.clone()),
            None => "unknown".to_string(),
        }
    }
}

/// Source reference attached to an answer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub file_path: String,
    pub score: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,

    pub excerpt: String,
}

impl From<&Snippet> for Citation {
    fn from(snippet: &Snippet) -> Self {
        let mut excerpt: String = snippet.text.chars().take(EXCERPT_CHARS).collect();
        if snippet.text.chars().count() > EXCERPT_CHARS {
            excerpt.push_str("...");
        }
        Self {
            file_path: snippet.file_path(),
            score: snippet.score,
            document_id: snippet.document_id.clone(),
            excerpt,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// `low` without snippets, `high` when the best score clears 0.5, else `medium`.
    pub fn from_snippets(snippets: &[Snippet]) -> Self {
        let best = snippets
            .iter()
            .map(|s| s.score)
            .fold(None, |acc: Option<f32>, s| Some(acc.map_or(s, |a| a.max(s))));
        match best {
            None => Self::Low,
            Some(score) if score > HIGH_CONFIDENCE_SCORE => Self::High,
            Some(_) => Self::Medium,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        f.write_str(label)
    }
}

/// An answer to a question about the selected paper's code
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub confidence: Confidence,
    pub num_sources: usize,
}

impl ChatAnswer {
    pub fn new(answer: impl Into<String>, snippets: &[Snippet]) -> Self {
        Self {
            answer: answer.into(),
            citations: snippets.iter().map(Citation::from).collect(),
            confidence: Confidence::from_snippets(snippets),
            num_sources: snippets.len(),
        }
    }
}

/// A source file as submitted to the search index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedDocument {
    pub document_id: String,
    pub title: String,
    pub text: String,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl IndexedDocument {
    /// Document for one repository file, identified as `tag::relative/path`.
    pub fn for_source_file(tag: &str, relative_path: &str, text: impl Into<String>) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert(FILE_PATH_KEY.to_string(), relative_path.to_string());
        metadata.insert(PAPER_TAG_KEY.to_string(), tag.to_string());
        if let Some((_, ext)) = relative_path.rsplit_once('.') {
            metadata.insert("extension".to_string(), ext.to_ascii_lowercase());
        }

        Self {
            document_id: format!("{}::{}", tag, relative_path),
            title: relative_path.to_string(),
            text: text.into(),
            metadata,
        }
    }
}
