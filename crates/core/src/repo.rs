//! Source repository identity

use crate::{CoreError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const ACCEPTED_HOSTS: &str = r"github\.com|gitlab\.com|bitbucket\.org";

static REPO_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^https?://(?:www\.)?({ACCEPTED_HOSTS})/([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)(?:/.*)?$"
    ))
    .expect("valid regex")
});
static REPO_URL_IN_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"https?://(?:www\.)?(?:{ACCEPTED_HOSTS})/[A-Za-z0-9_-]+/[A-Za-z0-9_.-]+"
    ))
    .expect("valid regex")
});

/// Validate a repository URL and normalise it to `https://host/owner/name`.
///
/// Trailing slashes, a `.git` suffix and deeper paths (`/tree/main/...`) are dropped.
pub fn normalize_repo_url(url: &str) -> Result<String> {
    let trimmed = url.trim();
    let caps = REPO_URL
        .captures(trimmed)
        .ok_or_else(|| CoreError::InvalidRepoUrl(trimmed.to_string()))?;

    let host = &caps[1];
    let owner = &caps[2];
    let name = caps[3].trim_end_matches(".git");

    let is_dots = |s: &str| s.chars().all(|c| c == '.');
    if owner.is_empty() || name.is_empty() || is_dots(owner) || is_dots(name) {
        return Err(CoreError::InvalidRepoUrl(trimmed.to_string()));
    }

    Ok(format!("https://{}/{}/{}", host, owner, name))
}

/// First plausible repository URL mentioned in free text.
pub fn find_repo_url(text: &str) -> Option<String> {
    REPO_URL_IN_TEXT
        .find_iter(text)
        .filter_map(|m| normalize_repo_url(m.as_str().trim_end_matches('.')).ok())
        .next()
}

/// Directory name for a clone: `owner__name`, anything outside `[A-Za-z0-9_.-]` mapped to `_`.
pub fn repo_dir_name(normalized_url: &str) -> String {
    let mut segments = normalized_url.trim_end_matches('/').rsplit('/');
    let name = segments.next().unwrap_or_default();
    let owner = segments.next().unwrap_or_default();
    format!("{}__{}", owner, name)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// A repository linked to a paper
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoInfo {
    /// Normalised repository URL
    pub url: String,

    /// Local clone path once materialized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,

    /// HEAD commit of the clone that was indexed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

impl RepoInfo {
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            url: normalize_repo_url(url)?,
            local_path: None,
            revision: None,
        })
    }

    pub fn with_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn dir_name(&self) -> String {
        repo_dir_name(&self.url)
    }

    /// `owner/name`
    pub fn slug(&self) -> String {
        let mut parts = self.url.rsplit('/');
        let name = parts.next().unwrap_or_default();
        let owner = parts.next().unwrap_or_default();
        format!("{}/{}", owner, name)
    }
}
