//! Repository materializer: shallow clones and source-file discovery.

use crate::traits::GitHost;
use crate::{AgentError, Result};
use async_trait::async_trait;
use rover_core::RepoInfo;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use walkdir::{DirEntry, WalkDir};

const DEFAULT_CLONE_TIMEOUT_SECS: u64 = 300;
const STRUCTURE_MAX_DEPTH: usize = 3;

/// Directory names never descended into
const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    "env",
    "site-packages",
    "build",
    "dist",
    "target",
    ".tox",
    ".mypy_cache",
    ".pytest_cache",
    ".idea",
    ".vscode",
    "htmlcov",
    "test",
    "tests",
    "testing",
];

/// Extensions treated as source code
const SOURCE_EXTENSIONS: &[&str] = &[
    "py", "pyx", "ipynb", "rs", "go", "c", "cc", "cpp", "cu", "cuh", "h", "hpp", "java", "kt",
    "scala", "js", "jsx", "ts", "tsx", "jl", "r", "m", "lua", "sh", "swift", "rb",
];

/// Files worth showing when summarising a repository
const KEY_FILES: &[&str] = &[
    "README.md",
    "README.rst",
    "README.txt",
    "README",
    "requirements.txt",
    "setup.py",
    "setup.cfg",
    "pyproject.toml",
    "environment.yml",
    "Dockerfile",
    "docker-compose.yml",
    "Cargo.toml",
    "package.json",
    "Makefile",
];

const README_NAMES: &[&str] = &["README.md", "README.rst", "README.txt", "README", "readme.md"];

/// File layout summary handed to the concept-map prompt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepoStructure {
    pub source_files: Vec<String>,
    pub key_files: Vec<String>,
}

/// `git` on the local machine
#[derive(Debug, Clone)]
pub struct GitCli {
    timeout: Duration,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_CLONE_TIMEOUT_SECS),
        }
    }
}

impl GitCli {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl GitHost for GitCli {
    async fn shallow_clone(&self, url: &str, dest: &Path) -> Result<()> {
        let clone_failed = |detail: String| AgentError::CloneFailed {
            url: url.to_string(),
            detail,
        };

        let mut cmd = Command::new("git");
        cmd.args(["clone", "--depth", "1", "--single-branch", "--quiet"])
            .arg(url)
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| clone_failed(format!("timed out after {}s", self.timeout.as_secs())))?
            .map_err(|e| clone_failed(format!("could not run git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(clone_failed(stderr.trim().to_string()));
        }
        Ok(())
    }

    async fn head_revision(&self, repo: &Path) -> Result<Option<String>> {
        let output = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(repo)
            .output()
            .await?;

        if !output.status.success() {
            return Ok(None);
        }
        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!sha.is_empty()).then_some(sha))
    }
}

#[derive(Clone)]
pub struct RepoMaterializer {
    repos_dir: PathBuf,
    git: Arc<dyn GitHost>,
}

impl RepoMaterializer {
    pub fn new(repos_dir: impl Into<PathBuf>, git: Arc<dyn GitHost>) -> Self {
        Self {
            repos_dir: repos_dir.into(),
            git,
        }
    }

    pub fn repos_dir(&self) -> &Path {
        &self.repos_dir
    }

    /// Shallow-clone `url` under the repos directory, reusing an existing clone.
    ///
    /// The clone lands in a temporary sibling directory first and is renamed
    /// into place, so an interrupted clone never looks like a finished one.
    #[instrument(skip(self))]
    pub async fn clone_repo(&self, url: &str) -> Result<RepoInfo> {
        let repo = RepoInfo::new(url)?;
        let dest = self.repos_dir.join(repo.dir_name());

        if has_entries(&dest).await {
            info!("Reusing existing clone at {}", dest.display());
        } else {
            tokio::fs::create_dir_all(&self.repos_dir).await?;
            let repos_dir = self.repos_dir.clone();
            let prefix = format!(".{}-", repo.dir_name());
            let staging = tokio::task::spawn_blocking(move || {
                tempfile::Builder::new().prefix(&prefix).tempdir_in(&repos_dir)
            })
            .await
            .map_err(std::io::Error::other)??;

            info!("Cloning {} (depth 1)", repo.url);
            self.git.shallow_clone(&repo.url, staging.path()).await?;

            if let Err(e) = tokio::fs::rename(staging.path(), &dest).await {
                if has_entries(&dest).await {
                    debug!("Another clone of {} finished first", repo.url);
                } else {
                    return Err(e.into());
                }
            }
        }

        let revision = match self.git.head_revision(&dest).await {
            Ok(revision) => revision,
            Err(e) => {
                warn!("Could not read HEAD of {}: {}", dest.display(), e);
                None
            }
        };

        let mut repo = repo.with_local_path(&dest);
        repo.revision = revision;
        Ok(repo)
    }
}

async fn has_entries(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}

fn is_excluded_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| EXCLUDED_DIRS.contains(&name) || name.ends_with(".egg-info"))
            .unwrap_or(false)
}

fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SOURCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Source files under `root`, relative to it, sorted.
pub fn list_source_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| !is_excluded_dir(entry))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && is_source_file(entry.path()))
        .map(|entry| PathBuf::from(relative(root, entry.path())))
        .collect();
    files.sort();
    files
}

/// README text at the repository root, if any.
pub fn read_readme(root: &Path) -> Option<String> {
    README_NAMES
        .iter()
        .map(|name| root.join(name))
        .find(|path| path.is_file())
        .and_then(|path| std::fs::read(&path).ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

/// Source and key files within a few levels of the root.
pub fn repo_structure(root: &Path) -> RepoStructure {
    let mut structure = RepoStructure::default();
    let walker = WalkDir::new(root)
        .max_depth(STRUCTURE_MAX_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_excluded_dir(entry));

    for entry in walker.filter_map(|entry| entry.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = relative(root, entry.path());
        let name = entry.file_name().to_string_lossy();
        if KEY_FILES.contains(&&*name) {
            structure.key_files.push(rel.clone());
        }
        if is_source_file(entry.path()) {
            structure.source_files.push(rel);
        }
    }
    structure
}
