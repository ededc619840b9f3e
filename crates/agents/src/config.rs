//! Runtime settings, read once from the environment.

use crate::{AgentError, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_VECTARA_URL: &str = "https://api.vectara.io/v1";
const DEFAULT_ARXIV_URL: &str = "https://export.arxiv.org/api";
const DEFAULT_PWC_URL: &str = "https://paperswithcode.com/api/v1";
const DEFAULT_DATA_DIR: &str = ".repo-rover";
const DEFAULT_TOP_K: usize = 3;
const DEFAULT_MAX_PAPER_OPTIONS: usize = 5;
const DEFAULT_MAX_FILE_BYTES: u64 = 200_000;
const DEFAULT_LLM_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 8;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SESSION_TTL_MINUTES: u64 = 120;
const DEFAULT_BIND: &str = "127.0.0.1:5000";

/// When the paper PDF is attached to a question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PdfAttachment {
    #[default]
    Always,
    FirstQuestion,
    Never,
}

impl PdfAttachment {
    /// Whether question number `question` (1-based) carries the PDF.
    pub fn applies_to(&self, question: usize) -> bool {
        match self {
            Self::Always => true,
            Self::FirstQuestion => question <= 1,
            Self::Never => false,
        }
    }
}

impl FromStr for PdfAttachment {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "first" | "first_question" => Ok(Self::FirstQuestion),
            "never" | "off" => Ok(Self::Never),
            other => Err(format!("expected always, first or never, got '{}'", other)),
        }
    }
}

#[derive(Clone)]
pub struct Settings {
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub vectara_customer_id: String,
    pub vectara_api_key: String,
    pub vectara_base_url: String,
    pub arxiv_base_url: String,
    pub pwc_base_url: String,
    pub data_dir: PathBuf,
    pub papers_dir: PathBuf,
    pub repos_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub top_k: usize,
    pub max_paper_options: usize,
    pub pdf_attachment: PdfAttachment,
    pub max_file_bytes: u64,
    pub llm_timeout: Duration,
    pub search_timeout: Duration,
    pub fetch_timeout: Duration,
    pub session_ttl: Duration,
    pub bind: String,
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("gemini_model", &self.gemini_model)
            .field("vectara_customer_id", &self.vectara_customer_id)
            .field("data_dir", &self.data_dir)
            .field("top_k", &self.top_k)
            .field("pdf_attachment", &self.pdf_attachment)
            .field("bind", &self.bind)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`; every missing or invalid key is reported at once.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut problems = Vec::new();
        let mut required = |key: &str| match get(key) {
            Some(value) => value,
            None => {
                problems.push(format!("{} is not set", key));
                String::new()
            }
        };
        let gemini_api_key = required("GEMINI_API_KEY");
        let vectara_customer_id = required("VECTARA_CUSTOMER_ID");
        let vectara_api_key = required("VECTARA_API_KEY");

        if !vectara_customer_id.is_empty() && vectara_customer_id.parse::<u64>().is_err() {
            problems.push("VECTARA_CUSTOMER_ID must be numeric".to_string());
        }

        fn parsed<T: FromStr>(
            value: Option<String>,
            key: &str,
            default: T,
            problems: &mut Vec<String>,
        ) -> T {
            match value {
                None => default,
                Some(raw) => raw.parse().unwrap_or_else(|_| {
                    problems.push(format!("{} has an invalid value '{}'", key, raw));
                    default
                }),
            }
        }

        let top_k = parsed(get("ROVER_TOP_K"), "ROVER_TOP_K", DEFAULT_TOP_K, &mut problems);
        let max_paper_options = parsed(
            get("ROVER_MAX_PAPER_OPTIONS"),
            "ROVER_MAX_PAPER_OPTIONS",
            DEFAULT_MAX_PAPER_OPTIONS,
            &mut problems,
        );
        let pdf_attachment = parsed(
            get("ROVER_PDF_ATTACHMENT"),
            "ROVER_PDF_ATTACHMENT",
            PdfAttachment::default(),
            &mut problems,
        );
        let max_file_bytes = parsed(
            get("ROVER_MAX_FILE_BYTES"),
            "ROVER_MAX_FILE_BYTES",
            DEFAULT_MAX_FILE_BYTES,
            &mut problems,
        );
        let llm_timeout = parsed(
            get("ROVER_LLM_TIMEOUT_SECS"),
            "ROVER_LLM_TIMEOUT_SECS",
            DEFAULT_LLM_TIMEOUT_SECS,
            &mut problems,
        );
        let search_timeout = parsed(
            get("ROVER_SEARCH_TIMEOUT_SECS"),
            "ROVER_SEARCH_TIMEOUT_SECS",
            DEFAULT_SEARCH_TIMEOUT_SECS,
            &mut problems,
        );
        let fetch_timeout = parsed(
            get("ROVER_FETCH_TIMEOUT_SECS"),
            "ROVER_FETCH_TIMEOUT_SECS",
            DEFAULT_FETCH_TIMEOUT_SECS,
            &mut problems,
        );
        let session_ttl_minutes = parsed(
            get("ROVER_SESSION_TTL_MINUTES"),
            "ROVER_SESSION_TTL_MINUTES",
            DEFAULT_SESSION_TTL_MINUTES,
            &mut problems,
        );

        if top_k == 0 {
            problems.push("ROVER_TOP_K must be at least 1".to_string());
        }
        if max_paper_options == 0 {
            problems.push("ROVER_MAX_PAPER_OPTIONS must be at least 1".to_string());
        }

        if !problems.is_empty() {
            return Err(AgentError::Configuration(problems.join("; ")));
        }

        let data_dir = resolve_data_dir(get("ROVER_DATA_DIR"));
        let under_data = |key: &str, name: &str| {
            get(key)
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join(name))
        };

        Ok(Self {
            gemini_api_key,
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            gemini_base_url: base_url(get("GEMINI_BASE_URL"), DEFAULT_GEMINI_URL),
            vectara_customer_id,
            vectara_api_key,
            vectara_base_url: base_url(get("VECTARA_BASE_URL"), DEFAULT_VECTARA_URL),
            arxiv_base_url: base_url(get("ARXIV_BASE_URL"), DEFAULT_ARXIV_URL),
            pwc_base_url: base_url(get("PWC_BASE_URL"), DEFAULT_PWC_URL),
            papers_dir: under_data("PAPERS_DIR", "papers"),
            repos_dir: under_data("REPO_CLONE_DIR", "repos"),
            cache_dir: under_data("CACHE_DIR", "cache"),
            data_dir,
            top_k,
            max_paper_options,
            pdf_attachment,
            max_file_bytes,
            llm_timeout: Duration::from_secs(llm_timeout),
            search_timeout: Duration::from_secs(search_timeout),
            fetch_timeout: Duration::from_secs(fetch_timeout),
            session_ttl: Duration::from_secs(session_ttl_minutes * 60),
            bind: get("ROVER_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
        })
    }

    /// Create the papers, repositories and cache directories.
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.papers_dir, &self.repos_dir, &self.cache_dir] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Cache directory as `from_lookup` would resolve it, without requiring any API keys.
pub fn cache_dir_from_lookup<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
    get("CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| resolve_data_dir(get("ROVER_DATA_DIR")).join("cache"))
}

pub fn cache_dir_from_env() -> PathBuf {
    cache_dir_from_lookup(|key| std::env::var(key).ok())
}

fn resolve_data_dir(value: Option<String>) -> PathBuf {
    value
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(DEFAULT_DATA_DIR)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

fn base_url(value: Option<String>, default: &str) -> String {
    value
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("GEMINI_API_KEY", "g-key"),
        ("VECTARA_CUSTOMER_ID", "123456"),
        ("VECTARA_API_KEY", "v-key"),
    ];

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(settings.gemini_model, "gemini-2.5-flash");
        assert_eq!(settings.top_k, 3);
        assert_eq!(settings.max_paper_options, 5);
        assert_eq!(settings.pdf_attachment, PdfAttachment::Always);
        assert_eq!(settings.search_timeout, Duration::from_secs(8));
        assert_eq!(settings.session_ttl, Duration::from_secs(7200));
        assert!(settings.papers_dir.ends_with("papers"));
        assert_eq!(settings.vectara_base_url, "https://api.vectara.io/v1");
    }

    #[test]
    fn test_missing_keys_are_all_reported() {
        let err = Settings::from_lookup(lookup(&[("GEMINI_API_KEY", "  ")])).unwrap_err();
        let AgentError::Configuration(message) = err else {
            panic!("expected configuration error");
        };
        assert!(message.contains("GEMINI_API_KEY"));
        assert!(message.contains("VECTARA_CUSTOMER_ID"));
        assert!(message.contains("VECTARA_API_KEY"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("ROVER_TOP_K", "lots"));
        pairs.push(("ROVER_PDF_ATTACHMENT", "sometimes"));
        let err = Settings::from_lookup(lookup(&pairs)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("ROVER_TOP_K"));
        assert!(message.contains("ROVER_PDF_ATTACHMENT"));
    }

    #[test]
    fn test_overrides() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("ROVER_DATA_DIR", "/tmp/rover"));
        pairs.push(("CACHE_DIR", "/var/cache/rover"));
        pairs.push(("ROVER_PDF_ATTACHMENT", "first"));
        pairs.push(("VECTARA_BASE_URL", "http://localhost:9000/"));
        let settings = Settings::from_lookup(lookup(&pairs)).unwrap();

        assert_eq!(settings.repos_dir, PathBuf::from("/tmp/rover/repos"));
        assert_eq!(settings.cache_dir, PathBuf::from("/var/cache/rover"));
        assert_eq!(settings.vectara_base_url, "http://localhost:9000");
        assert!(settings.pdf_attachment.applies_to(1));
        assert!(!settings.pdf_attachment.applies_to(2));
    }

    #[test]
    fn test_cache_dir_needs_no_keys() {
        let dir = cache_dir_from_lookup(lookup(&[("ROVER_DATA_DIR", "/tmp/rover")]));
        assert_eq!(dir, PathBuf::from("/tmp/rover/cache"));

        let dir = cache_dir_from_lookup(lookup(&[("CACHE_DIR", "/var/cache/rover")]));
        assert_eq!(dir, PathBuf::from("/var/cache/rover"));
    }

    #[test]
    fn test_debug_hides_keys() {
        let settings = Settings::from_lookup(lookup(&REQUIRED)).unwrap();
        let debug = format!("{:?}", settings);
        assert!(!debug.contains("g-key"));
        assert!(!debug.contains("v-key"));
    }
}
