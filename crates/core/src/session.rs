//! Per-session conversation state and its lifecycle
//!
//! A session moves through
//! `UNINITIALIZED -> SEARCHING -> AWAITING_SELECTION -> INITIALIZING -> READY`,
//! with `ERROR` reachable from anywhere and left only through [`Session::reset`].
//! Every method here is a pure state change; the orchestrator performs the I/O
//! between them.

use crate::{ConceptMap, CoreError, PaperInfo, PaperOption, RepoInfo, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// No paper chosen yet
    #[default]
    Uninitialized,
    /// Resolving a query to a paper
    Searching,
    /// Waiting for the user to pick one of several candidates
    AwaitingSelection,
    /// Fetching the PDF, resolving the corpus, indexing if needed
    Initializing,
    /// Questions are answered against the selected paper
    Ready,
    /// Unrecoverable failure; only a reset leaves this state
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::Searching => "SEARCHING",
            Self::AwaitingSelection => "AWAITING_SELECTION",
            Self::Initializing => "INITIALIZING",
            Self::Ready => "READY",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's answer to a candidate list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Index(usize),
    Cancel,
    Other(String),
}

impl Selection {
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case("cancel") {
            return Self::Cancel;
        }
        match trimmed.parse::<usize>() {
            Ok(n) => Self::Index(n),
            Err(_) => Self::Other(trimmed.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOutcome {
    /// A valid candidate; the session is now `INITIALIZING`
    Chosen(PaperInfo),
    /// The user cancelled; the session is back to `UNINITIALIZED`
    Cancelled,
    /// Out-of-range index or unrecognised input; the session is back to `UNINITIALIZED`
    Invalid(String),
}

/// Everything a session holds once a paper is ready for questions
#[derive(Debug, Clone)]
pub struct ReadyPaper {
    pub paper: PaperInfo,
    pub repo: Option<RepoInfo>,
    pub corpus_id: String,
    pub concept_map: ConceptMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub state: SessionState,
    pub paper: Option<PaperInfo>,
    pub repo: Option<RepoInfo>,
    pub corpus_id: Option<String>,
    pub concept_map: Option<ConceptMap>,

    /// Candidates of an ambiguous search, numbered from 1
    #[serde(default)]
    pub options: Vec<PaperOption>,

    /// Last free-text query submitted
    pub query: Option<String>,

    /// Display-safe message of the last unrecoverable failure
    pub error: Option<String>,

    pub questions_asked: usize,

    /// States entered since creation or the last reset, in order
    #[serde(default)]
    pub transitions: Vec<SessionState>,

    pub created_at: DateTime<Utc>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: SessionState::Uninitialized,
            paper: None,
            repo: None,
            corpus_id: None,
            concept_map: None,
            options: Vec::new(),
            query: None,
            error: None,
            questions_asked: 0,
            transitions: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn is_awaiting_selection(&self) -> bool {
        self.state == SessionState::AwaitingSelection
    }

    fn transition(&mut self, next: SessionState) {
        self.state = next;
        self.transitions.push(next);
    }

    fn clear_paper(&mut self) {
        self.paper = None;
        self.repo = None;
        self.corpus_id = None;
        self.concept_map = None;
        self.questions_asked = 0;
    }

    fn require(&self, operation: &'static str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition {
                operation,
                state: self.state.to_string(),
            })
        }
    }

    /// Start resolving a new query. A new search replaces any current paper.
    pub fn begin_search(&mut self, query: &str) -> Result<()> {
        use SessionState::*;
        self.require("search", &[Uninitialized, AwaitingSelection, Ready])?;
        self.clear_paper();
        self.options.clear();
        self.error = None;
        self.query = Some(query.trim().to_string());
        self.transition(Searching);
        Ok(())
    }

    /// Store the candidate list of an ambiguous search.
    pub fn await_selection(&mut self, options: Vec<PaperOption>) -> Result<()> {
        self.require("await selection", &[SessionState::Searching])?;
        if options.is_empty() {
            return Err(CoreError::Validation(
                "a selection needs at least one candidate".into(),
            ));
        }
        self.options = options;
        self.transition(SessionState::AwaitingSelection);
        Ok(())
    }

    /// Apply the user's choice among the stored candidates.
    pub fn select(&mut self, selection: &Selection) -> Result<SelectionOutcome> {
        self.require("select", &[SessionState::AwaitingSelection])?;
        let count = self.options.len();

        match selection {
            Selection::Index(n) if (1..=count).contains(n) => {
                let paper = self.options[n - 1].paper.clone();
                self.begin_initializing()?;
                Ok(SelectionOutcome::Chosen(paper))
            }
            Selection::Index(n) => {
                self.abandon();
                Ok(SelectionOutcome::Invalid(format!(
                    "Selection {} is out of range (1-{}). Search again to see the options.",
                    n, count
                )))
            }
            Selection::Cancel => {
                self.abandon();
                Ok(SelectionOutcome::Cancelled)
            }
            Selection::Other(text) => {
                self.abandon();
                Ok(SelectionOutcome::Invalid(format!(
                    "'{}' is not a paper number. Search again to see the options.",
                    text
                )))
            }
        }
    }

    /// Start preparing a paper, either chosen from candidates or named directly.
    pub fn begin_initializing(&mut self) -> Result<()> {
        use SessionState::*;
        self.require(
            "initialize",
            &[Uninitialized, Searching, AwaitingSelection, Ready],
        )?;
        self.clear_paper();
        self.options.clear();
        self.error = None;
        self.transition(Initializing);
        Ok(())
    }

    pub fn mark_ready(&mut self, ready: ReadyPaper) -> Result<()> {
        self.require("mark ready", &[SessionState::Initializing])?;
        self.paper = Some(ready.paper);
        self.repo = ready.repo;
        self.corpus_id = Some(ready.corpus_id);
        self.concept_map = Some(ready.concept_map);
        self.questions_asked = 0;
        self.transition(SessionState::Ready);
        Ok(())
    }

    /// Enter `ERROR` with a display-safe message.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.options.clear();
        self.error = Some(message.into());
        self.transition(SessionState::Error);
    }

    /// Drop back to `UNINITIALIZED` after a recoverable miss. No-op in `ERROR`.
    pub fn abandon(&mut self) {
        if self.state == SessionState::Error {
            return;
        }
        self.clear_paper();
        self.options.clear();
        if self.state != SessionState::Uninitialized {
            self.transition(SessionState::Uninitialized);
        }
    }

    /// Forget the paper, candidates, error and transition log; the id is kept.
    pub fn reset(&mut self) {
        self.clear_paper();
        self.options.clear();
        self.query = None;
        self.error = None;
        self.state = SessionState::Uninitialized;
        self.transitions.clear();
    }

    /// Count a question and return how many have been asked, this one included.
    pub fn record_question(&mut self) -> usize {
        self.questions_asked += 1;
        self.questions_asked
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            session_id: self.id.clone(),
            state: self.state,
            initialized: self.is_initialized(),
            awaiting_selection: self.is_awaiting_selection(),
            options: self.options.clone(),
            error: self.error.clone(),
            arxiv_id: self.paper.as_ref().map(|p| p.arxiv_id.clone()),
            paper_title: self.paper.as_ref().map(|p| p.title.clone()),
            repo_url: self.repo.as_ref().map(|r| r.url.clone()),
            questions_asked: self.questions_asked,
        }
    }
}

/// Snapshot reported to clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionStatus {
    pub session_id: String,
    pub state: SessionState,
    pub initialized: bool,
    pub awaiting_selection: bool,
    pub options: Vec<PaperOption>,
    pub error: Option<String>,
    pub arxiv_id: Option<String>,
    pub paper_title: Option<String>,
    pub repo_url: Option<String>,
    pub questions_asked: usize,
}
