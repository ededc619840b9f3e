//! Core domain types for Repo Rover
//!
//! This crate defines the data that flows through a session: papers and their
//! identifiers, linked repositories, retrieved snippets, concept maps, and the
//! per-session state machine. It performs no I/O.

pub mod paper;
pub mod repo;
pub mod snippet;
pub mod concept;
pub mod session;
pub mod error;

pub use paper::{normalize_arxiv_id, ArxivId, PaperInfo, PaperLookup, PaperOption};
pub use repo::{find_repo_url, normalize_repo_url, repo_dir_name, RepoInfo};
pub use snippet::{ChatAnswer, Citation, Confidence, IndexedDocument, Snippet};
pub use concept::{Concept, ConceptMap, KeyFunction};
pub use session::{
    ReadyPaper, Selection, SelectionOutcome, Session, SessionState, SessionStatus,
};
pub use error::{CoreError, Result};
