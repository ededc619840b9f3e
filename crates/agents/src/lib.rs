//! Pipeline components for Repo Rover
//!
//! This crate holds everything that talks to the outside world:
//! - Clients: Gemini (language model), Vectara (search index), arXiv,
//!   Papers with Code, and local `git`
//! - Components: paper and repository locators, the repository materializer,
//!   the corpus manager, the code indexer and the synthesis client
//! - The orchestrator that moves a session from a query to answered questions

pub mod arxiv;
pub mod config;
pub mod corpus;
pub mod error;
pub mod gemini;
mod http;
pub mod indexer;
pub mod materializer;
pub mod orchestrator;
pub mod papers;
pub mod repo_finder;
pub mod synthesis;
pub mod traits;
pub mod vectara;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use arxiv::ArxivClient;
pub use config::{cache_dir_from_env, PdfAttachment, Settings};
pub use corpus::CorpusManager;
pub use error::{AgentError, Result};
pub use gemini::GeminiClient;
pub use indexer::{CodeIndexer, IndexReport};
pub use materializer::{GitCli, RepoMaterializer, RepoStructure};
pub use orchestrator::{
    Explanation, IndexedFiles, InitOutcome, Orchestrator, SearchOutcome, SelectOutcome, Services,
};
pub use papers::PaperLocator;
pub use repo_finder::{PwcClient, RepoLocator};
pub use synthesis::Synthesizer;
pub use vectara::VectaraClient;
