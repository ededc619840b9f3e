//! Query orchestrator: drives a session from a query to answered questions.
//!
//! Every operation takes the session by `&mut`, so callers hold its lock for
//! the whole call. The orchestrator is the one place where failures turn
//! into session state: fatal errors move the session to `ERROR`, anything
//! else puts it back where the user can simply try again.

use crate::arxiv::ArxivClient;
use crate::corpus::CorpusManager;
use crate::gemini::GeminiClient;
use crate::indexer::CodeIndexer;
use crate::materializer::{read_readme, repo_structure, GitCli, RepoMaterializer, RepoStructure};
use crate::papers::PaperLocator;
use crate::repo_finder::{PwcClient, RepoLocator};
use crate::synthesis::Synthesizer;
use crate::traits::{GitHost, LanguageModel, PaperSource, RepoSearch, SearchIndex};
use crate::vectara::VectaraClient;
use crate::{AgentError, Result, Settings};
use rover_core::{
    ArxivId, ChatAnswer, Citation, ConceptMap, CoreError, PaperInfo, PaperLookup, PaperOption,
    ReadyPaper, RepoInfo, Selection, SelectionOutcome, Session, SessionState, SessionStatus,
    Snippet,
};
use rover_store::{CacheEntry, PaperCache};
use serde::{Serialize, Serializer};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const NO_CODE_ANSWER: &str = "I couldn't find relevant code for that question in the indexed \
     repository. Try naming a class, function or file, or ask one of the suggested questions.";

/// The external services an orchestrator talks to
#[derive(Clone)]
pub struct Services {
    pub model: Arc<dyn LanguageModel>,
    pub index: Arc<dyn SearchIndex>,
    pub papers: Arc<dyn PaperSource>,
    pub repo_search: Arc<dyn RepoSearch>,
    pub git: Arc<dyn GitHost>,
}

impl Services {
    /// The hosted clients configured by `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            model: Arc::new(GeminiClient::from_settings(settings)),
            index: Arc::new(VectaraClient::from_settings(settings)),
            papers: Arc::new(ArxivClient::from_settings(settings)),
            repo_search: Arc::new(PwcClient::from_settings(settings)),
            git: Arc::new(GitCli::default()),
        }
    }
}

/// Number of files indexed during initialisation, or `"cached"` when indexing was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexedFiles {
    Count(usize),
    Cached,
}

impl Serialize for IndexedFiles {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Count(n) => serializer.serialize_u64(*n as u64),
            Self::Cached => serializer.serialize_str("cached"),
        }
    }
}

/// A paper that reached `READY`
#[derive(Debug, Clone, Serialize)]
pub struct InitOutcome {
    pub paper: PaperInfo,
    pub repo_url: Option<String>,
    pub indexed_files: IndexedFiles,
    pub from_cache: bool,
    pub suggested_questions: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum SearchOutcome {
    NeedsSelection {
        options: Vec<PaperOption>,
        message: String,
    },
    Ready(InitOutcome),
}

#[derive(Debug, Clone)]
pub enum SelectOutcome {
    Ready(InitOutcome),
    /// Back to `UNINITIALIZED`, either cancelled or an unusable selection
    Dropped { cancelled: bool, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub concept: String,
    pub explanation: String,
    pub citations: Vec<Citation>,
}

pub struct Orchestrator {
    settings: Arc<Settings>,
    cache: Arc<PaperCache>,
    index: Arc<dyn SearchIndex>,
    locator: PaperLocator,
    corpora: CorpusManager,
    repos: RepoLocator,
    materializer: RepoMaterializer,
    indexer: CodeIndexer,
    synthesizer: Synthesizer,
}

impl Orchestrator {
    pub fn new(settings: Arc<Settings>, services: Services) -> Result<Self> {
        let cache = Arc::new(PaperCache::open(&settings.cache_dir)?);
        let synthesizer = Synthesizer::new(services.model);

        Ok(Self {
            locator: PaperLocator::new(services.papers, &settings.papers_dir)
                .with_max_options(settings.max_paper_options),
            corpora: CorpusManager::new(services.index.clone()),
            repos: RepoLocator::new(services.repo_search, synthesizer.clone()),
            materializer: RepoMaterializer::new(&settings.repos_dir, services.git),
            indexer: CodeIndexer::new(services.index.clone(), settings.max_file_bytes),
            index: services.index,
            synthesizer,
            cache,
            settings,
        })
    }

    /// Orchestrator over the hosted services, with data directories created.
    pub fn from_settings(settings: Arc<Settings>) -> Result<Self> {
        settings.ensure_directories()?;
        let services = Services::from_settings(&settings);
        Self::new(settings, services)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cache(&self) -> &Arc<PaperCache> {
        &self.cache
    }

    /// Resolve free text or an identifier. A single match is initialised right away.
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub async fn submit_query(&self, session: &mut Session, query: &str) -> Result<SearchOutcome> {
        session.begin_search(query)?;

        let lookup = match self.locator.resolve(query).await {
            Ok(lookup) => lookup,
            Err(err) => return Err(recover(session, err)),
        };

        match lookup {
            PaperLookup::Single(paper) => {
                session.begin_initializing()?;
                let arxiv_id = paper.arxiv_id.clone();
                self.finish_initializing(session, &arxiv_id, Some(paper))
                    .await
                    .map(SearchOutcome::Ready)
            }
            PaperLookup::NeedsSelection(options) => {
                let message = format!(
                    "Found {} papers. Reply with a number to choose one, or 'cancel'.",
                    options.len()
                );
                session.await_selection(options.clone())?;
                Ok(SearchOutcome::NeedsSelection { options, message })
            }
        }
    }

    /// Apply a selection (`"2"`, `"cancel"`, anything else) to the pending candidates.
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub async fn select(&self, session: &mut Session, input: &str) -> Result<SelectOutcome> {
        match session.select(&Selection::parse(input))? {
            SelectionOutcome::Chosen(paper) => {
                let arxiv_id = paper.arxiv_id.clone();
                self.finish_initializing(session, &arxiv_id, Some(paper))
                    .await
                    .map(SelectOutcome::Ready)
            }
            SelectionOutcome::Cancelled => Ok(SelectOutcome::Dropped {
                cancelled: true,
                message: "Selection cancelled. Search for another paper.".to_string(),
            }),
            SelectionOutcome::Invalid(message) => Ok(SelectOutcome::Dropped {
                cancelled: false,
                message,
            }),
        }
    }

    /// Prepare a paper named by identifier, skipping search.
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub async fn initialize(&self, session: &mut Session, arxiv_id: &str) -> Result<InitOutcome> {
        let id = ArxivId::parse(arxiv_id)?;
        session.begin_initializing()?;
        self.finish_initializing(session, id.normalized(), None).await
    }

    /// Answer a question about the ready paper.
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub async fn ask(&self, session: &mut Session, question: &str) -> Result<ChatAnswer> {
        let (paper, corpus_id) = ready_parts(session, "ask")?;

        let snippets = self
            .retrieve(session, &corpus_id, question, self.settings.top_k)
            .await?;
        if snippets.is_empty() {
            return Ok(ChatAnswer::new(NO_CODE_ANSWER, &snippets));
        }

        // only questions that reach the model count toward the PDF policy
        let question_number = session.record_question();
        let pdf = if self.settings.pdf_attachment.applies_to(question_number) {
            match self.locator.read_pdf(&paper).await {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    warn!("Answering without the PDF: {}", err);
                    None
                }
            }
        } else {
            None
        };

        let answer = self
            .synthesizer
            .answer(question, &snippets, &paper, pdf)
            .await
            .map_err(|err| fail_if_fatal(session, err))?;
        Ok(ChatAnswer::new(answer, &snippets))
    }

    /// Explain how a paper concept is implemented, from the best matching code.
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub async fn explain(&self, session: &mut Session, concept: &str) -> Result<Explanation> {
        let (paper, corpus_id) = ready_parts(session, "explain")?;

        let mut query = concept.trim().to_string();
        if let Some(found) = session.concept_map.as_ref().and_then(|m| m.find(concept)) {
            for keyword in &found.search_keywords {
                query.push(' ');
                query.push_str(keyword);
            }
        }

        let snippets = self
            .retrieve(session, &corpus_id, &query, self.settings.top_k)
            .await?;
        if snippets.is_empty() {
            return Err(AgentError::NotFound(format!(
                "No code related to \"{}\" was found in the repository.",
                concept.trim()
            )));
        }

        let code = snippets
            .iter()
            .map(|s| format!("# {}\n{}", s.file_path(), s.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        let explanation = self
            .synthesizer
            .explain(concept.trim(), &code, &paper.summary)
            .await
            .map_err(|err| fail_if_fatal(session, err))?;

        Ok(Explanation {
            concept: concept.trim().to_string(),
            explanation,
            citations: snippets.iter().map(Citation::from).collect(),
        })
    }

    /// Generate a minimal working example for a function or class.
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub async fn example(&self, session: &mut Session, target: &str) -> Result<String> {
        let (paper, corpus_id) = ready_parts(session, "example")?;

        let snippets = self.retrieve(session, &corpus_id, target, 1).await?;
        let Some(best) = snippets.first() else {
            return Err(AgentError::NotFound(format!(
                "No code matching \"{}\" was found in the repository.",
                target.trim()
            )));
        };

        self.synthesizer
            .generate_example(target.trim(), &best.text, &paper.summary)
            .await
            .map_err(|err| fail_if_fatal(session, err))
    }

    pub fn suggest_questions(&self, session: &Session) -> Result<Vec<String>> {
        require_ready(session, "suggest questions")?;
        Ok(session
            .concept_map
            .as_ref()
            .map(ConceptMap::suggest_questions)
            .unwrap_or_default())
    }

    pub fn status(&self, session: &Session) -> SessionStatus {
        session.status()
    }

    pub fn reset(&self, session: &mut Session) {
        info!("Resetting session {}", session.id);
        session.reset();
    }

    async fn retrieve(
        &self,
        session: &mut Session,
        corpus_id: &str,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<Snippet>> {
        self.index
            .query(corpus_id, text, top_k)
            .await
            .map_err(|err| fail_if_fatal(session, err))
    }

    async fn finish_initializing(
        &self,
        session: &mut Session,
        arxiv_id: &str,
        known: Option<PaperInfo>,
    ) -> Result<InitOutcome> {
        match self.prepare_paper(arxiv_id, known).await {
            Ok((ready, outcome)) => {
                session.mark_ready(ready)?;
                info!("Session {} ready with {}", session.id, arxiv_id);
                Ok(outcome)
            }
            Err(err) => Err(recover(session, err)),
        }
    }

    /// Steps between `INITIALIZING` and `READY`. Touches no session state.
    #[instrument(skip(self, known))]
    async fn prepare_paper(
        &self,
        arxiv_id: &str,
        known: Option<PaperInfo>,
    ) -> Result<(ReadyPaper, InitOutcome)> {
        let cached = self.cache.peek(arxiv_id).await;
        let mut paper = match (&cached, known) {
            (Some(entry), _) => entry.paper.clone(),
            (None, Some(paper)) => paper,
            (None, None) => self.locator.fetch(arxiv_id).await?,
        };

        let pdf_path = self.locator.ensure_pdf(&paper).await?;
        paper.pdf_path = Some(pdf_path);

        let corpus_id = self.corpora.resolve_corpus(&paper.arxiv_id).await?;
        let has_documents = match self.corpora.has_documents(&corpus_id).await {
            Ok(has) => has,
            Err(err) => {
                warn!("Could not check corpus {}, indexing anyway: {}", corpus_id, err);
                false
            }
        };

        let mut entry = cached
            .clone()
            .unwrap_or_else(|| CacheEntry::new(paper.clone()));
        entry.paper = paper.clone();
        entry.corpus_id = Some(corpus_id.clone());

        let (repo, indexed_files) = if has_documents {
            info!("Corpus {} already has documents, skipping clone and indexing", corpus_id);
            let repo = entry.repo_url.as_deref().and_then(|url| {
                let repo = RepoInfo::new(url).ok()?;
                Some(match &entry.repo_path {
                    Some(path) => repo.with_local_path(path),
                    None => repo,
                })
            });
            (repo, IndexedFiles::Cached)
        } else {
            let pdf = match self.locator.read_pdf(&paper).await {
                Ok(bytes) => Some(bytes),
                Err(err) => {
                    warn!("Looking for the repository without the PDF: {}", err);
                    None
                }
            };
            let url = self.repos.resolve(&paper, pdf).await?;
            let repo = self.materializer.clone_repo(&url).await?;
            let root = repo.local_path.clone().unwrap_or_default();
            let report = self.indexer.index(&corpus_id, &root, &paper.arxiv_id).await?;
            if report.indexed == 0 {
                warn!("No files from {} were indexed", repo.url);
            }

            entry.repo_url = Some(repo.url.clone());
            entry.repo_path = repo.local_path.clone();
            entry.revision = repo.revision.clone();
            entry.indexed_files = Some(report.indexed);
            entry.indexed_at = Some(chrono::Utc::now());
            (Some(repo), IndexedFiles::Count(report.indexed))
        };

        self.cache.set(entry).await?;

        let concept_map = match self.cache.load_concept_map(&paper.arxiv_id) {
            Some(map) => map,
            None => {
                let local = repo.as_ref().and_then(|r| r.local_path.as_deref());
                let map = self.generate_concept_map(&paper, local).await?;
                self.cache.save_concept_map(&paper.arxiv_id, &map).await?;
                map
            }
        };

        let from_cache = cached.is_some() && has_documents;
        let suggested_questions = concept_map.suggest_questions();
        let message = if from_cache {
            format!("Loaded \"{}\" from cache. Ask a question about it.", paper.title)
        } else {
            format!("\"{}\" is ready. Ask a question about it.", paper.title)
        };

        let outcome = InitOutcome {
            paper: paper.clone(),
            repo_url: repo.as_ref().map(|r| r.url.clone()),
            indexed_files,
            from_cache,
            suggested_questions,
            message,
        };
        let ready = ReadyPaper {
            paper,
            repo,
            corpus_id,
            concept_map,
        };
        Ok((ready, outcome))
    }

    async fn generate_concept_map(
        &self,
        paper: &PaperInfo,
        local: Option<&Path>,
    ) -> Result<ConceptMap> {
        let (readme, structure) = match local.filter(|path| path.is_dir()) {
            Some(path) => (read_readme(path), repo_structure(path)),
            None => (None, RepoStructure::default()),
        };
        self.synthesizer
            .concept_map(paper, readme.as_deref(), &structure)
            .await
    }
}

/// Put the session where the failure leaves it and hand the error back.
fn recover(session: &mut Session, err: AgentError) -> AgentError {
    if err.is_fatal() {
        warn!("Session {} failed: {}", session.id, err);
        session.fail(err.user_message());
    } else {
        info!("Session {} back to start: {}", session.id, err);
        session.abandon();
    }
    err
}

/// In `READY`, only fatal errors change the state.
fn fail_if_fatal(session: &mut Session, err: AgentError) -> AgentError {
    if err.is_fatal() {
        warn!("Session {} failed: {}", session.id, err);
        session.fail(err.user_message());
    }
    err
}

fn require_ready(session: &Session, operation: &'static str) -> Result<()> {
    if session.state == SessionState::Ready {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            operation,
            state: session.state.to_string(),
        }
        .into())
    }
}

fn ready_parts(session: &Session, operation: &'static str) -> Result<(PaperInfo, String)> {
    require_ready(session, operation)?;
    match (&session.paper, &session.corpus_id) {
        (Some(paper), Some(corpus_id)) => Ok((paper.clone(), corpus_id.clone())),
        _ => Err(CoreError::Validation("ready session has no paper".into()).into()),
    }
}

#[cfg(test)]
mod tests;
