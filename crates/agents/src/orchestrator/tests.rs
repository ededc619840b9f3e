use super::*;
use crate::testing::{
    FakeGitHost, FakeLanguageModel, FakePaperSource, FakeRepoSearch, FakeSearchIndex,
};
use crate::traits::{ContentPart, GenerateRequest};
use rover_core::IndexedDocument;
use std::collections::HashMap;
use tempfile::TempDir;

const CONCEPT_MAP_JSON: &str = r#"{
  "main_concepts": [
    {"concept": "Multi-Head Attention", "description": "Parallel attention heads",
     "likely_files": ["tensor2tensor/models/transformer.py"], "search_keywords": ["heads", "attention"]},
    {"concept": "Positional Encoding", "likely_files": ["tensor2tensor/layers/common.py"]}
  ],
  "key_functions": [{"function_name": "MultiHeadAttention", "purpose": "attention", "file_hint": "transformer.py"}],
  "architecture_overview": "Encoder-decoder stacks"
}"#;

const REPO_FILES: &[(&str, &str)] = &[
    ("README.md", "# Tensor2Tensor"),
    (
        "tensor2tensor/models/transformer.py",
        "class MultiHeadAttention:\n    \"\"\"multi-head attention over several heads\"\"\"\n    def forward(self, q, k, v):\n        return q",
    ),
    ("tensor2tensor/layers/common.py", "def positional_encoding(length):\n    return length"),
    ("tests/test_transformer.py", "def test(): pass"),
];

fn prompt_text(request: &GenerateRequest) -> String {
    request
        .parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text(text) => Some(text.as_str()),
            ContentPart::Inline { .. } => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn scripted_model() -> FakeLanguageModel {
    FakeLanguageModel::with_handler(|request| {
        let prompt = prompt_text(request);
        if request.json_output {
            Ok(CONCEPT_MAP_JSON.to_string())
        } else if prompt.contains("official source code repository") {
            Ok("NONE".to_string())
        } else if prompt.contains("minimal working example") {
            Ok("```python\nprint('demo')\n```".to_string())
        } else if prompt.contains("CONCEPT:") {
            Ok("The MultiHeadAttention class splits queries into heads.".to_string())
        } else {
            Ok("Attention is computed by `MultiHeadAttention` in `tensor2tensor/models/transformer.py`.".to_string())
        }
    })
}

fn papers() -> Vec<PaperInfo> {
    vec![
        PaperInfo::new("1706.03762", "Attention Is All You Need")
            .with_summary("The dominant sequence transduction models are based on attention."),
        PaperInfo::new("1609.02907", "Semi-Supervised Classification with Graph Convolutional Networks"),
        PaperInfo::new("1710.10903", "Graph Attention Networks"),
        PaperInfo::new("1810.00826", "How Powerful are Graph Neural Networks?"),
        PaperInfo::new("1806.01261", "Relational inductive biases, deep learning, and graph networks"),
        PaperInfo::new("2006.05205", "On the Bottleneck of Graph Neural Networks"),
        PaperInfo::new("1901.00596", "A Comprehensive Survey on Graph Neural Networks"),
        PaperInfo::new("2401.00001", "A Paper Without Code"),
    ]
}

struct Harness {
    dir: TempDir,
    model: Arc<FakeLanguageModel>,
    index: Arc<FakeSearchIndex>,
    papers: Arc<FakePaperSource>,
    git: Arc<FakeGitHost>,
    extra_env: Vec<(&'static str, &'static str)>,
}

impl Harness {
    fn new() -> Self {
        Self::with(FakeSearchIndex::new(), FakeGitHost::with_files(REPO_FILES))
    }

    fn with(index: FakeSearchIndex, git: FakeGitHost) -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            model: Arc::new(scripted_model()),
            index: Arc::new(index),
            papers: Arc::new(FakePaperSource::with_papers(papers())),
            git: Arc::new(git),
            extra_env: Vec::new(),
        }
    }

    fn env(mut self, key: &'static str, value: &'static str) -> Self {
        self.extra_env.push((key, value));
        self
    }

    fn settings(&self) -> Arc<Settings> {
        let mut env: HashMap<String, String> = [
            ("GEMINI_API_KEY", "g-key"),
            ("VECTARA_CUSTOMER_ID", "123"),
            ("VECTARA_API_KEY", "v-key"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        env.insert(
            "ROVER_DATA_DIR".to_string(),
            self.dir.path().to_string_lossy().into_owned(),
        );
        for (k, v) in &self.extra_env {
            env.insert(k.to_string(), v.to_string());
        }
        let settings = Settings::from_lookup(move |key| env.get(key).cloned()).unwrap();
        settings.ensure_directories().unwrap();
        Arc::new(settings)
    }

    /// A fresh orchestrator over the same data directory and services.
    fn orchestrator(&self) -> Orchestrator {
        let services = Services {
            model: self.model.clone(),
            index: self.index.clone(),
            papers: self.papers.clone(),
            repo_search: Arc::new(FakeRepoSearch::default()),
            git: self.git.clone(),
        };
        Orchestrator::new(self.settings(), services).unwrap()
    }
}

fn ready(outcome: SearchOutcome) -> InitOutcome {
    match outcome {
        SearchOutcome::Ready(init) => init,
        SearchOutcome::NeedsSelection { .. } => panic!("expected a ready paper"),
    }
}

#[tokio::test]
async fn test_arxiv_id_goes_straight_to_ready() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();
    let mut session = Session::new();

    let init = ready(orchestrator.submit_query(&mut session, "1706.03762").await.unwrap());
    assert_eq!(init.paper.arxiv_id, "1706.03762");
    assert_eq!(init.repo_url.as_deref(), Some("https://github.com/tensorflow/tensor2tensor"));
    assert!(!init.from_cache);
    assert!(matches!(init.indexed_files, IndexedFiles::Count(n) if n > 0));
    assert_eq!(
        session.transitions,
        vec![SessionState::Searching, SessionState::Initializing, SessionState::Ready]
    );
    assert_eq!(init.suggested_questions[0], "Show me the Multi-Head Attention implementation");

    let answer = orchestrator
        .ask(&mut session, "Explain multi-head attention")
        .await
        .unwrap();
    assert!(!answer.answer.is_empty());
    assert!(!answer.citations.is_empty());
    assert!(answer.citations[0].score > 0.0);
    assert_eq!(answer.num_sources, answer.citations.len());
}

#[tokio::test]
async fn test_indexing_skips_test_directories() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();
    let mut session = Session::new();

    let init = orchestrator.initialize(&mut session, "1706.03762").await.unwrap();
    assert_eq!(init.indexed_files, IndexedFiles::Count(2));
    assert_eq!(harness.index.index_calls(), 2);
}

#[tokio::test]
async fn test_second_initialization_uses_caches() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();

    let mut first = Session::new();
    orchestrator.initialize(&mut first, "1706.03762").await.unwrap();
    let indexed = harness.index.index_calls();

    let mut second = Session::new();
    let init = orchestrator.initialize(&mut second, "1706.03762").await.unwrap();
    assert!(init.from_cache);
    assert_eq!(init.indexed_files, IndexedFiles::Cached);
    assert_eq!(init.repo_url.as_deref(), Some("https://github.com/tensorflow/tensor2tensor"));

    assert_eq!(harness.papers.download_calls(), 1);
    assert_eq!(harness.git.clone_calls(), 1);
    assert_eq!(harness.index.index_calls(), indexed);
    assert_eq!(harness.index.create_calls(), 1);

    // a restarted process sees the same paper cache and corpus
    let restarted = harness.orchestrator();
    let mut third = Session::new();
    let init = restarted.initialize(&mut third, "1706.03762").await.unwrap();
    assert!(init.from_cache);
    assert_eq!(harness.papers.download_calls(), 1);
    assert_eq!(harness.index.create_calls(), 1);
    assert_eq!(harness.git.clone_calls(), 1);
}

#[tokio::test]
async fn test_existing_documents_skip_clone_and_index() {
    let docs = vec![IndexedDocument::for_source_file(
        "1706.03762",
        "transformer.py",
        "class MultiHeadAttention: pass",
    )];
    let harness = Harness::with(
        FakeSearchIndex::new().with_corpus("1706.03762", docs),
        FakeGitHost::with_files(REPO_FILES),
    );
    let orchestrator = harness.orchestrator();
    let mut session = Session::new();

    let init = orchestrator.initialize(&mut session, "1706.03762").await.unwrap();
    assert_eq!(init.indexed_files, IndexedFiles::Cached);
    assert!(!init.from_cache);
    assert_eq!(harness.git.clone_calls(), 0);
    assert_eq!(harness.index.index_calls(), 0);
    assert_eq!(session.state, SessionState::Ready);
    assert!(session.concept_map.is_some());
}

#[tokio::test]
async fn test_unknown_corpus_contents_means_full_indexing() {
    let docs = vec![IndexedDocument::for_source_file("1706.03762", "old.py", "x = 1")];
    let harness = Harness::with(
        FakeSearchIndex::new().with_corpus("1706.03762", docs),
        FakeGitHost::with_files(REPO_FILES),
    );
    harness.index.fail_queries_with(|| AgentError::Timeout { service: "Vectara" });
    let orchestrator = harness.orchestrator();
    let mut session = Session::new();

    let init = orchestrator.initialize(&mut session, "1706.03762").await.unwrap();
    assert!(matches!(init.indexed_files, IndexedFiles::Count(n) if n > 0));
    assert_eq!(harness.git.clone_calls(), 1);
}

#[tokio::test]
async fn test_free_text_needs_selection() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();
    let mut session = Session::new();

    let outcome = orchestrator
        .submit_query(&mut session, "graph neural networks")
        .await
        .unwrap();
    let SearchOutcome::NeedsSelection { options, .. } = outcome else {
        panic!("expected candidates");
    };
    assert!((1..=5).contains(&options.len()));
    let indices: Vec<usize> = options.iter().map(|o| o.index).collect();
    assert_eq!(indices, (1..=options.len()).collect::<Vec<_>>());
    assert!(session.is_awaiting_selection());
    assert_eq!(session.status().options.len(), options.len());
}

#[tokio::test]
async fn test_out_of_range_selection_returns_to_start() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();
    let mut session = Session::new();
    orchestrator
        .submit_query(&mut session, "graph neural networks")
        .await
        .unwrap();

    let outcome = orchestrator.select(&mut session, "42").await.unwrap();
    assert!(matches!(outcome, SelectOutcome::Dropped { cancelled: false, .. }));
    assert_eq!(session.state, SessionState::Uninitialized);
    assert!(session.options.is_empty());
    assert!(session.error.is_none());
}

#[tokio::test]
async fn test_cancel_and_valid_selection() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();
    let mut session = Session::new();

    orchestrator.submit_query(&mut session, "attention").await.unwrap();
    let outcome = orchestrator.select(&mut session, "cancel").await.unwrap();
    assert!(matches!(outcome, SelectOutcome::Dropped { cancelled: true, .. }));
    assert_eq!(session.state, SessionState::Uninitialized);

    let SearchOutcome::NeedsSelection { options, .. } =
        orchestrator.submit_query(&mut session, "attention").await.unwrap()
    else {
        panic!("expected candidates");
    };
    let position = options
        .iter()
        .find(|o| o.paper.arxiv_id == "1706.03762")
        .map(|o| o.index)
        .unwrap();
    let outcome = orchestrator
        .select(&mut session, &position.to_string())
        .await
        .unwrap();
    let SelectOutcome::Ready(init) = outcome else {
        panic!("expected a ready paper");
    };
    assert_eq!(init.paper.arxiv_id, "1706.03762");
    assert!(session.is_initialized());
}

#[tokio::test]
async fn test_select_without_candidates_is_rejected() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();
    let mut session = Session::new();

    let err = orchestrator.select(&mut session, "1").await.unwrap_err();
    assert!(matches!(err, AgentError::Core(CoreError::InvalidTransition { .. })));
    assert_eq!(session.state, SessionState::Uninitialized);
    assert!(session.transitions.is_empty());
}

#[tokio::test]
async fn test_reset_clears_ready_paper() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();
    let mut session = Session::new();
    let id = session.id.clone();
    orchestrator.initialize(&mut session, "1706.03762").await.unwrap();

    orchestrator.reset(&mut session);
    let status = orchestrator.status(&session);
    assert!(!status.initialized);
    assert_eq!(status.state, SessionState::Uninitialized);
    assert_eq!(status.paper_title, None);
    assert_eq!(status.session_id, id);
}

#[tokio::test]
async fn test_clone_failure_is_fatal_until_reset() {
    let harness = Harness::with(FakeSearchIndex::new(), FakeGitHost::failing());
    let orchestrator = harness.orchestrator();
    let mut session = Session::new();

    let err = orchestrator.initialize(&mut session, "1706.03762").await.unwrap_err();
    assert!(matches!(err, AgentError::CloneFailed { .. }));
    assert_eq!(session.state, SessionState::Error);
    assert!(session.error.as_deref().unwrap().contains("tensor2tensor"));

    let err = orchestrator.submit_query(&mut session, "1810.04805").await.unwrap_err();
    assert!(err.user_message().contains("Reset the session first"));
    assert_eq!(session.state, SessionState::Error);

    orchestrator.reset(&mut session);
    assert_eq!(session.state, SessionState::Uninitialized);
    assert!(session.error.is_none());
}

#[tokio::test]
async fn test_missing_repository_is_recoverable() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();
    let mut session = Session::new();

    let err = orchestrator.submit_query(&mut session, "2401.00001").await.unwrap_err();
    assert!(matches!(err, AgentError::NotFound(_)));
    assert_eq!(session.state, SessionState::Uninitialized);
    assert!(session.error.is_none());
    assert!(session.paper.is_none());
}

#[tokio::test]
async fn test_unknown_paper_is_recoverable() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();
    let mut session = Session::new();

    let err = orchestrator.submit_query(&mut session, "quantum chromodynamics").await.unwrap_err();
    assert!(matches!(err, AgentError::NotFound(_)));
    assert_eq!(session.state, SessionState::Uninitialized);
}

#[tokio::test]
async fn test_questions_require_ready_session() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();
    let mut session = Session::new();

    assert!(orchestrator.ask(&mut session, "What is this?").await.is_err());
    assert!(orchestrator.suggest_questions(&session).is_err());
    assert_eq!(session.state, SessionState::Uninitialized);
    assert_eq!(session.questions_asked, 0);
}

#[tokio::test]
async fn test_pdf_attached_to_first_question_only() {
    let harness = Harness::new().env("ROVER_PDF_ATTACHMENT", "first");
    let orchestrator = harness.orchestrator();
    let mut session = Session::new();
    orchestrator.initialize(&mut session, "1706.03762").await.unwrap();

    orchestrator.ask(&mut session, "How are heads split?").await.unwrap();
    orchestrator.ask(&mut session, "Where is the mask?").await.unwrap();

    let answers: Vec<bool> = harness
        .model
        .requests()
        .iter()
        .filter(|r| prompt_text(r).contains("QUESTION:"))
        .map(GenerateRequest::has_attachment)
        .collect();
    assert_eq!(answers, vec![true, false]);
}

#[tokio::test]
async fn test_failed_first_question_keeps_pdf_for_next() {
    let harness = Harness::new().env("ROVER_PDF_ATTACHMENT", "first");
    let orchestrator = harness.orchestrator();
    let mut session = Session::new();
    orchestrator.initialize(&mut session, "1706.03762").await.unwrap();

    harness.index.fail_queries_with(|| AgentError::Timeout { service: "Vectara" });
    let err = orchestrator.ask(&mut session, "How are heads split?").await.unwrap_err();
    assert!(matches!(err, AgentError::Timeout { .. }));
    assert_eq!(session.state, SessionState::Ready);
    assert_eq!(session.questions_asked, 0);

    harness.index.clear_query_failure();
    orchestrator.ask(&mut session, "How are heads split?").await.unwrap();

    let answers: Vec<bool> = harness
        .model
        .requests()
        .iter()
        .filter(|r| prompt_text(r).contains("QUESTION:"))
        .map(GenerateRequest::has_attachment)
        .collect();
    assert_eq!(answers, vec![true]);
    assert_eq!(session.questions_asked, 1);
}

#[tokio::test]
async fn test_each_initialization_counts_one_cache_access() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();

    let mut first = Session::new();
    orchestrator.initialize(&mut first, "1706.03762").await.unwrap();
    let after_first = orchestrator.cache().peek("1706.03762").await.unwrap().access_count;

    let mut second = Session::new();
    orchestrator.initialize(&mut second, "1706.03762").await.unwrap();
    let after_second = orchestrator.cache().peek("1706.03762").await.unwrap().access_count;

    assert_eq!(after_first, 1);
    assert_eq!(after_second, 2);
    assert_eq!(orchestrator.cache().stats().await.total_accesses, 2);
}

#[tokio::test]
async fn test_question_search_failure_keeps_session_ready() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();
    let mut session = Session::new();
    orchestrator.initialize(&mut session, "1706.03762").await.unwrap();

    harness.index.fail_queries_with(|| AgentError::Quota { service: "Vectara" });
    let err = orchestrator.ask(&mut session, "Why?").await.unwrap_err();
    assert!(matches!(err, AgentError::Quota { .. }));
    assert_eq!(session.state, SessionState::Ready);

    harness.index.fail_queries_with(|| AgentError::Auth { service: "Vectara" });
    orchestrator.ask(&mut session, "Why?").await.unwrap_err();
    assert_eq!(session.state, SessionState::Error);
}

#[tokio::test]
async fn test_explain_example_and_suggestions() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();
    let mut session = Session::new();
    orchestrator.initialize(&mut session, "1706.03762").await.unwrap();

    let explanation = orchestrator
        .explain(&mut session, "Multi-Head Attention")
        .await
        .unwrap();
    assert!(explanation.explanation.contains("MultiHeadAttention"));
    assert!(!explanation.citations.is_empty());

    let code = orchestrator.example(&mut session, "MultiHeadAttention").await.unwrap();
    assert_eq!(code, "print('demo')");

    let questions = orchestrator.suggest_questions(&session).unwrap();
    assert_eq!(questions.len(), 5);
    assert!(questions.contains(&"Explain how Positional Encoding works in the code".to_string()));
}
