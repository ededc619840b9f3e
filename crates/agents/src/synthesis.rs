//! Synthesis client: every prompt Repo Rover sends to the language model.
//!
//! Recoverable failures (quota, timeouts, malformed output) degrade to a
//! labeled fallback so callers always get something displayable. Fatal ones
//! (bad credentials) are returned as errors.

use crate::materializer::RepoStructure;
use crate::traits::{ContentPart, GenerateRequest, LanguageModel};
use crate::{AgentError, Result};
use rover_core::{find_repo_url, ConceptMap, PaperInfo, Snippet};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const ABSTRACT_CHARS: usize = 1000;
const README_CHARS: usize = 3000;
const STRUCTURE_FILES: usize = 20;
const CONTEXT_CHARS: usize = 500;
const SNIPPET_CHARS: usize = 2000;
const CODE_CONTEXT_CHARS: usize = 4000;
const EXAMPLE_CODE_CHARS: usize = 3000;

#[derive(Clone)]
pub struct Synthesizer {
    model: Arc<dyn LanguageModel>,
}

impl Synthesizer {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// Map the paper's main concepts to likely code locations.
    #[instrument(skip_all, fields(arxiv_id = %paper.arxiv_id))]
    pub async fn concept_map(
        &self,
        paper: &PaperInfo,
        readme: Option<&str>,
        structure: &RepoStructure,
    ) -> Result<ConceptMap> {
        let prompt = format!(
            "You are analyzing a research paper and its code implementation.\n\n\
             PAPER\nTitle: {title}\nAbstract: {summary}\n\n\
             REPOSITORY README\n{readme}\n\n\
             REPOSITORY STRUCTURE\nSource files: {files}\nKey files: {key_files}\n\n\
             Map the 3-5 most important concepts of the paper to the code. Reply with one JSON object:\n\
             {{\"main_concepts\": [{{\"concept\": \"name\", \"description\": \"...\", \"likely_files\": [\"file.py\"], \"search_keywords\": [\"keyword\"]}}],\n \
             \"key_functions\": [{{\"function_name\": \"name\", \"purpose\": \"...\", \"file_hint\": \"file.py\"}}],\n \
             \"architecture_overview\": \"how the paper's ideas are laid out in code\"}}\n\
             Return only JSON.",
            title = paper.title,
            summary = truncate(&paper.summary, ABSTRACT_CHARS),
            readme = readme
                .map(|r| truncate(r, README_CHARS))
                .unwrap_or_else(|| "No README available".to_string()),
            files = structure
                .source_files
                .iter()
                .take(STRUCTURE_FILES)
                .cloned()
                .collect::<Vec<_>>()
                .join(", "),
            key_files = structure.key_files.join(", "),
        );

        let generated = match self
            .model
            .generate(GenerateRequest::text(prompt).with_json_output())
            .await
        {
            Ok(text) => text,
            Err(err) if err.is_fatal() => return Err(err),
            Err(err) => {
                warn!("Concept map generation failed, using fallback: {}", err);
                return Ok(ConceptMap::fallback(&paper.title));
            }
        };

        match parse_concept_map(&generated) {
            Some(map) => {
                info!("Created concept map with {} concepts", map.main_concepts.len());
                Ok(map)
            }
            None => {
                warn!("Concept map response was not usable JSON, using fallback");
                Ok(ConceptMap::fallback(&paper.title))
            }
        }
    }

    /// Explain how a code fragment implements a paper concept.
    #[instrument(skip(self, code, paper_context))]
    pub async fn explain(&self, concept: &str, code: &str, paper_context: &str) -> Result<String> {
        let prompt = format!(
            "You are explaining how a research paper concept is implemented in code.\n\n\
             CONCEPT: {concept}\nPAPER CONTEXT: {context}\n\n\
             CODE:\n```\n{code}\n```\n\n\
             In 2-3 paragraphs: say what the concept is in the paper, show how this code implements it, \
             and point at the lines or names that correspond to the theory. Be specific about function \
             names, variable names and control flow.",
            concept = concept,
            context = truncate(paper_context, CONTEXT_CHARS),
            code = truncate(code, SNIPPET_CHARS),
        );

        self.generate_or_label(GenerateRequest::text(prompt), |err| {
            format!("[Explanation unavailable] Could not explain {}: {}", concept, err.user_message())
        })
        .await
    }

    /// Answer a question from retrieved snippets, attaching the PDF when given.
    #[instrument(skip(self, snippets, paper, pdf), fields(snippets = snippets.len(), with_pdf = pdf.is_some()))]
    pub async fn answer(
        &self,
        question: &str,
        snippets: &[Snippet],
        paper: &PaperInfo,
        pdf: Option<Vec<u8>>,
    ) -> Result<String> {
        let code_context = truncate(&format_snippets(snippets), CODE_CONTEXT_CHARS);
        let paper_section = if pdf.is_some() {
            format!("PAPER: {} (full text attached)", paper.title)
        } else {
            format!(
                "PAPER: {}\nABSTRACT: {}",
                paper.title,
                truncate(&paper.summary, 800)
            )
        };
        let prompt = format!(
            "You are an expert at explaining research paper implementations. Answer concisely, \
             in at most 3 paragraphs.\n\n\
             {paper_section}\n\nRELEVANT CODE FROM THE REPOSITORY:\n{code_context}\n\n\
             QUESTION: {question}\n\n\
             Structure the answer as:\n\
             1. **Direct answer** (1-2 sentences)\n\
             2. **Implementation details** (one paragraph on how the code does it)\n\
             3. **Code references** (bullets such as `src/model.py:142-156` or `class TransformerBlock`)\n\
             Wrap every file reference in backticks and do not explain code that was not asked about."
        );

        let mut request = GenerateRequest::text(prompt);
        if let Some(bytes) = pdf {
            request = request.with_attachment(ContentPart::pdf(bytes));
        }

        self.generate_or_label(request, |err| {
            format!("[Answer unavailable] {}", err.user_message())
        })
        .await
    }

    /// Write a small standalone script demonstrating `function_name`.
    #[instrument(skip(self, code, paper_context))]
    pub async fn generate_example(
        &self,
        function_name: &str,
        code: &str,
        paper_context: &str,
    ) -> Result<String> {
        let prompt = format!(
            "You are writing a minimal working example for a research paper implementation.\n\n\
             PAPER CONTEXT: {context}\n\nORIGINAL CODE:\n```\n{code}\n```\n\n\
             Write one standalone script that demonstrates {function_name}. Include every import, \
             build synthetic inputs instead of reading files, print the results, comment the key \
             steps, and keep it under 100 lines. Return only the code.",
            context = truncate(paper_context, CONTEXT_CHARS),
            code = truncate(code, EXAMPLE_CODE_CHARS),
        );

        let generated = self
            .generate_or_label(GenerateRequest::text(prompt), |err| {
                format!(
                    "# Example unavailable for {}: {}",
                    function_name,
                    err.user_message()
                )
            })
            .await?;
        Ok(strip_code_fence(&generated))
    }

    /// Ask the model to read the PDF and name the official code repository.
    #[instrument(skip_all, fields(arxiv_id = %paper.arxiv_id))]
    pub async fn extract_repo_url(&self, paper: &PaperInfo, pdf: Vec<u8>) -> Result<Option<String>> {
        let prompt = format!(
            "This is the paper \"{}\". Find the URL of its official source code repository \
             (GitHub, GitLab or Bitbucket), usually in the abstract, introduction, footnotes or \
             conclusion. Reply with only the URL, or NONE if the paper does not give one.",
            paper.title
        );
        let request = GenerateRequest::text(prompt).with_attachment(ContentPart::pdf(pdf));

        match self.model.generate(request).await {
            Ok(text) => {
                let url = find_repo_url(&text);
                debug!("PDF repository extraction returned {:?}", url);
                Ok(url)
            }
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!("PDF repository extraction failed: {}", err);
                Ok(None)
            }
        }
    }

    async fn generate_or_label<F>(&self, request: GenerateRequest, label: F) -> Result<String>
    where
        F: FnOnce(&AgentError) -> String,
    {
        match self.model.generate(request).await {
            Ok(text) => Ok(text),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                warn!("Language model call degraded to fallback: {}", err);
                Ok(label(&err))
            }
        }
    }
}

/// Render snippets as fenced blocks headed by path and score.
pub fn format_snippets(snippets: &[Snippet]) -> String {
    snippets
        .iter()
        .map(|s| {
            format!(
                "File: {} (relevance {:.2})\n```\n{}\n```",
                s.file_path(),
                s.score,
                truncate(&s.text, SNIPPET_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn parse_concept_map(generated: &str) -> Option<ConceptMap> {
    let cleaned = normalize_json_payload(generated);
    serde_json::from_str::<ConceptMap>(&cleaned)
        .ok()
        .filter(|map| !map.is_empty())
}

/// Strip a Markdown fence and any prose around a JSON object.
fn normalize_json_payload(payload: &str) -> String {
    let without_fence = strip_code_fence(payload);
    if let (Some(start), Some(end)) = (without_fence.find('{'), without_fence.rfind('}')) {
        if start < end {
            return without_fence[start..=end].to_string();
        }
    }
    without_fence
}

/// Return the body of a leading Markdown code fence, or the trimmed input.
fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    let mut lines = trimmed.lines();
    let _ = lines.next(); // ``` or ```lang
    let mut content = lines.collect::<Vec<_>>().join("\n");
    if let Some(end) = content.rfind("```") {
        content.truncate(end);
    }
    content.trim().to_string()
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeLanguageModel;
    use rover_core::snippet::FILE_PATH_KEY;

    fn paper() -> PaperInfo {
        PaperInfo::new("1706.03762", "Attention Is All You Need")
            .with_summary("The dominant sequence transduction models...")
    }

    fn structure() -> RepoStructure {
        RepoStructure {
            source_files: vec!["tensor2tensor/models/transformer.py".into()],
            key_files: vec!["README.md".into()],
        }
    }

    #[test]
    fn test_normalize_json_payload() {
        let fenced = "```json\n{\"main_concepts\": []}\n```";
        assert_eq!(normalize_json_payload(fenced), "{\"main_concepts\": []}");

        let chatty = "Here is the map: {\"a\": 1} hope it helps";
        assert_eq!(normalize_json_payload(chatty), "{\"a\": 1}");
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```python\nprint(1)\n```\n"), "print(1)");
        assert_eq!(strip_code_fence("print(2)"), "print(2)");
    }

    #[tokio::test]
    async fn test_concept_map_parses_fenced_json() {
        let model = Arc::new(FakeLanguageModel::replying(
            "```json\n{\"main_concepts\":[{\"concept\":\"Multi-Head Attention\",\"likely_files\":[\"transformer.py\"]}],\"key_functions\":[],\"architecture_overview\":\"Encoder-decoder\"}\n```",
        ));
        let synth = Synthesizer::new(model.clone());

        let map = synth.concept_map(&paper(), Some("# T2T"), &structure()).await.unwrap();
        assert_eq!(map.main_concepts[0].name, "Multi-Head Attention");
        assert!(model.requests()[0].json_output);
    }

    #[tokio::test]
    async fn test_concept_map_falls_back_on_malformed_output() {
        let synth = Synthesizer::new(Arc::new(FakeLanguageModel::replying("not json at all")));
        let map = synth.concept_map(&paper(), None, &structure()).await.unwrap();
        assert_eq!(map, ConceptMap::fallback("Attention Is All You Need"));
    }

    #[tokio::test]
    async fn test_concept_map_falls_back_on_quota() {
        let synth = Synthesizer::new(Arc::new(FakeLanguageModel::failing(|| AgentError::Quota {
            service: "Gemini",
        })));
        let map = synth.concept_map(&paper(), None, &structure()).await.unwrap();
        assert_eq!(map.main_concepts[0].name, "Core Implementation");
    }

    #[tokio::test]
    async fn test_answer_attaches_pdf_first() {
        let model = Arc::new(FakeLanguageModel::replying("It uses eight heads."));
        let synth = Synthesizer::new(model.clone());
        let snippets = vec![Snippet::new("class MultiHeadAttention", 0.7)
            .with_metadata(FILE_PATH_KEY, "transformer.py")];

        let answer = synth
            .answer("Explain multi-head attention", &snippets, &paper(), Some(b"%PDF".to_vec()))
            .await
            .unwrap();
        assert_eq!(answer, "It uses eight heads.");

        let request = &model.requests()[0];
        assert!(matches!(&request.parts[0], ContentPart::Inline { mime_type, .. } if mime_type == "application/pdf"));
        let ContentPart::Text(prompt) = &request.parts[1] else {
            panic!("expected text prompt");
        };
        assert!(prompt.contains("transformer.py"));
        assert!(prompt.contains("Explain multi-head attention"));
    }

    #[tokio::test]
    async fn test_answer_degrades_to_labeled_text() {
        let synth = Synthesizer::new(Arc::new(FakeLanguageModel::failing(|| AgentError::Timeout {
            service: "Gemini",
        })));
        let answer = synth.answer("Why?", &[], &paper(), None).await.unwrap();
        assert!(answer.starts_with("[Answer unavailable]"));
    }

    #[tokio::test]
    async fn test_auth_failure_is_returned() {
        let synth = Synthesizer::new(Arc::new(FakeLanguageModel::failing(|| AgentError::Auth {
            service: "Gemini",
        })));
        let err = synth.explain("attention", "code", "context").await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_generate_example_strips_fence() {
        let synth = Synthesizer::new(Arc::new(FakeLanguageModel::replying(
            "```python\nimport torch\nprint(torch.ones(2))\n```",
        )));
        let code = synth
            .generate_example("MultiHeadAttention", "class MultiHeadAttention: ...", "")
            .await
            .unwrap();
        assert_eq!(code, "import torch\nprint(torch.ones(2))");
    }

    #[tokio::test]
    async fn test_extract_repo_url() {
        let synth = Synthesizer::new(Arc::new(FakeLanguageModel::replying(
            "https://github.com/SALT-NLP/DyLAN",
        )));
        let url = synth.extract_repo_url(&paper(), b"%PDF".to_vec()).await.unwrap();
        assert_eq!(url.as_deref(), Some("https://github.com/SALT-NLP/DyLAN"));

        let synth = Synthesizer::new(Arc::new(FakeLanguageModel::replying("NONE")));
        assert_eq!(synth.extract_repo_url(&paper(), Vec::new()).await.unwrap(), None);
    }
}
