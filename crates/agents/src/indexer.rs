//! Code indexer: submits a clone's source files to the paper's corpus.

use crate::materializer::list_source_files;
use crate::traits::SearchIndex;
use crate::Result;
use rover_core::IndexedDocument;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Outcome of indexing one repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub indexed: usize,
    /// Too large, not UTF-8, or empty
    pub skipped: usize,
    /// Rejected by the search service
    pub failed: usize,
}

pub struct CodeIndexer {
    index: Arc<dyn SearchIndex>,
    max_file_bytes: u64,
}

impl CodeIndexer {
    pub fn new(index: Arc<dyn SearchIndex>, max_file_bytes: u64) -> Self {
        Self {
            index,
            max_file_bytes,
        }
    }

    /// Index every eligible file under `root`, tagging documents with `tag`.
    ///
    /// Per-file problems are counted and indexing continues. Only a fatal
    /// service error (rejected credentials) stops the run.
    #[instrument(skip(self, root), fields(root = %root.display()))]
    pub async fn index(&self, corpus_id: &str, root: &Path, tag: &str) -> Result<IndexReport> {
        let walk_root = root.to_path_buf();
        let files = tokio::task::spawn_blocking(move || list_source_files(&walk_root))
            .await
            .map_err(std::io::Error::other)?;
        info!("Indexing {} source files", files.len());

        let mut report = IndexReport::default();
        for rel in files {
            let path = root.join(&rel);
            let rel = rel.to_string_lossy().replace('\\', "/");

            let Some(text) = self.read_eligible(&path).await else {
                debug!("Skipping {}", rel);
                report.skipped += 1;
                continue;
            };

            let document = IndexedDocument::for_source_file(tag, &rel, text);
            match self.index.index_document(corpus_id, &document).await {
                Ok(()) => report.indexed += 1,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!("Failed to index {}: {}", rel, err);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Indexed {} files ({} skipped, {} failed)",
            report.indexed, report.skipped, report.failed
        );
        Ok(report)
    }

    async fn read_eligible(&self, path: &Path) -> Option<String> {
        let metadata = tokio::fs::metadata(path).await.ok()?;
        if metadata.len() > self.max_file_bytes {
            return None;
        }
        let bytes = tokio::fs::read(path).await.ok()?;
        let text = String::from_utf8(bytes).ok()?;
        (!text.trim().is_empty()).then_some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSearchIndex;
    use crate::AgentError;
    use async_trait::async_trait;
    use rover_core::Snippet;
    use crate::traits::CorpusSummary;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_index_counts_and_skips() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "model.py", b"class Model:\n    pass\n");
        write(dir.path(), "layers/attention.py", b"def attend(q, k, v): ...");
        write(dir.path(), "big.py", &vec![b'x'; 2048]);
        write(dir.path(), "binary.py", &[0xff, 0xfe, 0x00, 0x01]);
        write(dir.path(), "empty.py", b"   \n");
        write(dir.path(), "notes.txt", b"not source");

        let index = Arc::new(FakeSearchIndex::new());
        let indexer = CodeIndexer::new(index.clone(), 1024);

        let report = indexer.index("7", dir.path(), "1706.03762").await.unwrap();
        assert_eq!(report, IndexReport { indexed: 2, skipped: 3, failed: 0 });
        assert_eq!(index.document_count("7"), 2);

        let hits = index.query("7", "attend", 1).await.unwrap();
        assert_eq!(hits[0].file_path(), "layers/attention.py");
        assert_eq!(hits[0].document_id.as_deref(), Some("1706.03762::layers/attention.py"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_index_nested_tree_on_worker_threads() {
        let dir = TempDir::new().unwrap();
        for depth in 0..5 {
            let rel = format!("{}model.py", "pkg/".repeat(depth));
            write(dir.path(), &rel, b"class Model: pass");
        }
        write(dir.path(), "tests/test_model.py", b"def test(): pass");

        let index = Arc::new(FakeSearchIndex::new());
        let indexer = CodeIndexer::new(index.clone(), 1024);
        let report = indexer.index("3", dir.path(), "tag").await.unwrap();
        assert_eq!(report.indexed, 5);
        assert_eq!(index.document_count("3"), 5);
    }

    #[tokio::test]
    async fn test_empty_repository_indexes_nothing() {
        let dir = TempDir::new().unwrap();
        let indexer = CodeIndexer::new(Arc::new(FakeSearchIndex::new()), 1024);
        let report = indexer.index("1", dir.path(), "tag").await.unwrap();
        assert_eq!(report.indexed, 0);
    }

    /// Rejects documents whose path contains "bad", or every document with bad credentials.
    struct PickyIndex {
        auth_failure: bool,
    }

    #[async_trait]
    impl SearchIndex for PickyIndex {
        async fn list_corpora(&self) -> crate::Result<Vec<CorpusSummary>> {
            Ok(Vec::new())
        }

        async fn create_corpus(&self, _name: &str, _description: &str) -> crate::Result<String> {
            Ok("1".into())
        }

        async fn index_document(&self, _corpus_id: &str, document: &IndexedDocument) -> crate::Result<()> {
            if self.auth_failure {
                return Err(AgentError::Auth { service: "Vectara" });
            }
            if document.document_id.contains("bad") {
                return Err(AgentError::Rejected {
                    service: "Vectara",
                    status: 400,
                    detail: "document too large".into(),
                });
            }
            Ok(())
        }

        async fn query(&self, _corpus_id: &str, _text: &str, _top_k: usize) -> crate::Result<Vec<Snippet>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_rejected_files_do_not_abort() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "bad.py", b"x = 1");
        write(dir.path(), "good.py", b"y = 2");

        let indexer = CodeIndexer::new(Arc::new(PickyIndex { auth_failure: false }), 1024);
        let report = indexer.index("1", dir.path(), "tag").await.unwrap();
        assert_eq!(report.indexed, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_auth_failure_aborts() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "good.py", b"y = 2");

        let indexer = CodeIndexer::new(Arc::new(PickyIndex { auth_failure: true }), 1024);
        let err = indexer.index("1", dir.path(), "tag").await.unwrap_err();
        assert!(matches!(err, AgentError::Auth { .. }));
    }
}
