//! Client for the hosted Vectara search index (REST v1).

use crate::http::send_json;
use crate::traits::{CorpusSummary, SearchIndex};
use crate::{AgentError, Result, Settings};
use async_trait::async_trait;
use reqwest::Client;
use rover_core::{IndexedDocument, Snippet};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, instrument};

const SERVICE: &str = "Vectara";

#[derive(Clone)]
pub struct VectaraClient {
    client: Client,
    base_url: String,
    customer_id: String,
    api_key: String,
    search_timeout: Duration,
    index_timeout: Duration,
}

impl VectaraClient {
    pub fn new(
        base_url: impl Into<String>,
        customer_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            customer_id: customer_id.into(),
            api_key: api_key.into(),
            search_timeout: Duration::from_secs(8),
            index_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            &settings.vectara_base_url,
            &settings.vectara_customer_id,
            &settings.vectara_api_key,
        )
        .with_timeouts(settings.search_timeout, settings.fetch_timeout)
    }

    pub fn with_timeouts(mut self, search: Duration, index: Duration) -> Self {
        self.search_timeout = search;
        self.index_timeout = index;
        self
    }

    fn post(&self, path: &str, timeout: Duration) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/{}", self.base_url, path))
            .header("x-api-key", &self.api_key)
            .header("customer-id", &self.customer_id)
            .timeout(timeout)
    }

    fn customer_number(&self) -> Result<u64> {
        numeric_id(&self.customer_id, "customer id")
    }
}

fn numeric_id(value: &str, what: &str) -> Result<u64> {
    value.parse().map_err(|_| AgentError::Rejected {
        service: SERVICE,
        status: 400,
        detail: format!("{} '{}' is not numeric", what, value),
    })
}

#[async_trait]
impl SearchIndex for VectaraClient {
    #[instrument(skip(self))]
    async fn list_corpora(&self) -> Result<Vec<CorpusSummary>> {
        let response: ListCorporaResponse = send_json(
            SERVICE,
            self.post("list-corpora", self.search_timeout)
                .json(&json!({ "numResults": 1000 })),
        )
        .await?;

        Ok(response
            .corpus
            .into_iter()
            .map(|c| CorpusSummary {
                id: c.id.to_string(),
                name: c.name,
            })
            .collect())
    }

    #[instrument(skip(self, description))]
    async fn create_corpus(&self, name: &str, description: &str) -> Result<String> {
        let response: CreateCorpusResponse = send_json(
            SERVICE,
            self.post("create-corpus", self.search_timeout).json(&json!({
                "corpus": { "name": name, "description": description }
            })),
        )
        .await?;

        response.status.check()?;
        match response.corpus_id {
            Some(id) if id > 0 => Ok(id.to_string()),
            _ => Err(AgentError::MalformedResponse {
                service: SERVICE,
                detail: "create-corpus returned no corpus id".to_string(),
            }),
        }
    }

    #[instrument(skip(self, document), fields(document_id = %document.document_id))]
    async fn index_document(&self, corpus_id: &str, document: &IndexedDocument) -> Result<()> {
        let body = IndexRequest {
            customer_id: self.customer_number()?,
            corpus_id: numeric_id(corpus_id, "corpus id")?,
            document: IndexDocument {
                document_id: &document.document_id,
                title: &document.title,
                metadata_json: serde_json::to_string(&document.metadata).map_err(|e| {
                    AgentError::Rejected {
                        service: SERVICE,
                        status: 400,
                        detail: e.to_string(),
                    }
                })?,
                section: vec![IndexSection { text: &document.text }],
            },
        };

        let response: StatusResponse =
            send_json(SERVICE, self.post("index", self.index_timeout).json(&body)).await?;
        response.status.check()
    }

    #[instrument(skip(self))]
    async fn query(&self, corpus_id: &str, text: &str, top_k: usize) -> Result<Vec<Snippet>> {
        let body = json!({
            "query": [{
                "query": text,
                "numResults": top_k,
                "corpusKey": [{
                    "customerId": self.customer_number()?,
                    "corpusId": numeric_id(corpus_id, "corpus id")?,
                }],
            }]
        });

        let response: QueryResponse =
            send_json(SERVICE, self.post("query", self.search_timeout).json(&body)).await?;
        let snippets = response.into_snippets();
        debug!("Vectara returned {} snippets", snippets.len());
        Ok(snippets)
    }
}

#[derive(Debug, Deserialize)]
struct ListCorporaResponse {
    #[serde(default)]
    corpus: Vec<CorpusRecord>,
}

#[derive(Debug, Deserialize)]
struct CorpusRecord {
    id: u64,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCorpusResponse {
    corpus_id: Option<u64>,
    #[serde(default)]
    status: Status,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status: Status,
}

/// Vectara reports some failures as a 200 with a status code in the body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    code: Option<String>,
    status_detail: Option<String>,
}

impl Status {
    fn check(&self) -> Result<()> {
        match self.code.as_deref() {
            None | Some("OK") | Some("ALREADY_EXISTS") => Ok(()),
            Some(code) if code.contains("UNAUTH") || code.contains("PERMISSION") => {
                Err(AgentError::Auth { service: SERVICE })
            }
            Some(code) => Err(AgentError::Rejected {
                service: SERVICE,
                status: 200,
                detail: format!(
                    "{}: {}",
                    code,
                    self.status_detail.as_deref().unwrap_or_default()
                ),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexRequest<'a> {
    customer_id: u64,
    corpus_id: u64,
    document: IndexDocument<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexDocument<'a> {
    document_id: &'a str,
    title: &'a str,
    metadata_json: String,
    section: Vec<IndexSection<'a>>,
}

#[derive(Debug, Serialize)]
struct IndexSection<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    response_set: Vec<ResponseSet>,
}

#[derive(Debug, Deserialize)]
struct ResponseSet {
    #[serde(default)]
    response: Vec<QueryHit>,
    #[serde(default)]
    document: Vec<DocumentRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryHit {
    #[serde(default)]
    text: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Vec<MetadataPair>,
    document_index: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct DocumentRecord {
    id: String,
    #[serde(default)]
    metadata: Vec<MetadataPair>,
}

#[derive(Debug, Deserialize)]
struct MetadataPair {
    name: String,
    #[serde(default)]
    value: String,
}

impl QueryResponse {
    /// Snippets in rank order, each carrying its document's metadata.
    fn into_snippets(self) -> Vec<Snippet> {
        let Some(set) = self.response_set.into_iter().next() else {
            return Vec::new();
        };

        set.response
            .into_iter()
            .map(|hit| {
                let document = hit.document_index.and_then(|i| set.document.get(i));
                let mut metadata: BTreeMap<String, String> = document
                    .map(|d| {
                        d.metadata
                            .iter()
                            .map(|m| (m.name.clone(), m.value.clone()))
                            .collect()
                    })
                    .unwrap_or_default();
                metadata.extend(hit.metadata.into_iter().map(|m| (m.name, m.value)));

                Snippet {
                    text: hit.text,
                    score: hit.score,
                    document_id: document.map(|d| d.id.clone()),
                    metadata,
                }
            })
            .collect()
    }
}
