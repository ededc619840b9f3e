//! arXiv Atom API client

use crate::http::send_bytes;
use crate::traits::PaperSource;
use crate::{AgentError, Result, Settings};
use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use reqwest::Client;
use rover_core::{normalize_arxiv_id, PaperInfo};
use std::time::Duration;
use tracing::{debug, info, instrument};

const SERVICE: &str = "arXiv";
const ERROR_ENTRY_MARKER: &str = "/api/errors";

#[derive(Clone)]
pub struct ArxivClient {
    client: Client,
    base_url: String,
    search_timeout: Duration,
    fetch_timeout: Duration,
}

impl ArxivClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            search_timeout: Duration::from_secs(8),
            fetch_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.arxiv_base_url)
            .with_timeouts(settings.search_timeout, settings.fetch_timeout)
    }

    pub fn with_timeouts(mut self, search: Duration, fetch: Duration) -> Self {
        self.search_timeout = search;
        self.fetch_timeout = fetch;
        self
    }

    async fn query_feed(&self, params: &[(&str, String)]) -> Result<Vec<PaperInfo>> {
        let body = send_bytes(
            SERVICE,
            self.client
                .get(format!("{}/query", self.base_url))
                .query(params)
                .timeout(self.search_timeout),
        )
        .await?;
        parse_feed(&body)
    }

    async fn search_with(&self, search_query: String, max_results: usize) -> Result<Vec<PaperInfo>> {
        self.query_feed(&[
            ("search_query", search_query),
            ("start", "0".to_string()),
            ("max_results", max_results.to_string()),
            ("sortBy", "relevance".to_string()),
        ])
        .await
    }
}

#[async_trait]
impl PaperSource for ArxivClient {
    #[instrument(skip(self))]
    async fn fetch(&self, arxiv_id: &str) -> Result<Option<PaperInfo>> {
        let wanted = normalize_arxiv_id(arxiv_id);
        let papers = self
            .query_feed(&[("id_list", wanted.clone()), ("max_results", "1".to_string())])
            .await?;
        Ok(papers.into_iter().find(|p| p.arxiv_id == wanted))
    }

    #[instrument(skip(self))]
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<PaperInfo>> {
        let phrase = query.replace('"', " ");
        let phrase = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
        if phrase.is_empty() {
            return Ok(Vec::new());
        }

        let papers = self
            .search_with(format!("ti:\"{}\"", phrase), max_results)
            .await?;
        if !papers.is_empty() {
            info!("Found {} papers by title", papers.len());
            return Ok(papers);
        }

        let terms = phrase
            .split(' ')
            .map(|term| format!("all:{}", term))
            .collect::<Vec<_>>()
            .join(" AND ");
        let papers = self.search_with(terms, max_results).await?;
        info!("Found {} papers by keyword", papers.len());
        Ok(papers)
    }

    #[instrument(skip(self))]
    async fn download_pdf(&self, pdf_url: &str) -> Result<Vec<u8>> {
        let bytes = send_bytes(
            SERVICE,
            self.client.get(pdf_url).timeout(self.fetch_timeout),
        )
        .await?;
        if !bytes.starts_with(b"%PDF") {
            return Err(AgentError::MalformedResponse {
                service: SERVICE,
                detail: format!("{} did not return a PDF", pdf_url),
            });
        }
        debug!("Downloaded {} bytes", bytes.len());
        Ok(bytes)
    }
}

/// Fields of one `<entry>` as they are read
#[derive(Default)]
struct EntryFields {
    id: String,
    title: String,
    summary: String,
    published: String,
    authors: Vec<String>,
    pdf_url: Option<String>,
    primary_category: Option<String>,
}

impl EntryFields {
    fn into_paper(self) -> Option<PaperInfo> {
        let id = self.id.trim();
        if id.is_empty() || id.contains(ERROR_ENTRY_MARKER) {
            return None;
        }
        let raw_id = id
            .split_once("/abs/")
            .map(|(_, rest)| rest)
            .unwrap_or(id);

        let mut paper = PaperInfo::new(raw_id, collapse_whitespace(&self.title))
            .with_authors(self.authors)
            .with_summary(collapse_whitespace(&self.summary));
        if let Some(url) = self.pdf_url {
            paper = paper.with_pdf_url(url);
        }
        if !self.published.trim().is_empty() {
            paper = paper.with_published(self.published.trim());
        }
        if let Some(category) = self.primary_category {
            paper = paper.with_primary_category(category);
        }
        Some(paper)
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    None,
    Id,
    Title,
    Summary,
    Published,
    AuthorName,
}

/// Parse an arXiv Atom feed into papers, skipping error entries.
pub fn parse_feed(xml: &[u8]) -> Result<Vec<PaperInfo>> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut papers = Vec::new();
    let mut entry: Option<EntryFields> = None;
    let mut in_author = false;
    let mut field = Field::None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| AgentError::MalformedResponse {
                service: SERVICE,
                detail: e.to_string(),
            })?;

        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"entry" => entry = Some(EntryFields::default()),
                b"author" => in_author = true,
                b"id" => field = Field::Id,
                b"title" => field = Field::Title,
                b"summary" => field = Field::Summary,
                b"published" => field = Field::Published,
                b"name" if in_author => field = Field::AuthorName,
                _ => {
                    if let Some(current) = entry.as_mut() {
                        read_link_or_category(&e, current);
                    }
                }
            },
            Event::Empty(e) => {
                if let Some(current) = entry.as_mut() {
                    read_link_or_category(&e, current);
                }
            }
            Event::Text(text) => {
                let Some(current) = entry.as_mut() else {
                    continue;
                };
                let text = text.unescape().map_err(|e| AgentError::MalformedResponse {
                    service: SERVICE,
                    detail: e.to_string(),
                })?;
                match field {
                    Field::Id => current.id.push_str(&text),
                    Field::Title => current.title.push_str(&text),
                    Field::Summary => current.summary.push_str(&text),
                    Field::Published => current.published.push_str(&text),
                    Field::AuthorName => current.authors.push(collapse_whitespace(&text)),
                    Field::None => {}
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"entry" => {
                    if let Some(paper) = entry.take().and_then(EntryFields::into_paper) {
                        papers.push(paper);
                    }
                    field = Field::None;
                }
                b"author" => in_author = false,
                _ => field = Field::None,
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(papers)
}

fn read_link_or_category(element: &BytesStart<'_>, entry: &mut EntryFields) {
    match element.local_name().as_ref() {
        b"link" => {
            let mut href = None;
            let mut is_pdf = false;
            for attr in element.attributes().flatten() {
                let value = String::from_utf8_lossy(&attr.value).into_owned();
                match attr.key.local_name().as_ref() {
                    b"href" => href = Some(value),
                    b"title" => is_pdf = value == "pdf",
                    _ => {}
                }
            }
            if is_pdf {
                entry.pdf_url = href;
            }
        }
        b"primary_category" => {
            entry.primary_category = element
                .attributes()
                .flatten()
                .find(|attr| attr.key.local_name().as_ref() == b"term")
                .map(|attr| String::from_utf8_lossy(&attr.value).into_owned());
        }
        _ => {}
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
