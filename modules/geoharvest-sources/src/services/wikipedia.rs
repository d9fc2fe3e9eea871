// Wikipedia full-text search adapter.
// Pages through the MediaWiki search API with sroffset continuation. The
// page title is the strongest location hint a Wikipedia hit carries.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use geoharvest_common::{RateLimiter, RawItem, RetryPolicy, SourceKind};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Result, SourceError};
use crate::source::SourceItems;
use crate::text::strip_html;

/// Results per API page (the API maximum for anonymous clients).
const PAGE_SIZE: u32 = 50;
/// Anonymous clients are asked to stay under this many requests per minute.
const REQUESTS_PER_MINUTE: u32 = 50;

pub(crate) struct WikipediaService {
    client: reqwest::Client,
    timeout: Duration,
    limiter: RateLimiter,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(rename = "continue")]
    pub continuation: Option<Continuation>,
    pub query: Option<SearchQuery>,
}

#[derive(Debug, Deserialize)]
pub struct Continuation {
    pub sroffset: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
pub struct SearchHit {
    pub pageid: u64,
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl WikipediaService {
    pub(crate) fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            limiter: RateLimiter::new(REQUESTS_PER_MINUTE, Duration::from_secs(60)),
        }
    }

    /// Search `lang`.wikipedia.org for the quoted query, following
    /// continuation up to `max_pages`. A failure on the first page makes the
    /// source unavailable; a later failure keeps what was already collected.
    pub(crate) async fn search(
        &self,
        query: &str,
        lang: &str,
        max_pages: u32,
        category: Option<&str>,
        retry: &RetryPolicy,
        attempts: &AtomicU32,
    ) -> Result<SourceItems> {
        let endpoint = format!("https://{lang}.wikipedia.org/w/api.php");
        let endpoint = endpoint.as_str();

        let hits = collect_pages(max_pages, move |offset| {
            retry.run("wikipedia_search", move |_| {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.fetch_page(endpoint, query, offset)
            })
        })
        .await?;

        info!(query, lang, hits = hits.len(), "wikipedia: search complete");
        Ok(hits_to_items(hits, lang, category))
    }

    async fn fetch_page(&self, endpoint: &str, query: &str, offset: u32) -> Result<SearchResponse> {
        self.limiter.acquire().await;

        let quoted = format!("\"{query}\"");
        let limit = PAGE_SIZE.to_string();
        let offset = offset.to_string();
        let resp = self
            .client
            .get(endpoint)
            .query(&[
                ("action", "query"),
                ("list", "search"),
                ("format", "json"),
                ("srsearch", quoted.as_str()),
                ("srlimit", limit.as_str()),
                ("srprop", "snippet|timestamp"),
                ("sroffset", offset.as_str()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SourceError::from_reqwest(e, self.timeout))?;

        resp.json::<SearchResponse>()
            .await
            .map_err(|e| SourceError::Parse(format!("wikipedia response: {e}")))
    }
}

/// Follow `sroffset` continuation for at most `max_pages` pages. A failed
/// first page is an error; a later failure keeps the hits gathered so far.
async fn collect_pages<F, Fut>(max_pages: u32, mut fetch: F) -> Result<Vec<SearchHit>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<SearchResponse>>,
{
    let mut hits = Vec::new();
    let mut offset: u32 = 0;

    for page in 0..max_pages.max(1) {
        let response = match fetch(offset).await {
            Ok(r) => r,
            Err(e) if page == 0 => return Err(e),
            Err(e) => {
                warn!(page, offset, error = %e, "wikipedia: later page failed, keeping partial results");
                break;
            }
        };

        let next = response.continuation.and_then(|c| c.sroffset);
        hits.extend(response.query.map(|q| q.search).unwrap_or_default());

        match next {
            Some(n) if n > offset => offset = n,
            _ => break,
        }
    }
    Ok(hits)
}

/// Convert search hits into items. Every hit has a page id, so none are
/// malformed.
pub fn hits_to_items(hits: Vec<SearchHit>, lang: &str, category: Option<&str>) -> SourceItems {
    let lang = lang.to_string();
    let category = category.map(str::to_string);
    SourceItems::new(hits.into_iter().map(move |hit| {
        Ok(RawItem {
            source_url: format!("https://{lang}.wikipedia.org/?curid={}", hit.pageid),
            kind: SourceKind::Wikipedia,
            source_label: format!("{lang}.wikipedia.org"),
            title: Some(hit.title.clone()),
            text: strip_html(&hit.snippet),
            published_at: hit.timestamp,
            language: Some(lang.clone()),
            location_hints: vec![hit.title],
            image_url: None,
            author: None,
            category: category.clone(),
        })
    }))
}

#[cfg(test)]
mod tests {
    use std::future::ready;

    use super::*;

    fn hit(pageid: u64, title: &str) -> SearchHit {
        SearchHit {
            pageid,
            title: title.to_string(),
            snippet: String::new(),
            timestamp: None,
        }
    }

    fn page(hits: Vec<SearchHit>, next: Option<u32>) -> Result<SearchResponse> {
        Ok(SearchResponse {
            continuation: next.map(|n| Continuation { sroffset: Some(n) }),
            query: Some(SearchQuery { search: hits }),
        })
    }

    fn titles(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.title.as_str()).collect()
    }

    #[tokio::test]
    async fn pagination_stops_at_last_page() {
        let mut pages = vec![
            page(vec![hit(1, "Toledo"), hit(2, "Lyon")], Some(50)),
            page(vec![hit(3, "Porto")], None),
        ]
        .into_iter();
        let mut offsets = Vec::new();

        let hits = collect_pages(10, |offset| {
            offsets.push(offset);
            ready(pages.next().unwrap_or_else(|| Err(SourceError::Parse("no more pages".into()))))
        })
        .await
        .unwrap();

        assert_eq!(titles(&hits), vec!["Toledo", "Lyon", "Porto"]);
        assert_eq!(offsets, vec![0, 50]);
    }

    #[tokio::test]
    async fn pagination_respects_page_cap() {
        let mut offsets = Vec::new();

        let hits = collect_pages(2, |offset| {
            offsets.push(offset);
            ready(page(vec![hit(u64::from(offset), "Lisbon")], Some(offset + 50)))
        })
        .await
        .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(offsets, vec![0, 50]);
    }

    #[tokio::test]
    async fn later_page_failure_keeps_earlier_hits() {
        let mut pages = vec![
            page(vec![hit(1, "Toledo")], Some(50)),
            Err(SourceError::Parse("truncated body".into())),
        ]
        .into_iter();

        let hits = collect_pages(5, |_| ready(pages.next().unwrap_or_else(|| page(vec![], None))))
            .await
            .unwrap();

        assert_eq!(titles(&hits), vec!["Toledo"]);
    }

    #[tokio::test]
    async fn first_page_failure_is_an_error() {
        let result = collect_pages(5, |_| ready(Err(SourceError::Parse("bad json".into())))).await;
        assert!(result.is_err());
    }

    const RESPONSE: &str = r#"{
        "batchcomplete": "",
        "continue": {"sroffset": 50, "continue": "-||"},
        "query": {
            "searchinfo": {"totalhits": 120},
            "search": [
                {
                    "ns": 0,
                    "title": "Lisbon",
                    "pageid": 18091,
                    "snippet": "capital of <span class=\"searchmatch\">Portugal</span> &amp; largest city",
                    "timestamp": "2024-04-30T12:00:00Z"
                }
            ]
        }
    }"#;

    #[test]
    fn parses_search_response() {
        let response: SearchResponse = serde_json::from_str(RESPONSE).unwrap();
        assert_eq!(response.continuation.unwrap().sroffset, Some(50));
        let hits = response.query.unwrap().search;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pageid, 18091);
    }

    #[test]
    fn final_page_has_no_continuation() {
        let response: SearchResponse =
            serde_json::from_str(r#"{"query": {"search": []}}"#).unwrap();
        assert!(response.continuation.is_none());
        assert!(response.query.unwrap().search.is_empty());
    }

    #[test]
    fn hits_become_items_with_title_hint() {
        let response: SearchResponse = serde_json::from_str(RESPONSE).unwrap();
        let items: Vec<_> = hits_to_items(response.query.unwrap().search, "pt", Some("history"))
            .map(|r| r.unwrap())
            .collect();

        let item = &items[0];
        assert_eq!(item.source_url, "https://pt.wikipedia.org/?curid=18091");
        assert_eq!(item.kind, SourceKind::Wikipedia);
        assert_eq!(item.title.as_deref(), Some("Lisbon"));
        assert_eq!(item.text, "capital of Portugal & largest city");
        assert_eq!(item.location_hints, vec!["Lisbon".to_string()]);
        assert_eq!(item.language.as_deref(), Some("pt"));
        assert_eq!(item.category.as_deref(), Some("history"));
        assert!(item.published_at.is_some());
    }
}
