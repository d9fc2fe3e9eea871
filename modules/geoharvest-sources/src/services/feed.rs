// RSS/Atom feed service.
// Returns lazily converted RawItems; entries without a usable link are
// surfaced as malformed, entries older than the recency window are dropped.

use std::time::Duration;

use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use geoharvest_common::{RawItem, SourceKind};
use tracing::info;

use crate::error::{Result, SourceError};
use crate::source::{MalformedItem, SourceItems};
use crate::text::strip_html;

pub(crate) struct FeedService {
    client: reqwest::Client,
    timeout: Duration,
    max_age_days: i64,
}

impl FeedService {
    pub(crate) fn new(client: reqwest::Client, timeout: Duration, max_age_days: i64) -> Self {
        Self {
            client,
            timeout,
            max_age_days,
        }
    }

    /// Fetch and parse an RSS/Atom/JSON feed.
    pub(crate) async fn fetch(
        &self,
        feed_url: &str,
        category: Option<&str>,
        label: Option<&str>,
    ) -> Result<SourceItems> {
        let resp = self
            .client
            .get(feed_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SourceError::from_reqwest(e, self.timeout))?;

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SourceError::from_reqwest(e, self.timeout))?;

        let cutoff = Utc::now() - chrono::Duration::days(self.max_age_days);
        let items = parse_feed(&bytes, feed_url, category, label, cutoff)?;
        Ok(items)
    }
}

/// Parse feed bytes into lazily converted items. Entries published before
/// `cutoff` are skipped silently.
pub fn parse_feed(
    bytes: &[u8],
    feed_url: &str,
    category: Option<&str>,
    label: Option<&str>,
    cutoff: DateTime<Utc>,
) -> Result<SourceItems> {
    let feed = feed_rs::parser::parse(bytes)
        .map_err(|e| SourceError::Parse(format!("{feed_url}: {e}")))?;

    let source_label = label
        .map(str::to_string)
        .or_else(|| feed.title.as_ref().map(|t| t.content.trim().to_string()))
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| feed_url.to_string());
    let language = feed.language.clone();
    let category = category.map(str::to_string);

    info!(feed_url, entries = feed.entries.len(), "feed: parsed successfully");

    let iter = feed.entries.into_iter().filter_map(move |entry| {
        let published = entry.published.or(entry.updated);
        if matches!(published, Some(date) if date < cutoff) {
            return None;
        }
        Some(entry_to_item(
            entry,
            &source_label,
            language.as_deref(),
            category.as_deref(),
        ))
    });

    Ok(SourceItems::new(iter))
}

fn entry_to_item(
    entry: Entry,
    source_label: &str,
    feed_language: Option<&str>,
    category: Option<&str>,
) -> std::result::Result<RawItem, MalformedItem> {
    let link = entry
        .links
        .first()
        .map(|l| l.href.clone())
        .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()))
        .ok_or_else(|| MalformedItem::new(format!("entry {} has no link", entry.id)))?;
    let source_url = unwrap_redirect(&link);

    let title = entry
        .title
        .as_ref()
        .map(|t| strip_html(&t.content))
        .filter(|t| !t.is_empty());

    let body = entry
        .summary
        .as_ref()
        .map(|s| s.content.clone())
        .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
        .unwrap_or_default();
    let text = strip_html(&body);

    if title.is_none() && text.is_empty() {
        return Err(MalformedItem::new(format!("entry {source_url} has no title or text")));
    }

    let author = entry
        .authors
        .iter()
        .map(|p| p.name.trim())
        .find(|n| !n.is_empty())
        .map(str::to_string);

    let mut location_hints: Vec<String> = Vec::new();
    if let Some(author) = &author {
        location_hints.push(author.clone());
    }
    for cat in &entry.categories {
        let term = cat.label.as_deref().unwrap_or(&cat.term).trim();
        if !term.is_empty() {
            location_hints.push(term.to_string());
        }
    }

    let image_url = entry.media.iter().find_map(|m| {
        m.content
            .iter()
            .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
            .or_else(|| m.thumbnails.first().map(|t| t.image.uri.clone()))
    });

    Ok(RawItem {
        source_url,
        kind: SourceKind::Feed,
        source_label: source_label.to_string(),
        title,
        text,
        published_at: entry.published.or(entry.updated),
        language: entry
            .language
            .clone()
            .or_else(|| feed_language.map(str::to_string)),
        location_hints,
        image_url,
        author,
        category: category.map(str::to_string),
    })
}

/// Google Alerts wraps every link in `https://www.google.com/url?...&url=<target>`.
/// Return the target so identity keys point at the article, not the redirect.
pub fn unwrap_redirect(link: &str) -> String {
    let Ok(parsed) = url::Url::parse(link) else {
        return link.to_string();
    };
    let is_google = parsed
        .host_str()
        .map(|h| h == "google.com" || h.ends_with(".google.com"))
        .unwrap_or(false);
    if is_google && parsed.path() == "/url" {
        if let Some((_, target)) = parsed.query_pairs().find(|(k, _)| k == "url" || k == "q") {
            if target.starts_with("http") {
                return target.into_owned();
            }
        }
    }
    link.to_string()
}
