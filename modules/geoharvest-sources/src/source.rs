use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use geoharvest_common::{RawItem, RetryPolicy, SourceDescriptor};
use tracing::{info, warn};

use crate::error::{Result, SourceError};
use crate::services::feed::FeedService;
use crate::services::wikipedia::WikipediaService;

/// An entry the adapter could not turn into a `RawItem` (no link, no title).
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedItem {
    pub reason: String,
}

impl MalformedItem {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Lazy, finite sequence of normalized items from one source. Conversion of
/// each raw entry happens as the iterator is advanced.
pub struct SourceItems {
    inner: Box<dyn Iterator<Item = std::result::Result<RawItem, MalformedItem>> + Send>,
}

impl SourceItems {
    pub fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = std::result::Result<RawItem, MalformedItem>> + Send + 'static,
    {
        Self {
            inner: Box::new(iter),
        }
    }

    pub fn from_items(items: Vec<RawItem>) -> Self {
        Self::new(items.into_iter().map(Ok))
    }

    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Drain into well-formed items, counting the malformed ones.
    pub fn collect_valid(self, source_name: &str) -> (Vec<RawItem>, u32) {
        let mut items = Vec::new();
        let mut skipped = 0;
        for entry in self {
            match entry {
                Ok(item) => items.push(item),
                Err(bad) => {
                    skipped += 1;
                    warn!(source = source_name, reason = bad.reason.as_str(), "Skipping malformed item");
                }
            }
        }
        (items, skipped)
    }
}

impl Iterator for SourceItems {
    type Item = std::result::Result<RawItem, MalformedItem>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// Anything that can turn a source descriptor into raw items.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch one source. Transient failures are retried internally; the
    /// error returned after the policy is exhausted is always
    /// `SourceError::Unavailable`.
    async fn fetch(&self, source: &SourceDescriptor) -> Result<SourceItems>;
}

/// Settings shared by the built-in adapters.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub fetch_timeout: Duration,
    pub max_age_days: i64,
    pub user_agent: String,
    pub retry: RetryPolicy,
}

/// Dispatches descriptors to the feed or Wikipedia service.
pub struct Sources {
    feed: FeedService,
    wikipedia: WikipediaService,
    retry: RetryPolicy,
}

impl Sources {
    pub fn new(settings: SourceSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.fetch_timeout)
            .user_agent(settings.user_agent.clone())
            .build()
            .map_err(|e| SourceError::Network(format!("failed to build HTTP client: {e}")))?;

        info!(
            fetch_timeout_secs = settings.fetch_timeout.as_secs(),
            max_attempts = settings.retry.max_attempts,
            "Source adapters ready"
        );

        Ok(Self {
            feed: FeedService::new(client.clone(), settings.fetch_timeout, settings.max_age_days),
            wikipedia: WikipediaService::new(client, settings.fetch_timeout),
            retry: settings.retry,
        })
    }
}

#[async_trait]
impl SourceAdapter for Sources {
    async fn fetch(&self, source: &SourceDescriptor) -> Result<SourceItems> {
        let attempts = AtomicU32::new(0);
        let result = match source {
            SourceDescriptor::Feed { url, category, label } => {
                self.retry
                    .run("feed_fetch", |_| {
                        attempts.fetch_add(1, Ordering::Relaxed);
                        self.feed.fetch(url, category.as_deref(), label.as_deref())
                    })
                    .await
            }
            SourceDescriptor::Wikipedia {
                query,
                lang,
                max_pages,
                category,
            } => {
                self.wikipedia
                    .search(query, lang, *max_pages, category.as_deref(), &self.retry, &attempts)
                    .await
            }
        };

        result.map_err(|e| match e {
            SourceError::Unavailable { .. } => e,
            other => SourceError::Unavailable {
                attempts: attempts.load(Ordering::Relaxed),
                reason: other.to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoharvest_common::SourceKind;

    fn item(url: &str) -> RawItem {
        RawItem {
            source_url: url.to_string(),
            kind: SourceKind::Feed,
            source_label: "test".into(),
            title: None,
            text: String::new(),
            published_at: None,
            language: None,
            location_hints: vec![],
            image_url: None,
            author: None,
            category: None,
        }
    }

    #[test]
    fn collect_valid_counts_malformed() {
        let items = SourceItems::new(
            vec![
                Ok(item("https://a")),
                Err(MalformedItem::new("no link")),
                Ok(item("https://b")),
            ]
            .into_iter(),
        );
        let (valid, skipped) = items.collect_valid("test");
        assert_eq!(valid.len(), 2);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn empty_items() {
        let (valid, skipped) = SourceItems::empty().collect_valid("test");
        assert!(valid.is_empty());
        assert_eq!(skipped, 0);
    }
}
