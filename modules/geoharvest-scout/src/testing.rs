// Test mocks for the harvest pipeline.
//
// One mock per trait boundary:
// - MockSource (SourceAdapter): descriptor name -> items or failure
// - MockExtractor (LocationExtractor): echoes adapter location hints
// - MockGeocoder (Geocoder): place name -> hit, with scripted failures
// - RecordingSink / FailingSink (ExportSink)
//
// Plus helpers for building raw items and source descriptors.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use geoharvest_common::{FeatureCollection, RawItem, SourceDescriptor, SourceKind};
use geoharvest_sources::{MalformedItem, SourceAdapter, SourceError, SourceItems};

use crate::pipeline::extractor::{ExtractError, Extraction, LocationExtractor};
use crate::pipeline::geo_cache::GeoCache;
use crate::pipeline::geocoder::{GeocodeError, GeocodeHit, Geocoder};
use crate::sinks::ExportSink;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Feed item whose only location signal is `hints`.
pub fn raw_item(url: &str, hints: &[&str]) -> RawItem {
    RawItem {
        source_url: url.to_string(),
        kind: SourceKind::Feed,
        source_label: "Test Feed".to_string(),
        title: Some(format!("Report {url}")),
        text: "Members gathered for the annual meeting.".to_string(),
        published_at: None,
        language: Some("en".to_string()),
        location_hints: hints.iter().map(|h| h.to_string()).collect(),
        image_url: None,
        author: None,
        category: None,
    }
}

pub fn feed_source(url: &str) -> SourceDescriptor {
    SourceDescriptor::Feed {
        url: url.to_string(),
        category: None,
        label: None,
    }
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

enum SourceResponse {
    Items { items: Vec<RawItem>, malformed: u32 },
    Unavailable(String),
}

/// Sources keyed by `SourceDescriptor::describe()`. Unregistered sources
/// yield no items.
#[derive(Default)]
pub struct MockSource {
    responses: HashMap<String, SourceResponse>,
    delay: Option<Duration>,
    fetches: AtomicU32,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_source(mut self, source: &SourceDescriptor, items: Vec<RawItem>) -> Self {
        self.responses
            .insert(source.describe(), SourceResponse::Items { items, malformed: 0 });
        self
    }

    /// Like `on_source`, plus `malformed` entries the adapter cannot normalize.
    pub fn with_malformed(mut self, source: &SourceDescriptor, items: Vec<RawItem>, malformed: u32) -> Self {
        self.responses
            .insert(source.describe(), SourceResponse::Items { items, malformed });
        self
    }

    pub fn unavailable(mut self, source: &SourceDescriptor, reason: &str) -> Self {
        self.responses
            .insert(source.describe(), SourceResponse::Unavailable(reason.to_string()));
        self
    }

    /// Every fetch sleeps this long first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for MockSource {
    async fn fetch(&self, source: &SourceDescriptor) -> geoharvest_sources::Result<SourceItems> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.responses.get(&source.describe()) {
            None => Ok(SourceItems::empty()),
            Some(SourceResponse::Unavailable(reason)) => Err(SourceError::Unavailable {
                attempts: 1,
                reason: reason.clone(),
            }),
            Some(SourceResponse::Items { items, malformed }) => {
                let bad = (0..*malformed).map(|i| Err(MalformedItem::new(format!("malformed #{i}"))));
                let entries: Vec<_> = items.iter().cloned().map(Ok).chain(bad).collect();
                Ok(SourceItems::new(entries.into_iter()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Returns each item's location hints as its locations, in order.
pub struct MockExtractor {
    failing_urls: HashSet<String>,
}

impl MockExtractor {
    pub fn hints() -> Self {
        Self {
            failing_urls: HashSet::new(),
        }
    }

    pub fn fail_on(mut self, url: &str) -> Self {
        self.failing_urls.insert(url.to_string());
        self
    }
}

impl LocationExtractor for MockExtractor {
    fn model(&self) -> &str {
        "mock"
    }

    fn extract(&self, item: &RawItem) -> Result<Extraction, ExtractError> {
        if self.failing_urls.contains(&item.source_url) {
            return Err(ExtractError::Failed(format!("scripted failure for {}", item.source_url)));
        }
        Ok(Extraction {
            locations: item.location_hints.clone(),
            entities: vec![],
            sentiment: None,
        })
    }
}

// ---------------------------------------------------------------------------
// MockGeocoder
// ---------------------------------------------------------------------------

/// Place-name geocoder. Unregistered names resolve to `Ok(None)`.
/// Builder pattern: `.on_place()`, `.fail_transiently()`, `.fail_permanently()`.
#[derive(Default)]
pub struct MockGeocoder {
    places: HashMap<String, GeocodeHit>,
    transient_failures: Mutex<HashMap<String, u32>>,
    permanent_failures: HashSet<String>,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl MockGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_place(mut self, name: &str, lat: f64, lng: f64) -> Self {
        self.places.insert(
            GeoCache::key(name),
            GeocodeHit {
                lat,
                lng,
                precision: geoharvest_common::GeoPrecision::City,
                confidence: Some(0.8),
                display_name: Some(name.to_string()),
            },
        );
        self
    }

    /// The first `times` lookups of `name` fail with a transient error.
    pub fn fail_transiently(self, name: &str, times: u32) -> Self {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(GeoCache::key(name), times);
        self
    }

    pub fn fail_permanently(mut self, name: &str) -> Self {
        self.permanent_failures.insert(GeoCache::key(name));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Total lookups across all names.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Geocoder for MockGeocoder {
    fn name(&self) -> &str {
        "mock"
    }

    async fn geocode(&self, query: &str) -> Result<Option<GeocodeHit>, GeocodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let key = GeoCache::key(query);
        if self.permanent_failures.contains(&key) {
            return Err(GeocodeError::Permanent(format!("HTTP 400 for {query}")));
        }
        {
            let mut failures = self.transient_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(GeocodeError::Transient(format!("HTTP 503 for {query}")));
                }
            }
        }
        Ok(self.places.get(&key).cloned())
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Remembers the size of every collection it was handed.
#[derive(Default)]
pub struct RecordingSink {
    exports: Mutex<Vec<usize>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exports(&self) -> Vec<usize> {
        self.exports.lock().unwrap().clone()
    }
}

impl ExportSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn export(&self, collection: &FeatureCollection) -> anyhow::Result<()> {
        self.exports.lock().unwrap().push(collection.len());
        Ok(())
    }
}

pub struct FailingSink;

impl ExportSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    fn export(&self, _collection: &FeatureCollection) -> anyhow::Result<()> {
        anyhow::bail!("disk full")
    }
}
