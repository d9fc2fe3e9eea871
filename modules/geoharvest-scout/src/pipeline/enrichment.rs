// RawItem -> Candidates.
//
// Items are processed on a bounded pool of concurrent workers. Every
// provider call goes through the shared rate limiter, a per-call timeout
// and the retry policy; a place that still fails after the last attempt is
// dropped and counted, never raised.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use geoharvest_common::{Candidate, GeoPoint, RateLimiter, RawItem, RetryPolicy};
use tracing::{debug, warn};
use typed_builder::TypedBuilder;

use super::extractor::LocationExtractor;
use super::geo_cache::GeoCache;
use super::geocoder::{GeocodeError, GeocodeHit, Geocoder};
use super::stats::RejectReason;

#[derive(TypedBuilder)]
pub struct Enricher {
    extractor: Arc<dyn LocationExtractor>,
    geocoder: Arc<dyn Geocoder>,
    #[builder(default = Arc::new(GeoCache::in_memory()))]
    cache: Arc<GeoCache>,
    #[builder(default = Arc::new(RateLimiter::unlimited()))]
    limiter: Arc<RateLimiter>,
    #[builder(default)]
    retry: RetryPolicy,
    #[builder(default = Duration::from_secs(10))]
    geocode_timeout: Duration,
    #[builder(default = 4)]
    workers: usize,
    #[builder(default = 1)]
    max_locations_per_item: usize,
}

/// Candidates plus everything that was dropped on the way.
#[derive(Debug, Default)]
pub struct EnrichmentOutcome {
    pub candidates: Vec<Candidate>,
    pub rejections: Vec<(RejectReason, String)>,
    pub geocode_calls: u32,
    pub cache_hits: u32,
}

impl EnrichmentOutcome {
    pub fn rejected(&self, reason: RejectReason) -> usize {
        self.rejections.iter().filter(|(r, _)| *r == reason).count()
    }
}

#[derive(Default)]
struct ItemOutcome {
    candidates: Vec<Candidate>,
    rejections: Vec<(RejectReason, String)>,
}

enum Lookup {
    Found(GeocodeHit),
    NotFound,
    Failed(GeocodeError),
}

impl Enricher {
    /// Enrich all items. Output order follows input order.
    pub async fn enrich_all(&self, items: Vec<RawItem>) -> EnrichmentOutcome {
        let calls = AtomicU32::new(0);
        let cache_hits = AtomicU32::new(0);

        let per_item: Vec<ItemOutcome> = stream::iter(items)
            .map(|item| self.enrich_item(item, &calls, &cache_hits))
            .buffered(self.workers.max(1))
            .collect()
            .await;

        let mut outcome = EnrichmentOutcome {
            geocode_calls: calls.load(Ordering::Relaxed),
            cache_hits: cache_hits.load(Ordering::Relaxed),
            ..Default::default()
        };
        for item in per_item {
            outcome.candidates.extend(item.candidates);
            outcome.rejections.extend(item.rejections);
        }
        outcome
    }

    async fn enrich_item(&self, item: RawItem, calls: &AtomicU32, cache_hits: &AtomicU32) -> ItemOutcome {
        let mut out = ItemOutcome::default();

        let extraction = match self.extractor.extract(&item) {
            Ok(e) => e,
            Err(e) => {
                warn!(url = item.source_url.as_str(), error = %e, "Extraction failed");
                out.rejections.push((RejectReason::ExtractFailed, item.source_url));
                return out;
            }
        };

        if extraction.locations.is_empty() {
            debug!(url = item.source_url.as_str(), "No location mentioned");
            out.rejections.push((RejectReason::NoLocation, item.source_url));
            return out;
        }

        let mut not_found = 0;
        for name in &extraction.locations {
            if out.candidates.len() >= self.max_locations_per_item.max(1) {
                break;
            }
            match self.lookup(name, calls, cache_hits).await {
                Lookup::Found(hit) => out.candidates.push(Candidate {
                    item: item.clone(),
                    location_name: name.clone(),
                    point: Some(GeoPoint {
                        lat: hit.lat,
                        lng: hit.lng,
                        precision: hit.precision,
                    }),
                    confidence: hit.confidence,
                    entities: extraction.entities.clone(),
                    sentiment: extraction.sentiment,
                }),
                Lookup::NotFound => not_found += 1,
                Lookup::Failed(e) => {
                    warn!(
                        url = item.source_url.as_str(),
                        location = name.as_str(),
                        error = %e,
                        "Geocoding failed, dropping candidate"
                    );
                    out.rejections
                        .push((RejectReason::GeocodeFailed, format!("{}: {name}", item.source_url)));
                }
            }
        }

        if out.candidates.is_empty() && out.rejections.is_empty() && not_found > 0 {
            out.rejections.push((RejectReason::NotGeocoded, item.source_url));
        }
        out
    }

    async fn lookup(&self, name: &str, calls: &AtomicU32, cache_hits: &AtomicU32) -> Lookup {
        if let Some(cached) = self.cache.get(name) {
            cache_hits.fetch_add(1, Ordering::Relaxed);
            return match cached {
                Some(hit) => Lookup::Found(hit),
                None => Lookup::NotFound,
            };
        }

        let result = self
            .retry
            .run("geocode", |_| async move {
                self.limiter.acquire().await;
                calls.fetch_add(1, Ordering::Relaxed);
                match tokio::time::timeout(self.geocode_timeout, self.geocoder.geocode(name)).await {
                    Ok(result) => result,
                    Err(_) => Err(GeocodeError::Transient(format!(
                        "{} timed out after {:?}",
                        self.geocoder.name(),
                        self.geocode_timeout
                    ))),
                }
            })
            .await;

        match result {
            Ok(outcome) => {
                self.cache.put(name, &outcome);
                match outcome {
                    Some(hit) => Lookup::Found(hit),
                    None => Lookup::NotFound,
                }
            }
            Err(e) => Lookup::Failed(e),
        }
    }
}
