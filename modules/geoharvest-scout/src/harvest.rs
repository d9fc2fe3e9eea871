// One harvest run, end to end.
//
// Fetch every source (isolated failures), enrich under a run deadline, build
// features, then walk the store through Loaded -> Merged -> Validated ->
// Committed. The deadline only covers network work; once Load starts the run
// finishes or fails on its own.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use geoharvest_common::{Feature, FeatureCollection, HarvestConfig, HarvestError, RateLimiter, RawItem};
use geoharvest_sources::{SourceAdapter, SourceSettings, Sources};
use geoharvest_store::{FileBackend, Loaded, RunState, StoreBackend};
use tracing::{error, info, warn};
use typed_builder::TypedBuilder;

use crate::pipeline::builder::FeatureBuilder;
use crate::pipeline::categorize::Categorizer;
use crate::pipeline::enrichment::{EnrichmentOutcome, Enricher};
use crate::pipeline::extractor::{extractor_from_config, LocationExtractor};
use crate::pipeline::geo_cache::GeoCache;
use crate::pipeline::geocoder::{geocoder_from_config, Geocoder};
use crate::pipeline::stats::{RejectReason, RunSummary};
use crate::sinks::{sinks_from_config, ExportSink};

/// Collaborators of a run. Production wiring lives in
/// [`Harvester::from_config`]; tests swap in mocks.
#[derive(Clone, TypedBuilder)]
pub struct HarvestDeps {
    pub sources: Arc<dyn SourceAdapter>,
    pub extractor: Arc<dyn LocationExtractor>,
    pub geocoder: Arc<dyn Geocoder>,
    pub store: Arc<dyn StoreBackend>,
    #[builder(default = Arc::new(GeoCache::in_memory()))]
    pub cache: Arc<GeoCache>,
    #[builder(default = Arc::new(RateLimiter::unlimited()))]
    pub limiter: Arc<RateLimiter>,
    #[builder(default)]
    pub sinks: Vec<Arc<dyn ExportSink>>,
}

pub struct Harvester {
    config: HarvestConfig,
    deps: HarvestDeps,
    enricher: Enricher,
    builder: FeatureBuilder,
}

impl Harvester {
    pub fn new(config: HarvestConfig, deps: HarvestDeps) -> Self {
        let enricher = Enricher::builder()
            .extractor(deps.extractor.clone())
            .geocoder(deps.geocoder.clone())
            .cache(deps.cache.clone())
            .limiter(deps.limiter.clone())
            .retry(config.retry.policy())
            .geocode_timeout(config.geocoding.timeout())
            .workers(config.enrichment.workers)
            .max_locations_per_item(config.enrichment.max_locations_per_item)
            .build();
        let builder = FeatureBuilder::new(
            config.identity.precision,
            config.enrichment.excerpt_chars,
            Categorizer::new(&config.categories),
        );
        Self {
            config,
            deps,
            enricher,
            builder,
        }
    }

    /// Wire the real adapters, providers and file store from config.
    pub fn from_config(config: HarvestConfig) -> anyhow::Result<Self> {
        let sources = Sources::new(SourceSettings {
            fetch_timeout: config.run.fetch_timeout(),
            max_age_days: config.run.max_age_days,
            user_agent: config.geocoding.user_agent.clone(),
            retry: config.retry.policy(),
        })?;
        let extractor = extractor_from_config(&config.nlp)?;
        let geocoder = geocoder_from_config(&config.geocoding)?;
        let cache = match &config.geocoding.cache_path {
            Some(path) => GeoCache::load(path),
            None => GeoCache::in_memory(),
        };
        let limiter = RateLimiter::new(config.geocoding.max_requests, config.geocoding.rate_window());

        let deps = HarvestDeps::builder()
            .sources(Arc::new(sources))
            .extractor(Arc::new(extractor))
            .geocoder(geocoder)
            .store(Arc::new(FileBackend::new(config.store.path.clone())))
            .cache(Arc::new(cache))
            .limiter(Arc::new(limiter))
            .sinks(sinks_from_config(&config.export))
            .build();
        Ok(Self::new(config, deps))
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Run once. A validation failure is reported in the summary
    /// (`RolledBack`), not as an error; errors are the fatal cases and
    /// always leave the store as it was.
    pub async fn run(&self, dry_run: bool) -> Result<RunSummary, HarvestError> {
        let mut summary = RunSummary::new(dry_run);
        info!(
            run_id = %summary.run_id,
            sources = self.config.sources.len(),
            dry_run,
            "Harvest run starting"
        );

        let deadline = self.config.run.timeout();
        let gathered = tokio::time::timeout(deadline, self.gather(&mut summary)).await;
        let outcome = match gathered {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(run_id = %summary.run_id, timeout = ?deadline, "Run deadline passed, discarding partial results");
                return Err(HarvestError::RunTimedOut(deadline));
            }
        };

        if let Err(e) = self.deps.cache.save() {
            warn!(error = %e, "Failed to save geocode cache");
        }

        summary.candidates = outcome.candidates.len() as u32;
        summary.geocode_calls = outcome.geocode_calls;
        summary.geocode_cache_hits = outcome.cache_hits;
        for (reason, _) in &outcome.rejections {
            summary.reject(*reason);
        }

        let features = self.build_features(outcome, &mut summary);

        let loaded = Loaded::load(self.deps.store.as_ref(), self.builder.precision())?;
        let merged = loaded.merge(features);
        let report = merged.report();
        summary.features_added = report.added as u32;
        summary.features_replaced = report.replaced as u32;
        summary.conflicts_resolved = report.conflicts() as u32;

        let validated = match merged.validate() {
            Ok(validated) => validated,
            Err(rolled_back) => {
                summary.violations = rolled_back.violations.len() as u32;
                summary.finish(RunState::RolledBack);
                error!(
                    run_id = %summary.run_id,
                    violations = summary.violations,
                    "Validation failed, store left unchanged"
                );
                return Ok(summary);
            }
        };
        summary.store_features = validated.features().len() as u32;

        if dry_run {
            summary.finish(RunState::Validated);
            info!(run_id = %summary.run_id, added = summary.features_added, "Dry run, skipping commit");
            return Ok(summary);
        }

        let committed = validated.commit(self.deps.store.as_ref(), Utc::now())?;
        summary.sinks_failed = self.run_sinks(committed.collection());
        summary.finish(RunState::Committed);

        info!(
            run_id = %summary.run_id,
            added = summary.features_added,
            replaced = summary.features_replaced,
            rejected = summary.total_rejected(),
            written = committed.written(),
            "Harvest run complete"
        );
        Ok(summary)
    }

    /// Load and validate the stored collection without changing it.
    /// Returns the number of stored features.
    pub fn check(&self) -> Result<usize, HarvestError> {
        let loaded = Loaded::load(self.deps.store.as_ref(), self.builder.precision())?;
        match loaded.merge(Vec::new()).validate() {
            Ok(validated) => Ok(validated.features().len()),
            Err(rolled_back) => Err(HarvestError::CorruptStore(
                rolled_back
                    .violations
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join("; "),
            )),
        }
    }

    /// Run every sink over the stored collection. Returns how many failed.
    pub fn export(&self) -> Result<u32, HarvestError> {
        let loaded = Loaded::load(self.deps.store.as_ref(), self.builder.precision())?;
        Ok(self.run_sinks(&loaded.into_collection()))
    }

    async fn gather(&self, summary: &mut RunSummary) -> EnrichmentOutcome {
        let items = self.fetch_sources(summary).await;
        self.enricher.enrich_all(items).await
    }

    async fn fetch_sources(&self, summary: &mut RunSummary) -> Vec<RawItem> {
        summary.sources_total = self.config.sources.len() as u32;

        let fetched: Vec<_> = stream::iter(&self.config.sources)
            .map(|source| async move { (source.describe(), self.deps.sources.fetch(source).await) })
            .buffered(self.config.run.source_workers.max(1))
            .collect()
            .await;

        let mut items = Vec::new();
        for (name, result) in fetched {
            match result {
                Ok(entries) => {
                    let (valid, malformed) = entries.collect_valid(&name);
                    info!(source = name.as_str(), items = valid.len(), malformed, "Fetched source");
                    summary.items_processed += valid.len() as u32 + malformed;
                    summary.reject_n(RejectReason::MalformedItem, malformed);
                    items.extend(valid);
                }
                Err(e) => {
                    let err = HarvestError::SourceUnavailable {
                        source_name: name,
                        reason: e.to_string(),
                    };
                    warn!(error = %err, "Skipping source for this run");
                    summary.sources_failed += 1;
                }
            }
        }
        items
    }

    fn build_features(
        &self,
        outcome: EnrichmentOutcome,
        summary: &mut RunSummary,
    ) -> Vec<Feature> {
        let extracted_at = Utc::now();
        let mut features = Vec::with_capacity(outcome.candidates.len());
        for candidate in &outcome.candidates {
            match self.builder.build(candidate, extracted_at) {
                Ok((_, feature)) => features.push(feature),
                Err(e) => {
                    let err = HarvestError::InvalidGeometry(e);
                    warn!(
                        url = candidate.item.source_url.as_str(),
                        location = candidate.location_name.as_str(),
                        error = %err,
                        "Rejecting candidate"
                    );
                    summary.reject(RejectReason::InvalidGeometry);
                }
            }
        }
        summary.features_built = features.len() as u32;
        features
    }

    fn run_sinks(&self, collection: &FeatureCollection) -> u32 {
        let mut failed = 0;
        for sink in &self.deps.sinks {
            match sink.export(collection) {
                Ok(()) => info!(sink = sink.name(), features = collection.len(), "Export complete"),
                Err(e) => {
                    failed += 1;
                    warn!(sink = sink.name(), error = %e, "Export failed");
                }
            }
        }
        failed
    }
}
