use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::identity::IdentityPrecision;
use crate::retry::RetryPolicy;
use crate::types::SourceDescriptor;

/// TOML-backed harvest configuration. Every section has defaults so a file
/// listing only `[[sources]]` is valid. Contact details for geocoding
/// providers may come from the environment instead of the file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HarvestConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub geocoding: GeocodingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub nlp: NlpConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub sources: Vec<SourceDescriptor>,
    #[serde(default)]
    pub categories: Vec<CategoryRule>,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/incidents.geojson")
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    /// Decimal places of coordinate rounding in identity keys.
    #[serde(default)]
    pub precision: IdentityPrecision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocoderProvider {
    Nominatim,
    Photon,
    /// Nominatim first, Photon when Nominatim has nothing.
    Hybrid,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeocodingConfig {
    #[serde(default = "default_provider")]
    pub provider: GeocoderProvider,
    #[serde(default = "default_nominatim_url")]
    pub nominatim_url: String,
    #[serde(default = "default_photon_url")]
    pub photon_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Requests allowed per `per_secs` window, across all workers.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_per_secs")]
    pub per_secs: u64,
    #[serde(default = "default_geocode_timeout")]
    pub timeout_secs: u64,
    /// JSON file caching resolved place names between runs.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            nominatim_url: default_nominatim_url(),
            photon_url: default_photon_url(),
            user_agent: default_user_agent(),
            max_requests: default_max_requests(),
            per_secs: default_per_secs(),
            timeout_secs: default_geocode_timeout(),
            cache_path: None,
        }
    }
}

impl GeocodingConfig {
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.per_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_provider() -> GeocoderProvider {
    GeocoderProvider::Hybrid
}

fn default_nominatim_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_photon_url() -> String {
    "https://photon.komoot.io".to_string()
}

fn default_user_agent() -> String {
    concat!("geoharvest/", env!("CARGO_PKG_VERSION")).to_string()
}

// Nominatim usage policy: one request per second.
fn default_max_requests() -> u32 {
    1
}

fn default_per_secs() -> u64 {
    1
}

fn default_geocode_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnrichmentConfig {
    /// Concurrent items in NLP + geocoding. The rate limiter still caps
    /// provider traffic; workers only overlap waiting.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_locations")]
    pub max_locations_per_item: usize,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_locations_per_item: default_max_locations(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_max_locations() -> usize {
    1
}

fn default_excerpt_chars() -> usize {
    280
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NlpConfig {
    /// Extractor model name. `pattern` is the built-in prepositional matcher.
    #[serde(default = "default_model")]
    pub model: String,
    /// Words that introduce a place name ("in Madrid", "at Lyon").
    #[serde(default = "default_prepositions")]
    pub prepositions: Vec<String>,
}

impl Default for NlpConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            prepositions: default_prepositions(),
        }
    }
}

fn default_model() -> String {
    "pattern".to_string()
}

fn default_prepositions() -> Vec<String> {
    ["in", "at", "near", "en", "à", "bei"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Whole-run deadline for fetching and enrichment.
    #[serde(default = "default_run_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_source_workers")]
    pub source_workers: usize,
    /// Feed entries older than this are ignored.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_run_timeout(),
            fetch_timeout_secs: default_fetch_timeout(),
            source_workers: default_source_workers(),
            max_age_days: default_max_age_days(),
        }
    }
}

impl RunConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn default_run_timeout() -> u64 {
    30 * 60
}

fn default_fetch_timeout() -> u64 {
    15
}

fn default_source_workers() -> usize {
    8
}

fn default_max_age_days() -> i64 {
    30
}

/// Keyword rule assigning a category to reports whose title or text mentions
/// any of `keywords` (case-insensitive). Rules are tried in file order.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoryRule {
    pub name: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportConfig {
    #[serde(default)]
    pub citations_path: Option<PathBuf>,
    #[serde(default)]
    pub records_path: Option<PathBuf>,
}

impl HarvestConfig {
    /// Load a TOML config file, apply environment overrides, and validate.
    pub fn load(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(path) = env::var("GEOHARVEST_STORE_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Ok(agent) = env::var("GEOHARVEST_USER_AGENT") {
            self.geocoding.user_agent = agent;
        }
        if let Ok(secs) = env::var("GEOHARVEST_RUN_TIMEOUT_SECS") {
            self.run.timeout_secs = secs
                .parse()
                .context("GEOHARVEST_RUN_TIMEOUT_SECS must be a number of seconds")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.enrichment.workers == 0 {
            bail!("enrichment.workers must be at least 1");
        }
        if self.enrichment.max_locations_per_item == 0 {
            bail!("enrichment.max_locations_per_item must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.geocoding.max_requests == 0 {
            bail!("geocoding.max_requests must be at least 1");
        }
        if self.geocoding.per_secs == 0 {
            bail!("geocoding.per_secs must be at least 1");
        }
        if self.geocoding.timeout_secs == 0 || self.run.timeout_secs == 0 || self.run.fetch_timeout_secs == 0 {
            bail!("timeouts must be positive");
        }
        if self.run.source_workers == 0 {
            bail!("run.source_workers must be at least 1");
        }
        if self.nlp.model != "pattern" {
            bail!("unknown nlp.model '{}' (available: pattern)", self.nlp.model);
        }
        for rule in &self.categories {
            if rule.name.trim().is_empty() || rule.keywords.is_empty() {
                bail!("category rules need a name and at least one keyword");
            }
        }
        Ok(())
    }

    pub fn log_summary(&self) {
        tracing::info!(
            store = %self.store.path.display(),
            precision = self.identity.precision.decimals(),
            provider = ?self.geocoding.provider,
            max_requests = self.geocoding.max_requests,
            per_secs = self.geocoding.per_secs,
            max_attempts = self.retry.max_attempts,
            workers = self.enrichment.workers,
            run_timeout_secs = self.run.timeout_secs,
            sources = self.sources.len(),
            "Config loaded"
        );
    }
}
