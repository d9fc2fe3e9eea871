//! Run state machine for the collection.
//!
//! Each state is its own type, so a collection can only be committed after
//! it was merged and validated:
//!
//! ```text
//! Loaded --merge--> Merged --validate--> Validated --commit--> Committed
//!                                   \--> RolledBack
//! ```
//!
//! Nothing touches the backend between `load` and `commit`. A run that stops
//! anywhere before `commit` leaves the stored bytes exactly as they were.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use geoharvest_common::{
    CollectionMetadata, Feature, FeatureCollection, GeometryError, IdentityKey, IdentityPrecision,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::backend::StoreBackend;
use crate::error::{Result, StoreError};
use crate::merge::{merge, MergeReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Loaded,
    Merged,
    Validated,
    RolledBack,
    Committed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Loaded => "loaded",
            RunState::Merged => "merged",
            RunState::Validated => "validated",
            RunState::RolledBack => "rolled_back",
            RunState::Committed => "committed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reason the merged collection may not be written.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Violation {
    #[error("duplicate identity key {0}")]
    DuplicateKey(IdentityKey),

    #[error("feature {index} has invalid geometry: {error}")]
    InvalidGeometry { index: usize, error: GeometryError },

    #[error("previously stored key {0} is missing")]
    MissingPrevious(IdentityKey),
}

// --- Loaded ---

/// The collection as read from the backend, plus the key set every later
/// state must preserve.
#[derive(Debug)]
pub struct Loaded {
    collection: FeatureCollection,
    previous_keys: HashSet<IdentityKey>,
    precision: IdentityPrecision,
    existed: bool,
}

impl Loaded {
    /// Read and check the stored collection. An absent store loads as empty;
    /// anything unreadable, unparseable or internally inconsistent is an
    /// error and the bytes are left alone.
    pub fn load(backend: &dyn StoreBackend, precision: IdentityPrecision) -> Result<Self> {
        let Some(bytes) = backend.read()? else {
            info!(store = %backend.describe(), "No store yet, starting empty");
            return Ok(Self {
                collection: FeatureCollection::new(Vec::new()),
                previous_keys: HashSet::new(),
                precision,
                existed: false,
            });
        };

        let collection = decode(&bytes, precision)?;
        let previous_keys = collection
            .features
            .iter()
            .map(|f| f.identity_key(precision))
            .collect();

        info!(
            store = %backend.describe(),
            features = collection.len(),
            precision = precision.decimals(),
            "Loaded store"
        );

        Ok(Self {
            collection,
            previous_keys,
            precision,
            existed: true,
        })
    }

    pub fn features(&self) -> &[Feature] {
        &self.collection.features
    }

    pub fn len(&self) -> usize {
        self.collection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.is_empty()
    }

    pub fn existed(&self) -> bool {
        self.existed
    }

    pub fn into_collection(self) -> FeatureCollection {
        self.collection
    }

    /// Fold a batch into the loaded features. Pure; see [`crate::merge`].
    pub fn merge(self, batch: Vec<Feature>) -> Merged {
        let batch_len = batch.len();
        let previous_metadata = self.collection.metadata.clone();
        let (features, report) = merge(self.collection.features, batch, self.precision);

        info!(
            batch = batch_len,
            added = report.added,
            replaced = report.replaced,
            conflicts = report.conflicts(),
            "Merged batch"
        );

        Merged {
            features,
            previous_metadata,
            previous_keys: self.previous_keys,
            precision: self.precision,
            existed: self.existed,
            report,
        }
    }
}

/// Parse stored bytes and check the invariants a committed collection
/// always satisfies.
fn decode(bytes: &[u8], precision: IdentityPrecision) -> Result<FeatureCollection> {
    let collection: FeatureCollection = serde_json::from_slice(bytes)
        .map_err(|e| StoreError::Corrupt(format!("not a point FeatureCollection: {e}")))?;

    if let Some(meta) = &collection.metadata {
        if meta.identity_precision != precision.decimals() {
            return Err(StoreError::PrecisionMismatch {
                stored: meta.identity_precision,
                configured: precision.decimals(),
            });
        }
        if meta.feature_count != collection.len() {
            warn!(
                recorded = meta.feature_count,
                actual = collection.len(),
                "Store metadata feature_count is stale"
            );
        }
    }

    let violations = check(&collection.features, precision);
    if let Some(first) = violations.first() {
        return Err(StoreError::Corrupt(format!(
            "{first} ({} violation(s) in total)",
            violations.len()
        )));
    }

    Ok(collection)
}

/// Geometry and uniqueness checks shared by load and validate.
fn check(features: &[Feature], precision: IdentityPrecision) -> Vec<Violation> {
    let mut violations = Vec::new();
    let mut seen = HashSet::with_capacity(features.len());
    for (index, feature) in features.iter().enumerate() {
        if let Err(error) = feature.geometry.validate() {
            violations.push(Violation::InvalidGeometry { index, error });
        }
        let key = feature.identity_key(precision);
        if !seen.insert(key.clone()) {
            violations.push(Violation::DuplicateKey(key));
        }
    }
    violations
}

// --- Merged ---

#[derive(Debug)]
pub struct Merged {
    features: Vec<Feature>,
    previous_metadata: Option<CollectionMetadata>,
    previous_keys: HashSet<IdentityKey>,
    precision: IdentityPrecision,
    existed: bool,
    report: MergeReport,
}

impl Merged {
    pub fn report(&self) -> MergeReport {
        self.report
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Check uniqueness, geometry, and that nothing stored was dropped.
    pub fn validate(self) -> std::result::Result<Validated, RolledBack> {
        let mut violations = check(&self.features, self.precision);

        let present: HashSet<IdentityKey> = self
            .features
            .iter()
            .map(|f| f.identity_key(self.precision))
            .collect();
        let mut missing: Vec<&IdentityKey> = self.previous_keys.difference(&present).collect();
        missing.sort();
        violations.extend(missing.into_iter().cloned().map(Violation::MissingPrevious));

        if !violations.is_empty() {
            for v in &violations {
                warn!(violation = %v, "Validation failed");
            }
            return Err(RolledBack {
                violations,
                report: self.report,
            });
        }

        Ok(Validated {
            features: self.features,
            previous_metadata: self.previous_metadata,
            precision: self.precision,
            existed: self.existed,
            report: self.report,
        })
    }
}

// --- Validated ---

#[derive(Debug)]
pub struct Validated {
    features: Vec<Feature>,
    previous_metadata: Option<CollectionMetadata>,
    precision: IdentityPrecision,
    existed: bool,
    report: MergeReport,
}

impl Validated {
    pub fn report(&self) -> MergeReport {
        self.report
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// The collection `commit` would write at `now`.
    pub fn to_collection(&self, now: DateTime<Utc>) -> FeatureCollection {
        let updated_at = if self.report.changed() {
            Some(now)
        } else {
            self.previous_metadata.as_ref().and_then(|m| m.updated_at)
        };
        FeatureCollection {
            metadata: Some(CollectionMetadata {
                identity_precision: self.precision.decimals(),
                feature_count: self.features.len(),
                updated_at,
            }),
            ..FeatureCollection::new(self.features.clone())
        }
    }

    /// Replace the stored collection in one step. An unchanged collection
    /// that already exists on the backend is not rewritten.
    pub fn commit(self, backend: &dyn StoreBackend, now: DateTime<Utc>) -> Result<Committed> {
        let collection = self.to_collection(now);

        if self.existed && !self.report.changed() {
            info!(store = %backend.describe(), features = collection.len(), "Store unchanged, skipping write");
            return Ok(Committed {
                collection,
                report: self.report,
                written: false,
            });
        }

        let mut bytes = serde_json::to_vec_pretty(&collection)
            .map_err(|e| StoreError::Commit(format!("failed to serialize collection: {e}")))?;
        bytes.push(b'\n');
        backend.replace(&bytes)?;

        info!(
            store = %backend.describe(),
            features = collection.len(),
            bytes = bytes.len(),
            "Committed store"
        );

        Ok(Committed {
            collection,
            report: self.report,
            written: true,
        })
    }
}

// --- Terminal states ---

/// Validation failed; the backend was never written.
#[derive(Debug)]
pub struct RolledBack {
    pub violations: Vec<Violation>,
    pub report: MergeReport,
}

#[derive(Debug)]
pub struct Committed {
    collection: FeatureCollection,
    report: MergeReport,
    written: bool,
}

impl Committed {
    pub fn collection(&self) -> &FeatureCollection {
        &self.collection
    }

    pub fn report(&self) -> MergeReport {
        self.report
    }

    /// False when the store was already up to date.
    pub fn written(&self) -> bool {
        self.written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use geoharvest_common::props;
    use serde_json::json;

    fn feature(url: &str, lon: f64, lat: f64) -> Feature {
        let mut properties = serde_json::Map::new();
        properties.insert(props::SOURCE_URL.into(), json!(url));
        Feature::new(lon, lat, properties)
    }

    fn precision() -> IdentityPrecision {
        IdentityPrecision::default()
    }

    #[test]
    fn validate_rejects_out_of_range_geometry() {
        let loaded = Loaded::load(&MemoryBackend::new(), precision()).unwrap();
        let merged = loaded.merge(vec![feature("https://a", 200.0, 95.0)]);
        let rolled_back = merged.validate().unwrap_err();
        assert!(matches!(
            rolled_back.violations[0],
            Violation::InvalidGeometry { index: 0, .. }
        ));
    }

    #[test]
    fn validate_detects_dropped_features() {
        let backend = MemoryBackend::new();
        let loaded = Loaded::load(&backend, precision()).unwrap();
        let committed = loaded
            .merge(vec![feature("https://a", 1.0, 2.0)])
            .validate()
            .unwrap()
            .commit(&backend, Utc::now())
            .unwrap();
        assert!(committed.written());

        let loaded = Loaded::load(&backend, precision()).unwrap();
        let mut merged = loaded.merge(Vec::new());
        merged.features.clear();
        let rolled_back = merged.validate().unwrap_err();
        assert!(matches!(rolled_back.violations[0], Violation::MissingPrevious(_)));
    }

    #[test]
    fn load_rejects_stored_duplicates() {
        let dup = FeatureCollection::new(vec![feature("https://a", 1.0, 2.0), feature("https://a", 1.0, 2.0)]);
        let backend = MemoryBackend::with_bytes(serde_json::to_vec(&dup).unwrap());
        let err = Loaded::load(&backend, precision()).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn load_rejects_precision_change() {
        let backend = MemoryBackend::new();
        Loaded::load(&backend, precision())
            .unwrap()
            .merge(vec![feature("https://a", 1.0, 2.0)])
            .validate()
            .unwrap()
            .commit(&backend, Utc::now())
            .unwrap();

        let err = Loaded::load(&backend, IdentityPrecision::new(5).unwrap()).unwrap_err();
        assert!(matches!(
            err,
            StoreError::PrecisionMismatch {
                stored: 3,
                configured: 5
            }
        ));
    }

    #[test]
    fn unchanged_store_is_not_rewritten() {
        let backend = MemoryBackend::new();
        let batch = vec![feature("https://a", 1.0, 2.0)];
        Loaded::load(&backend, precision())
            .unwrap()
            .merge(batch.clone())
            .validate()
            .unwrap()
            .commit(&backend, Utc::now())
            .unwrap();
        let before = backend.snapshot();

        backend.set_fail_commits(true);
        let committed = Loaded::load(&backend, precision())
            .unwrap()
            .merge(batch)
            .validate()
            .unwrap()
            .commit(&backend, Utc::now())
            .unwrap();
        assert!(!committed.written());
        assert_eq!(backend.snapshot(), before);
    }

    #[test]
    fn run_state_names() {
        assert_eq!(RunState::RolledBack.to_string(), "rolled_back");
        assert_eq!(serde_json::to_value(RunState::Committed).unwrap(), json!("committed"));
    }
}
