// Persistent cache of geocoding outcomes, keyed by normalized place name.
// Only definitive answers are cached (a hit, or "no such place"); failures
// are not, so the next run asks again.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::Context;
use geoharvest_common::GeoPrecision;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::geocoder::GeocodeHit;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CachedGeocode {
    Hit {
        lat: f64,
        lng: f64,
        precision: GeoPrecision,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },
    NotFound,
}

impl CachedGeocode {
    pub fn from_outcome(outcome: &Option<GeocodeHit>) -> Self {
        match outcome {
            Some(hit) => CachedGeocode::Hit {
                lat: hit.lat,
                lng: hit.lng,
                precision: hit.precision,
                confidence: hit.confidence,
                display_name: hit.display_name.clone(),
            },
            None => CachedGeocode::NotFound,
        }
    }

    pub fn into_outcome(self) -> Option<GeocodeHit> {
        match self {
            CachedGeocode::Hit {
                lat,
                lng,
                precision,
                confidence,
                display_name,
            } => Some(GeocodeHit {
                lat,
                lng,
                precision,
                confidence,
                display_name,
            }),
            CachedGeocode::NotFound => None,
        }
    }
}

pub struct GeoCache {
    path: Option<PathBuf>,
    entries: Mutex<HashMap<String, CachedGeocode>>,
    dirty: AtomicBool,
}

impl GeoCache {
    /// Cache that lives for one process only.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: Mutex::new(HashMap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Load from `path`. A missing file starts empty; an unreadable one is
    /// logged and replaced on the next save.
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, CachedGeocode>>(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Geocode cache unreadable, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Geocode cache unreadable, starting empty");
                HashMap::new()
            }
        };
        info!(path = %path.display(), entries = entries.len(), "Loaded geocode cache");
        Self {
            path: Some(path.to_path_buf()),
            entries: Mutex::new(entries),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn key(query: &str) -> String {
        query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
    }

    /// `None` when the place was never resolved; `Some(None)` when it is
    /// known not to exist.
    pub fn get(&self, query: &str) -> Option<Option<GeocodeHit>> {
        self.lock()
            .get(&Self::key(query))
            .cloned()
            .map(CachedGeocode::into_outcome)
    }

    pub fn put(&self, query: &str, outcome: &Option<GeocodeHit>) {
        self.lock().insert(Self::key(query), CachedGeocode::from_outcome(outcome));
        self.dirty.store(true, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the cache back if anything changed. Sorted keys keep the file
    /// diffable.
    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty.load(Ordering::Relaxed) {
            return Ok(());
        }
        let sorted: BTreeMap<String, CachedGeocode> =
            self.lock().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let bytes = serde_json::to_vec_pretty(&sorted)?;
        geoharvest_store::atomic_write(path, &bytes)
            .with_context(|| format!("Failed to write geocode cache {}", path.display()))?;
        self.dirty.store(false, Ordering::Relaxed);
        info!(path = %path.display(), entries = sorted.len(), "Saved geocode cache");
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CachedGeocode>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit() -> GeocodeHit {
        GeocodeHit {
            lat: 40.4,
            lng: -3.7,
            precision: GeoPrecision::City,
            confidence: Some(0.7),
            display_name: Some("Madrid".into()),
        }
    }

    #[test]
    fn keys_ignore_case_and_spacing() {
        let cache = GeoCache::in_memory();
        cache.put("  Madrid   Spain ", &Some(hit()));
        assert_eq!(cache.get("madrid spain"), Some(Some(hit())));
        assert_eq!(cache.get("Barcelona"), None);
    }

    #[test]
    fn not_found_is_remembered() {
        let cache = GeoCache::in_memory();
        cache.put("Atlantis", &None);
        assert_eq!(cache.get("Atlantis"), Some(None));
    }

    #[test]
    fn survives_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocache.json");

        let cache = GeoCache::load(&path);
        assert!(cache.is_empty());
        cache.put("Madrid", &Some(hit()));
        cache.put("Atlantis", &None);
        cache.save().unwrap();

        let reloaded = GeoCache::load(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("MADRID"), Some(Some(hit())));
        assert_eq!(reloaded.get("atlantis"), Some(None));
    }

    #[test]
    fn garbage_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geocache.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(GeoCache::load(&path).is_empty());
    }
}
