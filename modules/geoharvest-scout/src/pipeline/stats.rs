use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use geoharvest_store::RunState;
use serde::Serialize;
use uuid::Uuid;

/// Why a report or candidate did not become a stored feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MalformedItem,
    ExtractFailed,
    NoLocation,
    NotGeocoded,
    GeocodeFailed,
    InvalidGeometry,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MalformedItem => "malformed_item",
            RejectReason::ExtractFailed => "extract_failed",
            RejectReason::NoLocation => "no_location",
            RejectReason::NotGeocoded => "not_geocoded",
            RejectReason::GeocodeFailed => "geocode_failed",
            RejectReason::InvalidGeometry => "invalid_geometry",
        }
    }
}

/// Stats from a harvest run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    pub sources_total: u32,
    pub sources_failed: u32,
    pub items_processed: u32,
    pub candidates: u32,
    pub features_built: u32,
    pub features_added: u32,
    pub features_replaced: u32,
    pub conflicts_resolved: u32,
    pub rejected: BTreeMap<RejectReason, u32>,
    pub geocode_calls: u32,
    pub geocode_cache_hits: u32,
    pub store_features: u32,
    pub violations: u32,
    pub sinks_failed: u32,
    pub state: Option<RunState>,
}

impl RunSummary {
    pub fn new(dry_run: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            sources_total: 0,
            sources_failed: 0,
            items_processed: 0,
            candidates: 0,
            features_built: 0,
            features_added: 0,
            features_replaced: 0,
            conflicts_resolved: 0,
            rejected: BTreeMap::new(),
            geocode_calls: 0,
            geocode_cache_hits: 0,
            store_features: 0,
            violations: 0,
            sinks_failed: 0,
            state: None,
        }
    }

    pub fn reject(&mut self, reason: RejectReason) {
        self.reject_n(reason, 1);
    }

    pub fn reject_n(&mut self, reason: RejectReason, n: u32) {
        if n > 0 {
            *self.rejected.entry(reason).or_default() += n;
        }
    }

    pub fn rejected_count(&self, reason: RejectReason) -> u32 {
        self.rejected.get(&reason).copied().unwrap_or(0)
    }

    pub fn total_rejected(&self) -> u32 {
        self.rejected.values().sum()
    }

    pub fn finish(&mut self, state: RunState) {
        self.state = Some(state);
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        geoharvest_store::atomic_write(path, &bytes)
            .with_context(|| format!("Failed to write run summary {}", path.display()))
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== Harvest Run {} ===", self.run_id)?;
        let state = self.state.map(|s| s.as_str()).unwrap_or("incomplete");
        if self.dry_run {
            writeln!(f, "State:              {state} (dry run)")?;
        } else {
            writeln!(f, "State:              {state}")?;
        }
        if let Some(ms) = self.duration_ms() {
            writeln!(f, "Duration:           {:.1}s", ms as f64 / 1000.0)?;
        }
        writeln!(f, "Sources:            {} ({} failed)", self.sources_total, self.sources_failed)?;
        writeln!(f, "Items processed:    {}", self.items_processed)?;
        writeln!(f, "Candidates:         {}", self.candidates)?;
        writeln!(f, "Features built:     {}", self.features_built)?;
        writeln!(f, "Features added:     {}", self.features_added)?;
        writeln!(f, "Features replaced:  {}", self.features_replaced)?;
        writeln!(f, "Conflicts resolved: {}", self.conflicts_resolved)?;
        writeln!(f, "Store size:         {}", self.store_features)?;
        writeln!(
            f,
            "Geocoding:          {} calls, {} cache hits",
            self.geocode_calls, self.geocode_cache_hits
        )?;
        if !self.rejected.is_empty() {
            writeln!(f, "\nRejected:")?;
            for (reason, count) in &self.rejected {
                writeln!(f, "  {:<18}{count}", reason.as_str())?;
            }
        }
        if self.violations > 0 {
            writeln!(f, "\nValidation violations: {}", self.violations)?;
        }
        if self.sinks_failed > 0 {
            writeln!(f, "Export sinks failed:   {}", self.sinks_failed)?;
        }
        Ok(())
    }
}
