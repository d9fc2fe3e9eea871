use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use geoharvest_common::{props, Feature, FeatureCollection};
use tracing::info;

use super::ExportSink;

/// APA-style reference list, one line per distinct citation, sorted.
pub struct CitationSink {
    path: PathBuf,
}

impl CitationSink {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl ExportSink for CitationSink {
    fn name(&self) -> &str {
        "citations"
    }

    fn export(&self, collection: &FeatureCollection) -> anyhow::Result<()> {
        let mut lines: Vec<String> = collection.features.iter().filter_map(citation).collect();
        lines.sort();
        lines.dedup();

        let mut text = lines.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        geoharvest_store::atomic_write(&self.path, text.as_bytes())
            .with_context(|| format!("Failed to write citations {}", self.path.display()))?;
        info!(path = %self.path.display(), citations = lines.len(), "Wrote citations");
        Ok(())
    }
}

/// `Title. (YYYY, Month DD). Retrieved from URL`. Features without a
/// source URL cannot be cited.
pub fn citation(feature: &Feature) -> Option<String> {
    let url = feature.str_prop(props::SOURCE_URL)?;
    let title = feature
        .str_prop(props::TITLE)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("Untitled");
    let title = title.trim_end_matches('.');

    let date = feature
        .str_prop(props::PUBLISHED_AT)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc).format("%Y, %B %d").to_string())
        .unwrap_or_else(|| "n.d.".to_string());

    Some(format!("{title}. ({date}). Retrieved from {url}"))
}
