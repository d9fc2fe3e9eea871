// Read-only consumers of the committed collection.

pub mod citations;
pub mod records;

use std::sync::Arc;

use geoharvest_common::config::ExportConfig;
use geoharvest_common::FeatureCollection;

pub use citations::CitationSink;
pub use records::RecordSink;

/// Receives the collection after a successful commit (or from
/// `geoharvest export`). Must not assume anything changed since last time.
pub trait ExportSink: Send + Sync {
    fn name(&self) -> &str;

    fn export(&self, collection: &FeatureCollection) -> anyhow::Result<()>;
}

/// Sinks enabled in the `[export]` section.
pub fn sinks_from_config(config: &ExportConfig) -> Vec<Arc<dyn ExportSink>> {
    let mut sinks: Vec<Arc<dyn ExportSink>> = Vec::new();
    if let Some(path) = &config.citations_path {
        sinks.push(Arc::new(CitationSink::new(path)));
    }
    if let Some(path) = &config.records_path {
        sinks.push(Arc::new(RecordSink::new(path)));
    }
    sinks
}
