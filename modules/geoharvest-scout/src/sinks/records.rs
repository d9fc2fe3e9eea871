use std::path::{Path, PathBuf};

use anyhow::Context;
use geoharvest_common::{props, Feature, FeatureCollection};
use serde::Serialize;
use tracing::info;

use super::ExportSink;

/// Flat JSON rows for spreadsheet import, in store order.
pub struct RecordSink {
    path: PathBuf,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Record {
    pub title: Option<String>,
    pub url: Option<String>,
    pub publisher: Option<String>,
    pub published: Option<String>,
    pub category: Option<String>,
    pub language: Option<String>,
    pub lat: f64,
    pub lon: f64,
}

impl Record {
    pub fn from_feature(feature: &Feature) -> Self {
        let (lon, lat) = feature.lon_lat();
        let text = |key: &str| feature.str_prop(key).map(str::to_string);
        let url = text(props::SOURCE_URL);
        Self {
            title: text(props::TITLE),
            publisher: url.as_deref().and_then(publisher),
            url,
            published: text(props::PUBLISHED_AT),
            category: text(props::CATEGORY),
            language: text(props::LANGUAGE),
            lat,
            lon,
        }
    }
}

/// Host of `url` without a leading `www.`.
fn publisher(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host).to_string())
}

impl RecordSink {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl ExportSink for RecordSink {
    fn name(&self) -> &str {
        "records"
    }

    fn export(&self, collection: &FeatureCollection) -> anyhow::Result<()> {
        let records: Vec<Record> = collection.features.iter().map(Record::from_feature).collect();
        let mut bytes = serde_json::to_vec_pretty(&records)?;
        bytes.push(b'\n');
        geoharvest_store::atomic_write(&self.path, &bytes)
            .with_context(|| format!("Failed to write records {}", self.path.display()))?;
        info!(path = %self.path.display(), records = records.len(), "Wrote records");
        Ok(())
    }
}
