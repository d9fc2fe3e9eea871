use chrono::{DateTime, SecondsFormat, Utc};
use geoharvest_common::identity::sanitize_url;
use geoharvest_common::{
    props, validate_coordinates, Candidate, Feature, GeometryError, IdentityKey, IdentityPrecision,
    Properties,
};
use serde_json::{json, Value};
use tracing::debug;

use super::categorize::Categorizer;

/// Turns geocoded candidates into store features. Pure: the same candidate
/// and timestamp always yield the same feature.
pub struct FeatureBuilder {
    precision: IdentityPrecision,
    excerpt_chars: usize,
    categorizer: Categorizer,
}

impl FeatureBuilder {
    pub fn new(precision: IdentityPrecision, excerpt_chars: usize, categorizer: Categorizer) -> Self {
        Self {
            precision,
            excerpt_chars,
            categorizer,
        }
    }

    pub fn precision(&self) -> IdentityPrecision {
        self.precision
    }

    /// Build a feature, or reject the candidate when its point is missing or
    /// outside WGS84 bounds.
    pub fn build(
        &self,
        candidate: &Candidate,
        extracted_at: DateTime<Utc>,
    ) -> Result<(IdentityKey, Feature), GeometryError> {
        let point = candidate.point.ok_or(GeometryError::Missing)?;
        validate_coordinates(point.lng, point.lat)?;

        let item = &candidate.item;
        let mut properties = Properties::new();
        let mut set = |key: &str, value: Option<Value>| {
            if let Some(value) = value {
                properties.insert(key.to_string(), value);
            }
        };

        set(props::SOURCE_URL, Some(json!(sanitize_url(&item.source_url))));
        set(props::SOURCE_KIND, Some(json!(item.kind.as_str())));
        set(props::SOURCE_LABEL, non_empty(&item.source_label));
        set(props::TITLE, item.title.as_deref().and_then(non_empty));
        set(props::EXCERPT, excerpt(&item.text, self.excerpt_chars).map(Value::String));
        set(props::CATEGORY, Some(json!(self.categorizer.categorize(item))));
        set(props::PUBLISHED_AT, item.published_at.map(|t| json!(rfc3339(t))));
        set(props::EXTRACTED_AT, Some(json!(rfc3339(extracted_at))));
        set(props::LOCATION_NAME, non_empty(&candidate.location_name));
        set(props::LANGUAGE, item.language.as_deref().and_then(non_empty));
        set(props::CONFIDENCE, candidate.confidence.map(|c| json!(c)));
        set(props::GEO_PRECISION, Some(json!(point.precision.as_str())));
        set(props::IMAGE_URL, item.image_url.as_deref().and_then(non_empty));
        set(props::AUTHOR, item.author.as_deref().and_then(non_empty));
        set(
            props::ENTITIES,
            (!candidate.entities.is_empty()).then(|| json!(candidate.entities)),
        );
        set(props::SENTIMENT, candidate.sentiment.map(|s| json!(s)));

        let feature = Feature::new(point.lng, point.lat, properties);
        let key = feature.identity_key(self.precision);
        debug!(key = %key, location = candidate.location_name.as_str(), "Built feature");
        Ok((key, feature))
    }
}

fn non_empty(s: &str) -> Option<Value> {
    let s = s.trim();
    (!s.is_empty()).then(|| json!(s))
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// First `max_chars` characters, cut back to a word boundary, with an
/// ellipsis when anything was dropped.
pub fn excerpt(text: &str, max_chars: usize) -> Option<String> {
    let text = text.trim();
    if text.is_empty() || max_chars == 0 {
        return None;
    }
    let Some((cut, _)) = text.char_indices().nth(max_chars) else {
        return Some(text.to_string());
    };
    let head = &text[..cut];
    let head = match head.rfind(char::is_whitespace) {
        Some(space) if space > 0 => &head[..space],
        _ => head,
    };
    Some(format!("{}…", head.trim_end()))
}
