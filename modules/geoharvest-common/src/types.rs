use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// --- Geo Types ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoPrecision {
    Exact,
    Neighborhood,
    City,
    Region,
}

impl GeoPrecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoPrecision::Exact => "exact",
            GeoPrecision::Neighborhood => "neighborhood",
            GeoPrecision::City => "city",
            GeoPrecision::Region => "region",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    pub precision: GeoPrecision,
}

/// Why a coordinate pair cannot be stored as a point geometry.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("missing coordinates")]
    Missing,

    #[error("non-finite coordinates ({lon}, {lat})")]
    NonFinite { lon: f64, lat: f64 },

    #[error("longitude {0} outside -180..180")]
    LongitudeOutOfRange(f64),

    #[error("latitude {0} outside -90..90")]
    LatitudeOutOfRange(f64),
}

/// WGS84 bounds check shared by the feature builder and the store validator.
pub fn validate_coordinates(lon: f64, lat: f64) -> Result<(), GeometryError> {
    if !lon.is_finite() || !lat.is_finite() {
        return Err(GeometryError::NonFinite { lon, lat });
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(GeometryError::LongitudeOutOfRange(lon));
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err(GeometryError::LatitudeOutOfRange(lat));
    }
    Ok(())
}

// --- Sources ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Feed,
    Wikipedia,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Feed => "feed",
            SourceKind::Wikipedia => "wikipedia",
        }
    }
}

/// A configured place to harvest reports from. Each variant is served by
/// its own adapter in `geoharvest-sources`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceDescriptor {
    /// RSS/Atom/JSON feed (Google Alerts, news sites).
    Feed {
        url: String,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        label: Option<String>,
    },
    /// Full-text search over one Wikipedia language edition.
    Wikipedia {
        query: String,
        #[serde(default = "default_wiki_lang")]
        lang: String,
        #[serde(default = "default_wiki_pages")]
        max_pages: u32,
        #[serde(default)]
        category: Option<String>,
    },
}

fn default_wiki_lang() -> String {
    "en".to_string()
}

fn default_wiki_pages() -> u32 {
    1
}

impl SourceDescriptor {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceDescriptor::Feed { .. } => SourceKind::Feed,
            SourceDescriptor::Wikipedia { .. } => SourceKind::Wikipedia,
        }
    }

    /// Short human-readable name for logs and summaries.
    pub fn describe(&self) -> String {
        match self {
            SourceDescriptor::Feed { url, label, .. } => label.clone().unwrap_or_else(|| url.clone()),
            SourceDescriptor::Wikipedia { query, lang, .. } => format!("wikipedia:{lang}:{query}"),
        }
    }

    pub fn default_category(&self) -> Option<&str> {
        match self {
            SourceDescriptor::Feed { category, .. } | SourceDescriptor::Wikipedia { category, .. } => {
                category.as_deref()
            }
        }
    }
}

/// One normalized report produced by a source adapter. Lives for a single run.
#[derive(Debug, Clone, PartialEq)]
pub struct RawItem {
    pub source_url: String,
    pub kind: SourceKind,
    /// Feed title or wiki edition, used for attribution.
    pub source_label: String,
    pub title: Option<String>,
    /// Plain text body (HTML already stripped).
    pub text: String,
    /// Publication/update time reported by the source itself.
    pub published_at: Option<DateTime<Utc>>,
    pub language: Option<String>,
    /// Short strings likely to name a place (author, feed categories, article title).
    pub location_hints: Vec<String>,
    pub image_url: Option<String>,
    pub author: Option<String>,
    /// Category assigned by the source descriptor, if any.
    pub category: Option<String>,
}

impl RawItem {
    /// Title and body joined, for NLP passes that want all text at once.
    pub fn full_text(&self) -> String {
        match &self.title {
            Some(title) if !title.is_empty() => format!("{title}. {}", self.text),
            _ => self.text.clone(),
        }
    }
}

/// A geocoded location extraction awaiting conversion to a Feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub item: RawItem,
    pub location_name: String,
    /// `None` when the geocoder produced no usable coordinates.
    pub point: Option<GeoPoint>,
    pub confidence: Option<f64>,
    pub entities: Vec<String>,
    pub sentiment: Option<f64>,
}

// --- GeoJSON ---

/// Well-known property keys written by the feature builder.
pub mod props {
    pub const SOURCE_URL: &str = "source_url";
    pub const SOURCE_KIND: &str = "source_kind";
    pub const SOURCE_LABEL: &str = "source_label";
    pub const TITLE: &str = "title";
    pub const EXCERPT: &str = "excerpt";
    pub const CATEGORY: &str = "category";
    pub const PUBLISHED_AT: &str = "published_at";
    pub const EXTRACTED_AT: &str = "extracted_at";
    pub const LOCATION_NAME: &str = "location_name";
    pub const LANGUAGE: &str = "language";
    pub const CONFIDENCE: &str = "confidence";
    pub const GEO_PRECISION: &str = "geo_precision";
    pub const IMAGE_URL: &str = "image_url";
    pub const AUTHOR: &str = "author";
    pub const ENTITIES: &str = "entities";
    pub const SENTIMENT: &str = "sentiment";
}

pub type Properties = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeatureType {
    #[default]
    Feature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CollectionType {
    #[default]
    FeatureCollection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    /// `[longitude, latitude]`, GeoJSON axis order.
    Point { coordinates: [f64; 2] },
}

impl Geometry {
    pub fn point(lon: f64, lat: f64) -> Self {
        Geometry::Point {
            coordinates: [lon, lat],
        }
    }

    pub fn lon_lat(&self) -> (f64, f64) {
        match self {
            Geometry::Point { coordinates } => (coordinates[0], coordinates[1]),
        }
    }

    pub fn validate(&self) -> Result<(), GeometryError> {
        let (lon, lat) = self.lon_lat();
        validate_coordinates(lon, lat)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: FeatureType,
    pub geometry: Geometry,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub properties: Properties,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Properties, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Properties>::deserialize(deserializer)?.unwrap_or_default())
}

impl Feature {
    pub fn new(lon: f64, lat: f64, properties: Properties) -> Self {
        Self {
            kind: FeatureType::Feature,
            geometry: Geometry::point(lon, lat),
            properties,
        }
    }

    pub fn lon_lat(&self) -> (f64, f64) {
        self.geometry.lon_lat()
    }

    /// String property, treating empty strings as absent.
    pub fn str_prop(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Whether a property carries a value (not missing, null, or "").
    pub fn has_prop(&self, key: &str) -> bool {
        match self.properties.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Array(a)) => !a.is_empty(),
            Some(_) => true,
        }
    }

    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.str_prop(props::PUBLISHED_AT)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Bookkeeping stored alongside the features as a GeoJSON foreign member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub identity_precision: u8,
    pub feature_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: CollectionType,
    pub features: Vec<Feature>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CollectionMetadata>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            kind: CollectionType::FeatureCollection,
            features,
            metadata: None,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validate_coordinates_accepts_bounds() {
        assert!(validate_coordinates(180.0, 90.0).is_ok());
        assert!(validate_coordinates(-180.0, -90.0).is_ok());
        assert!(validate_coordinates(0.0, 0.0).is_ok());
    }

    #[test]
    fn validate_coordinates_rejects_out_of_range() {
        assert_eq!(
            validate_coordinates(200.0, 10.0),
            Err(GeometryError::LongitudeOutOfRange(200.0))
        );
        assert_eq!(
            validate_coordinates(10.0, 95.0),
            Err(GeometryError::LatitudeOutOfRange(95.0))
        );
        assert!(matches!(
            validate_coordinates(f64::NAN, 0.0),
            Err(GeometryError::NonFinite { .. })
        ));
    }

    #[test]
    fn feature_serializes_as_geojson() {
        let mut props = Properties::new();
        props.insert(props::TITLE.into(), json!("Lodge fire"));
        let feature = Feature::new(-3.7, 40.4, props);

        let value = serde_json::to_value(&feature).unwrap();
        assert_eq!(value["type"], "Feature");
        assert_eq!(value["geometry"]["type"], "Point");
        assert_eq!(value["geometry"]["coordinates"], json!([-3.7, 40.4]));
        assert_eq!(value["properties"]["title"], "Lodge fire");
    }

    #[test]
    fn feature_rejects_unknown_geometry() {
        let raw = json!({
            "type": "Feature",
            "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0]]]},
            "properties": {}
        });
        assert!(serde_json::from_value::<Feature>(raw).is_err());
    }

    #[test]
    fn feature_accepts_null_properties() {
        let raw = json!({
            "type": "Feature",
            "geometry": {"type": "Point", "coordinates": [1.0, 2.0]},
            "properties": null
        });
        let feature: Feature = serde_json::from_value(raw).unwrap();
        assert!(feature.properties.is_empty());
    }

    #[test]
    fn has_prop_ignores_empty_values() {
        let mut props = Properties::new();
        props.insert("a".into(), json!(""));
        props.insert("b".into(), Value::Null);
        props.insert("c".into(), json!(0.4));
        let feature = Feature::new(0.0, 0.0, props);
        assert!(!feature.has_prop("a"));
        assert!(!feature.has_prop("b"));
        assert!(feature.has_prop("c"));
        assert!(!feature.has_prop("missing"));
    }

    #[test]
    fn source_descriptor_parses_tagged() {
        let feed: SourceDescriptor =
            serde_json::from_value(json!({"kind": "feed", "url": "https://example.com/rss"})).unwrap();
        assert_eq!(feed.kind(), SourceKind::Feed);

        let wiki: SourceDescriptor =
            serde_json::from_value(json!({"kind": "wikipedia", "query": "Grand Lodge"})).unwrap();
        match wiki {
            SourceDescriptor::Wikipedia { lang, max_pages, .. } => {
                assert_eq!(lang, "en");
                assert_eq!(max_pages, 1);
            }
            _ => panic!("expected wikipedia descriptor"),
        }
    }
}
