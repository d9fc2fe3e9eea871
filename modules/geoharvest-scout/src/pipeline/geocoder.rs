// Place name -> coordinates.
//
// Providers: Nominatim (primary), Photon (fallback), and a hybrid that asks
// Photon only when Nominatim has no answer. Providers never retry or
// throttle themselves; the enricher wraps every call in the shared rate
// limiter, the retry policy and a per-call timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use geoharvest_common::config::{GeocoderProvider, GeocodingConfig};
use geoharvest_common::{GeoPrecision, Retryable};
use serde::Deserialize;
use tracing::debug;

/// Longest query sent to a provider.
const MAX_QUERY_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeHit {
    pub lat: f64,
    pub lng: f64,
    pub precision: GeoPrecision,
    pub confidence: Option<f64>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeocodeError {
    /// Timeouts, connection failures, 429 and 5xx. Worth retrying.
    #[error("transient geocoder failure: {0}")]
    Transient(String),

    #[error("geocoder failure: {0}")]
    Permanent(String),
}

impl Retryable for GeocodeError {
    fn is_transient(&self) -> bool {
        matches!(self, GeocodeError::Transient(_))
    }
}

impl GeocodeError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return GeocodeError::Transient(err.to_string());
        }
        match err.status() {
            Some(status) if status.as_u16() == 429 || status.is_server_error() => {
                GeocodeError::Transient(format!("HTTP {status}"))
            }
            Some(status) => GeocodeError::Permanent(format!("HTTP {status}")),
            None if err.is_decode() => GeocodeError::Permanent(format!("bad response: {err}")),
            None => GeocodeError::Transient(err.to_string()),
        }
    }
}

/// `Ok(None)` means the provider answered and knows no such place.
#[async_trait]
pub trait Geocoder: Send + Sync {
    fn name(&self) -> &str;

    async fn geocode(&self, query: &str) -> Result<Option<GeocodeHit>, GeocodeError>;
}

/// Build the provider chain named in the config.
pub fn geocoder_from_config(config: &GeocodingConfig) -> anyhow::Result<Arc<dyn Geocoder>> {
    let client = reqwest::Client::builder()
        .timeout(config.timeout())
        .user_agent(config.user_agent.clone())
        .build()?;

    let nominatim = NominatimGeocoder::new(client.clone(), &config.nominatim_url);
    let photon = PhotonGeocoder::new(client, &config.photon_url);

    Ok(match config.provider {
        GeocoderProvider::Nominatim => Arc::new(nominatim),
        GeocoderProvider::Photon => Arc::new(photon),
        GeocoderProvider::Hybrid => Arc::new(HybridGeocoder::new(Arc::new(nominatim), Arc::new(photon))),
    })
}

fn clamp_query(query: &str) -> &str {
    match query.char_indices().nth(MAX_QUERY_CHARS) {
        Some((idx, _)) => &query[..idx],
        None => query,
    }
}

// ---------------------------------------------------------------------------
// Nominatim
// ---------------------------------------------------------------------------

pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct NominatimResult {
    pub lat: String,
    pub lon: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub place_rank: Option<u32>,
    #[serde(default)]
    pub importance: Option<f64>,
}

impl NominatimGeocoder {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    fn name(&self) -> &str {
        "nominatim"
    }

    async fn geocode(&self, query: &str) -> Result<Option<GeocodeHit>, GeocodeError> {
        let results: Vec<NominatimResult> = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", clamp_query(query)), ("format", "jsonv2"), ("limit", "1")])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(GeocodeError::from_reqwest)?
            .json()
            .await
            .map_err(GeocodeError::from_reqwest)?;

        let hit = results.into_iter().next().map(parse_nominatim).transpose()?;
        debug!(query, found = hit.is_some(), "nominatim lookup");
        Ok(hit)
    }
}

pub fn parse_nominatim(result: NominatimResult) -> Result<GeocodeHit, GeocodeError> {
    let lat: f64 = result
        .lat
        .parse()
        .map_err(|_| GeocodeError::Permanent(format!("unparseable latitude {:?}", result.lat)))?;
    let lng: f64 = result
        .lon
        .parse()
        .map_err(|_| GeocodeError::Permanent(format!("unparseable longitude {:?}", result.lon)))?;
    Ok(GeocodeHit {
        lat,
        lng,
        precision: result.place_rank.map(precision_from_rank).unwrap_or(GeoPrecision::City),
        confidence: result.importance.map(|i| i.clamp(0.0, 1.0)),
        display_name: result.display_name,
    })
}

/// Nominatim address rank: 4 country, 8 state, 16 city, 17-25 suburb and
/// neighbourhood, 26+ street and building.
pub fn precision_from_rank(rank: u32) -> GeoPrecision {
    match rank {
        26.. => GeoPrecision::Exact,
        17..=25 => GeoPrecision::Neighborhood,
        13..=16 => GeoPrecision::City,
        _ => GeoPrecision::Region,
    }
}

// ---------------------------------------------------------------------------
// Photon
// ---------------------------------------------------------------------------

pub struct PhotonGeocoder {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
pub struct PhotonResponse {
    #[serde(default)]
    pub features: Vec<PhotonFeature>,
}

#[derive(Debug, Deserialize)]
pub struct PhotonFeature {
    pub geometry: PhotonGeometry,
    #[serde(default)]
    pub properties: PhotonProperties,
}

#[derive(Debug, Deserialize)]
pub struct PhotonGeometry {
    /// `[lon, lat]`
    pub coordinates: Vec<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PhotonProperties {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub name: Option<String>,
    pub country: Option<String>,
}

impl PhotonGeocoder {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Geocoder for PhotonGeocoder {
    fn name(&self) -> &str {
        "photon"
    }

    async fn geocode(&self, query: &str) -> Result<Option<GeocodeHit>, GeocodeError> {
        let response: PhotonResponse = self
            .client
            .get(format!("{}/api/", self.base_url))
            .query(&[("q", clamp_query(query)), ("limit", "1")])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(GeocodeError::from_reqwest)?
            .json()
            .await
            .map_err(GeocodeError::from_reqwest)?;

        let hit = parse_photon(response)?;
        debug!(query, found = hit.is_some(), "photon lookup");
        Ok(hit)
    }
}

pub fn parse_photon(response: PhotonResponse) -> Result<Option<GeocodeHit>, GeocodeError> {
    let Some(feature) = response.features.into_iter().next() else {
        return Ok(None);
    };
    let [lng, lat] = feature.geometry.coordinates[..] else {
        return Err(GeocodeError::Permanent(format!(
            "photon returned {} coordinates",
            feature.geometry.coordinates.len()
        )));
    };
    let display_name = match (feature.properties.name, feature.properties.country) {
        (Some(name), Some(country)) => Some(format!("{name}, {country}")),
        (name, _) => name,
    };
    Ok(Some(GeocodeHit {
        lat,
        lng,
        precision: precision_from_photon_type(feature.properties.kind.as_deref()),
        confidence: None,
        display_name,
    }))
}

pub fn precision_from_photon_type(kind: Option<&str>) -> GeoPrecision {
    match kind {
        Some("house") | Some("street") => GeoPrecision::Exact,
        Some("district") | Some("locality") => GeoPrecision::Neighborhood,
        Some("county") | Some("state") | Some("country") => GeoPrecision::Region,
        _ => GeoPrecision::City,
    }
}

// ---------------------------------------------------------------------------
// Hybrid
// ---------------------------------------------------------------------------

/// Primary first; fallback when the primary finds nothing or fails. A hit
/// from either wins. With no hit, the primary's error (if any) is returned so
/// a transient outage stays retryable.
pub struct HybridGeocoder {
    primary: Arc<dyn Geocoder>,
    fallback: Arc<dyn Geocoder>,
}

impl HybridGeocoder {
    pub fn new(primary: Arc<dyn Geocoder>, fallback: Arc<dyn Geocoder>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl Geocoder for HybridGeocoder {
    fn name(&self) -> &str {
        "hybrid"
    }

    async fn geocode(&self, query: &str) -> Result<Option<GeocodeHit>, GeocodeError> {
        let primary = self.primary.geocode(query).await;
        if let Ok(Some(hit)) = primary {
            return Ok(Some(hit));
        }

        let fallback = self.fallback.geocode(query).await;
        match (primary, fallback) {
            (_, Ok(Some(hit))) => Ok(Some(hit)),
            (Err(e), _) => Err(e),
            (Ok(_), result) => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockGeocoder;

    #[test]
    fn parses_nominatim_jsonv2() {
        let body = r#"[{"lat": "38.7077507", "lon": "-9.1365919", "display_name": "Lisboa, Portugal",
                        "place_rank": 16, "importance": 0.83}]"#;
        let results: Vec<NominatimResult> = serde_json::from_str(body).unwrap();
        let hit = parse_nominatim(results.into_iter().next().unwrap()).unwrap();
        assert_eq!(hit.lat, 38.7077507);
        assert_eq!(hit.lng, -9.1365919);
        assert_eq!(hit.precision, GeoPrecision::City);
        assert_eq!(hit.confidence, Some(0.83));
        assert_eq!(hit.display_name.as_deref(), Some("Lisboa, Portugal"));
    }

    #[test]
    fn nominatim_bad_coordinates_are_permanent() {
        let result = NominatimResult {
            lat: "north".into(),
            lon: "0".into(),
            display_name: None,
            place_rank: None,
            importance: None,
        };
        assert!(matches!(parse_nominatim(result), Err(GeocodeError::Permanent(_))));
    }

    #[test]
    fn parses_photon_geojson() {
        let body = r#"{"features": [{"geometry": {"type": "Point", "coordinates": [2.3483915, 48.8534951]},
                        "properties": {"type": "city", "name": "Paris", "country": "France"}}]}"#;
        let response: PhotonResponse = serde_json::from_str(body).unwrap();
        let hit = parse_photon(response).unwrap().unwrap();
        assert_eq!(hit.lng, 2.3483915);
        assert_eq!(hit.lat, 48.8534951);
        assert_eq!(hit.precision, GeoPrecision::City);
        assert_eq!(hit.display_name.as_deref(), Some("Paris, France"));

        let empty: PhotonResponse = serde_json::from_str(r#"{"features": []}"#).unwrap();
        assert!(parse_photon(empty).unwrap().is_none());
    }

    #[test]
    fn rank_buckets() {
        assert_eq!(precision_from_rank(30), GeoPrecision::Exact);
        assert_eq!(precision_from_rank(20), GeoPrecision::Neighborhood);
        assert_eq!(precision_from_rank(16), GeoPrecision::City);
        assert_eq!(precision_from_rank(4), GeoPrecision::Region);
    }

    #[test]
    fn transient_statuses_are_retryable() {
        assert!(GeocodeError::Transient("HTTP 503".into()).is_transient());
        assert!(!GeocodeError::Permanent("HTTP 400".into()).is_transient());
    }

    #[tokio::test]
    async fn hybrid_falls_back_when_primary_has_nothing() {
        let primary = Arc::new(MockGeocoder::new());
        let fallback = Arc::new(MockGeocoder::new().on_place("Toledo", 39.86, -4.02));
        let hybrid = HybridGeocoder::new(primary.clone(), fallback.clone());

        let hit = hybrid.geocode("Toledo").await.unwrap().unwrap();
        assert_eq!(hit.lat, 39.86);
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
    }

    #[tokio::test]
    async fn hybrid_skips_fallback_on_primary_hit() {
        let primary = Arc::new(MockGeocoder::new().on_place("Toledo", 39.86, -4.02));
        let fallback = Arc::new(MockGeocoder::new());
        let hybrid = HybridGeocoder::new(primary, fallback.clone());

        assert!(hybrid.geocode("Toledo").await.unwrap().is_some());
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn hybrid_keeps_primary_transient_error_when_fallback_misses() {
        let primary = Arc::new(MockGeocoder::new().fail_transiently("Toledo", 1));
        let fallback = Arc::new(MockGeocoder::new());
        let hybrid = HybridGeocoder::new(primary, fallback);

        let err = hybrid.geocode("Toledo").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn long_queries_are_clamped() {
        let long = "á".repeat(300);
        assert_eq!(clamp_query(&long).chars().count(), MAX_QUERY_CHARS);
        assert_eq!(clamp_query("Paris"), "Paris");
    }
}
