//! Identity keys for deduplicating reports across runs.
//!
//! A key is the composite `normalized_url|lat|lon|category` with coordinates
//! rounded to a configured number of decimals. Coarser rounding folds more
//! near-duplicate reports together but can merge distinct incidents that sit
//! close to each other; points that straddle a rounding boundary never
//! collide. Both effects are accepted behaviour of the chosen precision.
//!
//! The key is not stored. It is re-derived from `source_url`, `category` and
//! the geometry of a stored feature, so changing the precision changes every
//! key in the collection.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{props, Feature};

/// Decimal places kept when rounding coordinates for identity.
/// 3 decimals is roughly 110 m at the equator.
pub const DEFAULT_PRECISION: u8 = 3;

/// 7 decimals is ~1 cm; anything finer only tracks geocoder noise.
pub const MAX_PRECISION: u8 = 7;

pub const UNCATEGORIZED: &str = "uncategorized";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct IdentityPrecision(u8);

impl IdentityPrecision {
    pub fn new(decimals: u8) -> Result<Self, String> {
        if decimals > MAX_PRECISION {
            return Err(format!(
                "identity precision {decimals} exceeds maximum of {MAX_PRECISION} decimals"
            ));
        }
        Ok(Self(decimals))
    }

    pub fn decimals(&self) -> u8 {
        self.0
    }

    /// Round and format one coordinate. Negative zero prints as zero.
    pub fn format(&self, value: f64) -> String {
        let scale = 10f64.powi(self.0 as i32);
        let mut scaled = (value * scale).round();
        if scaled == 0.0 {
            scaled = 0.0;
        }
        format!("{:.*}", self.0 as usize, scaled / scale)
    }
}

impl Default for IdentityPrecision {
    fn default() -> Self {
        Self(DEFAULT_PRECISION)
    }
}

impl TryFrom<u8> for IdentityPrecision {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IdentityPrecision> for u8 {
    fn from(value: IdentityPrecision) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn derive(
        source_url: &str,
        lon: f64,
        lat: f64,
        category: &str,
        precision: IdentityPrecision,
    ) -> Self {
        Self(format!(
            "{}|{}|{}|{}",
            normalize_source_url(source_url),
            precision.format(lat),
            precision.format(lon),
            normalize_category(category)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Feature {
    pub fn identity_key(&self, precision: IdentityPrecision) -> IdentityKey {
        let (lon, lat) = self.lon_lat();
        IdentityKey::derive(
            self.str_prop(props::SOURCE_URL).unwrap_or_default(),
            lon,
            lat,
            self.str_prop(props::CATEGORY).unwrap_or_default(),
            precision,
        )
    }
}

/// Strip tracking parameters from URLs that may contain PII or cause dedup mismatches.
pub fn sanitize_url(url: &str) -> String {
    const TRACKING_PARAMS: &[&str] = &[
        "_dt",
        "fbclid",
        "gclid",
        "utm_source",
        "utm_medium",
        "utm_campaign",
        "utm_term",
        "utm_content",
        "ref",
        "mc_cid",
        "mc_eid",
        "ct",
        "cd",
        "usg",
        "ved",
    ];

    let Ok(mut parsed) = url::Url::parse(url.trim()) else {
        return url.trim().to_string();
    };

    if parsed.query().is_some() {
        let clean_pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if clean_pairs.is_empty() {
            parsed.set_query(None);
        } else {
            parsed.query_pairs_mut().clear().extend_pairs(clean_pairs);
        }
    }

    parsed.to_string()
}

/// Identity form of a source URL: tracking params removed, fragment and
/// scheme dropped, host lowercased, trailing slash trimmed. Strings that do
/// not parse as URLs are only trimmed and lowercased.
pub fn normalize_source_url(url: &str) -> String {
    let sanitized = sanitize_url(url);
    let Ok(parsed) = url::Url::parse(&sanitized) else {
        return sanitized.to_lowercase();
    };

    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    let path = parsed.path().trim_end_matches('/');
    let mut out = match parsed.port() {
        Some(port) => format!("{host}:{port}{path}"),
        None => format!("{host}{path}"),
    };
    if let Some(query) = parsed.query() {
        out.push('?');
        out.push_str(query);
    }
    out
}

/// Lowercased, whitespace collapsed to single hyphens.
pub fn normalize_category(category: &str) -> String {
    let normalized = category
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("-");
    if normalized.is_empty() {
        UNCATEGORIZED.to_string()
    } else {
        normalized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Properties;
    use serde_json::json;

    fn p(decimals: u8) -> IdentityPrecision {
        IdentityPrecision::new(decimals).unwrap()
    }

    #[test]
    fn precision_rejects_too_fine() {
        assert!(IdentityPrecision::new(8).is_err());
        assert!(IdentityPrecision::new(7).is_ok());
    }

    #[test]
    fn format_rounds_and_clears_negative_zero() {
        assert_eq!(p(3).format(40.41678), "40.417");
        assert_eq!(p(3).format(-0.0001), "0.000");
        assert_eq!(p(0).format(2.6), "3");
    }

    #[test]
    fn same_report_collides_within_precision() {
        let a = IdentityKey::derive("https://news.example.com/a?utm_source=x", -3.70379, 40.41678, "Alerts", p(3));
        let b = IdentityKey::derive("http://NEWS.example.com/a/", -3.70381, 40.41681, "alerts", p(3));
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_locations_do_not_collide() {
        let madrid = IdentityKey::derive("https://news.example.com/a", -3.7038, 40.4168, "alerts", p(3));
        let lisbon = IdentityKey::derive("https://news.example.com/a", -9.1393, 38.7223, "alerts", p(3));
        assert_ne!(madrid, lisbon);
    }

    #[test]
    fn coarser_precision_merges_nearby_points() {
        let a = IdentityKey::derive("https://x.org/r", 2.3522, 48.8566, "", p(1));
        let b = IdentityKey::derive("https://x.org/r", 2.3601, 48.8702, "", p(1));
        assert_eq!(a, b);
        let a = IdentityKey::derive("https://x.org/r", 2.3522, 48.8566, "", p(3));
        let b = IdentityKey::derive("https://x.org/r", 2.3601, 48.8702, "", p(3));
        assert_ne!(a, b);
    }

    #[test]
    fn category_participates_in_key() {
        let a = IdentityKey::derive("https://x.org/r", 1.0, 1.0, "history", p(3));
        let b = IdentityKey::derive("https://x.org/r", 1.0, 1.0, "politics", p(3));
        assert_ne!(a, b);
    }

    #[test]
    fn feature_key_is_rederivable() {
        let mut props = Properties::new();
        props.insert(props::SOURCE_URL.into(), json!("https://x.org/r"));
        props.insert(props::CATEGORY.into(), json!("history"));
        let feature = Feature::new(1.0, 2.0, props);
        assert_eq!(
            feature.identity_key(p(3)),
            IdentityKey::derive("https://x.org/r", 1.0, 2.0, "history", p(3))
        );
    }

    #[test]
    fn normalize_category_defaults() {
        assert_eq!(normalize_category("  "), UNCATEGORIZED);
        assert_eq!(normalize_category("Grand  Lodge News"), "grand-lodge-news");
    }

    #[test]
    fn sanitize_url_strips_tracking() {
        let url = "https://example.com/page?id=123&utm_source=twitter&fbclid=abc";
        let clean = sanitize_url(url);
        assert!(clean.contains("id=123"));
        assert!(!clean.contains("utm_source"));
        assert!(!clean.contains("fbclid"));
    }

    #[test]
    fn sanitize_url_removes_all_tracking() {
        let url = "https://example.com/page?utm_source=x&utm_medium=y";
        assert!(!sanitize_url(url).contains('?'));
    }

    #[test]
    fn normalize_source_url_keeps_meaningful_query() {
        assert_eq!(
            normalize_source_url("https://en.wikipedia.org/?curid=42"),
            "en.wikipedia.org?curid=42"
        );
        assert_eq!(normalize_source_url("not a url"), "not a url");
    }
}
