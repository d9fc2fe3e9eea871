//! Pure merge of a feature batch into an existing collection.
//!
//! Features sharing an identity key are resolved by [`Completeness`]: the
//! incoming feature replaces the held one only when it ranks strictly
//! higher. Ties keep what is already there, which makes re-merging the same
//! batch a no-op.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use geoharvest_common::{props, Feature, IdentityKey, IdentityPrecision};
use serde::Serialize;

const PRIORITY_LEN: usize = 11;

/// Optional properties in descending priority. A feature holding an earlier
/// entry outranks one that only holds later entries, all else being equal.
pub const COMPLETENESS_PRIORITY: [&str; PRIORITY_LEN] = [
    props::TITLE,
    props::EXCERPT,
    props::PUBLISHED_AT,
    props::LOCATION_NAME,
    props::LANGUAGE,
    props::CONFIDENCE,
    props::GEO_PRECISION,
    props::IMAGE_URL,
    props::AUTHOR,
    props::ENTITIES,
    props::SENTIMENT,
];

/// Total order used to pick between two features with the same key.
/// Compared field by field: filled count, then the priority mask, then the
/// source's publication time (absent sorts first).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Completeness {
    filled: usize,
    mask: [bool; PRIORITY_LEN],
    published_at: Option<DateTime<Utc>>,
}

impl Completeness {
    pub fn of(feature: &Feature) -> Self {
        let mask = COMPLETENESS_PRIORITY.map(|key| feature.has_prop(key));
        Self {
            filled: mask.iter().filter(|m| **m).count(),
            mask,
            published_at: feature.published_at(),
        }
    }
}

/// Whether `incoming` should replace `existing`.
pub fn supersedes(incoming: &Feature, existing: &Feature) -> bool {
    Completeness::of(incoming).cmp(&Completeness::of(existing)) == Ordering::Greater
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// New keys appended to the collection.
    pub added: usize,
    /// Stored features superseded by a more complete incoming one.
    pub replaced: usize,
    /// Collisions with a stored feature where the stored one was kept.
    pub kept_existing: usize,
    /// Collisions between two features of the same batch.
    pub batch_duplicates: usize,
}

impl MergeReport {
    /// Every key collision that went through the conflict policy.
    pub fn conflicts(&self) -> usize {
        self.replaced + self.kept_existing + self.batch_duplicates
    }

    pub fn changed(&self) -> bool {
        self.added > 0 || self.replaced > 0
    }
}

/// Collapse a batch so each key appears once, earlier elements acting as the
/// held copy. Returns the survivors in first-seen order and the number of
/// collisions.
pub fn dedup_batch(
    batch: Vec<Feature>,
    precision: IdentityPrecision,
) -> (Vec<(IdentityKey, Feature)>, usize) {
    let mut index: HashMap<IdentityKey, usize> = HashMap::new();
    let mut survivors: Vec<(IdentityKey, Feature)> = Vec::with_capacity(batch.len());
    let mut collisions = 0;

    for feature in batch {
        let key = feature.identity_key(precision);
        match index.get(&key) {
            Some(&pos) => {
                collisions += 1;
                if supersedes(&feature, &survivors[pos].1) {
                    survivors[pos].1 = feature;
                }
            }
            None => {
                index.insert(key.clone(), survivors.len());
                survivors.push((key, feature));
            }
        }
    }

    (survivors, collisions)
}

/// Merge `batch` into `existing`. Stored features keep their positions
/// (replacements happen in place); new keys are appended in batch order.
pub fn merge(
    existing: Vec<Feature>,
    batch: Vec<Feature>,
    precision: IdentityPrecision,
) -> (Vec<Feature>, MergeReport) {
    let mut report = MergeReport::default();
    let (incoming, batch_duplicates) = dedup_batch(batch, precision);
    report.batch_duplicates = batch_duplicates;

    let mut features = existing;
    let mut index: HashMap<IdentityKey, usize> = features
        .iter()
        .enumerate()
        .map(|(i, f)| (f.identity_key(precision), i))
        .collect();

    for (key, feature) in incoming {
        match index.get(&key) {
            Some(&pos) => {
                if supersedes(&feature, &features[pos]) {
                    features[pos] = feature;
                    report.replaced += 1;
                } else {
                    report.kept_existing += 1;
                }
            }
            None => {
                index.insert(key, features.len());
                features.push(feature);
                report.added += 1;
            }
        }
    }

    (features, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feature(url: &str, lon: f64, lat: f64, extra: serde_json::Value) -> Feature {
        let mut properties = serde_json::Map::new();
        properties.insert(props::SOURCE_URL.into(), json!(url));
        properties.insert(props::CATEGORY.into(), json!("heritage"));
        if let serde_json::Value::Object(extra) = extra {
            properties.extend(extra);
        }
        Feature::new(lon, lat, properties)
    }

    fn precision() -> IdentityPrecision {
        IdentityPrecision::default()
    }

    #[test]
    fn more_filled_fields_win() {
        let sparse = feature("https://a", 1.0, 2.0, json!({"title": "t"}));
        let rich = feature("https://a", 1.0, 2.0, json!({"title": "t", "excerpt": "e"}));
        assert!(supersedes(&rich, &sparse));
        assert!(!supersedes(&sparse, &rich));
    }

    #[test]
    fn priority_breaks_equal_counts() {
        let with_title = feature("https://a", 1.0, 2.0, json!({"title": "t"}));
        let with_author = feature("https://a", 1.0, 2.0, json!({"author": "a"}));
        assert!(supersedes(&with_title, &with_author));
        assert!(!supersedes(&with_author, &with_title));
    }

    #[test]
    fn newer_publication_breaks_full_ties() {
        let older = feature("https://a", 1.0, 2.0, json!({"published_at": "2024-01-01T00:00:00Z"}));
        let newer = feature("https://a", 1.0, 2.0, json!({"published_at": "2024-02-01T00:00:00Z"}));
        assert!(supersedes(&newer, &older));
        assert!(!supersedes(&older, &newer));
    }

    #[test]
    fn equal_features_do_not_supersede() {
        let a = feature("https://a", 1.0, 2.0, json!({"title": "t", "extracted_at": "2024-01-01T00:00:00Z"}));
        let b = feature("https://a", 1.0, 2.0, json!({"title": "t", "extracted_at": "2025-01-01T00:00:00Z"}));
        assert!(!supersedes(&b, &a), "harvest time does not count");
    }

    #[test]
    fn empty_values_count_as_missing() {
        let blank = feature("https://a", 1.0, 2.0, json!({"title": "", "entities": [], "author": null}));
        let bare = feature("https://a", 1.0, 2.0, json!({}));
        assert_eq!(Completeness::of(&blank), Completeness::of(&bare));
    }

    #[test]
    fn merge_appends_new_and_replaces_in_place() {
        let existing = vec![
            feature("https://a", 1.0, 2.0, json!({"title": "a"})),
            feature("https://b", 3.0, 4.0, json!({"title": "b"})),
        ];
        let batch = vec![
            feature("https://a", 1.0, 2.0, json!({"title": "a", "excerpt": "more"})),
            feature("https://c", 5.0, 6.0, json!({})),
        ];

        let (merged, report) = merge(existing, batch, precision());
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].str_prop("excerpt"), Some("more"));
        assert_eq!(merged[1].str_prop("source_url"), Some("https://b"));
        assert_eq!(merged[2].str_prop("source_url"), Some("https://c"));
        assert_eq!(
            report,
            MergeReport {
                added: 1,
                replaced: 1,
                kept_existing: 0,
                batch_duplicates: 0
            }
        );
        assert!(report.changed());
    }

    #[test]
    fn batch_is_deduplicated_first() {
        let batch = vec![
            feature("https://a", 1.0, 2.0, json!({})),
            feature("https://a", 1.0001, 2.0001, json!({"title": "better"})),
            feature("https://a", 1.0, 2.0, json!({})),
        ];
        let (merged, report) = merge(Vec::new(), batch, precision());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].str_prop("title"), Some("better"));
        assert_eq!(report.batch_duplicates, 2);
        assert_eq!(report.added, 1);
    }

    #[test]
    fn remerge_is_a_noop() {
        let batch = vec![
            feature("https://a", 1.0, 2.0, json!({"title": "a"})),
            feature("https://a", 1.0, 2.0, json!({})),
            feature("https://b", 3.0, 4.0, json!({})),
        ];
        let (first, _) = merge(Vec::new(), batch.clone(), precision());
        let (second, report) = merge(first.clone(), batch, precision());
        assert_eq!(first, second);
        assert!(!report.changed());
        assert_eq!(report.kept_existing, 2);
    }

    #[test]
    fn different_categories_are_different_keys() {
        let mut other = feature("https://a", 1.0, 2.0, json!({}));
        other.properties.insert(props::CATEGORY.into(), json!("fire"));
        let batch = vec![feature("https://a", 1.0, 2.0, json!({})), other];
        let (merged, report) = merge(Vec::new(), batch, precision());
        assert_eq!(merged.len(), 2);
        assert_eq!(report.batch_duplicates, 0);
    }
}
