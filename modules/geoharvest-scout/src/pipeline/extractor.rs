// Location and entity extraction from normalized items.
//
// The built-in `pattern` model reads place names from adapter hints first
// (feed author/category terms, wiki article titles), then from
// prepositional phrases in the text ("in Madrid", "near Lake Como").
// Entities are capitalized phrases; sentiment comes from a small lexicon.

use std::collections::HashSet;
use std::sync::LazyLock;

use geoharvest_common::config::NlpConfig;
use geoharvest_common::RawItem;
use regex::Regex;

/// What the NLP pass found in one item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    /// Place names in the order they should be geocoded.
    pub locations: Vec<String>,
    pub entities: Vec<String>,
    /// In `-1.0..=1.0`; `None` when no sentiment-bearing words were seen.
    pub sentiment: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("Unknown NLP model: {0}")]
    UnknownModel(String),

    #[error("Invalid location pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Extraction failed: {0}")]
    Failed(String),
}

/// Text in, locations and metadata out. Must be deterministic for a given
/// model so re-runs produce the same candidates.
pub trait LocationExtractor: Send + Sync {
    fn model(&self) -> &str;

    fn extract(&self, item: &RawItem) -> Result<Extraction, ExtractError>;
}

/// Build the extractor named in the config.
pub fn extractor_from_config(config: &NlpConfig) -> Result<PatternExtractor, ExtractError> {
    match config.model.as_str() {
        "pattern" => PatternExtractor::new(&config.prepositions),
        other => Err(ExtractError::UnknownModel(other.to_string())),
    }
}

const MAX_ENTITIES: usize = 10;

static CAPITALIZED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\p{Lu}[\p{L}'\-]+(?:\s+\p{Lu}[\p{L}'\-]+)+").expect("valid regex")
});

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\p{L}+").expect("valid regex"));

/// Capitalized words that follow a preposition but never name a place.
const NOT_PLACES: &[&str] = &[
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december", "monday", "tuesday", "wednesday", "thursday", "friday",
    "saturday", "sunday", "the", "this", "that", "a", "an", "his", "her", "their", "our",
];

const POSITIVE: &[&str] = &[
    "celebrate", "celebrated", "celebration", "restored", "reopened", "honored", "award",
    "success", "successful", "charity", "donation", "donated", "welcome", "festival", "anniversary",
];

const NEGATIVE: &[&str] = &[
    "attack", "attacked", "vandalized", "vandalism", "fire", "destroyed", "demolished",
    "demolition", "closed", "arrest", "arrested", "protest", "scandal", "theft", "stolen",
];

pub struct PatternExtractor {
    location_re: Regex,
}

impl PatternExtractor {
    pub fn new(prepositions: &[String]) -> Result<Self, ExtractError> {
        let alternatives: Vec<String> = prepositions
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(regex::escape)
            .collect();
        if alternatives.is_empty() {
            return Err(ExtractError::Failed("no location prepositions configured".into()));
        }
        let pattern = format!(
            r"\b(?i:{})\s+(\p{{Lu}}[\p{{L}}'\-]+(?:\s+\p{{Lu}}[\p{{L}}'\-]+)*)",
            alternatives.join("|")
        );
        Ok(Self {
            location_re: Regex::new(&pattern)?,
        })
    }

    /// Place names after a preposition, in text order.
    pub fn locations_in(&self, text: &str) -> Vec<String> {
        self.location_re
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|name| !NOT_PLACES.contains(&name.to_lowercase().as_str()))
            .collect()
    }
}

impl LocationExtractor for PatternExtractor {
    fn model(&self) -> &str {
        "pattern"
    }

    fn extract(&self, item: &RawItem) -> Result<Extraction, ExtractError> {
        let text = item.full_text();

        let mut seen = HashSet::new();
        let locations: Vec<String> = item
            .location_hints
            .iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .chain(self.locations_in(&text))
            .filter(|l| seen.insert(l.to_lowercase()))
            .collect();

        Ok(Extraction {
            locations,
            entities: entities(&text),
            sentiment: sentiment(&text),
        })
    }
}

/// Multi-word capitalized phrases, deduplicated, first `MAX_ENTITIES`.
pub fn entities(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    CAPITALIZED_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|e| seen.insert(e.clone()))
        .take(MAX_ENTITIES)
        .collect()
}

/// Lexicon score: (positive - negative) / (positive + negative).
pub fn sentiment(text: &str) -> Option<f64> {
    let (mut pos, mut neg) = (0u32, 0u32);
    for word in WORD_RE.find_iter(text) {
        let word = word.as_str().to_lowercase();
        if POSITIVE.contains(&word.as_str()) {
            pos += 1;
        } else if NEGATIVE.contains(&word.as_str()) {
            neg += 1;
        }
    }
    let total = pos + neg;
    (total > 0).then(|| (pos as f64 - neg as f64) / total as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoharvest_common::SourceKind;

    fn extractor() -> PatternExtractor {
        extractor_from_config(&NlpConfig::default()).unwrap()
    }

    fn item(title: &str, text: &str, hints: &[&str]) -> RawItem {
        RawItem {
            source_url: "https://example.com/a".into(),
            kind: SourceKind::Feed,
            source_label: "test".into(),
            title: Some(title.into()),
            text: text.into(),
            published_at: None,
            language: None,
            location_hints: hints.iter().map(|h| h.to_string()).collect(),
            image_url: None,
            author: None,
            category: None,
        }
    }

    #[test]
    fn finds_prepositional_places() {
        let e = extractor();
        assert_eq!(
            e.locations_in("A lodge in Buenos Aires reopened near Lake Como yesterday"),
            vec!["Buenos Aires".to_string(), "Lake Como".to_string()]
        );
    }

    #[test]
    fn skips_months_and_lowercase() {
        let e = extractor();
        assert!(e.locations_in("It happened in January at night").is_empty());
        assert!(e.locations_in("in the town square").is_empty());
    }

    #[test]
    fn hints_come_before_text_and_dedupe() {
        let item = item("Fire at Porto lodge", "The hall in Porto burned.", &["Porto", "Portugal"]);
        let extraction = extractor().extract(&item).unwrap();
        assert_eq!(extraction.locations, vec!["Porto".to_string(), "Portugal".to_string()]);
    }

    #[test]
    fn non_latin_prepositions() {
        let e = extractor();
        assert_eq!(e.locations_in("Une loge à Lyon"), vec!["Lyon".to_string()]);
        assert_eq!(e.locations_in("Eine Loge bei München"), vec!["München".to_string()]);
    }

    #[test]
    fn unknown_model_is_rejected() {
        let config = NlpConfig {
            model: "spacy-xl".into(),
            ..NlpConfig::default()
        };
        assert!(matches!(
            extractor_from_config(&config),
            Err(ExtractError::UnknownModel(_))
        ));
    }

    #[test]
    fn sentiment_from_lexicon() {
        assert_eq!(sentiment("The lodge was restored and reopened"), Some(1.0));
        assert_eq!(sentiment("Vandalism and fire"), Some(-1.0));
        assert_eq!(sentiment("A quiet day"), None);
    }

    #[test]
    fn entities_are_capitalized_phrases() {
        assert_eq!(
            entities("Members of the Grand Lodge met at Edinburgh Castle with Grand Lodge officers"),
            vec!["Grand Lodge".to_string(), "Edinburgh Castle".to_string()]
        );
    }
}
