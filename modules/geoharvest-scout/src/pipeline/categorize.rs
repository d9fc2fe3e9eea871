use geoharvest_common::config::CategoryRule;
use geoharvest_common::identity::{normalize_category, UNCATEGORIZED};
use geoharvest_common::RawItem;

/// Assigns a category from keyword rules. The first rule with a keyword in
/// the item's title or text wins; otherwise the source's own category,
/// otherwise `uncategorized`. Output is already normalized.
#[derive(Debug, Clone, Default)]
pub struct Categorizer {
    rules: Vec<(String, Vec<String>)>,
}

impl Categorizer {
    pub fn new(rules: &[CategoryRule]) -> Self {
        Self {
            rules: rules
                .iter()
                .map(|r| {
                    let keywords = r
                        .keywords
                        .iter()
                        .map(|k| k.trim().to_lowercase())
                        .filter(|k| !k.is_empty())
                        .collect();
                    (normalize_category(&r.name), keywords)
                })
                .collect(),
        }
    }

    pub fn categorize(&self, item: &RawItem) -> String {
        let haystack = item.full_text().to_lowercase();
        self.rules
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| haystack.contains(k.as_str())))
            .map(|(name, _)| name.clone())
            .or_else(|| item.category.as_deref().map(normalize_category))
            .unwrap_or_else(|| UNCATEGORIZED.to_string())
    }
}
