//! Aegis Full-Text Index
//!
//! Token index over the name and description of a resource. Each entry
//! is a `(token, primary key)` pair with no value, so a keyword lookup is
//! a prefix scan on the token and membership checks are point lookups.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use super::SecondaryIndex;
use crate::model::Resource;
use crate::store::StoreCore;
use aegis_common::{FullTextConfig, Result};
use aegis_storage::SortedMap;
use std::collections::BTreeSet;
use std::ops::Bound;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it", "no",
    "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these", "they", "this",
    "to", "was", "will", "with",
];

// =============================================================================
// Text Analyzer
// =============================================================================

/// Turns free text into the normalized tokens stored in the index.
#[derive(Debug, Clone)]
pub struct TextAnalyzer {
    config: FullTextConfig,
}

impl TextAnalyzer {
    pub fn new(config: FullTextConfig) -> Self {
        Self { config }
    }

    pub fn tokens(&self, text: &str) -> BTreeSet<String> {
        let mut tokens = BTreeSet::new();
        for raw in text.split(|c: char| !(c.is_alphanumeric() || c == '\'')) {
            if let Some(token) = self.normalize(raw) {
                tokens.insert(token);
            }
        }
        tokens
    }

    fn normalize(&self, raw: &str) -> Option<String> {
        let mut token = raw.to_lowercase();
        if let Some(stripped) = token.strip_suffix("'s") {
            token = stripped.to_string();
        }
        let token: String = token
            .chars()
            .filter(|c| *c != '\'')
            .skip_while(|c| c.is_ascii_digit())
            .collect();

        if token.is_empty() || token.chars().count() < self.config.min_token_len {
            return None;
        }
        if self.config.stop_words && STOP_WORDS.contains(&token.as_str()) {
            return None;
        }
        Some(stem(&token))
    }
}

impl Default for TextAnalyzer {
    fn default() -> Self {
        Self::new(FullTextConfig::default())
    }
}

/// Minimal English plural stemmer.
fn stem(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let len = chars.len();
    if len < 3 || chars[len - 1] != 's' {
        return token.to_string();
    }

    match chars[len - 2] {
        'u' | 's' => token.to_string(),
        'e' => {
            if len > 3 && chars[len - 3] == 'i' && chars[len - 4] != 'a' && chars[len - 4] != 'e' {
                let mut stemmed: String = chars[..len - 3].iter().collect();
                stemmed.push('y');
                stemmed
            } else if matches!(chars[len - 3], 'i' | 'a' | 'o' | 'e') {
                token.to_string()
            } else {
                chars[..len - 1].iter().collect()
            }
        }
        _ => chars[..len - 1].iter().collect(),
    }
}

// =============================================================================
// Full-Text Index
// =============================================================================

pub struct FullTextIndex {
    name: String,
    analyzer: TextAnalyzer,
    map: SortedMap<(String, Vec<u8>), ()>,
}

impl FullTextIndex {
    pub fn open(core: &StoreCore, role: &str) -> Self {
        Self {
            name: core.map_name(role),
            analyzer: TextAnalyzer::new(core.settings().fulltext.clone()),
            map: core.open_map(role),
        }
    }

    pub fn analyzer(&self) -> &TextAnalyzer {
        &self.analyzer
    }

    pub fn len(&self) -> u64 {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn resource_tokens<V: Resource>(&self, value: &V) -> BTreeSet<String> {
        let mut tokens = self.analyzer.tokens(value.name());
        if let Some(description) = value.description() {
            tokens.extend(self.analyzer.tokens(description));
        }
        tokens
    }

    fn keyword_tokens(&self, keywords: &[String]) -> BTreeSet<String> {
        keywords.iter().flat_map(|k| self.analyzer.tokens(k)).collect()
    }

    /// Primary keys of resources matching any of `keywords`.
    pub fn select_keys(&self, keywords: &[String]) -> Result<BTreeSet<Vec<u8>>> {
        let mut keys = BTreeSet::new();
        for token in self.keyword_tokens(keywords) {
            let lower = (token.clone(), Vec::new());
            let upper = (format!("{}\0", token), Vec::new());
            for key in self.map.key_range(Bound::Included(&lower), Bound::Excluded(&upper)) {
                keys.insert(key?.1);
            }
        }
        Ok(keys)
    }

    /// True if the resource stored at `primary_key` matches any keyword.
    pub fn contains_any(&self, primary_key: &[u8], keywords: &[String]) -> bool {
        self.keyword_tokens(keywords)
            .into_iter()
            .any(|token| self.map.contains_key(&(token, primary_key.to_vec())))
    }
}

impl<V: Resource> SecondaryIndex<V> for FullTextIndex {
    fn name(&self) -> &str {
        &self.name
    }

    fn add(&self, primary_key: &[u8], value: &V) -> Result<()> {
        for token in self.resource_tokens(value) {
            self.map.put(&(token, primary_key.to_vec()), &())?;
        }
        Ok(())
    }

    fn remove(&self, primary_key: &[u8], value: &V) -> Result<()> {
        for token in self.resource_tokens(value) {
            self.map.delete(&(token, primary_key.to_vec()))?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.map.clear()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FeatureDesc;
    use crate::store::StoreKind;
    use aegis_common::HistorianConfig;
    use aegis_storage::MapStore;

    #[test]
    fn test_analyzer() {
        let analyzer = TextAnalyzer::default();
        let tokens = analyzer.tokens("The Weather Station's 3rd Batteries, and buses");
        let expected: BTreeSet<String> = ["weather", "station", "rd", "battery", "buse"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn test_stemmer() {
        assert_eq!(stem("sensors"), "sensor");
        assert_eq!(stem("queries"), "query");
        assert_eq!(stem("series"), "sery");
        assert_eq!(stem("toes"), "toes");
        assert_eq!(stem("status"), "status");
        assert_eq!(stem("glass"), "glass");
        assert_eq!(stem("is"), "is");
    }

    #[test]
    fn test_keyword_lookup() {
        let engine = MapStore::in_memory();
        let core = StoreCore::open(&engine, "text", "@feature", StoreKind::Entities, &HistorianConfig::default())
            .expect("open should succeed");
        let index = FullTextIndex::open(&core, "_text");

        let buoy = FeatureDesc::new("urn:buoy", "Ocean buoy").with_description("Measures waves");
        let mast = FeatureDesc::new("urn:mast", "Weather mast");
        core.atomically("index", || {
            SecondaryIndex::add(&index, b"buoy", &buoy)?;
            SecondaryIndex::add(&index, b"mast", &mast)
        })
        .expect("add should succeed");

        let keys = index.select_keys(&["wave".to_string()]).expect("query should succeed");
        assert_eq!(keys, [b"buoy".to_vec()].into_iter().collect());

        let keys = index
            .select_keys(&["weather".to_string(), "ocean".to_string()])
            .expect("query should succeed");
        assert_eq!(keys.len(), 2);
        assert!(index.contains_any(b"mast", &["Weather".to_string()]));

        core.atomically("index", || SecondaryIndex::remove(&index, b"buoy", &buoy))
            .expect("remove should succeed");
        assert!(index.select_keys(&["ocean".to_string()]).expect("query").is_empty());
    }
}
