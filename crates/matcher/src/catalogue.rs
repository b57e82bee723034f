//! Stage 1's intent catalogue and stage 2's synonym dictionary, both loaded
//! from content files at [`crate::MatcherStack`] construction (§4.H;
//! hot-reload is explicitly out of scope — a reload takes a restart).

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::normalize::{fold_diacritics, tokenize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentEntry {
    pub intent_id: String,
    pub keywords: Vec<String>,
    pub reply_template: String,
    #[serde(default)]
    pub threshold: Option<f32>,
}

impl IntentEntry {
    fn keyword_tokens(&self) -> Vec<String> {
        self.keywords.iter().flat_map(|kw| tokenize(kw)).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalogue {
    pub intents: Vec<IntentEntry>,
}

impl Catalogue {
    /// Load a catalogue from a `serde_json` content file (§4.H).
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }
}

/// A synonym dictionary: canonical term → alternate spellings/synonyms.
/// Expansion is symmetric — looking up any member of a group returns the
/// whole group, canonical term included.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynonymDictionary {
    groups: Vec<Vec<String>>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl SynonymDictionary {
    /// Load a synonym dictionary from a `serde_json` content file. Entries
    /// are Turkish-normalized (case-folded and diacritic-folded) at load
    /// time so lookups at query time need only do the same.
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        let mut dict: Self = serde_json::from_str(content)?;
        dict.rebuild_index();
        Ok(dict)
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (group_idx, group) in self.groups.iter().enumerate() {
            for term in group {
                self.index.insert(fold_diacritics(term), group_idx);
            }
        }
    }

    /// Every canonical/synonym form sharing a group with `token`, folded the
    /// same way lookups are folded (diacritics only, per §4.H).
    #[must_use]
    pub fn expand(&self, token: &str) -> HashSet<String> {
        let folded = fold_diacritics(token);
        match self.index.get(&folded) {
            Some(&group_idx) => self.groups[group_idx].iter().map(|t| fold_diacritics(t)).collect(),
            None => [folded].into_iter().collect(),
        }
    }

    /// Expand every token in `tokens`, unioning all resulting groups.
    #[must_use]
    pub fn expand_all(&self, tokens: &[String]) -> HashSet<String> {
        tokens.iter().flat_map(|token| self.expand(token)).collect()
    }
}

#[must_use]
pub(crate) fn keyword_token_set(entry: &IntentEntry) -> HashSet<String> {
    entry.keyword_tokens().into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_parses_from_json() {
        let json = r#"{"intents":[{"intent_id":"greeting","keywords":["hello","hi"],"reply_template":"Hi there!"}]}"#;
        let catalogue = Catalogue::from_json(json).unwrap();
        assert_eq!(catalogue.intents.len(), 1);
        assert_eq!(catalogue.intents[0].intent_id, "greeting");
    }

    #[test]
    fn synonym_expansion_is_symmetric_and_diacritic_folded() {
        let json = r#"{"groups":[["çalışma saati","mesai"]]}"#;
        let dict = SynonymDictionary::from_json(json).unwrap();
        let expanded = dict.expand("mesai");
        assert!(expanded.contains("calisma saati"));
        assert!(expanded.contains("mesai"));
    }

    #[test]
    fn unknown_token_expands_to_itself() {
        let dict = SynonymDictionary::from_json(r#"{"groups":[]}"#).unwrap();
        let expanded = dict.expand("merhaba");
        assert_eq!(expanded, ["merhaba".to_string()].into_iter().collect());
    }
}
