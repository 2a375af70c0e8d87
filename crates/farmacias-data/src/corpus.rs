//! Commune reference corpus: canonical names and their known spellings.
//!
//! The on-disk shape is the analysis file produced by the offline commune
//! analyzer:
//!
//! ```json
//! {
//!   "communes_data": {
//!     "Quilpué": {
//!       "variations": ["Quilpué", "quilpue", "QUILPUE"],
//!       "statistics": { "total_pharmacies": 24, "turno_pharmacies": 2 }
//!     }
//!   }
//! }
//! ```
//!
//! Any additional top-level keys are ignored. Communes may also carry
//! precomputed sentence embeddings keyed by variation.

use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommuneStats {
    #[serde(default)]
    pub total_pharmacies: usize,
    #[serde(default, alias = "turno_pharmacies")]
    pub duty_pharmacies: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommuneEntry {
    #[serde(default)]
    pub variations: Vec<String>,
    #[serde(default)]
    pub statistics: CommuneStats,
    /// Precomputed embedding per variation string.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub embeddings: BTreeMap<String, Vec<f32>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommuneCorpus {
    #[serde(rename = "communes_data", default)]
    communes: BTreeMap<String, CommuneEntry>,
}

impl CommuneCorpus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(name = "Load commune corpus", level = "info", skip_all)]
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let corpus = Self::from_json_str(&raw)?;
        info!(
            path = ?path.as_ref().file_name(),
            communes = corpus.len(),
            "Loaded commune corpus"
        );
        Ok(corpus)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let mut corpus: Self = serde_json::from_str(raw)?;
        corpus.communes.retain(|name, _| !name.trim().is_empty());
        Ok(corpus)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Builds a corpus from bare commune names, generating spelling
    /// variations for each.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut corpus = Self::new();
        corpus.merge_names(names);
        corpus
    }

    /// Adds any name not yet known. A name is known when its folded form
    /// (no accents, case or punctuation) equals that of an existing commune
    /// or one of its variations, so "QUILPUE" never shadows "Quilpué".
    /// Existing entries are left untouched. Returns how many communes were
    /// added.
    pub fn merge_names<I, S>(&mut self, names: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut known = self
            .communes
            .iter()
            .flat_map(|(name, entry)| std::iter::once(name).chain(&entry.variations))
            .map(|v| fold(v))
            .collect::<HashSet<_>>();

        let mut added = 0;
        for name in names {
            let name = name.as_ref().trim();
            let key = fold(name);
            if key.is_empty() || known.contains(&key) {
                continue;
            }
            let variations = derive_variations(name);
            known.extend(variations.iter().map(|v| fold(v)));
            known.insert(key);
            self.communes.insert(
                name.to_owned(),
                CommuneEntry {
                    variations,
                    ..Default::default()
                },
            );
            added += 1;
        }
        added
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: CommuneEntry) {
        self.communes.insert(name.into(), entry);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CommuneEntry> {
        self.communes.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CommuneEntry)> {
        self.communes.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.communes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.communes.is_empty()
    }
}

/// Comparison key for commune names: accents, case and punctuation
/// removed, surrounding whitespace trimmed.
fn fold(name: &str) -> String {
    name.nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .trim()
        .to_owned()
}

/// Spellings a user is likely to type for `name`: as given, lower, upper,
/// title case, and each of those without accents.
#[must_use]
pub fn derive_variations(name: &str) -> Vec<String> {
    let name = name.trim();
    let title = name
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect()
            })
        })
        .join(" ");

    [name.to_owned(), name.to_lowercase(), name.to_uppercase(), title]
        .into_iter()
        .flat_map(|v| {
            let plain = v.nfd().filter(|c| !is_combining_mark(*c)).collect::<String>();
            [v, plain]
        })
        .unique()
        .collect()
}
