//! Commune name resolution.
//!
//! [`CommuneMatcher`] turns free text into a commune through a cascade of
//! increasingly permissive strategies:
//!
//! 1. exact spelling (verbatim or normalized)
//! 2. high-confidence fuzzy similarity
//! 3. sentence embeddings, when an [`Embedder`] is configured
//! 4. trigram overlap
//! 5. low-confidence fuzzy similarity, which only suggests
//!
//! The first stage whose best candidate clears its threshold answers.
//! Matching never fails: unresolved queries come back as a [`MatchResult`]
//! with an empty commune and, when possible, suggestions.

use std::{fmt, sync::Arc};

use farmacias_data::CommuneCorpus;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

mod embedding;
mod strategies;

pub use embedding::{Embedder, cosine_similarity};
use embedding::VariationEmbeddings;
use strategies::{
    EmbeddingStrategy, ExactStrategy, FuzzyStrategy, MatchStrategy, PreparedQuery, TrigramStrategy,
};

use crate::{
    config::MatchThresholds,
    index::{Commune, CommuneIndex},
    normalize::normalize,
};

/// Tolerance for threshold comparisons, so a score sitting exactly on a
/// threshold is accepted despite floating point noise.
pub(crate) const SCORE_EPSILON: f64 = 1e-9;

/// Upper bound for the confidence of any non-exact match. Keeps a perfect
/// 1.0 reserved for exact matches.
const NON_EXACT_CONFIDENCE_CEILING: f64 = 0.99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Exact,
    FuzzyHigh,
    Embedding,
    Trigram,
    FuzzyLow,
    NoMatch,
    Error,
}

impl MatchMethod {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::FuzzyHigh => "fuzzy_high",
            Self::Embedding => "embedding",
            Self::Trigram => "trigram",
            Self::FuzzyLow => "fuzzy_low",
            Self::NoMatch => "no_match",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one matching attempt.
///
/// `confidence` is 1.0 exactly when `method` is [`MatchMethod::Exact`].
/// `matched_commune` is empty for [`MatchMethod::FuzzyLow`],
/// [`MatchMethod::NoMatch`] and [`MatchMethod::Error`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub query: String,
    pub normalized_query: String,
    pub matched_commune: String,
    pub confidence: f64,
    pub method: MatchMethod,
    /// Alternative communes, best first, at most five.
    pub suggestions: Vec<String>,
}

impl MatchResult {
    fn unresolved(query: &str, normalized: String, method: MatchMethod) -> Self {
        Self {
            query: query.to_owned(),
            normalized_query: normalized,
            matched_commune: String::new(),
            confidence: 0.0,
            method,
            suggestions: Vec::new(),
        }
    }

    /// Whether a commune was confirmed.
    #[must_use]
    pub fn is_match(&self) -> bool {
        !self.matched_commune.is_empty()
    }
}

/// Resolves free-text commune names against a [`CommuneIndex`].
#[derive(Debug)]
pub struct CommuneMatcher {
    index: CommuneIndex,
    cascade: Vec<Box<dyn MatchStrategy>>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl CommuneMatcher {
    /// Matcher without the embedding stage.
    pub fn new(index: CommuneIndex, thresholds: &MatchThresholds) -> Self {
        let cascade = Self::cascade(thresholds, None);
        Self {
            index,
            cascade,
            embedder: None,
        }
    }

    /// Matcher with the embedding stage. Variation vectors are taken from
    /// `corpus` when present and encoded with `embedder` otherwise. When the
    /// corpus cannot be encoded the stage is left out and the matcher works
    /// as [`Self::new`].
    #[instrument(name = "Build semantic commune matcher", level = "info", skip_all)]
    pub fn with_embedder(
        index: CommuneIndex,
        corpus: &CommuneCorpus,
        thresholds: &MatchThresholds,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let vectors = match VariationEmbeddings::compute(&index, corpus, embedder.as_ref()) {
            Ok(vectors) => Arc::new(vectors),
            Err(e) => {
                warn!(
                    model = embedder.model_name(),
                    error = %e,
                    "Embedding model unavailable, semantic stage disabled"
                );
                return Self::new(index, thresholds);
            }
        };
        let stage = EmbeddingStrategy::new(Arc::clone(&embedder), vectors, thresholds);
        let cascade = Self::cascade(thresholds, Some(stage));
        info!(model = embedder.model_name(), "Embedding stage enabled");
        Self {
            index,
            cascade,
            embedder: Some(embedder),
        }
    }

    fn cascade(
        thresholds: &MatchThresholds,
        embedding: Option<EmbeddingStrategy>,
    ) -> Vec<Box<dyn MatchStrategy>> {
        let mut cascade: Vec<Box<dyn MatchStrategy>> = vec![
            Box::new(ExactStrategy),
            Box::new(FuzzyStrategy::high(thresholds)),
        ];
        if let Some(stage) = embedding {
            cascade.push(Box::new(stage));
        }
        cascade.push(Box::new(TrigramStrategy::new(thresholds)));
        cascade.push(Box::new(FuzzyStrategy::low(thresholds)));
        cascade
    }

    #[instrument(name = "Match commune", level = "debug", skip(self))]
    pub fn match_commune(&self, query: &str) -> MatchResult {
        let normalized = normalize(query);
        if normalized.is_empty() {
            debug!("Empty commune query");
            return MatchResult::unresolved(query, normalized, MatchMethod::Error);
        }

        let prepared = PreparedQuery::new(query, normalized);
        for stage in &self.cascade {
            let ranked = stage.rank(&self.index, &prepared);
            let Some(best) = ranked.first() else {
                continue;
            };
            if best.score + SCORE_EPSILON < stage.threshold() {
                debug!(
                    method = %stage.method(),
                    best = best.score,
                    threshold = stage.threshold(),
                    "Stage below threshold"
                );
                continue;
            }

            let mut names = ranked
                .iter()
                .filter_map(|c| self.index.commune(c.id))
                .map(|c| c.name.clone());
            let method = stage.method();
            let confidence = if method == MatchMethod::Exact {
                1.0
            } else {
                best.score.min(NON_EXACT_CONFIDENCE_CEILING)
            };
            let matched_commune = if stage.commits() {
                names.next().unwrap_or_default()
            } else {
                String::new()
            };

            let result = MatchResult {
                query: query.to_owned(),
                normalized_query: prepared.normalized,
                matched_commune,
                confidence,
                method,
                suggestions: names.take(stage.suggestion_count()).collect(),
            };
            debug!(
                method = %result.method,
                commune = %result.matched_commune,
                confidence = result.confidence,
                "Commune query resolved"
            );
            return result;
        }

        MatchResult::unresolved(query, prepared.normalized, MatchMethod::NoMatch)
    }

    /// The indexed record for a canonical commune name.
    #[must_use]
    pub fn commune_info(&self, name: &str) -> Option<&Commune> {
        self.index.find(name)
    }

    #[must_use]
    pub const fn has_embeddings(&self) -> bool {
        self.embedder.is_some()
    }

    #[must_use]
    pub const fn index(&self) -> &CommuneIndex {
        &self.index
    }

    /// Names of the stages in evaluation order.
    #[must_use]
    pub fn stages(&self) -> Vec<MatchMethod> {
        self.cascade.iter().map(|s| s.method()).collect()
    }
}
