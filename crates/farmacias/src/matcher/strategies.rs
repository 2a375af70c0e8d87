//! The stages of the matching cascade.
//!
//! Each stage ranks communes for a prepared query. The cascade accepts the
//! first stage whose best score clears that stage's threshold.

use std::{fmt, sync::Arc};

use once_cell::sync::OnceCell;
use rapidfuzz::fuzz;
use rayon::prelude::*;
use tracing::{debug, warn};

use super::{
    MatchMethod,
    embedding::{Embedder, VariationEmbeddings},
};
use crate::{
    config::MatchThresholds,
    index::CommuneIndex,
    normalize::{jaccard, trigrams},
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ScoredCommune {
    pub id: usize,
    pub score: f64,
}

/// Best score first, then corpus order.
fn sort_scored(scored: &mut [ScoredCommune]) {
    scored.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.id.cmp(&b.id)));
}

/// A query plus the per-request work several stages share.
#[derive(Debug)]
pub(crate) struct PreparedQuery<'q> {
    pub raw: &'q str,
    pub normalized: String,
    fuzzy: OnceCell<Vec<ScoredCommune>>,
}

impl<'q> PreparedQuery<'q> {
    pub(crate) fn new(raw: &'q str, normalized: String) -> Self {
        Self {
            raw,
            normalized,
            fuzzy: OnceCell::new(),
        }
    }

    /// Fuzzy score of every commune scoring above zero, best first.
    /// Computed once and shared by the high and low confidence stages.
    pub(crate) fn fuzzy_scores(&self, index: &CommuneIndex, bonus: f64) -> &[ScoredCommune] {
        self.fuzzy.get_or_init(|| {
            let query = self.normalized.as_str();
            let mut scored = (0..index.len())
                .into_par_iter()
                .filter_map(|id| {
                    index
                        .normalized_variations(id)
                        .iter()
                        .map(|variation| fuzzy_score(query, variation, bonus))
                        .max_by(f64::total_cmp)
                        .filter(|score| *score > 0.0)
                        .map(|score| ScoredCommune { id, score })
                })
                .collect::<Vec<_>>();
            sort_scored(&mut scored);
            scored
        })
    }
}

/// Edit-distance similarity in [0, 1], plus `bonus` when one string
/// contains the other.
pub(crate) fn fuzzy_score(query: &str, variation: &str, bonus: f64) -> f64 {
    let ratio = fuzz::ratio(query.chars(), variation.chars());
    if query.contains(variation) || variation.contains(query) {
        ratio + bonus
    } else {
        ratio
    }
}

pub(crate) trait MatchStrategy: fmt::Debug + Send + Sync {
    fn method(&self) -> MatchMethod;

    /// Minimum best score for the stage to answer.
    fn threshold(&self) -> f64;

    /// Candidates reported after the winner (or in total, for stages that
    /// do not commit).
    fn suggestion_count(&self) -> usize;

    /// Whether an accepted answer confirms a commune or only suggests.
    fn commits(&self) -> bool {
        true
    }

    /// Candidate communes, best first. Scores are positive.
    fn rank(&self, index: &CommuneIndex, query: &PreparedQuery<'_>) -> Vec<ScoredCommune>;
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ExactStrategy;

impl MatchStrategy for ExactStrategy {
    fn method(&self) -> MatchMethod {
        MatchMethod::Exact
    }

    fn threshold(&self) -> f64 {
        1.0
    }

    fn suggestion_count(&self) -> usize {
        0
    }

    fn rank(&self, index: &CommuneIndex, query: &PreparedQuery<'_>) -> Vec<ScoredCommune> {
        index
            .exact(query.raw, &query.normalized)
            .map(|id| ScoredCommune { id, score: 1.0 })
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FuzzyStrategy {
    threshold: f64,
    floor: f64,
    bonus: f64,
    suggestions: usize,
    commits: bool,
}

impl FuzzyStrategy {
    pub(crate) const fn high(t: &MatchThresholds) -> Self {
        Self {
            threshold: t.fuzzy_high,
            floor: t.fuzzy_candidate_floor,
            bonus: t.substring_bonus,
            suggestions: t.fuzzy_high_suggestions,
            commits: true,
        }
    }

    pub(crate) const fn low(t: &MatchThresholds) -> Self {
        Self {
            threshold: t.fuzzy_low,
            floor: t.fuzzy_low,
            bonus: t.substring_bonus,
            suggestions: t.fuzzy_low_suggestions,
            commits: false,
        }
    }
}

impl MatchStrategy for FuzzyStrategy {
    fn method(&self) -> MatchMethod {
        if self.commits {
            MatchMethod::FuzzyHigh
        } else {
            MatchMethod::FuzzyLow
        }
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn suggestion_count(&self) -> usize {
        self.suggestions
    }

    fn commits(&self) -> bool {
        self.commits
    }

    fn rank(&self, index: &CommuneIndex, query: &PreparedQuery<'_>) -> Vec<ScoredCommune> {
        query
            .fuzzy_scores(index, self.bonus)
            .iter()
            .take_while(|c| c.score + super::SCORE_EPSILON >= self.floor)
            .copied()
            .collect()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct TrigramStrategy {
    threshold: f64,
    top_k: usize,
    suggestions: usize,
}

impl TrigramStrategy {
    pub(crate) const fn new(t: &MatchThresholds) -> Self {
        Self {
            threshold: t.trigram,
            top_k: t.trigram_top_k,
            suggestions: t.trigram_suggestions,
        }
    }
}

impl MatchStrategy for TrigramStrategy {
    fn method(&self) -> MatchMethod {
        MatchMethod::Trigram
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn suggestion_count(&self) -> usize {
        self.suggestions
    }

    fn rank(&self, index: &CommuneIndex, query: &PreparedQuery<'_>) -> Vec<ScoredCommune> {
        let grams = trigrams(&query.normalized);
        let candidates = index.trigram_candidates(&grams);
        let mut scored = candidates
            .iter()
            .filter_map(|&id| {
                let score = jaccard(&grams, index.shingles(id)?);
                (score > 0.0).then_some(ScoredCommune { id, score })
            })
            .collect::<Vec<_>>();
        sort_scored(&mut scored);
        scored.truncate(self.top_k);
        debug!(
            candidates = candidates.len(),
            best = scored.first().map(|c| c.score),
            "Trigram stage scored"
        );
        scored
    }
}

#[derive(Debug, Clone)]
pub(crate) struct EmbeddingStrategy {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<VariationEmbeddings>,
    threshold: f64,
    top_k: usize,
    suggestions: usize,
}

impl EmbeddingStrategy {
    pub(crate) fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<VariationEmbeddings>,
        t: &MatchThresholds,
    ) -> Self {
        Self {
            embedder,
            vectors,
            threshold: t.embedding,
            top_k: t.embedding_top_k,
            suggestions: t.embedding_suggestions,
        }
    }
}

impl MatchStrategy for EmbeddingStrategy {
    fn method(&self) -> MatchMethod {
        MatchMethod::Embedding
    }

    fn threshold(&self) -> f64 {
        self.threshold
    }

    fn suggestion_count(&self) -> usize {
        self.suggestions
    }

    fn rank(&self, _index: &CommuneIndex, query: &PreparedQuery<'_>) -> Vec<ScoredCommune> {
        let encoded = match self.embedder.embed(&[query.normalized.as_str()]) {
            Ok(mut vectors) if vectors.len() == 1 => vectors.remove(0),
            Ok(vectors) => {
                warn!(got = vectors.len(), "Embedder returned unexpected batch, skipping stage");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "Query embedding failed, skipping stage");
                return Vec::new();
            }
        };
        let mut scored = self
            .vectors
            .best_per_commune(&encoded)
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .map(|(id, score)| ScoredCommune { id, score })
            .collect::<Vec<_>>();
        sort_scored(&mut scored);
        scored.truncate(self.top_k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use farmacias_data::test_data::sample_corpus;

    use super::*;
    use crate::normalize::normalize;

    fn prepared(raw: &str) -> PreparedQuery<'_> {
        PreparedQuery::new(raw, normalize(raw))
    }

    #[test]
    fn test_fuzzy_score_substring_bonus() {
        let plain = fuzzy_score("villa", "villa alemana", 0.0);
        let boosted = fuzzy_score("villa", "villa alemana", 0.2);
        assert!((boosted - plain - 0.2).abs() < 1e-9);
        assert!(fuzzy_score("villa", "villa", 0.2) > 1.0);
    }

    #[test]
    fn test_fuzzy_scores_are_cached_and_sorted() {
        let index = CommuneIndex::build(&sample_corpus());
        let query = prepared("quilpue");
        let first = query.fuzzy_scores(&index, 0.2).as_ptr();
        let scores = query.fuzzy_scores(&index, 0.2);
        assert_eq!(first, scores.as_ptr());
        assert!(scores.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(scores.iter().all(|c| c.score > 0.0));
    }

    #[test]
    fn test_trigram_rank_kilpue() {
        let index = CommuneIndex::build(&sample_corpus());
        let stage = TrigramStrategy::new(&MatchThresholds::default());
        let ranked = stage.rank(&index, &prepared("kilpue"));
        let best = ranked.first().unwrap();
        assert_eq!(index.commune(best.id).unwrap().name, "Quilpué");
        assert!((best.score - 4.0 / 9.0).abs() < 1e-9);
        assert!(ranked.len() <= 10);
    }

    #[test]
    fn test_exact_rank() {
        let index = CommuneIndex::build(&sample_corpus());
        let ranked = ExactStrategy.rank(&index, &prepared("santiago"));
        assert_eq!(ranked.len(), 1);
        assert!(ExactStrategy.rank(&index, &prepared("stgo centro")).is_empty());
    }
}
