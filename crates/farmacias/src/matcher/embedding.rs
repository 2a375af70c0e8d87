//! Optional sentence-embedding capability.
//!
//! No model ships with the engine. Callers that have one wrap it in an
//! [`Embedder`] and hand it to the finder, which then adds the semantic stage
//! to the matching cascade.

use std::fmt;

use farmacias_data::CommuneCorpus;
use tracing::{debug, info, instrument};

use crate::{
    error::{FinderError, Result},
    index::CommuneIndex,
};

/// A sentence-embedding model.
pub trait Embedder: Send + Sync {
    /// One vector per input text, each of length [`Self::dimensions`].
    fn embed(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>>;

    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;
}

impl fmt::Debug for dyn Embedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedder")
            .field("model", &self.model_name())
            .field("dimensions", &self.dimensions())
            .finish()
    }
}

/// Cosine similarity; 0 for mismatched lengths or zero vectors.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0_f64, 0.0_f64, 0.0_f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Embedding vectors of every variation, grouped by commune id.
#[derive(Debug, Clone, Default)]
pub(crate) struct VariationEmbeddings {
    per_commune: Vec<Vec<Vec<f32>>>,
}

impl VariationEmbeddings {
    /// Reuses vectors precomputed in `corpus` when their size matches the
    /// model, and encodes the remaining variations in one batch.
    #[instrument(name = "Compute variation embeddings", level = "info", skip_all)]
    pub(crate) fn compute(
        index: &CommuneIndex,
        corpus: &CommuneCorpus,
        embedder: &dyn Embedder,
    ) -> Result<Self> {
        let dims = embedder.dimensions();
        let mut per_commune = vec![Vec::new(); index.len()];
        let mut pending: Vec<(usize, &str)> = Vec::new();

        for (id, commune) in index.communes().iter().enumerate() {
            let precomputed = corpus.get(&commune.name).map(|e| &e.embeddings);
            for variation in &commune.variations {
                match precomputed.and_then(|p| p.get(variation)) {
                    Some(vector) if vector.len() == dims => per_commune[id].push(vector.clone()),
                    _ => pending.push((id, variation.as_str())),
                }
            }
        }

        let reused = per_commune.iter().map(Vec::len).sum::<usize>();
        let encoded = pending.len();
        if !pending.is_empty() {
            let texts = pending.iter().map(|(_, t)| *t).collect::<Vec<_>>();
            let vectors = embedder
                .embed(&texts)
                .map_err(|e| FinderError::Embedding(e.to_string()))?;
            if vectors.len() != texts.len() {
                return Err(FinderError::Embedding(format!(
                    "Model {} returned {} vectors for {} texts",
                    embedder.model_name(),
                    vectors.len(),
                    texts.len()
                )));
            }
            for ((id, _), vector) in pending.into_iter().zip(vectors) {
                per_commune[id].push(vector);
            }
        }

        info!(
            model = embedder.model_name(),
            reused,
            encoded,
            "Variation embeddings ready"
        );
        Ok(Self { per_commune })
    }

    /// Best cosine similarity of `query` against each commune's variations.
    pub(crate) fn best_per_commune(&self, query: &[f32]) -> Vec<(usize, f64)> {
        let scores = self
            .per_commune
            .iter()
            .enumerate()
            .filter_map(|(id, vectors)| {
                vectors
                    .iter()
                    .map(|v| cosine_similarity(query, v))
                    .max_by(f64::total_cmp)
                    .map(|best| (id, best))
            })
            .collect::<Vec<_>>();
        debug!(communes = scores.len(), "Scored query embedding");
        scores
    }
}
