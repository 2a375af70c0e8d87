//! In-memory reference index over the known communes.
//!
//! Built once from a [`CommuneCorpus`] and read-only afterwards. Holds the
//! normalized form of every spelling variation, the exact-lookup tables and
//! a trigram inverted index used to shortlist candidates for approximate
//! matching.

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use farmacias_data::{CommuneCorpus, CommuneStats, GeoPoint};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::normalize::{normalize, trigrams};

/// A canonical commune and what the engine knows about it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commune {
    pub name: String,
    /// Known spellings, canonical form included.
    pub variations: Vec<String>,
    pub statistics: CommuneStats,
    /// Mean position of the commune's pharmacies, when enough are known.
    pub centroid: Option<GeoPoint>,
}

#[derive(Debug, Clone, Default)]
pub struct CommuneIndex {
    communes: Vec<Commune>,
    /// Distinct non-empty normalized variations per commune.
    normalized: Vec<Vec<String>>,
    /// Union of the trigram sets of all variations per commune.
    shingles: Vec<HashSet<String>>,
    verbatim: HashMap<String, usize>,
    exact: HashMap<String, usize>,
    trigram_postings: HashMap<String, Vec<usize>>,
}

impl CommuneIndex {
    /// Indexes every commune of `corpus`, in corpus order. When two communes
    /// share a spelling the first one owns it for exact lookups.
    #[instrument(name = "Build commune index", level = "info", skip_all)]
    pub fn build(corpus: &CommuneCorpus) -> Self {
        let t_build = std::time::Instant::now();
        let mut index = Self::default();

        for (name, entry) in corpus.iter() {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            let id = index.communes.len();
            let variations = std::iter::once(name)
                .chain(entry.variations.iter().map(|v| v.trim()))
                .filter(|v| !v.is_empty())
                .unique()
                .map(str::to_owned)
                .collect::<Vec<_>>();
            let normalized = variations
                .iter()
                .map(|v| normalize(v))
                .filter(|v| !v.is_empty())
                .unique()
                .collect::<Vec<_>>();

            for variation in &variations {
                index.verbatim.entry(variation.clone()).or_insert(id);
            }
            let mut shingles = HashSet::new();
            for form in &normalized {
                index.exact.entry(form.clone()).or_insert(id);
                shingles.extend(trigrams(form));
            }
            for gram in &shingles {
                index.trigram_postings.entry(gram.clone()).or_default().push(id);
            }

            index.communes.push(Commune {
                name: name.to_owned(),
                variations,
                statistics: entry.statistics,
                centroid: None,
            });
            index.normalized.push(normalized);
            index.shingles.push(shingles);
        }

        info!(
            communes = index.communes.len(),
            trigrams = index.trigram_postings.len(),
            elapsed = ?t_build.elapsed(),
            "Commune index built"
        );
        index
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.communes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.communes.is_empty()
    }

    #[must_use]
    pub fn communes(&self) -> &[Commune] {
        &self.communes
    }

    #[must_use]
    pub fn commune(&self, id: usize) -> Option<&Commune> {
        self.communes.get(id)
    }

    /// Finds a commune by canonical name, ignoring case and accents.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Commune> {
        let wanted = normalize(name);
        self.communes.iter().find(|c| normalize(&c.name) == wanted)
    }

    /// Commune owning a variation equal to `raw`, or whose normalized form
    /// equals `normalized`.
    #[must_use]
    pub fn exact(&self, raw: &str, normalized: &str) -> Option<usize> {
        self.verbatim
            .get(raw)
            .or_else(|| self.verbatim.get(raw.trim()))
            .or_else(|| self.exact.get(normalized))
            .copied()
    }

    pub(crate) fn normalized_variations(&self, id: usize) -> &[String] {
        self.normalized.get(id).map_or(&[][..], Vec::as_slice)
    }

    pub(crate) fn shingles(&self, id: usize) -> Option<&HashSet<String>> {
        self.shingles.get(id)
    }

    /// Communes sharing at least one trigram with `grams`, ascending by id.
    pub(crate) fn trigram_candidates(&self, grams: &HashSet<String>) -> Vec<usize> {
        grams
            .iter()
            .filter_map(|g| self.trigram_postings.get(g))
            .flatten()
            .copied()
            .sorted_unstable()
            .dedup()
            .collect()
    }

    /// Attaches centroids by commune name. Returns how many were attached.
    pub fn attach_centroids<'a>(
        &mut self,
        centroids: impl IntoIterator<Item = (&'a str, GeoPoint)>,
    ) -> usize {
        let by_name = self
            .communes
            .iter()
            .enumerate()
            .map(|(id, c)| (normalize(&c.name), id))
            .collect::<HashMap<_, _>>();
        let mut attached = 0;
        for (name, point) in centroids {
            if let Some(&id) = by_name.get(&normalize(name)) {
                self.communes[id].centroid = Some(point);
                attached += 1;
            }
        }
        attached
    }
}
