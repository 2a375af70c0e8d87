//! The [`PharmacyFinder`] entry point.
//!
//! A finder owns everything built once per data snapshot: the commune
//! index and matcher (with optional embeddings) and the reverse geocoder
//! with its commune centroids. Requests only read that state, so a finder
//! can be shared across tasks behind an `Arc`.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use farmacias::{CommuneSearchParams, PharmacyFinder, data::load_pharmacies_csv};
//! use farmacias::data::InMemoryPharmacyStore;
//!
//! # async fn run() -> farmacias::error::Result<()> {
//! let store = InMemoryPharmacyStore::new(load_pharmacies_csv("farmacias.csv")?);
//! let finder = PharmacyFinder::builder(Arc::new(store)).build().await?;
//!
//! let result = finder
//!     .search_by_commune("quilpue", CommuneSearchParams::default())
//!     .await?;
//! println!("{}", result.message);
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, PoisonError, RwLock};

use farmacias_data::{CategoryCounts, CommuneCorpus, GeoPoint, PharmacyStore};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    config::FinderConfig,
    error::Result,
    geocode::{CentroidTable, LocationInfo, ReverseGeocoder},
    index::CommuneIndex,
    matcher::{CommuneMatcher, Embedder, MatchResult},
    search::{
        CommuneSearch, CommuneSearchParams, CoordinateSearch, CoordinateSearchParams,
        search_by_commune_inner, search_by_coordinates_inner,
    },
};

/// State derived from one data snapshot.
#[derive(Debug)]
struct FinderState {
    matcher: CommuneMatcher,
    geocoder: ReverseGeocoder,
}

/// Counts describing what a finder is serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinderOverview {
    pub pharmacies: CategoryCounts,
    pub communes: usize,
    pub centroids: usize,
    pub embeddings: bool,
}

impl FinderOverview {
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} farmacias ({} de turno, {} regulares) en {} comunas, {} con centroide. Búsqueda semántica {}.",
            self.pharmacies.total,
            self.pharmacies.on_duty,
            self.pharmacies.regular,
            self.communes,
            self.centroids,
            if self.embeddings {
                "activa"
            } else {
                "inactiva"
            }
        )
    }
}

pub struct PharmacyFinderBuilder {
    store: Arc<dyn PharmacyStore>,
    corpus: CommuneCorpus,
    config: Option<FinderConfig>,
    embedder: Option<Arc<dyn Embedder>>,
}

impl PharmacyFinderBuilder {
    /// Reference corpus of commune spellings. Store communes missing from
    /// it are added with derived spellings.
    pub fn corpus(mut self, corpus: CommuneCorpus) -> Self {
        self.corpus = corpus;
        self
    }

    pub fn config(mut self, config: FinderConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Enables the embedding stage of the matcher.
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Validates the configuration and builds the initial state from the
    /// store.
    pub async fn build(self) -> Result<PharmacyFinder> {
        let config = match self.config {
            Some(config) => config,
            None => FinderConfig::builder().build()?,
        };
        config.validate()?;
        let geocoder = ReverseGeocoder::new(CentroidTable::default(), config.geocoder.clone())?;
        let state = initialize(
            self.store.as_ref(),
            &self.corpus,
            &config,
            self.embedder.as_ref(),
            geocoder,
        )
        .await?;
        Ok(PharmacyFinder {
            store: self.store,
            corpus: self.corpus,
            config,
            embedder: self.embedder,
            state: RwLock::new(Arc::new(state)),
        })
    }
}

/// Commune matching, pharmacy search and reverse geocoding over a
/// [`PharmacyStore`].
pub struct PharmacyFinder {
    store: Arc<dyn PharmacyStore>,
    corpus: CommuneCorpus,
    config: FinderConfig,
    embedder: Option<Arc<dyn Embedder>>,
    state: RwLock<Arc<FinderState>>,
}

impl std::fmt::Debug for PharmacyFinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PharmacyFinder")
            .field("corpus", &self.corpus.len())
            .field("config", &self.config)
            .field("embedder", &self.embedder)
            .finish_non_exhaustive()
    }
}

#[instrument(name = "Initialize finder state", level = "info", skip_all)]
async fn initialize(
    store: &dyn PharmacyStore,
    corpus: &CommuneCorpus,
    config: &FinderConfig,
    embedder: Option<&Arc<dyn Embedder>>,
    geocoder: ReverseGeocoder,
) -> Result<FinderState> {
    let t_init = std::time::Instant::now();
    let mut corpus = corpus.clone();
    let added = corpus.merge_names(store.list_all_commune_names().await?);

    let centroids =
        CentroidTable::from_store(store, config.geocoder.min_pharmacies_per_centroid).await?;
    let mut index = CommuneIndex::build(&corpus);
    let attached = index.attach_centroids(centroids.iter().map(|c| (c.commune.as_str(), c.center)));

    let matcher = match embedder {
        Some(embedder) => {
            CommuneMatcher::with_embedder(index, &corpus, &config.matching, Arc::clone(embedder))
        }
        None => CommuneMatcher::new(index, &config.matching),
    };
    info!(
        communes = matcher.index().len(),
        added_from_store = added,
        centroids = centroids.len(),
        attached,
        embeddings = matcher.has_embeddings(),
        elapsed = ?t_init.elapsed(),
        "Finder state ready"
    );
    Ok(FinderState {
        matcher,
        geocoder: geocoder.with_centroids(centroids),
    })
}

impl PharmacyFinder {
    pub fn builder(store: Arc<dyn PharmacyStore>) -> PharmacyFinderBuilder {
        PharmacyFinderBuilder {
            store,
            corpus: CommuneCorpus::new(),
            config: None,
            embedder: None,
        }
    }

    fn state(&self) -> Arc<FinderState> {
        // The lock only guards an Arc swap, so a poisoned guard still holds
        // a complete state.
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    #[must_use]
    pub const fn config(&self) -> &FinderConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn PharmacyStore> {
        &self.store
    }

    #[instrument(name = "Match commune", level = "info", skip(self))]
    pub fn match_commune(&self, query: &str) -> MatchResult {
        self.state().matcher.match_commune(query)
    }

    /// The indexed record of `name`, with statistics and centroid.
    #[must_use]
    pub fn commune_info(&self, name: &str) -> Option<crate::index::Commune> {
        self.state().matcher.commune_info(name).cloned()
    }

    pub async fn search_by_commune(
        &self,
        query: &str,
        params: CommuneSearchParams,
    ) -> Result<CommuneSearch> {
        let state = self.state();
        Ok(search_by_commune_inner(self.store.as_ref(), &state.matcher, query, params).await?)
    }

    pub async fn search_by_coordinates(
        &self,
        lat: f64,
        lng: f64,
        params: CoordinateSearchParams,
    ) -> Result<CoordinateSearch> {
        let state = self.state();
        Ok(search_by_coordinates_inner(
            self.store.as_ref(),
            &state.geocoder,
            &self.config.radius,
            GeoPoint::new(lat, lng),
            params,
        )
        .await?)
    }

    pub async fn reverse_geocode(&self, lat: f64, lng: f64) -> LocationInfo {
        let state = self.state();
        state.geocoder.reverse_geocode(lat, lng).await
    }

    pub async fn overview(&self) -> Result<FinderOverview> {
        let state = self.state();
        Ok(FinderOverview {
            pharmacies: self.store.count_by_category().await?,
            communes: state.matcher.index().len(),
            centroids: state.geocoder.centroids().len(),
            embeddings: state.matcher.has_embeddings(),
        })
    }

    /// Recomputes the commune index, embeddings and centroids from the
    /// current store snapshot. Requests in flight finish on the old state.
    #[instrument(name = "Rebuild finder state", level = "info", skip(self))]
    pub async fn rebuild(&self) -> Result<()> {
        let geocoder = self.state().geocoder.clone();
        let state = initialize(
            self.store.as_ref(),
            &self.corpus,
            &self.config,
            self.embedder.as_ref(),
            geocoder,
        )
        .await?;
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(state);
        Ok(())
    }
}
