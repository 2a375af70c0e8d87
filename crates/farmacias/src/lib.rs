//! Farmacias - commune matching and pharmacy search for Chile
//!
//! Farmacias resolves free-text commune names against a reference corpus,
//! finds pharmacies around a coordinate with automatic radius expansion, and
//! reverse geocodes coordinates to a commune. Pharmacy data is never owned
//! here: every lookup goes through a [`data::PharmacyStore`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use farmacias::{CoordinateSearchParams, FinderConfigBuilder, PharmacyFinder};
//! use farmacias::data::{CommuneCorpus, InMemoryPharmacyStore, load_pharmacies_csv};
//!
//! # async fn run() -> farmacias::error::Result<()> {
//! let store = InMemoryPharmacyStore::new(load_pharmacies_csv("farmacias.csv")?);
//! let finder = PharmacyFinder::builder(Arc::new(store))
//!     .corpus(CommuneCorpus::load("communes.json")?)
//!     .config(FinderConfigBuilder::offline().build()?)
//!     .build()
//!     .await?;
//!
//! // Typos are tolerated
//! let matched = finder.match_commune("kilpue");
//! println!("{} {:?}", matched.method, matched.suggestions);
//!
//! // Rural areas widen the search from 10 km up to 25 km
//! let nearby = finder
//!     .search_by_coordinates(-33.0475, -71.4425, CoordinateSearchParams::default())
//!     .await?;
//! println!("{}", nearby.message);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Matching cascade**: exact, fuzzy, optional embeddings, trigram and a
//!   low-confidence fallback that only suggests
//! - **Radius escalation**: 10 → 15 → 20 → 25 km until enough pharmacies are found
//! - **Duty-first ranking**: on-duty pharmacies before regular ones, nearest first
//! - **Reverse geocoding**: local commune centroids with a Nominatim fallback

use once_cell::sync::OnceCell;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

mod config;
mod core;
pub mod error;
mod geocode;
mod index;
mod matcher;
pub mod normalize;
mod search;

pub use crate::core::{FinderOverview, PharmacyFinder, PharmacyFinderBuilder};

pub use config::{
    DEFAULT_NOMINATIM_URL, FinderConfig, FinderConfigBuilder, GeocoderConfig, MatchThresholds,
    RadiusPolicy,
};
pub use farmacias_data as data;
pub use geocode::{
    CentroidTable, CommuneCentroid, GeocodeMethod, LocationInfo, NominatimClient,
    ReverseGeocoder, reconcile,
};
pub use index::{Commune, CommuneIndex};
pub use matcher::{CommuneMatcher, Embedder, MatchMethod, MatchResult, cosine_similarity};
pub use normalize::normalize;
pub use search::{
    CommuneSearch, CommuneSearchParams, CommuneSuggestions, CoordinateSearch,
    CoordinateSearchParams, DutyFallback, RadiusSearch, RankedPharmacy, SearchAttempt,
    SearchError, rank_and_limit, radius_search_inner, search_by_commune_inner,
    search_by_coordinates_inner,
};

static LOGGER_INIT: OnceCell<()> = OnceCell::new();

/// Initialize logging for the farmacias engine.
///
/// `RUST_LOG` wins when set; otherwise `level` applies. HTTP client noise is
/// capped at `warn`. Safe to call more than once.
///
/// ```rust
/// use farmacias::init_logging;
/// use tracing::Level;
///
/// init_logging(Level::INFO)?;
/// # Ok::<(), farmacias::error::FinderError>(())
/// ```
pub fn init_logging(level: impl Into<LevelFilter>) -> Result<&'static (), error::FinderError> {
    LOGGER_INIT.get_or_try_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level.into().to_string()))?
            .add_directive("reqwest=warn".parse()?)
            .add_directive("hyper_util=warn".parse()?);

        tracing_subscriber::fmt::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use farmacias_data::test_data::{sample_corpus, sample_store};

    use super::*;

    fn setup_test_env() {
        let _ = init_logging(tracing::Level::WARN);
    }

    async fn finder() -> PharmacyFinder {
        PharmacyFinder::builder(Arc::new(sample_store()))
            .corpus(sample_corpus())
            .config(FinderConfigBuilder::offline().build().unwrap())
            .build()
            .await
            .unwrap()
    }

    #[test]
    fn test_init_logging_is_idempotent() {
        setup_test_env();
        assert!(init_logging(tracing::Level::DEBUG).is_ok());
    }

    #[tokio::test]
    async fn test_finder_creation() {
        setup_test_env();
        let finder = finder().await;
        assert_eq!(finder.match_commune("Santiago").method, MatchMethod::Exact);
    }

    #[tokio::test]
    async fn test_basic_commune_search() {
        setup_test_env();
        let finder = finder().await;
        for term in ["Quilpué", "villa alemana", "VALPARAISO", "Vina del Mar", "Temuco"] {
            let result = finder
                .search_by_commune(term, CommuneSearchParams::default())
                .await
                .unwrap();
            assert!(result.commune.is_some(), "{term} should resolve");
            assert!(result.total > 0, "{term} should have pharmacies");
        }
    }

    #[tokio::test]
    async fn test_basic_coordinate_search() {
        setup_test_env();
        let finder = finder().await;
        let result = finder
            .search_by_coordinates(-33.0422, -71.3733, CoordinateSearchParams::default())
            .await
            .unwrap();
        assert!(!result.pharmacies.is_empty());
        assert!(result.location.is_some());
    }
}
