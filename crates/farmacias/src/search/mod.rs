//! Pharmacy search.
//!
//! Radius escalation around a coordinate, duty-first ranking, and the two
//! request flows built on top of them: search by commune name and search by
//! coordinates.

pub use error::SearchError;
mod orchestration;
mod radius;
mod ranking;

use error::Result;
pub use orchestration::{
    CommuneSearch, CommuneSearchParams, CommuneSuggestions, CoordinateSearch,
    CoordinateSearchParams, DutyFallback, search_by_commune_inner, search_by_coordinates_inner,
};
pub use radius::{RadiusSearch, SearchAttempt, radius_search_inner};
pub use ranking::{RankedPharmacy, rank_and_limit};

mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum SearchError {
        #[error("Pharmacy store error: {0}")]
        Store(#[from] farmacias_data::StoreError),
        #[error("Invalid coordinates: ({lat}, {lng})")]
        InvalidCoordinates { lat: f64, lng: f64 },
        #[error("Invalid search radius: {0} km")]
        InvalidRadius(f64),
    }
    pub type Result<T> = std::result::Result<T, SearchError>;
}
