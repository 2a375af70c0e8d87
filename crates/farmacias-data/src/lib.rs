//! Data side of the farmacias engine.
//!
//! Owns the [`Pharmacy`] record the search core consumes, the narrow
//! [`PharmacyStore`] contract it queries, the commune reference corpus and
//! the loaders that turn exported files into those types.

pub mod corpus;
mod error;
pub mod geo;
pub mod model;
pub mod snapshot;
pub mod store;
#[cfg(any(test, feature = "test_data"))]
pub mod test_data;

pub use corpus::{CommuneCorpus, CommuneEntry, CommuneStats, derive_variations};
pub use error::{DataError, Result};
pub use crate::geo::{EARTH_RADIUS_KM, GeoPoint, haversine_km};
pub use model::{OpeningHours, Pharmacy};
pub use snapshot::load_pharmacies_csv;
pub use store::{
    CategoryCounts, Clock, InMemoryPharmacyStore, PharmacyStore, StoreError, StoreResult,
};
