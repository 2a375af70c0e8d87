//! The pharmacy store contract.
//!
//! The engine never owns pharmacy persistence. Every lookup goes through
//! [`PharmacyStore`], whose implementations may be backed by SQLite, a cache
//! or, as in [`InMemoryPharmacyStore`], a plain vector.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{geo::GeoPoint, model::Pharmacy};

mod memory;

pub use memory::{Clock, InMemoryPharmacyStore};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Pharmacy store unavailable: {0}")]
    Unavailable(String),
    #[error("Pharmacy store query failed: {0}")]
    Query(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Pharmacy totals by service category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub total: usize,
    pub on_duty: usize,
    pub regular: usize,
}

/// Read-only queries the search engine issues against the pharmacy data.
///
/// `open_only` filters to pharmacies open at query time, on-duty ones
/// always included.
#[async_trait]
pub trait PharmacyStore: Send + Sync {
    /// Pharmacies whose commune equals `commune`, compared case-insensitively.
    async fn find_by_commune(&self, commune: &str, open_only: bool) -> StoreResult<Vec<Pharmacy>>;

    /// Pharmacies with coordinates no further than `radius_km` from `origin`.
    async fn find_within_radius(
        &self,
        origin: GeoPoint,
        radius_km: f64,
        open_only: bool,
    ) -> StoreResult<Vec<Pharmacy>>;

    fn is_currently_open(&self, pharmacy: &Pharmacy) -> bool;

    /// Distinct commune names present in the store.
    async fn list_all_commune_names(&self) -> StoreResult<Vec<String>>;

    async fn count_by_category(&self) -> StoreResult<CategoryCounts>;
}
