use std::sync::{Arc, RwLock, RwLockReadGuard};

use async_trait::async_trait;
use chrono::{Local, NaiveDateTime};
use itertools::Itertools;
use tracing::{debug, info};

use super::{CategoryCounts, PharmacyStore, StoreError, StoreResult};
use crate::{
    geo::{GeoPoint, haversine_km},
    model::Pharmacy,
};

/// Time source for "open now" decisions.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    /// Local wall-clock time of the host.
    #[default]
    System,
    /// A frozen instant, for reproducible tests.
    Fixed(NaiveDateTime),
}

impl Clock {
    #[must_use]
    pub fn now(&self) -> NaiveDateTime {
        match self {
            Self::System => Local::now().naive_local(),
            Self::Fixed(at) => *at,
        }
    }
}

/// A [`PharmacyStore`] over an in-process snapshot.
///
/// Clones share the same snapshot, so a refresh through [`Self::replace_all`]
/// is visible to every holder. In-flight searches see either the old or the
/// new snapshot.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPharmacyStore {
    pharmacies: Arc<RwLock<Vec<Pharmacy>>>,
    clock: Clock,
}

impl InMemoryPharmacyStore {
    #[must_use]
    pub fn new(pharmacies: Vec<Pharmacy>) -> Self {
        info!(count = pharmacies.len(), "In-memory pharmacy store created");
        Self {
            pharmacies: Arc::new(RwLock::new(pharmacies)),
            clock: Clock::System,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn replace_all(&self, pharmacies: Vec<Pharmacy>) -> StoreResult<()> {
        let mut guard = self
            .pharmacies
            .write()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        info!(
            previous = guard.len(),
            current = pharmacies.len(),
            "Replacing pharmacy snapshot"
        );
        *guard = pharmacies;
        Ok(())
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.read()?.is_empty())
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Vec<Pharmacy>>> {
        self.pharmacies
            .read()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

fn passes_open_filter(pharmacy: &Pharmacy, open_only: bool, now: NaiveDateTime) -> bool {
    !open_only || pharmacy.is_open_at(now)
}

#[async_trait]
impl PharmacyStore for InMemoryPharmacyStore {
    async fn find_by_commune(&self, commune: &str, open_only: bool) -> StoreResult<Vec<Pharmacy>> {
        let wanted = commune.trim().to_lowercase();
        let now = self.clock.now();
        let found = self
            .read()?
            .iter()
            .filter(|p| p.commune.trim().to_lowercase() == wanted)
            .filter(|p| passes_open_filter(p, open_only, now))
            .cloned()
            .collect::<Vec<_>>();
        debug!(commune, open_only, found = found.len(), "find_by_commune");
        Ok(found)
    }

    async fn find_within_radius(
        &self,
        origin: GeoPoint,
        radius_km: f64,
        open_only: bool,
    ) -> StoreResult<Vec<Pharmacy>> {
        let now = self.clock.now();
        let found = self
            .read()?
            .iter()
            .filter(|p| {
                p.location
                    .is_some_and(|loc| haversine_km(origin, loc) <= radius_km)
            })
            .filter(|p| passes_open_filter(p, open_only, now))
            .cloned()
            .collect::<Vec<_>>();
        debug!(
            lat = origin.lat,
            lng = origin.lng,
            radius_km,
            open_only,
            found = found.len(),
            "find_within_radius"
        );
        Ok(found)
    }

    fn is_currently_open(&self, pharmacy: &Pharmacy) -> bool {
        pharmacy.is_open_at(self.clock.now())
    }

    async fn list_all_commune_names(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .read()?
            .iter()
            .map(|p| p.commune.trim())
            .filter(|c| !c.is_empty())
            .unique()
            .sorted()
            .map(str::to_owned)
            .collect())
    }

    async fn count_by_category(&self) -> StoreResult<CategoryCounts> {
        let guard = self.read()?;
        let on_duty = guard.iter().filter(|p| p.is_on_duty).count();
        Ok(CategoryCounts {
            total: guard.len(),
            on_duty,
            regular: guard.len() - on_duty,
        })
    }
}
