use farmacias_data::{GeoPoint, Pharmacy, PharmacyStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::{Result, SearchError};
use crate::config::RadiusPolicy;

/// One rung of the radius ladder.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchAttempt {
    pub radius_km: f64,
    pub results: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadiusSearch {
    /// Pharmacies found at `radius_used_km`, unranked.
    pub pharmacies: Vec<Pharmacy>,
    pub radius_used_km: f64,
    /// Every rung tried, in order.
    pub attempts: Vec<SearchAttempt>,
}

impl RadiusSearch {
    /// Whether the search went past the radius the caller asked for.
    #[must_use]
    pub fn expanded_beyond(&self, initial_radius_km: f64) -> bool {
        self.radius_used_km > initial_radius_km
    }
}

/// Walks the radius ladder of `policy` from `initial_radius_km` until a stop
/// rule fires or the ladder runs out.
///
/// Unusable origins (zero, non-finite or out of range) and non-positive
/// radii are rejected before the store is queried.
#[instrument(name = "Radius search", level = "info", skip(store, policy))]
pub async fn radius_search_inner(
    store: &dyn PharmacyStore,
    policy: &RadiusPolicy,
    origin: GeoPoint,
    initial_radius_km: f64,
    open_only: bool,
) -> Result<RadiusSearch> {
    if !origin.is_usable() {
        warn!("Rejecting unusable search origin");
        return Err(SearchError::InvalidCoordinates {
            lat: origin.lat,
            lng: origin.lng,
        });
    }
    if !(initial_radius_km.is_finite() && initial_radius_km > 0.0) {
        return Err(SearchError::InvalidRadius(initial_radius_km));
    }

    let ladder = policy.ladder(initial_radius_km);
    let mut attempts = Vec::with_capacity(ladder.len());
    let mut pharmacies = Vec::new();
    let mut radius_used_km = initial_radius_km;

    for radius_km in ladder {
        pharmacies = store
            .find_within_radius(origin, radius_km, open_only)
            .await?;
        radius_used_km = radius_km;
        attempts.push(SearchAttempt {
            radius_km,
            results: pharmacies.len(),
        });

        if policy.should_stop(pharmacies.len(), radius_km) {
            info!(
                found = pharmacies.len(),
                radius_km,
                attempts = attempts.len(),
                "Radius search satisfied"
            );
            return Ok(RadiusSearch {
                pharmacies,
                radius_used_km,
                attempts,
            });
        }
        debug!(found = pharmacies.len(), radius_km, "Not enough pharmacies, expanding");
    }

    info!(
        found = pharmacies.len(),
        radius_km = radius_used_km,
        attempts = attempts.len(),
        "Radius ladder exhausted"
    );
    Ok(RadiusSearch {
        pharmacies,
        radius_used_km,
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use farmacias_data::{
        CategoryCounts, InMemoryPharmacyStore, StoreError, StoreResult,
        test_data::{pharmacies_north_of, sample_store},
    };

    use super::*;

    const RURAL: GeoPoint = GeoPoint::new(-36.5, -72.3);

    /// Wraps a store and counts radius queries.
    struct CountingStore {
        inner: InMemoryPharmacyStore,
        radius_calls: AtomicUsize,
    }

    impl CountingStore {
        fn new(pharmacies: Vec<Pharmacy>) -> Self {
            Self {
                inner: InMemoryPharmacyStore::new(pharmacies),
                radius_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PharmacyStore for CountingStore {
        async fn find_by_commune(
            &self,
            commune: &str,
            open_only: bool,
        ) -> StoreResult<Vec<Pharmacy>> {
            self.inner.find_by_commune(commune, open_only).await
        }

        async fn find_within_radius(
            &self,
            origin: GeoPoint,
            radius_km: f64,
            open_only: bool,
        ) -> StoreResult<Vec<Pharmacy>> {
            self.radius_calls.fetch_add(1, Ordering::SeqCst);
            self.inner
                .find_within_radius(origin, radius_km, open_only)
                .await
        }

        fn is_currently_open(&self, pharmacy: &Pharmacy) -> bool {
            self.inner.is_currently_open(pharmacy)
        }

        async fn list_all_commune_names(&self) -> StoreResult<Vec<String>> {
            self.inner.list_all_commune_names().await
        }

        async fn count_by_category(&self) -> StoreResult<CategoryCounts> {
            self.inner.count_by_category().await
        }
    }

    struct DownStore;

    #[async_trait]
    impl PharmacyStore for DownStore {
        async fn find_by_commune(&self, _: &str, _: bool) -> StoreResult<Vec<Pharmacy>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn find_within_radius(
            &self,
            _: GeoPoint,
            _: f64,
            _: bool,
        ) -> StoreResult<Vec<Pharmacy>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        fn is_currently_open(&self, _: &Pharmacy) -> bool {
            false
        }

        async fn list_all_commune_names(&self) -> StoreResult<Vec<String>> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn count_by_category(&self) -> StoreResult<CategoryCounts> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    fn radii(search: &RadiusSearch) -> Vec<f64> {
        search.attempts.iter().map(|a| a.radius_km).collect()
    }

    #[tokio::test]
    async fn test_rural_expansion_stops_at_twenty() {
        let store = CountingStore::new(pharmacies_north_of(RURAL, 18.0, 6, "R", "Rural"));
        let search = radius_search_inner(&store, &RadiusPolicy::default(), RURAL, 10.0, false)
            .await
            .unwrap();
        assert_eq!(radii(&search), vec![10.0, 15.0, 20.0]);
        assert_eq!(
            search.attempts.iter().map(|a| a.results).collect::<Vec<_>>(),
            vec![0, 0, 6]
        );
        assert!((search.radius_used_km - 20.0).abs() < f64::EPSILON);
        assert_eq!(search.pharmacies.len(), 6);
        assert!(search.expanded_beyond(10.0));
    }

    #[tokio::test]
    async fn test_dense_area_stops_at_first_rung() {
        let store = CountingStore::new(pharmacies_north_of(RURAL, 2.0, 12, "D", "Densa"));
        let search = radius_search_inner(&store, &RadiusPolicy::default(), RURAL, 5.0, false)
            .await
            .unwrap();
        assert_eq!(radii(&search), vec![5.0]);
        assert!(!search.expanded_beyond(5.0));
    }

    #[tokio::test]
    async fn test_partial_results_stop_at_fifteen() {
        let mut pharmacies = pharmacies_north_of(RURAL, 3.0, 2, "A", "Rural");
        pharmacies.extend(pharmacies_north_of(RURAL, 12.0, 3, "B", "Rural"));
        let store = CountingStore::new(pharmacies);
        let search = radius_search_inner(&store, &RadiusPolicy::default(), RURAL, 10.0, false)
            .await
            .unwrap();
        assert_eq!(radii(&search), vec![10.0, 15.0]);
        assert_eq!(search.pharmacies.len(), 5);
    }

    #[tokio::test]
    async fn test_ladder_exhausted_without_results() {
        let store = CountingStore::new(Vec::new());
        let search = radius_search_inner(&store, &RadiusPolicy::default(), RURAL, 10.0, true)
            .await
            .unwrap();
        assert_eq!(radii(&search), vec![10.0, 15.0, 20.0, 25.0]);
        assert!(search.pharmacies.is_empty());
        assert!((search.radius_used_km - 25.0).abs() < f64::EPSILON);
        assert_eq!(store.radius_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_large_initial_radius_is_single_attempt() {
        let store = CountingStore::new(Vec::new());
        let search = radius_search_inner(&store, &RadiusPolicy::default(), RURAL, 12.0, false)
            .await
            .unwrap();
        assert_eq!(radii(&search), vec![12.0]);
        assert_eq!(store.radius_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalid_origin_rejected_before_store() {
        let store = CountingStore::new(Vec::new());
        let err = radius_search_inner(
            &store,
            &RadiusPolicy::default(),
            GeoPoint::new(0.0, 0.0),
            10.0,
            false,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SearchError::InvalidCoordinates { .. }));

        let err = radius_search_inner(&store, &RadiusPolicy::default(), RURAL, -1.0, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidRadius(_)));
        assert_eq!(store.radius_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_open_only_filters_closed_pharmacies() {
        let store = sample_store();
        let quilpue = GeoPoint::new(-33.0475, -71.4425);
        let all = radius_search_inner(&store, &RadiusPolicy::default(), quilpue, 30.0, false)
            .await
            .unwrap();
        let open = radius_search_inner(&store, &RadiusPolicy::default(), quilpue, 30.0, true)
            .await
            .unwrap();
        assert!(open.pharmacies.len() < all.pharmacies.len());
        assert!(open.pharmacies.iter().all(|p| p.local_id != "QP-2"));
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let err = radius_search_inner(&DownStore, &RadiusPolicy::default(), RURAL, 10.0, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Store(StoreError::Unavailable(_))));
    }
}
