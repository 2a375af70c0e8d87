//! Commune centres estimated from pharmacy coordinates.

use ahash::AHashMap as HashMap;
use farmacias_data::{GeoPoint, Pharmacy, PharmacyStore, haversine_km};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommuneCentroid {
    pub commune: String,
    pub center: GeoPoint,
    /// Pharmacies with usable coordinates averaged into `center`.
    pub pharmacy_count: usize,
}

/// Centroids of every commune with enough located pharmacies.
#[derive(Debug, Clone, Default)]
pub struct CentroidTable {
    centroids: Vec<CommuneCentroid>,
}

impl CentroidTable {
    /// Groups `pharmacies` by commune (trimmed, case-insensitive) and
    /// averages the usable coordinates of each group. Groups with fewer
    /// than `min_pharmacies` located pharmacies are dropped.
    pub fn from_pharmacies<'a>(
        pharmacies: impl IntoIterator<Item = &'a Pharmacy>,
        min_pharmacies: usize,
    ) -> Self {
        // key -> (display name, lat sum, lng sum, count)
        let mut groups: HashMap<String, (String, f64, f64, usize)> = HashMap::new();
        for pharmacy in pharmacies {
            let name = pharmacy.commune.trim();
            let Some(point) = pharmacy.location.filter(|p| p.is_usable()) else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            let group = groups
                .entry(name.to_lowercase())
                .or_insert_with(|| (name.to_owned(), 0.0, 0.0, 0));
            group.1 += point.lat;
            group.2 += point.lng;
            group.3 += 1;
        }

        let mut centroids = groups
            .into_values()
            .filter(|(_, _, _, count)| *count >= min_pharmacies.max(1))
            .map(|(commune, lat, lng, count)| CommuneCentroid {
                commune,
                center: GeoPoint::new(lat / count as f64, lng / count as f64),
                pharmacy_count: count,
            })
            .collect::<Vec<_>>();
        centroids.sort_by(|a, b| {
            b.pharmacy_count
                .cmp(&a.pharmacy_count)
                .then_with(|| a.commune.cmp(&b.commune))
        });
        Self { centroids }
    }

    /// Reads every commune of `store` and builds the table from its
    /// pharmacies. Names differing only in case or padding are queried once,
    /// since the store matches communes case-insensitively.
    #[instrument(name = "Compute commune centroids", level = "info", skip_all)]
    pub async fn from_store(store: &dyn PharmacyStore, min_pharmacies: usize) -> Result<Self> {
        let t_compute = std::time::Instant::now();
        let mut pharmacies = Vec::new();
        let names = store
            .list_all_commune_names()
            .await?
            .into_iter()
            .unique_by(|name| name.trim().to_lowercase())
            .collect::<Vec<_>>();
        for name in names {
            pharmacies.extend(store.find_by_commune(&name, false).await?);
        }
        let table = Self::from_pharmacies(&pharmacies, min_pharmacies);
        info!(
            pharmacies = pharmacies.len(),
            centroids = table.len(),
            elapsed = ?t_compute.elapsed(),
            "Commune centroids computed"
        );
        Ok(table)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommuneCentroid> {
        self.centroids.iter()
    }

    /// Closest centroid to `point` and its distance in km. Ties go to the
    /// commune with more pharmacies.
    #[must_use]
    pub fn nearest(&self, point: GeoPoint) -> Option<(&CommuneCentroid, f64)> {
        let nearest = self
            .centroids
            .iter()
            .map(|c| (c, haversine_km(point, c.center)))
            .fold(None, |best: Option<(&CommuneCentroid, f64)>, candidate| match best {
                Some(b) if b.1 <= candidate.1 => Some(b),
                _ => Some(candidate),
            });
        if let Some((c, d)) = nearest {
            debug!(commune = %c.commune, distance_km = d, "Nearest centroid");
        }
        nearest
    }
}
