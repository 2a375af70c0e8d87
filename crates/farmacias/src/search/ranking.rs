use farmacias_data::{GeoPoint, Pharmacy, haversine_km};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A pharmacy annotated with its distance from the search origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPharmacy {
    #[serde(flatten)]
    pub pharmacy: Pharmacy,
    /// Kilometres, rounded to two decimals. `None` when the pharmacy has no
    /// coordinates.
    pub distance_km: Option<f64>,
    /// Display form, e.g. `"2.4 km"`.
    pub distance_text: Option<String>,
}

/// Orders on-duty pharmacies first and nearest first within each group,
/// then keeps the first `limit` entries. A `limit` of zero keeps them all.
///
/// Pharmacies without coordinates go last in their group.
#[must_use]
pub fn rank_and_limit(
    pharmacies: Vec<Pharmacy>,
    origin: GeoPoint,
    limit: usize,
) -> Vec<RankedPharmacy> {
    let mut scored = pharmacies
        .into_iter()
        .map(|p| {
            let distance = p.location.map(|loc| haversine_km(origin, loc));
            (p, distance)
        })
        .collect::<Vec<_>>();

    scored.sort_by(|(a, da), (b, db)| {
        b.is_on_duty
            .cmp(&a.is_on_duty)
            .then_with(|| match (da, db) {
                (Some(x), Some(y)) => x.total_cmp(y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
    });

    let total = scored.len();
    if limit > 0 {
        scored.truncate(limit);
    }
    debug!(total, kept = scored.len(), "Ranked pharmacies");

    scored
        .into_iter()
        .map(|(pharmacy, distance)| RankedPharmacy {
            pharmacy,
            distance_km: distance.map(|d| (d * 100.0).round() / 100.0),
            distance_text: distance.map(|d| format!("{d:.1} km")),
        })
        .collect()
}
