//! Reverse geocoding: coordinates to commune.
//!
//! The local estimate (nearest commune centroid) answers on its own when it
//! is confident enough. Otherwise Nominatim is asked once and the two answers
//! are reconciled by confidence. Network failures only lower the quality of
//! the answer, they never fail the call.

use std::fmt;

use farmacias_data::GeoPoint;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

mod centroids;
mod nominatim;

pub use centroids::{CentroidTable, CommuneCentroid};
pub use nominatim::NominatimClient;

use crate::{config::GeocoderConfig, error::Result, normalize::normalize};

/// Confidence below which a location summary is marked as approximate.
const APPROXIMATE_BELOW: f64 = 0.7;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocodeMethod {
    LocalDatabase,
    LocalNoMatch,
    /// No centroids exist yet, so the local estimate could not run.
    LocalNoData,
    NominatimApi,
    NominatimError,
    #[default]
    Unknown,
}

impl GeocodeMethod {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LocalDatabase => "local_database",
            Self::LocalNoMatch => "local_no_match",
            Self::LocalNoData => "local_no_data",
            Self::NominatimApi => "nominatim_api",
            Self::NominatimError => "nominatim_error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for GeocodeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What reverse geocoding learned about a coordinate pair.
///
/// A positive confidence always comes with a commune.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationInfo {
    pub commune: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub confidence: f64,
    pub method: GeocodeMethod,
    /// Provider payload, for diagnostics only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<serde_json::Value>,
}

impl LocationInfo {
    #[must_use]
    pub fn empty(method: GeocodeMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn has_commune(&self) -> bool {
        self.commune.as_deref().is_some_and(|c| !c.trim().is_empty())
    }

    /// Short Spanish description for messages, e.g.
    /// `"Quilpué, Valparaíso (aproximadamente)"`.
    #[must_use]
    pub fn summary(&self) -> String {
        let commune = self.commune.as_deref().filter(|c| !c.trim().is_empty());
        let city = self.city.as_deref().filter(|c| !c.trim().is_empty());
        let Some(commune) = commune else {
            return if city.is_some() {
                "ubicación aproximada".to_owned()
            } else {
                "ubicación no identificada".to_owned()
            };
        };

        let mut parts = vec![title_case(commune)];
        if let Some(region) = self
            .region
            .as_deref()
            .filter(|r| !r.trim().is_empty() && normalize(r) != normalize(commune))
        {
            parts.push(region.trim().to_owned());
        }
        let mut summary = parts.join(", ");
        if self.confidence < APPROXIMATE_BELOW {
            summary.push_str(" (aproximadamente)");
        }
        summary
    }
}

fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect()
            })
        })
        .join(" ")
}

/// Local centroid lookup with an optional Nominatim fallback.
#[derive(Debug, Clone)]
pub struct ReverseGeocoder {
    centroids: CentroidTable,
    nominatim: Option<NominatimClient>,
    config: GeocoderConfig,
}

impl ReverseGeocoder {
    /// Builds the geocoder. The Nominatim client is only created when
    /// enabled in `config`.
    pub fn new(centroids: CentroidTable, config: GeocoderConfig) -> Result<Self> {
        let nominatim = if config.nominatim_enabled {
            Some(NominatimClient::new(&config)?)
        } else {
            None
        };
        Ok(Self {
            centroids,
            nominatim,
            config,
        })
    }

    #[must_use]
    pub const fn centroids(&self) -> &CentroidTable {
        &self.centroids
    }

    /// Swaps in freshly computed centroids, keeping the HTTP client.
    #[must_use]
    pub fn with_centroids(mut self, centroids: CentroidTable) -> Self {
        self.centroids = centroids;
        self
    }

    /// Nearest-centroid estimate, without any network access.
    #[must_use]
    pub fn locate_locally(&self, point: GeoPoint) -> LocationInfo {
        if self.centroids.is_empty() {
            return LocationInfo::empty(GeocodeMethod::LocalNoData);
        }
        match self.centroids.nearest(point) {
            Some((centroid, distance)) if distance <= self.config.local_max_distance_km => {
                let confidence = (1.0 - distance / self.config.local_max_distance_km)
                    .max(self.config.local_min_confidence);
                LocationInfo {
                    commune: Some(centroid.commune.clone()),
                    city: Some(centroid.commune.clone()),
                    region: None,
                    country: None,
                    confidence,
                    method: GeocodeMethod::LocalDatabase,
                    raw: Some(serde_json::json!({
                        "distance_km": (distance * 100.0).round() / 100.0,
                        "pharmacy_count": centroid.pharmacy_count,
                    })),
                }
            }
            _ => LocationInfo::empty(GeocodeMethod::LocalNoMatch),
        }
    }

    #[instrument(name = "Reverse geocode", level = "info", skip(self))]
    pub async fn reverse_geocode(&self, lat: f64, lng: f64) -> LocationInfo {
        let point = GeoPoint::new(lat, lng);
        let local = self.locate_locally(point);
        if local.has_commune() && local.confidence > self.config.local_accept_confidence {
            info!(
                commune = ?local.commune,
                confidence = local.confidence,
                "Resolved from local centroids"
            );
            return local;
        }

        let Some(client) = &self.nominatim else {
            debug!(method = %local.method, "External geocoding disabled");
            return local;
        };
        let remote = client.reverse(point).await;
        let chosen = reconcile(local, remote);
        info!(
            commune = ?chosen.commune,
            method = %chosen.method,
            confidence = chosen.confidence,
            "Reverse geocoding complete"
        );
        chosen
    }
}

/// Picks between the local and the external answer: a commune beats no
/// commune, and between two communes the higher confidence wins, ties
/// going to the external answer. When neither has a commune the local
/// answer is kept.
#[must_use]
pub fn reconcile(local: LocationInfo, remote: LocationInfo) -> LocationInfo {
    match (local.has_commune(), remote.has_commune()) {
        (true, true) if local.confidence > remote.confidence => local,
        (_, true) => remote,
        (true, false) => local,
        (false, false) => local,
    }
}

#[cfg(test)]
mod tests {
    use farmacias_data::test_data::sample_pharmacies;

    use super::*;

    fn located(commune: &str, confidence: f64, method: GeocodeMethod) -> LocationInfo {
        LocationInfo {
            commune: Some(commune.to_owned()),
            city: Some(commune.to_owned()),
            confidence,
            method,
            ..LocationInfo::default()
        }
    }

    fn offline_geocoder() -> ReverseGeocoder {
        let config = GeocoderConfig {
            nominatim_enabled: false,
            ..GeocoderConfig::default()
        };
        ReverseGeocoder::new(CentroidTable::from_pharmacies(&sample_pharmacies(), 2), config)
            .unwrap()
    }

    #[test]
    fn test_reconcile_prefers_higher_confidence() {
        let local = located("Quilpué", 0.45, GeocodeMethod::LocalDatabase);
        let remote = located("Villa Alemana", 0.8, GeocodeMethod::NominatimApi);
        let chosen = reconcile(local.clone(), remote.clone());
        assert_eq!(chosen.commune.as_deref(), Some("Villa Alemana"));
        assert!((chosen.confidence - 0.8).abs() < f64::EPSILON);

        let local = located("Quilpué", 0.5, GeocodeMethod::LocalDatabase);
        let remote = located("Quilpué", 0.2, GeocodeMethod::NominatimApi);
        assert_eq!(reconcile(local, remote).method, GeocodeMethod::LocalDatabase);
    }

    #[test]
    fn test_reconcile_falls_back_to_available_commune() {
        let local = located("Limache", 0.3, GeocodeMethod::LocalDatabase);
        let remote = LocationInfo::empty(GeocodeMethod::NominatimError);
        assert_eq!(reconcile(local, remote).method, GeocodeMethod::LocalDatabase);

        let local = LocationInfo::empty(GeocodeMethod::LocalNoData);
        let remote = located("Curacaví", 0.8, GeocodeMethod::NominatimApi);
        assert_eq!(reconcile(local, remote).method, GeocodeMethod::NominatimApi);
    }

    #[test]
    fn test_reconcile_keeps_local_when_neither_resolves() {
        let local = LocationInfo::empty(GeocodeMethod::LocalNoMatch);
        let remote = LocationInfo {
            region: Some("Región de Aysén".to_owned()),
            ..LocationInfo::empty(GeocodeMethod::NominatimError)
        };
        let chosen = reconcile(local, remote);
        assert_eq!(chosen.method, GeocodeMethod::LocalNoMatch);
        assert!(chosen.region.is_none());
        assert!(chosen.confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn test_local_confidence_decays_with_distance() {
        let geocoder = offline_geocoder();
        let near = geocoder.locate_locally(GeoPoint::new(-33.048, -71.443));
        assert_eq!(near.method, GeocodeMethod::LocalDatabase);
        assert_eq!(near.commune.as_deref(), Some("Quilpué"));
        assert!(near.confidence > 0.95);
        assert!(near.raw.as_ref().unwrap()["pharmacy_count"].as_u64() == Some(4));

        // Pacific Ocean, far from every centroid.
        let far = geocoder.locate_locally(GeoPoint::new(-33.0, -80.0));
        assert_eq!(far.method, GeocodeMethod::LocalNoMatch);
        assert!(far.commune.is_none());
        assert!(far.confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn test_local_no_data() {
        let geocoder = ReverseGeocoder::new(
            CentroidTable::default(),
            GeocoderConfig {
                nominatim_enabled: false,
                ..GeocoderConfig::default()
            },
        )
        .unwrap();
        let info = geocoder.locate_locally(GeoPoint::new(-33.0, -71.0));
        assert_eq!(info.method, GeocodeMethod::LocalNoData);
    }

    #[tokio::test]
    async fn test_offline_reverse_geocode_returns_local() {
        let info = offline_geocoder().reverse_geocode(-33.0, -80.0).await;
        assert_eq!(info.method, GeocodeMethod::LocalNoMatch);
        let info = offline_geocoder().reverse_geocode(-33.4372, -70.6506).await;
        assert_eq!(info.commune.as_deref(), Some("Santiago"));
    }

    #[test]
    fn test_summary() {
        let mut info = located("QUILPUÉ", 0.9, GeocodeMethod::NominatimApi);
        info.region = Some("Valparaíso".to_owned());
        assert_eq!(info.summary(), "Quilpué, Valparaíso");

        info.confidence = 0.4;
        assert_eq!(info.summary(), "Quilpué, Valparaíso (aproximadamente)");

        info.region = Some("quilpué".to_owned());
        info.confidence = 0.9;
        assert_eq!(info.summary(), "Quilpué");

        info.region = Some("Quilpue".to_owned());
        assert_eq!(info.summary(), "Quilpué");

        assert_eq!(
            LocationInfo::empty(GeocodeMethod::Unknown).summary(),
            "ubicación no identificada"
        );
        let city_only = LocationInfo {
            city: Some("Santiago".to_owned()),
            ..LocationInfo::default()
        };
        assert_eq!(city_only.summary(), "ubicación aproximada");
    }
}
