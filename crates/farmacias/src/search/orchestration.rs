//! Request flows combining matching, store lookups, geocoding and ranking.
//!
//! Invalid input and unresolved communes come back as responses with an
//! explanatory Spanish message. Only store failures are returned as errors.

use farmacias_data::{GeoPoint, Pharmacy, PharmacyStore};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::{
    RankedPharmacy, Result, SearchAttempt, SearchError, radius::radius_search_inner,
    ranking::rank_and_limit,
};
use crate::{
    config::RadiusPolicy,
    geocode::{LocationInfo, ReverseGeocoder},
    matcher::{CommuneMatcher, MatchMethod, MatchResult},
};

/// Most alternatives offered when a commune query is unresolved.
const MAX_ALTERNATIVES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommuneSearchParams {
    /// Only on-duty pharmacies.
    pub duty_only: bool,
    /// Keep pharmacies that are closed right now.
    pub include_closed: bool,
    /// Maximum pharmacies returned. Zero means no limit.
    pub limit: usize,
}

impl Default for CommuneSearchParams {
    fn default() -> Self {
        Self {
            duty_only: false,
            include_closed: true,
            limit: 10,
        }
    }
}

/// "Did you mean" payload for an unresolved commune query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommuneSuggestions {
    pub message: String,
    pub alternatives: Vec<String>,
    pub original_query: String,
    pub confidence: f64,
    pub method: MatchMethod,
}

/// Regular pharmacy counts offered when an on-duty search finds nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DutyFallback {
    pub total_regular: usize,
    pub regular_open_now: usize,
    pub suggestion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommuneSearch {
    pub query: String,
    pub params: CommuneSearchParams,
    pub match_result: MatchResult,
    /// Resolved commune, when the match committed to one.
    pub commune: Option<String>,
    pub pharmacies: Vec<Pharmacy>,
    /// Pharmacies found before the limit was applied.
    pub total: usize,
    pub suggestions: Option<CommuneSuggestions>,
    pub duty_fallback: Option<DutyFallback>,
    pub message: String,
}

impl CommuneSearch {
    fn unresolved(
        query: &str,
        params: CommuneSearchParams,
        match_result: MatchResult,
        message: String,
    ) -> Self {
        let suggestions = (!match_result.suggestions.is_empty()).then(|| CommuneSuggestions {
            message: "¿Quisiste decir alguna de estas comunas?".to_owned(),
            alternatives: match_result
                .suggestions
                .iter()
                .take(MAX_ALTERNATIVES)
                .cloned()
                .collect(),
            original_query: query.to_owned(),
            confidence: match_result.confidence,
            method: match_result.method,
        });
        Self {
            query: query.to_owned(),
            params,
            match_result,
            commune: None,
            pharmacies: Vec::new(),
            total: 0,
            suggestions,
            duty_fallback: None,
            message,
        }
    }
}

/// Resolves `query` to a commune and lists its pharmacies.
#[instrument(name = "Search by commune", level = "info", skip(store, matcher))]
pub async fn search_by_commune_inner(
    store: &dyn PharmacyStore,
    matcher: &CommuneMatcher,
    query: &str,
    params: CommuneSearchParams,
) -> Result<CommuneSearch> {
    let match_result = matcher.match_commune(query);
    if match_result.method == MatchMethod::Error {
        return Ok(CommuneSearch::unresolved(
            query,
            params,
            match_result,
            "Se requiere especificar una comuna para la búsqueda".to_owned(),
        ));
    }
    if !match_result.is_match() {
        info!(
            method = %match_result.method,
            suggestions = match_result.suggestions.len(),
            "Commune not resolved"
        );
        let message = format!("No se encontraron farmacias en '{}'", query.trim());
        return Ok(CommuneSearch::unresolved(query, params, match_result, message));
    }

    let commune = match_result.matched_commune.clone();
    let mut found = store
        .find_by_commune(&commune, !params.include_closed)
        .await?;
    if params.duty_only {
        found.retain(|p| p.is_on_duty);
    }
    let total = found.len();
    if params.limit > 0 {
        found.truncate(params.limit);
    }

    let duty_fallback = if params.duty_only && total == 0 {
        Some(duty_fallback(store, &commune).await?)
    } else {
        None
    };
    let message = match &duty_fallback {
        Some(fallback) if fallback.total_regular > 0 => format!(
            "No se encontraron farmacias de turno en {commune}, pero hay {} farmacias regulares disponibles.",
            fallback.total_regular
        ),
        _ => commune_summary(&commune, total, found.len(), params.duty_only),
    };
    info!(
        commune = %commune,
        method = %match_result.method,
        total,
        shown = found.len(),
        "Commune search complete"
    );

    Ok(CommuneSearch {
        query: query.to_owned(),
        params,
        match_result,
        commune: Some(commune),
        pharmacies: found,
        total,
        suggestions: None,
        duty_fallback,
        message,
    })
}

async fn duty_fallback(store: &dyn PharmacyStore, commune: &str) -> Result<DutyFallback> {
    let regular = store
        .find_by_commune(commune, false)
        .await?
        .into_iter()
        .filter(|p| !p.is_on_duty)
        .collect::<Vec<_>>();
    let regular_open_now = regular
        .iter()
        .filter(|p| store.is_currently_open(p))
        .count();
    let total_regular = regular.len();
    let suggestion = if total_regular > 0 {
        format!("No hay farmacias de turno, pero hay {total_regular} farmacias regulares disponibles")
    } else {
        "No hay farmacias de turno ni regulares disponibles".to_owned()
    };
    Ok(DutyFallback {
        total_regular,
        regular_open_now,
        suggestion,
    })
}

fn commune_summary(commune: &str, total: usize, shown: usize, duty_only: bool) -> String {
    let scope = if duty_only {
        "solo de turno"
    } else {
        "todas las farmacias"
    };
    if total > shown {
        format!("Se encontraron {total} farmacias en {commune} ({scope}). Mostrando {shown} resultados.")
    } else {
        format!("Se encontraron {total} farmacias en {commune} ({scope}).")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordinateSearchParams {
    pub initial_radius_km: f64,
    /// Only pharmacies open right now (on-duty ones always count as open).
    pub open_only: bool,
    /// Maximum pharmacies returned. Zero means no limit.
    pub limit: usize,
}

impl Default for CoordinateSearchParams {
    fn default() -> Self {
        Self {
            initial_radius_km: 10.0,
            open_only: false,
            limit: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateSearch {
    pub origin: GeoPoint,
    pub params: CoordinateSearchParams,
    pub radius_used_km: f64,
    pub expanded: bool,
    pub attempts: Vec<SearchAttempt>,
    /// Where the origin is, best effort. `None` when the input was rejected.
    pub location: Option<LocationInfo>,
    pub pharmacies: Vec<RankedPharmacy>,
    pub message: String,
}

impl CoordinateSearch {
    fn rejected(origin: GeoPoint, params: CoordinateSearchParams, message: &str) -> Self {
        Self {
            origin,
            params,
            radius_used_km: params.initial_radius_km,
            expanded: false,
            attempts: Vec::new(),
            location: None,
            pharmacies: Vec::new(),
            message: message.to_owned(),
        }
    }
}

/// Finds pharmacies around `origin`, escalating the radius when the area is
/// sparse, and describes where the origin is.
///
/// Geocoding and the radius search run concurrently. A geocoding failure
/// only leaves the location less precise.
#[instrument(name = "Search by coordinates", level = "info", skip(store, geocoder, policy))]
pub async fn search_by_coordinates_inner(
    store: &dyn PharmacyStore,
    geocoder: &ReverseGeocoder,
    policy: &RadiusPolicy,
    origin: GeoPoint,
    params: CoordinateSearchParams,
) -> Result<CoordinateSearch> {
    if !origin.is_usable() {
        warn!(lat = origin.lat, lng = origin.lng, "Rejecting coordinates");
        return Ok(CoordinateSearch::rejected(
            origin,
            params,
            "Se requieren coordenadas válidas (latitud y longitud)",
        ));
    }

    let (location, search) = tokio::join!(
        geocoder.reverse_geocode(origin.lat, origin.lng),
        radius_search_inner(
            store,
            policy,
            origin,
            params.initial_radius_km,
            params.open_only
        )
    );
    let search = match search {
        Ok(search) => search,
        Err(SearchError::InvalidRadius(radius)) => {
            return Ok(CoordinateSearch::rejected(
                origin,
                params,
                &format!("El radio de búsqueda debe ser mayor que cero (recibido {radius}km)"),
            ));
        }
        Err(e) => return Err(e),
    };

    let expanded = search.expanded_beyond(params.initial_radius_km);
    let pharmacies = rank_and_limit(search.pharmacies, origin, params.limit);
    let message = coordinate_summary(
        pharmacies.len(),
        params,
        search.radius_used_km,
        expanded,
        &location,
    );
    info!(
        found = pharmacies.len(),
        radius_used_km = search.radius_used_km,
        expanded,
        location = ?location.commune,
        "Coordinate search complete"
    );

    Ok(CoordinateSearch {
        origin,
        params,
        radius_used_km: search.radius_used_km,
        expanded,
        attempts: search.attempts,
        location: Some(location),
        pharmacies,
        message,
    })
}

fn coordinate_summary(
    found: usize,
    params: CoordinateSearchParams,
    radius_used_km: f64,
    expanded: bool,
    location: &LocationInfo,
) -> String {
    let near = if location.has_commune() {
        format!(" cerca de {}", location.summary())
    } else {
        String::new()
    };
    let initial = params.initial_radius_km;
    if found == 0 {
        let kind = if params.open_only { " abiertas" } else { "" };
        return if expanded {
            format!(
                "No se encontraron farmacias{kind}{near} incluso expandiendo la búsqueda hasta {radius_used_km}km."
            )
        } else {
            format!("No se encontraron farmacias{kind}{near} en un radio de {radius_used_km}km.")
        };
    }

    let kind = if params.open_only {
        " abiertas"
    } else {
        " en el área"
    };
    if expanded {
        format!(
            "Se encontraron {found} farmacias{kind}{near} expandiendo la búsqueda a {radius_used_km}km (iniciado con {initial}km)."
        )
    } else {
        format!("Se encontraron {found} farmacias{kind}{near} en un radio de {radius_used_km}km.")
    }
}
