//! Deterministic fixtures shared by unit and integration tests.
//!
//! The pharmacies sit at real commune locations in Chile. The fixture clock
//! is frozen at Monday 2024-07-01 12:00, so "open now" answers are stable.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::{
    corpus::{CommuneCorpus, CommuneEntry, CommuneStats, derive_variations},
    geo::GeoPoint,
    model::{OpeningHours, Pharmacy},
    store::{Clock, InMemoryPharmacyStore},
};

/// Kilometres per degree of latitude on the haversine sphere.
const KM_PER_DEGREE_LAT: f64 = 111.194_926_644_558_73;

#[must_use]
pub fn fixture_now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 7, 1)
        .and_then(|d| d.and_hms_opt(12, 0, 0))
        .unwrap_or_default()
}

fn hours(open: (u32, u32), close: (u32, u32)) -> OpeningHours {
    let time = |(h, m)| NaiveTime::from_hms_opt(h, m, 0).unwrap_or_default();
    OpeningHours::new(time(open), time(close))
}

fn daytime() -> OpeningHours {
    hours((9, 0), (21, 0))
}

fn regular(id: &str, name: &str, commune: &str, lat: f64, lng: f64) -> Pharmacy {
    Pharmacy::new(id, name, commune)
        .with_address(format!("{name} {id}"))
        .at(lat, lng)
        .with_hours(daytime())
}

/// Twenty-five pharmacies across twelve communes.
///
/// Quilpué has one on-duty pharmacy and one closed at noon. Santiago has no
/// on-duty pharmacy, two regular ones open at noon and one without
/// coordinates.
#[must_use]
pub fn sample_pharmacies() -> Vec<Pharmacy> {
    vec![
        regular("QP-1", "Ahumada Quilpué Centro", "Quilpué", -33.0475, -71.4425),
        regular("QP-2", "Cruz Verde Los Carrera", "Quilpué", -33.0500, -71.4400)
            .with_hours(hours((8, 0), (11, 0))),
        regular("QP-3", "Salcobrand Freire", "Quilpué", -33.0450, -71.4500).on_duty(true),
        regular("QP-4", "Dr. Simi Quilpué", "Quilpué", -33.0520, -71.4380),
        regular("VA-1", "Ahumada Villa Alemana", "Villa Alemana", -33.0422, -71.3733),
        regular("VA-2", "Cruz Verde Valparaíso Av.", "Villa Alemana", -33.0440, -71.3700)
            .on_duty(true),
        regular("SC-1", "Ahumada Ahumada", "Santiago", -33.4372, -70.6506),
        regular("SC-2", "Cruz Verde Estado", "Santiago", -33.4400, -70.6480)
            .with_hours(hours((8, 0), (11, 0))),
        regular("SC-3", "Salcobrand 24 Horas", "Santiago", -33.4420, -70.6530)
            .with_hours(hours((0, 0), (0, 0))),
        Pharmacy::new("SC-4", "Botica Sin Coordenadas", "Santiago").with_address("Bandera 300"),
        regular("VP-1", "Ahumada Pedro Montt", "Valparaíso", -33.0472, -71.6127),
        regular("VP-2", "Cruz Verde Condell", "Valparaíso", -33.0430, -71.6200).on_duty(true),
        regular("VM-1", "Salcobrand Valparaíso St", "Viña del Mar", -33.0245, -71.5518),
        regular("VM-2", "Ahumada 14 Norte", "Viña del Mar", -33.0100, -71.5450),
        regular("LC-1", "Cruz Verde Apoquindo", "Las Condes", -33.4089, -70.5667),
        regular("LC-2", "Salcobrand El Golf", "Las Condes", -33.4150, -70.5980).on_duty(true),
        regular("MP-1", "Ahumada Pajaritos", "Maipú", -33.5110, -70.7580),
        regular("MP-2", "Dr. Simi Maipú", "Maipú", -33.5090, -70.7620),
        regular("TM-1", "Cruz Verde Temuco", "Temuco", -38.7359, -72.5904),
        regular("TM-2", "Ahumada Temuco", "Temuco", -38.7390, -72.6000).on_duty(true),
        regular("AF-1", "Salcobrand Antofagasta", "Antofagasta", -23.6509, -70.3975),
        regular("AF-2", "Cruz Verde Antofagasta", "Antofagasta", -23.6450, -70.4010),
        regular("LS-1", "Ahumada La Serena", "La Serena", -29.9027, -71.2519),
        regular("CC-1", "Farmacia Concón", "Concón", -32.9230, -71.5190),
        regular("LM-1", "Farmacia Limache", "Limache", -33.0167, -71.2667),
    ]
}

/// In-memory store over [`sample_pharmacies`] with the fixture clock.
#[must_use]
pub fn sample_store() -> InMemoryPharmacyStore {
    InMemoryPharmacyStore::new(sample_pharmacies()).with_clock(Clock::Fixed(fixture_now()))
}

/// Reference corpus for the sample communes, with hand-written spellings
/// for Quilpué and Santiago and derived ones for the rest.
#[must_use]
pub fn sample_corpus() -> CommuneCorpus {
    let mut corpus = CommuneCorpus::from_names([
        "Villa Alemana",
        "Valparaíso",
        "Viña del Mar",
        "Las Condes",
        "Maipú",
        "Temuco",
        "Antofagasta",
        "La Serena",
        "Concón",
        "Limache",
    ]);
    corpus.insert(
        "Quilpué",
        CommuneEntry {
            variations: ["Quilpué", "quilpue", "QUILPUE", "Quilpue"]
                .map(str::to_owned)
                .to_vec(),
            statistics: CommuneStats {
                total_pharmacies: 4,
                duty_pharmacies: 1,
            },
            ..Default::default()
        },
    );
    corpus.insert(
        "Santiago",
        CommuneEntry {
            variations: derive_variations("Santiago"),
            statistics: CommuneStats {
                total_pharmacies: 4,
                duty_pharmacies: 0,
            },
            ..Default::default()
        },
    );
    corpus
}

/// `count` pharmacies due north of `origin`, `distance_km` away, all in
/// `commune`. Ids are `{prefix}-{n}`.
#[must_use]
pub fn pharmacies_north_of(
    origin: GeoPoint,
    distance_km: f64,
    count: usize,
    prefix: &str,
    commune: &str,
) -> Vec<Pharmacy> {
    let lat = origin.lat + distance_km / KM_PER_DEGREE_LAT;
    (0..count)
        .map(|n| {
            Pharmacy::new(format!("{prefix}-{n}"), format!("Farmacia {prefix} {n}"), commune)
                .at(lat, origin.lng)
                .with_hours(daytime())
        })
        .collect()
}
