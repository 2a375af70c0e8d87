//! Loading of pharmacy registry exports.
//!
//! Exports use the column names of the national pharmacy registry feed.
//! Every column is read as text and parsed here, since the feed mixes
//! numeric and textual encodings for the same fields.

use std::path::Path;

use itertools::izip;
use polars::prelude::*;
use tracing::{info, instrument, warn};

use crate::{
    error::{DataError, Result},
    model::{OpeningHours, Pharmacy},
};

const SNAPSHOT_COLUMNS: [&str; 10] = [
    "local_id",
    "local_nombre",
    "local_direccion",
    "comuna_nombre",
    "local_lat",
    "local_lng",
    "funcionamiento_hora_apertura",
    "funcionamiento_hora_cierre",
    "funcionamiento_dia",
    "es_turno",
];

/// Reads a comma-separated registry export into [`Pharmacy`] records.
///
/// Rows without an identifier are dropped. Unparseable coordinates are
/// treated as missing; zero coordinates likewise.
#[instrument(name = "Load pharmacy snapshot", level = "info", skip_all)]
pub fn load_pharmacies_csv(path: impl AsRef<Path>) -> Result<Vec<Pharmacy>> {
    let t_load = std::time::Instant::now();
    let df = LazyCsvReader::new(path.as_ref())
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .finish()?
        .select(SNAPSHOT_COLUMNS.map(col))
        .filter(col("local_id").is_not_null())
        .collect()?;

    let pharmacies = frame_to_pharmacies(&df)?;
    info!(
        rows = df.height(),
        loaded = pharmacies.len(),
        elapsed = ?t_load.elapsed(),
        "Pharmacy snapshot loaded"
    );
    Ok(pharmacies)
}

fn frame_to_pharmacies(df: &DataFrame) -> Result<Vec<Pharmacy>> {
    let ids = df.column("local_id")?.str()?;
    let names = df.column("local_nombre")?.str()?;
    let addresses = df.column("local_direccion")?.str()?;
    let communes = df.column("comuna_nombre")?.str()?;
    let lats = df.column("local_lat")?.str()?;
    let lngs = df.column("local_lng")?.str()?;
    let opens = df.column("funcionamiento_hora_apertura")?.str()?;
    let closes = df.column("funcionamiento_hora_cierre")?.str()?;
    let days = df.column("funcionamiento_dia")?.str()?;
    let duty = df.column("es_turno")?.str()?;

    let mut pharmacies = Vec::with_capacity(df.height());
    for (id, name, address, commune, lat, lng, open, close, day, on_duty) in
        izip!(ids, names, addresses, communes, lats, lngs, opens, closes, days, duty)
    {
        let Some(id) = id.map(str::trim).filter(|s| !s.is_empty()) else {
            continue;
        };
        let commune = commune.map(str::trim).unwrap_or_default();
        if commune.is_empty() {
            warn!(local_id = id, "Skipping pharmacy without commune");
            continue;
        }

        let mut pharmacy = Pharmacy::new(id, trimmed_or_empty(name), commune)
            .with_address(trimmed_or_empty(address))
            .on_duty(parse_flag(id, on_duty)?)
            .with_hours(OpeningHours {
                opens_at: open.and_then(OpeningHours::parse_time),
                closes_at: close.and_then(OpeningHours::parse_time),
                operating_day: day.map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned),
            });
        if let (Some(lat), Some(lng)) = (parse_coordinate(lat), parse_coordinate(lng)) {
            pharmacy = pharmacy.at(lat, lng);
        }
        pharmacies.push(pharmacy);
    }
    Ok(pharmacies)
}

fn trimmed_or_empty(raw: Option<&str>) -> &str {
    raw.map(str::trim).unwrap_or_default()
}

// The registry occasionally ships coordinates with a decimal comma.
fn parse_coordinate(raw: Option<&str>) -> Option<f64> {
    raw.map(|s| s.trim().replace(',', "."))
        .and_then(|s| s.parse::<f64>().ok())
}

fn parse_flag(id: &str, raw: Option<&str>) -> Result<bool> {
    match raw.map(|s| s.trim().to_lowercase()).as_deref() {
        None | Some("" | "0" | "false" | "no") => Ok(false),
        Some("1" | "true" | "si" | "sí") => Ok(true),
        Some(other) => Err(DataError::MalformedRecord {
            record: id.to_owned(),
            reason: format!("unrecognised es_turno value '{other}'"),
        }),
    }
}
