//! Reverse geocoding through an OpenStreetMap Nominatim server.

use std::time::Duration;

use farmacias_data::GeoPoint;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::{GeocodeMethod, LocationInfo};
use crate::config::GeocoderConfig;

#[derive(Error, Debug)]
pub(crate) enum NominatimError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Nominatim reported: {0}")]
    Api(String),
}

/// Fields of the `/reverse` response the engine reads. Everything else is
/// kept only in the raw payload.
#[derive(Debug, Default, Deserialize)]
struct ReverseAddress {
    municipality: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    suburb: Option<String>,
    state: Option<String>,
    region: Option<String>,
    province: Option<String>,
    country: Option<String>,
}

fn first_present(candidates: &[&Option<String>]) -> Option<String> {
    candidates
        .iter()
        .filter_map(|c| c.as_deref())
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Client for the Nominatim `/reverse` endpoint. One attempt per call,
/// bounded by the configured timeout.
#[derive(Debug, Clone)]
pub struct NominatimClient {
    client: Client,
    reverse_url: String,
    zoom: u8,
    accept_language: String,
    chile_confidence: f64,
    foreign_confidence: f64,
}

impl NominatimClient {
    pub fn new(config: &GeocoderConfig) -> crate::error::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(Duration::from_secs(5)))
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self {
            client,
            reverse_url: format!("{}/reverse", config.nominatim_url.trim_end_matches('/')),
            zoom: config.zoom,
            accept_language: config.accept_language.clone(),
            chile_confidence: config.chile_confidence,
            foreign_confidence: config.foreign_confidence,
        })
    }

    /// Resolves `point`. Failures come back as
    /// [`GeocodeMethod::NominatimError`], never as errors.
    #[instrument(name = "Nominatim reverse", level = "debug", skip(self))]
    pub async fn reverse(&self, point: GeoPoint) -> LocationInfo {
        match self.fetch(point).await {
            Ok(body) => self.parse(body),
            Err(e) => {
                warn!(error = %e, lat = point.lat, lng = point.lng, "Nominatim lookup failed");
                LocationInfo::empty(GeocodeMethod::NominatimError)
            }
        }
    }

    async fn fetch(&self, point: GeoPoint) -> Result<serde_json::Value, NominatimError> {
        let body = self
            .client
            .get(&self.reverse_url)
            .query(&[
                ("lat", point.lat.to_string()),
                ("lon", point.lng.to_string()),
                ("format", "json".to_owned()),
                ("accept-language", self.accept_language.clone()),
                ("zoom", self.zoom.to_string()),
                ("addressdetails", "1".to_owned()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?;
        if let Some(error) = body.get("error") {
            return Err(NominatimError::Api(
                error.as_str().map_or_else(|| error.to_string(), str::to_owned),
            ));
        }
        Ok(body)
    }

    fn parse(&self, body: serde_json::Value) -> LocationInfo {
        let address = body
            .get("address")
            .cloned()
            .and_then(|a| serde_json::from_value::<ReverseAddress>(a).ok())
            .unwrap_or_default();

        let commune = first_present(&[
            &address.municipality,
            &address.city,
            &address.town,
            &address.village,
            &address.suburb,
        ]);
        let city = first_present(&[&address.city, &commune]);
        let region = first_present(&[&address.state, &address.region, &address.province]);
        let country = address.country.filter(|c| !c.trim().is_empty());
        let in_chile = country
            .as_deref()
            .is_some_and(|c| c.to_lowercase().contains("chile"));
        // Without a commune there is nothing to be confident about.
        let confidence = match (&commune, in_chile) {
            (None, _) => 0.0,
            (Some(_), true) => self.chile_confidence,
            (Some(_), false) => self.foreign_confidence,
        };
        debug!(?commune, ?region, ?country, confidence, "Nominatim resolved");

        LocationInfo {
            commune,
            city,
            region,
            country,
            confidence,
            method: GeocodeMethod::NominatimApi,
            raw: Some(body),
        }
    }
}
