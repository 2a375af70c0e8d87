//! Tunable constants of the engine and a builder to adjust them.
//!
//! The defaults reproduce the behaviour the service has always had. They are
//! empirical, so prefer adjusting them here over hard-coding new values at
//! call sites.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FinderError;

pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";
pub const DEFAULT_USER_AGENT: &str = concat!("farmacias/", env!("CARGO_PKG_VERSION"));

/// Acceptance thresholds and suggestion sizes of the commune matching cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchThresholds {
    /// Minimum score for a fuzzy match to be committed.
    pub fuzzy_high: f64,
    /// Fuzzy candidates below this score are not considered by the
    /// high-confidence stage.
    pub fuzzy_candidate_floor: f64,
    pub embedding: f64,
    pub trigram: f64,
    /// Minimum score for a commune to be offered as a low-confidence guess.
    pub fuzzy_low: f64,
    /// Added when one normalized string contains the other.
    pub substring_bonus: f64,
    pub fuzzy_high_suggestions: usize,
    pub embedding_suggestions: usize,
    pub trigram_suggestions: usize,
    pub fuzzy_low_suggestions: usize,
    /// Trigram candidates kept after scoring.
    pub trigram_top_k: usize,
    /// Embedding candidates kept after scoring.
    pub embedding_top_k: usize,
}

impl Default for MatchThresholds {
    fn default() -> Self {
        Self {
            fuzzy_high: 0.90,
            fuzzy_candidate_floor: 0.85,
            embedding: 0.80,
            trigram: 0.60,
            fuzzy_low: 0.30,
            substring_bonus: 0.20,
            fuzzy_high_suggestions: 2,
            embedding_suggestions: 2,
            trigram_suggestions: 3,
            fuzzy_low_suggestions: 5,
            trigram_top_k: 10,
            embedding_top_k: 5,
        }
    }
}

/// Radius escalation ladder and its stop rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadiusPolicy {
    /// Initial radii up to this value are escalated through `ladder_tail`.
    pub expansion_cutoff_km: f64,
    pub ladder_tail_km: Vec<f64>,
    /// Stop as soon as this many pharmacies are found.
    pub sufficient_results: usize,
    /// Stop with at least `partial_results` once the radius reaches `partial_radius_km`.
    pub partial_results: usize,
    pub partial_radius_km: f64,
    /// Stop with any result once the radius reaches this value.
    pub any_result_radius_km: f64,
}

impl Default for RadiusPolicy {
    fn default() -> Self {
        Self {
            expansion_cutoff_km: 10.0,
            ladder_tail_km: vec![15.0, 20.0, 25.0],
            sufficient_results: 10,
            partial_results: 5,
            partial_radius_km: 15.0,
            any_result_radius_km: 20.0,
        }
    }
}

impl RadiusPolicy {
    /// Radii to try, in order, for a search starting at `initial_km`.
    #[must_use]
    pub fn ladder(&self, initial_km: f64) -> Vec<f64> {
        if initial_km <= self.expansion_cutoff_km {
            std::iter::once(initial_km)
                .chain(self.ladder_tail_km.iter().copied())
                .collect()
        } else {
            vec![initial_km]
        }
    }

    #[must_use]
    pub fn should_stop(&self, found: usize, radius_km: f64) -> bool {
        found >= self.sufficient_results
            || (found >= self.partial_results && radius_km >= self.partial_radius_km)
            || (found > 0 && radius_km >= self.any_result_radius_km)
    }
}

/// Local and external reverse geocoding settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocoderConfig {
    /// Centroids further away than this never resolve a commune.
    pub local_max_distance_km: f64,
    /// Local confidence above this skips the external call.
    pub local_accept_confidence: f64,
    /// Floor of the local confidence for any accepted centroid.
    pub local_min_confidence: f64,
    /// Minimum pharmacies with coordinates for a commune to get a centroid.
    pub min_pharmacies_per_centroid: usize,
    pub nominatim_enabled: bool,
    pub nominatim_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub zoom: u8,
    pub accept_language: String,
    pub chile_confidence: f64,
    pub foreign_confidence: f64,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            local_max_distance_km: 50.0,
            local_accept_confidence: 0.5,
            local_min_confidence: 0.1,
            min_pharmacies_per_centroid: 2,
            nominatim_enabled: true,
            nominatim_url: DEFAULT_NOMINATIM_URL.to_owned(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            timeout: Duration::from_secs(5),
            zoom: 10,
            accept_language: "es,en".to_owned(),
            chile_confidence: 0.8,
            foreign_confidence: 0.6,
        }
    }
}

impl GeocoderConfig {
    /// Defaults overridden by `NOMINATIM_URL` and `NOMINATIM_USER_AGENT`.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("NOMINATIM_URL")
            && !url.trim().is_empty()
        {
            config.nominatim_url = url.trim().trim_end_matches('/').to_owned();
        }
        if let Ok(agent) = std::env::var("NOMINATIM_USER_AGENT")
            && !agent.trim().is_empty()
        {
            config.user_agent = agent.trim().to_owned();
        }
        config
    }
}

/// Everything a [`crate::PharmacyFinder`] can be tuned with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinderConfig {
    pub matching: MatchThresholds,
    pub radius: RadiusPolicy,
    pub geocoder: GeocoderConfig,
}

impl FinderConfig {
    pub fn builder() -> FinderConfigBuilder {
        FinderConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), FinderError> {
        let m = &self.matching;
        for (name, value) in [
            ("fuzzy_high", m.fuzzy_high),
            ("fuzzy_candidate_floor", m.fuzzy_candidate_floor),
            ("embedding", m.embedding),
            ("trigram", m.trigram),
            ("fuzzy_low", m.fuzzy_low),
            ("substring_bonus", m.substring_bonus),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(FinderError::ConfigError(format!(
                    "Threshold {name} must be within [0, 1], got {value}"
                )));
            }
        }
        if m.fuzzy_candidate_floor > m.fuzzy_high {
            return Err(FinderError::ConfigError(format!(
                "fuzzy_candidate_floor ({}) cannot exceed fuzzy_high ({})",
                m.fuzzy_candidate_floor, m.fuzzy_high
            )));
        }

        let r = &self.radius;
        let ladder = r.ladder(r.expansion_cutoff_km);
        if ladder.iter().any(|km| !km.is_finite() || *km <= 0.0) {
            return Err(FinderError::ConfigError(format!(
                "Radius ladder must be positive, got {ladder:?}"
            )));
        }
        if ladder.windows(2).any(|w| w[1] < w[0]) {
            return Err(FinderError::ConfigError(format!(
                "Radius ladder must be non-decreasing, got {ladder:?}"
            )));
        }

        let g = &self.geocoder;
        if g.timeout.is_zero() {
            return Err(FinderError::ConfigError(
                "Geocoder timeout must be positive".to_owned(),
            ));
        }
        if g.local_max_distance_km <= 0.0 {
            return Err(FinderError::ConfigError(format!(
                "local_max_distance_km must be positive, got {}",
                g.local_max_distance_km
            )));
        }
        Ok(())
    }
}

/// Builder for [`FinderConfig`] with the usual presets.
#[derive(Debug, Clone, Default)]
pub struct FinderConfigBuilder {
    config: FinderConfig,
}

impl FinderConfigBuilder {
    /// Defaults, with Nominatim settings taken from the environment.
    pub fn new() -> Self {
        Self {
            config: FinderConfig {
                geocoder: GeocoderConfig::from_env(),
                ..FinderConfig::default()
            },
        }
    }

    /// No external geocoding: reverse geocoding uses local centroids only.
    pub fn offline() -> Self {
        let mut builder = Self::new();
        builder.config.geocoder.nominatim_enabled = false;
        builder
    }

    pub fn matching(mut self, thresholds: MatchThresholds) -> Self {
        self.config.matching = thresholds;
        self
    }

    pub fn fuzzy_high_threshold(mut self, threshold: f64) -> Self {
        self.config.matching.fuzzy_high = threshold;
        self
    }

    pub fn trigram_threshold(mut self, threshold: f64) -> Self {
        self.config.matching.trigram = threshold;
        self
    }

    pub fn fuzzy_low_threshold(mut self, threshold: f64) -> Self {
        self.config.matching.fuzzy_low = threshold;
        self
    }

    pub fn radius_policy(mut self, policy: RadiusPolicy) -> Self {
        self.config.radius = policy;
        self
    }

    pub fn nominatim_url(mut self, url: impl Into<String>) -> Self {
        self.config.geocoder.nominatim_url = url.into();
        self.config.geocoder.nominatim_enabled = true;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.geocoder.user_agent = agent.into();
        self
    }

    pub fn geocoder_timeout(mut self, timeout: Duration) -> Self {
        self.config.geocoder.timeout = timeout;
        self
    }

    pub fn local_max_distance_km(mut self, km: f64) -> Self {
        self.config.geocoder.local_max_distance_km = km;
        self
    }

    pub fn build(self) -> Result<FinderConfig, FinderError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ladder() {
        let policy = RadiusPolicy::default();
        assert_eq!(policy.ladder(5.0), vec![5.0, 15.0, 20.0, 25.0]);
        assert_eq!(policy.ladder(10.0), vec![10.0, 15.0, 20.0, 25.0]);
        assert_eq!(policy.ladder(12.0), vec![12.0]);
    }

    #[test]
    fn test_stop_rules() {
        let policy = RadiusPolicy::default();
        assert!(policy.should_stop(10, 5.0));
        assert!(!policy.should_stop(9, 10.0));
        assert!(policy.should_stop(5, 15.0));
        assert!(!policy.should_stop(4, 15.0));
        assert!(policy.should_stop(1, 20.0));
        assert!(!policy.should_stop(0, 25.0));
    }

    #[test]
    fn test_builder_presets() {
        let config = FinderConfigBuilder::offline().build().unwrap();
        assert!(!config.geocoder.nominatim_enabled);
        assert_eq!(config.geocoder.timeout, Duration::from_secs(5));

        let config = FinderConfigBuilder::offline()
            .nominatim_url("http://localhost:8080")
            .build()
            .unwrap();
        assert!(config.geocoder.nominatim_enabled);
    }

    #[test]
    fn test_validation_rejects_bad_thresholds() {
        let err = FinderConfig::builder().fuzzy_high_threshold(1.5).build();
        assert!(matches!(err, Err(FinderError::ConfigError(_))));

        let err = FinderConfig::builder().fuzzy_high_threshold(0.8).build();
        assert!(matches!(err, Err(FinderError::ConfigError(_))));
    }

    #[test]
    fn test_validation_rejects_decreasing_ladder() {
        let policy = RadiusPolicy {
            ladder_tail_km: vec![15.0, 12.0],
            ..RadiusPolicy::default()
        };
        let err = FinderConfig::builder().radius_policy(policy).build();
        assert!(matches!(err, Err(FinderError::ConfigError(_))));
    }

    #[test]
    fn test_validation_rejects_zero_timeout() {
        let err = FinderConfig::builder()
            .geocoder_timeout(Duration::ZERO)
            .build();
        assert!(matches!(err, Err(FinderError::ConfigError(_))));
    }
}
