//! The pharmacy record as published by the national registry.

use chrono::{Datelike, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use crate::geo::GeoPoint;

/// Declared opening hours of a regular pharmacy.
///
/// `operating_day` is the Spanish weekday name the registry attaches to a
/// schedule row ("lunes", "sábado", ...). When absent the hours apply every day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningHours {
    pub opens_at: Option<NaiveTime>,
    pub closes_at: Option<NaiveTime>,
    pub operating_day: Option<String>,
}

impl OpeningHours {
    #[must_use]
    pub fn new(opens_at: NaiveTime, closes_at: NaiveTime) -> Self {
        Self {
            opens_at: Some(opens_at),
            closes_at: Some(closes_at),
            operating_day: None,
        }
    }

    #[must_use]
    pub fn on_day(mut self, day: impl Into<String>) -> Self {
        self.operating_day = Some(day.into());
        self
    }

    /// Parses the registry's `HH:MM[:SS]` notation.
    #[must_use]
    pub fn parse_time(raw: &str) -> Option<NaiveTime> {
        let raw = raw.trim();
        NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
            .ok()
    }

    /// Whether the schedule covers `at`.
    ///
    /// Ranges whose closing time precedes the opening time run past
    /// midnight. Identical opening and closing times mean round-the-clock.
    /// Unknown hours are treated as closed.
    #[must_use]
    pub fn covers(&self, at: NaiveDateTime) -> bool {
        if let Some(day) = self.operating_day.as_deref().and_then(parse_spanish_weekday)
            && day != at.weekday()
        {
            return false;
        }

        let (Some(opens), Some(closes)) = (self.opens_at, self.closes_at) else {
            return false;
        };
        let now = at.time();
        match opens.cmp(&closes) {
            std::cmp::Ordering::Less => now >= opens && now < closes,
            std::cmp::Ordering::Greater => now >= opens || now < closes,
            std::cmp::Ordering::Equal => true,
        }
    }
}

fn parse_spanish_weekday(raw: &str) -> Option<Weekday> {
    match raw.trim().to_lowercase().as_str() {
        "lunes" => Some(Weekday::Mon),
        "martes" => Some(Weekday::Tue),
        "miercoles" | "miércoles" => Some(Weekday::Wed),
        "jueves" => Some(Weekday::Thu),
        "viernes" => Some(Weekday::Fri),
        "sabado" | "sábado" => Some(Weekday::Sat),
        "domingo" => Some(Weekday::Sun),
        _ => None,
    }
}

/// A pharmacy as stored by the collaborator store. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pharmacy {
    /// Stable registry identifier (`local_id`).
    pub local_id: String,
    pub name: String,
    pub address: String,
    pub commune: String,
    pub location: Option<GeoPoint>,
    /// On-duty ("de turno") pharmacies provide emergency service and are
    /// considered open at all times.
    pub is_on_duty: bool,
    #[serde(default)]
    pub hours: OpeningHours,
}

impl Pharmacy {
    pub fn new(
        local_id: impl Into<String>,
        name: impl Into<String>,
        commune: impl Into<String>,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            name: name.into(),
            address: String::new(),
            commune: commune.into(),
            location: None,
            is_on_duty: false,
            hours: OpeningHours::default(),
        }
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Sets coordinates; unusable points (zeros, out of range) are dropped.
    #[must_use]
    pub fn at(mut self, lat: f64, lng: f64) -> Self {
        let point = GeoPoint::new(lat, lng);
        self.location = point.is_usable().then_some(point);
        self
    }

    #[must_use]
    pub fn on_duty(mut self, on_duty: bool) -> Self {
        self.is_on_duty = on_duty;
        self
    }

    #[must_use]
    pub fn with_hours(mut self, hours: OpeningHours) -> Self {
        self.hours = hours;
        self
    }

    #[must_use]
    pub fn is_open_at(&self, at: NaiveDateTime) -> bool {
        self.is_on_duty || self.hours.covers(at)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        // 2024-07-01 is a Monday
        NaiveDate::from_ymd_opt(2024, 7, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_regular_hours() {
        let hours = OpeningHours::new(t(9, 0), t(21, 0));
        assert!(hours.covers(at(1, 9, 0)));
        assert!(hours.covers(at(1, 20, 59)));
        assert!(!hours.covers(at(1, 21, 0)));
        assert!(!hours.covers(at(1, 8, 30)));
    }

    #[test]
    fn test_overnight_hours() {
        let hours = OpeningHours::new(t(20, 0), t(2, 0));
        assert!(hours.covers(at(1, 23, 0)));
        assert!(hours.covers(at(1, 1, 30)));
        assert!(!hours.covers(at(1, 12, 0)));
    }

    #[test]
    fn test_round_the_clock_hours() {
        let hours = OpeningHours::new(t(0, 0), t(0, 0));
        assert!(hours.covers(at(1, 3, 0)));
    }

    #[test]
    fn test_operating_day_restricts_schedule() {
        let hours = OpeningHours::new(t(9, 0), t(21, 0)).on_day("Sábado");
        assert!(!hours.covers(at(1, 10, 0)));
        assert!(hours.covers(at(6, 10, 0)));
    }

    #[test]
    fn test_unknown_hours_are_closed() {
        assert!(!OpeningHours::default().covers(at(1, 12, 0)));
    }

    #[test]
    fn test_on_duty_always_open() {
        let pharmacy = Pharmacy::new("1", "Cruz Verde", "Quilpué").on_duty(true);
        assert!(pharmacy.is_open_at(at(1, 4, 0)));
    }

    #[test]
    fn test_parse_time_formats() {
        assert_eq!(OpeningHours::parse_time("09:00:00"), Some(t(9, 0)));
        assert_eq!(OpeningHours::parse_time(" 21:30 "), Some(t(21, 30)));
        assert_eq!(OpeningHours::parse_time("nope"), None);
    }

    #[test]
    fn test_zero_coordinates_are_dropped() {
        assert!(Pharmacy::new("1", "A", "Santiago").at(0.0, 0.0).location.is_none());
        assert!(Pharmacy::new("1", "A", "Santiago").at(-33.4, -70.6).location.is_some());
    }
}
