//! Records fetched from the data source and the items published from them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A named point whose readings are republished under `{name}/...`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Topic namespace root, unique within a configuration
    #[serde(alias = "Name")]
    pub name: String,
    /// Latitude in decimal degrees
    #[serde(alias = "lat", alias = "Lat")]
    pub latitude: f64,
    /// Longitude in decimal degrees
    #[serde(alias = "long", alias = "Long", alias = "lon")]
    pub longitude: f64,
}

impl Location {
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.into(),
            latitude,
            longitude,
        }
    }

    /// Coordinates as sent upstream: `lat,long` with three decimals.
    pub fn geocode(&self) -> String {
        geocode(self.latitude, self.longitude)
    }
}

/// Format a coordinate pair the way the data source expects it.
pub fn geocode(latitude: f64, longitude: f64) -> String {
    format!("{:.3},{:.3}", latitude, longitude)
}

/// Current weather snapshot. Fields missing upstream are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Observation {
    /// Precipitation over the last hour in mm
    pub precipitation_1h: f64,
    /// Altimeter pressure in hPa
    pub pressure: f64,
    /// Relative humidity in percent
    pub relative_humidity: f64,
    /// Snowfall over the last hour in cm
    pub snow_1h: f64,
    /// Temperature in °C
    pub temperature: f64,
    /// Wind speed in km/h
    pub wind_speed: f64,
}

/// One pollutant reading inside an air quality snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pollutant {
    pub name: String,
    /// Concentration in μg/m³
    pub amount: f64,
    /// Severity category on the configured scale
    pub category_index: i64,
    /// Upstream description of the category, not published
    pub category: Option<String>,
}

/// Air quality snapshot with a response-dependent pollutant set.
///
/// Pollutants are keyed by the identifier the data source uses
/// (e.g. `PM2.5`, `O3`). Iteration order is unspecified.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AirQuality {
    pub air_quality_index: i64,
    pub pollutants: HashMap<String, Pollutant>,
    /// Upstream category for the overall index, not published
    pub category: Option<String>,
    /// Upstream primary pollutant identifier, not published
    pub primary_pollutant: Option<String>,
}

/// The two record shapes fetched for every location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Observation,
    AirQuality,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Observation => write!(f, "weather observation"),
            RecordKind::AirQuality => write!(f, "air quality"),
        }
    }
}

/// A single scalar addressed to a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishItem {
    pub topic: String,
    pub value: f64,
}

impl PublishItem {
    pub fn new(topic: String, value: f64) -> Self {
        Self { topic, value }
    }
}
