//! weather.com v3 client.
//!
//! Issues one GET per call and decodes the JSON body. Numeric fields the API
//! leaves out (or sends as `null`) become zero instead of failing the decode.

use super::{DataSource, FetchError};
use crate::model::{geocode, AirQuality, Observation, Pollutant};
use async_trait::async_trait;
use std::time::Duration;

// ── Constants ───────────────────────────────────────────────────────

/// Production API host.
pub const DEFAULT_BASE_URL: &str = "https://api.weather.com";

const OBSERVATION_PATH: &str = "/v3/wx/observations/current";
const AIR_QUALITY_PATH: &str = "/v3/wx/globalAirQuality";

const LANGUAGE: &str = "en-US";
const UNITS_METRIC: &str = "m";
const AIR_QUALITY_SCALE: &str = "UBA";

const USER_AGENT: &str = concat!("kerbiot-scraper/", env!("CARGO_PKG_VERSION"));

/// Error bodies are cut to this many characters before logging.
const MAX_ERROR_BODY: usize = 256;

// ── Client ──────────────────────────────────────────────────────────

/// HTTP client for the current-conditions and global air quality endpoints.
#[derive(Debug, Clone)]
pub struct WeatherComClient {
    client: reqwest::Client,
    base_url: String,
}

impl WeatherComClient {
    /// Build a client whose requests give up after `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn observation_request(
        &self,
        token: &str,
        latitude: f64,
        longitude: f64,
    ) -> reqwest::RequestBuilder {
        let geocode = geocode(latitude, longitude);
        self.client
            .get(format!("{}{}", self.base_url, OBSERVATION_PATH))
            .query(&[
                ("apiKey", token),
                ("geocode", geocode.as_str()),
                ("language", LANGUAGE),
                ("units", UNITS_METRIC),
                ("format", "json"),
            ])
    }

    fn air_quality_request(
        &self,
        token: &str,
        latitude: f64,
        longitude: f64,
    ) -> reqwest::RequestBuilder {
        let geocode = geocode(latitude, longitude);
        self.client
            .get(format!("{}{}", self.base_url, AIR_QUALITY_PATH))
            .query(&[
                ("apiKey", token),
                ("geocode", geocode.as_str()),
                ("language", LANGUAGE),
                ("format", "json"),
                ("scale", AIR_QUALITY_SCALE),
            ])
    }

    /// Send a request and return the body of a successful response.
    async fn fetch_body(&self, request: reqwest::RequestBuilder) -> Result<String, FetchError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl DataSource for WeatherComClient {
    async fn fetch_observation(
        &self,
        token: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<Observation, FetchError> {
        log::debug!(
            "[WeatherCom] GET {} geocode={}",
            OBSERVATION_PATH,
            geocode(latitude, longitude)
        );
        let body = self
            .fetch_body(self.observation_request(token, latitude, longitude))
            .await?;
        decode_observation(&body)
    }

    async fn fetch_air_quality(
        &self,
        token: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<AirQuality, FetchError> {
        log::debug!(
            "[WeatherCom] GET {} geocode={}",
            AIR_QUALITY_PATH,
            geocode(latitude, longitude)
        );
        let body = self
            .fetch_body(self.air_quality_request(token, latitude, longitude))
            .await?;
        decode_air_quality(&body)
    }
}

// ── Decoding ────────────────────────────────────────────────────────

pub(crate) fn decode_observation(body: &str) -> Result<Observation, FetchError> {
    let wire: wire::CurrentObservation =
        serde_json::from_str(body).map_err(|e| FetchError::Decode(e.to_string()))?;
    Ok(wire.into())
}

pub(crate) fn decode_air_quality(body: &str) -> Result<AirQuality, FetchError> {
    let wire: wire::AirQualityResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Decode(e.to_string()))?;
    Ok(wire.air_quality.into())
}

/// Response shapes as sent by the API.
mod wire {
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    pub struct CurrentObservation {
        #[serde(rename = "precip1Hour")]
        pub precip_1_hour: Option<f64>,
        #[serde(rename = "pressureAltimeter")]
        pub pressure_altimeter: Option<f64>,
        #[serde(rename = "relativeHumidity")]
        pub relative_humidity: Option<f64>,
        #[serde(rename = "snow1Hour")]
        pub snow_1_hour: Option<f64>,
        pub temperature: Option<f64>,
        #[serde(rename = "windSpeed")]
        pub wind_speed: Option<f64>,
    }

    #[derive(Debug, Deserialize)]
    pub struct AirQualityResponse {
        #[serde(rename = "globalairquality")]
        pub air_quality: GlobalAirQuality,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    pub struct GlobalAirQuality {
        #[serde(rename = "airQualityIndex")]
        pub air_quality_index: Option<i64>,
        #[serde(rename = "airQualityCategory")]
        pub air_quality_category: Option<String>,
        #[serde(rename = "primaryPollutant")]
        pub primary_pollutant: Option<String>,
        pub pollutants: Option<HashMap<String, Pollutant>>,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    pub struct Pollutant {
        pub name: Option<String>,
        pub amount: Option<f64>,
        pub category: Option<String>,
        #[serde(rename = "categoryIndex")]
        pub category_index: Option<i64>,
    }
}

impl From<wire::CurrentObservation> for Observation {
    fn from(wire: wire::CurrentObservation) -> Self {
        Observation {
            precipitation_1h: wire.precip_1_hour.unwrap_or_default(),
            pressure: wire.pressure_altimeter.unwrap_or_default(),
            relative_humidity: wire.relative_humidity.unwrap_or_default(),
            snow_1h: wire.snow_1_hour.unwrap_or_default(),
            temperature: wire.temperature.unwrap_or_default(),
            wind_speed: wire.wind_speed.unwrap_or_default(),
        }
    }
}

impl From<wire::GlobalAirQuality> for AirQuality {
    fn from(wire: wire::GlobalAirQuality) -> Self {
        let pollutants = wire
            .pollutants
            .unwrap_or_default()
            .into_iter()
            .map(|(key, p)| {
                let pollutant = Pollutant {
                    name: p.name.unwrap_or_else(|| key.clone()),
                    amount: p.amount.unwrap_or_default(),
                    category_index: p.category_index.unwrap_or_default(),
                    category: p.category,
                };
                (key, pollutant)
            })
            .collect();

        AirQuality {
            air_quality_index: wire.air_quality_index.unwrap_or_default(),
            pollutants,
            category: wire.air_quality_category,
            primary_pollutant: wire.primary_pollutant,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────
