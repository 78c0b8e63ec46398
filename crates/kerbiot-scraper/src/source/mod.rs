//! Data source boundary.
//!
//! The scraper only talks to [`DataSource`], so cycles can be driven by
//! [`WeatherComClient`] in production and by canned responses in tests.

mod weather_com;

pub use weather_com::{WeatherComClient, DEFAULT_BASE_URL};

use crate::model::{AirQuality, Observation};
use async_trait::async_trait;

/// Errors from a single fetch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Connection refused, timeout, or the body could not be read
    #[error("transport error: {0}")]
    Transport(String),

    /// The data source answered with a non-success status
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// The payload did not match the expected shape
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        // Drop the URL, it carries the API key.
        FetchError::Transport(err.without_url().to_string())
    }
}

/// Fetches the two record kinds for a coordinate pair.
///
/// One call is one request: implementations do not retry or cache.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch_observation(
        &self,
        token: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<Observation, FetchError>;

    async fn fetch_air_quality(
        &self,
        token: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<AirQuality, FetchError>;
}
