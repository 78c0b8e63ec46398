//! Weather and air quality scraper for MQTT.
//!
//! On a fixed interval this crate fetches the current weather observation
//! and the air quality snapshot for each configured location from the
//! weather.com v3 API, flattens both into scalar values and publishes each
//! value to its own `{location}/{label}` topic.

pub mod config;
#[cfg(any(test, feature = "test-harness"))]
pub mod mock;
pub mod model;
pub mod publisher;
pub mod scheduler;
pub mod source;
pub mod topic;

pub use config::{Config, ConfigError, MqttConfig};
pub use model::{AirQuality, Location, Observation, Pollutant, PublishItem, RecordKind};
pub use publisher::{ConnectError, MqttPublisher, PublishError, Publisher};
pub use scheduler::{CycleError, CycleReport, PublishFailurePolicy, ScrapeSettings, Scraper};
pub use source::{DataSource, FetchError, WeatherComClient};

/// Crate version, reported by `--version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
