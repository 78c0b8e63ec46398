//! Topic construction and record flattening.
//!
//! Topics are `{location}/{label}` with both parts used verbatim. Nothing is
//! escaped or normalised, so the same inputs always produce the same topic.

use crate::model::{AirQuality, Observation, PublishItem};

pub const RAIN: &str = "Rain in mm";
pub const PRESSURE: &str = "Pressure in hPa";
pub const HUMIDITY: &str = "Humidity in %";
pub const SNOW: &str = "Snow in cm";
pub const TEMPERATURE: &str = "Temperature in °C";
pub const WIND_SPEED: &str = "Wind speed in kmh";

/// Weather labels in publish order.
pub const WEATHER_LABELS: [&str; 6] = [RAIN, PRESSURE, HUMIDITY, SNOW, TEMPERATURE, WIND_SPEED];

pub const AIR_QUALITY_INDEX: &str = "Air quality index";

/// Join a location name and a metric label into a topic.
pub fn topic(location: &str, label: &str) -> String {
    format!("{}/{}", location, label)
}

/// Label for a pollutant's concentration.
pub fn pollutant_label(pollutant: &str) -> String {
    format!("Pollutant: {}/μgm3", pollutant)
}

/// Label for a pollutant's category index.
pub fn pollutant_index_label(pollutant: &str) -> String {
    format!("Pollutant: {} index", pollutant)
}

/// Concentration and category index topics for one pollutant.
pub fn pollutant_topics(location: &str, pollutant: &str) -> (String, String) {
    (
        topic(location, &pollutant_label(pollutant)),
        topic(location, &pollutant_index_label(pollutant)),
    )
}

/// Flatten a weather observation into its six items, in label order.
pub fn observation_items(location: &str, observation: &Observation) -> Vec<PublishItem> {
    let values = [
        observation.precipitation_1h,
        observation.pressure,
        observation.relative_humidity,
        observation.snow_1h,
        observation.temperature,
        observation.wind_speed,
    ];

    WEATHER_LABELS
        .iter()
        .zip(values)
        .map(|(label, value)| PublishItem::new(topic(location, label), value))
        .collect()
}

/// Flatten an air quality snapshot into `1 + 2 * pollutants` items.
///
/// The overall index comes first. Each pollutant contributes its
/// concentration followed by its category index; the order between
/// pollutants follows the map and is unspecified.
pub fn air_quality_items(location: &str, air_quality: &AirQuality) -> Vec<PublishItem> {
    let mut items = Vec::with_capacity(1 + 2 * air_quality.pollutants.len());
    items.push(PublishItem::new(
        topic(location, AIR_QUALITY_INDEX),
        air_quality.air_quality_index as f64,
    ));

    for (key, pollutant) in &air_quality.pollutants {
        let (amount_topic, index_topic) = pollutant_topics(location, key);
        items.push(PublishItem::new(amount_topic, pollutant.amount));
        items.push(PublishItem::new(index_topic, pollutant.category_index as f64));
    }

    items
}
