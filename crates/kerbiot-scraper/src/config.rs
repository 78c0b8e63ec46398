//! Scraper configuration.
//!
//! Loaded once at startup from YAML. JSON is accepted as well, and the
//! capitalised keys of the legacy `scraper.json` layout are understood as
//! aliases, so an existing file keeps working unchanged.

use crate::model::Location;
use crate::scheduler::{PublishFailurePolicy, ScrapeSettings};
use crate::source::DEFAULT_BASE_URL;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Environment variable that overrides the configured API token.
pub const TOKEN_ENV: &str = "KERBIOT_TOKEN";

/// Default MQTT client identifier.
pub const DEFAULT_CLIENT_ID: &str = "kerbiot-scraper";

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host name or address
    #[serde(alias = "Broker")]
    pub broker: String,
    #[serde(alias = "Port", default = "default_port")]
    pub port: u16,
    /// Empty or missing means anonymous
    #[serde(alias = "Username", default)]
    pub username: Option<String>,
    #[serde(alias = "Password", default)]
    pub password: Option<String>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_publish_timeout")]
    pub publish_timeout_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: default_port(),
            username: None,
            password: None,
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
            publish_timeout_secs: default_publish_timeout(),
        }
    }
}

impl MqttConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// weather.com API key, passed through verbatim
    #[serde(alias = "Token", default)]
    pub token: String,
    /// Pause between the end of one cycle and the start of the next
    #[serde(alias = "Delay")]
    pub interval_secs: u64,
    /// Upper bound for each HTTP request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub publish_failure: PublishFailurePolicy,
    /// Fetch all locations concurrently before publishing
    #[serde(default)]
    pub concurrent_fetch: bool,
    #[serde(alias = "MQTT")]
    pub mqtt: MqttConfig,
    #[serde(alias = "Locations")]
    pub locations: Vec<Location>,
}

fn default_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

fn default_keep_alive() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_publish_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Config {
    /// Load, apply environment overrides, and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_token_override(std::env::var(TOKEN_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Replace the token when an override is present and non-empty.
    pub fn apply_token_override(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.token = token;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "token is empty (set it in the file or via {})",
                TOKEN_ENV
            )));
        }
        if !(1..=86_400).contains(&self.interval_secs) {
            return Err(ConfigError::ValidationError(format!(
                "interval_secs must be between 1 and 86400, got {}",
                self.interval_secs
            )));
        }
        if !(1..=300).contains(&self.request_timeout_secs) {
            return Err(ConfigError::ValidationError(format!(
                "request_timeout_secs must be between 1 and 300, got {}",
                self.request_timeout_secs
            )));
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }

        self.validate_mqtt()?;
        self.validate_locations()
    }

    fn validate_mqtt(&self) -> Result<(), ConfigError> {
        let mqtt = &self.mqtt;
        if mqtt.broker.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "mqtt.broker is empty".to_string(),
            ));
        }
        if mqtt.port == 0 {
            return Err(ConfigError::ValidationError(
                "mqtt.port must not be 0".to_string(),
            ));
        }
        if mqtt.client_id.is_empty() || mqtt.client_id.starts_with(' ') {
            return Err(ConfigError::ValidationError(format!(
                "mqtt.client_id '{}' is not a valid client id",
                mqtt.client_id
            )));
        }
        if !(5..=3600).contains(&mqtt.keep_alive_secs) {
            return Err(ConfigError::ValidationError(format!(
                "mqtt.keep_alive_secs must be between 5 and 3600, got {}",
                mqtt.keep_alive_secs
            )));
        }
        if !(1..=300).contains(&mqtt.connect_timeout_secs) {
            return Err(ConfigError::ValidationError(format!(
                "mqtt.connect_timeout_secs must be between 1 and 300, got {}",
                mqtt.connect_timeout_secs
            )));
        }
        if !(1..=300).contains(&mqtt.publish_timeout_secs) {
            return Err(ConfigError::ValidationError(format!(
                "mqtt.publish_timeout_secs must be between 1 and 300, got {}",
                mqtt.publish_timeout_secs
            )));
        }
        Ok(())
    }

    fn validate_locations(&self) -> Result<(), ConfigError> {
        if self.locations.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one location is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for location in &self.locations {
            if location.name.is_empty() {
                return Err(ConfigError::ValidationError(
                    "location name must not be empty".to_string(),
                ));
            }
            // Wildcards are rejected by the broker in publish topics.
            if location.name.contains(['+', '#']) {
                return Err(ConfigError::ValidationError(format!(
                    "location name '{}' contains an MQTT wildcard",
                    location.name
                )));
            }
            if !seen.insert(location.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate location name '{}'",
                    location.name
                )));
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The parts of the configuration the scrape loop works from.
    pub fn scrape_settings(&self) -> ScrapeSettings {
        ScrapeSettings {
            token: self.token.clone(),
            locations: self.locations.clone(),
            interval: self.interval(),
            publish_failure: self.publish_failure,
            concurrent_fetch: self.concurrent_fetch,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
token: "abc123"
interval_secs: 600
mqtt:
  broker: broker.local
  username: scraper
  password: hunter2
locations:
  - name: Berlin
    lat: 52.520
    long: 13.405
  - name: Oslo
    latitude: 59.913
    longitude: 10.752
"#;

    #[test]
    fn test_parse_config() {
        let config = Config::parse(YAML).unwrap();
        assert_eq!(config.token, "abc123");
        assert_eq!(config.interval(), Duration::from_secs(600));
        assert_eq!(config.request_timeout(), Duration::from_secs(30)); // default
        assert_eq!(config.base_url, "https://api.weather.com");
        assert_eq!(config.publish_failure, PublishFailurePolicy::FailFast);
        assert!(!config.concurrent_fetch);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.client_id, "kerbiot-scraper");
        assert_eq!(config.mqtt.username.as_deref(), Some("scraper"));
        assert_eq!(config.locations.len(), 2);
        assert_eq!(config.locations[1], Location::new("Oslo", 59.913, 10.752));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_legacy_json() {
        let json = r#"{
            "Token": "legacy-token",
            "Delay": 900,
            "MQTT": {"Broker": "10.0.0.2", "Port": 1884, "Username": "", "Password": ""},
            "Locations": [{"Name": "Berlin", "Lat": 52.52, "Long": 13.405}]
        }"#;
        let config = Config::parse(json).unwrap();
        assert_eq!(config.token, "legacy-token");
        assert_eq!(config.interval_secs, 900);
        assert_eq!(config.mqtt.broker, "10.0.0.2");
        assert_eq!(config.mqtt.port, 1884);
        assert_eq!(config.locations[0].name, "Berlin");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_isolate_policy() {
        let yaml = format!("{}publish_failure: isolate\nconcurrent_fetch: true\n", YAML);
        let config = Config::parse(&yaml).unwrap();
        assert_eq!(config.publish_failure, PublishFailurePolicy::Isolate);
        assert!(config.concurrent_fetch);
    }

    #[test]
    fn test_parse_rejects_unknown_policy() {
        let yaml = format!("{}publish_failure: sometimes\n", YAML);
        assert!(matches!(
            Config::parse(&yaml),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_missing_required_field() {
        let result = Config::parse("token: abc\nlocations: []\n");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validation_errors() {
        let base = Config::parse(YAML).unwrap();

        let mut config = base.clone();
        config.token = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.request_timeout_secs = 301;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.base_url = "ftp://weather".to_string();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.mqtt.broker = String::new();
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.mqtt.keep_alive_secs = 1;
        assert!(config.validate().is_err());

        let mut config = base.clone();
        config.locations.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_location_names() {
        let mut config = Config::parse(YAML).unwrap();
        config.locations.push(Location::new("Berlin", 0.0, 0.0));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate location name 'Berlin'"));
    }

    #[test]
    fn test_wildcard_location_name() {
        let mut config = Config::parse(YAML).unwrap();
        config.locations[0].name = "Berlin/#".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_location_names_are_not_sanitised() {
        let mut config = Config::parse(YAML).unwrap();
        config.locations[0].name = "home/garden (south)".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_token_override() {
        let mut config = Config::parse(YAML).unwrap();
        config.apply_token_override(None);
        assert_eq!(config.token, "abc123");
        config.apply_token_override(Some(String::new()));
        assert_eq!(config.token, "abc123");
        config.apply_token_override(Some("from-env".to_string()));
        assert_eq!(config.token, "from-env");
    }

    #[test]
    fn test_token_from_override_only() {
        let yaml = YAML.replace("token: \"abc123\"\n", "");
        let mut config = Config::parse(&yaml).unwrap();
        assert!(config.validate().is_err());
        config.apply_token_override(Some("from-env".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scrape_settings() {
        let settings = Config::parse(YAML).unwrap().scrape_settings();
        assert_eq!(settings.token, "abc123");
        assert_eq!(settings.interval, Duration::from_secs(600));
        assert_eq!(settings.locations.len(), 2);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scraper.yaml");
        std::fs::write(&path, YAML).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.locations[0].name, "Berlin");
    }

    #[test]
    fn test_from_missing_file() {
        let result = Config::from_file("/nonexistent/scraper.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = Config::parse(include_str!("../scraper.example.yaml")).unwrap();
        assert!(config.validate().is_ok());
    }
}
