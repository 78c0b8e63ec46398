//! In-memory data source and publisher for driving cycles in tests.

use crate::model::{AirQuality, Location, Observation, PublishItem, RecordKind};
use crate::publisher::{format_payload, PublishError, Publisher};
use crate::source::{DataSource, FetchError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

// ── MockDataSource ──────────────────────────────────────────────────

/// Serves canned records keyed by geocode.
///
/// Coordinates without a canned answer fail with a transport error.
#[derive(Default)]
pub struct MockDataSource {
    observations: HashMap<String, Result<Observation, String>>,
    air_quality: HashMap<String, Result<AirQuality, String>>,
    signal: Option<(String, watch::Sender<()>)>,
    calls: Mutex<Vec<(RecordKind, String)>>,
    tokens: Mutex<Vec<String>>,
}

impl MockDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observation(mut self, location: &Location, observation: Observation) -> Self {
        self.observations
            .insert(location.geocode(), Ok(observation));
        self
    }

    pub fn with_air_quality(mut self, location: &Location, air_quality: AirQuality) -> Self {
        self.air_quality.insert(location.geocode(), Ok(air_quality));
        self
    }

    pub fn failing_observation(mut self, location: &Location, message: &str) -> Self {
        self.observations
            .insert(location.geocode(), Err(message.to_string()));
        self
    }

    pub fn failing_air_quality(mut self, location: &Location, message: &str) -> Self {
        self.air_quality
            .insert(location.geocode(), Err(message.to_string()));
        self
    }

    /// Fire `shutdown` while serving the observation for `location`.
    pub fn signal_on_observation(mut self, location: &Location, shutdown: watch::Sender<()>) -> Self {
        self.signal = Some((location.geocode(), shutdown));
        self
    }

    /// Every fetch so far, in call order.
    pub fn calls(&self) -> Vec<(RecordKind, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// Tokens passed with each fetch, in call order.
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }

    fn record(&self, kind: RecordKind, token: &str, geocode: &str) {
        self.calls.lock().unwrap().push((kind, geocode.to_string()));
        self.tokens.lock().unwrap().push(token.to_string());
    }
}

fn canned<T: Clone>(
    table: &HashMap<String, Result<T, String>>,
    kind: RecordKind,
    geocode: &str,
) -> Result<T, FetchError> {
    match table.get(geocode) {
        Some(Ok(record)) => Ok(record.clone()),
        Some(Err(message)) => Err(FetchError::Transport(message.clone())),
        None => Err(FetchError::Transport(format!(
            "no {} configured for {}",
            kind, geocode
        ))),
    }
}

#[async_trait]
impl DataSource for MockDataSource {
    async fn fetch_observation(
        &self,
        token: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<Observation, FetchError> {
        let geocode = crate::model::geocode(latitude, longitude);
        self.record(RecordKind::Observation, token, &geocode);
        if let Some((target, shutdown)) = &self.signal {
            if *target == geocode {
                let _ = shutdown.send(());
            }
        }
        canned(&self.observations, RecordKind::Observation, &geocode)
    }

    async fn fetch_air_quality(
        &self,
        token: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<AirQuality, FetchError> {
        let geocode = crate::model::geocode(latitude, longitude);
        self.record(RecordKind::AirQuality, token, &geocode);
        canned(&self.air_quality, RecordKind::AirQuality, &geocode)
    }
}

// ── RecordingPublisher ──────────────────────────────────────────────

#[derive(Default)]
struct Recorded {
    published: Vec<PublishItem>,
    attempts: usize,
    fail_at: HashSet<usize>,
}

/// Records accepted publishes. Clones share the same log.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the `attempt`-th publish (1-based) with `NotConnected`.
    pub fn failing_at(attempt: usize) -> Self {
        let publisher = Self::new();
        publisher.inner.lock().unwrap().fail_at.insert(attempt);
        publisher
    }

    pub fn published(&self) -> Vec<PublishItem> {
        self.inner.lock().unwrap().published.clone()
    }

    /// Topic and wire payload of every accepted publish.
    pub fn payloads(&self) -> Vec<(String, String)> {
        self.inner
            .lock()
            .unwrap()
            .published
            .iter()
            .map(|item| (item.topic.clone(), format_payload(item.value)))
            .collect()
    }

    /// Publish calls including rejected ones.
    pub fn attempts(&self) -> usize {
        self.inner.lock().unwrap().attempts
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, value: f64) -> Result<(), PublishError> {
        let mut inner = self.inner.lock().unwrap();
        inner.attempts += 1;
        if inner.fail_at.contains(&inner.attempts) {
            return Err(PublishError::NotConnected);
        }
        inner
            .published
            .push(PublishItem::new(topic.to_string(), value));
        Ok(())
    }
}
