//! The scrape loop.
//!
//! A cycle visits every configured location in order. For each one it
//! fetches the weather observation, publishes its six values, then fetches
//! the air quality snapshot and publishes the index plus two values per
//! pollutant. A failed fetch only skips that record. A failed publish either
//! ends the cycle with an error or skips the rest of the location, depending
//! on [`PublishFailurePolicy`].
//!
//! [`Scraper::run_cycle`] is one sweep; [`Scraper::run`] repeats it with a
//! pause in between until the shutdown signal fires.

use crate::model::{AirQuality, Location, Observation, PublishItem, RecordKind};
use crate::publisher::{PublishError, Publisher};
use crate::source::{DataSource, FetchError};
use crate::topic;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// What to do when the broker rejects a publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishFailurePolicy {
    /// Abort the cycle and stop the scraper
    #[default]
    FailFast,
    /// Log, skip the rest of the location and continue
    Isolate,
}

/// Everything the loop needs from the configuration.
#[derive(Debug, Clone)]
pub struct ScrapeSettings {
    pub token: String,
    pub locations: Vec<Location>,
    pub interval: Duration,
    pub publish_failure: PublishFailurePolicy,
    pub concurrent_fetch: bool,
}

/// Counters for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Locations that were started
    pub locations: usize,
    /// Records fetched and decoded
    pub records: usize,
    pub fetch_failures: usize,
    /// Items accepted by the publisher
    pub published: usize,
    pub publish_failures: usize,
    /// The cycle stopped early because of the shutdown signal
    pub interrupted: bool,
}

/// A cycle that could not complete.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("failed to publish value to topic '{topic}' for {location}: {source}")]
    Publish {
        location: String,
        topic: String,
        #[source]
        source: PublishError,
    },
}

/// Progress within one location, logged at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    FetchingWeather,
    PublishingWeather,
    FetchingAirQuality,
    PublishingAirQuality,
}

/// Whether to carry on with the current location.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    SkipLocation,
}

/// Polls a [`DataSource`] and republishes through a [`Publisher`].
pub struct Scraper<S, P> {
    settings: ScrapeSettings,
    source: S,
    publisher: P,
}

impl<S: DataSource, P: Publisher> Scraper<S, P> {
    pub fn new(settings: ScrapeSettings, source: S, publisher: P) -> Self {
        Self {
            settings,
            source,
            publisher,
        }
    }

    pub fn settings(&self) -> &ScrapeSettings {
        &self.settings
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Give back the publisher, e.g. to disconnect it cleanly.
    pub fn into_publisher(self) -> P {
        self.publisher
    }

    /// Run cycles until shutdown, sleeping `interval` after each one.
    ///
    /// The first cycle starts immediately. Returns an error only when a
    /// cycle fails under [`PublishFailurePolicy::FailFast`].
    pub async fn run(&self, mut shutdown: watch::Receiver<()>) -> Result<(), CycleError> {
        log::info!(
            "[Scraper] polling {} location(s) every {:?}",
            self.settings.locations.len(),
            self.settings.interval
        );

        loop {
            if shutdown_requested(Some(&shutdown)) {
                break;
            }

            let report = self.run_cycle(Some(&shutdown)).await?;
            if report.interrupted {
                break;
            }

            log::debug!("[Scraper] sleeping for {:?}", self.settings.interval);
            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                _ = shutdown.changed() => {
                    log::info!("[Scraper] shutdown signal received");
                    break;
                }
            }
        }

        log::info!("[Scraper] stopped");
        Ok(())
    }

    /// Run a single sweep over all locations.
    ///
    /// With a shutdown receiver, the signal is checked before each location
    /// and before each fetch; work already started is finished first.
    pub async fn run_cycle(
        &self,
        shutdown: Option<&watch::Receiver<()>>,
    ) -> Result<CycleReport, CycleError> {
        let started = Instant::now();
        let mut report = CycleReport::default();

        if self.settings.concurrent_fetch {
            self.cycle_concurrent(shutdown, &mut report).await?;
        } else {
            self.cycle_sequential(shutdown, &mut report).await?;
        }

        if report.interrupted {
            log::info!(
                "[Scraper] cycle interrupted after {} location(s)",
                report.locations
            );
        }
        log::info!(
            "[Scraper] cycle complete in {:.2}s: {} location(s), {} record(s), {} published, {} fetch failure(s), {} publish failure(s)",
            started.elapsed().as_secs_f64(),
            report.locations,
            report.records,
            report.published,
            report.fetch_failures,
            report.publish_failures
        );
        Ok(report)
    }

    async fn cycle_sequential(
        &self,
        shutdown: Option<&watch::Receiver<()>>,
        report: &mut CycleReport,
    ) -> Result<(), CycleError> {
        for location in &self.settings.locations {
            if shutdown_requested(shutdown) {
                report.interrupted = true;
                break;
            }
            report.locations += 1;

            let observation = self.fetch_observation(location).await;
            if self.handle_observation(location, observation, report).await? == Flow::SkipLocation {
                continue;
            }

            if shutdown_requested(shutdown) {
                report.interrupted = true;
                break;
            }

            let air_quality = self.fetch_air_quality(location).await;
            self.handle_air_quality(location, air_quality, report).await?;
        }
        Ok(())
    }

    /// Fetch every location at once, then publish in configured order.
    async fn cycle_concurrent(
        &self,
        shutdown: Option<&watch::Receiver<()>>,
        report: &mut CycleReport,
    ) -> Result<(), CycleError> {
        if shutdown_requested(shutdown) {
            report.interrupted = true;
            return Ok(());
        }

        let fetches = self.settings.locations.iter().map(|location| async move {
            futures::join!(
                self.fetch_observation(location),
                self.fetch_air_quality(location)
            )
        });
        let fetched = futures::future::join_all(fetches).await;

        for (location, (observation, air_quality)) in self.settings.locations.iter().zip(fetched) {
            if shutdown_requested(shutdown) {
                report.interrupted = true;
                break;
            }
            report.locations += 1;

            if self.handle_observation(location, observation, report).await? == Flow::SkipLocation {
                // Already fetched: a failure still counts, a record is dropped.
                match air_quality {
                    Ok(_) => log::debug!(
                        "[Scraper] {}: discarding fetched {}",
                        location.name,
                        RecordKind::AirQuality
                    ),
                    Err(e) => report_fetch_failure(location, RecordKind::AirQuality, &e, report),
                }
                continue;
            }
            self.handle_air_quality(location, air_quality, report).await?;
        }
        Ok(())
    }

    async fn fetch_observation(&self, location: &Location) -> Result<Observation, FetchError> {
        log_stage(location, Stage::FetchingWeather);
        self.source
            .fetch_observation(&self.settings.token, location.latitude, location.longitude)
            .await
    }

    async fn fetch_air_quality(&self, location: &Location) -> Result<AirQuality, FetchError> {
        log_stage(location, Stage::FetchingAirQuality);
        self.source
            .fetch_air_quality(&self.settings.token, location.latitude, location.longitude)
            .await
    }

    async fn handle_observation(
        &self,
        location: &Location,
        fetched: Result<Observation, FetchError>,
        report: &mut CycleReport,
    ) -> Result<Flow, CycleError> {
        match fetched {
            Ok(observation) => {
                report.records += 1;
                log_stage(location, Stage::PublishingWeather);
                let items = topic::observation_items(&location.name, &observation);
                self.publish_items(location, &items, report).await
            }
            Err(e) => {
                report_fetch_failure(location, RecordKind::Observation, &e, report);
                Ok(Flow::Continue)
            }
        }
    }

    async fn handle_air_quality(
        &self,
        location: &Location,
        fetched: Result<AirQuality, FetchError>,
        report: &mut CycleReport,
    ) -> Result<Flow, CycleError> {
        match fetched {
            Ok(air_quality) => {
                report.records += 1;
                log_stage(location, Stage::PublishingAirQuality);
                let items = topic::air_quality_items(&location.name, &air_quality);
                self.publish_items(location, &items, report).await
            }
            Err(e) => {
                report_fetch_failure(location, RecordKind::AirQuality, &e, report);
                Ok(Flow::Continue)
            }
        }
    }

    /// Publish items in order, applying the failure policy on the first error.
    async fn publish_items(
        &self,
        location: &Location,
        items: &[PublishItem],
        report: &mut CycleReport,
    ) -> Result<Flow, CycleError> {
        for item in items {
            match self.publisher.publish(&item.topic, item.value).await {
                Ok(()) => report.published += 1,
                Err(source) => {
                    report.publish_failures += 1;
                    match self.settings.publish_failure {
                        PublishFailurePolicy::FailFast => {
                            return Err(CycleError::Publish {
                                location: location.name.clone(),
                                topic: item.topic.clone(),
                                source,
                            });
                        }
                        PublishFailurePolicy::Isolate => {
                            log::error!(
                                "[Scraper] failed to publish value to topic '{}': {}; skipping the rest of {}",
                                item.topic,
                                source,
                                location.name
                            );
                            return Ok(Flow::SkipLocation);
                        }
                    }
                }
            }
        }
        Ok(Flow::Continue)
    }
}

fn log_stage(location: &Location, stage: Stage) {
    log::debug!("[Scraper] {}: {:?}", location.name, stage);
}

fn report_fetch_failure(
    location: &Location,
    kind: RecordKind,
    error: &FetchError,
    report: &mut CycleReport,
) {
    report.fetch_failures += 1;
    log::warn!(
        "[Scraper] error fetching {} for {}: {}",
        kind,
        location.name,
        error
    );
}

/// Create the shutdown channel and hand its trigger to `install`.
///
/// The receiver exists before `install` runs, so a signal delivered while
/// the handler is being registered is not lost.
pub fn shutdown_channel<E>(
    install: impl FnOnce(Box<dyn Fn() + Send + 'static>) -> Result<(), E>,
) -> Result<watch::Receiver<()>, E> {
    let (tx, rx) = watch::channel(());
    install(Box::new(move || {
        let _ = tx.send(());
    }))?;
    Ok(rx)
}

/// A dropped sender counts as shutdown, matching `changed()` returning `Err`.
fn shutdown_requested(shutdown: Option<&watch::Receiver<()>>) -> bool {
    shutdown
        .map(|rx| rx.has_changed().unwrap_or(true))
        .unwrap_or(false)
}
