//! End-to-end cycle tests.
//!
//! Drives a `Scraper` built from a YAML config against a local stub of the
//! weather API, publishing into a `RecordingPublisher`.
//!
//! Run with: `cargo test --features test-harness --test cycle_scenarios`
#![cfg(feature = "test-harness")]

use std::collections::HashSet;
use std::time::Duration;

use kerbiot_scraper::mock::RecordingPublisher;
use kerbiot_scraper::{Config, CycleError, Scraper, WeatherComClient};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// ── Stub weather API ─────────────────────────────────────────────────

const BERLIN: &str = "geocode=52.520%2C13.405";
const HAMBURG: &str = "geocode=53.551%2C9.993";

const BERLIN_OBSERVATION: &str = r#"{
    "precip1Hour": 0.3,
    "pressureAltimeter": 1013.2,
    "relativeHumidity": 71,
    "snow1Hour": 0,
    "temperature": 21.5,
    "windSpeed": 14
}"#;

const BERLIN_AIR_QUALITY: &str = r#"{
    "globalairquality": {
        "airQualityIndex": 42,
        "pollutants": {
            "PM2.5": {"name": "PM2.5", "amount": 8.3, "categoryIndex": 1},
            "NO2": {"name": "NO2", "amount": 19.75, "categoryIndex": 2}
        }
    }
}"#;

const HAMBURG_OBSERVATION: &str = r#"{"temperature": -2.25, "windSpeed": 31}"#;

const HAMBURG_AIR_QUALITY: &str = r#"{"globalairquality": {"airQualityIndex": 12, "pollutants": {}}}"#;

/// How the stub answers one request.
#[derive(Clone, Copy)]
enum Behaviour {
    Normal,
    /// Observations for Hamburg answer 500
    HamburgObservationDown,
}

fn respond(request_line: &str, behaviour: Behaviour) -> (&'static str, &'static str) {
    let observation = request_line.contains("/v3/wx/observations/current");
    let berlin = request_line.contains(BERLIN);
    let hamburg = request_line.contains(HAMBURG);

    if !request_line.contains("apiKey=test-token") {
        return ("401 Unauthorized", r#"{"errors": []}"#);
    }

    match (observation, berlin, hamburg, behaviour) {
        (true, true, _, _) => ("200 OK", BERLIN_OBSERVATION),
        (false, true, _, _) => ("200 OK", BERLIN_AIR_QUALITY),
        (true, _, true, Behaviour::HamburgObservationDown) => {
            ("500 Internal Server Error", "upstream failure")
        }
        (true, _, true, _) => ("200 OK", HAMBURG_OBSERVATION),
        (false, _, true, _) => ("200 OK", HAMBURG_AIR_QUALITY),
        _ => ("404 Not Found", "{}"),
    }
}

async fn handle(mut socket: TcpStream, behaviour: Behaviour) {
    let mut buf = vec![0u8; 4096];
    let mut request = Vec::new();
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        request.extend_from_slice(&buf[..n]);
        if request.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    let text = String::from_utf8_lossy(&request);
    let request_line = text.lines().next().unwrap_or_default().to_string();
    let (status, body) = respond(&request_line, behaviour);
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// Start the stub and return its base URL.
async fn start_stub(behaviour: Behaviour) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(handle(socket, behaviour));
        }
    });
    format!("http://{}", addr)
}

// ── Harness ──────────────────────────────────────────────────────────

fn config(base_url: &str, extra: &str) -> Config {
    let yaml = format!(
        r#"
token: test-token
interval_secs: 60
request_timeout_secs: 5
base_url: "{}"
{}
mqtt:
  broker: localhost
locations:
  - name: Berlin
    lat: 52.520
    long: 13.405
  - name: Hamburg
    lat: 53.551
    long: 9.993
"#,
        base_url, extra
    );
    let config = Config::parse(&yaml).unwrap();
    config.validate().unwrap();
    config
}

fn scraper(
    config: &Config,
    publisher: RecordingPublisher,
) -> Scraper<WeatherComClient, RecordingPublisher> {
    let source = WeatherComClient::new(&config.base_url, config.request_timeout()).unwrap();
    Scraper::new(config.scrape_settings(), source, publisher)
}

fn topics(publisher: &RecordingPublisher) -> HashSet<String> {
    publisher
        .published()
        .into_iter()
        .map(|item| item.topic)
        .collect()
}

// ── Scenarios ────────────────────────────────────────────────────────

#[tokio::test]
async fn full_cycle_publishes_every_metric() {
    let base_url = start_stub(Behaviour::Normal).await;
    let config = config(&base_url, "");
    let publisher = RecordingPublisher::new();
    let scraper = scraper(&config, publisher.clone());

    let report = scraper.run_cycle(None).await.unwrap();
    assert_eq!(report.locations, 2);
    assert_eq!(report.records, 4);
    assert_eq!(report.fetch_failures, 0);
    // Berlin: 6 + 1 + 2 * 2, Hamburg: 6 + 1
    assert_eq!(report.published, 18);

    let payloads = publisher.payloads();
    assert_eq!(
        payloads[..6],
        [
            ("Berlin/Rain in mm".to_string(), "0.300000".to_string()),
            ("Berlin/Pressure in hPa".to_string(), "1013.200000".to_string()),
            ("Berlin/Humidity in %".to_string(), "71.000000".to_string()),
            ("Berlin/Snow in cm".to_string(), "0.000000".to_string()),
            ("Berlin/Temperature in °C".to_string(), "21.500000".to_string()),
            ("Berlin/Wind speed in kmh".to_string(), "14.000000".to_string()),
        ]
    );
    assert_eq!(
        payloads[6],
        ("Berlin/Air quality index".to_string(), "42.000000".to_string())
    );

    let berlin_pollutants: HashSet<(String, String)> = payloads[7..11].iter().cloned().collect();
    let expected: HashSet<(String, String)> = [
        ("Berlin/Pollutant: PM2.5/μgm3", "8.300000"),
        ("Berlin/Pollutant: PM2.5 index", "1.000000"),
        ("Berlin/Pollutant: NO2/μgm3", "19.750000"),
        ("Berlin/Pollutant: NO2 index", "2.000000"),
    ]
    .into_iter()
    .map(|(t, p)| (t.to_string(), p.to_string()))
    .collect();
    assert_eq!(berlin_pollutants, expected);

    assert!(payloads.contains(&(
        "Hamburg/Temperature in °C".to_string(),
        "-2.250000".to_string()
    )));
    assert!(payloads.contains(&("Hamburg/Rain in mm".to_string(), "0.000000".to_string())));
}

#[tokio::test]
async fn empty_pollutant_map_publishes_only_the_index() {
    let base_url = start_stub(Behaviour::Normal).await;
    let config = config(&base_url, "");
    let publisher = RecordingPublisher::new();
    scraper(&config, publisher.clone())
        .run_cycle(None)
        .await
        .unwrap();

    let hamburg: Vec<String> = topics(&publisher)
        .into_iter()
        .filter(|t| t.starts_with("Hamburg/") && !t.contains(" in "))
        .collect();
    assert_eq!(hamburg, vec!["Hamburg/Air quality index".to_string()]);
}

#[tokio::test]
async fn failed_observation_still_publishes_air_quality() {
    let base_url = start_stub(Behaviour::HamburgObservationDown).await;
    let config = config(&base_url, "");
    let publisher = RecordingPublisher::new();

    let report = scraper(&config, publisher.clone())
        .run_cycle(None)
        .await
        .unwrap();
    // Only Hamburg's observation failed: Berlin 2 records, Hamburg 1.
    assert_eq!(report.locations, 2);
    assert_eq!(report.fetch_failures, 1);
    assert_eq!(report.records, 3);
    assert_eq!(report.publish_failures, 0);
    assert_eq!(report.published, 11 + 1);

    let published = publisher.published();
    let berlin = published
        .iter()
        .filter(|item| item.topic.starts_with("Berlin/"))
        .count();
    let hamburg: Vec<&str> = published
        .iter()
        .filter(|item| item.topic.starts_with("Hamburg/"))
        .map(|item| item.topic.as_str())
        .collect();
    assert_eq!(berlin, 11);
    assert_eq!(hamburg, vec!["Hamburg/Air quality index"]);
}

#[tokio::test]
async fn wrong_token_fails_every_fetch_without_publishing() {
    let base_url = start_stub(Behaviour::Normal).await;
    let mut config = config(&base_url, "");
    config.apply_token_override(Some("other-token".to_string()));
    let publisher = RecordingPublisher::new();

    let report = scraper(&config, publisher.clone())
        .run_cycle(None)
        .await
        .unwrap();
    assert_eq!(report.fetch_failures, 4);
    assert_eq!(report.records, 0);
    assert!(publisher.published().is_empty());
}

#[tokio::test]
async fn unreachable_api_is_a_fetch_failure() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let config = config(&base_url, "");
    let publisher = RecordingPublisher::new();
    let report = scraper(&config, publisher.clone())
        .run_cycle(None)
        .await
        .unwrap();
    assert_eq!(report.fetch_failures, 4);
    assert!(publisher.published().is_empty());
}

#[tokio::test]
async fn publish_failure_aborts_under_fail_fast() {
    let base_url = start_stub(Behaviour::Normal).await;
    let config = config(&base_url, "publish_failure: fail_fast");
    let publisher = RecordingPublisher::failing_at(3);

    let err = scraper(&config, publisher.clone())
        .run_cycle(None)
        .await
        .unwrap_err();
    let CycleError::Publish { topic, .. } = err;
    assert_eq!(topic, "Berlin/Humidity in %");
    assert_eq!(publisher.published().len(), 2);
}

#[tokio::test]
async fn publish_failure_is_isolated_when_configured() {
    let base_url = start_stub(Behaviour::Normal).await;
    let config = config(&base_url, "publish_failure: isolate");
    let publisher = RecordingPublisher::failing_at(3);

    let report = scraper(&config, publisher.clone())
        .run_cycle(None)
        .await
        .unwrap();
    assert_eq!(report.publish_failures, 1);
    assert_eq!(report.published, 2 + 7);
    assert!(topics(&publisher).contains("Hamburg/Air quality index"));
    assert!(!topics(&publisher).contains("Berlin/Air quality index"));
}

#[tokio::test]
async fn concurrent_fetch_matches_sequential_output() {
    let base_url = start_stub(Behaviour::Normal).await;

    let sequential = RecordingPublisher::new();
    scraper(&config(&base_url, ""), sequential.clone())
        .run_cycle(None)
        .await
        .unwrap();

    let concurrent = RecordingPublisher::new();
    scraper(&config(&base_url, "concurrent_fetch: true"), concurrent.clone())
        .run_cycle(None)
        .await
        .unwrap();

    let weather_only = |p: &RecordingPublisher| -> Vec<(String, String)> {
        p.payloads()
            .into_iter()
            .filter(|(topic, _)| topic.contains(" in "))
            .collect()
    };
    assert_eq!(weather_only(&sequential), weather_only(&concurrent));
    assert_eq!(topics(&sequential), topics(&concurrent));
}

#[tokio::test]
async fn run_stops_promptly_on_shutdown() {
    let base_url = start_stub(Behaviour::Normal).await;
    let config = config(&base_url, "");
    let publisher = RecordingPublisher::new();
    let scraper = scraper(&config, publisher.clone());

    let (tx, rx) = tokio::sync::watch::channel(());
    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let _ = tx.send(());
    });

    tokio::time::timeout(Duration::from_secs(10), scraper.run(rx))
        .await
        .unwrap()
        .unwrap();
    stopper.await.unwrap();

    // interval_secs is 60, so only the first cycle ran.
    assert_eq!(publisher.published().len(), 18);
}

#[tokio::test]
async fn consecutive_cycles_publish_the_same_set() {
    let base_url = start_stub(Behaviour::Normal).await;
    let config = config(&base_url, "");
    let publisher = RecordingPublisher::new();
    let scraper = scraper(&config, publisher.clone());

    scraper.run_cycle(None).await.unwrap();
    scraper.run_cycle(None).await.unwrap();

    let payloads = publisher.payloads();
    assert_eq!(payloads.len(), 36);
    let first: HashSet<_> = payloads[..18].iter().cloned().collect();
    let second: HashSet<_> = payloads[18..].iter().cloned().collect();
    assert_eq!(first, second);
}
