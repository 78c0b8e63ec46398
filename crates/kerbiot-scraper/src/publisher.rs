//! Publishing scalars to the MQTT broker.
//!
//! Each value goes out as its own QoS 0 message whose payload is the value
//! rendered with six fractional digits. A publish succeeds once the message
//! is handed to the local client; broker acknowledgements are not awaited.

use crate::config::MqttConfig;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Capacity of the request channel between client handle and event loop.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Pause between event loop polls after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// How long a graceful disconnect may take before the event loop is dropped.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors from a single publish.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("not connected to broker")]
    NotConnected,

    #[error("client error: {0}")]
    Client(String),

    #[error("publish not accepted within {0:?}")]
    Timeout(Duration),
}

/// Errors while establishing the broker session at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("no CONNACK from {broker} within {timeout:?}")]
    Timeout { broker: String, timeout: Duration },

    #[error("connection to {broker} failed: {message}")]
    Connection { broker: String, message: String },
}

/// Render a value as the message payload.
pub fn format_payload(value: f64) -> String {
    format!("{:.6}", value)
}

/// Sends one scalar to one topic.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, value: f64) -> Result<(), PublishError>;
}

// ── MQTT ────────────────────────────────────────────────────────────

/// Publisher backed by a connected `rumqttc` session.
///
/// The event loop runs in a background task for the lifetime of the
/// publisher. After a connection error it keeps polling, which makes
/// `rumqttc` reconnect; publishes fail with `NotConnected` until then.
pub struct MqttPublisher {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    publish_timeout: Duration,
    event_task: JoinHandle<()>,
}

impl MqttPublisher {
    /// Open the broker session and wait for the CONNACK.
    pub async fn connect(config: &MqttConfig) -> Result<Self, ConnectError> {
        let broker = format!("{}:{}", config.broker, config.port);
        let (client, mut eventloop) = AsyncClient::new(mqtt_options(config), REQUEST_CHANNEL_CAPACITY);

        log::info!("[Mqtt] connecting to {} as '{}'", broker, config.client_id);
        let timeout = config.connect_timeout();
        match tokio::time::timeout(timeout, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(message)) => return Err(ConnectError::Connection { broker, message }),
            Err(_) => return Err(ConnectError::Timeout { broker, timeout }),
        }
        log::info!("[Mqtt] connected to {}", broker);

        let connected = Arc::new(AtomicBool::new(true));
        let event_task = tokio::spawn(drive_event_loop(eventloop, connected.clone()));

        Ok(Self {
            client,
            connected,
            publish_timeout: config.publish_timeout(),
            event_task,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Send DISCONNECT and stop the event loop.
    ///
    /// Queueing the request and draining the event loop share one deadline;
    /// past it the event loop task is aborted.
    pub async fn disconnect(self) {
        let client = self.client;
        let mut event_task = self.event_task;
        let graceful = tokio::time::timeout(DISCONNECT_TIMEOUT, async {
            if let Err(e) = client.disconnect().await {
                log::warn!("[Mqtt] disconnect request failed: {}", e);
            }
            let _ = (&mut event_task).await;
        })
        .await;

        if graceful.is_err() {
            log::warn!("[Mqtt] no clean disconnect within {:?}", DISCONNECT_TIMEOUT);
            event_task.abort();
        }
        log::info!("[Mqtt] disconnected");
    }
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, value: f64) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }

        let payload = format_payload(value);
        log::debug!("[Mqtt] {} <- {}", topic, payload);
        tokio::time::timeout(
            self.publish_timeout,
            self.client
                .publish(topic, QoS::AtMostOnce, false, payload.into_bytes()),
        )
        .await
        .map_err(|_| PublishError::Timeout(self.publish_timeout))?
        .map_err(|e| PublishError::Client(e.to_string()))
    }
}

/// Build client options from the broker section of the config.
pub fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.broker, config.port);
    options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    options.set_clean_session(true);
    if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
        options.set_credentials(username, config.password.clone().unwrap_or_default());
    }
    options
}

/// Poll until the broker accepts the session.
async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), String> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(e.to_string()),
        }
    }
}

/// Keep the session alive and track whether it is usable.
async fn drive_event_loop(mut eventloop: EventLoop, connected: Arc<AtomicBool>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if !connected.swap(true, Ordering::SeqCst) {
                    log::info!("[Mqtt] reconnected");
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                if connected.swap(false, Ordering::SeqCst) {
                    log::error!("[Mqtt] connection lost: {}", e);
                } else {
                    log::debug!("[Mqtt] reconnect failed: {}", e);
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
