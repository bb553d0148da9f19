use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, MqttOptions};
use rumqttc::Transport;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{CaptureMetadata, PublishSink};
use crate::config::PublishSettings;
use crate::error::PublishError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

/// Parse `[mqtt|mqtts]://host:port` or bare `host:port`.
pub fn parse_broker(addr: &str) -> Result<MqttEndpoint> {
    let mut use_tls = false;
    let mut remainder = addr.trim();

    if let Some((scheme, rest)) = remainder.split_once("://") {
        match scheme {
            "mqtt" | "tcp" => {}
            "mqtts" | "ssl" => use_tls = true,
            other => return Err(anyhow!("unsupported MQTT scheme: {}", other)),
        }
        remainder = rest;
    }

    let (host, port) = split_host_port(remainder)?;
    if host.is_empty() {
        return Err(anyhow!("missing MQTT host in {}", addr));
    }
    Ok(MqttEndpoint {
        host,
        port,
        use_tls,
    })
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid MQTT address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
        let port: u16 = port.parse().context("invalid MQTT port")?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing MQTT port in {}", addr))?;
    let port: u16 = port.parse().context("invalid MQTT port")?;
    Ok((host.to_string(), port))
}

/// Publishes capture metadata (JSON) and image bytes with QoS 1.
///
/// Topics: `<prefix>/capture/metadata` and `<prefix>/capture/image`. The
/// metadata message goes first so subscribers can match the image by
/// `image_sha256`.
pub struct MqttSink {
    client: Client,
    closing: Arc<AtomicBool>,
    connection_handle: Option<std::thread::JoinHandle<()>>,
    metadata_topic: String,
    image_topic: String,
}

impl MqttSink {
    pub fn connect(endpoint: &MqttEndpoint, settings: &PublishSettings) -> Result<Self> {
        let mut options =
            MqttOptions::new(settings.mqtt_client_id.as_str(), &endpoint.host, endpoint.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_start(true);
        if endpoint.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, connection) = Client::new(options, 10);
        log::info!(
            "publish: MQTT broker {}:{} (TLS: {})",
            endpoint.host,
            endpoint.port,
            endpoint.use_tls
        );
        let prefix = settings.topic_prefix.trim_end_matches('/');
        let closing = Arc::new(AtomicBool::new(false));
        Ok(Self {
            client,
            connection_handle: Some(spawn_event_loop(connection, Arc::clone(&closing))),
            closing,
            metadata_topic: format!("{}/capture/metadata", prefix),
            image_topic: format!("{}/capture/image", prefix),
        })
    }
}

/// Pause before polling again after a connection error. The next poll
/// reconnects.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

fn spawn_event_loop(
    mut connection: Connection,
    closing: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        drive_events(connection.iter(), &closing, RECONNECT_BACKOFF);
    })
}

/// Poll the event loop until it ends or errors after `closing` is set.
/// Errors before that are logged and retried after `backoff`. Returns the
/// number of connection errors seen.
fn drive_events<I, T, E>(events: I, closing: &AtomicBool, backoff: Duration) -> u64
where
    I: Iterator<Item = Result<T, E>>,
    E: Display,
{
    let mut errors = 0;
    for event in events {
        let Err(e) = event else {
            continue;
        };
        if closing.load(Ordering::SeqCst) {
            break;
        }
        errors += 1;
        log::warn!(
            "MQTT connection error ({}), reconnecting in {}s: {}",
            errors,
            backoff.as_secs(),
            e
        );
        std::thread::sleep(backoff);
    }
    errors
}

impl PublishSink for MqttSink {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn submit(&mut self, image: &[u8], metadata: &CaptureMetadata) -> Result<(), PublishError> {
        let payload = metadata.to_json()?;
        self.client
            .publish(self.metadata_topic.as_str(), QoS::AtLeastOnce, false, payload)
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        self.client
            .publish(self.image_topic.as_str(), QoS::AtLeastOnce, false, image.to_vec())
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        Ok(())
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.disconnect() {
            log::debug!("MQTT disconnect: {}", e);
        }
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
    }
}
