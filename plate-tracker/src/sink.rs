use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use url::Url;

use crate::config::MqttConfig;
use crate::error::SinkError;
use crate::state::TrackedPlate;

const TOPIC_PREFIX: &str = "GOST/";

/// Delivery guarantee requested for a publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// A confirmed sighting, addressed to a SensorThings datastream.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub topic: String,
    pub payload: Value,
    pub qos: QoS,
}

impl Publication {
    /// Build the observation published for a confirmed plate.
    pub fn observation(stream_id: u64, plate: &TrackedPlate) -> Self {
        Self {
            topic: observations_topic(stream_id),
            payload: json!({
                "result": {
                    "plate": plate.plate,
                    "confidence": plate.confidence,
                }
            }),
            qos: QoS::AtMostOnce,
        }
    }
}

pub fn observations_topic(stream_id: u64) -> String {
    format!("{TOPIC_PREFIX}Datastreams({stream_id})/Observations")
}

#[async_trait]
pub trait PublicationSink: Send + Sync {
    async fn publish(&self, publication: &Publication) -> Result<(), SinkError>;

    /// Release the connection, if the sink holds one.
    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Only logs publications, for local runs without a GOST server.
pub struct PrintSink {}

#[async_trait]
impl PublicationSink for PrintSink {
    async fn publish(&self, publication: &Publication) -> Result<(), SinkError> {
        info!(
            topic = %publication.topic,
            qos = publication.qos as u8,
            "publication: {}",
            publication.payload
        );

        Ok(())
    }
}

/// Publishes observations to the MQTT broker in front of a GOST server.
///
/// The connection is driven by a background task that keeps reconnecting until the sink
/// is closed or dropped. Publications made while disconnected wait in the client queue and go out
/// once the broker accepts the connection again.
pub struct MqttSink {
    client: AsyncClient,
    connection: JoinHandle<()>,
}

impl MqttSink {
    /// Create the client and start driving its connection. Must be called from within a
    /// tokio runtime.
    pub fn new(host: &str, config: &MqttConfig) -> Result<Self, SinkError> {
        let options = mqtt_options(host, config)?;
        let (client, event_loop) = AsyncClient::new(options, config.queue_capacity.max(1));

        info!(host, port = config.port, "starting mqtt client");
        let reconnect_interval = config.reconnect_interval.0;
        let connection = tokio::spawn(drive_connection(event_loop, reconnect_interval));

        Ok(Self { client, connection })
    }
}

/// Connection options for the broker at `host`. The keep alive is at least five seconds.
pub fn mqtt_options(host: &str, config: &MqttConfig) -> Result<MqttOptions, SinkError> {
    let client_id = config.client_id.trim();
    if client_id.is_empty() {
        return Err(SinkError::InvalidClientId(config.client_id.clone()));
    }

    let mut options = MqttOptions::new(client_id, host, config.port);
    options
        .set_clean_session(true)
        .set_keep_alive(config.keep_alive.0.max(Duration::from_secs(5)));

    Ok(options)
}

async fn drive_connection(mut event_loop: EventLoop, reconnect_interval: Duration) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => info!("mqtt client connected"),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                info!("mqtt client disconnected");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("mqtt client lost connection: {}", e);
                tokio::time::sleep(reconnect_interval).await;
            }
        }
    }
}

#[async_trait]
impl PublicationSink for MqttSink {
    async fn publish(&self, publication: &Publication) -> Result<(), SinkError> {
        let topic = publication.topic.clone();
        let qos: rumqttc::QoS = publication.qos.into();
        let payload = publication.payload.to_string();

        self.client
            .publish(topic, qos, false, payload)
            .await
            .map_err(SinkError::MqttError)
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.client.disconnect().await.map_err(SinkError::MqttError)
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.connection.abort();
    }
}

/// Posts observations to the HTTP API of a GOST server.
///
/// The topic `GOST/Datastreams(7)/Observations` is posted to
/// `<base url>/Datastreams(7)/Observations`, so the base url should include the API
/// version, e.g. `http://gost:8080/v1.0`. Requests are sent once: a failed delivery is
/// returned to the caller and not retried.
#[derive(Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpSink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SinkError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_owned()
        } else {
            format!("{base_url}/")
        };
        let base_url = Url::parse(&normalized).map_err(|source| SinkError::InvalidUrl {
            url: base_url.to_owned(),
            source,
        })?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent("plate-tracker")
            .timeout(timeout)
            .build()
            .map_err(SinkError::ClientError)?;

        Ok(Self { client, base_url })
    }

    /// Resolve the url a topic is posted to.
    pub fn endpoint(&self, topic: &str) -> Result<Url, SinkError> {
        let path = topic.strip_prefix(TOPIC_PREFIX).unwrap_or(topic);

        self.base_url
            .join(path)
            .map_err(|source| SinkError::InvalidUrl {
                url: format!("{}{}", self.base_url, path),
                source,
            })
    }
}

#[async_trait]
impl PublicationSink for HttpSink {
    async fn publish(&self, publication: &Publication) -> Result<(), SinkError> {
        let url = self.endpoint(&publication.topic)?;

        let response = self
            .client
            .post(url)
            .json(&publication.payload)
            .send()
            .await
            .map_err(SinkError::DeliveryError)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SinkError::Rejected(status))
        }
    }
}
