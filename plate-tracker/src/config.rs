use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

use crate::state::DedupSettings;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(nested = true)]
    pub recognizer: RecognizerConfig,

    #[envconfig(nested = true)]
    pub tracker: TrackerConfig,

    #[envconfig(nested = true)]
    pub sink: SinkConfig,

    #[envconfig(nested = true)]
    pub mqtt: MqttConfig,

    #[envconfig(default = "1000")]
    pub max_pending_messages: usize,

    #[envconfig(default = "250")]
    pub tick_interval: EnvMsDuration,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// How to start the external recognizer.
#[derive(Envconfig, Clone, Debug)]
pub struct RecognizerConfig {
    #[envconfig(from = "ALPR_LOCATION", default = "alpr")]
    pub location: String,

    /// Url of the video stream handed to the recognizer.
    #[envconfig(from = "ALPR_STREAM")]
    pub stream: String,

    #[envconfig(from = "ALPR_COUNTRY", default = "eu")]
    pub country: String,

    #[envconfig(from = "ALPR_TOP_N", default = "1")]
    pub top_n: u32,

    #[envconfig(from = "ALPR_READ_BUFFER_SIZE", default = "2048")]
    pub read_buffer_size: usize,
}

#[derive(Envconfig, Clone, Debug)]
pub struct TrackerConfig {
    /// Readings below this confidence (0-100) never start a candidate.
    #[envconfig(from = "ALPR_CONFIDENCE", default = "80")]
    pub confidence: f64,

    #[envconfig(from = "ALPR_LOST", default = "5000")]
    pub lost: EnvMsDuration,

    #[envconfig(from = "ALPR_SCAN_TIME", default = "3000")]
    pub scan_time: EnvMsDuration,
}

impl TrackerConfig {
    pub fn settings(&self) -> DedupSettings {
        DedupSettings {
            confidence_threshold: self.confidence,
            lost_window: self.lost.0,
            scan_window: self.scan_time.0,
        }
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct SinkConfig {
    #[envconfig(from = "GOST_STREAM_ID", default = "1")]
    pub stream_id: u64,

    /// Base url of the GOST HTTP API. Publications are only logged when unset.
    #[envconfig(from = "GOST_URL")]
    pub gost_url: Option<String>,

    #[envconfig(from = "GOST_PUBLISH_TIMEOUT", default = "5000")]
    pub publish_timeout: EnvMsDuration,
}

/// The MQTT broker observations are published to, usually the one bundled with GOST.
#[derive(Envconfig, Clone, Debug)]
pub struct MqttConfig {
    /// Broker host. When set, observations go over MQTT and `GOST_URL` is ignored.
    #[envconfig(from = "MQTT_HOST")]
    pub host: Option<String>,

    #[envconfig(from = "MQTT_PORT", default = "1883")]
    pub port: u16,

    #[envconfig(from = "MQTT_CLIENT_ID", default = "plate-tracker")]
    pub client_id: String,

    #[envconfig(from = "MQTT_KEEP_ALIVE", default = "300000")]
    pub keep_alive: EnvMsDuration,

    /// Pause between connection attempts while the broker is unreachable.
    #[envconfig(from = "MQTT_RECONNECT_INTERVAL", default = "5000")]
    pub reconnect_interval: EnvMsDuration,

    /// Publications queued in the client while the connection is down.
    #[envconfig(from = "MQTT_QUEUE_CAPACITY", default = "100")]
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}
