//! Settings types for the relay, grouped by the component they configure.

use std::time::Duration;

use pulse_core::WireFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document (`~/.pulse/settings.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PulseSettings {
    pub server: ServerSettings,
    pub bus: BusSettings,
    pub demo: DemoSettings,
    pub logging: LoggingSettings,
}

impl PulseSettings {
    /// Reject combinations the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.session_queue_capacity == 0 {
            return Err(SettingsError::invalid("server.sessionQueueCapacity", "must be at least 1"));
        }
        if self.server.keep_alive_secs == 0 {
            return Err(SettingsError::invalid("server.keepAliveSecs", "must be at least 1"));
        }
        if self.bus.topic.trim().is_empty() {
            return Err(SettingsError::invalid("bus.topic", "must not be empty"));
        }
        let backoff = &self.bus.backoff;
        if !(0.0..=1.0).contains(&backoff.jitter_factor) {
            return Err(SettingsError::invalid(
                "bus.backoff.jitterFactor",
                format!("must be within [0, 1], got {}", backoff.jitter_factor),
            ));
        }
        if backoff.max_delay_ms < backoff.base_delay_ms {
            return Err(SettingsError::invalid(
                "bus.backoff.maxDelayMs",
                format!(
                    "{} is below baseDelayMs ({})",
                    backoff.max_delay_ms, backoff.base_delay_ms
                ),
            ));
        }
        if self.demo.subjects.is_empty() {
            return Err(SettingsError::invalid("demo.subjects", "must not be empty"));
        }
        Ok(())
    }
}

/// What happens when a viewer's outbound queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverflowPolicy {
    /// Discard the oldest queued frame to make room.
    #[default]
    DropOldest,
    /// Treat the viewer as failed and tear it down.
    Disconnect,
}

/// Push endpoint and viewer session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listening port (`0` picks a free port).
    pub port: u16,
    /// Reconnect hint sent to viewers as the SSE `retry:` field.
    pub retry_hint_ms: u64,
    /// Interval between keep-alive comment frames.
    pub keep_alive_secs: u64,
    /// Frames buffered per viewer before the overflow policy applies.
    pub session_queue_capacity: usize,
    /// How long a viewer queue may stay saturated before the viewer is torn down.
    pub stall_timeout_ms: u64,
    pub overflow_policy: OverflowPolicy,
    pub wire_format: WireFormat,
    /// Allowed CORS origins. Empty means any origin.
    pub cors_origins: Vec<String>,
    /// Deadline for draining in-flight work on shutdown.
    pub shutdown_timeout_secs: u64,
    /// Expose Prometheus text at `/metrics`.
    pub metrics_enabled: bool,
}

impl ServerSettings {
    pub fn retry_hint(&self) -> Duration {
        Duration::from_millis(self.retry_hint_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 4000,
            retry_hint_ms: 10_000,
            keep_alive_secs: 15,
            session_queue_capacity: 256,
            stall_timeout_ms: 5_000,
            overflow_policy: OverflowPolicy::DropOldest,
            wire_format: WireFormat::Canonical,
            cors_origins: Vec::new(),
            shutdown_timeout_secs: 10,
            metrics_enabled: true,
        }
    }
}

/// Where the relay reads events from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusSource {
    /// A Kafka cluster (requires the `kafka` build feature).
    #[default]
    Kafka,
    /// An in-process topic fed by the synthetic demo producer.
    Demo,
}

impl BusSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kafka => "kafka",
            Self::Demo => "demo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "kafka" => Some(Self::Kafka),
            "demo" => Some(Self::Demo),
            _ => None,
        }
    }
}

/// Upstream bus settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusSettings {
    pub source: BusSource,
    /// Comma-separated bootstrap servers.
    pub brokers: String,
    /// Value-bearing topic the relay subscribes to.
    pub topic: String,
    pub group_id: String,
    pub connection_timeout_ms: u64,
    pub request_timeout_ms: u64,
    /// Start from the earliest offset when the group has no committed position.
    pub from_beginning: bool,
    pub backoff: BackoffSettings,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            source: BusSource::Kafka,
            brokers: "localhost:9092".into(),
            topic: "rsi-data".into(),
            group_id: "sse-group".into(),
            connection_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            from_beginning: false,
            backoff: BackoffSettings::default(),
        }
    }
}

/// Reconnect backoff for the bus consumer.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_factor: 0.2,
        }
    }
}

/// Synthetic producer used by `--source demo` and `pulse produce`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DemoSettings {
    pub subjects: Vec<String>,
    pub interval_ms: u64,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            subjects: ["SOLANA", "BITCOIN", "ETHEREUM", "BONK"]
                .into_iter()
                .map(String::from)
                .collect(),
            interval_ms: 2_000,
        }
    }
}

/// Log output settings. `RUST_LOG` still wins over `level`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    /// JSON lines when true, human-readable otherwise.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
