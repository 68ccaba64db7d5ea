use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subject assigned to events whose payload carried no usable subject.
pub const UNKNOWN_SUBJECT: &str = "UNKNOWN";

/// One normalized measurement, the unit of broadcast.
///
/// Every field is always populated; the normalizer degrades malformed input to
/// sentinel values instead of producing partial events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Event {
    pub fn new(subject: impl Into<String>, timestamp: DateTime<Utc>, value: f64) -> Self {
        Self {
            subject: subject.into(),
            timestamp,
            value,
        }
    }

    /// Sentinel event for payloads that carried nothing but (maybe) a number.
    pub fn unknown(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self::new(UNKNOWN_SUBJECT, timestamp, value)
    }

    pub fn is_unknown(&self) -> bool {
        self.subject == UNKNOWN_SUBJECT
    }

    /// Serialize the event in the given wire shape.
    pub fn to_wire(&self, format: WireFormat) -> Result<String, serde_json::Error> {
        match format {
            WireFormat::Canonical => serde_json::to_string(self),
            WireFormat::Legacy => serde_json::to_string(&LegacyEvent {
                token: &self.subject,
                timestamp: &self.timestamp,
                rsi: self.value,
            }),
        }
    }
}

/// Field layout of the dashboard that predates the canonical shape.
#[derive(Serialize)]
struct LegacyEvent<'a> {
    token: &'a str,
    timestamp: &'a DateTime<Utc>,
    rsi: f64,
}

/// JSON shape of the `data:` payload sent to viewers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// `{"subject", "timestamp", "value"}`
    #[default]
    Canonical,
    /// `{"token", "timestamp", "rsi"}`
    Legacy,
}

impl WireFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Canonical => "canonical",
            Self::Legacy => "legacy",
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown wire format: {0} (expected \"canonical\" or \"legacy\")")]
pub struct UnknownWireFormat(pub String);

impl FromStr for WireFormat {
    type Err = UnknownWireFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "canonical" => Ok(Self::Canonical),
            "legacy" => Ok(Self::Legacy),
            _ => Err(UnknownWireFormat(s.to_string())),
        }
    }
}
