//! `/health` endpoint.

use std::time::Instant;

use chrono::{DateTime, Utc};
use pulse_bus::ConsumerState;
use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `"ok"` while serving, `"draining"` once shutdown began.
    pub status: &'static str,
    /// Open viewer sessions.
    pub clients: usize,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    /// Bus consumer state; viewers are still served while it is not `consuming`.
    pub bus: &'static str,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    clients: usize,
    bus: ConsumerState,
    draining: bool,
) -> HealthResponse {
    HealthResponse {
        status: if draining { "draining" } else { "ok" },
        clients,
        timestamp: Utc::now(),
        uptime_secs: start_time.elapsed().as_secs(),
        bus: bus.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn status_is_ok() {
        let resp = health_check(Instant::now(), 0, ConsumerState::Consuming, false);
        assert_eq!(resp.status, "ok");
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn draining_status() {
        let resp = health_check(Instant::now(), 0, ConsumerState::Disconnected, true);
        assert_eq!(resp.status, "draining");
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now().checked_sub(Duration::from_secs(60)).unwrap();
        let resp = health_check(start, 0, ConsumerState::Consuming, false);
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), 3, ConsumerState::Connecting, false);
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["clients"], 3);
        assert_eq!(parsed["bus"], "connecting");
        assert!(parsed["uptimeSecs"].is_number());
        let ts = parsed["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok(), "{ts}");
    }
}
