//! Tracing subscriber and Prometheus recorder setup.
//!
//! Both are process-global and installed once by the binary. Library crates
//! only use the `tracing` and `metrics` macros plus the names in [`names`].

mod logging;
mod metrics;

pub use logging::{init_telemetry, TelemetryConfig};
pub use metrics::{install_metrics_recorder, names, render, MetricsError};
