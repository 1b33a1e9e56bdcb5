//! OBD-II Telemetry Polling
//!
//! Polls a fixed, ordered list of Mode 01 PIDs once per cycle and publishes
//! each cycle's readings as a single immutable snapshot.

mod error;
mod poller;
mod snapshot;

pub use error::PollerError;
pub use poller::{PollerConfig, TelemetryPoller, DEFAULT_PIDS};
pub use snapshot::{metric_name, MetricReading, Reading, TelemetrySnapshot, UNAVAILABLE};
