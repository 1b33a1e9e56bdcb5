//! Telemetry snapshot published once per poll cycle

use obd_protocol::{PhysicalValue, Pid};
use serde::Serialize;
use std::fmt;

/// Marker rendered for a metric that could not be read
pub const UNAVAILABLE: &str = "N/A";

/// One metric's value, or the explicit unavailable marker
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reading {
    Value(PhysicalValue),
    Unavailable,
}

impl Reading {
    pub fn value(&self) -> Option<&PhysicalValue> {
        match self {
            Reading::Value(value) => Some(value),
            Reading::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Reading::Value(_))
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Value(value) => value.fmt(f),
            Reading::Unavailable => f.write_str(UNAVAILABLE),
        }
    }
}

/// A metric and its reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricReading {
    pub pid: Pid,
    pub name: &'static str,
    pub reading: Reading,
}

/// A complete set of readings from one poll cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    /// Poll cycle that produced this snapshot (0 = nothing polled yet)
    pub cycle: u64,
    /// Completion time (Unix ms)
    pub timestamp_ms: u64,
    /// Readings in poll order
    pub readings: Vec<MetricReading>,
}

impl TelemetrySnapshot {
    /// Snapshot with every metric unavailable
    pub fn unavailable(pids: &[Pid]) -> Self {
        Self {
            cycle: 0,
            timestamp_ms: 0,
            readings: pids
                .iter()
                .map(|&pid| MetricReading {
                    pid,
                    name: metric_name(pid),
                    reading: Reading::Unavailable,
                })
                .collect(),
        }
    }

    /// Reading for a metric name such as `rpm`
    pub fn get(&self, name: &str) -> Option<&Reading> {
        self.readings
            .iter()
            .find(|m| m.name == name)
            .map(|m| &m.reading)
    }

    pub fn get_pid(&self, pid: Pid) -> Option<&Reading> {
        self.readings
            .iter()
            .find(|m| m.pid == pid)
            .map(|m| &m.reading)
    }

    /// Number of metrics that decoded successfully
    pub fn available_count(&self) -> usize {
        self.readings
            .iter()
            .filter(|m| m.reading.is_available())
            .count()
    }
}

impl fmt::Display for TelemetrySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "cycle {} @ {}", self.cycle, self.timestamp_ms)?;
        for metric in &self.readings {
            match &metric.reading {
                Reading::Value(value) if !value.unit().is_empty() => {
                    writeln!(f, "  {:<16} {} {}", metric.name, value, value.unit())?
                }
                reading => writeln!(f, "  {:<16} {}", metric.name, reading)?,
            }
        }
        Ok(())
    }
}

/// Snapshot key for a PID
pub fn metric_name(pid: Pid) -> &'static str {
    pid.spec().map(|spec| spec.name).unwrap_or("unknown")
}
