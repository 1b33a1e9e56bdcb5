//! Telemetry Poller Implementation

use obd_protocol::{ObdClient, ObdError, Pid};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::PollerError;
use crate::snapshot::{metric_name, MetricReading, Reading, TelemetrySnapshot};

/// PIDs polled when none are configured, in poll order
pub const DEFAULT_PIDS: [Pid; 12] = [
    Pid::Rpm,
    Pid::Speed,
    Pid::CoolantTemp,
    Pid::EngineLoad,
    Pid::IntakeManifoldPressure,
    Pid::ThrottlePosition,
    Pid::ModuleVoltage,
    Pid::TimingAdvance,
    Pid::Maf,
    Pid::AirFuelRatio,
    Pid::FuelSystemStatus,
    Pid::O2Sensor,
];

/// Configuration for the telemetry poller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Delay between the end of one cycle and the start of the next
    pub interval_ms: u64,
    /// PIDs queried each cycle, in order
    pub pids: Vec<Pid>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            pids: DEFAULT_PIDS.to_vec(),
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Reject empty PID lists and PIDs without a decoder
    pub fn validate(&self) -> Result<(), PollerError> {
        if self.pids.is_empty() {
            return Err(PollerError::InvalidConfig("no PIDs configured".to_string()));
        }
        if let Some(pid) = self.pids.iter().find(|pid| pid.spec().is_none()) {
            return Err(PollerError::InvalidConfig(format!(
                "PID {:02X} has no decoder",
                pid.as_hex()
            )));
        }
        Ok(())
    }
}

struct Inner {
    client: Arc<ObdClient>,
    config: PollerConfig,
    running: AtomicBool,
    cycles: AtomicU64,
    stop: watch::Sender<bool>,
    snapshot: watch::Sender<TelemetrySnapshot>,
}

/// Periodically polls the configured PIDs and publishes one snapshot per cycle.
///
/// Cheap to clone; clones share the same loop and snapshot.
#[derive(Clone)]
pub struct TelemetryPoller {
    inner: Arc<Inner>,
}

impl TelemetryPoller {
    pub fn new(client: Arc<ObdClient>, config: PollerConfig) -> Result<Self, PollerError> {
        config.validate()?;
        info!("Telemetry poller created with {} PIDs", config.pids.len());

        let (stop, _) = watch::channel(false);
        let (snapshot, _) = watch::channel(TelemetrySnapshot::unavailable(&config.pids));

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                config,
                running: AtomicBool::new(false),
                cycles: AtomicU64::new(0),
                stop,
                snapshot,
            }),
        })
    }

    /// Start the polling loop.
    ///
    /// Returns `None` if a loop is already running.
    pub fn start(&self) -> Option<JoinHandle<()>> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Telemetry poller already running");
            return None;
        }

        self.inner.stop.send_replace(false);
        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(async move {
            inner.run().await;
            inner.running.store(false, Ordering::Release);
        }))
    }

    /// Ask the loop to exit once the current polling cycle finishes
    pub fn stop(&self) {
        info!("Stopping telemetry poller");
        self.inner.stop.send_replace(true);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TelemetrySnapshot> {
        self.inner.snapshot.subscribe()
    }

    pub fn pid_count(&self) -> usize {
        self.inner.config.pids.len()
    }

    /// Run a single cycle and publish its snapshot.
    ///
    /// Fails only on a link failure, in which case nothing is published.
    pub async fn poll_once(&self) -> Result<TelemetrySnapshot, ObdError> {
        self.inner.poll_once().await
    }
}

impl Inner {
    async fn run(&self) {
        info!("Starting telemetry poller");
        self.client.mark_streaming();

        loop {
            if *self.stop.borrow() {
                break;
            }
            if !self.client.is_connected() {
                info!("Connection is {}, polling ends", self.client.state());
                break;
            }

            if let Err(e) = self.poll_once().await {
                warn!("Telemetry cycle aborted: {}", e);
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval()) => {}
                _ = self.client.closed() => {}
                _ = self.stopped() => {}
            }
        }

        info!("Telemetry poller stopped");
    }

    async fn stopped(&self) {
        let mut stop_rx = self.stop.subscribe();
        let _ = stop_rx.wait_for(|stop| *stop).await;
    }

    async fn poll_once(&self) -> Result<TelemetrySnapshot, ObdError> {
        let mut readings = Vec::with_capacity(self.config.pids.len());

        for &pid in &self.config.pids {
            let reading = match self.client.query_pid(pid).await {
                Ok(value) => Reading::Value(value),
                Err(e) if e.is_link_failure() => return Err(e),
                Err(e) => {
                    debug!("{} unavailable: {}", metric_name(pid), e);
                    Reading::Unavailable
                }
            };
            readings.push(MetricReading {
                pid,
                name: metric_name(pid),
                reading,
            });
        }

        let snapshot = TelemetrySnapshot {
            cycle: self.cycles.fetch_add(1, Ordering::AcqRel) + 1,
            timestamp_ms: now_ms(),
            readings,
        };
        self.snapshot.send_replace(snapshot.clone());
        debug!(
            "Cycle {}: {}/{} metrics available",
            snapshot.cycle,
            snapshot.available_count(),
            snapshot.readings.len()
        );
        Ok(snapshot)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
