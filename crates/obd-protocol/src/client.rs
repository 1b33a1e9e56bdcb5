//! OBD-II Client for ELM327 Adapters
//!
//! `ObdClient` owns the link to the adapter and drives the connection
//! lifecycle:
//!
//! ```text
//! Disconnected -> Scanning -> Connecting -> Connected -> Streaming
//! ```
//!
//! Any state can move to `Failed` when the transport is unavailable, and
//! `disconnect` always returns to `Disconnected`. State, discovered devices,
//! the connect-in-progress flag and the latest diagnostic result are
//! published through `watch` channels; the client is their only writer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::diagnostics::{decode_monitor_status, DtcStatus, DtcSummary};
use crate::error::{DecodeError, ObdError, TransportError};
use crate::mock::{MockDiscovery, MockTransport};
use crate::mode;
use crate::pid::{PhysicalValue, Pid};
use crate::protocol::ObdProtocol;
use crate::transaction::{self, RawReply};
use crate::transport::{BoxedStream, DeviceDescriptor, Discovery, Transport};

/// Default timeout for OBD commands
const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Default timeout for opening the link
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Why the client ended up in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    /// Adapter disabled or missing
    Unavailable(String),
    /// Host refused access
    PermissionDenied(String),
}

impl From<&TransportError> for FailureReason {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::PermissionDenied(msg) => FailureReason::PermissionDenied(msg.clone()),
            TransportError::Unavailable(msg) | TransportError::Open(msg) => {
                FailureReason::Unavailable(msg.clone())
            }
        }
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Scanning,
    Connecting,
    Connected,
    Streaming,
    Failed(FailureReason),
}

impl ConnectionState {
    /// Whether a session is open and transactions may run
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Streaming)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Scanning => f.write_str("scanning"),
            ConnectionState::Connecting => f.write_str("connecting"),
            ConnectionState::Connected => f.write_str("connected"),
            ConnectionState::Streaming => f.write_str("streaming"),
            ConnectionState::Failed(FailureReason::Unavailable(msg)) => {
                write!(f, "failed (unavailable: {})", msg)
            }
            ConnectionState::Failed(FailureReason::PermissionDenied(msg)) => {
                write!(f, "failed (permission denied: {})", msg)
            }
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Per-command reply timeout (milliseconds)
    pub command_timeout_ms: u64,
    /// Timeout for opening the link (milliseconds)
    pub connect_timeout_ms: u64,
    /// Send the reset/echo-off/protocol sequence after the link opens
    pub initialize_adapter: bool,
    /// Protocol selected during initialization
    pub protocol: ObdProtocol,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: DEFAULT_TIMEOUT_MS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            initialize_adapter: true,
            protocol: ObdProtocol::Auto,
        }
    }
}

impl ClientConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// An open link; only ever held inside the client's session slot
struct Session {
    stream: BoxedStream,
    device: DeviceDescriptor,
    /// Sequence number from `ObdClient::sessions_opened`
    seq: u64,
}

/// OBD-II client for communicating with ELM327-compatible adapters
pub struct ObdClient {
    transport: Arc<dyn Transport>,
    discovery: Arc<dyn Discovery>,
    config: ClientConfig,
    /// Holding this lock for the length of a transaction serializes access to the link
    session: Mutex<Option<Session>>,
    sessions_opened: AtomicU64,
    state: watch::Sender<ConnectionState>,
    devices: watch::Sender<Vec<DeviceDescriptor>>,
    connecting: watch::Sender<bool>,
    dtc: watch::Sender<DtcStatus>,
}

impl ObdClient {
    /// Create a new OBD client
    pub fn new(
        transport: Arc<dyn Transport>,
        discovery: Arc<dyn Discovery>,
        config: ClientConfig,
    ) -> Self {
        debug!("Creating OBD client with config: {:?}", config);
        Self {
            transport,
            discovery,
            config,
            session: Mutex::new(None),
            sessions_opened: AtomicU64::new(0),
            state: watch::channel(ConnectionState::Disconnected).0,
            devices: watch::channel(Vec::new()).0,
            connecting: watch::channel(false).0,
            dtc: watch::channel(DtcStatus::NotRequested).0,
        }
    }

    /// Create a client backed by the mock adapter (no hardware required)
    pub fn mock() -> Self {
        info!("Creating mock OBD client");
        Self::new(
            Arc::new(MockTransport::new()),
            Arc::new(MockDiscovery::default()),
            ClientConfig {
                command_timeout_ms: 500,
                connect_timeout_ms: 1000,
                ..Default::default()
            },
        )
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Check if client is connected
    pub fn is_connected(&self) -> bool {
        self.state.borrow().is_live()
    }

    /// Devices found by the last scan
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.devices.borrow().clone()
    }

    pub fn subscribe_devices(&self) -> watch::Receiver<Vec<DeviceDescriptor>> {
        self.devices.subscribe()
    }

    /// Whether a connect attempt is running
    pub fn is_connecting(&self) -> bool {
        *self.connecting.borrow()
    }

    pub fn subscribe_connecting(&self) -> watch::Receiver<bool> {
        self.connecting.subscribe()
    }

    /// Latest diagnostic summary
    pub fn dtc_status(&self) -> DtcStatus {
        self.dtc.borrow().clone()
    }

    pub fn subscribe_dtc(&self) -> watch::Receiver<DtcStatus> {
        self.dtc.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state.clone());
        if previous != state {
            info!("Connection state: {} -> {}", previous, state);
        }
    }

    /// List connectable devices.
    ///
    /// An unavailable transport moves the client to `Failed` and is returned
    /// as [`ObdError::TransportUnavailable`].
    pub async fn scan(&self) -> Result<Vec<DeviceDescriptor>, ObdError> {
        match self.state() {
            ConnectionState::Connecting => return Err(ObdError::ConnectInProgress),
            ConnectionState::Connected | ConnectionState::Streaming => {
                return Err(ObdError::AlreadyConnected)
            }
            _ => {}
        }

        self.set_state(ConnectionState::Scanning);
        match self.discovery.list_devices().await {
            Ok(devices) => {
                info!("Discovered {} devices", devices.len());
                self.devices.send_replace(devices.clone());
                Ok(devices)
            }
            Err(e) => {
                error!("Device discovery failed: {}", e);
                self.set_state(ConnectionState::Failed(FailureReason::from(&e)));
                Err(ObdError::TransportUnavailable(e))
            }
        }
    }

    /// Open a link to `device` and initialize the adapter.
    ///
    /// Only one link may be open; a second attempt while one is open or
    /// connecting is rejected. An ordinary failure returns the client to
    /// `Disconnected` so the caller can retry immediately.
    pub async fn connect(&self, device: &DeviceDescriptor) -> Result<(), ObdError> {
        match self.state() {
            ConnectionState::Connecting => return Err(ObdError::ConnectInProgress),
            ConnectionState::Connected | ConnectionState::Streaming => {
                return Err(ObdError::AlreadyConnected)
            }
            _ => {}
        }

        let claimed = self.connecting.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                true
            }
        });
        if !claimed {
            return Err(ObdError::ConnectInProgress);
        }

        let result = self.open_session(device).await;
        self.connecting.send_replace(false);
        result
    }

    async fn open_session(&self, device: &DeviceDescriptor) -> Result<(), ObdError> {
        let mut slot = self.session.lock().await;
        if slot.is_some() {
            return Err(ObdError::AlreadyConnected);
        }

        self.set_state(ConnectionState::Connecting);
        info!("Connecting to {}", device);

        let opened = tokio::time::timeout(self.config.connect_timeout(), self.transport.open(device))
            .await
            .unwrap_or_else(|_| Err(TransportError::Open("timed out opening link".to_string())));

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e @ (TransportError::Unavailable(_) | TransportError::PermissionDenied(_))) => {
                error!("Cannot connect to {}: {}", device, e);
                self.set_state(ConnectionState::Failed(FailureReason::from(&e)));
                return Err(ObdError::TransportUnavailable(e));
            }
            Err(e) => {
                error!("Failed to open link to {}: {}", device, e);
                self.set_state(ConnectionState::Disconnected);
                return Err(ObdError::ConnectFailure(e.to_string()));
            }
        };

        if self.config.initialize_adapter {
            if let Err(e) = self.initialize(&mut stream).await {
                error!("Adapter initialization failed on {}: {}", device, e);
                self.set_state(ConnectionState::Disconnected);
                return Err(ObdError::ConnectFailure(e.to_string()));
            }
        }

        let seq = self.sessions_opened.fetch_add(1, Ordering::SeqCst) + 1;

        // A disconnect while we were connecting wins
        let published = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Connected;
                true
            } else {
                false
            }
        });
        if !published {
            warn!("Disconnected while connecting to {}", device);
            let _ = tokio::time::timeout(self.config.command_timeout(), stream.shutdown()).await;
            return Err(ObdError::ConnectFailure("disconnected while connecting".to_string()));
        }

        *slot = Some(Session {
            stream,
            device: device.clone(),
            seq,
        });
        info!("Connection state: connecting -> connected");
        info!("OBD adapter connected on {}", device);
        Ok(())
    }

    /// Reset the adapter, disable echo and linefeeds, select the protocol
    async fn initialize(&self, stream: &mut BoxedStream) -> Result<(), ObdError> {
        for command in self.config.protocol.init_sequence() {
            let reply = transaction::transact(stream, &command, self.config.command_timeout()).await?;
            debug!("{} -> {}", command, reply);
        }
        Ok(())
    }

    /// Resolves once no session is live
    pub async fn closed(&self) {
        let mut state_rx = self.state.subscribe();
        let _ = state_rx.wait_for(|state| !state.is_live()).await;
    }

    /// Mark the session as streaming; returns false unless it was `Connected`
    pub fn mark_streaming(&self) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Streaming;
                true
            } else {
                false
            }
        });
        if changed {
            info!("Connection state: connected -> streaming");
        }
        changed
    }

    /// Run one command/reply transaction on the open link.
    ///
    /// Transactions are serialized. A transaction that is waiting or in
    /// flight fails with [`ObdError::Io`] as soon as the link it was issued
    /// on is closed; it never runs on a link opened later. An I/O failure or
    /// timeout drops the link.
    pub async fn transact(&self, command: &str) -> Result<RawReply, ObdError> {
        if !self.is_connected() {
            return Err(ObdError::NotConnected);
        }
        // The session's number is taken before Connected is published
        let seq = self.sessions_opened.load(Ordering::SeqCst);

        let io = async {
            let mut slot = self.session.lock().await;
            let session = match slot.as_mut() {
                Some(session) if session.seq == seq => session,
                _ => return (Err(ObdError::Io("link closed".to_string())), None),
            };

            let result =
                transaction::transact(&mut session.stream, command, self.config.command_timeout())
                    .await;
            // Taken under the lock so only this link is dropped
            let failed = match &result {
                Err(e) if e.is_link_failure() => {
                    warn!("Link failure during {:?}: {}", command, e);
                    self.set_state(ConnectionState::Disconnected);
                    slot.take()
                }
                _ => None,
            };
            (result, failed)
        };

        let (result, failed) = tokio::select! {
            biased;
            _ = self.closed() => return Err(ObdError::Io("link closed".to_string())),
            outcome = io => outcome,
        };

        self.shutdown_session(failed).await;
        result
    }

    /// Query a Mode 01 PID and decode the reply
    pub async fn query_pid(&self, pid: Pid) -> Result<PhysicalValue, ObdError> {
        let spec = pid
            .spec()
            .ok_or(DecodeError::UnknownPid(pid.as_hex()))?;

        let reply = self.transact(&pid.command()).await?;
        spec.decode(mode::CURRENT_DATA, reply.as_str()).map_err(|e| {
            warn!("PID {:02X} decode failed: {}", pid.as_hex(), e);
            ObdError::from(e)
        })
    }

    /// Request the monitor status (`0101`) and publish the decoded summary.
    ///
    /// A malformed reply publishes [`DtcStatus::Invalid`] and is returned as
    /// a decode error; the session stays open.
    pub async fn read_monitor_status(&self) -> Result<DtcSummary, ObdError> {
        let reply = self.transact(&Pid::MonitorStatus.command()).await?;

        match decode_monitor_status(reply.as_str()) {
            Ok(summary) => {
                info!(
                    "Monitor status: MIL {}, {} stored DTCs",
                    if summary.mil_on { "on" } else { "off" },
                    summary.stored_count
                );
                self.dtc.send_replace(DtcStatus::Ready(summary.clone()));
                Ok(summary)
            }
            Err(e) => {
                warn!("Invalid monitor status reply {:?}: {}", reply.as_str(), e);
                self.dtc.send_replace(DtcStatus::Invalid {
                    reply: reply.as_str().to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Disconnect from the OBD adapter
    pub async fn disconnect(&self) {
        info!("Disconnecting OBD client");
        self.close_session().await;
    }

    async fn close_session(&self) {
        // Publish first so pending transactions release the session slot
        self.set_state(ConnectionState::Disconnected);

        let session = {
            let mut slot = self.session.lock().await;
            // A connect that held the slot while we waited may have published `Connected`
            self.set_state(ConnectionState::Disconnected);
            slot.take()
        };
        self.shutdown_session(session).await;
    }

    async fn shutdown_session(&self, session: Option<Session>) {
        if let Some(mut session) = session {
            let _ = tokio::time::timeout(self.config.command_timeout(), session.stream.shutdown()).await;
            info!("Closed link to {}", session.device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with(mock: &MockTransport, discovery: MockDiscovery) -> ObdClient {
        ObdClient::new(
            Arc::new(mock.clone()),
            Arc::new(discovery),
            ClientConfig {
                command_timeout_ms: 500,
                connect_timeout_ms: 500,
                ..Default::default()
            },
        )
    }

    fn device() -> DeviceDescriptor {
        DeviceDescriptor::new("mock")
    }

    #[tokio::test]
    async fn test_mock_client_creation() {
        let client = ObdClient::mock();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
        assert!(!client.is_connecting());
    }

    #[tokio::test]
    async fn test_connect_initializes_adapter() {
        let mock = MockTransport::new();
        let client = client_with(&mock, MockDiscovery::default());

        client.connect(&device()).await.unwrap();

        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(mock.commands(), ["ATZ", "ATE0", "ATL0", "ATSP0"]);
        assert!(!client.is_connecting());
    }

    #[tokio::test]
    async fn test_scan_then_connect() {
        let mock = MockTransport::new();
        let client = client_with(&mock, MockDiscovery::default());

        let devices = client.scan().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Scanning);
        assert_eq!(client.devices(), devices);

        client.connect(&devices[0]).await.unwrap();
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_scan_unavailable_fails_without_connecting() {
        let mock = MockTransport::new();
        let client = client_with(
            &mock,
            MockDiscovery::failing(TransportError::Unavailable("adapter off".into())),
        );

        let result = client.scan().await;
        assert!(matches!(result, Err(ObdError::TransportUnavailable(_))));
        assert_eq!(
            client.state(),
            ConnectionState::Failed(FailureReason::Unavailable("adapter off".into()))
        );
        assert_eq!(mock.open_count(), 0);

        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_failure_returns_to_disconnected() {
        let mock = MockTransport::new();
        let client = client_with(&mock, MockDiscovery::default());
        mock.fail_next_open(TransportError::Open("service discovery failed".into()));

        let result = client.connect(&device()).await;
        assert!(matches!(result, Err(ObdError::ConnectFailure(_))));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connecting());

        // immediate retry is allowed
        client.connect(&device()).await.unwrap();
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_second_connect_is_rejected() {
        let mock = MockTransport::new();
        let client = client_with(&mock, MockDiscovery::default());

        client.connect(&device()).await.unwrap();
        let result = client.connect(&device()).await;

        assert!(matches!(result, Err(ObdError::AlreadyConnected)));
        assert_eq!(mock.open_count(), 1);
    }

    #[tokio::test]
    async fn test_no_transaction_while_disconnected() {
        let client = ObdClient::mock();
        assert!(matches!(
            client.transact("010C").await,
            Err(ObdError::NotConnected)
        ));

        client.connect(&device()).await.unwrap();
        client.disconnect().await;
        assert!(matches!(
            client.query_pid(Pid::Rpm).await,
            Err(ObdError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_mock_pid_query() {
        let client = ObdClient::mock();
        client.connect(&device()).await.unwrap();

        let rpm = client.query_pid(Pid::Rpm).await.unwrap();
        assert_eq!(rpm.as_f64(), Some(1726.0));
        let speed = client.query_pid(Pid::Speed).await.unwrap();
        assert_eq!(speed.to_string(), "80");
    }

    #[tokio::test]
    async fn test_decode_failure_keeps_session() {
        let mock = MockTransport::new();
        mock.set_reply("010D", "41 0D");
        let client = client_with(&mock, MockDiscovery::default());
        client.connect(&device()).await.unwrap();

        let result = client.query_pid(Pid::Speed).await;
        assert!(matches!(
            result,
            Err(ObdError::Decode(DecodeError::Malformed(_)))
        ));
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_monitor_status_published() {
        let client = ObdClient::mock();
        client.connect(&device()).await.unwrap();
        let mut dtc_rx = client.subscribe_dtc();

        let summary = client.read_monitor_status().await.unwrap();
        assert!(summary.mil_on);
        assert_eq!(summary.stored_count, 7);
        assert!(dtc_rx.has_changed().unwrap());
        assert_eq!(*dtc_rx.borrow_and_update(), DtcStatus::Ready(summary));
    }

    #[tokio::test]
    async fn test_invalid_monitor_status_published() {
        let mock = MockTransport::new();
        mock.set_reply("0101", "NO DATA");
        let client = client_with(&mock, MockDiscovery::default());
        client.connect(&device()).await.unwrap();

        let result = client.read_monitor_status().await;
        assert!(matches!(result, Err(ObdError::Decode(_))));
        assert_eq!(
            client.dtc_status(),
            DtcStatus::Invalid {
                reply: "NO DATA".into()
            }
        );
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_from_any_state() {
        let client = ObdClient::mock();
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.scan().await.unwrap();
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.connect(&device()).await.unwrap();
        assert!(client.mark_streaming());
        assert_eq!(client.state(), ConnectionState::Streaming);
        client.disconnect().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.mark_streaming());
    }

    #[tokio::test]
    async fn test_overlapping_transactions_are_serialized() {
        let mock = MockTransport::new().with_latency(Duration::from_millis(30));
        let client = client_with(&mock, MockDiscovery::default());
        client.connect(&device()).await.unwrap();

        let completed = std::sync::Mutex::new(Vec::new());
        let run = |command: &'static str| {
            let client = &client;
            let completed = &completed;
            async move {
                let reply = client.transact(command).await.unwrap();
                completed.lock().unwrap().push(command);
                reply
            }
        };

        let (rpm, speed, coolant) = tokio::join!(run("010C"), run("010D"), run("0105"));
        assert_eq!(rpm.as_str(), "41 0C 1A F8");
        assert_eq!(speed.as_str(), "41 0D 50");
        assert_eq!(coolant.as_str(), "41 05 7B");

        // each command reached the adapter only after the previous reply came back
        let completed = completed.into_inner().unwrap();
        assert_eq!(completed.len(), 3);
        assert_eq!(mock.commands()[4..], completed);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_in_flight_transaction() {
        // the adapter takes far longer to answer than the test is willing to wait
        let mock = MockTransport::new().with_latency(Duration::from_secs(10));
        let client = Arc::new(ObdClient::new(
            Arc::new(mock.clone()),
            Arc::new(MockDiscovery::default()),
            ClientConfig {
                command_timeout_ms: 30_000,
                initialize_adapter: false,
                ..Default::default()
            },
        ));
        client.connect(&device()).await.unwrap();

        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.transact("010C").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.disconnect().await;

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("transaction did not fail promptly")
            .unwrap();
        assert!(matches!(result, Err(ObdError::Io(_))));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_stale_failure_keeps_new_link() {
        let mock = MockTransport::new().with_latency(Duration::from_millis(100));
        let client = Arc::new(ObdClient::new(
            Arc::new(mock.clone()),
            Arc::new(MockDiscovery::default()),
            ClientConfig {
                command_timeout_ms: 5_000,
                initialize_adapter: false,
                ..Default::default()
            },
        ));
        client.connect(&device()).await.unwrap();

        let stale = {
            let client = client.clone();
            tokio::spawn(async move { client.transact("010C").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.disconnect().await;
        client.connect(&device()).await.unwrap();

        assert!(matches!(stale.await.unwrap(), Err(ObdError::Io(_))));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.transact("010D").await.unwrap().as_str(), "41 0D 50");
        assert_eq!(mock.open_count(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_during_connect_fails_connect() {
        let mock = MockTransport::new().with_latency(Duration::from_millis(50));
        let client = Arc::new(client_with(&mock, MockDiscovery::default()));

        let connecting = {
            let client = client.clone();
            tokio::spawn(async move { client.connect(&device()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.state(), ConnectionState::Connecting);

        client.disconnect().await;

        let result = connecting.await.unwrap();
        assert!(matches!(result, Err(ObdError::ConnectFailure(_))));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
        assert!(!client.is_connecting());
        assert!(matches!(
            client.transact("010C").await,
            Err(ObdError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_timeout_drops_link() {
        let mock = MockTransport::new().with_latency(Duration::from_millis(200));
        let client = ObdClient::new(
            Arc::new(mock.clone()),
            Arc::new(MockDiscovery::default()),
            ClientConfig {
                command_timeout_ms: 50,
                initialize_adapter: false,
                ..Default::default()
            },
        );
        client.connect(&device()).await.unwrap();

        let result = client.transact("010C").await;
        assert!(matches!(result, Err(ObdError::Timeout(50))));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }
}
