//! Mock ELM327 adapter for testing (no hardware required)
//!
//! Each opened link is an in-memory duplex pipe served by a background task
//! that reads `\r`-terminated commands and answers from a reply table.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tracing::debug;

use crate::error::TransportError;
use crate::transport::{BoxedStream, DeviceDescriptor, Discovery, Transport};

/// Replies for every command the telemetry poller and DTC summary issue
fn default_replies() -> HashMap<String, String> {
    [
        ("ATZ", "ELM327 v1.5"),
        ("010C", "41 0C 1A F8"),
        ("010D", "41 0D 50"),
        ("0105", "41 05 7B"),
        ("0104", "41 04 80"),
        ("010B", "41 0B 65"),
        ("0111", "41 11 33"),
        ("0142", "41 42 36 B0"),
        ("010E", "41 0E 90"),
        ("0110", "41 10 01 F4"),
        ("0144", "41 44 80 00"),
        ("0103", "41 03 02 00"),
        ("0114", "41 14 5A 80"),
        ("0106", "41 06 80"),
        ("0107", "41 07 90"),
        ("0101", "41 01 87 07 E1 00"),
    ]
    .into_iter()
    .map(|(cmd, reply)| (cmd.to_string(), reply.to_string()))
    .collect()
}

#[derive(Default)]
struct MockState {
    replies: HashMap<String, String>,
    /// Commands received, in arrival order, across all links
    commands: Vec<String>,
    open_error: Option<TransportError>,
}

/// In-process ELM327 emulator implementing [`Transport`]
#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    latency: Duration,
    opened: Arc<AtomicUsize>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                replies: default_replies(),
                ..Default::default()
            })),
            latency: Duration::ZERO,
            opened: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Delay every reply by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Set the reply for a command
    pub fn set_reply(&self, command: &str, reply: &str) {
        if let Ok(mut state) = self.state.lock() {
            state
                .replies
                .insert(command.to_uppercase(), reply.to_string());
        }
    }

    /// Make the next `open` fail with `error`
    pub fn fail_next_open(&self, error: TransportError) {
        if let Ok(mut state) = self.state.lock() {
            state.open_error = Some(error);
        }
    }

    /// Commands received so far
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.commands.clone())
            .unwrap_or_default()
    }

    /// Number of links successfully opened
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn respond(&self, command: &str) -> String {
        let Ok(mut state) = self.state.lock() else {
            return "?".to_string();
        };
        state.commands.push(command.to_string());

        match state.replies.get(command) {
            Some(reply) => reply.clone(),
            None if command.starts_with("AT") => "OK".to_string(),
            None => "NO DATA".to_string(),
        }
    }

    async fn serve(self, mut adapter: DuplexStream) {
        let mut byte = [0u8; 1];
        let mut line = Vec::new();

        loop {
            match adapter.read(&mut byte).await {
                Ok(0) | Err(_) => break,
                Ok(_) if byte[0] == b'\r' => {
                    let command = String::from_utf8_lossy(&line).trim().to_uppercase();
                    line.clear();
                    if command.is_empty() {
                        continue;
                    }

                    let reply = self.respond(&command);
                    debug!("Mock adapter: {} -> {}", command, reply);
                    if !self.latency.is_zero() {
                        tokio::time::sleep(self.latency).await;
                    }
                    let frame = format!("{}\r\r>", reply);
                    if adapter.write_all(frame.as_bytes()).await.is_err() {
                        break;
                    }
                }
                Ok(_) if byte[0] == b'\n' => {}
                Ok(_) => line.push(byte[0]),
            }
        }
        debug!("Mock adapter link closed");
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, device: &DeviceDescriptor) -> Result<BoxedStream, TransportError> {
        let scripted = self.state.lock().ok().and_then(|mut s| s.open_error.take());
        if let Some(error) = scripted {
            return Err(error);
        }

        debug!("Mock adapter: opening link to {}", device);
        let (client, adapter) = tokio::io::duplex(4096);
        tokio::spawn(self.clone().serve(adapter));
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(client))
    }
}

/// Discovery returning a fixed result
#[derive(Debug, Clone)]
pub struct MockDiscovery {
    result: Result<Vec<DeviceDescriptor>, TransportError>,
}

impl MockDiscovery {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self {
            result: Ok(devices),
        }
    }

    pub fn failing(error: TransportError) -> Self {
        Self { result: Err(error) }
    }
}

impl Default for MockDiscovery {
    fn default() -> Self {
        Self::new(vec![DeviceDescriptor::new("mock").with_name("Mock ELM327")])
    }
}

#[async_trait]
impl Discovery for MockDiscovery {
    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        self.result.clone()
    }
}
