//! Link transport abstraction.
//!
//! The client only needs a duplex byte stream to the adapter. How that stream
//! is opened is behind [`Transport`]; how devices are found is behind
//! [`Discovery`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{SerialPortBuilderExt, SerialPortType};
use tracing::{debug, info};

use crate::error::TransportError;

/// Default ELM327 serial speed
pub const DEFAULT_BAUD_RATE: u32 = 38400;

/// A connected duplex byte stream to the adapter
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DuplexStream for T {}

/// Owned, type-erased adapter stream
pub type BoxedStream = Box<dyn DuplexStream>;

/// A device the client can connect to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Address or device path
    pub identifier: String,
    /// Human-readable name, when discovery provides one
    pub display_name: Option<String>,
}

impl DeviceDescriptor {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) => write!(f, "{} ({})", name, self.identifier),
            None => f.write_str(&self.identifier),
        }
    }
}

/// Opens links to adapters
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a duplex stream to the given device
    async fn open(&self, device: &DeviceDescriptor) -> Result<BoxedStream, TransportError>;
}

/// Lists devices that can be connected to
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Bonded or discoverable devices.
    ///
    /// Fails with `Unavailable` when the adapter is off or missing and with
    /// `PermissionDenied` when the host refuses access.
    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, TransportError>;
}

/// Serial-port transport (USB adapters, bound RFCOMM device nodes)
#[derive(Debug, Clone)]
pub struct SerialTransport {
    baud_rate: u32,
}

impl SerialTransport {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&self, device: &DeviceDescriptor) -> Result<BoxedStream, TransportError> {
        info!(
            "Opening serial link to {} at {} baud",
            device.identifier, self.baud_rate
        );
        let stream = tokio_serial::new(device.identifier.as_str(), self.baud_rate)
            .open_native_async()
            .map_err(map_serial_error)?;
        Ok(Box::new(stream))
    }
}

/// Discovery over the host's serial ports
#[derive(Debug, Clone, Default)]
pub struct SerialDiscovery;

#[async_trait]
impl Discovery for SerialDiscovery {
    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
        let ports = tokio_serial::available_ports().map_err(map_serial_error)?;
        debug!("Found {} serial ports", ports.len());

        Ok(ports
            .into_iter()
            .map(|port| {
                let display_name = match port.port_type {
                    SerialPortType::UsbPort(usb) => usb.product,
                    SerialPortType::BluetoothPort => Some("Bluetooth serial".to_string()),
                    _ => None,
                };
                DeviceDescriptor {
                    identifier: port.port_name,
                    display_name,
                }
            })
            .collect())
    }
}

fn map_serial_error(err: tokio_serial::Error) -> TransportError {
    match err.kind {
        tokio_serial::ErrorKind::NoDevice => TransportError::Unavailable(err.description),
        tokio_serial::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            TransportError::PermissionDenied(err.description)
        }
        _ => TransportError::Open(err.description),
    }
}
