//! OBD-II Protocol Implementation
//!
//! Async communication with ELM327-compatible OBD-II adapters over any duplex
//! byte stream, usually a serial port or a bound RFCOMM device node.
//!
//! [`ObdClient`] drives the connection lifecycle and serializes transactions.
//! Replies are decoded through the PID registry ([`decode`]) and the monitor
//! status decoder ([`decode_monitor_status`]).

mod client;
mod diagnostics;
mod error;
pub mod mock;
mod pid;
mod protocol;
pub mod transaction;
pub mod transport;

pub use client::{ClientConfig, ConnectionState, FailureReason, ObdClient};
pub use diagnostics::{decode_monitor_status, DtcStatus, DtcSummary, TestResult};
pub use error::{DecodeError, ObdError, TransportError};
pub use pid::{decode, lookup, registry, PhysicalValue, Pid, PidSpec};
pub use protocol::ObdProtocol;
pub use transaction::{transact, RawReply};
pub use transport::{
    DeviceDescriptor, Discovery, SerialDiscovery, SerialTransport, Transport, DEFAULT_BAUD_RATE,
};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
}
