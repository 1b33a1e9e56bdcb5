//! OBD-II PID Definitions and Response Parsing
//!
//! Every supported PID is an entry in a static table carrying its byte count
//! and conversion formula. Decoding is the same for all of them: tokenize the
//! reply, find the service acknowledgement, check the PID echo, take the data
//! bytes and apply the entry's formula.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::DecodeError;
use crate::mode;

/// Offset added to the service byte in a positive response
pub const RESPONSE_SERVICE_OFFSET: u8 = 0x40;

/// Standard OBD-II PIDs for Mode 01 (current data)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Pid {
    /// Monitor status since DTCs cleared (0x01)
    MonitorStatus = 0x01,
    /// Fuel system status (0x03)
    FuelSystemStatus = 0x03,
    /// Calculated engine load (0x04)
    EngineLoad = 0x04,
    /// Engine coolant temperature (0x05)
    CoolantTemp = 0x05,
    /// Short-term fuel trim bank 1 (0x06)
    ShortFuelTrim = 0x06,
    /// Long-term fuel trim bank 1 (0x07)
    LongFuelTrim = 0x07,
    /// Intake manifold absolute pressure (0x0B)
    IntakeManifoldPressure = 0x0B,
    /// Engine RPM (0x0C)
    Rpm = 0x0C,
    /// Vehicle speed (0x0D)
    Speed = 0x0D,
    /// Timing advance (0x0E)
    TimingAdvance = 0x0E,
    /// Mass air flow rate (0x10)
    Maf = 0x10,
    /// Throttle position (0x11)
    ThrottlePosition = 0x11,
    /// Oxygen sensor bank 1, sensor 1 (0x14)
    O2Sensor = 0x14,
    /// Control module voltage (0x42)
    ModuleVoltage = 0x42,
    /// Commanded air-fuel equivalence ratio (0x44)
    AirFuelRatio = 0x44,
}

impl Pid {
    /// Get the PID hex value
    pub fn as_hex(&self) -> u8 {
        *self as u8
    }

    pub fn from_hex(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Pid::MonitorStatus),
            0x03 => Some(Pid::FuelSystemStatus),
            0x04 => Some(Pid::EngineLoad),
            0x05 => Some(Pid::CoolantTemp),
            0x06 => Some(Pid::ShortFuelTrim),
            0x07 => Some(Pid::LongFuelTrim),
            0x0B => Some(Pid::IntakeManifoldPressure),
            0x0C => Some(Pid::Rpm),
            0x0D => Some(Pid::Speed),
            0x0E => Some(Pid::TimingAdvance),
            0x10 => Some(Pid::Maf),
            0x11 => Some(Pid::ThrottlePosition),
            0x14 => Some(Pid::O2Sensor),
            0x42 => Some(Pid::ModuleVoltage),
            0x44 => Some(Pid::AirFuelRatio),
            _ => None,
        }
    }

    /// ASCII request for this PID in Mode 01, e.g. `010C`
    pub fn command(&self) -> String {
        format!("{:02X}{:02X}", mode::CURRENT_DATA, self.as_hex())
    }

    /// Registry entry, if this PID has a decoder
    pub fn spec(&self) -> Option<&'static PidSpec> {
        lookup(self.as_hex())
    }
}

/// A decoded physical value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhysicalValue {
    /// Single number with display precision
    Scalar {
        value: f64,
        unit: &'static str,
        precision: usize,
    },
    /// Raw byte pair (fuel system status)
    Pair { a: u8, b: u8 },
    /// Oxygen sensor voltage (V) and short-term trim (%)
    OxygenSensor { voltage: f64, trim: f64 },
}

impl PhysicalValue {
    fn scalar(value: f64, unit: &'static str, precision: usize) -> Self {
        PhysicalValue::Scalar {
            value,
            unit,
            precision,
        }
    }

    /// Numeric value for scalar readings
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PhysicalValue::Scalar { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            PhysicalValue::Scalar { unit, .. } => unit,
            PhysicalValue::Pair { .. } => "",
            PhysicalValue::OxygenSensor { .. } => "",
        }
    }
}

impl fmt::Display for PhysicalValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhysicalValue::Scalar {
                value, precision, ..
            } => write!(f, "{:.*}", precision, value),
            PhysicalValue::Pair { a, b } => write!(f, "{} {}", a, b),
            PhysicalValue::OxygenSensor { voltage, trim } => {
                write!(f, "{:.2}V {:.1}%", voltage, trim)
            }
        }
    }
}

/// Registry entry for one PID
pub struct PidSpec {
    pub pid: Pid,
    /// Metric name used in telemetry snapshots
    pub name: &'static str,
    pub description: &'static str,
    /// Number of data bytes after the PID echo
    pub byte_count: usize,
    formula: fn(&[u8]) -> PhysicalValue,
}

impl fmt::Debug for PidSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PidSpec")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("byte_count", &self.byte_count)
            .finish()
    }
}

impl PidSpec {
    /// Decode a reply to a request for this PID under `service`
    pub fn decode(&self, service: u8, reply: &str) -> Result<PhysicalValue, DecodeError> {
        let bytes = extract_data_bytes(reply, service, self.pid.as_hex(), self.byte_count)?;
        Ok((self.formula)(&bytes))
    }
}

fn word(bytes: &[u8]) -> f64 {
    bytes[0] as f64 * 256.0 + bytes[1] as f64
}

fn percent(byte: u8) -> f64 {
    byte as f64 * 100.0 / 255.0
}

fn fuel_trim(byte: u8) -> f64 {
    (byte as f64 - 128.0) * 100.0 / 128.0
}

/// Stoichiometric air-fuel ratio for gasoline
pub const STOICHIOMETRIC_AFR: f64 = 14.7;

static REGISTRY: [PidSpec; 14] = [
    PidSpec {
        pid: Pid::Rpm,
        name: "rpm",
        description: "Engine RPM",
        byte_count: 2,
        // whole revolutions; the quarter-rpm fraction is dropped, not rounded
        formula: |b| PhysicalValue::scalar((word(b) / 4.0).trunc(), "rpm", 0),
    },
    PidSpec {
        pid: Pid::Speed,
        name: "speed",
        description: "Vehicle speed",
        byte_count: 1,
        formula: |b| PhysicalValue::scalar(b[0] as f64, "km/h", 0),
    },
    PidSpec {
        pid: Pid::CoolantTemp,
        name: "coolant_temp",
        description: "Engine coolant temperature",
        byte_count: 1,
        formula: |b| PhysicalValue::scalar(b[0] as f64 - 40.0, "°C", 0),
    },
    PidSpec {
        pid: Pid::EngineLoad,
        name: "engine_load",
        description: "Calculated engine load",
        byte_count: 1,
        formula: |b| PhysicalValue::scalar(percent(b[0]), "%", 1),
    },
    PidSpec {
        pid: Pid::IntakeManifoldPressure,
        name: "map",
        description: "Intake manifold absolute pressure",
        byte_count: 1,
        formula: |b| PhysicalValue::scalar(b[0] as f64, "kPa", 0),
    },
    PidSpec {
        pid: Pid::ThrottlePosition,
        name: "throttle",
        description: "Throttle position",
        byte_count: 1,
        formula: |b| PhysicalValue::scalar(percent(b[0]), "%", 1),
    },
    PidSpec {
        pid: Pid::ModuleVoltage,
        name: "voltage",
        description: "Control module voltage",
        byte_count: 2,
        formula: |b| PhysicalValue::scalar(word(b) / 1000.0, "V", 2),
    },
    PidSpec {
        pid: Pid::TimingAdvance,
        name: "timing_advance",
        description: "Timing advance before TDC",
        byte_count: 1,
        formula: |b| PhysicalValue::scalar(b[0] as f64 / 2.0 - 64.0, "°", 1),
    },
    PidSpec {
        pid: Pid::Maf,
        name: "maf",
        description: "Mass air flow rate",
        byte_count: 2,
        formula: |b| PhysicalValue::scalar(word(b) / 100.0, "g/s", 2),
    },
    PidSpec {
        pid: Pid::AirFuelRatio,
        name: "afr",
        description: "Air-fuel ratio",
        byte_count: 2,
        formula: |b| {
            let lambda = word(b) / 32768.0;
            PhysicalValue::scalar(lambda * STOICHIOMETRIC_AFR, "ratio", 2)
        },
    },
    PidSpec {
        pid: Pid::FuelSystemStatus,
        name: "fuel_status",
        description: "Fuel system status",
        byte_count: 2,
        formula: |b| PhysicalValue::Pair { a: b[0], b: b[1] },
    },
    PidSpec {
        pid: Pid::O2Sensor,
        name: "o2_sensor",
        description: "Oxygen sensor voltage and trim",
        byte_count: 2,
        formula: |b| PhysicalValue::OxygenSensor {
            voltage: b[0] as f64 / 200.0,
            trim: percent(b[1]),
        },
    },
    PidSpec {
        pid: Pid::ShortFuelTrim,
        name: "short_fuel_trim",
        description: "Short-term fuel trim bank 1",
        byte_count: 1,
        formula: |b| PhysicalValue::scalar(fuel_trim(b[0]), "%", 1),
    },
    PidSpec {
        pid: Pid::LongFuelTrim,
        name: "long_fuel_trim",
        description: "Long-term fuel trim bank 1",
        byte_count: 1,
        formula: |b| PhysicalValue::scalar(fuel_trim(b[0]), "%", 1),
    },
];

/// All registered PID decoders
pub fn registry() -> &'static [PidSpec] {
    &REGISTRY
}

/// Find the decoder for a PID code
pub fn lookup(pid: u8) -> Option<&'static PidSpec> {
    REGISTRY.iter().find(|spec| spec.pid.as_hex() == pid)
}

/// Decode a reply to `service`/`pid` into a physical value
pub fn decode(service: u8, pid: u8, reply: &str) -> Result<PhysicalValue, DecodeError> {
    lookup(pid)
        .ok_or(DecodeError::UnknownPid(pid))?
        .decode(service, reply)
}

fn parse_hex_byte(token: &str) -> Option<u8> {
    if token.len() != 2 || !token.bytes().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(token, 16).ok()
}

/// Locate `<ack> <pid>` in the reply and return the `count` data bytes after it
pub fn extract_data_bytes(
    reply: &str,
    service: u8,
    pid: u8,
    count: usize,
) -> Result<Vec<u8>, DecodeError> {
    let ack = service.wrapping_add(RESPONSE_SERVICE_OFFSET);
    let tokens: Vec<&str> = reply.split_whitespace().collect();

    let index = tokens
        .iter()
        .position(|t| parse_hex_byte(t) == Some(ack))
        .ok_or_else(|| DecodeError::Malformed(format!("no {:02X} acknowledgement", ack)))?;

    match tokens.get(index + 1).and_then(|t| parse_hex_byte(t)) {
        Some(echo) if echo == pid => {}
        Some(echo) => {
            return Err(DecodeError::Malformed(format!(
                "expected PID {:02X}, got {:02X}",
                pid, echo
            )))
        }
        None => return Err(DecodeError::Malformed("missing PID echo".to_string())),
    }

    let data = &tokens[index + 2..];
    if data.len() < count {
        return Err(DecodeError::Malformed(format!(
            "PID {:02X}: need {} bytes, got {}",
            pid,
            count,
            data.len()
        )));
    }

    data[..count]
        .iter()
        .map(|t| {
            parse_hex_byte(t)
                .ok_or_else(|| DecodeError::Malformed(format!("invalid hex byte {:?}", t)))
        })
        .collect()
}
