//! Monitor status (Mode 01, PID 01) decoding.
//!
//! Reply layout after the `41 01` acknowledgement:
//! - byte A: bit 7 = MIL on, bits 0-6 = number of stored DTCs
//! - byte B, C: readiness bits, set = test not yet completed
//! - byte D: optional, not reported

use serde::Serialize;
use std::fmt;

use crate::error::DecodeError;

/// Acknowledgement prefix of a monitor status reply
const MONITOR_STATUS_ACK: &str = "4101";

/// Byte B readiness bits
const BYTE_B_TESTS: [(u8, &str); 7] = [
    (0, "Misfire"),
    (1, "Fuel system"),
    (2, "Components"),
    (4, "Catalyst"),
    (5, "Heated Catalyst"),
    (6, "Evaporative system"),
    (7, "Secondary Air System"),
];

/// Byte C readiness bits
const BYTE_C_TESTS: [(u8, &str); 3] = [(0, "O2 Sensor"), (1, "O2 Sensor Heater"), (2, "EGR System")];

/// Completion state of one emissions readiness test
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    pub name: &'static str,
    pub completed: bool,
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.completed {
            write!(f, "{} test completed", self.name)
        } else {
            write!(f, "{} test NOT completed", self.name)
        }
    }
}

/// Decoded monitor status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DtcSummary {
    /// Malfunction indicator lamp (check engine light)
    pub mil_on: bool,
    /// Number of stored trouble codes (0-127)
    pub stored_count: u8,
    /// Readiness tests in fixed order
    pub test_results: Vec<TestResult>,
}

impl DtcSummary {
    /// Tests that have not completed since codes were last cleared
    pub fn incomplete_tests(&self) -> impl Iterator<Item = &TestResult> {
        self.test_results.iter().filter(|t| !t.completed)
    }
}

impl fmt::Display for DtcSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "MIL (Check Engine Light): {}",
            if self.mil_on { "ON" } else { "OFF" }
        )?;
        writeln!(f, "Number of stored DTCs: {}", self.stored_count)?;
        writeln!(f, "Emission System Test Statuses:")?;
        for test in &self.test_results {
            writeln!(f, " - {}", test)?;
        }
        Ok(())
    }
}

/// Latest diagnostic result, as published to observers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DtcStatus {
    #[default]
    NotRequested,
    Ready(DtcSummary),
    /// The adapter answered with something that is not a monitor status reply
    Invalid { reply: String },
}

impl fmt::Display for DtcStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DtcStatus::NotRequested => f.write_str("No diagnostic data requested"),
            DtcStatus::Ready(summary) => fmt::Display::fmt(summary, f),
            DtcStatus::Invalid { .. } => f.write_str("Invalid OBD-II response"),
        }
    }
}

fn hex_byte(clean: &str, start: usize) -> Result<u8, DecodeError> {
    let digits = clean
        .get(start..start + 2)
        .ok_or_else(|| DecodeError::Malformed(format!("reply truncated at offset {}", start)))?;
    if !digits.bytes().all(|c| c.is_ascii_hexdigit()) {
        return Err(DecodeError::Malformed(format!("invalid hex byte {:?}", digits)));
    }
    u8::from_str_radix(digits, 16)
        .map_err(|_| DecodeError::Malformed(format!("invalid hex byte {:?}", digits)))
}

fn readiness<'a>(
    byte: u8,
    table: &'a [(u8, &'static str)],
) -> impl Iterator<Item = TestResult> + 'a {
    table.iter().map(move |&(bit, name)| TestResult {
        name,
        completed: (byte >> bit) & 1 == 0,
    })
}

/// Decode a `0101` reply into a [`DtcSummary`].
///
/// All whitespace is removed and the text upper-cased; the result must start
/// with `4101` and hold at least three status bytes.
pub fn decode_monitor_status(reply: &str) -> Result<DtcSummary, DecodeError> {
    let clean: String = reply
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();

    if !clean.starts_with(MONITOR_STATUS_ACK) || clean.len() < 10 {
        return Err(DecodeError::Malformed(format!(
            "not a monitor status reply: {:?}",
            reply
        )));
    }

    let byte_a = hex_byte(&clean, 4)?;
    let byte_b = hex_byte(&clean, 6)?;
    let byte_c = hex_byte(&clean, 8)?;
    // Byte D is not reported; a missing or garbled one is not an error
    let _byte_d = hex_byte(&clean, 10).unwrap_or(0);

    let test_results = readiness(byte_b, &BYTE_B_TESTS)
        .chain(readiness(byte_c, &BYTE_C_TESTS))
        .collect();

    Ok(DtcSummary {
        mil_on: byte_a & 0x80 != 0,
        stored_count: byte_a & 0x7F,
        test_results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn completed(summary: &DtcSummary, name: &str) -> bool {
        summary
            .test_results
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.completed)
            .unwrap()
    }

    #[test]
    fn test_decode_reference_reply() {
        let summary = decode_monitor_status("41 01 87 07 E1 00").unwrap();

        assert!(summary.mil_on);
        assert_eq!(summary.stored_count, 7);
        assert_eq!(summary.test_results.len(), 10);

        assert!(!completed(&summary, "Misfire"));
        assert!(!completed(&summary, "Fuel system"));
        assert!(!completed(&summary, "Components"));
        assert!(completed(&summary, "Catalyst"));
        assert!(completed(&summary, "Heated Catalyst"));
        assert!(completed(&summary, "Evaporative system"));
        assert!(completed(&summary, "Secondary Air System"));

        assert!(!completed(&summary, "O2 Sensor"));
        assert!(completed(&summary, "O2 Sensor Heater"));
        assert!(completed(&summary, "EGR System"));
    }

    #[test]
    fn test_order_is_fixed() {
        let summary = decode_monitor_status("4101000000").unwrap();
        let names: Vec<_> = summary.test_results.iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            [
                "Misfire",
                "Fuel system",
                "Components",
                "Catalyst",
                "Heated Catalyst",
                "Evaporative system",
                "Secondary Air System",
                "O2 Sensor",
                "O2 Sensor Heater",
                "EGR System",
            ]
        );
        assert!(summary.test_results.iter().all(|t| t.completed));
        assert!(!summary.mil_on);
        assert_eq!(summary.stored_count, 0);
    }

    #[test]
    fn test_lowercase_and_line_breaks() {
        let summary = decode_monitor_status("41 01 7f ff 07\r\n").unwrap();
        assert!(!summary.mil_on);
        assert_eq!(summary.stored_count, 127);
        assert_eq!(summary.incomplete_tests().count(), 10);
    }

    #[test]
    fn test_malformed_replies() {
        for reply in [
            "",
            "NO DATA",
            "41 0C 1A F8",
            "41 01 87 07",
            "4101870ZE1",
            "41 01 87 07 E",
            "41 01 +7 07 E1",
            "41 01 87 +7 E1",
        ] {
            assert!(
                matches!(decode_monitor_status(reply), Err(DecodeError::Malformed(_))),
                "{:?} should be malformed",
                reply
            );
        }
    }

    #[test]
    fn test_garbled_byte_d_is_ignored() {
        let clean = decode_monitor_status("41 01 87 07 E1").unwrap();
        assert_eq!(decode_monitor_status("41 01 87 07 E1 ZZ").unwrap(), clean);
        assert_eq!(decode_monitor_status("41 01 87 07 E1 0").unwrap(), clean);
    }

    #[test]
    fn test_render_summary() {
        let summary = decode_monitor_status("41 01 81 01 00").unwrap();
        let text = summary.to_string();
        assert!(text.starts_with("MIL (Check Engine Light): ON\n"));
        assert!(text.contains("Number of stored DTCs: 1\n"));
        assert!(text.contains(" - Misfire test NOT completed\n"));
        assert!(text.contains(" - EGR System test completed\n"));
    }

    #[test]
    fn test_invalid_status_renders_message() {
        let status = DtcStatus::Invalid {
            reply: "NO DATA".into(),
        };
        assert_eq!(status.to_string(), "Invalid OBD-II response");
    }

    proptest! {
        #[test]
        fn prop_status_byte_invariants(a in any::<u8>(), b in any::<u8>(), c in any::<u8>()) {
            let reply = format!("41 01 {:02X} {:02X} {:02X}", a, b, c);
            let summary = decode_monitor_status(&reply).unwrap();
            prop_assert_eq!(summary.stored_count, a & 0x7F);
            prop_assert_eq!(summary.mil_on, a & 0x80 != 0);
            prop_assert_eq!(decode_monitor_status(&reply).unwrap(), summary);
        }
    }
}
