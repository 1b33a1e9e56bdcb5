//! ELM327 protocol selection and adapter setup

use serde::{Deserialize, Serialize};

/// Reset, echo off, linefeeds off
const SETUP_COMMANDS: [&str; 3] = ["ATZ", "ATE0", "ATL0"];

/// Vehicle bus protocol the adapter is told to use (`ATSP<n>`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObdProtocol {
    /// Let the adapter probe the bus
    #[default]
    Auto,
    J1850Pwm,
    J1850Vpw,
    Iso9141,
    KwpSlowInit,
    KwpFastInit,
    Can11Bit500k,
    Can29Bit500k,
    Can11Bit250k,
    Can29Bit250k,
}

impl ObdProtocol {
    /// Protocol number in the ELM327 `ATSP` table
    pub fn number(&self) -> u8 {
        match self {
            ObdProtocol::Auto => 0,
            ObdProtocol::J1850Pwm => 1,
            ObdProtocol::J1850Vpw => 2,
            ObdProtocol::Iso9141 => 3,
            ObdProtocol::KwpSlowInit => 4,
            ObdProtocol::KwpFastInit => 5,
            ObdProtocol::Can11Bit500k => 6,
            ObdProtocol::Can29Bit500k => 7,
            ObdProtocol::Can11Bit250k => 8,
            ObdProtocol::Can29Bit250k => 9,
        }
    }

    pub fn to_elm_command(&self) -> String {
        format!("ATSP{}", self.number())
    }

    /// Commands sent once after the link opens, in order
    pub fn init_sequence(&self) -> Vec<String> {
        SETUP_COMMANDS
            .iter()
            .map(|cmd| cmd.to_string())
            .chain(std::iter::once(self.to_elm_command()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_auto() {
        assert_eq!(ObdProtocol::default(), ObdProtocol::Auto);
        assert_eq!(ObdProtocol::Auto.to_elm_command(), "ATSP0");
    }

    #[test]
    fn test_init_sequence_ends_with_protocol() {
        let seq = ObdProtocol::Can11Bit500k.init_sequence();
        assert_eq!(seq, ["ATZ", "ATE0", "ATL0", "ATSP6"]);
    }

    #[test]
    fn test_config_names() {
        let protocol: ObdProtocol = serde_json::from_str("\"can29_bit250k\"").unwrap();
        assert_eq!(protocol.number(), 9);
    }
}
