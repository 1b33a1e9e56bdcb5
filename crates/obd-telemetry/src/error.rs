//! Poller errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollerError {
    #[error("Invalid poller configuration: {0}")]
    InvalidConfig(String),
}
