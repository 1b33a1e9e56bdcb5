//! Command/reply transactions over the adapter link.
//!
//! The ELM327 is line oriented: it acts on a command once it sees `\r` and
//! signals the end of its reply with a `>` prompt.

use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::ObdError;

/// Command terminator expected by the adapter
pub const COMMAND_TERMINATOR: u8 = b'\r';

/// Prompt printed by the adapter when it is ready for the next command
pub const PROMPT: u8 = b'>';

/// Read buffer size; any single-line reply fits
pub const READ_BUFFER_SIZE: usize = 1024;

/// Reply text with the prompt removed and carriage returns turned into line breaks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReply {
    text: String,
}

impl RawReply {
    /// Build a reply from raw adapter bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let text: String = String::from_utf8_lossy(bytes)
            .chars()
            .filter(|c| *c != PROMPT as char)
            .map(|c| if c == '\r' { '\n' } else { c })
            .collect();

        Self {
            text: text.trim().to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Whitespace-separated tokens
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.text.split_whitespace()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl From<&str> for RawReply {
    fn from(text: &str) -> Self {
        Self::from_bytes(text.as_bytes())
    }
}

impl fmt::Display for RawReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Send one command and read the adapter's reply.
///
/// Reading stops at the prompt, or when no further bytes arrive within
/// `timeout` after at least one byte was received. No bytes at all within
/// `timeout` is a [`ObdError::Timeout`]; end of stream is an [`ObdError::Io`].
/// The reply content is not interpreted.
pub async fn transact<S>(stream: &mut S, command: &str, timeout: Duration) -> Result<RawReply, ObdError>
where
    S: AsyncRead + AsyncWrite + Unpin + ?Sized,
{
    let mut frame = Vec::with_capacity(command.len() + 1);
    frame.extend_from_slice(command.as_bytes());
    frame.push(COMMAND_TERMINATOR);

    debug!("TX {:?}", command);
    stream.write_all(&frame).await?;
    stream.flush().await?;

    let mut buffer = [0u8; READ_BUFFER_SIZE];
    let mut response = Vec::new();

    loop {
        match tokio::time::timeout(timeout, stream.read(&mut buffer)).await {
            Err(_) if response.is_empty() => {
                return Err(ObdError::Timeout(timeout.as_millis() as u64));
            }
            Err(_) => break,
            Ok(Ok(0)) => return Err(ObdError::Io("link closed by adapter".to_string())),
            Ok(Ok(n)) => {
                response.extend_from_slice(&buffer[..n]);
                if buffer[..n].contains(&PROMPT) {
                    break;
                }
            }
            Ok(Err(e)) => return Err(e.into()),
        }
    }

    let reply = RawReply::from_bytes(&response);
    debug!("RX {:?}", reply.as_str());
    Ok(reply)
}
