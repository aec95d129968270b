use std::time::SystemTime;

use crate::device::types::{Command, PeripheralAddress};

/// One read worth of peripheral text. Reads are not framed, so a line may span several messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub connection_id: u64,
    pub sequence: u64,
    pub byte_len: usize,
    pub text: String,
}

impl InboundMessage {
    /// Invalid UTF-8 is replaced, never rejected.
    pub fn decode(connection_id: u64, sequence: u64, bytes: &[u8]) -> Self {
        InboundMessage {
            connection_id,
            sequence,
            byte_len: bytes.len(),
            text: String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}

/// Emitted after a command was written; the peripheral never acknowledges it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub label: &'static str,
    pub emitted_at: SystemTime,
}

impl StatusEvent {
    pub fn new(command: Command) -> Self {
        StatusEvent { label: command.label(), emitted_at: SystemTime::now() }
    }

    pub fn status_line(&self) -> String {
        format!("Status: Device is {}", self.label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Connected { connection_id: u64, peripheral: PeripheralAddress },
    Inbound(InboundMessage),
    Status(StatusEvent),
    ReaderStopped { connection_id: u64, reason: String },
}
