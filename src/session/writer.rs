use log::{info, warn};

use crate::device::types::Command;
use crate::error::WriteError;
use crate::session::registry::SessionRegistry;
use crate::session::sink::MessageSink;
use crate::session::types::StatusEvent;

#[derive(Clone)]
pub struct CommandWriter {
    registry: SessionRegistry,
    sink: MessageSink,
}

impl CommandWriter {
    pub fn new(registry: SessionRegistry, sink: MessageSink) -> Self {
        CommandWriter { registry, sink }
    }

    /// Writes the command's byte to the current connection, blocking the caller for the write.
    /// On success the status is published to the front end and the relay before returning.
    pub fn send(&self, command: Command) -> Result<StatusEvent, WriteError> {
        let connection = self.registry.acquire().ok_or(WriteError::NotConnected)?;

        if let Err(err) = connection.write(&[command.wire_byte()]) {
            warn!("Error sending command {} on connection {}: {}", command, connection.id(), err);
            return Err(WriteError::IOError { source: err });
        }

        info!("Sent command {} on connection {}", command, connection.id());
        let event = StatusEvent::new(command);
        self.sink.status(event.clone());
        Ok(event)
    }
}
