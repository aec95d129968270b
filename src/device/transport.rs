use std::io;
use uuid::Uuid;

use crate::device::types::PeripheralAddress;
use crate::error::ConnectionError;

/// The raw bidirectional byte channel to a peripheral.
///
/// Reads and writes go in opposite directions and may run concurrently from different threads.
/// Concurrent writes must not interleave.
pub trait Transport: Send + Sync {
    /// Blocks until at least one byte is available. End of stream is reported as an error, never
    /// as `Ok(0)`.
    fn read(&self, buffer: &mut [u8]) -> io::Result<usize>;

    fn write_all(&self, bytes: &[u8]) -> io::Result<()>;

    /// Releases the channel and unblocks a pending `read` with an error.
    fn shutdown(&self) -> io::Result<()>;
}

/// The platform radio that dials peripherals.
pub trait Radio: Send + Sync {
    /// Discovery and connect can not run at the same time on the radio.
    fn cancel_discovery(&self);

    fn dial(&self, peripheral: &PeripheralAddress, service: Uuid) -> Result<Box<dyn Transport>, ConnectionError>;
}
