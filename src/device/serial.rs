use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use log::{debug, info};
use serialport::{DataBits, Parity, SerialPort, StopBits};
use uuid::Uuid;

use crate::device::constants::SERIAL_POLL_TIMEOUT;
use crate::device::transport::{Radio, Transport};
use crate::device::types::{MacAddress, PeripheralAddress};
use crate::error::ConnectionError;

/// Where the RFCOMM link of a paired peripheral shows up on this machine, for example
/// `/dev/rfcomm0` after `rfcomm bind`, or `COM5` on Windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialBinding {
    pub path: String,
    pub baud_rate: u32,
}

/// Dials peripherals through the serial device the operating system binds to their RFCOMM
/// channel.
pub struct SerialRadio {
    bindings: HashMap<MacAddress, SerialBinding>,
}

impl SerialRadio {
    pub fn new(bindings: HashMap<MacAddress, SerialBinding>) -> Self {
        SerialRadio { bindings }
    }
}

fn map_open_error(peripheral: &PeripheralAddress, err: serialport::Error) -> ConnectionError {
    match err.kind() {
        serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) => ConnectionError::PermissionDenied {
            address: peripheral.mac().to_string(),
        },
        _ => ConnectionError::PeripheralUnreachable {
            address: peripheral.mac().to_string(),
            source: io::Error::from(err),
        },
    }
}

impl Radio for SerialRadio {
    fn cancel_discovery(&self) {
        // the operating system owns inquiry for bound rfcomm devices, nothing is running here
        debug!("No discovery to cancel for serial radio");
    }

    fn dial(&self, peripheral: &PeripheralAddress, service: Uuid) -> Result<Box<dyn Transport>, ConnectionError> {
        let binding = self.bindings.get(&peripheral.mac()).ok_or_else(|| ConnectionError::PeripheralUnreachable {
            address: peripheral.mac().to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no serial device bound to this address"),
        })?;

        info!("Opening {} at {} baud for {} (service {})", binding.path, binding.baud_rate, peripheral, service);

        let reader = serialport::new(&binding.path, binding.baud_rate)
            .timeout(Duration::from_millis(SERIAL_POLL_TIMEOUT))
            .data_bits(DataBits::Eight)
            .stop_bits(StopBits::One)
            .parity(Parity::None)
            .open()
            .map_err(|err| map_open_error(peripheral, err))?;

        let writer = reader.try_clone().map_err(|err| map_open_error(peripheral, err))?;

        Ok(Box::new(SerialTransport {
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
        }))
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "serial port closed")
}

pub struct SerialTransport {
    reader: Mutex<Option<Box<dyn SerialPort>>>,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
    closed: AtomicBool,
}

impl Transport for SerialTransport {
    fn read(&self, buffer: &mut [u8]) -> io::Result<usize> {
        // The port is opened with a short timeout so that a closed transport is noticed without
        // any bytes arriving.
        loop {
            let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);

            if self.closed.load(Ordering::SeqCst) {
                reader.take();
                return Err(closed_error());
            }

            let port = reader.as_mut().ok_or_else(closed_error)?;
            match port.read(buffer) {
                Ok(0) => return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "serial port returned end of stream")),
                Ok(count) => return Ok(count),
                Err(err) if matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let port = writer.as_mut().ok_or_else(closed_error)?;
        port.write_all(bytes)?;
        port.flush()
    }

    fn shutdown(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.writer.lock().unwrap_or_else(PoisonError::into_inner).take();

        // a blocked reader holds its lock and drops its port on the next wake up
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialing_an_unbound_address_is_unreachable() {
        let radio = SerialRadio::new(HashMap::new());
        let peripheral = PeripheralAddress::parse("AA:BB:CC:11:22:33", "HC-05").unwrap();

        match radio.dial(&peripheral, Uuid::nil()) {
            Err(ConnectionError::PeripheralUnreachable { address, source }) => {
                assert_eq!(address, "AA:BB:CC:11:22:33");
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            },
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("dial should fail"),
        }
    }

    #[test]
    fn dialing_a_missing_device_is_unreachable() {
        let mut bindings = HashMap::new();
        let peripheral = PeripheralAddress::parse("AA:BB:CC:11:22:33", "HC-05").unwrap();
        bindings.insert(peripheral.mac(), SerialBinding {
            path: "/dev/btcontrol-test-does-not-exist".to_string(),
            baud_rate: 9600,
        });
        let radio = SerialRadio::new(bindings);

        assert!(matches!(
            radio.dial(&peripheral, Uuid::nil()),
            Err(ConnectionError::PeripheralUnreachable { .. }),
        ));
    }
}
