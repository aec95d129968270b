use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use log::{info, warn};
use tokio::spawn;
use tokio::task::spawn_blocking;
use tokio::time::sleep;
use uuid::Uuid;

use crate::device::transport::{Radio, Transport};
use crate::device::types::{ConnectionState, PeripheralAddress};
use crate::error::ConnectionError;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One established link to a peripheral. Created `Connected`, ends `Closed`, never reopened.
pub struct Connection {
    id: u64,
    peripheral: PeripheralAddress,
    started_at: SystemTime,
    state: Mutex<ConnectionState>,
    transport: Box<dyn Transport>,
}

impl Connection {
    pub fn new(peripheral: PeripheralAddress, transport: Box<dyn Transport>) -> Self {
        Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::SeqCst),
            peripheral,
            started_at: SystemTime::now(),
            state: Mutex::new(ConnectionState::Connected),
            transport,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peripheral(&self) -> &PeripheralAddress {
        &self.peripheral
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Blocks until at least one byte arrives. Fails once the connection is closed.
    pub fn read(&self, buffer: &mut [u8]) -> io::Result<usize> {
        if !self.is_connected() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "connection is closed"));
        }

        match self.transport.read(buffer)? {
            0 => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peripheral closed the channel")),
            count => Ok(count),
        }
    }

    /// Blocking whole-buffer write. A failed write leaves the connection open.
    pub fn write(&self, bytes: &[u8]) -> io::Result<()> {
        if !self.is_connected() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "connection is closed"));
        }

        self.transport.write_all(bytes)
    }

    /// Returns true if this call closed the connection, false if it was already closed.
    pub fn close(&self) -> bool {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == ConnectionState::Closed {
                return false;
            }
            *state = ConnectionState::Closed;
        }

        info!("Closing connection {} to {}", self.id, self.peripheral);
        if let Err(err) = self.transport.shutdown() {
            warn!("Could not close the connection {} cleanly: {}", self.id, err);
        }
        true
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peripheral", &self.peripheral)
            .field("started_at", &humantime::format_rfc3339(self.started_at).to_string())
            .field("state", &self.state())
            .finish()
    }
}

// resets the in-progress flag however connect() returns
struct InProgress(Arc<AtomicBool>);

impl Drop for InProgress {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Dials peripherals, one attempt at a time.
pub struct Connector {
    radio: Arc<dyn Radio>,
    in_progress: Arc<AtomicBool>,
}

impl Connector {
    pub fn new(radio: Arc<dyn Radio>) -> Self {
        Connector { radio, in_progress: Arc::new(AtomicBool::new(false)) }
    }

    /// `Connecting` while an attempt is running, `Disconnected` otherwise.
    pub fn state(&self) -> ConnectionState {
        if self.in_progress.load(Ordering::SeqCst) {
            ConnectionState::Connecting
        } else {
            ConnectionState::Disconnected
        }
    }

    pub async fn connect(&self, peripheral: &PeripheralAddress, service: Uuid, timeout: Duration) -> Result<Arc<Connection>, ConnectionError> {
        if self.in_progress.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Err(ConnectionError::AlreadyInProgress);
        }
        let in_progress = InProgress(self.in_progress.clone());

        let radio = self.radio.clone();
        let target = peripheral.clone();

        let mut dial = spawn_blocking(move || {
            radio.cancel_discovery();
            info!("Connecting to {}...", target);
            radio.dial(&target, service)
        });

        tokio::select! {
            _ = sleep(timeout) => {
                warn!("Connecting to {} took too long", peripheral);
                let target = peripheral.clone();

                // the dial can not be interrupted; the radio stays busy until it resolves, and
                // whatever it produces is closed
                spawn(async move {
                    let _in_progress = in_progress;
                    if let Ok(Ok(transport)) = dial.await {
                        warn!("Connection to {} was established after the deadline, closing it", target);
                        if let Err(err) = transport.shutdown() {
                            warn!("Could not close late connection to {}: {}", target, err);
                        }
                    }
                });
                Err(ConnectionError::Timeout { after: timeout })
            }
            result = &mut dial => match result {
                Ok(Ok(transport)) => {
                    let connection = Arc::new(Connection::new(peripheral.clone(), transport));
                    info!("Connected to {} (connection {})", peripheral, connection.id());
                    Ok(connection)
                },
                Ok(Err(err)) => {
                    warn!("Connecting to {} failed: {}", peripheral, err);
                    Err(err)
                },
                Err(err) => Err(ConnectionError::PeripheralUnreachable {
                    address: peripheral.mac().to_string(),
                    source: io::Error::new(io::ErrorKind::Other, format!("dial task failed: {}", err)),
                }),
            }
        }
    }
}
