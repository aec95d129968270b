//! An in-process peripheral. The radio hands out [`MemoryTransport`]s and keeps the matching
//! [`MemoryPeer`] so the other end of the link can be driven: push inbound bytes, inspect what
//! was written, force the channel closed.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use log::debug;
use uuid::Uuid;

use crate::device::transport::{Radio, Transport};
use crate::device::types::{MacAddress, PeripheralAddress};
use crate::error::ConnectionError;

#[derive(Default)]
struct Inbound {
    chunks: VecDeque<Vec<u8>>,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    inbound: Mutex<Inbound>,
    available: Condvar,
    written: Mutex<Vec<u8>>,
    writes: AtomicUsize,
    shutdowns: AtomicUsize,
    fail_writes: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct MemoryTransport {
    shared: Arc<Shared>,
}

/// The peripheral's end of a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryPeer {
    shared: Arc<Shared>,
}

pub fn memory_link() -> (MemoryTransport, MemoryPeer) {
    let shared = Arc::new(Shared::default());
    (MemoryTransport { shared: shared.clone() }, MemoryPeer { shared })
}

impl Transport for MemoryTransport {
    fn read(&self, buffer: &mut [u8]) -> io::Result<usize> {
        let mut inbound = lock(&self.shared.inbound);

        loop {
            if let Some(mut chunk) = inbound.chunks.pop_front() {
                let count = chunk.len().min(buffer.len());
                buffer[..count].copy_from_slice(&chunk[..count]);
                if count < chunk.len() {
                    inbound.chunks.push_front(chunk.split_off(count));
                }
                return Ok(count);
            }

            if inbound.closed {
                return Err(io::Error::new(io::ErrorKind::ConnectionAborted, "memory link closed"));
            }

            inbound = self.shared.available.wait(inbound).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        if lock(&self.shared.inbound).closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "memory link closed"));
        }
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "write failure injected by peer"));
        }

        lock(&self.shared.written).extend_from_slice(bytes);
        self.shared.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&self) -> io::Result<()> {
        self.shared.shutdowns.fetch_add(1, Ordering::SeqCst);
        lock(&self.shared.inbound).closed = true;
        self.shared.available.notify_all();
        Ok(())
    }
}

impl MemoryPeer {
    /// Queues bytes for the transport; each call is returned by exactly one read if it fits the
    /// reader's buffer.
    pub fn push(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        lock(&self.shared.inbound).chunks.push_back(bytes.to_vec());
        self.shared.available.notify_all();
    }

    /// Drops the link from the peripheral side, failing pending and future reads.
    pub fn close(&self) {
        lock(&self.shared.inbound).closed = true;
        self.shared.available.notify_all();
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn written(&self) -> Vec<u8> {
        lock(&self.shared.written).clone()
    }

    pub fn write_count(&self) -> usize {
        self.shared.writes.load(Ordering::SeqCst)
    }

    /// How often the transport side was shut down.
    pub fn shutdown_count(&self) -> usize {
        self.shared.shutdowns.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.inbound).closed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialBehaviour {
    Accept,
    Refuse,
    DenyPermission,
}

#[derive(Default)]
pub struct MemoryRadio {
    behaviours: Mutex<HashMap<MacAddress, DialBehaviour>>,
    peers: Mutex<Vec<MemoryPeer>>,
    dial_delay: Mutex<Option<Duration>>,
    discovery_cancels: AtomicUsize,
}

impl MemoryRadio {
    pub fn new() -> Self {
        MemoryRadio::default()
    }

    pub fn set_behaviour(&self, mac: MacAddress, behaviour: DialBehaviour) {
        lock(&self.behaviours).insert(mac, behaviour);
    }

    /// Makes every dial block for `delay` before it resolves.
    pub fn set_dial_delay(&self, delay: Duration) {
        *lock(&self.dial_delay) = Some(delay);
    }

    /// Peers of every link handed out so far, oldest first.
    pub fn peers(&self) -> Vec<MemoryPeer> {
        lock(&self.peers).clone()
    }

    pub fn last_peer(&self) -> Option<MemoryPeer> {
        lock(&self.peers).last().cloned()
    }

    pub fn discovery_cancels(&self) -> usize {
        self.discovery_cancels.load(Ordering::SeqCst)
    }
}

impl Radio for MemoryRadio {
    fn cancel_discovery(&self) {
        self.discovery_cancels.fetch_add(1, Ordering::SeqCst);
    }

    fn dial(&self, peripheral: &PeripheralAddress, service: Uuid) -> Result<Box<dyn Transport>, ConnectionError> {
        let delay = *lock(&self.dial_delay);
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let behaviour = lock(&self.behaviours).get(&peripheral.mac()).copied();
        debug!("Memory radio dialing {} (service {}): {:?}", peripheral, service, behaviour);

        match behaviour {
            Some(DialBehaviour::Accept) => {
                let (transport, peer) = memory_link();
                lock(&self.peers).push(peer);
                Ok(Box::new(transport))
            },
            Some(DialBehaviour::DenyPermission) => Err(ConnectionError::PermissionDenied {
                address: peripheral.mac().to_string(),
            }),
            Some(DialBehaviour::Refuse) | None => Err(ConnectionError::PeripheralUnreachable {
                address: peripheral.mac().to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "peripheral did not answer"),
            }),
        }
    }
}
