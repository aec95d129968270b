//! The session owns the link to one peripheral: it connects, keeps the current connection in a
//! registry shared by every front end surface, runs the reader loop, and writes commands.
//!
//! Front ends get a [`Session`] (cheap to clone) and the receiving end of its event channel.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use log::{info, warn};
use tokio::sync::mpsc::{channel, Receiver};
use tokio::task::spawn_blocking;
use uuid::Uuid;

pub mod reader;
pub mod registry;
pub mod sink;
pub mod types;
pub mod writer;

use crate::device::connection::{Connection, Connector};
use crate::device::transport::Radio;
use crate::device::types::{Command, ConnectionState, PeripheralAddress};
use crate::error::{ConnectionError, WriteError};
use crate::relay::StatusRelay;
use crate::session::reader::{spawn_reader, ReaderExit, ReaderHandle};
use crate::session::registry::SessionRegistry;
use crate::session::sink::MessageSink;
use crate::session::types::{SessionEvent, StatusEvent};
use crate::session::writer::CommandWriter;

#[derive(Clone)]
pub struct Session {
    registry: SessionRegistry,
    connector: Arc<Connector>,
    sink: MessageSink,
    writer: CommandWriter,
    readers: Arc<Mutex<Vec<ReaderHandle>>>,
}

impl Session {
    pub fn new(radio: Arc<dyn Radio>, relay: StatusRelay, event_capacity: usize) -> (Session, Receiver<SessionEvent>) {
        let (events, receiver) = channel::<SessionEvent>(event_capacity.max(1));
        let registry = SessionRegistry::new();
        let sink = MessageSink::new(events, relay);

        let session = Session {
            writer: CommandWriter::new(registry.clone(), sink.clone()),
            registry,
            connector: Arc::new(Connector::new(radio)),
            sink,
            readers: Arc::new(Mutex::new(Vec::new())),
        };
        (session, receiver)
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn state(&self) -> ConnectionState {
        match self.connector.state() {
            ConnectionState::Connecting => ConnectionState::Connecting,
            _ => self.registry.get()
                .map(|connection| connection.state())
                .unwrap_or(ConnectionState::Disconnected),
        }
    }

    /// Dials the peripheral, starts its reader loop and installs the new connection (closing the
    /// previous one). On failure the current connection is left alone.
    pub async fn connect(&self, peripheral: &PeripheralAddress, service: Uuid, timeout: Duration) -> Result<Arc<Connection>, ConnectionError> {
        let connection = self.connector.connect(peripheral, service, timeout).await?;
        self.install(connection, spawn_reader)
    }

    fn install<S>(&self, connection: Arc<Connection>, spawn: S) -> Result<Arc<Connection>, ConnectionError>
    where
        S: FnOnce(Arc<Connection>, MessageSink) -> io::Result<ReaderHandle>,
    {
        let reader = match spawn(connection.clone(), self.sink.clone()) {
            Ok(reader) => reader,
            Err(err) => {
                warn!("Failed to start reader for connection {}: {}", connection.id(), err);
                connection.close();
                return Err(ConnectionError::PeripheralUnreachable {
                    address: connection.peripheral().mac().to_string(),
                    source: io::Error::new(err.kind(), format!("failed to start reader: {}", err)),
                });
            },
        };

        self.registry.set(connection.clone());

        {
            let mut readers = self.readers.lock().unwrap_or_else(PoisonError::into_inner);
            readers.retain(|reader| !reader.is_finished());
            readers.push(reader);
        }

        self.sink.emit(SessionEvent::Connected {
            connection_id: connection.id(),
            peripheral: connection.peripheral().clone(),
        });
        Ok(connection)
    }

    pub fn send(&self, command: Command) -> Result<StatusEvent, WriteError> {
        self.writer.send(command)
    }

    /// Closes the current connection and waits for every reader loop to exit.
    pub async fn disconnect(&self) -> Vec<ReaderExit> {
        if let Some(connection) = self.registry.clear() {
            info!("Disconnected from {}", connection.peripheral());
        }

        let readers: Vec<ReaderHandle> = self.readers.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        let joined = spawn_blocking(move || {
            readers.into_iter()
                .filter_map(|reader| {
                    let connection_id = reader.connection_id();
                    match reader.join() {
                        Ok(exit) => Some(exit),
                        Err(err) => {
                            warn!("Reader of connection {} failed: {}", connection_id, err);
                            None
                        },
                    }
                })
                .collect::<Vec<_>>()
        }).await;

        match joined {
            Ok(exits) => exits,
            Err(err) => {
                warn!("Failed to join reader loops: {}", err);
                Vec::new()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;
    use crate::device::memory::{memory_link, DialBehaviour, MemoryRadio};
    use crate::error::RelayError;
    use crate::relay::{start_relay, RelayOptions};
    use crate::relay::http::Dispatch;

    struct Discard;

    #[async_trait]
    impl Dispatch for Discard {
        async fn dispatch(&self, _body: String) -> Result<(), RelayError> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reader_start_failure_keeps_the_current_connection() {
        let hc05 = PeripheralAddress::parse("AA:BB:CC:11:22:33", "HC-05").unwrap();
        let radio = Arc::new(MemoryRadio::new());
        radio.set_behaviour(hc05.mac(), DialBehaviour::Accept);

        let (relay, relay_handle) = start_relay(Discard, RelayOptions::default(), CancellationToken::new());
        let (session, _events) = Session::new(radio, relay, 8);
        let current = session.connect(&hc05, Uuid::nil(), Duration::from_secs(2)).await.unwrap();

        let (transport, peer) = memory_link();
        let replacement = Arc::new(Connection::new(hc05.clone(), Box::new(transport)));
        let result = session.install(replacement.clone(), |_, _| {
            Err(io::Error::new(io::ErrorKind::WouldBlock, "no threads left"))
        });

        assert!(matches!(result, Err(ConnectionError::PeripheralUnreachable { .. })));
        assert!(current.is_connected());
        assert_eq!(session.registry().acquire().unwrap().id(), current.id());
        assert_eq!(replacement.state(), ConnectionState::Closed);
        assert_eq!(peer.shutdown_count(), 1);

        session.disconnect().await;
        relay_handle.shutdown().await;
    }
}
