use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use log::{debug, info};

use crate::device::connection::Connection;
use crate::device::constants::READ_BUFFER_SIZE;
use crate::error::readable_thread_panic_error;
use crate::session::sink::MessageSink;
use crate::session::types::{InboundMessage, SessionEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderExit {
    pub connection_id: u64,
    pub messages: u64,
    pub reason: String,
}

pub struct ReaderHandle {
    connection_id: u64,
    handle: JoinHandle<ReaderExit>,
}

impl ReaderHandle {
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Blocks until the loop exits. Only returns once the connection was closed.
    pub fn join(self) -> Result<ReaderExit, String> {
        self.handle.join().map_err(|err| readable_thread_panic_error(&err))
    }
}

/// Starts the one reader of `connection` on its own thread.
pub fn spawn_reader(connection: Arc<Connection>, sink: MessageSink) -> io::Result<ReaderHandle> {
    let connection_id = connection.id();

    let handle = thread::Builder::new()
        .name(format!("reader-{}", connection_id))
        .spawn(move || read_loop(&connection, &sink))?;

    Ok(ReaderHandle { connection_id, handle })
}

fn read_loop(connection: &Connection, sink: &MessageSink) -> ReaderExit {
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    let mut sequence: u64 = 0;

    info!("Reading from connection {} to {}", connection.id(), connection.peripheral());

    let reason = 'mainloop: loop {
        match connection.read(&mut buffer) {
            Ok(count) => {
                let message = InboundMessage::decode(connection.id(), sequence, &buffer[..count]);
                debug!("Received {} bytes (#{}): {:?}", message.byte_len, sequence, message.text);
                sequence += 1;
                sink.inbound(message, || connection.is_connected());
            },
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                info!("Input stream of connection {} was disconnected: {}", connection.id(), err);
                break 'mainloop err.to_string();
            },
        }
    };

    // no reconnect; the user has to connect again
    connection.close();
    // the front end may not be draining events, so this one is dropped rather than waited for
    sink.emit(SessionEvent::ReaderStopped { connection_id: connection.id(), reason: reason.clone() });

    ReaderExit { connection_id: connection.id(), messages: sequence, reason }
}
