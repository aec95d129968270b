use std::thread;
use std::time::Duration;
use log::{debug, warn};
use tokio::sync::mpsc::Sender;
use tokio::sync::mpsc::error::TrySendError;

use crate::relay::{StatusRelay, BACKPRESSURE_POLL};
use crate::session::types::{InboundMessage, SessionEvent, StatusEvent};

/// Fans messages out to the front end's event channel and to the status relay.
#[derive(Clone)]
pub struct MessageSink {
    events: Sender<SessionEvent>,
    relay: StatusRelay,
}

impl MessageSink {
    pub fn new(events: Sender<SessionEvent>, relay: StatusRelay) -> Self {
        MessageSink { events, relay }
    }

    /// Called from the reader thread. Waits while the front end or the relay falls behind, but
    /// only as long as `keep_waiting` holds; the message is dropped once it stops holding.
    pub fn inbound(&self, message: InboundMessage, keep_waiting: impl Fn() -> bool) {
        let text = message.text.clone();
        if self.emit_while(SessionEvent::Inbound(message), &keep_waiting) {
            self.relay.publish_while(text, &keep_waiting);
        }
    }

    /// Called on the writer's context, which may be the async runtime; never blocks. The relay
    /// always gets the label, even when the front end is behind.
    pub fn status(&self, event: StatusEvent) {
        let label = event.label;
        self.emit(SessionEvent::Status(event));
        self.relay.publish(label);
    }

    pub fn emit(&self, event: SessionEvent) {
        match self.events.try_send(event) {
            Ok(()) => {},
            Err(TrySendError::Full(event)) => warn!("Event channel is full, dropping {:?}", event),
            Err(TrySendError::Closed(event)) => debug!("Nobody is listening for {:?}", event),
        }
    }

    /// Waits for channel space while `keep_waiting` holds. Returns whether the event was sent.
    pub fn emit_while(&self, event: SessionEvent, keep_waiting: impl Fn() -> bool) -> bool {
        let mut event = event;

        loop {
            match self.events.try_send(event) {
                Ok(()) => return true,
                Err(TrySendError::Full(returned)) => {
                    if !keep_waiting() {
                        debug!("Gave up waiting for event channel space, dropping {:?}", returned);
                        return false;
                    }
                    event = returned;
                    thread::sleep(Duration::from_millis(BACKPRESSURE_POLL));
                },
                Err(TrySendError::Closed(returned)) => {
                    debug!("Nobody is listening for {:?}", returned);
                    return false;
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc::channel;
    use tokio_util::sync::CancellationToken;
    use crate::device::types::Command;
    use crate::error::RelayError;
    use crate::relay::{start_relay, RelayOptions};
    use crate::relay::http::Dispatch;

    struct Discard;

    #[async_trait::async_trait]
    impl Dispatch for Discard {
        async fn dispatch(&self, _body: String) -> Result<(), RelayError> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn waiting_on_a_full_channel_stops_when_released() {
        let (relay, handle) = start_relay(Discard, RelayOptions::default(), CancellationToken::new());
        let (events, mut receiver) = channel(1);
        let sink = MessageSink::new(events, relay);

        sink.status(StatusEvent::new(Command::On));

        let alive = Arc::new(AtomicBool::new(true));
        let waiting = alive.clone();
        let blocked = tokio::task::spawn_blocking(move || {
            sink.emit_while(SessionEvent::Status(StatusEvent::new(Command::Off)), || waiting.load(Ordering::SeqCst))
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished());
        alive.store(false, Ordering::SeqCst);
        assert!(!blocked.await.unwrap());

        assert!(matches!(receiver.recv().await, Some(SessionEvent::Status(_))));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn status_reaches_the_relay_when_the_channel_is_full() {
        let (relay, handle) = start_relay(Discard, RelayOptions::default(), CancellationToken::new());
        let (events, _receiver) = channel(1);
        let sink = MessageSink::new(events, relay.clone());

        sink.status(StatusEvent::new(Command::On));
        sink.status(StatusEvent::new(Command::Off));
        assert_eq!(relay.pending(), 2);

        assert!(handle.flush(Duration::from_secs(5)).await);
        handle.shutdown().await;
    }
}
