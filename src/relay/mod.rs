//! Mirrors status labels and peripheral text to a remote endpoint. Publishing never reports back
//! to the caller: each entry is dispatched once by one of a fixed number of workers, and the
//! outcome is only logged.
//!
//! Status labels and peripheral text travel in separate lanes. Labels are never dropped and are
//! dispatched first; peripheral text waits for space in a bounded queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use futures::future::join_all;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{channel, unbounded_channel, Receiver, Sender, UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

pub mod http;

use crate::relay::http::{encode_body, Dispatch};

/** How long a publisher waiting for queue space sleeps before checking again. */
pub const BACKPRESSURE_POLL: u64 = 10; // ms

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOptions {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for RelayOptions {
    fn default() -> Self {
        RelayOptions { workers: 2, queue_capacity: 64 }
    }
}

struct Lanes {
    status: UnboundedReceiver<String>,
    data: Receiver<String>,
}

impl Lanes {
    /// Status labels first.
    async fn next(&mut self) -> Option<String> {
        let Lanes { status, data } = self;
        tokio::select! {
            biased;
            Some(text) = status.recv() => Some(text),
            Some(text) = data.recv() => Some(text),
            else => None,
        }
    }

    fn close_and_drain(&mut self) -> usize {
        self.status.close();
        self.data.close();

        let mut dropped = 0;
        while self.status.try_recv().is_ok() {
            dropped += 1;
        }
        while self.data.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

/// Cheap to clone; every clone feeds the same queues.
#[derive(Clone)]
pub struct StatusRelay {
    status: UnboundedSender<String>,
    data: Sender<String>,
    pending: Arc<AtomicUsize>,
}

impl StatusRelay {
    /// Queues a status label. Never blocks and never drops, unless the relay was shut down.
    pub fn publish(&self, text: impl Into<String>) {
        self.pending.fetch_add(1, Ordering::SeqCst);

        if let Err(err) = self.status.send(text.into()) {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("Status relay is stopped, dropping {:?}", err.0);
        }
    }

    /// Queues peripheral text, waiting for space while `keep_waiting` holds. Must not be called
    /// from within the async runtime. Returns whether the text was queued.
    pub fn publish_while(&self, text: impl Into<String>, keep_waiting: impl Fn() -> bool) -> bool {
        self.pending.fetch_add(1, Ordering::SeqCst);
        let mut text = text.into();

        loop {
            match self.data.try_send(text) {
                Ok(()) => return true,
                Err(TrySendError::Full(returned)) => {
                    if !keep_waiting() {
                        self.pending.fetch_sub(1, Ordering::SeqCst);
                        debug!("Gave up waiting for relay queue space, dropping {:?}", returned);
                        return false;
                    }
                    text = returned;
                    thread::sleep(Duration::from_millis(BACKPRESSURE_POLL));
                },
                Err(TrySendError::Closed(returned)) => {
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                    warn!("Status relay is stopped, dropping {:?}", returned);
                    return false;
                },
            }
        }
    }

    /// Entries queued or being dispatched.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

pub struct RelayHandle {
    relay: StatusRelay,
    lanes: Arc<Mutex<Lanes>>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl RelayHandle {
    /// Waits until every published entry was dispatched, or the deadline passes. Returns whether
    /// the queue drained.
    pub async fn flush(&self, deadline: Duration) -> bool {
        let deadline = Instant::now() + deadline;

        while self.relay.pending() > 0 {
            if Instant::now() >= deadline {
                warn!("Status relay still has {} entries pending", self.relay.pending());
                return false;
            }
            sleep(Duration::from_millis(10)).await;
        }
        true
    }

    /// Stops the workers. Requests in flight are abandoned and queued entries are discarded.
    pub async fn shutdown(self) {
        self.cancel.cancel();

        for result in join_all(self.workers).await {
            if let Err(err) = result {
                warn!("Status relay worker failed: {}", err);
            }
        }

        let dropped = self.lanes.lock().await.close_and_drain();
        if dropped > 0 {
            self.relay.pending.fetch_sub(dropped, Ordering::SeqCst);
            warn!("Status relay stopped with {} entries unsent", dropped);
        }
        info!("Status relay stopped");
    }
}

pub fn start_relay<D: Dispatch>(dispatch: D, options: RelayOptions, cancel: CancellationToken) -> (StatusRelay, RelayHandle) {
    let (status, status_receiver) = unbounded_channel::<String>();
    let (data, data_receiver) = channel::<String>(options.queue_capacity.max(1));
    let lanes = Arc::new(Mutex::new(Lanes { status: status_receiver, data: data_receiver }));
    let dispatch = Arc::new(dispatch);
    let pending = Arc::new(AtomicUsize::new(0));

    let workers = (0..options.workers.max(1))
        .map(|worker| spawn(relay_worker(
            worker,
            lanes.clone(),
            dispatch.clone(),
            pending.clone(),
            cancel.clone(),
        )))
        .collect();

    let relay = StatusRelay { status, data, pending };
    let handle = RelayHandle { relay: relay.clone(), lanes, cancel, workers };
    (relay, handle)
}

async fn relay_worker<D: Dispatch>(
    worker: usize,
    lanes: Arc<Mutex<Lanes>>,
    dispatch: Arc<D>,
    pending: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    'mainloop: loop {
        let text = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            text = async { lanes.lock().await.next().await } => match text {
                Some(text) => text,
                None => break 'mainloop,
            },
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                pending.fetch_sub(1, Ordering::SeqCst);
                break 'mainloop;
            },
            _ = relay_one(worker, dispatch.as_ref(), &text) => {
                pending.fetch_sub(1, Ordering::SeqCst);
            },
        }
    }
}

async fn relay_one<D: Dispatch>(worker: usize, dispatch: &D, text: &str) {
    let body = match encode_body(text) {
        Ok(body) => body,
        Err(err) => {
            warn!("Failed to encode status {:?}: {}", text, err);
            return;
        },
    };

    match dispatch.dispatch(body).await {
        Ok(()) => info!("Data sent to server successfully (worker {}): {:?}", worker, text),
        Err(err) => warn!("Failed to send data to server (worker {}): {}", worker, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use crate::error::RelayError;

    #[derive(Clone, Default)]
    struct Recorder {
        bodies: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl Dispatch for Recorder {
        async fn dispatch(&self, body: String) -> Result<(), RelayError> {
            self.bodies.lock().unwrap().push(body);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Dispatch for Failing {
        async fn dispatch(&self, _body: String) -> Result<(), RelayError> {
            Err(RelayError::Status { status: 500, body: "boom".to_string() })
        }
    }

    #[tokio::test]
    async fn every_publish_is_dispatched_once() {
        let recorder = Recorder::default();
        let (relay, handle) = start_relay(recorder.clone(), RelayOptions::default(), CancellationToken::new());

        relay.publish("ON");
        relay.publish("OFF");
        relay.publish("temp=25\n");
        assert!(handle.flush(Duration::from_secs(5)).await);

        let mut bodies = recorder.bodies.lock().unwrap().clone();
        bodies.sort();
        assert_eq!(bodies, vec![
            r#"{"data":"OFF"}"#.to_string(),
            r#"{"data":"ON"}"#.to_string(),
            r#"{"data":"temp=25\n"}"#.to_string(),
        ]);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let (relay, handle) = start_relay(Failing, RelayOptions::default(), CancellationToken::new());
        relay.publish("ON");
        assert!(handle.flush(Duration::from_secs(5)).await);
        assert_eq!(relay.pending(), 0);
        handle.shutdown().await;
    }

    struct Slow(Recorder);

    #[async_trait]
    impl Dispatch for Slow {
        async fn dispatch(&self, body: String) -> Result<(), RelayError> {
            sleep(Duration::from_millis(50)).await;
            self.0.dispatch(body).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn status_labels_survive_a_saturated_queue() {
        let recorder = Recorder::default();
        let options = RelayOptions { workers: 1, queue_capacity: 1 };
        let (relay, handle) = start_relay(Slow(recorder.clone()), options, CancellationToken::new());

        let publisher = relay.clone();
        let texts = tokio::task::spawn_blocking(move || {
            (0..4).filter(|index| publisher.publish_while(format!("t{}", index), || true)).count()
        });

        sleep(Duration::from_millis(20)).await;
        relay.publish("ON");
        assert_eq!(texts.await.unwrap(), 4);

        assert!(handle.flush(Duration::from_secs(5)).await);
        let bodies = recorder.bodies.lock().unwrap().clone();
        assert_eq!(bodies.len(), 5);
        assert_eq!(bodies.iter().filter(|body| body.as_str() == r#"{"data":"ON"}"#).count(), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn waiting_publisher_gives_up_when_told_to() {
        let recorder = Recorder::default();
        let (relay, handle) = start_relay(recorder, RelayOptions { workers: 1, queue_capacity: 1 }, CancellationToken::new());

        // the worker has not been polled yet on this single threaded runtime
        assert!(relay.publish_while("t0", || false));
        assert!(!relay.publish_while("t1", || false));
        assert_eq!(relay.pending(), 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_discards_queued_entries() {
        let recorder = Recorder::default();
        let (relay, handle) = start_relay(recorder.clone(), RelayOptions { workers: 1, queue_capacity: 4 }, CancellationToken::new());

        relay.publish("ON");
        relay.publish("OFF");
        assert!(relay.publish_while("t0", || false));
        assert_eq!(relay.pending(), 3);

        handle.shutdown().await;
        assert_eq!(relay.pending(), 0);

        relay.publish("ON");
        assert!(!relay.publish_while("t1", || true));
        assert_eq!(relay.pending(), 0);
        assert!(recorder.bodies.lock().unwrap().is_empty());
    }
}
