//! Cross-thread delivery of processor output
//!
//! Every subscriber gets its own flume channel. Emitting never blocks: a full
//! bounded subscriber loses the delivery (counted), a disconnected one is
//! pruned. Subscribers pull on their own thread, e.g. from a UI event loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use super::processor::{ProcessingError, WorkItem};
use crate::capture::frame::WorkResult;

/// Broadcast channel with per-subscriber queues
pub struct Channel<T> {
    name: &'static str,
    /// `0` means unbounded
    capacity: usize,
    subscribers: Mutex<Vec<Sender<T>>>,
    dropped: AtomicU64,
}

impl<T: Clone> Channel<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            subscribers: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = match self.capacity {
            0 => flume::unbounded(),
            n => flume::bounded(n),
        };
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.push(tx);
        debug!(channel = self.name, subscribers = subscribers.len(), "New subscriber");
        Subscription { rx }
    }

    pub fn has_subscribers(&self) -> bool {
        !self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Deliver `value` to every live subscriber; returns how many got it.
    pub fn emit(&self, value: T) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut delivered = 0;

        subscribers.retain(|tx| match tx.try_send(value.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(channel = self.name, "Subscriber full, delivery dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!(channel = self.name, "Subscriber gone");
                false
            }
        });

        delivered
    }

    /// Deliveries lost to full subscribers
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Receiving end of a [`Channel`]
#[derive(Debug)]
pub struct Subscription<T> {
    rx: Receiver<T>,
}

impl<T> Subscription<T> {
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Block until a value arrives or the channel closes.
    pub fn recv(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub async fn recv_async(&self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    /// Everything currently queued, without blocking
    pub fn drain(&self) -> Vec<T> {
        self.rx.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// True once the processor is gone and the queue is empty
    pub fn is_closed(&self) -> bool {
        self.rx.is_disconnected() && self.rx.is_empty()
    }
}

/// The processor's output channels
pub struct SignalBus {
    pub results: Channel<WorkResult>,
    pub passthrough: Channel<WorkItem>,
    pub errors: Channel<ProcessingError>,
}

impl SignalBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            results: Channel::new("results", capacity),
            passthrough: Channel::new("passthrough", capacity),
            // Errors are never dropped
            errors: Channel::new("errors", 0),
        }
    }

    pub fn dropped_deliveries(&self) -> u64 {
        self.results.dropped() + self.passthrough.dropped()
    }
}
