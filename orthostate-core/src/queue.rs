//!
//! The FIFO Event Queue
//!
//! The event queue is the only thread-safe entry point into the state
//! machine.  Any thread holding an [`EventQueue`] may enqueue events while
//! exactly one [`EventReceiver`] (owned by the scheduler) dequeues them.
//!
//! Every successful enqueue is assigned a sequence number.  The sequence
//! number is assigned and the event is pushed into the underlying crossbeam
//! channel while holding the same lock, so the order in which the consumer
//! receives events is always the order of their sequence numbers.
//!
//! Note: the queue is unbounded.  There is no priority and no backpressure,
//! so a producer that outpaces the scheduler grows the queue without limit.
//!

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::warn;

use crate::event::Event;

/// An event together with the sequence number it was assigned at enqueue time
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// The monotonically increasing enqueue sequence number
    pub sequence: u64,
    /// The enqueued event
    pub event: Event,
}

/// State shared between the producers and the consumer
struct Shared {
    /// The next sequence number to hand out
    next_sequence: Mutex<u64>,
    /// Whether the queue has stopped accepting events
    stopped: AtomicBool,
    /// The number of events dropped because the queue was stopped
    dropped: AtomicU64,
}

/// Create a new event queue whose first event receives sequence number 0
pub fn event_queue() -> (EventQueue, EventReceiver) {
    event_queue_starting_at(0)
}

/// Create a new event queue whose first event receives the given sequence number
pub fn event_queue_starting_at(first_sequence: u64) -> (EventQueue, EventReceiver) {
    let (tx, rx) = channel::unbounded();
    let shared = Arc::new(Shared {
        next_sequence: Mutex::new(first_sequence),
        stopped: AtomicBool::new(false),
        dropped: AtomicU64::new(0),
    });

    (
        EventQueue {
            tx,
            shared: shared.clone(),
        },
        EventReceiver { rx, shared },
    )
}

/// The producing half of the event queue.
///
/// Cloning the queue is cheap and every clone feeds the same consumer.
#[derive(Clone)]
pub struct EventQueue {
    /// The sending end of the crossbeam channel
    tx: Sender<Envelope>,
    /// The shared sequence counter and stop flag
    shared: Arc<Shared>,
}

impl EventQueue {
    /// Enqueue an event, returning the sequence number it was assigned.
    ///
    /// Once the queue has been stopped (or its consumer is gone) the event is
    /// dropped and a diagnostic is recorded.  This is not reported as an error
    /// to the caller.
    pub fn enqueue(&self, event: Event) -> Option<u64> {
        let mut next_sequence = self.shared.next_sequence.lock();
        if self.shared.stopped.load(Ordering::SeqCst) {
            drop(next_sequence);
            self.record_drop(&event, "queue stopped");
            return None;
        }

        let sequence = *next_sequence;
        match self.tx.send(Envelope { sequence, event }) {
            Ok(()) => {
                *next_sequence += 1;
                Some(sequence)
            }
            Err(error) => {
                drop(next_sequence);
                self.record_drop(&error.into_inner().event, "consumer gone");
                None
            }
        }
    }

    /// Stop accepting events.
    ///
    /// Events that were enqueued before the stop are still delivered.
    pub fn stop(&self) {
        let _next_sequence = self.shared.next_sequence.lock();
        self.shared.stopped.store(true, Ordering::SeqCst);
    }

    /// Whether the queue has stopped accepting events
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// The number of events dropped since the queue was created
    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::SeqCst)
    }

    /// The number of events waiting to be dequeued
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    /// Whether no events are waiting to be dequeued
    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    fn record_drop(&self, event: &Event, reason: &'static str) {
        self.shared.dropped.fetch_add(1, Ordering::SeqCst);
        warn!(%event, reason, "event dropped at enqueue");
    }
}

/// The consuming half of the event queue.
///
/// There is exactly one receiver per queue and it is not `Clone`.
pub struct EventReceiver {
    /// The receiving end of the crossbeam channel
    rx: Receiver<Envelope>,
    /// The shared sequence counter and stop flag
    shared: Arc<Shared>,
}

impl EventReceiver {
    /// Block for at most `timeout` waiting for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Envelope, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Dequeue the next event if one is waiting
    pub fn try_recv(&self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }

    /// Whether the producing side has been stopped
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    /// Whether no events are waiting to be dequeued
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// The number of events waiting to be dequeued
    pub fn len(&self) -> usize {
        self.rx.len()
    }
}
