//!
//! Typed Signals
//!
//! A [`Signal`] keeps an ordered list of subscribed handlers.  Emitting the
//! signal calls every handler that is connected at the moment of emission
//! in connection order.
//!
//! Emission works on a snapshot of the subscriber list, so handlers may
//! connect and disconnect (themselves or others) freely while it runs.  A
//! handler disconnected mid-emission is not called afterwards; a handler
//! connected mid-emission is first called on the next emission.
//!

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::connection::{Connection, SlotList};

/// A subscribed handler
type Handler<A> = Arc<Mutex<Box<dyn FnMut(&A) + Send>>>;

/// The subscriber list of a signal
struct Slots<A> {
    /// The id handed to the next connection
    next_id: u64,
    /// The connected handlers in connection order
    handlers: Vec<(u64, Handler<A>)>,
}

impl<A: 'static> SlotList for Mutex<Slots<A>> {
    fn remove(&self, id: u64) -> bool {
        let mut slots = self.lock();
        let before = slots.handlers.len();
        slots.handlers.retain(|(handler_id, _)| *handler_id != id);
        slots.handlers.len() != before
    }

    fn contains(&self, id: u64) -> bool {
        self.lock()
            .handlers
            .iter()
            .any(|(handler_id, _)| *handler_id == id)
    }
}

/// A typed publish point.
///
/// Cloning a signal yields another handle to the same subscriber list.
pub struct Signal<A> {
    slots: Arc<Mutex<Slots<A>>>,
}

impl<A> Clone for Signal<A> {
    fn clone(&self) -> Self {
        Self {
            slots: self.slots.clone(),
        }
    }
}

impl<A: 'static> Default for Signal<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: 'static> Signal<A> {
    /// Create a signal without subscribers
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                handlers: Vec::new(),
            })),
        }
    }

    /// Subscribe a handler to the signal
    pub fn connect<F>(&self, handler: F) -> Connection
    where
        F: FnMut(&A) + Send + 'static,
    {
        let mut slots = self.slots.lock();
        let id = slots.next_id;
        slots.next_id += 1;
        slots.handlers.push((id, Arc::new(Mutex::new(Box::new(handler)))));
        drop(slots);

        self.connection(id)
    }

    /// Subscribe a handler that receives its own connection on every call.
    ///
    /// This is the convenient way to write a handler that disconnects itself.
    pub fn connect_with_handle<F>(&self, mut handler: F) -> Connection
    where
        F: FnMut(&A, &Connection) + Send + 'static,
    {
        let mut slots = self.slots.lock();
        let id = slots.next_id;
        slots.next_id += 1;

        let connection = self.connection(id);
        let own_connection = connection.clone();
        slots.handlers.push((
            id,
            Arc::new(Mutex::new(Box::new(move |args: &A| {
                handler(args, &own_connection)
            }))),
        ));

        connection
    }

    /// Call every connected handler with `args`, returning how many ran
    pub fn emit(&self, args: &A) -> usize {
        let snapshot: Vec<(u64, Handler<A>)> = self.slots.lock().handlers.clone();

        let mut called = 0;
        for (id, handler) in snapshot {
            if !self.slots.contains(id) {
                continue;
            }

            match handler.try_lock() {
                Some(mut handler) => {
                    (handler)(args);
                    called += 1;
                }
                None => warn!(handler = id, "recursive signal emission skipped"),
            }
        }
        called
    }

    /// The number of connected handlers
    pub fn subscriber_count(&self) -> usize {
        self.slots.lock().handlers.len()
    }

    /// Disconnect every handler
    pub fn disconnect_all(&self) {
        self.slots.lock().handlers.clear();
    }

    fn connection(&self, id: u64) -> Connection {
        let slots: Arc<dyn SlotList> = self.slots.clone();
        Connection::new(id, Arc::downgrade(&slots))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::connection::{Connections, ScopedConnection};

    #[test]
    fn test_emit_calls_handlers_in_connection_order() {
        let signal = Signal::<u32>::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second"] {
            let calls = calls.clone();
            signal.connect(move |value: &u32| calls.lock().push((name, *value)));
        }

        assert_eq!(signal.emit(&7), 2);
        assert_eq!(*calls.lock(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn test_disconnect() {
        let signal = Signal::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let connection = {
            let count = count.clone();
            signal.connect(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };

        signal.emit(&());
        assert!(connection.disconnect());
        assert!(!connection.disconnect());
        assert!(!connection.is_connected());
        signal.emit(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn test_disconnect_from_within_handler() {
        let signal = Signal::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let connection = {
            let count = count.clone();
            signal.connect_with_handle(move |_, connection| {
                count.fetch_add(1, Ordering::SeqCst);
                connection.disconnect();
            })
        };

        assert_eq!(signal.emit(&()), 1);
        assert_eq!(signal.emit(&()), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!connection.is_connected());
    }

    #[test]
    fn test_handler_disconnecting_a_later_handler() {
        let signal = Signal::<()>::new();
        let later_calls = Arc::new(AtomicUsize::new(0));
        let later_slot: Arc<Mutex<Option<Connection>>> = Arc::new(Mutex::new(None));

        {
            let later_slot = later_slot.clone();
            signal.connect(move |_| {
                if let Some(later) = later_slot.lock().as_ref() {
                    later.disconnect();
                }
            });
        }
        let later = {
            let later_calls = later_calls.clone();
            signal.connect(move |_| {
                later_calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        *later_slot.lock() = Some(later);

        assert_eq!(signal.emit(&()), 1);
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_connection_outlives_signal() {
        let signal = Signal::<()>::new();
        let connection = signal.connect(|_| {});
        drop(signal);

        assert!(!connection.is_connected());
        assert!(!connection.disconnect());
    }

    #[test]
    fn test_scoped_connection_disconnects_on_drop() {
        let signal = Signal::<()>::new();
        let scoped = ScopedConnection::from(signal.connect(|_| {}));
        assert_eq!(signal.subscriber_count(), 1);

        drop(scoped);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn test_connections_disconnect_on_drop() {
        let signal = Signal::<()>::new();
        let mut connections = Connections::new();
        connections.push(signal.connect(|_| {}));
        connections.push(signal.connect(|_| {}));
        assert_eq!(signal.subscriber_count(), 2);

        drop(connections);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn test_recursive_emission_is_skipped() {
        let signal = Signal::<u8>::new();
        let count = Arc::new(AtomicUsize::new(0));
        {
            let inner = signal.clone();
            let count = count.clone();
            signal.connect(move |depth: &u8| {
                count.fetch_add(1, Ordering::SeqCst);
                if *depth == 0 {
                    inner.emit(&1);
                }
            });
        }

        signal.emit(&0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
