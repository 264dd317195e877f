//!
//! Connection Tokens
//!
//! A [`Connection`] is returned from every subscription.  It only holds a weak
//! reference to the signal, so a connection can outlive its signal and a
//! signal can outlive every one of its subscribers without either side
//! dangling.
//!

use std::{fmt, sync::Weak};

/// Type-erased access to the subscriber list of a signal
pub(crate) trait SlotList: Send + Sync {
    /// Remove the handler with the given id, returning whether it was connected
    fn remove(&self, id: u64) -> bool;

    /// Whether the handler with the given id is connected
    fn contains(&self, id: u64) -> bool;
}

/// An opaque token identifying one subscription to a signal.
#[derive(Clone)]
pub struct Connection {
    /// The id of the handler in the signal's subscriber list
    id: u64,
    /// The subscriber list of the signal
    slots: Weak<dyn SlotList>,
}

impl Connection {
    pub(crate) fn new(id: u64, slots: Weak<dyn SlotList>) -> Self {
        Self { id, slots }
    }

    /// Disconnect the handler.
    ///
    /// Returns whether the handler was still connected.  Calling this from
    /// within the handler itself is allowed.
    pub fn disconnect(&self) -> bool {
        self.slots
            .upgrade()
            .is_some_and(|slots| slots.remove(self.id))
    }

    /// Whether the handler is still connected to a live signal
    pub fn is_connected(&self) -> bool {
        self.slots
            .upgrade()
            .is_some_and(|slots| slots.contains(self.id))
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// A connection that disconnects when dropped
#[derive(Debug)]
pub struct ScopedConnection(Option<Connection>);

impl ScopedConnection {
    /// Give up the scoped behavior and return the plain connection
    pub fn release(mut self) -> Option<Connection> {
        self.0.take()
    }
}

impl From<Connection> for ScopedConnection {
    fn from(connection: Connection) -> Self {
        Self(Some(connection))
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.0.take() {
            connection.disconnect();
        }
    }
}

/// A collection of connections owned by one object (usually a state).
///
/// Every connection still held is disconnected when the collection is
/// dropped, so an object that goes away cannot leave a handler behind.
#[derive(Debug, Default)]
pub struct Connections {
    connections: Vec<Connection>,
}

impl Connections {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a connection
    pub fn push(&mut self, connection: Connection) {
        self.connections.push(connection);
    }

    /// The number of tracked connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are tracked
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Disconnect every tracked connection, returning how many were still connected
    pub fn disconnect_all(&mut self) -> usize {
        self.connections
            .drain(..)
            .filter(|connection| connection.disconnect())
            .count()
    }
}

impl Drop for Connections {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}
