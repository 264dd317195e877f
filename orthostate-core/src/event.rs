//!
//! Events are the only thing the scheduler ever applies to the state machine.
//!
//! An [`Event`] is a closed, type-tagged value.  Its [`EventKind`] says what
//! happened and its [`EventSource`] says which client and orthogonal it came
//! from.  Events that resolve an outstanding request additionally carry the
//! [`Generation`] of the scope that issued the request so that a completion
//! arriving after the scope was torn down can be recognised as stale.
//!

use std::fmt;

use crate::registry::RequestHandle;

/// The kind of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// An asynchronous request completed successfully
    Succeeded,
    /// An asynchronous request was aborted by the remote end
    Aborted,
    /// An asynchronous request was preempted by the remote end
    Preempted,
    /// An asynchronous request outlived its timeout
    Timeout,
    /// An asynchronous request was cancelled by its client or by scope teardown
    Cancelled,
    /// A named, user-defined event
    Custom(&'static str),
}

impl EventKind {
    /// Whether this kind resolves an outstanding request
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventKind::Custom(_))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Custom(name) => write!(f, "{name}"),
            kind => write!(f, "{kind:?}"),
        }
    }
}

/// Where an event originated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct EventSource {
    /// The type name of the originating client
    pub client: Option<&'static str>,
    /// The orthogonal slot owning the originating client
    pub orthogonal: Option<&'static str>,
}

impl EventSource {
    /// An event source for a client living in a given orthogonal
    pub const fn new(client: &'static str, orthogonal: &'static str) -> Self {
        Self {
            client: Some(client),
            orthogonal: Some(orthogonal),
        }
    }
}

/// The generation of a mode-state scope.
///
/// Every mode-state entry constructs a scope with a fresh generation.  Once
/// the scope is torn down its generation is retired forever.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(u64);

impl Generation {
    /// The generation handed out to the first scope
    pub const FIRST: Generation = Generation(1);

    /// Create a generation from its raw value
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw generation value
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The generation following this one
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// An immutable notification consumed exactly once by the scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    kind: EventKind,
    source: EventSource,
    generation: Option<Generation>,
    request: Option<RequestHandle>,
}

impl Event {
    /// Create an event with no source
    pub const fn new(kind: EventKind) -> Self {
        Self {
            kind,
            source: EventSource {
                client: None,
                orthogonal: None,
            },
            generation: None,
            request: None,
        }
    }

    /// Create a named custom event
    pub const fn custom(name: &'static str) -> Self {
        Self::new(EventKind::Custom(name))
    }

    /// Attach a source to the event
    pub fn with_source(mut self, source: EventSource) -> Self {
        self.source = source;
        self
    }

    /// Tag the event with the generation of the scope it belongs to
    pub fn with_generation(mut self, generation: Generation) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Attach the request this event resolves
    pub fn with_request(mut self, request: RequestHandle) -> Self {
        self.request = Some(request);
        self
    }

    /// The kind of the event
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// The origin of the event
    pub fn source(&self) -> EventSource {
        self.source
    }

    /// The scope generation the event belongs to, if any.
    ///
    /// Untagged events (e.g. external triggers) are never considered stale.
    pub fn generation(&self) -> Option<Generation> {
        self.generation
    }

    /// The request this event resolves, if any
    pub fn request(&self) -> Option<RequestHandle> {
        self.request
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(client) = self.source.client {
            write!(f, "<{client}")?;
            if let Some(orthogonal) = self.source.orthogonal {
                write!(f, " @ {orthogonal}")?;
            }
            write!(f, ">")?;
        }
        if let Some(generation) = self.generation {
            write!(f, " [{generation}]")?;
        }
        Ok(())
    }
}
