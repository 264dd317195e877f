//!
//! Outstanding Request Registry
//!
//! Clients register every asynchronous request they issue with the
//! [`RequestRegistry`].  The signal detector scans the registry and turns each
//! entry into exactly one terminal [`Event`]:
//!
//! * the external request finished  -> `Succeeded`, `Aborted` or `Preempted`
//! * the request outlived its timeout -> `Timeout`
//! * the client (or scope teardown) cancelled it -> `Cancelled`
//!
//! Whichever of these happens first removes the entry under the registry
//! lock, so no entry can ever be resolved twice.
//!
//! Entries live in an arena.  A [`RequestHandle`] is an arena index paired
//! with the revision of the slot at insertion time; once an entry is removed
//! the slot's revision is bumped so the old handle no longer refers to
//! anything even when the index is reused.
//!

use std::{fmt, sync::Arc, time::Duration};

use parking_lot::Mutex;
use quanta::{Clock, Instant};

use crate::event::{Event, EventKind, EventSource, Generation};

/// The status of an external asynchronous request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStatus {
    /// The request is still in flight
    Pending,
    /// The request completed successfully
    Succeeded,
    /// The request was aborted
    Aborted,
    /// The request was preempted
    Preempted,
}

impl RequestStatus {
    /// The terminal event kind for this status, if the status is terminal
    pub fn terminal_kind(self) -> Option<EventKind> {
        match self {
            RequestStatus::Pending => None,
            RequestStatus::Succeeded => Some(EventKind::Succeeded),
            RequestStatus::Aborted => Some(EventKind::Aborted),
            RequestStatus::Preempted => Some(EventKind::Preempted),
        }
    }
}

/// The opaque asynchronous-request abstraction implemented by concrete clients.
///
/// `poll` is called from the signal detector thread.  The registry never
/// inspects results; a client that needs the result payload should have its
/// `PendingRequest` stash the payload somewhere the client can fetch it.
pub trait PendingRequest: Send {
    /// Check whether the external request has finished
    fn poll(&mut self) -> RequestStatus;

    /// Ask the external side to stop working on the request.
    ///
    /// Called at most once, right before the entry is removed because of a
    /// timeout or a cancellation.
    fn cancel(&mut self);
}

/// A generation-tagged handle to an entry of the registry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestHandle {
    /// The arena index of the entry
    index: u32,
    /// The revision of the arena slot when the entry was inserted
    revision: u32,
}

impl RequestHandle {
    /// The arena index of the entry
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The revision of the arena slot the handle refers to
    pub fn revision(&self) -> u32 {
        self.revision
    }
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}v{}", self.index, self.revision)
    }
}

/// A single in-flight asynchronous request
pub struct OutstandingRequest {
    handle: RequestHandle,
    source: EventSource,
    issued_at: Instant,
    timeout: Option<Duration>,
    scope: Generation,
    request: Box<dyn PendingRequest>,
}

impl OutstandingRequest {
    /// The handle of this entry
    pub fn handle(&self) -> RequestHandle {
        self.handle
    }

    /// The client and orthogonal that issued the request
    pub fn source(&self) -> EventSource {
        self.source
    }

    /// When the request was registered
    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    /// How long the request may stay outstanding
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The generation of the scope that issued the request
    pub fn scope(&self) -> Generation {
        self.scope
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.timeout
            .is_some_and(|timeout| now.saturating_duration_since(self.issued_at) > timeout)
    }

    fn into_event(self, kind: EventKind) -> Event {
        Event::new(kind)
            .with_source(self.source)
            .with_generation(self.scope)
            .with_request(self.handle)
    }
}

impl fmt::Debug for OutstandingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutstandingRequest")
            .field("handle", &self.handle)
            .field("source", &self.source)
            .field("timeout", &self.timeout)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// A slot in the arena
struct Slot {
    revision: u32,
    entry: Option<OutstandingRequest>,
}

/// Arena storage with a free list of vacated slots
#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl Arena {
    fn next_handle(&mut self) -> RequestHandle {
        match self.free.pop() {
            Some(index) => RequestHandle {
                index,
                revision: self.slots[index as usize].revision,
            },
            None => {
                self.slots.push(Slot {
                    revision: 0,
                    entry: None,
                });
                RequestHandle {
                    index: (self.slots.len() - 1) as u32,
                    revision: 0,
                }
            }
        }
    }

    fn insert(&mut self, entry: OutstandingRequest) {
        let index = entry.handle.index as usize;
        self.slots[index].entry = Some(entry);
        self.len += 1;
    }

    fn get(&self, handle: RequestHandle) -> Option<&OutstandingRequest> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.revision == handle.revision)
            .and_then(|slot| slot.entry.as_ref())
    }

    fn remove(&mut self, handle: RequestHandle) -> Option<OutstandingRequest> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.revision != handle.revision {
            return None;
        }

        let entry = slot.entry.take()?;
        slot.revision = slot.revision.wrapping_add(1);
        self.free.push(handle.index);
        self.len -= 1;
        Some(entry)
    }

    fn entries(&self) -> impl Iterator<Item = &OutstandingRequest> {
        self.slots.iter().filter_map(|slot| slot.entry.as_ref())
    }
}

/// The lock-guarded registry of outstanding requests.
///
/// Cloning the registry is cheap; every clone refers to the same entries.
#[derive(Clone)]
pub struct RequestRegistry {
    arena: Arc<Mutex<Arena>>,
    clock: Clock,
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestRegistry {
    /// Create an empty registry using a real clock
    pub fn new() -> Self {
        Self::with_clock(Clock::new())
    }

    /// Create an empty registry using the given clock for issue times and timeouts
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            arena: Arc::new(Mutex::new(Arena::default())),
            clock,
        }
    }

    /// The clock used to timestamp and age requests
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Register a newly issued request
    pub fn register(
        &self,
        source: EventSource,
        scope: Generation,
        timeout: Option<Duration>,
        request: Box<dyn PendingRequest>,
    ) -> RequestHandle {
        let issued_at = self.clock.now();
        let mut arena = self.arena.lock();
        let handle = arena.next_handle();
        arena.insert(OutstandingRequest {
            handle,
            source,
            issued_at,
            timeout,
            scope,
            request,
        });
        handle
    }

    /// Whether the handle still refers to an outstanding request
    pub fn contains(&self, handle: RequestHandle) -> bool {
        self.arena.lock().get(handle).is_some()
    }

    /// The number of outstanding requests
    pub fn len(&self) -> usize {
        self.arena.lock().len
    }

    /// Whether there are no outstanding requests
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of outstanding requests issued from a given scope
    pub fn outstanding_in(&self, scope: Generation) -> usize {
        self.arena
            .lock()
            .entries()
            .filter(|entry| entry.scope == scope)
            .count()
    }

    /// The number of outstanding requests issued by one source inside a scope
    pub fn outstanding_for(&self, scope: Generation, source: EventSource) -> usize {
        self.arena
            .lock()
            .entries()
            .filter(|entry| entry.scope == scope && entry.source == source)
            .count()
    }

    /// Cancel a single request.
    ///
    /// Returns the `Cancelled` terminal event if the request was still
    /// outstanding, or `None` if it had already been resolved.
    pub fn cancel(&self, handle: RequestHandle) -> Option<Event> {
        let mut entry = self.arena.lock().remove(handle)?;
        entry.request.cancel();
        Some(entry.into_event(EventKind::Cancelled))
    }

    /// Cancel every request issued from a retired scope.
    ///
    /// Returns one `Cancelled` event per request that was still outstanding.
    pub fn retire(&self, scope: Generation) -> Vec<Event> {
        let mut arena = self.arena.lock();
        let handles: Vec<RequestHandle> = arena
            .entries()
            .filter(|entry| entry.scope == scope)
            .map(|entry| entry.handle)
            .collect();

        handles
            .into_iter()
            .filter_map(|handle| arena.remove(handle))
            .map(|mut entry| {
                entry.request.cancel();
                entry.into_event(EventKind::Cancelled)
            })
            .collect()
    }

    /// Poll every outstanding request once.
    ///
    /// A request whose external condition is satisfied resolves to its
    /// completion event.  A request that is still pending but older than its
    /// timeout is cancelled and resolves to a `Timeout` event.  Completion is
    /// checked first, so a request never produces both.
    pub fn scan(&self) -> Vec<Event> {
        let now = self.clock.now();
        let mut arena = self.arena.lock();
        let mut events = Vec::new();

        for index in 0..arena.slots.len() {
            let Some(entry) = arena.slots[index].entry.as_mut() else {
                continue;
            };

            let kind = match entry.request.poll().terminal_kind() {
                Some(kind) => kind,
                None if entry.is_expired(now) => {
                    entry.request.cancel();
                    EventKind::Timeout
                }
                None => continue,
            };

            let handle = entry.handle;
            if let Some(entry) = arena.remove(handle) {
                events.push(entry.into_event(kind));
            }
        }

        events
    }
}
