//!
//! Clients and Components
//!
//! Clients front asynchronous external requests.  Every request a client
//! issues is registered with the scope's [`RequestRegistry`] through its
//! [`ClientContext`] so the signal detector can resolve it into exactly one
//! terminal event.
//!
//! Components hold data or behavior shared across a scope.  They never own
//! requests.
//!
//! Both are created while a mode-state scope is constructed and are torn
//! down, in reverse creation order, when the scope is torn down.
//!

use std::{any::Any, time::Duration};

use quanta::Clock;

use orthostate_core::{
    Event, EventKind, EventQueue, EventSource, Generation, HookError, PendingRequest,
    RequestHandle, RequestRegistry,
};

use crate::scope::EventPoster;

/// Access to a value as [`Any`] so trait objects can be downcast to their
/// concrete type.
pub trait AsAny: Any {
    /// The value as `&dyn Any`
    fn as_any(&self) -> &dyn Any;

    /// The value as `&mut dyn Any`
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A scope-owned object fronting asynchronous external requests.
///
/// Every hook runs on the scheduler thread.
pub trait Client: AsAny + Send {
    /// Called once after every orthogonal of the scope has been initialized
    fn initialize(&mut self, _ctx: &mut ClientContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    /// Called for every live event whose source is this client, before the
    /// event is looked up in any transition table.
    ///
    /// This is where a client re-exposes its request outcomes as signals.
    fn on_event(&mut self, _event: &Event, _ctx: &mut ClientContext<'_>) {}

    /// Tear the client down.
    ///
    /// A client must cancel every request it still has outstanding.  Requests
    /// left behind are reported as leaked and then cancelled by the scope.
    fn teardown(&mut self, ctx: &mut ClientContext<'_>);
}

/// A scope-owned, non-request-owning piece of shared data or behavior.
pub trait Component: AsAny + Send {
    /// Called once after every orthogonal of the scope has been initialized
    fn initialize(&mut self, _events: &EventPoster) -> Result<(), HookError> {
        Ok(())
    }

    /// Called once when the scope is torn down
    fn teardown(&mut self) {}
}

/// The handle a client uses to register, cancel and report requests.
pub struct ClientContext<'a> {
    source: EventSource,
    generation: Generation,
    registry: &'a RequestRegistry,
    events: &'a EventQueue,
}

impl<'a> ClientContext<'a> {
    pub(crate) fn new(
        source: EventSource,
        generation: Generation,
        registry: &'a RequestRegistry,
        events: &'a EventQueue,
    ) -> Self {
        Self {
            source,
            generation,
            registry,
            events,
        }
    }

    /// Register a newly issued request with the signal detector's registry
    pub fn register_request(
        &mut self,
        timeout: Option<Duration>,
        request: impl PendingRequest + 'static,
    ) -> RequestHandle {
        self.registry
            .register(self.source, self.generation, timeout, Box::new(request))
    }

    /// Cancel one of this client's requests.
    ///
    /// The resulting `Cancelled` event is enqueued like any other terminal
    /// event.  Returns false when the request had already been resolved.
    pub fn cancel_request(&mut self, handle: RequestHandle) -> bool {
        match self.registry.cancel(handle) {
            Some(event) => {
                self.events.enqueue(event);
                true
            }
            None => false,
        }
    }

    /// Whether a request is still outstanding
    pub fn is_outstanding(&self, handle: RequestHandle) -> bool {
        self.registry.contains(handle)
    }

    /// Post an event of the given kind originating from this client
    pub fn post(&self, kind: EventKind) -> Option<u64> {
        self.events.enqueue(
            Event::new(kind)
                .with_source(self.source)
                .with_generation(self.generation),
        )
    }

    /// A cloneable poster that can be moved into signal handlers or threads
    pub fn poster(&self) -> EventPoster {
        EventPoster::new(self.events.clone(), self.generation, self.source)
    }

    /// The clock requests are timestamped with
    pub fn clock(&self) -> &Clock {
        self.registry.clock()
    }

    /// The source tagged onto this client's events
    pub fn source(&self) -> EventSource {
        self.source
    }

    /// The generation of the owning scope
    pub fn generation(&self) -> Generation {
        self.generation
    }
}
