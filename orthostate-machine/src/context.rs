//!
//! The Hook Context
//!
//! Every state, mode-state, behavior and transition action receives a
//! [`ScopeContext`] while it runs.  It is the only way user code reaches the
//! live scope: resolving clients and components, posting events and
//! subscribing to signals.
//!
//! Signal connections made through the context are owned by whatever is
//! running the hook.  A state's connections are disconnected when the state
//! exits, a behavior's when it is replaced and a mode-state's when its scope
//! is torn down.
//!

use orthostate_core::{ConfigurationError, Event, EventKind, Generation};
use orthostate_signals::{Connection, Connections, Signal};

use crate::{
    client::{Client, ClientContext, Component},
    mode_state::Parameters,
    scope::{ClientKey, ComponentKey, EventPoster, Scope},
};

/// The live scope as seen from a running hook
pub struct ScopeContext<'a> {
    scope: &'a mut Scope,
    params: &'a Parameters,
    connections: &'a mut Connections,
    orthogonal: Option<&'static str>,
}

impl<'a> ScopeContext<'a> {
    pub(crate) fn new(
        scope: &'a mut Scope,
        params: &'a Parameters,
        connections: &'a mut Connections,
        orthogonal: Option<&'static str>,
    ) -> Self {
        Self {
            scope,
            params,
            connections,
            orthogonal,
        }
    }

    /// Resolve the client of type `T`.
    ///
    /// A behavior prefers the client created by its own orthogonal.
    pub fn requires_client<T: Client>(&self) -> Result<ClientKey<T>, ConfigurationError> {
        match self.orthogonal {
            Some(orthogonal) => self.scope.requires_client_in::<T>(orthogonal),
            None => self.scope.requires_client::<T>(),
        }
    }

    /// Resolve the component of type `T`
    pub fn requires_component<T: Component>(&self) -> Result<ComponentKey<T>, ConfigurationError> {
        self.scope.requires_component::<T>()
    }

    /// Borrow a resolved client
    pub fn client<T: Client>(&self, key: ClientKey<T>) -> Result<&T, ConfigurationError> {
        self.scope.client(key)
    }

    /// Borrow a resolved client mutably together with its request context
    pub fn client_mut<T: Client>(
        &mut self,
        key: ClientKey<T>,
    ) -> Result<(&mut T, ClientContext<'_>), ConfigurationError> {
        self.scope.client_mut(key)
    }

    /// Borrow a resolved component
    pub fn component<T: Component>(&self, key: ComponentKey<T>) -> Result<&T, ConfigurationError> {
        self.scope.component(key)
    }

    /// Borrow a resolved component mutably
    pub fn component_mut<T: Component>(
        &mut self,
        key: ComponentKey<T>,
    ) -> Result<&mut T, ConfigurationError> {
        self.scope.component_mut(key)
    }

    /// Post an event of the given kind, tagged with the scope's generation
    pub fn post(&self, kind: EventKind) -> Option<u64> {
        self.poster().post(kind)
    }

    /// Post an event, tagging it with the scope's generation
    pub fn post_event(&self, event: Event) -> Option<u64> {
        self.poster().post_event(event)
    }

    /// A cloneable poster for signal handlers
    pub fn poster(&self) -> EventPoster {
        self.scope.poster()
    }

    /// Subscribe to a signal for as long as the hook's owner is active
    pub fn connect<A, F>(&mut self, signal: &Signal<A>, handler: F)
    where
        A: 'static,
        F: FnMut(&A) + Send + 'static,
    {
        self.connections.push(signal.connect(handler));
    }

    /// Tie an existing connection to the hook's owner
    pub fn track(&mut self, connection: Connection) {
        self.connections.push(connection);
    }

    /// The parameters of the enclosing mode-state
    pub fn params(&self) -> &Parameters {
        self.params
    }

    /// The orthogonal slot the hook runs for, if it belongs to a behavior
    pub fn orthogonal(&self) -> Option<&'static str> {
        self.orthogonal
    }

    /// The generation of the live scope
    pub fn generation(&self) -> Generation {
        self.scope.generation()
    }

    /// The live scope
    pub fn scope(&self) -> &Scope {
        &*self.scope
    }
}
