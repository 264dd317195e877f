//!
//! Mode-State Scopes
//!
//! A [`Scope`] is the dependency registry of one mode-state entry.  It is
//! constructed when the mode-state is entered, filled by the mode-state's
//! orthogonals through a [`ScopeBuilder`] and torn down completely before the
//! next mode-state's scope is constructed.
//!
//! Lookups are by type.  A lookup returns a key tagged with the scope's
//! generation, so a key that escapes its scope can never reach into another
//! one.
//!

use std::{
    any::{type_name, TypeId},
    fmt,
    marker::PhantomData,
};

use tracing::{debug, error};

use orthostate_core::{
    ConfigurationError, Event, EventKind, EventQueue, EventSource, Generation, ProcessError,
    RequestRegistry,
};

use crate::client::{Client, ClientContext, Component};

/// What kind of dependency a requirement names
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Dependency {
    Client,
    Component,
}

/// A dependency that must be present once a scope has been constructed
#[derive(Clone, Copy, Debug)]
pub(crate) struct Requirement {
    pub(crate) dependency: Dependency,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
}

impl Requirement {
    pub(crate) fn client<T: Client>() -> Self {
        Self {
            dependency: Dependency::Client,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    pub(crate) fn component<T: Component>() -> Self {
        Self {
            dependency: Dependency::Component,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }
}

/// A resolved, generation-tagged reference to a client of a scope
pub struct ClientKey<T> {
    index: usize,
    generation: Generation,
    _client: PhantomData<fn() -> T>,
}

impl<T> Clone for ClientKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ClientKey<T> {}

impl<T> fmt::Debug for ClientKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientKey")
            .field("client", &type_name::<T>())
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<T> ClientKey<T> {
    /// The generation of the scope that resolved the key
    pub fn generation(&self) -> Generation {
        self.generation
    }
}

/// A resolved, generation-tagged reference to a component of a scope
pub struct ComponentKey<T> {
    index: usize,
    generation: Generation,
    _component: PhantomData<fn() -> T>,
}

impl<T> Clone for ComponentKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ComponentKey<T> {}

impl<T> fmt::Debug for ComponentKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentKey")
            .field("component", &type_name::<T>())
            .field("index", &self.index)
            .field("generation", &self.generation)
            .finish()
    }
}

/// A cloneable handle for posting generation-tagged events from outside the
/// scope's hooks (signal handlers, helper threads).
#[derive(Clone)]
pub struct EventPoster {
    events: EventQueue,
    generation: Generation,
    source: EventSource,
}

impl EventPoster {
    pub(crate) fn new(events: EventQueue, generation: Generation, source: EventSource) -> Self {
        Self {
            events,
            generation,
            source,
        }
    }

    /// Post an event of the given kind
    pub fn post(&self, kind: EventKind) -> Option<u64> {
        self.post_event(Event::new(kind).with_source(self.source))
    }

    /// Post an event, tagging it with the scope's generation
    pub fn post_event(&self, event: Event) -> Option<u64> {
        self.events.enqueue(event.with_generation(self.generation))
    }

    /// The generation posted events are tagged with
    pub fn generation(&self) -> Generation {
        self.generation
    }
}

struct ClientEntry {
    type_id: TypeId,
    type_name: &'static str,
    orthogonal: Option<&'static str>,
    client: Box<dyn Client>,
}

impl ClientEntry {
    fn source(&self) -> EventSource {
        EventSource {
            client: Some(self.type_name),
            orthogonal: self.orthogonal,
        }
    }
}

struct ComponentEntry {
    type_id: TypeId,
    type_name: &'static str,
    component: Box<dyn Component>,
}

/// The per-entry dependency registry of a mode-state
pub struct Scope {
    name: String,
    generation: Generation,
    registry: RequestRegistry,
    events: EventQueue,
    clients: Vec<ClientEntry>,
    components: Vec<ComponentEntry>,
}

impl Scope {
    pub(crate) fn new(
        name: String,
        generation: Generation,
        registry: RequestRegistry,
        events: EventQueue,
    ) -> Self {
        Self {
            name,
            generation,
            registry,
            events,
            clients: Vec::new(),
            components: Vec::new(),
        }
    }

    /// The name of the mode-state owning the scope
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The generation of the scope
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// A poster for events belonging to this scope
    pub fn poster(&self) -> EventPoster {
        EventPoster::new(self.events.clone(), self.generation, EventSource::default())
    }

    /// Resolve the client of type `T`.
    ///
    /// When several orthogonals created a client of the same type the first
    /// one created wins.
    pub fn requires_client<T: Client>(&self) -> Result<ClientKey<T>, ConfigurationError> {
        self.find_client::<T>(None)
    }

    /// Resolve the client of type `T` created by the given orthogonal,
    /// falling back to any client of that type.
    pub fn requires_client_in<T: Client>(
        &self,
        orthogonal: &str,
    ) -> Result<ClientKey<T>, ConfigurationError> {
        self.find_client::<T>(Some(orthogonal))
    }

    /// Resolve the component of type `T`
    pub fn requires_component<T: Component>(&self) -> Result<ComponentKey<T>, ConfigurationError> {
        let type_id = TypeId::of::<T>();
        self.components
            .iter()
            .position(|entry| entry.type_id == type_id)
            .map(|index| ComponentKey {
                index,
                generation: self.generation,
                _component: PhantomData,
            })
            .ok_or_else(|| ConfigurationError::MissingComponent {
                scope: self.name.clone(),
                dependency: type_name::<T>(),
            })
    }

    /// Borrow a resolved client
    pub fn client<T: Client>(&self, key: ClientKey<T>) -> Result<&T, ConfigurationError> {
        self.check_generation::<T>(key.generation)?;
        self.clients
            .get(key.index)
            .and_then(|entry| {
                let client: &dyn Client = &*entry.client;
                client.as_any().downcast_ref::<T>()
            })
            .ok_or_else(|| self.missing_client::<T>())
    }

    /// Borrow a resolved client mutably together with the context it issues
    /// requests through
    pub fn client_mut<T: Client>(
        &mut self,
        key: ClientKey<T>,
    ) -> Result<(&mut T, ClientContext<'_>), ConfigurationError> {
        self.check_generation::<T>(key.generation)?;
        let missing = self.missing_client::<T>();

        let Scope {
            clients,
            registry,
            events,
            generation,
            ..
        } = self;
        let entry = clients.get_mut(key.index).ok_or(missing.clone())?;
        let source = entry.source();
        let client: &mut dyn Client = &mut *entry.client;
        let client = client.as_any_mut().downcast_mut::<T>().ok_or(missing)?;

        Ok((client, ClientContext::new(source, *generation, registry, events)))
    }

    /// Borrow a resolved component
    pub fn component<T: Component>(&self, key: ComponentKey<T>) -> Result<&T, ConfigurationError> {
        self.check_generation::<T>(key.generation)?;
        self.components
            .get(key.index)
            .and_then(|entry| {
                let component: &dyn Component = &*entry.component;
                component.as_any().downcast_ref::<T>()
            })
            .ok_or_else(|| self.missing_component::<T>())
    }

    /// Borrow a resolved component mutably
    pub fn component_mut<T: Component>(
        &mut self,
        key: ComponentKey<T>,
    ) -> Result<&mut T, ConfigurationError> {
        self.check_generation::<T>(key.generation)?;
        let missing = self.missing_component::<T>();
        self.components
            .get_mut(key.index)
            .and_then(|entry| {
                let component: &mut dyn Component = &mut *entry.component;
                component.as_any_mut().downcast_mut::<T>()
            })
            .ok_or(missing)
    }

    /// The number of clients in the scope
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// The number of components in the scope
    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    fn find_client<T: Client>(
        &self,
        preferred: Option<&str>,
    ) -> Result<ClientKey<T>, ConfigurationError> {
        let type_id = TypeId::of::<T>();
        let mut candidates = self
            .clients
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.type_id == type_id);

        let index = match preferred {
            Some(orthogonal) => {
                let candidates: Vec<(usize, &ClientEntry)> = candidates.collect();
                candidates
                    .iter()
                    .find(|(_, entry)| entry.orthogonal == Some(orthogonal))
                    .or_else(|| candidates.first())
                    .map(|(index, _)| *index)
            }
            None => candidates.next().map(|(index, _)| index),
        };

        index
            .map(|index| ClientKey {
                index,
                generation: self.generation,
                _client: PhantomData,
            })
            .ok_or_else(|| self.missing_client::<T>())
    }

    fn check_generation<T>(&self, key_generation: Generation) -> Result<(), ConfigurationError> {
        if key_generation == self.generation {
            Ok(())
        } else {
            Err(ConfigurationError::StaleKey {
                dependency: type_name::<T>(),
                key_generation: key_generation.get(),
                live_generation: self.generation.get(),
            })
        }
    }

    fn missing_client<T>(&self) -> ConfigurationError {
        ConfigurationError::MissingClient {
            scope: self.name.clone(),
            dependency: type_name::<T>(),
        }
    }

    fn missing_component<T>(&self) -> ConfigurationError {
        ConfigurationError::MissingComponent {
            scope: self.name.clone(),
            dependency: type_name::<T>(),
        }
    }

    /// Initialize every component, then every client, in creation order
    pub(crate) fn initialize(&mut self) -> Result<(), ProcessError> {
        let poster = self.poster();
        for entry in self.components.iter_mut() {
            entry
                .component
                .initialize(&poster)
                .map_err(|source| ProcessError::hook("initialize", entry.type_name, source))?;
        }

        for entry in self.clients.iter_mut() {
            let mut ctx =
                ClientContext::new(entry.source(), self.generation, &self.registry, &self.events);
            entry
                .client
                .initialize(&mut ctx)
                .map_err(|source| ProcessError::hook("initialize", entry.type_name, source))?;
        }

        Ok(())
    }

    /// Check that every requirement is satisfied
    pub(crate) fn validate<'r>(
        &self,
        requirements: impl IntoIterator<Item = &'r Requirement>,
    ) -> Result<(), ConfigurationError> {
        for requirement in requirements {
            let present = match requirement.dependency {
                Dependency::Client => self
                    .clients
                    .iter()
                    .any(|entry| entry.type_id == requirement.type_id),
                Dependency::Component => self
                    .components
                    .iter()
                    .any(|entry| entry.type_id == requirement.type_id),
            };

            if !present {
                return Err(match requirement.dependency {
                    Dependency::Client => ConfigurationError::MissingClient {
                        scope: self.name.clone(),
                        dependency: requirement.type_name,
                    },
                    Dependency::Component => ConfigurationError::MissingComponent {
                        scope: self.name.clone(),
                        dependency: requirement.type_name,
                    },
                });
            }
        }
        Ok(())
    }

    /// Hand a live event to the client it originated from
    pub(crate) fn dispatch(&mut self, event: &Event) {
        let source = event.source();
        let Some(client_name) = source.client else {
            return;
        };

        let Some(entry) = self.clients.iter_mut().find(|entry| {
            entry.type_name == client_name
                && (source.orthogonal.is_none() || source.orthogonal == entry.orthogonal)
        }) else {
            return;
        };

        let mut ctx = ClientContext::new(entry.source(), self.generation, &self.registry, &self.events);
        entry.client.on_event(event, &mut ctx);
    }

    /// Tear the scope down, returning the number of requests its clients leaked.
    ///
    /// Clients are torn down in reverse creation order, then components.
    /// Afterwards the scope's generation is retired: every request still
    /// registered under it is cancelled and the resulting `Cancelled` events
    /// are enqueued, where they will be discarded as stale.
    pub(crate) fn teardown(&mut self) -> usize {
        let mut leaked = 0;
        for entry in self.clients.iter_mut().rev() {
            let source = entry.source();
            let mut ctx = ClientContext::new(source, self.generation, &self.registry, &self.events);
            entry.client.teardown(&mut ctx);

            let outstanding = self.registry.outstanding_for(self.generation, source);
            if outstanding > 0 {
                error!(
                    scope = %self.name,
                    generation = %self.generation,
                    client = entry.type_name,
                    outstanding,
                    "client left requests outstanding at teardown"
                );
                leaked += outstanding;
            }
        }

        for entry in self.components.iter_mut().rev() {
            entry.component.teardown();
        }

        for event in self.registry.retire(self.generation) {
            self.events.enqueue(event);
        }

        debug!(scope = %self.name, generation = %self.generation, "scope torn down");
        self.clients.clear();
        self.components.clear();
        leaked
    }
}

/// The handle orthogonals and mode-states fill a scope through while it is
/// being constructed.
pub struct ScopeBuilder<'a> {
    scope: &'a mut Scope,
    orthogonal: Option<&'static str>,
}

impl<'a> ScopeBuilder<'a> {
    pub(crate) fn new(scope: &'a mut Scope, orthogonal: Option<&'static str>) -> Self {
        Self { scope, orthogonal }
    }

    /// Create a client owned by the orthogonal being initialized
    pub fn create_client<T: Client>(&mut self, client: T) -> ClientKey<T> {
        let index = self.scope.clients.len();
        self.scope.clients.push(ClientEntry {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            orthogonal: self.orthogonal,
            client: Box::new(client),
        });

        ClientKey {
            index,
            generation: self.scope.generation,
            _client: PhantomData,
        }
    }

    /// Create a component shared across the scope
    pub fn create_component<T: Component>(&mut self, component: T) -> ComponentKey<T> {
        let index = self.scope.components.len();
        self.scope.components.push(ComponentEntry {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            component: Box::new(component),
        });

        ComponentKey {
            index,
            generation: self.scope.generation,
            _component: PhantomData,
        }
    }

    /// The orthogonal being initialized, if any
    pub fn orthogonal(&self) -> Option<&'static str> {
        self.orthogonal
    }

    /// The scope being constructed
    pub fn scope(&self) -> &Scope {
        &*self.scope
    }
}
