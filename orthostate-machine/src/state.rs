//!
//! Inner States and Transition Tables
//!
//! An inner state is declared with a [`StateDef`]: its identity, the
//! orthogonal slots it configures on entry, its state reactors and its
//! transition table.  Transition tables are plain lists of [`Reaction`]s
//! searched in declaration order, so when two entries could match the same
//! event the one declared first wins.
//!

use std::{any::type_name, fmt};

use orthostate_core::{Event, EventKind, HookError};

use crate::{
    client::{Client, Component},
    context::ScopeContext,
    mode_state::Parameters,
    orthogonal::Behavior,
    reactor::StateReactor,
    scope::Requirement,
};

/// The identity of a state or mode-state.
///
/// Usually a fieldless enum.
pub trait StateId: Copy + Eq + std::hash::Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> StateId for T where T: Copy + Eq + std::hash::Hash + fmt::Debug + Send + Sync + 'static {}

/// The user side of an inner state.
///
/// A fresh instance is built every time the state is entered and dropped
/// when it exits.
pub trait State: Send {
    /// Resolve dependencies and prepare the entry, after the state's
    /// orthogonal slots have been reconfigured
    fn runtime_configure(&mut self, _ctx: &mut ScopeContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    /// Called when the state is entered
    fn on_entry(&mut self, _ctx: &mut ScopeContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    /// Called when the state is left
    fn on_exit(&mut self, _ctx: &mut ScopeContext<'_>) -> Result<(), HookError> {
        Ok(())
    }
}

/// A state without hooks
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyState;

impl State for EmptyState {}

/// How a transition is reported in the status signal and logs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TransitionTag {
    /// An ordinary transition
    #[default]
    Default,
    /// The transition is the success path of the state
    Success,
    /// The transition is the failure path of the state
    Abort,
    /// The transition interrupts the state
    Preempt,
}

/// Which events a reaction responds to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventPattern {
    kind: EventKind,
    client: Option<&'static str>,
    orthogonal: Option<&'static str>,
}

impl EventPattern {
    /// Match every event of the given kind
    pub const fn new(kind: EventKind) -> Self {
        Self {
            kind,
            client: None,
            orthogonal: None,
        }
    }

    /// Match `Succeeded` events
    pub const fn succeeded() -> Self {
        Self::new(EventKind::Succeeded)
    }

    /// Match `Aborted` events
    pub const fn aborted() -> Self {
        Self::new(EventKind::Aborted)
    }

    /// Match `Preempted` events
    pub const fn preempted() -> Self {
        Self::new(EventKind::Preempted)
    }

    /// Match `Timeout` events
    pub const fn timeout() -> Self {
        Self::new(EventKind::Timeout)
    }

    /// Match `Cancelled` events
    pub const fn cancelled() -> Self {
        Self::new(EventKind::Cancelled)
    }

    /// Match the named custom event
    pub const fn custom(name: &'static str) -> Self {
        Self::new(EventKind::Custom(name))
    }

    /// Only match events originating from a client of type `T`
    pub fn from_client<T: Client>(mut self) -> Self {
        self.client = Some(type_name::<T>());
        self
    }

    /// Only match events originating from the given orthogonal slot
    pub const fn on_orthogonal(mut self, slot: &'static str) -> Self {
        self.orthogonal = Some(slot);
        self
    }

    /// Whether the pattern matches the event
    pub fn matches(&self, event: &Event) -> bool {
        let source = event.source();
        self.kind == event.kind()
            && self.client.map_or(true, |client| source.client == Some(client))
            && self
                .orthogonal
                .map_or(true, |orthogonal| source.orthogonal == Some(orthogonal))
    }
}

impl From<EventKind> for EventPattern {
    fn from(kind: EventKind) -> Self {
        Self::new(kind)
    }
}

pub(crate) type Action =
    Box<dyn Fn(&Event, &mut ScopeContext<'_>) -> Result<(), HookError> + Send + Sync>;
pub(crate) type StateFactory = Box<dyn Fn(&Parameters) -> Box<dyn State> + Send + Sync>;
pub(crate) type BehaviorFactory = Box<dyn Fn(&Parameters) -> Box<dyn Behavior> + Send + Sync>;
pub(crate) type ReactorFactory = Box<dyn Fn() -> Box<dyn StateReactor> + Send + Sync>;

/// One entry of a transition table
pub struct Reaction<S> {
    pub(crate) pattern: EventPattern,
    pub(crate) target: Option<S>,
    pub(crate) tag: TransitionTag,
    pub(crate) action: Option<Action>,
}

impl<S: StateId> Reaction<S> {
    /// A transition to `target`
    pub fn transition(pattern: impl Into<EventPattern>, target: S) -> Self {
        Self {
            pattern: pattern.into(),
            target: Some(target),
            tag: TransitionTag::Default,
            action: None,
        }
    }

    /// A reaction that runs `action` without leaving the state
    pub fn internal<F>(pattern: impl Into<EventPattern>, action: F) -> Self
    where
        F: Fn(&Event, &mut ScopeContext<'_>) -> Result<(), HookError> + Send + Sync + 'static,
    {
        Self {
            pattern: pattern.into(),
            target: None,
            tag: TransitionTag::Default,
            action: Some(Box::new(action)),
        }
    }

    /// Report the transition under the given tag
    pub fn tagged(mut self, tag: TransitionTag) -> Self {
        self.tag = tag;
        self
    }

    /// Run `action` between exiting the source and entering the target
    pub fn with_action<F>(mut self, action: F) -> Self
    where
        F: Fn(&Event, &mut ScopeContext<'_>) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.action = Some(Box::new(action));
        self
    }

    /// The events this reaction responds to
    pub fn pattern(&self) -> EventPattern {
        self.pattern
    }

    /// The target state, or `None` for an internal reaction
    pub fn target(&self) -> Option<S> {
        self.target
    }

    /// The reporting tag
    pub fn tag(&self) -> TransitionTag {
        self.tag
    }
}

impl<S: fmt::Debug> fmt::Debug for Reaction<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction")
            .field("pattern", &self.pattern)
            .field("target", &self.target)
            .field("tag", &self.tag)
            .field("action", &self.action.is_some())
            .finish()
    }
}

/// The first reaction of a table matching the event
pub(crate) fn find_reaction<'r, S>(reactions: &'r [Reaction<S>], event: &Event) -> Option<&'r Reaction<S>> {
    reactions.iter().find(|reaction| reaction.pattern.matches(event))
}

/// The declaration of an inner state
pub struct StateDef<S> {
    pub(crate) id: S,
    pub(crate) factory: StateFactory,
    pub(crate) configurations: Vec<(&'static str, BehaviorFactory)>,
    pub(crate) reactions: Vec<Reaction<S>>,
    pub(crate) reactors: Vec<ReactorFactory>,
    pub(crate) requirements: Vec<Requirement>,
}

impl<S: StateId> StateDef<S> {
    /// Declare a state without hooks, configurations or reactions
    pub fn new(id: S) -> Self {
        Self {
            id,
            factory: Box::new(|_: &Parameters| -> Box<dyn State> { Box::new(EmptyState) }),
            configurations: Vec::new(),
            reactions: Vec::new(),
            reactors: Vec::new(),
            requirements: Vec::new(),
        }
    }

    /// Build the state's hooks from the mode-state parameters on every entry
    pub fn with_state<T, F>(mut self, factory: F) -> Self
    where
        T: State + 'static,
        F: Fn(&Parameters) -> T + Send + Sync + 'static,
    {
        self.factory = Box::new(move |params: &Parameters| -> Box<dyn State> {
            Box::new(factory(params))
        });
        self
    }

    /// Configure an orthogonal slot with a fresh behavior on every entry.
    ///
    /// Configuring the same slot again replaces the earlier configuration.
    pub fn configure<B, F>(mut self, slot: &'static str, factory: F) -> Self
    where
        B: Behavior + 'static,
        F: Fn(&Parameters) -> B + Send + Sync + 'static,
    {
        let build: BehaviorFactory = Box::new(move |params: &Parameters| -> Box<dyn Behavior> {
            Box::new(factory(params))
        });
        match self.configurations.iter_mut().find(|(name, _)| *name == slot) {
            Some((_, existing)) => *existing = build,
            None => self.configurations.push((slot, build)),
        }
        self
    }

    /// Transition to `target` on a matching event
    pub fn on(self, pattern: impl Into<EventPattern>, target: S) -> Self {
        self.reaction(Reaction::transition(pattern, target))
    }

    /// Transition to `target` on a matching event, reported under `tag`
    pub fn on_tagged(self, pattern: impl Into<EventPattern>, target: S, tag: TransitionTag) -> Self {
        self.reaction(Reaction::transition(pattern, target).tagged(tag))
    }

    /// Transition to `target` on a matching event, running `action` in between
    pub fn on_with<F>(self, pattern: impl Into<EventPattern>, target: S, action: F) -> Self
    where
        F: Fn(&Event, &mut ScopeContext<'_>) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.reaction(Reaction::transition(pattern, target).with_action(action))
    }

    /// Run `action` on a matching event without leaving the state
    pub fn on_internal<F>(self, pattern: impl Into<EventPattern>, action: F) -> Self
    where
        F: Fn(&Event, &mut ScopeContext<'_>) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.reaction(Reaction::internal(pattern, action))
    }

    /// Append a reaction to the transition table
    pub fn reaction(mut self, reaction: Reaction<S>) -> Self {
        self.reactions.push(reaction);
        self
    }

    /// Attach a state reactor, built fresh on every entry
    pub fn reactor<R, F>(mut self, factory: F) -> Self
    where
        R: StateReactor + 'static,
        F: Fn() -> R + Send + Sync + 'static,
    {
        self.reactors
            .push(Box::new(move || -> Box<dyn StateReactor> { Box::new(factory()) }));
        self
    }

    /// Require a client of type `T` to exist in the mode-state's scope
    pub fn requires_client<T: Client>(mut self) -> Self {
        self.requirements.push(Requirement::client::<T>());
        self
    }

    /// Require a component of type `T` to exist in the mode-state's scope
    pub fn requires_component<T: Component>(mut self) -> Self {
        self.requirements.push(Requirement::component::<T>());
        self
    }

    /// The identity of the state
    pub fn id(&self) -> S {
        self.id
    }

    /// The transition table in declaration order
    pub fn reactions(&self) -> &[Reaction<S>] {
        &self.reactions
    }
}
