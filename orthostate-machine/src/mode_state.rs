//!
//! Mode-States
//!
//! A mode-state is the root of a scope.  It declares a fixed set of named
//! orthogonal slots, the inner states living inside it, its own transition
//! table and the numeric parameters its states and behaviors are built from.
//!

use std::fmt;

use orthostate_core::{Event, HookError};

use crate::{
    client::{Client, Component},
    context::ScopeContext,
    orthogonal::Orthogonal,
    scope::{Requirement, ScopeBuilder},
    state::{EventPattern, Reaction, StateDef, StateId, TransitionTag},
};

/// The user side of a mode-state.
///
/// A fresh instance is built for every entry of the mode-state.
pub trait ModeState: Send {
    /// Create mode-wide components, after every orthogonal has initialized
    fn on_initialize(&mut self, _scope: &mut ScopeBuilder<'_>) -> Result<(), HookError> {
        Ok(())
    }

    /// Called once the scope is fully constructed, before the initial inner
    /// state is entered
    fn on_entry(&mut self, _ctx: &mut ScopeContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    /// Called after the inner state and every behavior have exited, before
    /// the scope is torn down
    fn on_exit(&mut self, _ctx: &mut ScopeContext<'_>) -> Result<(), HookError> {
        Ok(())
    }
}

/// A mode-state without hooks
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyModeState;

impl ModeState for EmptyModeState {}

/// Named numeric values fixed when the machine is composed
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Parameters {
    values: Vec<(&'static str, f64)>,
}

impl Parameters {
    /// Create an empty parameter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter, replacing any earlier value
    pub fn set(&mut self, name: &'static str, value: f64) {
        match self.values.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, existing)) => *existing = value,
            None => self.values.push((name, value)),
        }
    }

    /// Builder form of [`Parameters::set`]
    pub fn with(mut self, name: &'static str, value: f64) -> Self {
        self.set(name, value);
        self
    }

    /// The value of a parameter
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(existing, _)| *existing == name)
            .map(|(_, value)| *value)
    }

    /// The value of a parameter or a default
    pub fn get_or(&self, name: &str, default: f64) -> f64 {
        self.get(name).unwrap_or(default)
    }

    /// Every parameter in the order it was first set
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.values.iter().copied()
    }

    /// The number of parameters
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no parameters
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub(crate) type OrthogonalFactory = Box<dyn Fn() -> Box<dyn Orthogonal> + Send + Sync>;
pub(crate) type ModeStateFactory = Box<dyn Fn(&Parameters) -> Box<dyn ModeState> + Send + Sync>;

/// The declaration of a mode-state
pub struct ModeStateDef<S> {
    pub(crate) id: S,
    pub(crate) orthogonals: Vec<(&'static str, OrthogonalFactory)>,
    pub(crate) states: Vec<StateDef<S>>,
    pub(crate) initial: Option<S>,
    pub(crate) reactions: Vec<Reaction<S>>,
    pub(crate) params: Parameters,
    pub(crate) requirements: Vec<Requirement>,
    pub(crate) hooks: ModeStateFactory,
}

impl<S: StateId> ModeStateDef<S> {
    /// Declare an empty mode-state
    pub fn new(id: S) -> Self {
        Self {
            id,
            orthogonals: Vec::new(),
            states: Vec::new(),
            initial: None,
            reactions: Vec::new(),
            params: Parameters::new(),
            requirements: Vec::new(),
            hooks: Box::new(|_: &Parameters| -> Box<dyn ModeState> { Box::new(EmptyModeState) }),
        }
    }

    /// Declare an orthogonal slot.
    ///
    /// Slots are constructed and initialized in declaration order on every
    /// entry of the mode-state.
    pub fn orthogonal<O, F>(mut self, slot: &'static str, factory: F) -> Self
    where
        O: Orthogonal + 'static,
        F: Fn() -> O + Send + Sync + 'static,
    {
        self.orthogonals.push((
            slot,
            Box::new(move || -> Box<dyn Orthogonal> { Box::new(factory()) }),
        ));
        self
    }

    /// Declare an inner state
    pub fn state(mut self, state: StateDef<S>) -> Self {
        self.states.push(state);
        self
    }

    /// The inner state entered when the mode-state is entered directly
    pub fn initial(mut self, state: S) -> Self {
        self.initial = Some(state);
        self
    }

    /// Set a parameter available to every state and behavior factory
    pub fn param(mut self, name: &'static str, value: f64) -> Self {
        self.params.set(name, value);
        self
    }

    /// Build the mode-state's hooks from its parameters on every entry
    pub fn hooks<M, F>(mut self, factory: F) -> Self
    where
        M: ModeState + 'static,
        F: Fn(&Parameters) -> M + Send + Sync + 'static,
    {
        self.hooks = Box::new(move |params: &Parameters| -> Box<dyn ModeState> {
            Box::new(factory(params))
        });
        self
    }

    /// Transition to `target` on a matching event not handled by the active
    /// inner state
    pub fn on(self, pattern: impl Into<EventPattern>, target: S) -> Self {
        self.reaction(Reaction::transition(pattern, target))
    }

    /// Like [`ModeStateDef::on`], reported under `tag`
    pub fn on_tagged(self, pattern: impl Into<EventPattern>, target: S, tag: TransitionTag) -> Self {
        self.reaction(Reaction::transition(pattern, target).tagged(tag))
    }

    /// Like [`ModeStateDef::on`], running `action` between the old scope's
    /// exit and its teardown
    pub fn on_with<F>(self, pattern: impl Into<EventPattern>, target: S, action: F) -> Self
    where
        F: Fn(&Event, &mut ScopeContext<'_>) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.reaction(Reaction::transition(pattern, target).with_action(action))
    }

    /// Run `action` on a matching event without leaving any state
    pub fn on_internal<F>(self, pattern: impl Into<EventPattern>, action: F) -> Self
    where
        F: Fn(&Event, &mut ScopeContext<'_>) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.reaction(Reaction::internal(pattern, action))
    }

    /// Append a reaction to the mode-state's transition table
    pub fn reaction(mut self, reaction: Reaction<S>) -> Self {
        self.reactions.push(reaction);
        self
    }

    /// Require a client of type `T` to exist once the scope is constructed
    pub fn requires_client<T: Client>(mut self) -> Self {
        self.requirements.push(Requirement::client::<T>());
        self
    }

    /// Require a component of type `T` to exist once the scope is constructed
    pub fn requires_component<T: Component>(mut self) -> Self {
        self.requirements.push(Requirement::component::<T>());
        self
    }

    /// The identity of the mode-state
    pub fn id(&self) -> S {
        self.id
    }

    /// The declared parameters
    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub(crate) fn slot_index(&self, slot: &str) -> Option<usize> {
        self.orthogonals.iter().position(|(name, _)| *name == slot)
    }

    /// Every requirement of the mode-state and its inner states
    pub(crate) fn all_requirements(&self) -> impl Iterator<Item = &Requirement> {
        self.requirements
            .iter()
            .chain(self.states.iter().flat_map(|state| state.requirements.iter()))
    }
}

impl<S: fmt::Debug> fmt::Debug for ModeStateDef<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeStateDef")
            .field("id", &self.id)
            .field(
                "orthogonals",
                &self.orthogonals.iter().map(|(name, _)| *name).collect::<Vec<_>>(),
            )
            .field("states", &self.states.iter().map(|state| &state.id).collect::<Vec<_>>())
            .field("initial", &self.initial)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters_replace_and_default() {
        let params = Parameters::new()
            .with("radius", 3.0)
            .with("rays", 8.0)
            .with("radius", 4.5);

        assert_eq!(params.len(), 2);
        assert_eq!(params.get("radius"), Some(4.5));
        assert_eq!(params.get_or("speed", 0.2), 0.2);
        assert_eq!(params.iter().collect::<Vec<_>>(), vec![("radius", 4.5), ("rays", 8.0)]);
    }
}
