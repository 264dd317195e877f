//!
//! The State Machine
//!
//! [`StateMachine`] is the [`EventProcessor`] the scheduler drives.  It owns
//! the active mode-state's scope, its orthogonal slots and its active inner
//! state, and applies one event at a time:
//!
//! 1. An event tagged with a retired scope generation is discarded as stale.
//! 2. The event is handed to the client it originated from, then to the
//!    active state's reactors.
//! 3. The active inner state's table is searched, then the mode-state's
//!    table.  The first declared matching reaction wins.  No match leaves
//!    everything untouched.
//! 4. The reaction is applied.  A target inside the active mode-state is an
//!    inner transition; any other target (including the active mode-state
//!    itself) tears the whole scope down and builds the target mode-state.
//!
//! An inner transition runs, in order: the exiting state's exit hook, the
//! transition action, the reconfiguration of every slot the entering state
//! configures (old behavior exits, new behavior is built), the entering
//! state's construction, its runtime configuration hook, its entry hook, the
//! entry hooks of the newly configured behaviors and finally the construction
//! of its state reactors.
//!
//! A mode-state transition runs the exit hooks of the inner state, of every
//! active behavior and of the mode-state, then the transition action, then
//! tears the scope down (clients cancel their requests and the generation is
//! retired).  Only then is the target's scope constructed: orthogonals
//! initialize in declaration order, the mode-state initializes, components
//! and clients initialize, requirements are validated, initial behaviors and
//! the mode-state are entered and finally the target inner state is entered.
//!

use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

use orthostate_core::{
    ConfigurationError, Envelope, Event, EventProcessor, EventQueue, Generation, ProcessError,
    RequestRegistry,
};
use orthostate_signals::{Connections, Signal};

use crate::{
    context::ScopeContext,
    definition::{Location, MachineDefinition},
    mode_state::{ModeState, ModeStateDef},
    orthogonal::{ActiveBehavior, OrthogonalSlot, SlotConfiguration},
    reactor::StateReactor,
    scope::{Scope, ScopeBuilder},
    state::{find_reaction, Reaction, State, StateDef, StateId, TransitionTag},
};

/// Counters for the conditions the machine reports as diagnostics rather
/// than errors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MachineStats {
    /// Live events applied (whether or not they matched a reaction)
    pub applied: u64,
    /// Transitions taken, internal reactions excluded
    pub transitions: u64,
    /// Events that matched no reaction and were dropped
    pub unmatched: u64,
    /// Events for a retired scope generation that were discarded
    pub stale_discarded: u64,
    /// Requests clients left outstanding at teardown
    pub leaked_requests: u64,
}

/// What the machine reports after every completed transition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MachineStatus<S> {
    /// The active mode-state
    pub mode: S,
    /// The active inner state
    pub state: S,
    /// The generation of the active scope
    pub generation: Generation,
    /// The tag of the transition that led here
    pub tag: TransitionTag,
}

/// A snapshot of the machine's active configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Configuration<S> {
    /// The active mode-state
    pub mode: S,
    /// The active inner state
    pub state: Option<S>,
    /// The generation of the active scope
    pub generation: Generation,
    /// Every orthogonal slot in declaration order
    pub slots: Vec<SlotConfiguration>,
}

/// The active inner state
struct ActiveState {
    index: usize,
    instance: Box<dyn State>,
    connections: Connections,
    reactors: Vec<Box<dyn StateReactor>>,
}

/// The active mode-state and everything scoped to it
struct ActiveMode {
    index: usize,
    scope: Scope,
    hooks: Box<dyn ModeState>,
    connections: Connections,
    slots: Vec<OrthogonalSlot>,
    state: Option<ActiveState>,
}

impl ActiveMode {
    /// Build the orthogonals, initialize the scope and enter the initial
    /// behaviors and the mode-state itself
    fn construct<S: StateId>(
        &mut self,
        mode_def: &ModeStateDef<S>,
        serials: &mut u64,
    ) -> Result<(), ProcessError> {
        let mode_name = format!("{:?}", mode_def.id);

        for (slot, factory) in mode_def.orthogonals.iter() {
            let mut orthogonal = factory();
            orthogonal
                .on_initialize(&mut ScopeBuilder::new(&mut self.scope, Some(*slot)))
                .map_err(|source| ProcessError::hook("on_initialize", *slot, source))?;
            self.slots.push(OrthogonalSlot {
                name: *slot,
                orthogonal,
                active: None,
            });
        }

        self.hooks
            .on_initialize(&mut ScopeBuilder::new(&mut self.scope, None))
            .map_err(|source| ProcessError::hook("on_initialize", mode_name.as_str(), source))?;
        self.scope.initialize()?;
        self.scope.validate(mode_def.all_requirements())?;

        for slot in self.slots.iter_mut() {
            let Some(behavior) = slot.orthogonal.initial_behavior() else {
                continue;
            };

            *serials += 1;
            let name = behavior.name();
            let mut active = ActiveBehavior {
                behavior,
                serial: *serials,
                connections: Connections::new(),
            };
            let mut ctx = ScopeContext::new(
                &mut self.scope,
                &mode_def.params,
                &mut active.connections,
                Some(slot.name),
            );
            active
                .behavior
                .on_entry(&mut ctx)
                .map_err(|source| ProcessError::hook("on_entry", name, source))?;
            slot.active = Some(active);
        }

        let mut ctx = ScopeContext::new(&mut self.scope, &mode_def.params, &mut self.connections, None);
        self.hooks
            .on_entry(&mut ctx)
            .map_err(|source| ProcessError::hook("on_entry", mode_name, source))
    }

    /// Replace the behavior of every slot the state configures, returning
    /// the indices of the touched slots
    fn reconfigure<S: StateId>(
        &mut self,
        mode_def: &ModeStateDef<S>,
        state_def: &StateDef<S>,
        serials: &mut u64,
    ) -> Result<Vec<usize>, ProcessError> {
        let mut touched = Vec::with_capacity(state_def.configurations.len());

        for (slot_name, factory) in state_def.configurations.iter() {
            let index = mode_def.slot_index(slot_name).ok_or_else(|| {
                ConfigurationError::UnknownOrthogonal {
                    state: format!("{:?}", state_def.id),
                    mode: format!("{:?}", mode_def.id),
                    slot: *slot_name,
                }
            })?;

            let slot = &mut self.slots[index];
            if let Some(mut previous) = slot.active.take() {
                let name = previous.behavior.name();
                let mut ctx = ScopeContext::new(
                    &mut self.scope,
                    &mode_def.params,
                    &mut previous.connections,
                    Some(slot.name),
                );
                previous
                    .behavior
                    .on_exit(&mut ctx)
                    .map_err(|source| ProcessError::hook("on_exit", name, source))?;
            }

            *serials += 1;
            slot.active = Some(ActiveBehavior {
                behavior: factory(&mode_def.params),
                serial: *serials,
                connections: Connections::new(),
            });
            touched.push(index);
        }

        Ok(touched)
    }

    /// Enter an inner state of this mode-state
    fn enter_state<S: StateId>(
        &mut self,
        mode_def: &ModeStateDef<S>,
        state_index: usize,
        serials: &mut u64,
    ) -> Result<(), ProcessError> {
        let state_def = &mode_def.states[state_index];
        let location = format!("{:?}", state_def.id);

        let touched = self.reconfigure(mode_def, state_def, serials)?;

        let mut instance = (state_def.factory)(&mode_def.params);
        let mut connections = Connections::new();
        let mut ctx = ScopeContext::new(&mut self.scope, &mode_def.params, &mut connections, None);
        instance
            .runtime_configure(&mut ctx)
            .map_err(|source| ProcessError::hook("runtime_configure", location.as_str(), source))?;
        instance
            .on_entry(&mut ctx)
            .map_err(|source| ProcessError::hook("on_entry", location.as_str(), source))?;

        for index in touched {
            let slot = &mut self.slots[index];
            let Some(active) = slot.active.as_mut() else {
                continue;
            };

            let name = active.behavior.name();
            let mut ctx = ScopeContext::new(
                &mut self.scope,
                &mode_def.params,
                &mut active.connections,
                Some(slot.name),
            );
            active
                .behavior
                .on_entry(&mut ctx)
                .map_err(|source| ProcessError::hook("on_entry", name, source))?;
        }

        debug!(state = %location, scope = %self.scope.generation(), "entered state");
        self.state = Some(ActiveState {
            index: state_index,
            instance,
            connections,
            reactors: state_def.reactors.iter().map(|factory| factory()).collect(),
        });
        Ok(())
    }

    /// Exit the active inner state, dropping its connections and reactors
    fn exit_state<S: StateId>(&mut self, mode_def: &ModeStateDef<S>) -> Result<(), ProcessError> {
        let Some(mut state) = self.state.take() else {
            return Ok(());
        };

        let id = mode_def.states[state.index].id;
        let mut ctx = ScopeContext::new(&mut self.scope, &mode_def.params, &mut state.connections, None);
        state
            .instance
            .on_exit(&mut ctx)
            .map_err(|source| ProcessError::hook("on_exit", format!("{id:?}"), source))
    }

    /// Exit the inner state, every behavior (last slot first) and the
    /// mode-state
    fn exit_all<S: StateId>(&mut self, mode_def: &ModeStateDef<S>) -> Result<(), ProcessError> {
        self.exit_state(mode_def)?;

        for slot in self.slots.iter_mut().rev() {
            let Some(mut active) = slot.active.take() else {
                continue;
            };

            let name = active.behavior.name();
            let mut ctx = ScopeContext::new(
                &mut self.scope,
                &mode_def.params,
                &mut active.connections,
                Some(slot.name),
            );
            active
                .behavior
                .on_exit(&mut ctx)
                .map_err(|source| ProcessError::hook("on_exit", name, source))?;
        }

        let mut ctx = ScopeContext::new(&mut self.scope, &mode_def.params, &mut self.connections, None);
        self.hooks
            .on_exit(&mut ctx)
            .map_err(|source| ProcessError::hook("on_exit", format!("{:?}", mode_def.id), source))
    }

    /// Drop every instance scoped to the mode-state and tear the scope down,
    /// returning the number of leaked requests
    fn teardown(&mut self) -> usize {
        self.state = None;
        self.slots.clear();
        self.connections.disconnect_all();
        self.scope.teardown()
    }

    /// Feed an event to the active state's reactors, posting their answers
    fn feed_reactors(&mut self, event: &Event) {
        let Some(state) = self.state.as_mut() else {
            return;
        };

        let poster = self.scope.poster();
        for reactor in state.reactors.iter_mut() {
            if let Some(output) = reactor.on_event(event) {
                trace!(%output, "state reactor posted an event");
                poster.post_event(output);
            }
        }
    }

    fn run_action<S: StateId>(
        &mut self,
        mode_def: &ModeStateDef<S>,
        reaction: &Reaction<S>,
        event: &Event,
        in_state: bool,
    ) -> Result<(), ProcessError> {
        let Some(action) = reaction.action.as_ref() else {
            return Ok(());
        };

        let connections = match (in_state, self.state.as_mut()) {
            (true, Some(state)) => &mut state.connections,
            _ => &mut self.connections,
        };
        let mut ctx = ScopeContext::new(&mut self.scope, &mode_def.params, connections, None);
        action(event, &mut ctx).map_err(|source| {
            ProcessError::hook("action", format!("{:?} on {}", mode_def.id, event), source)
        })
    }
}

/// The orthogonal state machine driven by the event scheduler
pub struct StateMachine<S: StateId> {
    definition: Arc<MachineDefinition<S>>,
    registry: RequestRegistry,
    events: EventQueue,
    next_generation: Generation,
    next_serial: u64,
    active: Option<ActiveMode>,
    stats: MachineStats,
    status: Signal<MachineStatus<S>>,
}

impl<S: StateId> StateMachine<S> {
    /// Create a machine that registers requests in `registry` and posts
    /// events to `events`.
    ///
    /// The machine stays idle until [`EventProcessor::initiate`] is called.
    pub fn new(
        definition: Arc<MachineDefinition<S>>,
        registry: RequestRegistry,
        events: EventQueue,
    ) -> Self {
        Self {
            definition,
            registry,
            events,
            next_generation: Generation::FIRST,
            next_serial: 0,
            active: None,
            stats: MachineStats::default(),
            status: Signal::new(),
        }
    }

    /// The definition the machine runs
    pub fn definition(&self) -> &Arc<MachineDefinition<S>> {
        &self.definition
    }

    /// The diagnostic counters
    pub fn stats(&self) -> MachineStats {
        self.stats
    }

    /// The signal emitted after every completed transition
    pub fn status_signal(&self) -> &Signal<MachineStatus<S>> {
        &self.status
    }

    /// Whether a mode-state is active
    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    /// The active mode-state
    pub fn current_mode(&self) -> Option<S> {
        self.active
            .as_ref()
            .map(|mode| self.definition.modes[mode.index].id)
    }

    /// The active inner state
    pub fn current_state(&self) -> Option<S> {
        let mode = self.active.as_ref()?;
        let state = mode.state.as_ref()?;
        Some(self.definition.modes[mode.index].states[state.index].id)
    }

    /// The scope of the active mode-state
    pub fn scope(&self) -> Option<&Scope> {
        self.active.as_ref().map(|mode| &mode.scope)
    }

    /// A snapshot of the active configuration
    pub fn configuration(&self) -> Option<Configuration<S>> {
        let mode = self.active.as_ref()?;
        Some(Configuration {
            mode: self.definition.modes[mode.index].id,
            state: self.current_state(),
            generation: mode.scope.generation(),
            slots: mode.slots.iter().map(OrthogonalSlot::configuration).collect(),
        })
    }

    fn apply(&mut self, event: Event) -> Result<(), ProcessError> {
        let definition = self.definition.clone();
        let Some(mode) = self.active.as_mut() else {
            warn!(%event, "event arrived while no mode-state is active");
            return Ok(());
        };

        let live = mode.scope.generation();
        if event.generation().is_some_and(|generation| generation != live) {
            self.stats.stale_discarded += 1;
            debug!(%event, live = %live, "discarding event for a retired scope");
            return Ok(());
        }
        self.stats.applied += 1;

        mode.scope.dispatch(&event);
        mode.feed_reactors(&event);

        let mode_index = mode.index;
        let mode_def = &definition.modes[mode_index];
        let state_index = mode.state.as_ref().map(|state| state.index);
        let from_state = state_index
            .and_then(|index| find_reaction(&mode_def.states[index].reactions, &event))
            .map(|reaction| (reaction, true));
        let Some((reaction, in_state)) =
            from_state.or_else(|| find_reaction(&mode_def.reactions, &event).map(|reaction| (reaction, false)))
        else {
            self.stats.unmatched += 1;
            debug!(%event, state = ?self.current_state(), "no transition matches event");
            return Ok(());
        };

        let Some(target) = reaction.target else {
            trace!(%event, "internal reaction");
            return mode.run_action(mode_def, reaction, &event, in_state);
        };

        let location = definition
            .locate(target)
            .ok_or_else(|| ConfigurationError::UnknownState {
                from: format!("{:?}", mode_def.id),
                target: format!("{target:?}"),
            })?;

        let source = self.current_state();
        match location {
            Location::State { mode: target_mode, state } if target_mode == mode_index => {
                self.transition_inner(&definition, reaction, &event, state)?
            }
            Location::State { mode: target_mode, state } => {
                self.transition_mode(&definition, reaction, &event, target_mode, Some(state))?
            }
            Location::Mode(target_mode) => {
                self.transition_mode(&definition, reaction, &event, target_mode, None)?
            }
        }

        self.stats.transitions += 1;
        info!(
            from = ?source,
            to = ?self.current_state(),
            tag = ?reaction.tag,
            %event,
            "transition"
        );
        self.publish(reaction.tag);
        Ok(())
    }

    fn transition_inner(
        &mut self,
        definition: &MachineDefinition<S>,
        reaction: &Reaction<S>,
        event: &Event,
        target_state: usize,
    ) -> Result<(), ProcessError> {
        let Some(mode) = self.active.as_mut() else {
            return Ok(());
        };
        let mode_def = &definition.modes[mode.index];

        mode.exit_state(mode_def)?;
        mode.run_action(mode_def, reaction, event, false)?;
        mode.enter_state(mode_def, target_state, &mut self.next_serial)
    }

    fn transition_mode(
        &mut self,
        definition: &MachineDefinition<S>,
        reaction: &Reaction<S>,
        event: &Event,
        target_mode: usize,
        target_state: Option<usize>,
    ) -> Result<(), ProcessError> {
        if let Some(mut mode) = self.active.take() {
            let mode_def = &definition.modes[mode.index];
            let exited = mode
                .exit_all(mode_def)
                .and_then(|()| mode.run_action(mode_def, reaction, event, false));
            self.stats.leaked_requests += mode.teardown() as u64;
            exited?;
        }

        self.enter_mode(definition, target_mode, target_state)
    }

    fn enter_mode(
        &mut self,
        definition: &MachineDefinition<S>,
        mode_index: usize,
        target_state: Option<usize>,
    ) -> Result<(), ProcessError> {
        let mode_def = &definition.modes[mode_index];
        let state_index = match target_state {
            Some(state_index) => state_index,
            None => mode_def
                .states
                .iter()
                .position(|state| Some(state.id) == mode_def.initial)
                .ok_or_else(|| ConfigurationError::MissingInitialState(format!("{:?}", mode_def.id)))?,
        };

        let generation = self.next_generation;
        self.next_generation = generation.next();
        info!(mode = ?mode_def.id, %generation, "entering mode-state");

        let mut mode = ActiveMode {
            index: mode_index,
            scope: Scope::new(
                format!("{:?}", mode_def.id),
                generation,
                self.registry.clone(),
                self.events.clone(),
            ),
            hooks: (mode_def.hooks)(&mode_def.params),
            connections: Connections::new(),
            slots: Vec::with_capacity(mode_def.orthogonals.len()),
            state: None,
        };

        let entered = mode
            .construct(mode_def, &mut self.next_serial)
            .and_then(|()| mode.enter_state(mode_def, state_index, &mut self.next_serial));
        match entered {
            Ok(()) => {
                self.active = Some(mode);
                Ok(())
            }
            Err(error) => {
                self.stats.leaked_requests += mode.teardown() as u64;
                Err(error)
            }
        }
    }

    fn publish(&self, tag: TransitionTag) {
        let Some(mode) = self.active.as_ref() else {
            return;
        };
        let Some(state) = self.current_state() else {
            return;
        };

        self.status.emit(&MachineStatus {
            mode: self.definition.modes[mode.index].id,
            state,
            generation: mode.scope.generation(),
            tag,
        });
    }
}

impl<S: StateId> EventProcessor for StateMachine<S> {
    fn initiate(&mut self) -> Result<(), ProcessError> {
        if self.active.is_some() {
            warn!("state machine initiated twice");
            return Ok(());
        }

        let definition = self.definition.clone();
        let initial = definition.initial;
        let location = definition
            .locate(initial)
            .ok_or_else(|| ConfigurationError::UnknownState {
                from: String::from("machine"),
                target: format!("{initial:?}"),
            })?;

        match location {
            Location::Mode(mode) => self.enter_mode(&definition, mode, None)?,
            Location::State { mode, state } => self.enter_mode(&definition, mode, Some(state))?,
        }

        info!(state = ?self.current_state(), "state machine initiated");
        self.publish(TransitionTag::Default);
        Ok(())
    }

    fn process(&mut self, envelope: Envelope) -> Result<(), ProcessError> {
        trace!(sequence = envelope.sequence, event = %envelope.event, "applying event");
        self.apply(envelope.event)
    }

    fn terminate(&mut self) {
        let Some(mut mode) = self.active.take() else {
            return;
        };

        let definition = self.definition.clone();
        if let Err(error) = mode.exit_all(&definition.modes[mode.index]) {
            error!(%error, "mode-state exit failed while terminating");
        }
        self.stats.leaked_requests += mode.teardown() as u64;
        info!("state machine terminated");
    }
}
