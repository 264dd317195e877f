//!
//! Machine Definitions
//!
//! A [`MachineDefinition`] is the validated, immutable declaration of a state
//! machine: its mode-states, their inner states and every transition table.
//! It is built once and shared between as many [`StateMachine`](crate::StateMachine)
//! instances as needed.
//!

use std::collections::HashMap;

use orthostate_core::ConfigurationError;

use crate::{mode_state::ModeStateDef, state::StateId};

/// Where a state identity lives in the definition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Location {
    /// The identity names a mode-state
    Mode(usize),
    /// The identity names an inner state of a mode-state
    State {
        mode: usize,
        state: usize,
    },
}

impl Location {
    pub(crate) fn mode(self) -> usize {
        match self {
            Location::Mode(mode) | Location::State { mode, .. } => mode,
        }
    }
}

/// A validated state machine declaration
#[derive(Debug)]
pub struct MachineDefinition<S: StateId> {
    pub(crate) modes: Vec<ModeStateDef<S>>,
    pub(crate) initial: S,
    locations: HashMap<S, Location>,
}

impl<S: StateId> MachineDefinition<S> {
    /// Start declaring a machine
    pub fn builder() -> MachineBuilder<S> {
        MachineBuilder {
            modes: Vec::new(),
            initial: None,
        }
    }

    /// The identity the machine starts in
    pub fn initial(&self) -> S {
        self.initial
    }

    /// Whether `id` names a mode-state
    pub fn is_mode_state(&self, id: S) -> bool {
        matches!(self.locations.get(&id), Some(Location::Mode(_)))
    }

    /// The mode-state containing `id`, or `id` itself if it is a mode-state
    pub fn mode_state_of(&self, id: S) -> Option<S> {
        self.locate(id).map(|location| self.modes[location.mode()].id)
    }

    pub(crate) fn locate(&self, id: S) -> Option<Location> {
        self.locations.get(&id).copied()
    }
}

/// Builder for a [`MachineDefinition`]
pub struct MachineBuilder<S: StateId> {
    modes: Vec<ModeStateDef<S>>,
    initial: Option<S>,
}

impl<S: StateId> MachineBuilder<S> {
    /// Declare a mode-state
    pub fn mode_state(mut self, mode: ModeStateDef<S>) -> Self {
        self.modes.push(mode);
        self
    }

    /// The mode-state (or inner state) the machine starts in
    pub fn initial(mut self, id: S) -> Self {
        self.initial = Some(id);
        self
    }

    /// Validate the declaration.
    ///
    /// Every identity must be unique, every transition target and every
    /// configured orthogonal slot must be declared, and every mode-state
    /// needs an initial inner state of its own.
    pub fn build(self) -> Result<MachineDefinition<S>, ConfigurationError> {
        let initial = self.initial.ok_or(ConfigurationError::MissingInitialModeState)?;

        let mut locations = HashMap::new();
        for (mode_index, mode) in self.modes.iter().enumerate() {
            if locations.insert(mode.id, Location::Mode(mode_index)).is_some() {
                return Err(ConfigurationError::DuplicateState(format!("{:?}", mode.id)));
            }

            for (state_index, state) in mode.states.iter().enumerate() {
                let location = Location::State {
                    mode: mode_index,
                    state: state_index,
                };
                if locations.insert(state.id, location).is_some() {
                    return Err(ConfigurationError::DuplicateState(format!("{:?}", state.id)));
                }
            }
        }

        for (mode_index, mode) in self.modes.iter().enumerate() {
            let mode_name = format!("{:?}", mode.id);

            for (position, (slot, _)) in mode.orthogonals.iter().enumerate() {
                if mode.orthogonals[..position].iter().any(|(name, _)| name == slot) {
                    return Err(ConfigurationError::DuplicateOrthogonal {
                        mode: mode_name,
                        slot: *slot,
                    });
                }
            }

            let initial = mode
                .initial
                .ok_or_else(|| ConfigurationError::MissingInitialState(mode_name.clone()))?;
            match locations.get(&initial) {
                Some(Location::State { mode, .. }) if *mode == mode_index => {}
                _ => {
                    return Err(ConfigurationError::UnknownState {
                        from: mode_name,
                        target: format!("{initial:?}"),
                    })
                }
            }

            check_targets(&locations, &mode_name, mode.reactions.iter().filter_map(|r| r.target))?;

            for state in mode.states.iter() {
                let state_name = format!("{:?}", state.id);
                if let Some((slot, _)) = state
                    .configurations
                    .iter()
                    .find(|(slot, _)| mode.slot_index(slot).is_none())
                {
                    return Err(ConfigurationError::UnknownOrthogonal {
                        state: state_name,
                        mode: mode_name,
                        slot: *slot,
                    });
                }

                check_targets(
                    &locations,
                    &state_name,
                    state.reactions.iter().filter_map(|r| r.target),
                )?;
            }
        }

        if !locations.contains_key(&initial) {
            return Err(ConfigurationError::UnknownState {
                from: String::from("machine"),
                target: format!("{initial:?}"),
            });
        }

        Ok(MachineDefinition {
            modes: self.modes,
            initial,
            locations,
        })
    }
}

fn check_targets<S: StateId>(
    locations: &HashMap<S, Location>,
    from: &str,
    mut targets: impl Iterator<Item = S>,
) -> Result<(), ConfigurationError> {
    match targets.find(|target| !locations.contains_key(target)) {
        Some(target) => Err(ConfigurationError::UnknownState {
            from: String::from(from),
            target: format!("{target:?}"),
        }),
        None => Ok(()),
    }
}
