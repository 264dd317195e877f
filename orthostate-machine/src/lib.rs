//!
//! Orthostate-Machine is the orthogonal state machine core.
//!
//! A machine is declared once as a [`MachineDefinition`]: a set of
//! [`ModeStateDef`]s, each owning a fixed set of named orthogonal slots and
//! a list of inner [`StateDef`]s with their transition tables.  The
//! [`StateMachine`] built from a definition is the [`EventProcessor`] the
//! scheduler drives.
//!
//! Everything scoped to a mode-state (clients, components, orthogonals and
//! behaviors) lives in a [`Scope`] that is constructed on mode-state entry
//! and torn down completely on mode-state exit.
//!
//! [`EventProcessor`]: orthostate_core::EventProcessor
//!

#![deny(unsafe_code)]
#![deny(missing_docs)]

pub mod client;
pub use client::{AsAny, Client, ClientContext, Component};

pub mod context;
pub use context::ScopeContext;

pub mod definition;
pub use definition::{MachineBuilder, MachineDefinition};

pub mod machine;
pub use machine::{Configuration, MachineStats, MachineStatus, StateMachine};

pub mod mode_state;
pub use mode_state::{EmptyModeState, ModeState, ModeStateDef, Parameters};

pub mod orthogonal;
pub use orthogonal::{Behavior, Orthogonal, SlotConfiguration};

pub mod reactor;
pub use reactor::{AllEventsGo, StateReactor};

pub mod scope;
pub use scope::{ClientKey, ComponentKey, EventPoster, Scope, ScopeBuilder};

pub mod state;
pub use state::{EmptyState, EventPattern, Reaction, State, StateDef, StateId, TransitionTag};

#[cfg(test)]
mod testing;
