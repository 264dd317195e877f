//!
//! The Orthostate Prelude
//!
//! Everything needed to declare a machine, write states, behaviors and
//! clients, and run it.
//!

pub use orthostate_core::{
    ConfigurationError, Event, EventKind, EventProcessor, EventQueue, HookError, PendingRequest, ProcessError,
    RequestHandle, RequestRegistry, RequestStatus,
};

pub use orthostate_signals::{Connection, Connections, ScopedConnection, Signal};

pub use orthostate_machine::{
    AllEventsGo, Behavior, Client, ClientContext, Component, EventPattern, EventPoster, MachineDefinition,
    MachineStatus, ModeState, ModeStateDef, Orthogonal, Parameters, Reaction, ScopeBuilder, ScopeContext, State,
    StateDef, StateId, StateMachine, StateReactor, TransitionTag,
};

pub use orthostate_executors::{EventScheduler, RuntimeConfig, SignalDetector};

pub use orthostate_clients::{local_action, ActionClient, ActionServer, GoalOutcome, SendGoal, ServerGoal, TimerClient};

pub use crate::runtime::{Runtime, RunningRuntime};
