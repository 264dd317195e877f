//!
//! # Orthostate
//!
//! Orthostate is a runtime for hierarchical, orthogonally composed state
//! machines driven by asynchronous completion signals.
//!
//! ## Technical Overview
//!
//! A running instance is made of two threads of control that share nothing
//! but a FIFO event queue and a registry of outstanding requests:
//!
//! * The event scheduler owns the state machine and applies exactly one event
//!   at a time to it.  Every state, orthogonal, client and component lives on
//!   this thread.
//! * The signal detector polls the registry at a fixed cadence and turns every
//!   completed, aborted or timed out request into one event on the queue.
//!
//! A machine is a set of mode-states.  Each mode-state owns a fixed set of
//! named orthogonal slots, the clients and components those orthogonals
//! create, and a list of inner states with their transition tables.  Entering
//! a mode-state builds a fresh scope for all of that and exiting it tears the
//! scope down, cancelling every request its clients still had outstanding.
//! Completions that arrive for a torn down scope are recognized by their
//! generation and discarded.
//!
//! The [`Runtime`] wires the queue, the registry, the scheduler and the
//! detector together in the right order.
//!
//! ```no_run
//! use orthostate::prelude::*;
//!
//! #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
//! enum Id {
//!     Run,
//!     Idle,
//! }
//!
//! let definition = MachineDefinition::builder()
//!     .mode_state(ModeStateDef::new(Id::Run).initial(Id::Idle).state(StateDef::new(Id::Idle)))
//!     .initial(Id::Run)
//!     .build()
//!     .unwrap();
//!
//! let runtime = Runtime::new(RuntimeConfig::default());
//! let machine = runtime.state_machine(definition);
//! let running = runtime.start(machine).unwrap();
//! let machine = running.shutdown().unwrap();
//! ```
//!
//! ## Events
//!
//! Terminal request outcomes (`Succeeded`, `Aborted`, `Preempted`, `Timeout`
//! and `Cancelled`) and named custom events are the only inputs of a machine.
//! An event that matches no reaction is dropped and counted, a timeout is an
//! ordinary event the transition tables decide what to do with, and a failing
//! hook stops the scheduler with a [`ProcessError`].
//!
//! ## The queue is unbounded
//!
//! There is no backpressure or priority between events.  A producer that
//! outpaces the scheduler grows the queue without limit.
//!

#![deny(unsafe_code)]
#![deny(missing_docs)]

pub mod prelude;

pub mod runtime;
pub use runtime::{Runtime, RuntimeError, RunningRuntime};

/// Orthostate Reference Clients
pub use orthostate_clients as clients;
/// Orthostate Events, Queue, Registry and Errors
pub use orthostate_core as core;
/// Orthostate Scheduler, Signal Detector and Configuration
pub use orthostate_executors as executors;
/// Orthostate State Machine Core
pub use orthostate_machine as machine;
/// Orthostate Signals
pub use orthostate_signals as signals;

pub use orthostate_core::ProcessError;
