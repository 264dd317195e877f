//!
//! Orthostate-Clients is a small set of reference clients built on the
//! orthostate client framework.
//!
//! - [`ActionClient`] / [`ActionServer`]: a local, crossbeam-backed
//!   goal/result exchange and the [`SendGoal`] behavior issuing goals
//! - [`TimerClient`]: a periodic or one-shot timer re-exposing its ticks as a
//!   signal
//!
//! They double as examples of how a client registers its requests, cancels
//! them on teardown and turns the terminal events it receives into signals.
//!

#![deny(unsafe_code)]
#![deny(missing_docs)]

pub mod action;
pub use action::{local_action, ActionClient, ActionServer, GoalOutcome, SendGoal, ServerGoal};

pub mod timer;
pub use timer::TimerClient;

#[cfg(test)]
pub(crate) mod testing;
