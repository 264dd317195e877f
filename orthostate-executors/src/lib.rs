//!
//! Orthostate-Executors provides the two loops every running orthostate
//! instance needs.
//!
//! The [`EventScheduler`] is the single consumer of the event queue: it
//! dequeues one event at a time and applies it completely to its
//! [`EventProcessor`] before looking at the next.  The [`SignalDetector`]
//! polls the registry of outstanding requests at a fixed cadence and turns
//! every resolved request into exactly one event on the queue.
//!
//! The two loops never share anything but the queue and the registry.
//!
//! [`EventProcessor`]: orthostate_core::EventProcessor
//!

#![deny(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub use config::{ConfigError, RuntimeConfig, SchedulerConfig, SignalDetectorConfig};

pub mod scheduler;
pub use scheduler::{EventScheduler, SchedulerHandle};

pub mod signal_detector;
pub use signal_detector::{DetectorStopHandle, SignalDetector};
