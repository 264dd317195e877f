//!
//! Orthostate Signals
//!
//! Signals are the typed publish points exposed by clients and components.
//! States, behaviors and other clients subscribe to a signal with
//! [`Signal::connect`] and receive an opaque [`Connection`] token that can
//! disconnect the handler at any time, including from inside the handler.
//!
//! Signals are emitted on the scheduler thread as a direct consequence of
//! applying an event, so no two handlers ever run at the same time.
//!

#![deny(unsafe_code)]
#![deny(missing_docs)]

pub mod signal;
pub use signal::Signal;

pub mod connection;
pub use connection::{Connection, Connections, ScopedConnection};
