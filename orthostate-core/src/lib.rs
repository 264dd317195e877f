//!
//! Orthostate-Core is the collection of data types and traits shared by
//! every other orthostate crate.
//!
//! It owns the only two pieces of state that are ever touched from more
//! than one thread: the FIFO [`EventQueue`] that feeds the scheduler and the
//! [`RequestRegistry`] of outstanding asynchronous requests that the signal
//! detector polls.  Everything else in orthostate lives on the scheduler
//! thread.
//!

#![deny(unsafe_code)]
#![deny(missing_docs)]

pub mod error;
pub use error::{ConfigurationError, HookError, ProcessError};

pub mod event;
pub use event::{Event, EventKind, EventSource, Generation};

pub mod queue;
pub use queue::{event_queue, event_queue_starting_at, Envelope, EventQueue, EventReceiver};

pub mod registry;
pub use registry::{OutstandingRequest, PendingRequest, RequestHandle, RequestRegistry, RequestStatus};

pub mod processor;
pub use processor::EventProcessor;
