//!
//! The contract between the scheduler and whatever it drives.
//!
//! In practice the processor is always an orthostate `StateMachine`, but the
//! scheduler only depends on this trait so it can be exercised with simple
//! recording processors.
//!

use crate::{error::ProcessError, queue::Envelope};

/// A single-consumer event processor driven by the scheduler
pub trait EventProcessor: Send {
    /// Enter the initial configuration.
    ///
    /// Called once, on the scheduler thread, before the first event is applied.
    fn initiate(&mut self) -> Result<(), ProcessError>;

    /// Apply one event completely before returning.
    ///
    /// An `Err` is a fatal defect and stops the consumer loop.
    fn process(&mut self, envelope: Envelope) -> Result<(), ProcessError>;

    /// Leave the current configuration.
    ///
    /// Called once when the consumer loop exits cleanly.
    fn terminate(&mut self);
}
