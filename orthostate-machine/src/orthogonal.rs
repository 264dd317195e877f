//!
//! Orthogonals and Behaviors
//!
//! A mode-state owns a fixed, named set of orthogonal slots.  Each slot holds
//! at most one active [`Behavior`].  Inner states reconfigure the slots they
//! explicitly name when they are entered; every other slot keeps its active
//! behavior untouched.
//!

use orthostate_core::HookError;
use orthostate_signals::Connections;

use crate::{context::ScopeContext, scope::ScopeBuilder};

/// One independently configurable region of a mode-state.
///
/// An orthogonal is constructed at mode-state entry, creates the clients of
/// its region and lives until the mode-state's scope is torn down.
pub trait Orthogonal: Send {
    /// Create the clients and components of this region
    fn on_initialize(&mut self, scope: &mut ScopeBuilder<'_>) -> Result<(), HookError>;

    /// The behavior the slot starts out with, before any inner state
    /// configures it
    fn initial_behavior(&mut self) -> Option<Box<dyn Behavior>> {
        None
    }
}

/// The active configuration of one orthogonal slot.
///
/// Behaviors usually drive one of their orthogonal's clients: sending a goal
/// on entry, connecting to the client's signals and posting events.
pub trait Behavior: Send {
    /// A human readable name for diagnostics and configuration snapshots
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Called when the behavior becomes active in its slot
    fn on_entry(&mut self, _ctx: &mut ScopeContext<'_>) -> Result<(), HookError> {
        Ok(())
    }

    /// Called when the behavior is replaced or its scope is torn down
    fn on_exit(&mut self, _ctx: &mut ScopeContext<'_>) -> Result<(), HookError> {
        Ok(())
    }
}

/// A behavior installed in a slot
pub(crate) struct ActiveBehavior {
    pub(crate) behavior: Box<dyn Behavior>,
    pub(crate) serial: u64,
    pub(crate) connections: Connections,
}

/// A live orthogonal slot of the active mode-state
pub(crate) struct OrthogonalSlot {
    pub(crate) name: &'static str,
    pub(crate) orthogonal: Box<dyn Orthogonal>,
    pub(crate) active: Option<ActiveBehavior>,
}

impl OrthogonalSlot {
    pub(crate) fn configuration(&self) -> SlotConfiguration {
        SlotConfiguration {
            slot: self.name,
            behavior: self
                .active
                .as_ref()
                .map(|active| (active.behavior.name(), active.serial)),
        }
    }
}

/// A snapshot of what one orthogonal slot is running
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotConfiguration {
    /// The slot name
    pub slot: &'static str,
    /// The name and instantiation serial of the active behavior.
    ///
    /// Every behavior instantiation gets a fresh serial, so two snapshots
    /// with equal serials saw the very same behavior instance.
    pub behavior: Option<(&'static str, u64)>,
}
