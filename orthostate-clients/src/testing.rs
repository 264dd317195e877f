//! Drives a state machine by hand so client tests control every poll

use std::{sync::Arc, time::Duration};

use quanta::{Clock, Mock};

use orthostate_core::{event_queue, EventProcessor, EventQueue, EventReceiver, ProcessError, RequestRegistry};
use orthostate_machine::{MachineDefinition, StateId, StateMachine};

pub(crate) struct Harness<S: StateId> {
    pub(crate) machine: StateMachine<S>,
    pub(crate) registry: RequestRegistry,
    pub(crate) queue: EventQueue,
    receiver: EventReceiver,
    mock: Option<Arc<Mock>>,
}

impl<S: StateId> Harness<S> {
    pub(crate) fn new(definition: MachineDefinition<S>) -> Self {
        Self::with_registry(definition, RequestRegistry::new(), None)
    }

    pub(crate) fn with_mock_clock(definition: MachineDefinition<S>) -> Self {
        let (clock, mock) = Clock::mock();
        Self::with_registry(definition, RequestRegistry::with_clock(clock), Some(mock))
    }

    fn with_registry(definition: MachineDefinition<S>, registry: RequestRegistry, mock: Option<Arc<Mock>>) -> Self {
        let (queue, receiver) = event_queue();
        Self {
            machine: StateMachine::new(Arc::new(definition), registry.clone(), queue.clone()),
            registry,
            queue,
            receiver,
            mock,
        }
    }

    pub(crate) fn advance(&self, by: Duration) {
        if let Some(mock) = self.mock.as_ref() {
            mock.increment(by);
        }
    }

    /// One signal detector poll
    pub(crate) fn resolve(&self) -> usize {
        let events = self.registry.scan();
        let resolved = events.len();
        for event in events {
            self.queue.enqueue(event);
        }
        resolved
    }

    pub(crate) fn drain(&mut self) -> Result<usize, ProcessError> {
        let mut applied = 0;
        while let Some(envelope) = self.receiver.try_recv() {
            self.machine.process(envelope)?;
            applied += 1;
        }
        Ok(applied)
    }
}
