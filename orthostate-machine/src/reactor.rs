//!
//! State Reactors
//!
//! A state reactor observes every live event applied while its inner state
//! is active and may answer with an event of its own, which is posted to the
//! queue tagged with the scope's generation.  Reactors are built on state
//! entry and dropped on state exit.
//!

use orthostate_core::Event;

use crate::state::EventPattern;

/// An observer of the events applied while its state is active
pub trait StateReactor: Send {
    /// Observe an event, optionally answering with an event to post
    fn on_event(&mut self, event: &Event) -> Option<Event>;
}

/// Posts its output event once every watched pattern has been observed.
///
/// The output is posted exactly once per state entry.
#[derive(Clone, Debug)]
pub struct AllEventsGo {
    watched: Vec<(EventPattern, bool)>,
    output: Event,
    fired: bool,
}

impl AllEventsGo {
    /// Watch the given patterns and post `output` once all were seen
    pub fn new(patterns: impl IntoIterator<Item = EventPattern>, output: Event) -> Self {
        Self {
            watched: patterns.into_iter().map(|pattern| (pattern, false)).collect(),
            output,
            fired: false,
        }
    }

    /// The number of patterns still waiting for an event
    pub fn remaining(&self) -> usize {
        self.watched.iter().filter(|(_, seen)| !seen).count()
    }
}

impl StateReactor for AllEventsGo {
    fn on_event(&mut self, event: &Event) -> Option<Event> {
        if self.fired {
            return None;
        }

        for (pattern, seen) in self.watched.iter_mut() {
            if pattern.matches(event) {
                *seen = true;
            }
        }

        if self.remaining() == 0 {
            self.fired = true;
            Some(self.output.clone())
        } else {
            None
        }
    }
}
