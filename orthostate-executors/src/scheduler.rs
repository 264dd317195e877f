//!
//! The Event Scheduler
//!
//! The event scheduler is the single consumer of the event queue.  It
//! dequeues one event, applies it completely to its processor and only then
//! dequeues the next, so exactly one event is being applied at any instant and
//! events are applied in the order of the sequence numbers they were given at
//! enqueue time.
//!
//! Stopping the queue (through [`SchedulerHandle::stop`] or
//! [`EventQueue::stop`]) makes the scheduler exit once every event enqueued
//! before the stop has been applied.  A processor error is fatal: the queue
//! is stopped and the error is returned from [`EventScheduler::run`].
//!

use std::{
    io,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::RecvTimeoutError;
use tracing::{debug, error, info, trace};

use orthostate_core::{Envelope, Event, EventProcessor, EventQueue, EventReceiver, ProcessError};

use crate::config::SchedulerConfig;

/// The consumer loop driving one [`EventProcessor`]
pub struct EventScheduler<P: EventProcessor> {
    /// The processor every event is applied to
    processor: P,
    /// A producing handle, used to stop the queue on a fatal error
    queue: EventQueue,
    /// The only consumer of the queue
    receiver: EventReceiver,
    /// How long to block on an empty queue before re-checking the stop flag
    idle_timeout: Duration,
    /// Whether the processor has been initiated
    initiated: bool,
    /// The sequence number of the last applied event
    last_sequence: Option<u64>,
}

impl<P: EventProcessor> EventScheduler<P> {
    /// Create a scheduler consuming `receiver` with the default settings
    pub fn new(processor: P, queue: EventQueue, receiver: EventReceiver) -> Self {
        Self {
            processor,
            queue,
            receiver,
            idle_timeout: SchedulerConfig::default().idle_timeout(),
            initiated: false,
            last_sequence: None,
        }
    }

    /// Apply the scheduler settings
    pub fn with_config(mut self, config: &SchedulerConfig) -> Self {
        self.idle_timeout = config.idle_timeout();
        self
    }

    /// A cloneable handle for enqueueing events and stopping the loop
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            queue: self.queue.clone(),
        }
    }

    /// The driven processor
    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// The sequence number of the last applied event
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_sequence
    }

    /// Enter the processor's initial configuration.
    ///
    /// Calling this more than once has no effect. [`EventScheduler::run`]
    /// initiates the processor itself if this was not called before.
    pub fn initiate(&mut self) -> Result<(), ProcessError> {
        if self.initiated {
            return Ok(());
        }

        if let Err(error) = self.processor.initiate() {
            return Err(self.fail(error));
        }
        self.initiated = true;
        debug!("processor initiated");
        Ok(())
    }

    /// Apply every event that is already waiting, returning how many were
    /// applied.
    ///
    /// Events enqueued while draining are applied too.
    pub fn process_pending(&mut self) -> Result<usize, ProcessError> {
        self.initiate()?;

        let mut applied = 0;
        while let Some(envelope) = self.receiver.try_recv() {
            self.apply(envelope)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Run the consumer loop until the queue is stopped and drained, then
    /// terminate the processor and hand it back
    pub fn run(mut self) -> Result<P, ProcessError> {
        self.initiate()?;
        info!("event scheduler running");

        loop {
            if self.receiver.is_stopped() && self.receiver.is_empty() {
                break;
            }

            match self.receiver.recv_timeout(self.idle_timeout) {
                Ok(envelope) => self.apply(envelope)?,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        self.processor.terminate();
        info!(
            last_sequence = ?self.last_sequence,
            dropped = self.queue.dropped_count(),
            "event scheduler stopped"
        );
        Ok(self.processor)
    }

    /// Run the consumer loop on its own thread
    pub fn spawn(self) -> io::Result<JoinHandle<Result<P, ProcessError>>>
    where
        P: 'static,
    {
        thread::Builder::new()
            .name(String::from("event-scheduler"))
            .spawn(move || self.run())
    }

    fn apply(&mut self, envelope: Envelope) -> Result<(), ProcessError> {
        let sequence = envelope.sequence;
        trace!(sequence, event = %envelope.event, "applying event");

        if let Err(error) = self.processor.process(envelope) {
            return Err(self.fail(error));
        }
        self.last_sequence = Some(sequence);
        Ok(())
    }

    fn fail(&mut self, error: ProcessError) -> ProcessError {
        error!(%error, last_sequence = ?self.last_sequence, "event processing failed, stopping the scheduler");
        self.queue.stop();
        error
    }
}

/// A cloneable producer-side handle onto a scheduler's queue
#[derive(Clone)]
pub struct SchedulerHandle {
    queue: EventQueue,
}

impl SchedulerHandle {
    /// Enqueue an event, see [`EventQueue::enqueue`]
    pub fn enqueue(&self, event: Event) -> Option<u64> {
        self.queue.enqueue(event)
    }

    /// Ask the scheduler to exit once every event already enqueued has been
    /// applied
    pub fn stop(&self) {
        self.queue.stop();
    }

    /// Whether the scheduler was asked to stop
    pub fn is_stopped(&self) -> bool {
        self.queue.is_stopped()
    }

    /// The underlying queue
    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crossbeam::channel::{bounded, unbounded};
    use rand::{thread_rng, Rng};

    use orthostate_core::{event_queue, event_queue_starting_at, EventKind, HookError};

    /// Records every envelope and fails on a chosen event name
    #[derive(Default)]
    struct Recorder {
        initiated: usize,
        terminated: usize,
        applied: Vec<Envelope>,
        fail_on: Option<&'static str>,
    }

    impl EventProcessor for Recorder {
        fn initiate(&mut self) -> Result<(), ProcessError> {
            self.initiated += 1;
            Ok(())
        }

        fn process(&mut self, envelope: Envelope) -> Result<(), ProcessError> {
            if let (Some(name), EventKind::Custom(kind)) = (self.fail_on, envelope.event.kind()) {
                if name == kind {
                    return Err(ProcessError::hook("on_entry", "Broken", HookError::failed("boom")));
                }
            }
            self.applied.push(envelope);
            Ok(())
        }

        fn terminate(&mut self) {
            self.terminated += 1;
        }
    }

    fn sequences(recorder: &Recorder) -> Vec<u64> {
        recorder.applied.iter().map(|envelope| envelope.sequence).collect()
    }

    #[test]
    fn test_process_pending_is_fifo() {
        let (queue, receiver) = event_queue();
        let mut scheduler = EventScheduler::new(Recorder::default(), queue.clone(), receiver);

        for name in ["a", "b", "c"] {
            queue.enqueue(Event::custom(name));
        }

        assert_eq!(scheduler.process_pending().unwrap(), 3);
        assert_eq!(scheduler.processor().initiated, 1);
        assert_eq!(sequences(scheduler.processor()), vec![0, 1, 2]);
        assert_eq!(scheduler.last_sequence(), Some(2));
    }

    #[test]
    fn test_enqueue_from_two_threads_applies_in_sequence_order() {
        let (queue, receiver) = event_queue_starting_at(5);
        let scheduler = EventScheduler::new(Recorder::default(), queue.clone(), receiver);
        let handle = scheduler.handle();
        let running = scheduler.spawn().unwrap();

        let (first_done, wait_for_first) = bounded(1);
        let first = {
            let queue = queue.clone();
            thread::spawn(move || {
                let sequence = queue.enqueue(Event::custom("first"));
                first_done.send(()).unwrap();
                sequence
            })
        };
        let second = thread::spawn(move || {
            wait_for_first.recv().unwrap();
            queue.enqueue(Event::custom("second"))
        });

        assert_eq!(first.join().unwrap(), Some(5));
        assert_eq!(second.join().unwrap(), Some(6));
        handle.stop();

        let recorder = running.join().unwrap().unwrap();
        assert_eq!(sequences(&recorder), vec![5, 6]);
        assert_eq!(recorder.applied[0].event, Event::custom("first"));
        assert_eq!(recorder.applied[1].event, Event::custom("second"));
        assert_eq!(recorder.terminated, 1);
    }

    #[test]
    fn test_concurrent_enqueues_are_applied_in_sequence_order() {
        let (queue, receiver) = event_queue();
        let scheduler = EventScheduler::new(Recorder::default(), queue.clone(), receiver);
        let handle = scheduler.handle();
        let running = scheduler.spawn().unwrap();

        let (assigned_tx, assigned_rx) = unbounded();
        let producers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                let assigned_tx = assigned_tx.clone();
                thread::spawn(move || {
                    let mut rng = thread_rng();
                    for _ in 0..250 {
                        if rng.gen_bool(0.1) {
                            thread::yield_now();
                        }
                        if let Some(sequence) = queue.enqueue(Event::custom("tick")) {
                            assigned_tx.send(sequence).unwrap();
                        }
                    }
                })
            })
            .collect();
        drop(assigned_tx);
        for producer in producers {
            producer.join().unwrap();
        }
        handle.stop();

        let recorder = running.join().unwrap().unwrap();
        let applied = sequences(&recorder);
        let mut assigned: Vec<u64> = assigned_rx.iter().collect();
        assigned.sort_unstable();

        assert_eq!(applied.len(), 1000);
        assert!(applied.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(applied, assigned);
    }

    #[test]
    fn test_stop_drains_queued_events_and_drops_later_ones() {
        let (queue, receiver) = event_queue();
        let scheduler = EventScheduler::new(Recorder::default(), queue.clone(), receiver)
            .with_config(&SchedulerConfig { idle_timeout_ms: 5 });
        let handle = scheduler.handle();

        handle.enqueue(Event::custom("a"));
        handle.enqueue(Event::custom("b"));
        handle.stop();
        assert_eq!(handle.enqueue(Event::custom("late")), None);

        let recorder = scheduler.run().unwrap();
        assert_eq!(sequences(&recorder), vec![0, 1]);
        assert_eq!(queue.dropped_count(), 1);
        assert_eq!(recorder.terminated, 1);
    }

    #[test]
    fn test_processor_error_stops_the_loop() {
        let (queue, receiver) = event_queue();
        let recorder = Recorder {
            fail_on: Some("bad"),
            ..Recorder::default()
        };
        let scheduler = EventScheduler::new(recorder, queue.clone(), receiver);
        let running = scheduler.spawn().unwrap();

        queue.enqueue(Event::custom("good"));
        queue.enqueue(Event::custom("bad"));

        let error = match running.join().unwrap() {
            Ok(_) => panic!("processor error was swallowed"),
            Err(error) => error,
        };
        assert_eq!(error.to_string(), "on_entry hook failed in Broken: boom");
        assert!(queue.is_stopped());
        assert_eq!(queue.enqueue(Event::custom("after")), None);
    }
}
