//!
//! The Signal Detector
//!
//! The signal detector polls the registry of outstanding requests at a fixed
//! cadence.  Every request that resolved since the last poll (completed,
//! aborted or timed out) is removed from the registry by the scan and its
//! single terminal event is forwarded to the event queue, which is the only
//! path by which anything crosses from the detector thread into the
//! scheduler.
//!
//! A timeout is not an error here.  It is an ordinary event the state
//! machine's transition tables decide what to do with.
//!
//! The loop can be stopped through [`SignalDetector::stop`], a
//! [`DetectorStopHandle`] or by sending `true` over the interrupt channel.
//!

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::Receiver;
use quanta::Clock;
use tracing::{debug, error, info, trace};

use orthostate_core::{EventQueue, RequestRegistry};

use crate::config::SignalDetectorConfig;

/// State shared between the detector and its loop thread
struct Inner {
    registry: RequestRegistry,
    queue: EventQueue,
    period: Duration,
    clock: Clock,
    stopped: AtomicBool,
}

impl Inner {
    fn poll_once(&self) -> usize {
        let events = self.registry.scan();
        let resolved = events.len();

        for event in events {
            trace!(%event, "request resolved");
            self.queue.enqueue(event);
        }
        resolved
    }

    fn should_stop(&self, interrupt: Option<&Receiver<bool>>) -> bool {
        if let Some(Ok(true)) = interrupt.map(Receiver::try_recv) {
            self.stopped.store(true, Ordering::SeqCst);
        }
        self.stopped.load(Ordering::SeqCst)
    }

    fn run(&self, interrupt: Option<&Receiver<bool>>) -> u64 {
        let mut polls = 0;
        let mut next_poll = self.clock.now();

        while !self.should_stop(interrupt) {
            self.poll_once();
            polls += 1;

            next_poll += self.period;
            let now = self.clock.now();
            if next_poll > now {
                thread::sleep(next_poll - now);
            } else {
                // Running behind, do not try to catch up with a burst of polls
                next_poll = now;
            }
        }

        polls
    }
}

/// The polling loop turning resolved requests into events
pub struct SignalDetector {
    inner: Arc<Inner>,
    interrupt: Option<Receiver<bool>>,
    thread: Option<JoinHandle<u64>>,
}

impl SignalDetector {
    /// Create a detector polling `registry` every `period` and forwarding
    /// to `queue`
    pub fn new(registry: RequestRegistry, queue: EventQueue, period: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                queue,
                period,
                clock: Clock::new(),
                stopped: AtomicBool::new(false),
            }),
            interrupt: None,
            thread: None,
        }
    }

    /// Create a detector polling at the configured loop rate
    pub fn from_config(registry: RequestRegistry, queue: EventQueue, config: &SignalDetectorConfig) -> Self {
        Self::new(registry, queue, config.period())
    }

    /// Stop the loop when `true` is received on `interrupt`
    pub fn with_interrupt(mut self, interrupt: Receiver<bool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// The time between two polls
    pub fn period(&self) -> Duration {
        self.inner.period
    }

    /// Scan the registry once, forwarding every resolved request's event.
    ///
    /// Returns the number of events forwarded.
    pub fn poll_once(&self) -> usize {
        self.inner.poll_once()
    }

    /// Poll at the configured cadence on the calling thread until stopped,
    /// returning the number of polls
    pub fn run_loop(&mut self) -> u64 {
        info!(period = ?self.inner.period, "signal detector running");
        let polls = self.inner.run(self.interrupt.as_ref());
        info!(polls, "signal detector stopped");
        polls
    }

    /// Run the polling loop on its own thread.
    ///
    /// Does nothing if the loop thread is already running.
    pub fn run_thread(&mut self) -> io::Result<()> {
        if self.thread.is_some() {
            debug!("signal detector thread already running");
            return Ok(());
        }

        let inner = self.inner.clone();
        let interrupt = self.interrupt.take();
        let handle = thread::Builder::new()
            .name(String::from("signal-detector"))
            .spawn(move || {
                info!(period = ?inner.period, "signal detector running");
                let polls = inner.run(interrupt.as_ref());
                info!(polls, "signal detector stopped");
                polls
            })?;
        self.thread = Some(handle);
        Ok(())
    }

    /// Ask the polling loop to exit after its current poll
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }

    /// Whether the loop was asked to stop
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// A handle other threads can stop the loop with
    pub fn stop_handle(&self) -> DetectorStopHandle {
        DetectorStopHandle {
            inner: self.inner.clone(),
        }
    }

    /// Block until the loop thread has exited, returning its number of polls.
    ///
    /// Returns `None` if no loop thread was running (or it panicked).
    pub fn join(&mut self) -> Option<u64> {
        let handle = self.thread.take()?;
        match handle.join() {
            Ok(polls) => Some(polls),
            Err(_) => {
                error!("signal detector thread panicked");
                None
            }
        }
    }
}

impl Drop for SignalDetector {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
            self.join();
        }
    }
}

/// Stops a [`SignalDetector`] from another thread
#[derive(Clone)]
pub struct DetectorStopHandle {
    inner: Arc<Inner>,
}

impl DetectorStopHandle {
    /// Ask the polling loop to exit after its current poll
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }
}
