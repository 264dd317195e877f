//!
//! The Runtime
//!
//! One running orthostate instance is exactly one event queue, one request
//! registry, one [`EventScheduler`] and one [`SignalDetector`].  The runtime
//! creates them and starts them in a fixed order:
//!
//! 1. the processor is handed to the scheduler and the scheduler thread is
//!    spawned,
//! 2. the scheduler initiates the processor (entering the initial mode-state)
//!    and reports back,
//! 3. only then the signal detector's polling loop starts, either on its own
//!    thread ([`Runtime::start`]) or on the calling thread ([`Runtime::run`]).
//!
//! Whenever the scheduler exits, because it was stopped or because a hook
//! failed, it stops the signal detector as well.
//!

use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{bounded, Receiver};
use quanta::Clock;
use thiserror::Error;
use tracing::{error, info};

use orthostate_core::{
    event_queue, Event, EventProcessor, EventQueue, EventReceiver, ProcessError, RequestRegistry,
};
use orthostate_executors::{
    DetectorStopHandle, EventScheduler, RuntimeConfig, SchedulerHandle, SignalDetector,
};
use orthostate_machine::{MachineDefinition, StateId, StateMachine};

/// Errors raised while starting or stopping a [`Runtime`]
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// One of the runtime threads could not be spawned
    #[error("failed to spawn the {thread} thread: {source}")]
    Spawn {
        /// The thread's name
        thread: &'static str,
        /// The underlying io error
        #[source]
        source: io::Error,
    },
    /// The processor failed to initiate or to apply an event
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// The scheduler thread panicked
    #[error("the event scheduler thread panicked")]
    SchedulerPanicked,
}

type SchedulerThread<P> = JoinHandle<Result<P, ProcessError>>;

/// The not yet started parts of one running instance
pub struct Runtime {
    config: RuntimeConfig,
    registry: RequestRegistry,
    queue: EventQueue,
    receiver: EventReceiver,
}

impl Runtime {
    /// Create the queue and the registry of a new instance
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_clock(config, Clock::new())
    }

    /// Create a new instance whose request timeouts use `clock`
    pub fn with_clock(config: RuntimeConfig, clock: Clock) -> Self {
        let (queue, receiver) = event_queue();
        Self {
            config,
            registry: RequestRegistry::with_clock(clock),
            queue,
            receiver,
        }
    }

    /// The configuration the loops will run with
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The registry outstanding requests are registered in
    pub fn registry(&self) -> &RequestRegistry {
        &self.registry
    }

    /// The queue events are enqueued on
    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// Create a state machine wired to this instance's registry and queue
    pub fn state_machine<S: StateId>(&self, definition: MachineDefinition<S>) -> StateMachine<S> {
        StateMachine::new(Arc::new(definition), self.registry.clone(), self.queue.clone())
    }

    /// Start the scheduler and the signal detector on their own threads.
    ///
    /// Returns once the processor has been initiated and the detector is
    /// polling.
    pub fn start<P>(self, processor: P) -> Result<RunningRuntime<P>, RuntimeError>
    where
        P: EventProcessor + 'static,
    {
        let mut detector =
            SignalDetector::from_config(self.registry.clone(), self.queue.clone(), &self.config.signal_detector);
        let (handle, scheduler) = self.spawn_scheduler(processor, detector.stop_handle())?;

        if let Err(source) = detector.run_thread() {
            handle.stop();
            if let Err(error) = join_scheduler(scheduler) {
                error!(%error, "event scheduler failed while aborting startup");
            }
            return Err(RuntimeError::Spawn {
                thread: "signal-detector",
                source,
            });
        }

        Ok(RunningRuntime {
            handle,
            detector,
            scheduler: Some(scheduler),
        })
    }

    /// Start the scheduler on its own thread and block polling on the
    /// calling thread until `true` is received on `interrupt` or the
    /// scheduler exits.
    ///
    /// The processor is terminated and handed back once the scheduler has
    /// drained the queue.
    pub fn run<P>(self, processor: P, interrupt: Receiver<bool>) -> Result<P, RuntimeError>
    where
        P: EventProcessor + 'static,
    {
        let mut detector =
            SignalDetector::from_config(self.registry.clone(), self.queue.clone(), &self.config.signal_detector)
                .with_interrupt(interrupt);
        let (handle, scheduler) = self.spawn_scheduler(processor, detector.stop_handle())?;

        detector.run_loop();
        handle.stop();
        join_scheduler(scheduler)
    }

    fn spawn_scheduler<P>(
        self,
        processor: P,
        detector: DetectorStopHandle,
    ) -> Result<(SchedulerHandle, SchedulerThread<P>), RuntimeError>
    where
        P: EventProcessor + 'static,
    {
        let mut scheduler =
            EventScheduler::new(processor, self.queue, self.receiver).with_config(&self.config.scheduler);
        let handle = scheduler.handle();
        let (ready_tx, ready_rx) = bounded(1);

        let thread = thread::Builder::new()
            .name(String::from("event-scheduler"))
            .spawn(move || {
                let result = match scheduler.initiate() {
                    Ok(()) => {
                        let _ = ready_tx.send(Ok(()));
                        scheduler.run()
                    }
                    Err(error) => {
                        let _ = ready_tx.send(Err(error.clone()));
                        Err(error)
                    }
                };
                detector.stop();
                result
            })
            .map_err(|source| RuntimeError::Spawn {
                thread: "event-scheduler",
                source,
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("runtime started");
                Ok((handle, thread))
            }
            Ok(Err(error)) => {
                let _ = thread.join();
                Err(error.into())
            }
            Err(_) => Err(join_scheduler(thread)
                .err()
                .unwrap_or(RuntimeError::SchedulerPanicked)),
        }
    }
}

/// A started instance
pub struct RunningRuntime<P: EventProcessor> {
    handle: SchedulerHandle,
    detector: SignalDetector,
    scheduler: Option<SchedulerThread<P>>,
}

impl<P: EventProcessor> RunningRuntime<P> {
    /// A cloneable handle for enqueueing events and stopping the scheduler
    pub fn handle(&self) -> &SchedulerHandle {
        &self.handle
    }

    /// Enqueue an event, see [`EventQueue::enqueue`]
    pub fn enqueue(&self, event: Event) -> Option<u64> {
        self.handle.enqueue(event)
    }

    /// Whether the scheduler thread has exited
    pub fn is_finished(&self) -> bool {
        self.scheduler.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop polling, let the scheduler drain the events already enqueued and
    /// hand the terminated processor back
    pub fn shutdown(mut self) -> Result<P, RuntimeError> {
        self.detector.stop();
        self.detector.join();
        self.handle.stop();
        self.join()
    }

    /// Block until the scheduler exits on its own, which happens when
    /// something stops its queue or a hook fails
    pub fn wait(mut self) -> Result<P, RuntimeError> {
        let result = self.join();
        self.detector.stop();
        self.detector.join();
        result
    }

    fn join(&mut self) -> Result<P, RuntimeError> {
        match self.scheduler.take() {
            Some(scheduler) => join_scheduler(scheduler),
            None => Err(RuntimeError::SchedulerPanicked),
        }
    }
}

impl<P: EventProcessor> Drop for RunningRuntime<P> {
    fn drop(&mut self) {
        if self.scheduler.is_some() {
            self.detector.stop();
            self.handle.stop();
            if let Err(error) = self.join() {
                error!(%error, "event scheduler failed while dropping the runtime");
            }
        }
    }
}

fn join_scheduler<P>(scheduler: SchedulerThread<P>) -> Result<P, RuntimeError> {
    match scheduler.join() {
        Ok(result) => result.map_err(RuntimeError::from),
        Err(_) => {
            error!("event scheduler thread panicked");
            Err(RuntimeError::SchedulerPanicked)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    use crossbeam::channel::unbounded;

    use orthostate_core::{ConfigurationError, HookError, PendingRequest, RequestHandle, RequestStatus};
    use orthostate_executors::{SchedulerConfig, SignalDetectorConfig};
    use orthostate_machine::{
        Client, ClientContext, EventPattern, ModeStateDef, Orthogonal, ScopeBuilder, ScopeContext, State, StateDef,
    };

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum Id {
        Run,
        Waiting,
        Open,
        Broken,
    }

    struct Flag(Arc<AtomicBool>);

    impl PendingRequest for Flag {
        fn poll(&mut self) -> RequestStatus {
            if self.0.load(Ordering::SeqCst) {
                RequestStatus::Succeeded
            } else {
                RequestStatus::Pending
            }
        }

        fn cancel(&mut self) {}
    }

    struct Latch {
        flag: Arc<AtomicBool>,
        request: Option<RequestHandle>,
    }

    impl Client for Latch {
        fn initialize(&mut self, ctx: &mut ClientContext<'_>) -> Result<(), HookError> {
            self.request = Some(ctx.register_request(None, Flag(self.flag.clone())));
            Ok(())
        }

        fn teardown(&mut self, ctx: &mut ClientContext<'_>) {
            if let Some(request) = self.request.take() {
                ctx.cancel_request(request);
            }
        }
    }

    struct Gate(Arc<AtomicBool>);

    impl Orthogonal for Gate {
        fn on_initialize(&mut self, scope: &mut ScopeBuilder<'_>) -> Result<(), HookError> {
            scope.create_client(Latch {
                flag: self.0.clone(),
                request: None,
            });
            Ok(())
        }
    }

    struct Fails;

    impl State for Fails {
        fn on_entry(&mut self, _ctx: &mut ScopeContext<'_>) -> Result<(), HookError> {
            Err(HookError::failed("gripper jammed"))
        }
    }

    fn gated(flag: &Arc<AtomicBool>) -> MachineDefinition<Id> {
        let flag = flag.clone();
        MachineDefinition::builder()
            .mode_state(
                ModeStateDef::new(Id::Run)
                    .orthogonal("gate", move || Gate(flag.clone()))
                    .initial(Id::Waiting)
                    .state(
                        StateDef::new(Id::Waiting)
                            .on(EventPattern::succeeded().from_client::<Latch>(), Id::Open)
                            .on(EventPattern::custom("Break"), Id::Broken),
                    )
                    .state(StateDef::new(Id::Open))
                    .state(StateDef::new(Id::Broken).with_state(|_| Fails)),
            )
            .initial(Id::Run)
            .build()
            .unwrap()
    }

    fn fast() -> RuntimeConfig {
        RuntimeConfig {
            signal_detector: SignalDetectorConfig { loop_rate_hz: 500.0 },
            scheduler: SchedulerConfig { idle_timeout_ms: 5 },
        }
    }

    #[test]
    fn test_start_drives_the_machine_from_completions() {
        let flag = Arc::new(AtomicBool::new(false));
        let runtime = Runtime::new(fast());
        let machine = runtime.state_machine(gated(&flag));
        let registry = runtime.registry().clone();

        let (status_tx, status_rx) = unbounded();
        let _connection = machine.status_signal().connect(move |status| {
            let _ = status_tx.send(*status);
        });

        let running = runtime.start(machine).unwrap();
        assert_eq!(status_rx.recv_timeout(Duration::from_secs(1)).unwrap().state, Id::Waiting);
        assert_eq!(registry.len(), 1);

        flag.store(true, Ordering::SeqCst);
        let status = status_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(status.state, Id::Open);

        let machine = running.shutdown().unwrap();
        assert!(!machine.is_running());
        assert!(registry.is_empty());
        assert_eq!(machine.stats().leaked_requests, 0);
    }

    #[test]
    fn test_initiate_failure_is_returned_from_start() {
        let definition = MachineDefinition::builder()
            .mode_state(
                ModeStateDef::new(Id::Run)
                    .initial(Id::Waiting)
                    .state(StateDef::new(Id::Waiting).requires_client::<Latch>()),
            )
            .initial(Id::Run)
            .build()
            .unwrap();
        let runtime = Runtime::new(fast());
        let machine = runtime.state_machine(definition);

        match runtime.start(machine) {
            Err(RuntimeError::Process(ProcessError::Configuration(ConfigurationError::MissingClient {
                ..
            }))) => {}
            Err(error) => panic!("unexpected error: {error}"),
            Ok(_) => panic!("a scope with a missing client started"),
        }
    }

    #[test]
    fn test_run_returns_once_interrupted() {
        let flag = Arc::new(AtomicBool::new(false));
        let runtime = Runtime::new(fast());
        let machine = runtime.state_machine(gated(&flag));
        let registry = runtime.registry().clone();

        let (interrupt_tx, interrupt_rx) = unbounded();
        let interrupter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            interrupt_tx.send(true).unwrap();
        });

        let machine = runtime.run(machine, interrupt_rx).unwrap();
        interrupter.join().unwrap();

        assert!(!machine.is_running());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_hook_failure_stops_both_loops() {
        let flag = Arc::new(AtomicBool::new(false));
        let runtime = Runtime::new(fast());
        let machine = runtime.state_machine(gated(&flag));
        let queue = runtime.queue().clone();

        queue.enqueue(Event::custom("Break"));
        let (_interrupt_tx, interrupt_rx) = unbounded();

        match runtime.run(machine, interrupt_rx) {
            Err(RuntimeError::Process(error)) => {
                assert_eq!(error.to_string(), "on_entry hook failed in Broken: gripper jammed")
            }
            Err(error) => panic!("unexpected error: {error}"),
            Ok(_) => panic!("hook failure was swallowed"),
        }
        assert!(queue.is_stopped());
    }

    #[test]
    fn test_wait_returns_when_the_queue_is_stopped() {
        let flag = Arc::new(AtomicBool::new(false));
        let runtime = Runtime::new(fast());
        let machine = runtime.state_machine(gated(&flag));

        let running = runtime.start(machine).unwrap();
        running.handle().stop();

        let machine = running.wait().unwrap();
        assert!(!machine.is_running());
    }
}
