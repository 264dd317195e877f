//!
//! The Timer Client
//!
//! A timer is a request that succeeds once its deadline has passed.  The
//! client arms it on initialization, counts every tick, emits
//! [`TimerClient::on_tick`] and, when periodic, re-arms itself for the next
//! period.  Transitions can react to ticks directly with
//! `EventPattern::succeeded().from_client::<TimerClient>()`.
//!

use std::time::Duration;

use quanta::{Clock, Instant};
use tracing::trace;

use orthostate_core::{Event, EventKind, HookError, PendingRequest, RequestHandle, RequestStatus};
use orthostate_machine::{Client, ClientContext};
use orthostate_signals::Signal;

struct Deadline {
    clock: Clock,
    at: Instant,
}

impl PendingRequest for Deadline {
    fn poll(&mut self) -> RequestStatus {
        if self.clock.now() >= self.at {
            RequestStatus::Succeeded
        } else {
            RequestStatus::Pending
        }
    }

    fn cancel(&mut self) {}
}

/// A periodic or one-shot timer
pub struct TimerClient {
    period: Duration,
    oneshot: bool,
    autostart: bool,
    armed: Option<RequestHandle>,
    ticks: u64,
    /// Emitted with the tick count every time the timer fires
    pub on_tick: Signal<u64>,
}

impl TimerClient {
    /// A timer firing every `period` once the scope is initialized
    pub fn periodic(period: Duration) -> Self {
        Self {
            period,
            oneshot: false,
            autostart: true,
            armed: None,
            ticks: 0,
            on_tick: Signal::new(),
        }
    }

    /// A timer firing once, `delay` after the scope is initialized
    pub fn oneshot(delay: Duration) -> Self {
        Self {
            oneshot: true,
            ..Self::periodic(delay)
        }
    }

    /// Do not arm the timer on initialization, wait for [`TimerClient::start`]
    pub fn manual(mut self) -> Self {
        self.autostart = false;
        self
    }

    /// Arm the timer, restarting the current period if it is already armed
    pub fn start(&mut self, ctx: &mut ClientContext<'_>) {
        self.stop(ctx);

        let clock = ctx.clock().clone();
        let at = clock.now() + self.period;
        self.armed = Some(ctx.register_request(None, Deadline { clock, at }));
    }

    /// Disarm the timer
    pub fn stop(&mut self, ctx: &mut ClientContext<'_>) {
        if let Some(handle) = self.armed.take() {
            ctx.cancel_request(handle);
        }
    }

    /// Whether the timer is armed
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// How many times the timer fired
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

impl Client for TimerClient {
    fn initialize(&mut self, ctx: &mut ClientContext<'_>) -> Result<(), HookError> {
        if self.autostart {
            self.start(ctx);
        }
        Ok(())
    }

    fn on_event(&mut self, event: &Event, ctx: &mut ClientContext<'_>) {
        if event.kind() != EventKind::Succeeded || event.request().is_none() || event.request() != self.armed {
            return;
        }

        self.armed = None;
        self.ticks += 1;
        trace!(ticks = self.ticks, source = ?ctx.source(), "timer tick");
        self.on_tick.emit(&self.ticks);

        if !self.oneshot {
            self.start(ctx);
        }
    }

    fn teardown(&mut self, ctx: &mut ClientContext<'_>) {
        self.stop(ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use parking_lot::Mutex;

    use orthostate_core::EventProcessor;
    use orthostate_machine::{
        EventPattern, MachineDefinition, ModeStateDef, Orthogonal, ScopeBuilder, ScopeContext, State, StateDef,
    };

    use crate::testing::Harness;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum Id {
        Run,
        Waiting,
        Ticked,
        Done,
    }

    struct Timers {
        oneshot: bool,
        manual: bool,
    }

    impl Orthogonal for Timers {
        fn on_initialize(&mut self, scope: &mut ScopeBuilder<'_>) -> Result<(), HookError> {
            let period = Duration::from_millis(100);
            let timer = if self.oneshot {
                TimerClient::oneshot(period)
            } else {
                TimerClient::periodic(period)
            };
            scope.create_client(if self.manual { timer.manual() } else { timer });
            Ok(())
        }
    }

    fn ticking(oneshot: bool, manual: bool) -> MachineDefinition<Id> {
        MachineDefinition::builder()
            .mode_state(
                ModeStateDef::new(Id::Run)
                    .orthogonal("timer", move || Timers { oneshot, manual })
                    .initial(Id::Waiting)
                    .state(StateDef::new(Id::Waiting).on(EventPattern::succeeded().from_client::<TimerClient>(), Id::Ticked))
                    .state(StateDef::new(Id::Ticked).on(EventPattern::succeeded().from_client::<TimerClient>(), Id::Done))
                    .state(StateDef::new(Id::Done)),
            )
            .initial(Id::Run)
            .build()
            .unwrap()
    }

    fn timer(harness: &Harness<Id>) -> &TimerClient {
        let scope = harness.machine.scope().unwrap();
        scope.client(scope.requires_client::<TimerClient>().unwrap()).unwrap()
    }

    #[test]
    fn test_periodic_timer_rearms_after_each_tick() {
        let mut harness = Harness::with_mock_clock(ticking(false, false));
        harness.machine.initiate().unwrap();
        assert!(timer(&harness).is_armed());

        harness.advance(Duration::from_millis(50));
        assert_eq!(harness.resolve(), 0);

        harness.advance(Duration::from_millis(60));
        assert_eq!(harness.resolve(), 1);
        harness.drain().unwrap();
        assert_eq!(harness.machine.current_state(), Some(Id::Ticked));
        assert!(timer(&harness).is_armed());

        harness.advance(Duration::from_millis(100));
        assert_eq!(harness.resolve(), 1);
        harness.drain().unwrap();

        assert_eq!(harness.machine.current_state(), Some(Id::Done));
        assert_eq!(timer(&harness).ticks(), 2);
        assert_eq!(harness.registry.len(), 1);
    }

    #[test]
    fn test_oneshot_timer_fires_once() {
        let mut harness = Harness::with_mock_clock(ticking(true, false));
        harness.machine.initiate().unwrap();

        harness.advance(Duration::from_millis(150));
        harness.resolve();
        harness.drain().unwrap();

        assert_eq!(harness.machine.current_state(), Some(Id::Ticked));
        assert!(!timer(&harness).is_armed());
        assert!(harness.registry.is_empty());

        harness.advance(Duration::from_secs(1));
        assert_eq!(harness.resolve(), 0);
    }

    struct Arm {
        ticks: Arc<Mutex<Vec<u64>>>,
    }

    impl State for Arm {
        fn runtime_configure(&mut self, ctx: &mut ScopeContext<'_>) -> Result<(), HookError> {
            let key = ctx.requires_client::<TimerClient>()?;
            let ticks = self.ticks.clone();
            let on_tick = ctx.client(key)?.on_tick.clone();
            ctx.connect(&on_tick, move |tick: &u64| ticks.lock().push(*tick));

            let (timer, mut timer_ctx) = ctx.client_mut(key)?;
            timer.start(&mut timer_ctx);
            Ok(())
        }
    }

    #[test]
    fn test_manual_timer_starts_from_a_state() {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let definition = {
            let ticks = ticks.clone();
            MachineDefinition::builder()
                .mode_state(
                    ModeStateDef::new(Id::Run)
                        .orthogonal("timer", || Timers {
                            oneshot: true,
                            manual: true,
                        })
                        .initial(Id::Waiting)
                        .state(StateDef::new(Id::Waiting).on(EventPattern::custom("Arm"), Id::Ticked))
                        .state(
                            StateDef::new(Id::Ticked)
                                .with_state(move |_| Arm { ticks: ticks.clone() })
                                .on(EventPattern::succeeded().from_client::<TimerClient>(), Id::Done),
                        )
                        .state(StateDef::new(Id::Done)),
                )
                .initial(Id::Run)
                .build()
                .unwrap()
        };
        let mut harness = Harness::with_mock_clock(definition);
        harness.machine.initiate().unwrap();
        assert!(!timer(&harness).is_armed());

        harness.queue.enqueue(Event::custom("Arm"));
        harness.drain().unwrap();
        assert!(timer(&harness).is_armed());

        harness.advance(Duration::from_millis(100));
        harness.resolve();
        harness.drain().unwrap();

        assert_eq!(harness.machine.current_state(), Some(Id::Done));
        assert_eq!(*ticks.lock(), vec![1]);
    }

    #[test]
    fn test_teardown_disarms_the_timer() {
        let mut harness = Harness::with_mock_clock(ticking(false, false));
        harness.machine.initiate().unwrap();
        assert_eq!(harness.registry.len(), 1);

        harness.machine.terminate();

        assert!(harness.registry.is_empty());
        assert_eq!(harness.machine.stats().leaked_requests, 0);
    }
}
