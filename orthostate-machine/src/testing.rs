//!
//! Test doubles shared by the machine tests: a flag-driven request, a client
//! that issues such requests, orthogonals creating it and a few behaviors.
//!

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;

use orthostate_core::{
    Event, EventKind, EventProcessor, EventReceiver, HookError, PendingRequest, ProcessError,
    RequestHandle, RequestStatus,
};
use orthostate_signals::Signal;

use crate::{
    client::{Client, ClientContext},
    context::ScopeContext,
    machine::StateMachine,
    orthogonal::{Behavior, Orthogonal},
    scope::ScopeBuilder,
    state::StateId,
};

pub(crate) const PENDING: u8 = 0;
pub(crate) const SUCCEEDED: u8 = 1;
pub(crate) const ABORTED: u8 = 2;

/// A request whose outcome is set by the test
pub(crate) struct FlagRequest {
    status: Arc<AtomicU8>,
    cancelled: Arc<AtomicBool>,
}

impl PendingRequest for FlagRequest {
    fn poll(&mut self) -> RequestStatus {
        match self.status.load(Ordering::SeqCst) {
            SUCCEEDED => RequestStatus::Succeeded,
            ABORTED => RequestStatus::Aborted,
            _ => RequestStatus::Pending,
        }
    }

    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// What the test can see of one issued request
#[derive(Clone)]
pub(crate) struct IssuedRequest {
    pub(crate) handle: RequestHandle,
    pub(crate) label: &'static str,
    status: Arc<AtomicU8>,
    cancelled: Arc<AtomicBool>,
}

impl IssuedRequest {
    pub(crate) fn complete(&self, status: u8) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub(crate) fn was_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct ProbeInner {
    log: Vec<String>,
    requests: Vec<IssuedRequest>,
    alive: HashMap<&'static str, usize>,
    alive_elsewhere_at_birth: Vec<usize>,
}

/// A shared recorder every test double writes into
#[derive(Clone, Default)]
pub(crate) struct Probe {
    inner: Arc<Mutex<ProbeInner>>,
}

impl Probe {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn log(&self, entry: impl Into<String>) {
        self.inner.lock().log.push(entry.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.inner.lock().log.clone()
    }

    pub(crate) fn requests(&self) -> Vec<IssuedRequest> {
        self.inner.lock().requests.clone()
    }

    pub(crate) fn last_request(&self, label: &str) -> Option<IssuedRequest> {
        self.inner
            .lock()
            .requests
            .iter()
            .rev()
            .find(|request| request.label == label)
            .cloned()
    }

    /// How many instances of other labels were alive whenever a client was built
    pub(crate) fn alive_elsewhere_at_birth(&self) -> Vec<usize> {
        self.inner.lock().alive_elsewhere_at_birth.clone()
    }

    fn born(&self, label: &'static str) {
        let mut inner = self.inner.lock();
        let elsewhere = inner
            .alive
            .iter()
            .filter(|(other, _)| **other != label)
            .map(|(_, count)| *count)
            .sum();
        inner.alive_elsewhere_at_birth.push(elsewhere);
        *inner.alive.entry(label).or_default() += 1;
        inner.log.push(format!("new {label}"));
    }

    fn died(&self, label: &'static str) {
        let mut inner = self.inner.lock();
        if let Some(count) = inner.alive.get_mut(label) {
            *count -= 1;
        }
        inner.log.push(format!("teardown {label}"));
    }
}

/// A client issuing flag requests
pub(crate) struct TaskClient {
    label: &'static str,
    probe: Probe,
    leaky: bool,
    outstanding: Vec<RequestHandle>,
    pub(crate) on_done: Signal<EventKind>,
}

impl TaskClient {
    pub(crate) fn start(&mut self, timeout: Option<Duration>, ctx: &mut ClientContext<'_>) -> RequestHandle {
        let status = Arc::new(AtomicU8::new(PENDING));
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = ctx.register_request(
            timeout,
            FlagRequest {
                status: status.clone(),
                cancelled: cancelled.clone(),
            },
        );

        self.outstanding.push(handle);
        self.probe.inner.lock().requests.push(IssuedRequest {
            handle,
            label: self.label,
            status,
            cancelled,
        });
        handle
    }
}

impl Client for TaskClient {
    fn on_event(&mut self, event: &Event, _ctx: &mut ClientContext<'_>) {
        if let Some(handle) = event.request() {
            self.outstanding.retain(|outstanding| *outstanding != handle);
        }
        self.on_done.emit(&event.kind());
    }

    fn teardown(&mut self, ctx: &mut ClientContext<'_>) {
        if !self.leaky {
            for handle in self.outstanding.drain(..) {
                ctx.cancel_request(handle);
            }
        }
        self.probe.died(self.label);
    }
}

/// An orthogonal creating one [`TaskClient`]
pub(crate) struct TaskOrthogonal {
    label: &'static str,
    probe: Probe,
    leaky: bool,
    idle: bool,
}

impl TaskOrthogonal {
    pub(crate) fn new(label: &'static str, probe: &Probe) -> Self {
        Self {
            label,
            probe: probe.clone(),
            leaky: false,
            idle: false,
        }
    }

    /// Start the slot out with the [`Idle`] behavior
    pub(crate) fn idle(mut self) -> Self {
        self.idle = true;
        self
    }

    /// Create a client that forgets to cancel its requests
    pub(crate) fn leaky(mut self) -> Self {
        self.leaky = true;
        self
    }
}

impl Orthogonal for TaskOrthogonal {
    fn on_initialize(&mut self, scope: &mut ScopeBuilder<'_>) -> Result<(), HookError> {
        self.probe.born(self.label);
        scope.create_client(TaskClient {
            label: self.label,
            probe: self.probe.clone(),
            leaky: self.leaky,
            outstanding: Vec::new(),
            on_done: Signal::new(),
        });
        Ok(())
    }

    fn initial_behavior(&mut self) -> Option<Box<dyn Behavior>> {
        self.idle.then(|| Box::new(Idle) as Box<dyn Behavior>)
    }
}

/// A behavior that does nothing
pub(crate) struct Idle;

impl Behavior for Idle {
    fn name(&self) -> &'static str {
        "Idle"
    }
}

/// A behavior issuing one request through its orthogonal's client on entry
pub(crate) struct Issue {
    pub(crate) timeout: Option<Duration>,
}

impl Behavior for Issue {
    fn name(&self) -> &'static str {
        "Issue"
    }

    fn on_entry(&mut self, ctx: &mut ScopeContext<'_>) -> Result<(), HookError> {
        let key = ctx.requires_client::<TaskClient>()?;
        let (client, mut client_ctx) = ctx.client_mut(key)?;
        client.start(self.timeout, &mut client_ctx);
        Ok(())
    }
}

/// Apply every queued event, returning how many were applied
pub(crate) fn drain<S: StateId>(
    machine: &mut StateMachine<S>,
    receiver: &EventReceiver,
) -> Result<usize, ProcessError> {
    let mut applied = 0;
    while let Some(envelope) = receiver.try_recv() {
        machine.process(envelope)?;
        applied += 1;
    }
    Ok(applied)
}
