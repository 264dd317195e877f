//!
//! Local Action Clients and Servers
//!
//! An action is a goal sent from a client to a server that is worked on
//! asynchronously and eventually answered with exactly one outcome.  Local
//! actions utilize crossbeam channels: goals travel over a shared channel to
//! the server and every goal carries its own single-slot channel for the
//! outcome.
//!
//! The [`ActionClient`] registers every goal it sends as an outstanding
//! request, so the signal detector turns the outcome into a `Succeeded`,
//! `Aborted` or `Preempted` event.  When that event is applied the client
//! emits the matching signal.
//!

use std::{
    marker::PhantomData,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, warn};

use orthostate_core::{Event, EventKind, HookError, PendingRequest, RequestHandle, RequestStatus};
use orthostate_machine::{Behavior, Client, ClientContext, ScopeContext};
use orthostate_signals::Signal;

/// The answer a server gives to a goal
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GoalOutcome<R> {
    /// The goal was reached
    Succeeded(R),
    /// The server gave up on the goal
    Aborted(String),
    /// The goal was preempted on the server side
    Preempted,
}

type OutcomeSlot<R> = Arc<Mutex<Option<GoalOutcome<R>>>>;

/// A goal as seen by the server
pub struct ServerGoal<G, R> {
    goal: G,
    outcome_tx: Sender<GoalOutcome<R>>,
    cancel: Arc<AtomicBool>,
}

impl<G, R> ServerGoal<G, R> {
    /// The requested goal
    pub fn goal(&self) -> &G {
        &self.goal
    }

    /// Whether the client cancelled the goal (or it timed out)
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Report that the goal was reached
    pub fn succeed(self, result: R) {
        self.finish(GoalOutcome::Succeeded(result));
    }

    /// Report that the goal could not be reached
    pub fn abort(self, reason: impl Into<String>) {
        self.finish(GoalOutcome::Aborted(reason.into()));
    }

    /// Report that the goal was preempted
    pub fn preempt(self) {
        self.finish(GoalOutcome::Preempted);
    }

    fn finish(self, outcome: GoalOutcome<R>) {
        // Nobody listens for the outcome of a cancelled goal
        let _ = self.outcome_tx.send(outcome);
    }
}

/// The outstanding request backing one goal
struct GoalRequest<R> {
    outcome_rx: Receiver<GoalOutcome<R>>,
    outcome: OutcomeSlot<R>,
    cancel: Arc<AtomicBool>,
}

impl<R: Send> PendingRequest for GoalRequest<R> {
    fn poll(&mut self) -> RequestStatus {
        let outcome = match self.outcome_rx.try_recv() {
            Ok(outcome) => outcome,
            Err(TryRecvError::Empty) => return RequestStatus::Pending,
            Err(TryRecvError::Disconnected) => {
                GoalOutcome::Aborted(String::from("action server dropped the goal"))
            }
        };

        let status = match outcome {
            GoalOutcome::Succeeded(_) => RequestStatus::Succeeded,
            GoalOutcome::Aborted(_) => RequestStatus::Aborted,
            GoalOutcome::Preempted => RequestStatus::Preempted,
        };
        *self.outcome.lock() = Some(outcome);
        status
    }

    fn cancel(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}

/// Create a connected server and client pair
pub fn local_action<G, R: 'static>() -> (ActionClient<G, R>, ActionServer<G, R>) {
    let server = ActionServer::new();
    (server.create_client(), server)
}

/// A server receiving goals from any number of local clients
pub struct ActionServer<G, R> {
    goal_tx: Sender<ServerGoal<G, R>>,
    goal_rx: Receiver<ServerGoal<G, R>>,
}

impl<G, R> Clone for ActionServer<G, R> {
    /// Another handle to the same server.  A goal is received by whichever
    /// handle polls for it first.
    fn clone(&self) -> Self {
        Self {
            goal_tx: self.goal_tx.clone(),
            goal_rx: self.goal_rx.clone(),
        }
    }
}

impl<G, R> Default for ActionServer<G, R> {
    fn default() -> Self {
        let (goal_tx, goal_rx) = channel::unbounded();
        Self { goal_tx, goal_rx }
    }
}

impl<G, R: 'static> ActionServer<G, R> {
    /// Create a server without clients
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client sending its goals to this server
    pub fn create_client(&self) -> ActionClient<G, R> {
        ActionClient {
            goal_tx: self.goal_tx.clone(),
            active: None,
            last_outcome: None,
            on_succeeded: Signal::new(),
            on_aborted: Signal::new(),
            on_preempted: Signal::new(),
        }
    }

    /// Take the next goal if one is waiting
    pub fn poll_for_goal(&self) -> Option<ServerGoal<G, R>> {
        self.goal_rx.try_recv().ok()
    }

    /// Take every waiting goal
    pub fn poll_for_goals(&self) -> Vec<ServerGoal<G, R>> {
        self.goal_rx.try_iter().collect()
    }

    /// Block for at most `timeout` waiting for the next goal
    pub fn wait_for_goal(&self, timeout: Duration) -> Option<ServerGoal<G, R>> {
        self.goal_rx.recv_timeout(timeout).ok()
    }
}

/// A client sending goals to an [`ActionServer`].
///
/// At most one goal is active at a time; sending a new goal cancels the
/// previous one.
pub struct ActionClient<G, R> {
    goal_tx: Sender<ServerGoal<G, R>>,
    active: Option<(RequestHandle, OutcomeSlot<R>)>,
    last_outcome: Option<GoalOutcome<R>>,
    /// Emitted with the result when the active goal succeeds
    pub on_succeeded: Signal<R>,
    /// Emitted with the reason when the active goal is aborted
    pub on_aborted: Signal<String>,
    /// Emitted when the active goal is preempted
    pub on_preempted: Signal<()>,
}

impl<G: Send + 'static, R: Send + 'static> ActionClient<G, R> {
    /// Send a goal, cancelling the active one if there is one
    pub fn send_goal(&mut self, goal: G, timeout: Option<Duration>, ctx: &mut ClientContext<'_>) -> RequestHandle {
        self.cancel_goal(ctx);

        let (outcome_tx, outcome_rx) = channel::bounded(1);
        let cancel = Arc::new(AtomicBool::new(false));
        let outcome = Arc::new(Mutex::new(None));

        if self
            .goal_tx
            .send(ServerGoal {
                goal,
                outcome_tx,
                cancel: cancel.clone(),
            })
            .is_err()
        {
            warn!(source = ?ctx.source(), "action server is gone, the goal will be aborted");
        }

        let handle = ctx.register_request(
            timeout,
            GoalRequest {
                outcome_rx,
                outcome: outcome.clone(),
                cancel,
            },
        );
        debug!(%handle, source = ?ctx.source(), "goal sent");
        self.active = Some((handle, outcome));
        handle
    }

    /// Cancel the active goal, returning whether there was one
    pub fn cancel_goal(&mut self, ctx: &mut ClientContext<'_>) -> bool {
        match self.active.take() {
            Some((handle, _)) => ctx.cancel_request(handle),
            None => false,
        }
    }

    /// Whether a goal is in flight
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// The outcome of the last goal that finished
    pub fn last_outcome(&self) -> Option<&GoalOutcome<R>> {
        self.last_outcome.as_ref()
    }
}

impl<G: Send + 'static, R: Send + 'static> Client for ActionClient<G, R> {
    fn on_event(&mut self, event: &Event, _ctx: &mut ClientContext<'_>) {
        let Some((handle, _)) = self.active.as_ref() else {
            return;
        };
        if event.request() != Some(*handle) {
            return;
        }

        if event.kind() == EventKind::Timeout {
            self.active = None;
            return;
        }

        let Some((_, slot)) = self.active.take() else {
            return;
        };
        let Some(outcome) = slot.lock().take() else {
            return;
        };

        match &outcome {
            GoalOutcome::Succeeded(result) => self.on_succeeded.emit(result),
            GoalOutcome::Aborted(reason) => self.on_aborted.emit(reason),
            GoalOutcome::Preempted => self.on_preempted.emit(&()),
        };
        self.last_outcome = Some(outcome);
    }

    fn teardown(&mut self, ctx: &mut ClientContext<'_>) {
        self.cancel_goal(ctx);
    }
}

/// A behavior sending one goal through its orthogonal's [`ActionClient`]
/// on entry.
///
/// The goal is cancelled when the behavior exits before it finished.
pub struct SendGoal<G, R> {
    goal: G,
    timeout: Option<Duration>,
    _result: PhantomData<fn() -> R>,
}

impl<G, R> SendGoal<G, R> {
    /// Send `goal` without a timeout
    pub fn new(goal: G) -> Self {
        Self {
            goal,
            timeout: None,
            _result: PhantomData,
        }
    }

    /// Time the goal out after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<G: Clone + Send + 'static, R: Send + 'static> Behavior for SendGoal<G, R> {
    fn name(&self) -> &'static str {
        "SendGoal"
    }

    fn on_entry(&mut self, ctx: &mut ScopeContext<'_>) -> Result<(), HookError> {
        let key = ctx.requires_client::<ActionClient<G, R>>()?;
        let (client, mut client_ctx) = ctx.client_mut(key)?;
        client.send_goal(self.goal.clone(), self.timeout, &mut client_ctx);
        Ok(())
    }

    fn on_exit(&mut self, ctx: &mut ScopeContext<'_>) -> Result<(), HookError> {
        let key = ctx.requires_client::<ActionClient<G, R>>()?;
        let (client, mut client_ctx) = ctx.client_mut(key)?;
        client.cancel_goal(&mut client_ctx);
        Ok(())
    }
}
