//!
//! The radial motion state machine.
//!
//! `MsRun` owns a navigation orthogonal, a timer orthogonal and the
//! [`RayPlan`] component.  Its inner states drive out along the current ray,
//! drive back, and pause before rotating to the next ray.  Any aborted or
//! timed out navigation goal leaves `MsRun` for `MsRecover`, which backs off
//! to the origin and then re-enters `MsRun` with a fresh scope.
//!

use std::{
    f64::consts::TAU,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use crossbeam::channel::Sender;
use tracing::info;

use orthostate::prelude::*;

use crate::{Pose, Waypoint};

/// The navigation client every state drives the base through
pub type NavClient = ActionClient<Waypoint, Pose>;

type NavClientGoal = SendGoal<Waypoint, Pose>;

const GOAL_TIMEOUT: Duration = Duration::from_secs(10);
const ALL_RAYS_DONE: &str = "AllRaysDone";

/// The states of the machine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Id {
    /// Driving the rays
    MsRun,
    /// Driving to the end of the current ray
    StNavigateToEndPoint,
    /// Driving back along the current ray
    StReturnToOrigin,
    /// Pausing before the next ray
    StRotate,
    /// Every ray has been driven
    StFinished,
    /// Recovering from a navigation failure
    MsRecover,
    /// Backing off to the origin
    StBackOff,
}

struct Navigation {
    server: ActionServer<Waypoint, Pose>,
}

impl Orthogonal for Navigation {
    fn on_initialize(&mut self, scope: &mut ScopeBuilder<'_>) -> Result<(), HookError> {
        scope.create_client(self.server.create_client());
        Ok(())
    }
}

struct Pause(Duration);

impl Orthogonal for Pause {
    fn on_initialize(&mut self, scope: &mut ScopeBuilder<'_>) -> Result<(), HookError> {
        scope.create_client(TimerClient::oneshot(self.0).manual());
        Ok(())
    }
}

/// Which ray is being driven.
///
/// The count of completed rays outlives the scope so a recovery resumes the
/// interrupted ray instead of starting over.
pub struct RayPlan {
    completed: Arc<AtomicU32>,
    rays: u32,
    radius: f64,
}

impl Component for RayPlan {}

impl RayPlan {
    /// The end of the current ray
    pub fn end_point(&self) -> Waypoint {
        let angle = TAU * f64::from(self.completed.load(Ordering::SeqCst)) / f64::from(self.rays);
        Waypoint {
            x: self.radius * angle.cos(),
            y: self.radius * angle.sin(),
        }
    }

    /// Mark the current ray as driven, returning whether rays remain
    pub fn complete_ray(&self) -> bool {
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        info!(completed, rays = self.rays, "ray completed");
        completed < self.rays
    }
}

struct MsRun {
    completed: Arc<AtomicU32>,
    rays: u32,
    radius: f64,
}

impl ModeState for MsRun {
    fn on_initialize(&mut self, scope: &mut ScopeBuilder<'_>) -> Result<(), HookError> {
        scope.create_component(RayPlan {
            completed: self.completed.clone(),
            rays: self.rays,
            radius: self.radius,
        });
        Ok(())
    }
}

/// Sends the end point of the current ray
struct NavigateRay;

impl Behavior for NavigateRay {
    fn name(&self) -> &'static str {
        "NavigateRay"
    }

    fn on_entry(&mut self, ctx: &mut ScopeContext<'_>) -> Result<(), HookError> {
        let plan = ctx.requires_component::<RayPlan>()?;
        let goal = ctx.component(plan)?.end_point();

        let nav = ctx.requires_client::<NavClient>()?;
        let (client, mut client_ctx) = ctx.client_mut(nav)?;
        client.send_goal(goal, Some(GOAL_TIMEOUT), &mut client_ctx);
        Ok(())
    }

    fn on_exit(&mut self, ctx: &mut ScopeContext<'_>) -> Result<(), HookError> {
        let nav = ctx.requires_client::<NavClient>()?;
        let (client, mut client_ctx) = ctx.client_mut(nav)?;
        client.cancel_goal(&mut client_ctx);
        Ok(())
    }
}

struct StRotate;

impl State for StRotate {
    fn on_entry(&mut self, ctx: &mut ScopeContext<'_>) -> Result<(), HookError> {
        let plan = ctx.requires_component::<RayPlan>()?;
        if !ctx.component(plan)?.complete_ray() {
            ctx.post(EventKind::Custom(ALL_RAYS_DONE));
            return Ok(());
        }

        let timer = ctx.requires_client::<TimerClient>()?;
        let (timer, mut timer_ctx) = ctx.client_mut(timer)?;
        timer.start(&mut timer_ctx);
        Ok(())
    }
}

struct StFinished {
    done: Sender<bool>,
}

impl State for StFinished {
    fn on_entry(&mut self, _ctx: &mut ScopeContext<'_>) -> Result<(), HookError> {
        info!("every ray driven");
        self.done
            .send(true)
            .map_err(|_| HookError::failed("nobody is waiting for the run to finish"))
    }
}

/// Build the radial motion machine.
///
/// `done` receives `true` once every ray has been driven.
pub fn definition(
    server: ActionServer<Waypoint, Pose>,
    done: Sender<bool>,
) -> Result<MachineDefinition<Id>, ConfigurationError> {
    let completed = Arc::new(AtomicU32::new(0));
    let nav_succeeded = || EventPattern::succeeded().from_client::<NavClient>();
    let recover_server = server.clone();

    let run = ModeStateDef::new(Id::MsRun)
        .param("rays", 8.0)
        .param("radius_meters", 3.0)
        .hooks(move |params: &Parameters| MsRun {
            completed: completed.clone(),
            rays: params.get_or("rays", 8.0) as u32,
            radius: params.get_or("radius_meters", 3.0),
        })
        .orthogonal("nav", move || Navigation {
            server: server.clone(),
        })
        .orthogonal("timer", || Pause(Duration::from_millis(500)))
        .initial(Id::StNavigateToEndPoint)
        .state(
            StateDef::new(Id::StNavigateToEndPoint)
                .configure("nav", |_| NavigateRay)
                .on_tagged(nav_succeeded(), Id::StReturnToOrigin, TransitionTag::Success),
        )
        .state(
            StateDef::new(Id::StReturnToOrigin)
                .configure("nav", |_| NavClientGoal::new(Waypoint::ORIGIN).with_timeout(GOAL_TIMEOUT))
                .on_tagged(nav_succeeded(), Id::StRotate, TransitionTag::Success),
        )
        .state(
            StateDef::new(Id::StRotate)
                .with_state(|_| StRotate)
                .requires_component::<RayPlan>()
                .on(EventPattern::succeeded().from_client::<TimerClient>(), Id::StNavigateToEndPoint)
                .on(EventPattern::custom(ALL_RAYS_DONE), Id::StFinished),
        )
        .state(StateDef::new(Id::StFinished).with_state(move |_| StFinished { done: done.clone() }))
        .on_tagged(
            EventPattern::aborted().from_client::<NavClient>(),
            Id::MsRecover,
            TransitionTag::Abort,
        )
        .on_tagged(
            EventPattern::timeout().from_client::<NavClient>(),
            Id::MsRecover,
            TransitionTag::Abort,
        )
        .requires_client::<NavClient>()
        .requires_client::<TimerClient>();

    let recover = ModeStateDef::new(Id::MsRecover)
        .orthogonal("nav", move || Navigation {
            server: recover_server.clone(),
        })
        .initial(Id::StBackOff)
        .state(
            StateDef::new(Id::StBackOff)
                .configure("nav", |_| NavClientGoal::new(Waypoint::ORIGIN).with_timeout(GOAL_TIMEOUT))
                .on_tagged(nav_succeeded(), Id::MsRun, TransitionTag::Success)
                .on(EventPattern::aborted().from_client::<NavClient>(), Id::StBackOff),
        );

    MachineDefinition::builder()
        .mode_state(run)
        .mode_state(recover)
        .initial(Id::MsRun)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crossbeam::channel::unbounded;

    #[test]
    fn test_definition_builds() {
        let (done, _) = unbounded();
        let definition = definition(ActionServer::new(), done).unwrap();

        assert_eq!(definition.initial(), Id::MsRun);
        assert_eq!(definition.mode_state_of(Id::StRotate), Some(Id::MsRun));
        assert_eq!(definition.mode_state_of(Id::StBackOff), Some(Id::MsRecover));
    }

    #[test]
    fn test_rays_are_evenly_spaced() {
        let plan = RayPlan {
            completed: Arc::new(AtomicU32::new(0)),
            rays: 4,
            radius: 2.0,
        };

        let first = plan.end_point();
        assert!((first.x - 2.0).abs() < 1e-9 && first.y.abs() < 1e-9);

        assert!(plan.complete_ray());
        let second = plan.end_point();
        assert!(second.x.abs() < 1e-9 && (second.y - 2.0).abs() < 1e-9);

        assert!(plan.complete_ray());
        assert!(plan.complete_ray());
        assert!(!plan.complete_ray());
    }
}
