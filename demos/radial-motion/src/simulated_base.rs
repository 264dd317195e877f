//!
//! A mobile base simulated on its own thread.
//!
//! The base serves navigation goals one at a time, driving in a straight
//! line at a fixed speed.  Every goal has a chance of hitting an obstacle,
//! which aborts it.
//!

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use rand::{thread_rng, Rng};
use tracing::{debug, info, warn};

use orthostate::prelude::{ActionServer, ServerGoal};

use crate::{Pose, Waypoint};

const STEP: Duration = Duration::from_millis(20);

/// The simulated base
pub struct SimulatedBase {
    server: ActionServer<Waypoint, Pose>,
    speed: f64,
    failure_rate: f64,
    pose: Pose,
}

impl SimulatedBase {
    /// Create a base at the origin driving at `speed` meters per second
    pub fn new(server: ActionServer<Waypoint, Pose>, speed: f64, failure_rate: f64) -> Self {
        Self {
            server,
            speed,
            failure_rate,
            pose: Pose::default(),
        }
    }

    /// Serve goals on a new thread until stopped
    pub fn spawn(mut self) -> BaseHandle {
        let running = Arc::new(AtomicBool::new(true));
        let thread = {
            let running = running.clone();
            thread::spawn(move || {
                while running.load(Ordering::SeqCst) {
                    if let Some(goal) = self.server.wait_for_goal(Duration::from_millis(100)) {
                        self.drive(goal, &running);
                    }
                }
            })
        };

        BaseHandle { running, thread }
    }

    fn drive(&mut self, goal: ServerGoal<Waypoint, Pose>, running: &AtomicBool) {
        let target = *goal.goal();
        info!(x = target.x, y = target.y, "driving to waypoint");

        let mut rng = thread_rng();
        let obstacle_at = rng.gen_bool(self.failure_rate).then(|| rng.gen_range(0.2..0.8));
        let distance = (target.x - self.pose.x).hypot(target.y - self.pose.y);
        let start = self.pose;
        let mut travelled = 0.0;

        while travelled < distance {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            if goal.is_cancel_requested() {
                debug!("goal cancelled");
                return;
            }

            thread::sleep(STEP);
            travelled = (travelled + self.speed * STEP.as_secs_f64()).min(distance);
            let progress = travelled / distance;
            self.pose = Pose {
                x: start.x + (target.x - start.x) * progress,
                y: start.y + (target.y - start.y) * progress,
            };

            if obstacle_at.is_some_and(|at| progress >= at) {
                warn!(x = self.pose.x, y = self.pose.y, "obstacle detected");
                goal.abort("obstacle detected");
                return;
            }
        }

        self.pose = Pose {
            x: target.x,
            y: target.y,
        };
        goal.succeed(self.pose);
    }
}

/// Stops a spawned [`SimulatedBase`]
pub struct BaseHandle {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl BaseHandle {
    /// Stop serving goals and wait for the base thread to exit
    pub fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        if self.thread.join().is_err() {
            warn!("simulated base thread panicked");
        }
    }
}
