//!
//! Radial motion demo.
//!
//! A simulated mobile base drives from the origin to the end of a ray,
//! returns to the origin, pauses, rotates to the next ray and repeats until
//! every ray has been driven.  Navigation failures switch to a recovery
//! mode-state that backs off to the origin before resuming the interrupted
//! ray.
//!
//! The runtime settings are read from `radial-motion.toml` if it exists and
//! from the `ORTHOSTATE_*` environment variables.  Logging is controlled with
//! `RUST_LOG`.
//!

#![deny(missing_docs)]

use std::path::Path;

use crossbeam::channel::unbounded;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use orthostate::prelude::*;

pub mod radial_motion;

pub mod simulated_base;
use simulated_base::SimulatedBase;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
/// A position the base is asked to drive to
pub struct Waypoint {
    /// Meters along the x axis
    pub x: f64,
    /// Meters along the y axis
    pub y: f64,
}

impl Waypoint {
    /// The point every ray starts from
    pub const ORIGIN: Waypoint = Waypoint { x: 0.0, y: 0.0 };
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
/// Where the base actually stopped
pub struct Pose {
    /// Meters along the x axis
    pub x: f64,
    /// Meters along the y axis
    pub y: f64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match RuntimeConfig::load(Some(Path::new("radial-motion.toml"))) {
        Ok(config) => config,
        Err(error) => {
            error!(%error, "invalid runtime configuration");
            std::process::exit(1);
        }
    };

    let (tx, rx) = unbounded();
    let interrupt = tx.clone();
    ctrlc::set_handler(move || interrupt.send(true).expect("Unable to send data"))
        .expect("Error setting Ctrl-C handler");

    let server = ActionServer::new();
    let base = SimulatedBase::new(server.clone(), 1.5, 0.1).spawn();

    let definition = match radial_motion::definition(server, tx) {
        Ok(definition) => definition,
        Err(error) => {
            error!(%error, "invalid state machine");
            std::process::exit(1);
        }
    };

    let runtime = Runtime::new(config);
    let machine = runtime.state_machine(definition);
    let _status = machine.status_signal().connect(|status| {
        info!(
            mode = ?status.mode,
            state = ?status.state,
            scope = %status.generation,
            tag = ?status.tag,
            "status"
        );
    });

    match runtime.run(machine, rx) {
        Ok(machine) => info!(stats = ?machine.stats(), "radial motion stopped"),
        Err(error) => error!(%error, "radial motion failed"),
    }
    base.stop();
}
