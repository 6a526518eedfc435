//! Eye-tracking experiment runner: a welcome image, a timed instruction, a
//! recorded stimulus answered with a key press, a color screen and drift
//! correction, with tab-delimited logs per participant.

pub mod config;
pub mod display;
pub mod error;
pub mod experiment;
pub mod keyboard;
pub mod logfile;
pub mod renderer;
pub mod runner;
pub mod screen;
pub mod session;
pub mod timer;
pub mod tracker;

pub use config::{ExperimentConfig, TrackerType};
pub use error::{ExperimentError, Result};
pub use experiment::Experiment;
pub use runner::{run_experiment, RunParams};
