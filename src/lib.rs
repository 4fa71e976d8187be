//! # pid_thermal_sim
//! Real-time PID temperature loop on a first-order-plus-dead-time plant.
//!
//! ## Layout
//! - **engine:** delay line, FOPDT plant, PID, SSR emulator, step metrics, ring buffer,
//!   the deterministic `Simulation` and the worker thread that paces it.
//! - **host:** `WorkerManager`, the async proxy the application talks to.
//! - **protocol:** commands and events exchanged over bounded channels.
//! - **config / error:** limits, configuration structs, typed errors.
//! - **utils:** cycle statistics, CSV export, plant presets.

pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod protocol;
pub mod utils;

pub use config::{ManagerConfig, SimulationConfig};
pub use engine::simulation::Simulation;
pub use host::manager::WorkerManager;
pub use protocol::{Command, EngineState, Event, SimulationSample};
