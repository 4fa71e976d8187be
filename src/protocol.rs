//! protocol.rs
//! Typed messages exchanged between the host proxy and the engine worker.
//! - Commands (host -> engine) carry a unique id echoed by the matching `Ack` or `Error` event.
//! - Events (engine -> host) are stamped with seconds since the worker started.
//! - Everything here is plain data; both sides only ever hold copies.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::controller::PidParameters;
use crate::engine::metrics::MetricsSnapshot;
use crate::engine::plant::PlantParameters;
use crate::engine::ssr::SsrConfig;

// ============================================================================
// Engine state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineState {
    Initializing,
    Ready,
    Running,
    Paused,
    Error,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Initializing => "Initializing",
            EngineState::Ready => "Ready",
            EngineState::Running => "Running",
            EngineState::Paused => "Paused",
            EngineState::Error => "Error",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Commands
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    SetPid(PidParameters),
    SetPlant(PlantParameters),
    SetSetpoint {
        value: f64,
        #[serde(rename = "rampRate")]
        ramp_rate: Option<f64>,
    },
    SetNoise {
        enabled: bool,
        sigma: Option<f64>,
        seed: Option<u64>,
    },
    SetSsr(SsrConfig),
    SetTimestep {
        dt: f64,
    },
    Start,
    Pause,
    Reset {
        #[serde(rename = "preserveParams")]
        preserve_params: bool,
    },
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::SetPid(_) => CommandKind::SetPid,
            Command::SetPlant(_) => CommandKind::SetPlant,
            Command::SetSetpoint { .. } => CommandKind::SetSetpoint,
            Command::SetNoise { .. } => CommandKind::SetNoise,
            Command::SetSsr(_) => CommandKind::SetSsr,
            Command::SetTimestep { .. } => CommandKind::SetTimestep,
            Command::Start => CommandKind::Start,
            Command::Pause => CommandKind::Pause,
            Command::Reset { .. } => CommandKind::Reset,
        }
    }
}

/// Discriminant of a [`Command`], used for acks and per-tick coalescing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    SetPid,
    SetPlant,
    SetSetpoint,
    SetNoise,
    SetSsr,
    SetTimestep,
    Start,
    Pause,
    Reset,
}

impl CommandKind {
    /// Parameter sets are last-write-wins within one tick; lifecycle commands are not.
    pub fn is_parameter(&self) -> bool {
        !matches!(self, CommandKind::Start | CommandKind::Pause | CommandKind::Reset)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandKind::SetPid => "SET_PID",
            CommandKind::SetPlant => "SET_PLANT",
            CommandKind::SetSetpoint => "SET_SETPOINT",
            CommandKind::SetNoise => "SET_NOISE",
            CommandKind::SetSsr => "SET_SSR",
            CommandKind::SetTimestep => "SET_TIMESTEP",
            CommandKind::Start => "START",
            CommandKind::Pause => "PAUSE",
            CommandKind::Reset => "RESET",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub id: u64,
    pub command: Command,
}

// ============================================================================
// Events
// ============================================================================

/// One telemetry sample. `u` is the relay state (0/1) when SSR emulation is on.
/// Field order and names are the CSV export columns.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationSample {
    pub t: f64,
    #[serde(rename = "SP")]
    pub sp: f64,
    #[serde(rename = "PV")]
    pub pv: f64,
    pub u: f64,
    #[serde(rename = "PV_clean")]
    pub pv_clean: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub max_timestep: f64,
    pub min_timestep: f64,
    pub max_buffer_size: usize,
}

/// Worker loop statistics. Cycle times in milliseconds, uptime in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub avg_cycle_time: f64,
    pub max_cycle_time: f64,
    pub cpu_usage_estimate: f64, // Percent of the tick period spent working
    pub uptime: f64,
    pub samples_processed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub severity: Severity,
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub suggestions: Vec<String>,
    pub recoverable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    Ready {
        version: String,
        capabilities: Vec<String>,
        limits: Limits,
    },
    Ack {
        command: CommandKind,
        superseded: bool,
    },
    Tick(SimulationSample),
    State {
        state: EngineState,
        performance: Performance,
    },
    Metrics(MetricsSnapshot),
    Error(ErrorEvent),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Ready { .. } => "READY",
            Event::Ack { .. } => "ACK",
            Event::Tick(_) => "TICK",
            Event::State { .. } => "STATE",
            Event::Metrics(_) => "METRICS",
            Event::Error(_) => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Option<u64>, // Command id this event answers, if any
    pub timestamp: f64,
    pub event: Event,
}
