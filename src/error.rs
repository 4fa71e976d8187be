//! Error taxonomy for the engine and its host proxy.
//!
//! - **CommandError:** validation rejections at the command boundary (warning, recoverable).
//! - **TickError:** numeric faults (warning, sample dropped) or invariant violations (fatal).
//! - **EngineError:** initialization / invariant failures that park the engine in `Error`.
//! - **MetricsError:** instrumentation values outside their plausible range.
//! - **HostError:** what the host-side proxy reports to its caller.
//!
//! Every engine-side error converts into an [`ErrorEvent`] for the `ERROR` event.

use std::io;

use thiserror::Error;

use crate::protocol::{CommandKind, EngineState, ErrorEvent, Severity};

/// Rejection of a single command. The engine keeps its prior parameters.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    #[error("invalid PID gains: {what}")]
    InvalidPid { what: String },

    #[error("invalid plant parameters: {what}")]
    InvalidPlant { what: String },

    #[error("timestep {dt:.3}s against tau {tau:.3}s gives dt/tau = {ratio:.3} > 1")]
    UnstableRatio { dt: f64, tau: f64, ratio: f64 },

    #[error("invalid setpoint: {what}")]
    InvalidSetpoint { what: String },

    #[error("invalid noise configuration: {what}")]
    InvalidNoise { what: String },

    #[error("invalid SSR configuration: {what}")]
    InvalidSsr { what: String },

    #[error("invalid timestep: {what}")]
    InvalidTimestep { what: String },

    #[error("{command} is not accepted while the engine is {state}")]
    NotAllowed {
        command: CommandKind,
        state: EngineState,
    },
}

impl CommandError {
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::InvalidPid { .. } => "VALIDATION_001",
            CommandError::InvalidPlant { .. } => "VALIDATION_002",
            CommandError::UnstableRatio { .. } => "VALIDATION_003",
            CommandError::InvalidSetpoint { .. } => "VALIDATION_004",
            CommandError::InvalidNoise { .. } => "VALIDATION_005",
            CommandError::InvalidSsr { .. } => "VALIDATION_006",
            CommandError::InvalidTimestep { .. } => "VALIDATION_007",
            CommandError::NotAllowed { .. } => "STATE_001",
        }
    }

    /// Commands refused because the engine sits in `Error` need a host reinitialization.
    pub fn severity(&self) -> Severity {
        match self {
            CommandError::NotAllowed {
                state: EngineState::Error,
                ..
            } => Severity::Critical,
            _ => Severity::Warning,
        }
    }

    fn suggestions(&self) -> Vec<String> {
        let hints: &[&str] = match self {
            CommandError::InvalidPid { .. } => &["Use finite, non-negative kp, ki and kd"],
            CommandError::InvalidPlant { .. } => &[
                "tau must be greater than zero",
                "L must be between zero and the maximum dead time",
                "K must be finite and non-negative",
            ],
            CommandError::UnstableRatio { .. } => &[
                "Increase tau or decrease the timestep so that dt/tau <= 1",
            ],
            CommandError::InvalidSetpoint { .. } => &["Use a finite setpoint and a non-negative ramp rate"],
            CommandError::InvalidNoise { .. } => &["sigma must be finite and non-negative"],
            CommandError::InvalidSsr { .. } => &["The SSR period must be at least one timestep"],
            CommandError::InvalidTimestep { .. } => &["Pick a timestep inside the advertised limits"],
            CommandError::NotAllowed {
                state: EngineState::Error,
                ..
            } => &["Reinitialize the engine"],
            CommandError::NotAllowed { .. } => &[],
        };
        hints.iter().map(|s| s.to_string()).collect()
    }
}

impl From<&CommandError> for ErrorEvent {
    fn from(err: &CommandError) -> Self {
        let severity = err.severity();
        ErrorEvent {
            severity,
            code: err.code().to_string(),
            message: err.to_string(),
            details: None,
            suggestions: err.suggestions(),
            recoverable: severity == Severity::Warning,
        }
    }
}

/// Unrecoverable engine failure. The engine stays in `Error` until the host rebuilds it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid configuration: {what}")]
    InvalidConfig { what: String },

    #[error("invariant violated: {what}")]
    Invariant { what: String },
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidConfig { .. } => "INIT_001",
            EngineError::Invariant { .. } => "INVARIANT_001",
        }
    }
}

impl From<&EngineError> for ErrorEvent {
    fn from(err: &EngineError) -> Self {
        ErrorEvent {
            severity: Severity::Critical,
            code: err.code().to_string(),
            message: err.to_string(),
            details: None,
            suggestions: vec!["Reinitialize the engine with a valid configuration".to_string()],
            recoverable: false,
        }
    }
}

/// Non-finite value produced inside a tick; the sample is not emitted.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("non-finite {quantity} at t={t:.3}s")]
pub struct NumericError {
    pub quantity: &'static str,
    pub t: f64,
}

impl From<&NumericError> for ErrorEvent {
    fn from(err: &NumericError) -> Self {
        ErrorEvent {
            severity: Severity::Warning,
            code: "NUMERIC_001".to_string(),
            message: err.to_string(),
            details: Some("previous state retained for the next tick".to_string()),
            suggestions: vec![
                "Reduce the plant gain or the PID gains".to_string(),
                "Reset the simulation".to_string(),
            ],
            recoverable: true,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TickError {
    #[error(transparent)]
    Numeric(#[from] NumericError),

    #[error(transparent)]
    Fatal(#[from] EngineError),
}

impl From<&TickError> for ErrorEvent {
    fn from(err: &TickError) -> Self {
        match err {
            TickError::Numeric(e) => e.into(),
            TickError::Fatal(e) => e.into(),
        }
    }
}

/// Performance metric outside `[0, 1000]`.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("metric {field} = {value:.3} outside [0, 1000]")]
pub struct MetricsError {
    pub field: &'static str,
    pub value: f64,
}

impl From<&MetricsError> for ErrorEvent {
    fn from(err: &MetricsError) -> Self {
        ErrorEvent {
            severity: Severity::Warning,
            code: "METRICS_001".to_string(),
            message: err.to_string(),
            details: None,
            suggestions: vec!["Trigger a new step to restart the metrics calculation".to_string()],
            recoverable: true,
        }
    }
}

/// Failures surfaced by the host-side proxy.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("command {id} ({command}) was not acknowledged within {timeout_ms} ms")]
    Timeout {
        id: u64,
        command: CommandKind,
        timeout_ms: u128,
    },

    #[error("engine did not report READY within {timeout_ms} ms")]
    NotReady { timeout_ms: u128 },

    #[error("engine connection lost")]
    Disconnected,

    #[error("command rejected [{}]: {}", .0.code, .0.message)]
    Rejected(ErrorEvent),

    #[error("command queue full")]
    QueueFull,

    #[error("failed to spawn engine worker: {0}")]
    Spawn(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no samples to export")]
    Empty,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}
