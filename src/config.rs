//! config.rs
//! Engine limits and the two configuration structs.
//! - `SimulationConfig`: everything the worker needs to build a session (validated at start).
//! - `ManagerConfig`: host-side timeouts, channel capacities, worker pinning.

use std::time::Duration;

use crate::engine::controller::PidParameters;
use crate::engine::metrics::MetricsConfig;
use crate::engine::plant::{NoiseConfig, PlantParameters};
use crate::engine::ssr::SsrConfig;
use crate::error::EngineError;
use crate::protocol::Limits;

pub const MIN_TIMESTEP: f64 = 0.01;
pub const MAX_TIMESTEP: f64 = 1.0;
pub const MAX_BUFFER_SIZE: usize = 100_000;
pub const MAX_DEAD_TIME: f64 = 600.0;

pub const DEFAULT_TIMESTEP: f64 = 0.1;
pub const DEFAULT_BUFFER_SIZE: usize = 10_000;
pub const DEFAULT_SETPOINT: f64 = 60.0;

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const CAPABILITIES: &[&str] = &[
    "fopdt",
    "pid_anti_windup",
    "dead_time",
    "noise",
    "ssr",
    "setpoint_ramp",
    "metrics",
];

pub fn limits() -> Limits {
    Limits {
        max_timestep: MAX_TIMESTEP,
        min_timestep: MIN_TIMESTEP,
        max_buffer_size: MAX_BUFFER_SIZE,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub timestep: f64,
    pub buffer_size: usize,
    pub pid: PidParameters,
    pub plant: PlantParameters,
    pub noise: NoiseConfig,
    pub ssr: SsrConfig,
    pub setpoint: f64,
    pub metrics: MetricsConfig,
    pub state_interval: Duration, // STATE heartbeat period
    pub metrics_every: u32,       // Ticks between METRICS events
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            timestep: DEFAULT_TIMESTEP,
            buffer_size: DEFAULT_BUFFER_SIZE,
            pid: PidParameters::default(),
            plant: PlantParameters::default(),
            noise: NoiseConfig::default(),
            ssr: SsrConfig::default(),
            setpoint: DEFAULT_SETPOINT,
            metrics: MetricsConfig::default(),
            state_interval: Duration::from_secs(1),
            metrics_every: 1,
        }
    }
}

impl SimulationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timestep(mut self, dt: f64) -> Self {
        self.timestep = dt;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_pid(mut self, pid: PidParameters) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_plant(mut self, plant: PlantParameters) -> Self {
        self.plant = plant;
        self
    }

    pub fn with_noise(mut self, noise: NoiseConfig) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_ssr(mut self, ssr: SsrConfig) -> Self {
        self.ssr = ssr;
        self
    }

    pub fn with_setpoint(mut self, setpoint: f64) -> Self {
        self.setpoint = setpoint;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_state_interval(mut self, interval: Duration) -> Self {
        self.state_interval = interval;
        self
    }

    pub fn with_metrics_every(mut self, ticks: u32) -> Self {
        self.metrics_every = ticks;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let fail = |what: String| Err(EngineError::InvalidConfig { what });

        if !(MIN_TIMESTEP..=MAX_TIMESTEP).contains(&self.timestep) {
            return fail(format!(
                "timestep {} outside [{}, {}]",
                self.timestep, MIN_TIMESTEP, MAX_TIMESTEP
            ));
        }
        if self.buffer_size == 0 || self.buffer_size > MAX_BUFFER_SIZE {
            return fail(format!(
                "buffer_size {} outside [1, {}]",
                self.buffer_size, MAX_BUFFER_SIZE
            ));
        }
        if !self.setpoint.is_finite() {
            return fail(format!("setpoint {} is not finite", self.setpoint));
        }
        if self.metrics_every == 0 {
            return fail("metrics_every must be at least 1".to_string());
        }

        let checks = [
            self.pid.validate(),
            self.plant.validate(),
            self.plant.check_timestep(self.timestep),
            self.noise.validate(),
            self.ssr.validate(self.timestep),
            self.metrics.validate(),
        ];
        for check in checks {
            if let Err(e) = check {
                return fail(e.to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManagerConfig {
    pub ack_timeout: Duration,
    pub ready_timeout: Duration,
    pub heartbeat_timeout: Duration, // No event for this long means the engine is gone
    pub command_capacity: usize,
    pub event_capacity: usize,
    pub subscriber_capacity: usize,
    pub pin_core: Option<usize>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(2),
            ready_timeout: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(5),
            command_capacity: 256,
            event_capacity: 4096,
            subscriber_capacity: 1024,
            pin_core: None,
        }
    }
}

impl ManagerConfig {
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_pin_core(mut self, core: usize) -> Self {
        self.pin_core = Some(core);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(SimulationConfig::new().with_timestep(2.0).validate().is_err());
        assert!(SimulationConfig::new().with_timestep(0.001).validate().is_err());
        assert!(SimulationConfig::new().with_buffer_size(0).validate().is_err());
        assert!(
            SimulationConfig::new()
                .with_buffer_size(MAX_BUFFER_SIZE + 1)
                .validate()
                .is_err()
        );

        let bad_plant = PlantParameters {
            tau: -1.0,
            ..PlantParameters::default()
        };
        let err = SimulationConfig::new().with_plant(bad_plant).validate().unwrap_err();
        assert_eq!(err.code(), "INIT_001");
        assert!(SimulationConfig::new().with_metrics_every(0).validate().is_err());
    }

    #[test]
    fn manager_builders_override_defaults() {
        let cfg = ManagerConfig::default()
            .with_ack_timeout(Duration::from_millis(250))
            .with_ready_timeout(Duration::from_secs(1))
            .with_pin_core(2);
        assert_eq!(cfg.ack_timeout, Duration::from_millis(250));
        assert_eq!(cfg.ready_timeout, Duration::from_secs(1));
        assert_eq!(cfg.pin_core, Some(2));
        assert_eq!(cfg.heartbeat_timeout, ManagerConfig::default().heartbeat_timeout);
    }
}
