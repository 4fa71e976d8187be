//! simulation.rs
//! Deterministic simulation session: state machine, command application and one tick.
//!
//! - Owns controller, SSR emulator, plant (with its delay line), metrics and the ring buffer.
//! - No clocks and no threads here; the worker drives `step()` at the wall-clock cadence.
//! - Tick order: setpoint ramp -> PID -> plant -> sample -> ring buffer -> metrics.
//! - A tick that produces a non-finite value is discarded and the previous state is kept.
//! - Periodic metrics only while a calculation runs; an out-of-range snapshot is flagged once per calculation.

use log::{debug, info, warn};

use crate::config::{MAX_TIMESTEP, MIN_TIMESTEP, SimulationConfig};
use crate::engine::controller::{PidController, PidParameters};
use crate::engine::metrics::{MetricsCalculator, MetricsSnapshot, Transition};
use crate::engine::plant::{NoiseConfig, Plant, PlantParameters};
use crate::engine::ring_buffer::RingBuffer;
use crate::engine::ssr::{SsrConfig, SsrEmulator};
use crate::error::{CommandError, EngineError, MetricsError, NumericError, TickError};
use crate::protocol::{Command, CommandEnvelope, CommandKind, EngineState, SimulationSample};

// ============================================================================
// Setpoint with optional linear ramp
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setpoint {
    pub active: f64,
    pub target: f64,
    pub ramp_rate: Option<f64>, // °C/s; None steps immediately
}

impl Setpoint {
    pub fn fixed(value: f64) -> Self {
        Self {
            active: value,
            target: value,
            ramp_rate: None,
        }
    }

    /// Active setpoint for the next tick, without committing it.
    fn next(&self, dt: f64) -> f64 {
        match self.ramp_rate {
            Some(rate) => {
                let max_step = rate * dt;
                let delta = self.target - self.active;
                if delta.abs() <= max_step {
                    self.target
                } else {
                    self.active + max_step.copysign(delta)
                }
            }
            None => self.target,
        }
    }
}

/// Outcome of one command from a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReply {
    pub id: u64,
    pub kind: CommandKind,
    pub outcome: Result<bool, CommandError>, // Ok(superseded)
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickOutput {
    pub sample: SimulationSample,
    pub metrics: Option<MetricsSnapshot>,
    pub metrics_error: Option<MetricsError>,
    pub transition: Transition,
}

#[derive(Debug)]
pub struct Simulation {
    defaults: SimulationConfig,
    state: EngineState,
    dt: f64,
    t: f64,
    ticks: u64,
    setpoint: Setpoint,
    pid: PidController,
    ssr: SsrEmulator,
    plant: Plant,
    metrics: MetricsCalculator,
    metrics_flagged: bool, // Invalid snapshot already reported for this calculation
    buffer: RingBuffer<SimulationSample>,
    samples_processed: u64,
}

impl Simulation {
    /// Validate `config` and allocate the session. Ends in `Ready`.
    pub fn new(config: SimulationConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let dt = config.timestep;

        let sim = Self {
            state: EngineState::Ready,
            dt,
            t: 0.0,
            ticks: 0,
            setpoint: Setpoint::fixed(config.setpoint),
            pid: PidController::new(config.pid),
            ssr: SsrEmulator::new(config.ssr),
            plant: Plant::new(config.plant, config.noise, dt),
            metrics: MetricsCalculator::new(config.metrics),
            metrics_flagged: false,
            buffer: RingBuffer::new(config.buffer_size),
            samples_processed: 0,
            defaults: config,
        };
        info!(
            "[Simulation] ready: dt={}s buffer={} plant={:?}",
            dt, sim.defaults.buffer_size, sim.defaults.plant
        );
        Ok(sim)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Apply a drained batch in arrival order. Within the batch only the last
    /// parameter command of each kind is applied; earlier ones are superseded.
    pub fn handle_batch(&mut self, batch: Vec<CommandEnvelope>) -> Vec<CommandReply> {
        let last_of_kind = |kind: CommandKind, from: usize| {
            !batch[from + 1..].iter().any(|c| c.command.kind() == kind)
        };

        let mut replies = Vec::with_capacity(batch.len());
        for (index, envelope) in batch.iter().enumerate() {
            let kind = envelope.command.kind();
            let outcome = if kind.is_parameter() && !last_of_kind(kind, index) {
                debug!("[Simulation] command {} ({}) superseded", envelope.id, kind);
                Ok(true)
            } else {
                self.apply(&envelope.command).map(|_| false)
            };
            replies.push(CommandReply {
                id: envelope.id,
                kind,
                outcome,
            });
        }
        replies
    }

    pub fn apply(&mut self, command: &Command) -> Result<(), CommandError> {
        if self.state == EngineState::Error {
            return Err(CommandError::NotAllowed {
                command: command.kind(),
                state: self.state,
            });
        }

        let result = match command {
            Command::SetPid(params) => self.set_pid(*params),
            Command::SetPlant(params) => self.set_plant(*params),
            Command::SetSetpoint { value, ramp_rate } => self.set_setpoint(*value, *ramp_rate),
            Command::SetNoise {
                enabled,
                sigma,
                seed,
            } => self.set_noise(*enabled, *sigma, *seed),
            Command::SetSsr(config) => self.set_ssr(*config),
            Command::SetTimestep { dt } => self.set_timestep(*dt),
            Command::Start => self.start(),
            Command::Pause => {
                self.pause();
                Ok(())
            }
            Command::Reset { preserve_params } => {
                self.reset(*preserve_params);
                Ok(())
            }
        };

        if let Err(e) = &result {
            warn!("[Simulation] {} rejected: {}", command.kind(), e);
        }
        result
    }

    fn set_pid(&mut self, params: PidParameters) -> Result<(), CommandError> {
        params.validate()?;
        self.pid.set_params(params);
        Ok(())
    }

    fn set_plant(&mut self, params: PlantParameters) -> Result<(), CommandError> {
        params.validate()?;
        params.check_timestep(self.dt)?;
        self.plant.set_params(params);
        Ok(())
    }

    fn set_setpoint(&mut self, value: f64, ramp_rate: Option<f64>) -> Result<(), CommandError> {
        if !value.is_finite() {
            return Err(CommandError::InvalidSetpoint {
                what: format!("value {} is not finite", value),
            });
        }
        let ramp_rate = match ramp_rate {
            Some(rate) if !rate.is_finite() || rate < 0.0 => {
                return Err(CommandError::InvalidSetpoint {
                    what: format!("rampRate must be finite and >= 0 (got {})", rate),
                });
            }
            Some(rate) if rate > 0.0 => Some(rate),
            _ => None,
        };

        self.setpoint.target = value;
        self.setpoint.ramp_rate = ramp_rate;
        if ramp_rate.is_none() {
            self.setpoint.active = value;
        }
        Ok(())
    }

    fn set_noise(
        &mut self,
        enabled: bool,
        sigma: Option<f64>,
        seed: Option<u64>,
    ) -> Result<(), CommandError> {
        let current = self.plant.noise();
        let noise = NoiseConfig {
            enabled,
            sigma: sigma.unwrap_or(current.sigma),
            seed,
        };
        noise.validate()?;
        self.plant.set_noise(noise);
        Ok(())
    }

    fn set_ssr(&mut self, config: SsrConfig) -> Result<(), CommandError> {
        config.validate(self.dt)?;
        self.ssr.set_config(config);
        Ok(())
    }

    fn set_timestep(&mut self, dt: f64) -> Result<(), CommandError> {
        if !(MIN_TIMESTEP..=MAX_TIMESTEP).contains(&dt) {
            return Err(CommandError::InvalidTimestep {
                what: format!("{} outside [{}, {}]", dt, MIN_TIMESTEP, MAX_TIMESTEP),
            });
        }
        self.plant.params().check_timestep(dt)?;
        self.ssr.config().validate(dt)?;

        self.dt = dt;
        self.plant.set_timestep(dt);
        self.ssr.reset();
        Ok(())
    }

    fn start(&mut self) -> Result<(), CommandError> {
        match self.state {
            EngineState::Ready | EngineState::Paused => {
                info!("[Simulation] {} -> Running at t={:.2}s", self.state, self.t);
                self.state = EngineState::Running;
                Ok(())
            }
            EngineState::Running => Ok(()),
            state => Err(CommandError::NotAllowed {
                command: CommandKind::Start,
                state,
            }),
        }
    }

    fn pause(&mut self) {
        if self.state == EngineState::Running {
            info!("[Simulation] Running -> Paused at t={:.2}s", self.t);
            self.state = EngineState::Paused;
        }
    }

    /// Reinitialize all dynamic state. Without `preserve_params` the session
    /// configuration it was created with is restored as well.
    pub fn reset(&mut self, preserve_params: bool) {
        if !preserve_params {
            let d = &self.defaults;
            self.dt = d.timestep;
            self.setpoint = Setpoint::fixed(d.setpoint);
            self.pid = PidController::new(d.pid);
            self.ssr = SsrEmulator::new(d.ssr);
            self.plant = Plant::new(d.plant, d.noise, d.timestep);
        } else {
            self.setpoint = Setpoint::fixed(self.setpoint.target);
            self.pid.reset();
            self.ssr.reset();
            self.plant.reset();
        }

        self.metrics.reset();
        self.metrics_flagged = false;
        self.buffer.clear();
        self.t = 0.0;
        self.ticks = 0;
        self.samples_processed = 0;
        self.state = EngineState::Ready;
        info!("[Simulation] reset (preserve_params={})", preserve_params);
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Advance one timestep if running. `Ok(None)` in any other state.
    pub fn step(&mut self) -> Result<Option<TickOutput>, TickError> {
        if self.state != EngineState::Running {
            return Ok(None);
        }

        let plant = self.plant.params();
        if !(plant.tau > 0.0 && plant.tau.is_finite()) || !(self.dt > 0.0) {
            let err = EngineError::Invariant {
                what: format!("tau={} dt={}", plant.tau, self.dt),
            };
            self.fail();
            return Err(err.into());
        }

        let dt = self.dt;
        let t_next = self.t + dt;
        let sp = self.setpoint.next(dt);
        let pv = self.plant.pv();

        let saved = self.pid.state();
        let out = self.pid.compute(sp, pv, plant.mode, dt);
        if !out.u.is_finite() {
            self.pid.restore(saved);
            return Err(NumericError {
                quantity: "u",
                t: t_next,
            }
            .into());
        }

        let plant_out = match self.plant.step(out.u) {
            Ok(o) => o,
            Err(e) => {
                self.pid.restore(saved);
                return Err(NumericError { t: t_next, ..e }.into());
            }
        };

        // Commit
        self.t = t_next;
        self.ticks += 1;
        self.setpoint.active = sp;
        let sample = SimulationSample {
            t: t_next,
            sp,
            pv: plant_out.pv,
            pv_clean: plant_out.pv_clean,
            u: self.ssr.output(out.u, dt),
        };
        self.buffer.push(sample);
        self.samples_processed += 1;

        let transition = self.metrics.process_sample(sample.t, sample.sp, sample.pv);
        if transition == Transition::Started {
            self.metrics_flagged = false;
        }
        let periodic = self.metrics.is_calculating()
            && self.ticks % u64::from(self.defaults.metrics_every) == 0;
        let due = periodic
            || matches!(
                transition,
                Transition::Started | Transition::Settled | Transition::TimedOut
            );

        let mut metrics = None;
        let mut metrics_error = None;
        if due {
            let snapshot = self.metrics.snapshot();
            match snapshot.validate() {
                Ok(()) => metrics = Some(snapshot),
                Err(e) if !self.metrics_flagged => {
                    warn!("[Simulation] {}", e);
                    self.metrics_flagged = true;
                    metrics_error = Some(e);
                }
                Err(_) => {}
            }
        }

        Ok(Some(TickOutput {
            sample,
            metrics,
            metrics_error,
            transition,
        }))
    }

    /// Enter the terminal `Error` state.
    pub fn fail(&mut self) {
        warn!("[Simulation] {} -> Error at t={:.2}s", self.state, self.t);
        self.state = EngineState::Error;
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    pub fn state(&self) -> EngineState {
        self.state
    }

    #[inline]
    pub fn time(&self) -> f64 {
        self.t
    }

    #[inline]
    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn setpoint(&self) -> Setpoint {
        self.setpoint
    }

    pub fn pid_params(&self) -> PidParameters {
        self.pid.params()
    }

    pub fn plant_params(&self) -> PlantParameters {
        self.plant.params()
    }

    pub fn noise(&self) -> NoiseConfig {
        self.plant.noise()
    }

    pub fn ssr(&self) -> SsrConfig {
        self.ssr.config()
    }

    pub fn plant(&self) -> &Plant {
        &self.plant
    }

    pub fn controller(&self) -> &PidController {
        &self.pid
    }

    pub fn buffer(&self) -> &RingBuffer<SimulationSample> {
        &self.buffer
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn samples_processed(&self) -> u64 {
        self.samples_processed
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.defaults
    }
}
