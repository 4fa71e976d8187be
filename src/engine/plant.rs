//! plant.rs
//! First-order-plus-dead-time thermal plant.
//!
//! - Explicit Euler step: `PV_next = PV + dt/tau * (K * u_d * span(mode) + T_amb - PV)`.
//! - `u_d` comes out of the [`DelayLine`], `L` seconds behind the controller output.
//! - Optional gaussian measurement noise on top of `PV_clean`, seeded or from the thread RNG.
//! - A step producing a non-finite value is refused and leaves the state untouched.

use log::debug;
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::config::MAX_DEAD_TIME;
use crate::engine::delay_line::DelayLine;
use crate::error::{CommandError, NumericError};

/// Heating span in °C per unit gain. Full output (`u = 1`) settles
/// `K * HEATING_SPAN` degrees above ambient.
pub const HEATING_SPAN: f64 = 7000.0;

/// Cooling span in °C per unit gain, applied below ambient.
pub const COOLING_SPAN: f64 = 3000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlantMode {
    Heating,
    Cooling,
}

impl PlantMode {
    /// +1 when actuation raises PV, -1 when it lowers it.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            PlantMode::Heating => 1.0,
            PlantMode::Cooling => -1.0,
        }
    }

    /// Signed actuation span for this mode.
    #[inline]
    pub fn span(self) -> f64 {
        match self {
            PlantMode::Heating => HEATING_SPAN,
            PlantMode::Cooling => -COOLING_SPAN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlantParameters {
    #[serde(rename = "K")]
    pub k: f64,
    pub tau: f64,
    #[serde(rename = "L")]
    pub dead_time: f64,
    #[serde(rename = "T_amb")]
    pub t_amb: f64,
    pub mode: PlantMode,
}

impl Default for PlantParameters {
    fn default() -> Self {
        Self {
            k: 0.03,
            tau: 90.0,
            dead_time: 3.0,
            t_amb: 25.0,
            mode: PlantMode::Heating,
        }
    }
}

impl PlantParameters {
    pub fn validate(&self) -> Result<(), CommandError> {
        let invalid = |what: String| Err(CommandError::InvalidPlant { what });

        if !self.k.is_finite() || self.k < 0.0 {
            return invalid(format!("K must be finite and >= 0 (got {})", self.k));
        }
        if !self.tau.is_finite() || self.tau <= 0.0 {
            return invalid(format!("tau must be > 0 (got {})", self.tau));
        }
        if !self.dead_time.is_finite() || self.dead_time < 0.0 || self.dead_time > MAX_DEAD_TIME {
            return invalid(format!(
                "L must be within [0, {}] s (got {})",
                MAX_DEAD_TIME, self.dead_time
            ));
        }
        if !self.t_amb.is_finite() {
            return invalid(format!("T_amb must be finite (got {})", self.t_amb));
        }
        Ok(())
    }

    /// Integration is only trusted for `dt / tau <= 1`.
    pub fn check_timestep(&self, dt: f64) -> Result<(), CommandError> {
        let ratio = dt / self.tau;
        if ratio > 1.0 {
            return Err(CommandError::UnstableRatio {
                dt,
                tau: self.tau,
                ratio,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseConfig {
    pub enabled: bool,
    pub sigma: f64,
    pub seed: Option<u64>,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sigma: 0.2,
            seed: None,
        }
    }
}

impl NoiseConfig {
    pub fn validate(&self) -> Result<(), CommandError> {
        if !self.sigma.is_finite() || self.sigma < 0.0 {
            return Err(CommandError::InvalidNoise {
                what: format!("sigma must be finite and >= 0 (got {})", self.sigma),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlantOutput {
    pub pv: f64,
    pub pv_clean: f64,
    pub u_delayed: f64,
}

#[derive(Debug)]
pub struct Plant {
    params: PlantParameters,
    noise: NoiseConfig,
    rng: StdRng,
    pv_clean: f64,
    pv: f64,         // Last measured value (clean + noise)
    delay: DelayLine,
    dt: f64,
}

impl Plant {
    /// Plant at rest at ambient temperature. Parameters are assumed validated.
    pub fn new(params: PlantParameters, noise: NoiseConfig, dt: f64) -> Self {
        Self {
            params,
            noise,
            rng: make_rng(noise.seed),
            pv_clean: params.t_amb,
            pv: params.t_amb,
            delay: DelayLine::new(params.dead_time, dt),
            dt,
        }
    }

    /// Advance one timestep with controller output `u`.
    pub fn step(&mut self, u: f64) -> Result<PlantOutput, NumericError> {
        let p = &self.params;
        let u_delayed = self.delay.peek(u);

        let drive = p.k * u_delayed * p.mode.span();
        let pv_clean = self.pv_clean + self.dt / p.tau * (drive + p.t_amb - self.pv_clean);
        if !pv_clean.is_finite() {
            return Err(NumericError {
                quantity: "PV_clean",
                t: 0.0,
            });
        }

        let pv = if self.noise.enabled && self.noise.sigma > 0.0 {
            let z: f64 = self.rng.sample(StandardNormal);
            pv_clean + self.noise.sigma * z
        } else {
            pv_clean
        };
        if !pv.is_finite() {
            return Err(NumericError {
                quantity: "PV",
                t: 0.0,
            });
        }

        self.delay.push(u);
        self.pv_clean = pv_clean;
        self.pv = pv;

        Ok(PlantOutput {
            pv,
            pv_clean,
            u_delayed,
        })
    }

    /// Swap parameters in place. PV is kept; the delay line is rebuilt only if `L` changed.
    pub fn set_params(&mut self, params: PlantParameters) {
        if params.dead_time != self.params.dead_time {
            self.delay.resize(params.dead_time, self.dt);
        }
        debug!("[Plant] params {:?}", params);
        self.params = params;
    }

    /// A changed seed restarts the noise source; `None` goes back to the thread RNG.
    pub fn set_noise(&mut self, noise: NoiseConfig) {
        if noise.seed != self.noise.seed {
            self.rng = make_rng(noise.seed);
        }
        self.noise = noise;
    }

    pub fn set_timestep(&mut self, dt: f64) {
        self.dt = dt;
        self.delay.resize(self.params.dead_time, dt);
    }

    /// Back to ambient with an empty delay line; a seeded noise source restarts its sequence.
    pub fn reset(&mut self) {
        self.pv_clean = self.params.t_amb;
        self.pv = self.params.t_amb;
        self.delay.resize(self.params.dead_time, self.dt);
        if self.noise.seed.is_some() {
            self.rng = make_rng(self.noise.seed);
        }
    }

    #[inline]
    pub fn pv(&self) -> f64 {
        self.pv
    }

    #[inline]
    pub fn pv_clean(&self) -> f64 {
        self.pv_clean
    }

    pub fn params(&self) -> PlantParameters {
        self.params
    }

    pub fn noise(&self) -> NoiseConfig {
        self.noise
    }

    pub fn delay_line(&self) -> &DelayLine {
        &self.delay
    }
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}
