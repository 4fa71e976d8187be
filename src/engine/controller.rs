//! controller.rs
//! Discrete PID controller for the thermal loop.
//!
//! - Error sign follows the plant mode so cooling still corrects in the right direction.
//! - Derivative on measurement: setpoint steps do not kick the output.
//! - Gains act on °C; the raw sum is divided by `OUTPUT_RANGE` before the [0, 1] clamp.
//! - Back-calculation anti-windup commits only the part of the integral increment that keeps
//!   the unclamped output inside [0, 1].
//! - State survives gain changes; only an explicit reset clears it.

use serde::{Deserialize, Serialize};

use crate::engine::plant::PlantMode;
use crate::error::CommandError;

pub const U_MIN: f64 = 0.0;
pub const U_MAX: f64 = 1.0;

/// Controller units that map onto full actuation. With `kp = 2` the output
/// saturates at 15 °C of error, which leaves a linear band around SP.
pub const OUTPUT_RANGE: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidParameters {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for PidParameters {
    fn default() -> Self {
        Self {
            kp: 2.0,
            ki: 0.1,
            kd: 10.0,
        }
    }
}

impl PidParameters {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd }
    }

    pub fn validate(&self) -> Result<(), CommandError> {
        for (name, gain) in [("kp", self.kp), ("ki", self.ki), ("kd", self.kd)] {
            if !gain.is_finite() || gain < 0.0 {
                return Err(CommandError::InvalidPid {
                    what: format!("{} must be finite and >= 0 (got {})", name, gain),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControllerState {
    pub integral: f64,
    pub prev_pv: Option<f64>,
    pub prev_output: f64,
}

/// Terms of one PID evaluation, already scaled to actuation units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidOutput {
    pub u: f64,
    pub u_raw: f64,
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

#[derive(Debug, Clone)]
pub struct PidController {
    params: PidParameters,
    state: ControllerState,
}

impl PidController {
    pub fn new(params: PidParameters) -> Self {
        Self {
            params,
            state: ControllerState::default(),
        }
    }

    /// One controller update. `dt` must be positive.
    pub fn compute(&mut self, sp: f64, pv: f64, mode: PlantMode, dt: f64) -> PidOutput {
        let sign = mode.sign();
        let PidParameters { kp, ki, kd } = self.params;

        let error = sign * (sp - pv);
        let p = kp * error / OUTPUT_RANGE;
        let d = match self.state.prev_pv {
            Some(prev) => sign * kd * (prev - pv) / dt / OUTPUT_RANGE,
            None => 0.0,
        };

        // ====================================================================
        // Anti-windup: trim the increment so it never deepens saturation
        // ====================================================================
        let base = p + self.state.integral + d;
        let mut increment = ki * error * dt / OUTPUT_RANGE;
        if increment > 0.0 && base + increment > U_MAX {
            increment = increment.min((U_MAX - base).max(0.0));
        } else if increment < 0.0 && base + increment < U_MIN {
            increment = increment.max((U_MIN - base).min(0.0));
        }

        self.state.integral += increment;
        let u_raw = base + increment;
        let u = u_raw.clamp(U_MIN, U_MAX);

        self.state.prev_pv = Some(pv);
        self.state.prev_output = u;

        PidOutput {
            u,
            u_raw,
            p,
            i: self.state.integral,
            d,
        }
    }

    pub fn params(&self) -> PidParameters {
        self.params
    }

    /// New gains from the next update on. Integral and derivative memory are kept.
    pub fn set_params(&mut self, params: PidParameters) {
        self.params = params;
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Roll back to a saved state, used when the tick that followed is discarded.
    pub fn restore(&mut self, state: ControllerState) {
        self.state = state;
    }

    pub fn reset(&mut self) {
        self.state = ControllerState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn proportional_only() {
        let mut pid = PidController::new(PidParameters::new(0.3, 0.0, 0.0));
        let out = pid.compute(60.0, 25.0, PlantMode::Heating, 0.1);
        assert!((out.u - 0.35).abs() < 1e-12);
        assert_eq!(out.d, 0.0);
    }

    #[test]
    fn derivative_ignores_setpoint_steps() {
        let mut pid = PidController::new(PidParameters::new(0.0, 0.0, 1.0));
        pid.compute(10.0, 20.0, PlantMode::Heating, 0.1);
        let out = pid.compute(80.0, 20.0, PlantMode::Heating, 0.1);
        assert_eq!(out.d, 0.0);
    }

    #[test]
    fn derivative_opposes_rising_measurement() {
        let mut pid = PidController::new(PidParameters::new(0.0, 0.0, 1.0));
        pid.compute(50.0, 20.0, PlantMode::Heating, 0.1);
        let out = pid.compute(50.0, 20.5, PlantMode::Heating, 0.1);
        assert!(out.d < 0.0);
    }

    #[test]
    fn cooling_flips_error_sign() {
        let mut pid = PidController::new(PidParameters::new(2.0, 0.0, 0.0));
        let out = pid.compute(-20.0, 0.0, PlantMode::Cooling, 0.1);
        assert_eq!(out.u, 1.0);
        let out = pid.compute(20.0, 0.0, PlantMode::Cooling, 0.1);
        assert_eq!(out.u, 0.0);
    }

    #[test]
    fn linear_band_below_full_output() {
        let mut pid = PidController::new(PidParameters::new(2.0, 0.0, 0.0));
        let out = pid.compute(100.0, 90.0, PlantMode::Heating, 0.1);
        assert!((out.u - 20.0 / OUTPUT_RANGE).abs() < 1e-12);
        assert_eq!(out.u, out.u_raw);
        let out = pid.compute(100.0, 80.0, PlantMode::Heating, 0.1);
        assert_eq!(out.u, 1.0);
        assert!(out.u_raw > 1.0);
    }

    #[test]
    fn integral_freezes_while_saturated_high() {
        let mut pid = PidController::new(PidParameters::new(2.0, 0.1, 0.0));
        for _ in 0..1000 {
            let out = pid.compute(100.0, 25.0, PlantMode::Heating, 0.1);
            assert_eq!(out.u, 1.0);
        }
        assert_eq!(pid.state().integral, 0.0);
    }

    #[test]
    fn integral_unwinds_immediately_after_saturation() {
        let mut pid = PidController::new(PidParameters::new(0.0, 1.0, 0.0));
        for _ in 0..500 {
            pid.compute(100.0, 25.0, PlantMode::Heating, 0.1);
        }
        assert!((pid.state().integral - 1.0).abs() < 1e-9);
        let out = pid.compute(100.0, 101.0, PlantMode::Heating, 0.1);
        assert!(out.u < 1.0);
    }

    #[test]
    fn gains_change_keeps_state() {
        let mut pid = PidController::new(PidParameters::new(0.0, 0.5, 0.0));
        pid.compute(30.0, 29.0, PlantMode::Heating, 0.1);
        let before = pid.state();
        pid.set_params(PidParameters::new(1.0, 0.0, 0.0));
        assert_eq!(pid.state(), before);
        pid.reset();
        assert_eq!(pid.state(), ControllerState::default());
    }

    proptest! {
        #[test]
        fn output_bounded_and_integral_capped(
            kp in 0.0f64..50.0,
            ki in 0.0f64..50.0,
            kd in 0.0f64..50.0,
            error in 1.0f64..500.0,
            ticks in 1usize..400,
        ) {
            let mut pid = PidController::new(PidParameters::new(kp, ki, kd));
            let p = kp * error / OUTPUT_RANGE;
            for _ in 0..ticks {
                let out = pid.compute(error, 0.0, PlantMode::Heating, 0.1);
                prop_assert!(out.u <= U_MAX && out.u >= U_MIN);
                prop_assert!(pid.state().integral <= (U_MAX - p).max(0.0) + 1e-9);
            }
        }
    }
}
