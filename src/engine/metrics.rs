//! metrics.rs
//! Online step-response metrics (overshoot, peak time, settling time).
//!
//! - A setpoint change above `sp_change_threshold` percent starts a calculation.
//! - The step direction is fixed at the trigger; overshoot is measured past SP in that direction.
//! - Settling restarts every time PV leaves the band; termination after holding the band for
//!   `settling_window` seconds or after `max_calculation_time` (values kept on timeout).
//! - Reported times are relative to the trigger; reported settling time includes the window.
//! - No look-ahead: every update uses only the samples seen so far.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{CommandError, MetricsError};

/// Plausible range for reported metrics.
pub const METRIC_RANGE: (f64, f64) = (0.0, 1000.0);

const TIME_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub sp_change_threshold: f64,  // %
    pub settling_threshold: f64,   // %
    pub settling_window: f64,      // s
    pub max_calculation_time: f64, // s
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            sp_change_threshold: 5.0,
            settling_threshold: 2.0,
            settling_window: 2.0,
            max_calculation_time: 60.0,
        }
    }
}

impl MetricsConfig {
    pub fn validate(&self) -> Result<(), CommandError> {
        let fields = [
            ("sp_change_threshold", self.sp_change_threshold),
            ("settling_threshold", self.settling_threshold),
            ("settling_window", self.settling_window),
            ("max_calculation_time", self.max_calculation_time),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value <= 0.0 {
                return Err(CommandError::InvalidSetpoint {
                    what: format!("metrics {} must be finite and > 0 (got {})", name, value),
                });
            }
        }
        Ok(())
    }
}

/// Copy of the calculator state as carried by the `METRICS` event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub overshoot: f64,
    pub t_peak: f64,
    pub settling_time: f64,
    pub is_calculating: bool,
    pub sp_previous: f64,
    pub pv_max: f64,
    pub pv_min: f64,
    pub t_start: f64,
    pub t_current: f64,
    pub samples_count: u64,
}

impl MetricsSnapshot {
    pub fn validate(&self) -> Result<(), MetricsError> {
        let (lo, hi) = METRIC_RANGE;
        for (field, value) in [
            ("overshoot", self.overshoot),
            ("t_peak", self.t_peak),
            ("settling_time", self.settling_time),
        ] {
            if !(lo..=hi).contains(&value) {
                return Err(MetricsError { field, value });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepDirection {
    Ascending,
    Descending,
}

/// What a sample did to the calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Ignored,
    Idle,
    Started,
    Updated,
    Settled,
    TimedOut,
}

#[derive(Debug, Clone)]
struct MetricsState {
    overshoot: f64,
    peak_at: Option<f64>,
    settled_at: Option<f64>, // Last entry into the settling band
    is_calculating: bool,
    sp_previous: f64,
    direction: StepDirection,
    pv_max: f64,
    pv_min: f64,
    t_start: f64,
    t_current: f64,
    samples_count: u64,
}

impl Default for MetricsState {
    fn default() -> Self {
        Self {
            overshoot: 0.0,
            peak_at: None,
            settled_at: None,
            is_calculating: false,
            sp_previous: 0.0,
            direction: StepDirection::Ascending,
            pv_max: f64::NEG_INFINITY,
            pv_min: f64::INFINITY,
            t_start: 0.0,
            t_current: 0.0,
            samples_count: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsCalculator {
    config: MetricsConfig,
    state: MetricsState,
}

impl MetricsCalculator {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            state: MetricsState::default(),
        }
    }

    pub fn process_sample(&mut self, t: f64, sp: f64, pv: f64) -> Transition {
        if !(t.is_finite() && sp.is_finite() && pv.is_finite()) {
            warn!("[Metrics] ignoring non-finite sample t={} sp={} pv={}", t, sp, pv);
            return Transition::Ignored;
        }

        let s = &mut self.state;
        s.t_current = t;
        s.samples_count += 1;

        // ====================================================================
        // Trigger
        // ====================================================================
        let change_pct = (sp - s.sp_previous).abs() / s.sp_previous.abs().max(1e-9) * 100.0;
        if change_pct > self.config.sp_change_threshold {
            self.start(t, sp, pv);
            return Transition::Started;
        }

        if !s.is_calculating {
            return Transition::Idle;
        }
        s.sp_previous = sp;

        if t - s.t_start > self.config.max_calculation_time {
            s.is_calculating = false;
            debug!("[Metrics] timed out after {:.1}s", t - s.t_start);
            return Transition::TimedOut;
        }

        // ====================================================================
        // Peak
        // ====================================================================
        if sp == 0.0 {
            if pv > s.pv_max {
                s.overshoot = pv.max(0.0);
                s.peak_at = Some(t);
            }
        } else {
            let excursion = match s.direction {
                StepDirection::Ascending => pv - sp,
                StepDirection::Descending => sp - pv,
            };
            let pct = excursion / sp.abs() * 100.0;
            if pct > s.overshoot {
                s.overshoot = pct;
                s.peak_at = Some(t);
            }
        }
        s.pv_max = s.pv_max.max(pv);
        s.pv_min = s.pv_min.min(pv);

        // ====================================================================
        // Settling
        // ====================================================================
        let window = self.config.settling_window;
        let done = if sp == 0.0 {
            t - s.peak_at.unwrap_or(s.t_start) > window
        } else {
            let error_pct = (pv - sp).abs() / sp.abs() * 100.0;
            if error_pct <= self.config.settling_threshold {
                let entered = *s.settled_at.get_or_insert(t);
                t - entered >= window - TIME_EPSILON
            } else {
                s.settled_at = None;
                false
            }
        };

        if done {
            s.is_calculating = false;
            debug!("[Metrics] settled at t={:.2}s", t);
            Transition::Settled
        } else {
            Transition::Updated
        }
    }

    fn start(&mut self, t: f64, sp: f64, pv: f64) {
        let s = &mut self.state;
        s.direction = if sp >= s.sp_previous {
            StepDirection::Ascending
        } else {
            StepDirection::Descending
        };
        debug!(
            "[Metrics] step {:.2} -> {:.2} at t={:.2}s ({:?})",
            s.sp_previous, sp, t, s.direction
        );
        s.sp_previous = sp;
        s.pv_max = pv;
        s.pv_min = pv;
        s.overshoot = 0.0;
        s.peak_at = None;
        s.settled_at = None;
        s.t_start = t;
        s.is_calculating = true;
        s.samples_count = 1;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let s = &self.state;
        MetricsSnapshot {
            overshoot: s.overshoot,
            t_peak: s.peak_at.map_or(0.0, |p| p - s.t_start),
            settling_time: s
                .settled_at
                .map_or(0.0, |e| e - s.t_start + self.config.settling_window),
            is_calculating: s.is_calculating,
            sp_previous: s.sp_previous,
            pv_max: s.pv_max,
            pv_min: s.pv_min,
            t_start: s.t_start,
            t_current: s.t_current,
            samples_count: s.samples_count,
        }
    }

    #[inline]
    pub fn is_calculating(&self) -> bool {
        self.state.is_calculating
    }

    pub fn config(&self) -> MetricsConfig {
        self.config
    }

    pub fn reset(&mut self) {
        self.state = MetricsState::default();
    }
}
