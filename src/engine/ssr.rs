//! ssr.rs
//! Solid-state relay time-proportioning emulator.
//!
//! - Window of `round(period / dt)` ticks; the duty is latched at the first tick of each window.
//! - ON for the first `round(duty * window)` ticks, OFF for the rest.
//! - Reporting only: the plant keeps integrating the continuous controller output.

use serde::{Deserialize, Serialize};

use crate::error::CommandError;

pub const MIN_SSR_PERIOD: f64 = 0.5;
pub const MAX_SSR_PERIOD: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SsrConfig {
    pub enabled: bool,
    pub period: f64, // Seconds per relay window
}

impl Default for SsrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            period: 2.0,
        }
    }
}

impl SsrConfig {
    /// Period checks only apply to an enabled relay.
    pub fn validate(&self, dt: f64) -> Result<(), CommandError> {
        if !self.enabled {
            return Ok(());
        }
        if !self.period.is_finite() || self.period < MIN_SSR_PERIOD || self.period > MAX_SSR_PERIOD {
            return Err(CommandError::InvalidSsr {
                what: format!(
                    "period must be within [{}, {}] s (got {})",
                    MIN_SSR_PERIOD, MAX_SSR_PERIOD, self.period
                ),
            });
        }
        if self.period < dt {
            return Err(CommandError::InvalidSsr {
                what: format!("period {} s is shorter than the timestep {} s", self.period, dt),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SsrEmulator {
    config: SsrConfig,
    tick_in_window: u64,
    duty: f64,
}

impl SsrEmulator {
    pub fn new(config: SsrConfig) -> Self {
        Self {
            config,
            tick_in_window: 0,
            duty: 0.0,
        }
    }

    /// Reported actuation for this tick: `u` itself when disabled, else the relay state.
    pub fn output(&mut self, u: f64, dt: f64) -> f64 {
        if !self.config.enabled {
            return u;
        }

        let window = ((self.config.period / dt).round() as u64).max(1);
        if self.tick_in_window == 0 {
            self.duty = u.clamp(0.0, 1.0);
        }
        let on_ticks = (self.duty * window as f64).round() as u64;
        let on = self.tick_in_window < on_ticks;
        self.tick_in_window = (self.tick_in_window + 1) % window;

        if on { 1.0 } else { 0.0 }
    }

    pub fn config(&self) -> SsrConfig {
        self.config
    }

    /// New settings restart the window.
    pub fn set_config(&mut self, config: SsrConfig) {
        self.config = config;
        self.reset();
    }

    pub fn reset(&mut self) {
        self.tick_in_window = 0;
        self.duty = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled(period: f64) -> SsrEmulator {
        SsrEmulator::new(SsrConfig {
            enabled: true,
            period,
        })
    }

    #[test]
    fn disabled_passes_through() {
        let mut ssr = SsrEmulator::new(SsrConfig::default());
        assert_eq!(ssr.output(0.37, 0.1), 0.37);
    }

    #[test]
    fn thirty_percent_duty_in_one_second_window() {
        let mut ssr = enabled(1.0);
        let pattern: Vec<f64> = (0..20).map(|_| ssr.output(0.3, 0.1)).collect();
        let window = [1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert_eq!(&pattern[..10], &window);
        assert_eq!(&pattern[10..], &window);
    }

    #[test]
    fn duty_latched_until_next_window() {
        let mut ssr = enabled(1.0);
        assert_eq!(ssr.output(0.2, 0.1), 1.0);
        // Output jumps to full mid-window; relay still follows the 20% duty
        let rest: Vec<f64> = (0..9).map(|_| ssr.output(1.0, 0.1)).collect();
        assert_eq!(rest.iter().filter(|v| **v == 1.0).count(), 1);
        assert_eq!(ssr.output(1.0, 0.1), 1.0);
    }

    #[test]
    fn extremes() {
        let mut ssr = enabled(0.5);
        assert!((0..10).all(|_| ssr.output(0.0, 0.1) == 0.0));
        ssr.reset();
        assert!((0..10).all(|_| ssr.output(1.0, 0.1) == 1.0));
    }

    #[test]
    fn period_validation() {
        let cfg = |period| SsrConfig {
            enabled: true,
            period,
        };
        assert!(cfg(2.0).validate(0.1).is_ok());
        assert!(cfg(0.2).validate(0.1).is_err());
        assert!(cfg(11.0).validate(0.1).is_err());
        assert!(cfg(0.5).validate(1.0).is_err());

        let off = SsrConfig {
            enabled: false,
            period: 0.0,
        };
        assert!(off.validate(0.1).is_ok());
    }
}
