//! delay_line.rs
//! Transport (dead-time) delay for the plant input signal.
//!
//! - Fixed ring of `round(L / dt)` slots, minimum one slot allocated.
//! - `push` returns the actuation value written exactly `L` seconds earlier (nearest tick).
//! - Resizing discards queued values and zero-fills; no interpolation across length changes.

use log::debug;

#[derive(Debug, Clone)]
pub struct DelayLine {
    slots: Vec<f64>,
    head: usize,     // Next slot to read (oldest value) and then overwrite
    delay_ticks: usize,
}

impl DelayLine {
    /// Build a delay line for dead time `dead_time` (s) sampled every `dt` (s).
    pub fn new(dead_time: f64, dt: f64) -> Self {
        let delay_ticks = delay_ticks(dead_time, dt);
        Self {
            slots: vec![0.0; delay_ticks.max(1)],
            head: 0,
            delay_ticks,
        }
    }

    /// Push the newest actuation value and return the value from `delay_ticks` pushes ago.
    /// Returns 0.0 until the line has filled once.
    #[inline]
    pub fn push(&mut self, value: f64) -> f64 {
        // L = 0: pass-through, the single allocated slot is never read
        if self.delay_ticks == 0 {
            return value;
        }

        let delayed = self.slots[self.head];
        self.slots[self.head] = value;
        self.head = (self.head + 1) % self.slots.len();
        delayed
    }

    /// What `push(value)` would return, without advancing the line.
    #[inline]
    pub fn peek(&self, value: f64) -> f64 {
        if self.delay_ticks == 0 {
            value
        } else {
            self.slots[self.head]
        }
    }

    /// Reallocate for a new dead time or timestep. Queued values are discarded.
    pub fn resize(&mut self, dead_time: f64, dt: f64) {
        let delay_ticks = delay_ticks(dead_time, dt);
        debug!(
            "[DelayLine] resize {} -> {} ticks (L={:.3}s dt={:.3}s)",
            self.delay_ticks, delay_ticks, dead_time, dt
        );
        self.slots = vec![0.0; delay_ticks.max(1)];
        self.head = 0;
        self.delay_ticks = delay_ticks;
    }

    /// Zero-fill without changing the length.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = 0.0);
        self.head = 0;
    }

    #[inline]
    pub fn delay_ticks(&self) -> usize {
        self.delay_ticks
    }

    /// Allocated slots (never below one).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

/// Nearest whole number of ticks covering `dead_time`.
fn delay_ticks(dead_time: f64, dt: f64) -> usize {
    if !(dead_time > 0.0) || !(dt > 0.0) {
        return 0;
    }
    (dead_time / dt).round() as usize
}
