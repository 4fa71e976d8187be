//! perf.rs
//! Rolling cycle-time statistics for the worker loop (feeds `STATE.performance`).
//! - Last `MAX_POINTS` cycle times kept in a capped FIFO.
//! - Max cycle time is the all-time maximum since the last reset.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use average::{Max, Mean, Min};

use crate::protocol::Performance;

pub const MAX_POINTS: usize = 1_000;

/// Appends value to the buffer; removes oldest if at capacity (FIFO).
#[inline]
pub fn push_capped(buf: &mut VecDeque<f64>, val: f64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

/// Statistics summary for a dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

/// Min, max and mean of the values, `None` when empty.
pub fn calculate_stats<'a>(data: impl IntoIterator<Item = &'a f64> + Clone) -> Option<Stats> {
    let mean: Mean = data.clone().into_iter().copied().collect();
    if mean.len() == 0 {
        return None;
    }
    let min: Min = data.clone().into_iter().copied().collect();
    let max: Max = data.into_iter().copied().collect();
    Some(Stats {
        min: min.min(),
        max: max.max(),
        mean: mean.mean(),
        count: mean.len() as usize,
    })
}

#[derive(Debug)]
pub struct CycleStats {
    cycle_ms: VecDeque<f64>,
    max_ms: f64,
    overruns: u64,
    started: Instant,
}

impl CycleStats {
    pub fn new() -> Self {
        Self {
            cycle_ms: VecDeque::with_capacity(MAX_POINTS),
            max_ms: 0.0,
            overruns: 0,
            started: Instant::now(),
        }
    }

    /// Record the busy time of one cycle.
    pub fn record(&mut self, busy: Duration) {
        let ms = busy.as_secs_f64() * 1_000.0;
        push_capped(&mut self.cycle_ms, ms);
        self.max_ms = self.max_ms.max(ms);
    }

    /// Release happened after its deadline.
    pub fn record_overrun(&mut self) {
        self.overruns += 1;
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    /// `period` is the current tick period, the budget the CPU estimate is relative to.
    pub fn snapshot(&self, period: Duration, samples_processed: u64) -> Performance {
        let avg_ms = calculate_stats(&self.cycle_ms).map_or(0.0, |s| s.mean);
        let budget_ms = period.as_secs_f64() * 1_000.0;
        let cpu = if budget_ms > 0.0 {
            (avg_ms / budget_ms * 100.0).min(100.0)
        } else {
            0.0
        };

        Performance {
            avg_cycle_time: avg_ms,
            max_cycle_time: self.max_ms,
            cpu_usage_estimate: cpu,
            uptime: self.started.elapsed().as_secs_f64(),
            samples_processed,
        }
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}
