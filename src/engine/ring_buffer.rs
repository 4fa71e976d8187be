//! ring_buffer.rs
//! Fixed-capacity telemetry store; the oldest entry is overwritten when full.
//! - Iteration is always chronological (oldest first).
//! - `window(seconds)` serves the most recent samples within `(t_latest - seconds, t_latest]`.

use std::collections::VecDeque;

use crate::protocol::SimulationSample;

/// Slack so an `n * dt` window does not pick up an extra sample from accumulated rounding.
const WINDOW_EPSILON: f64 = 1e-9;

pub trait Timestamped {
    fn timestamp(&self) -> f64;
}

impl Timestamped for SimulationSample {
    #[inline]
    fn timestamp(&self) -> f64 {
        self.t
    }
}

#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, returning the evicted oldest entry when the buffer was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Clone + Timestamped> RingBuffer<T> {
    /// Most recent entries no older than `seconds` before the latest one, chronological.
    pub fn window(&self, seconds: f64) -> Vec<T> {
        let Some(latest) = self.items.back() else {
            return Vec::new();
        };
        if !(seconds > 0.0) {
            return Vec::new();
        }

        let cutoff = latest.timestamp() - seconds + WINDOW_EPSILON;
        let start = self
            .items
            .iter()
            .rposition(|item| item.timestamp() < cutoff)
            .map_or(0, |i| i + 1);
        self.items.range(start..).cloned().collect()
    }
}
