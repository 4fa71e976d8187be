// Engine: everything that runs on the simulation thread.
// Leaf components first (delay line, plant, controller, SSR, metrics, ring buffer),
// then the deterministic session and the worker loop that paces it.

pub mod controller;
pub mod delay_line;
pub mod metrics;
pub mod plant;
pub mod ring_buffer;
pub mod simulation;
pub mod ssr;
pub mod worker;
