pub mod export;
pub mod perf;
pub mod presets;
