// Host side: proxy that owns the engine thread and caches its telemetry.

pub mod manager;
