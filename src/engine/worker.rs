//! worker.rs
//! Dedicated engine thread running the simulation at a fixed wall-clock cadence.
//!
//! - Periodic release with `SpinSleeper`; late releases are counted as overruns.
//! - Commands are polled (`try_recv`) once per cycle, never awaited.
//! - Events leave through a bounded channel with `try_send`; a full queue drops the event.
//! - A STATE heartbeat goes out every `state_interval` whatever the engine state.
//! - Exits when the running flag clears or the host drops its command sender.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel::{Receiver, Sender, TryRecvError, TrySendError};
use log::{debug, error, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::config::{CAPABILITIES, ENGINE_VERSION, MAX_TIMESTEP, MIN_TIMESTEP, SimulationConfig, limits};
use crate::engine::simulation::Simulation;
use crate::error::{CommandError, TickError};
use crate::protocol::{
    CommandEnvelope, EngineState, ErrorEvent, Event, EventEnvelope, Performance,
};
use crate::utils::perf::CycleStats;

/// Spawn the engine thread at maximum OS priority, optionally pinned to `pin_core`.
pub fn spawn_worker(
    config: SimulationConfig,
    commands: Receiver<CommandEnvelope>,
    events: Sender<EventEnvelope>,
    running: Arc<AtomicBool>,
    pin_core: Option<usize>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("pid-sim-engine".to_string())
        .spawn_with_priority(ThreadPriority::Max, move |priority| {
            if let Err(e) = priority {
                debug!("[Worker] running without elevated priority: {:?}", e);
            }
            if let Some(core) = pin_core {
                pin_to_core(core);
            }
            Worker::new(config, commands, events, running).run();
        })
}

fn pin_to_core(core: usize) {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    match core_ids.get(core) {
        Some(core_id) if core_affinity::set_for_current(*core_id) => {
            info!("[Worker] pinned to core {}", core);
        }
        _ => error!("[Worker] failed to pin to core {}", core),
    }
}

// ============================================================================
// Event sink
// ============================================================================

struct EventSink {
    tx: Sender<EventEnvelope>,
    started: Instant,
    dropped: u64,
    connected: bool,
}

impl EventSink {
    fn emit(&mut self, id: Option<u64>, event: Event) {
        let envelope = EventEnvelope {
            id,
            timestamp: self.started.elapsed().as_secs_f64(),
            event,
        };
        match self.tx.try_send(envelope) {
            Ok(()) => {}
            Err(TrySendError::Full(env)) => {
                self.dropped += 1;
                if self.dropped.is_power_of_two() {
                    warn!(
                        "[Worker] event queue full, dropped {} events (last: {})",
                        self.dropped,
                        env.event.name()
                    );
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                self.connected = false;
            }
        }
    }

    fn error(&mut self, id: Option<u64>, err: ErrorEvent) {
        self.emit(id, Event::Error(err));
    }
}

// ============================================================================
// Worker loop
// ============================================================================

struct Worker {
    config: SimulationConfig,
    commands: Receiver<CommandEnvelope>,
    sink: EventSink,
    running: Arc<AtomicBool>,
    perf: CycleStats,
}

impl Worker {
    fn new(
        config: SimulationConfig,
        commands: Receiver<CommandEnvelope>,
        events: Sender<EventEnvelope>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            commands,
            sink: EventSink {
                tx: events,
                started: Instant::now(),
                dropped: 0,
                connected: true,
            },
            running,
            perf: CycleStats::new(),
        }
    }

    fn run(mut self) {
        self.emit_state(EngineState::Initializing, Duration::ZERO, 0);

        // A failed build leaves `sim` empty: the loop keeps answering in `Error`
        let mut sim = match Simulation::new(self.config.clone()) {
            Ok(sim) => {
                self.sink.emit(
                    None,
                    Event::Ready {
                        version: ENGINE_VERSION.to_string(),
                        capabilities: CAPABILITIES.iter().map(|c| c.to_string()).collect(),
                        limits: limits(),
                    },
                );
                Some(sim)
            }
            Err(e) => {
                error!("[Worker] initialization failed: {}", e);
                self.sink.error(None, (&e).into());
                None
            }
        };

        let state_of = |sim: &Option<Simulation>| sim.as_ref().map_or(EngineState::Error, |s| s.state());
        let period_of = |sim: &Option<Simulation>, fallback: f64| {
            Duration::from_secs_f64(sim.as_ref().map_or(fallback, |s| s.dt()))
        };
        let samples_of = |sim: &Option<Simulation>| sim.as_ref().map_or(0, |s| s.samples_processed());

        // Pace for a session that failed to build; its own timestep may be unusable
        let fallback_dt = if (MIN_TIMESTEP..=MAX_TIMESTEP).contains(&self.config.timestep) {
            self.config.timestep
        } else {
            MAX_TIMESTEP
        };
        let mut period = period_of(&sim, fallback_dt);
        self.emit_state(state_of(&sim), period, samples_of(&sim));

        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        let mut next_deadline = Instant::now() + period;
        let mut last_state = Instant::now();

        while self.running.load(Ordering::Acquire) {
            // ====================================================================
            // Periodic release
            // ====================================================================
            let now = Instant::now();
            if now < next_deadline {
                sleeper.sleep(next_deadline - now);
            } else {
                self.perf.record_overrun();
            }
            let cycle_start = Instant::now();

            // ====================================================================
            // Commands
            // ====================================================================
            let mut batch = Vec::new();
            let mut host_gone = false;
            loop {
                match self.commands.try_recv() {
                    Ok(cmd) => batch.push(cmd),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        host_gone = true;
                        break;
                    }
                }
            }

            if !batch.is_empty() {
                let before = state_of(&sim);
                match sim.as_mut() {
                    Some(s) => {
                        for reply in s.handle_batch(batch) {
                            match reply.outcome {
                                Ok(superseded) => self.sink.emit(
                                    Some(reply.id),
                                    Event::Ack {
                                        command: reply.kind,
                                        superseded,
                                    },
                                ),
                                Err(e) => self.sink.error(Some(reply.id), (&e).into()),
                            }
                        }
                    }
                    None => {
                        for cmd in batch {
                            let err = CommandError::NotAllowed {
                                command: cmd.command.kind(),
                                state: EngineState::Error,
                            };
                            self.sink.error(Some(cmd.id), (&err).into());
                        }
                    }
                }
                if state_of(&sim) != before {
                    self.emit_state(state_of(&sim), period, samples_of(&sim));
                    last_state = Instant::now();
                }
            }

            if host_gone {
                info!("[Worker] command channel closed, stopping");
                break;
            }

            // ====================================================================
            // Tick
            // ====================================================================
            if let Some(s) = sim.as_mut() {
                match s.step() {
                    Ok(Some(out)) => {
                        self.sink.emit(None, Event::Tick(out.sample));
                        if let Some(snapshot) = out.metrics {
                            self.sink.emit(None, Event::Metrics(snapshot));
                        }
                        if let Some(e) = out.metrics_error {
                            self.sink.error(None, (&e).into());
                        }
                    }
                    Ok(None) => {}
                    Err(e @ TickError::Numeric(_)) => {
                        warn!("[Worker] {}", e);
                        self.sink.error(None, (&e).into());
                    }
                    Err(e @ TickError::Fatal(_)) => {
                        error!("[Worker] {}", e);
                        self.sink.error(None, (&e).into());
                        self.emit_state(EngineState::Error, period, s.samples_processed());
                        last_state = Instant::now();
                    }
                }
            }

            self.perf.record(cycle_start.elapsed());

            // ====================================================================
            // Heartbeat
            // ====================================================================
            if last_state.elapsed() >= self.config.state_interval {
                self.emit_state(state_of(&sim), period, samples_of(&sim));
                last_state = Instant::now();
            }

            if !self.sink.connected {
                info!("[Worker] event channel closed, stopping");
                break;
            }

            // Timestep may have changed during this cycle
            period = period_of(&sim, fallback_dt);
            next_deadline += period;
            let now = Instant::now();
            if next_deadline + period < now {
                // Too far behind to catch up; restart the schedule
                next_deadline = now + period;
            }
        }

        info!(
            "[Worker] stopped: {} samples, {} overruns, {} dropped events",
            samples_of(&sim),
            self.perf.overruns(),
            self.sink.dropped
        );
    }

    fn emit_state(&mut self, state: EngineState, period: Duration, samples: u64) {
        let performance: Performance = self.perf.snapshot(period, samples);
        self.sink.emit(None, Event::State { state, performance });
    }
}
