//! manager.rs
//! Host-side proxy for the engine worker.
//!
//! - Owns the worker thread and a listener thread draining engine events.
//! - Command methods resolve on the matching `Ack` / `Error` event, or fail on timeout or disconnect.
//! - Keeps cached copies (telemetry mirror, metrics, status, last error) for synchronous queries.
//! - Silence longer than `heartbeat_timeout` marks the manager disconnected; no automatic restart.

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use dashmap::DashMap;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::config::{MAX_BUFFER_SIZE, ManagerConfig, SimulationConfig};
use crate::engine::controller::PidParameters;
use crate::engine::metrics::MetricsSnapshot;
use crate::engine::plant::PlantParameters;
use crate::engine::ring_buffer::RingBuffer;
use crate::engine::ssr::SsrConfig;
use crate::engine::worker::spawn_worker;
use crate::error::{ExportError, HostError};
use crate::protocol::{
    Command, CommandEnvelope, EngineState, ErrorEvent, Event, EventEnvelope, Limits, Performance,
    Severity, SimulationSample,
};
use crate::utils::export::{ExportMeta, ExportWindow, export_to_dir, write_csv};

type AckResult = Result<bool, HostError>; // Ok(superseded)

/// What the engine announced in its READY event.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineInfo {
    pub version: String,
    pub capabilities: Vec<String>,
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerStatus {
    pub connected: bool,
    pub state: EngineState,
    pub last_tick: Option<SimulationSample>,
    pub performance: Performance,
}

// ============================================================================
// State shared with the listener thread
// ============================================================================

struct Shared {
    connected: AtomicBool,
    buffer: Mutex<RingBuffer<SimulationSample>>,
    status: Mutex<WorkerStatus>,
    metrics: Mutex<Option<MetricsSnapshot>>,
    last_error: Mutex<Option<ErrorEvent>>,
    info: Mutex<Option<EngineInfo>>,
    pending: DashMap<u64, oneshot::Sender<AckResult>>,
    ready: Mutex<Option<oneshot::Sender<Result<(), HostError>>>>,
    subscribers: Mutex<Vec<Sender<EventEnvelope>>>,
}

impl Shared {
    fn new(buffer_size: usize, ready: oneshot::Sender<Result<(), HostError>>) -> Self {
        Self {
            connected: AtomicBool::new(true),
            buffer: Mutex::new(RingBuffer::new(buffer_size.min(MAX_BUFFER_SIZE))),
            status: Mutex::new(WorkerStatus {
                connected: true,
                state: EngineState::Initializing,
                last_tick: None,
                performance: Performance::default(),
            }),
            metrics: Mutex::new(None),
            last_error: Mutex::new(None),
            info: Mutex::new(None),
            pending: DashMap::new(),
            ready: Mutex::new(Some(ready)),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn resolve_ready(&self, result: Result<(), HostError>) {
        if let Some(tx) = self.ready.lock().take() {
            let _ = tx.send(result);
        }
    }

    fn resolve(&self, id: Option<u64>, result: AckResult) {
        let Some(id) = id else { return };
        if let Some((_, tx)) = self.pending.remove(&id) {
            let _ = tx.send(result);
        }
    }

    fn dispatch(&self, envelope: EventEnvelope) {
        match &envelope.event {
            Event::Ready {
                version,
                capabilities,
                limits,
            } => {
                info!("[Manager] engine {} ready", version);
                *self.info.lock() = Some(EngineInfo {
                    version: version.clone(),
                    capabilities: capabilities.clone(),
                    limits: *limits,
                });
                self.status.lock().state = EngineState::Ready;
                self.resolve_ready(Ok(()));
            }
            Event::Ack {
                command,
                superseded,
            } => {
                debug!("[Manager] ack {:?} {} superseded={}", envelope.id, command, superseded);
                self.resolve(envelope.id, Ok(*superseded));
            }
            Event::Tick(sample) => {
                self.buffer.lock().push(*sample);
                self.status.lock().last_tick = Some(*sample);
            }
            Event::State { state, performance } => {
                let mut status = self.status.lock();
                status.state = *state;
                status.performance = *performance;
            }
            Event::Metrics(snapshot) => {
                *self.metrics.lock() = Some(*snapshot);
            }
            Event::Error(err) => {
                match err.severity {
                    Severity::Warning => warn!("[Manager] {}: {}", err.code, err.message),
                    Severity::Critical => error!("[Manager] {}: {}", err.code, err.message),
                }
                *self.last_error.lock() = Some(err.clone());
                if err.severity == Severity::Critical && envelope.id.is_none() {
                    self.resolve_ready(Err(HostError::Rejected(err.clone())));
                }
                self.resolve(envelope.id, Err(HostError::Rejected(err.clone())));
            }
        }

        self.subscribers
            .lock()
            .retain(|tx| !matches!(tx.try_send(envelope.clone()), Err(TrySendError::Disconnected(_))));
    }

    /// Connection lost: fail everything waiting on the engine.
    fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        self.status.lock().connected = false;
        self.resolve_ready(Err(HostError::Disconnected));

        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.resolve(Some(id), Err(HostError::Disconnected));
        }
        self.subscribers.lock().clear();
    }
}

fn listen(
    events: Receiver<EventEnvelope>,
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    heartbeat_timeout: Duration,
) {
    loop {
        match events.recv_timeout(heartbeat_timeout) {
            Ok(envelope) => shared.dispatch(envelope),
            Err(RecvTimeoutError::Timeout) => {
                if running.load(Ordering::Acquire) {
                    error!(
                        "[Manager] no engine event for {} ms, marking disconnected",
                        heartbeat_timeout.as_millis()
                    );
                }
                shared.disconnect();
                break;
            }
            Err(RecvTimeoutError::Disconnected) => {
                if running.load(Ordering::Acquire) {
                    error!("[Manager] engine event channel closed");
                }
                shared.disconnect();
                break;
            }
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

pub struct WorkerManager {
    sim_config: SimulationConfig,
    config: ManagerConfig,
    shared: Arc<Shared>,
    commands: Option<Sender<CommandEnvelope>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
    next_id: AtomicU64,
}

impl WorkerManager {
    /// Start an engine and wait for its READY event.
    /// A critical initialization error or a missing READY tears the engine down again.
    pub async fn initialize(
        sim_config: SimulationConfig,
        config: ManagerConfig,
    ) -> Result<Self, HostError> {
        let (command_tx, command_rx) = bounded(config.command_capacity);
        let (event_tx, event_rx) = bounded(config.event_capacity);
        let (ready_tx, ready_rx) = oneshot::channel();
        let running = Arc::new(AtomicBool::new(true));
        let shared = Arc::new(Shared::new(sim_config.buffer_size, ready_tx));

        let listener = {
            let shared = shared.clone();
            let running = running.clone();
            let heartbeat = config.heartbeat_timeout;
            thread::Builder::new()
                .name("pid-sim-listener".to_string())
                .spawn(move || listen(event_rx, shared, running, heartbeat))?
        };
        let worker = spawn_worker(
            sim_config.clone(),
            command_rx,
            event_tx,
            running.clone(),
            config.pin_core,
        )?;

        let mut manager = Self {
            sim_config,
            config,
            shared,
            commands: Some(command_tx),
            running,
            worker: Some(worker),
            listener: Some(listener),
            next_id: AtomicU64::new(1),
        };

        let timeout = manager.config.ready_timeout;
        let outcome = match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HostError::Disconnected),
            Err(_) => Err(HostError::NotReady {
                timeout_ms: timeout.as_millis(),
            }),
        };
        if let Err(e) = outcome {
            error!("[Manager] initialization failed: {}", e);
            manager.destroy();
            return Err(e);
        }
        Ok(manager)
    }

    /// Tear down and start a fresh engine with the same configuration.
    pub async fn reinitialize(&mut self) -> Result<(), HostError> {
        info!("[Manager] reinitializing engine");
        self.destroy();
        let fresh = Self::initialize(self.sim_config.clone(), self.config.clone()).await?;
        *self = fresh;
        Ok(())
    }

    /// Stop the engine and invalidate pending commands. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        self.running.store(false, Ordering::Release);
        self.commands = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("[Manager] engine thread panicked");
            }
        }
        if let Some(listener) = self.listener.take() {
            if listener.join().is_err() {
                error!("[Manager] listener thread panicked");
            }
        }
        self.shared.disconnect();
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Send one command and wait for its acknowledgment. `Ok(true)` means it was
    /// superseded by a later command of the same kind within the same tick.
    pub async fn send(&self, command: Command) -> Result<bool, HostError> {
        if !self.is_connected() {
            return Err(HostError::Disconnected);
        }
        let Some(commands) = self.commands.as_ref() else {
            return Err(HostError::Disconnected);
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let kind = command.kind();
        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(id, tx);

        if let Err(e) = commands.try_send(CommandEnvelope { id, command }) {
            self.shared.pending.remove(&id);
            return Err(match e {
                TrySendError::Full(_) => HostError::QueueFull,
                TrySendError::Disconnected(_) => HostError::Disconnected,
            });
        }
        debug!("[Manager] sent {} as #{}", kind, id);

        match tokio::time::timeout(self.config.ack_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(HostError::Disconnected),
            Err(_) => {
                self.shared.pending.remove(&id);
                Err(HostError::Timeout {
                    id,
                    command: kind,
                    timeout_ms: self.config.ack_timeout.as_millis(),
                })
            }
        }
    }

    // Parameter commands resolve to the superseded flag: `Ok(true)` means a later command
    // of the same kind in the same batch replaced this one, so these values were never applied.

    pub async fn set_pid(&self, params: PidParameters) -> Result<bool, HostError> {
        self.send(Command::SetPid(params)).await
    }

    pub async fn set_plant(&self, params: PlantParameters) -> Result<bool, HostError> {
        self.send(Command::SetPlant(params)).await
    }

    pub async fn set_setpoint(&self, value: f64, ramp_rate: Option<f64>) -> Result<bool, HostError> {
        self.send(Command::SetSetpoint { value, ramp_rate }).await
    }

    pub async fn set_noise(
        &self,
        enabled: bool,
        sigma: Option<f64>,
        seed: Option<u64>,
    ) -> Result<bool, HostError> {
        self.send(Command::SetNoise {
            enabled,
            sigma,
            seed,
        })
        .await
    }

    pub async fn set_ssr(&self, config: SsrConfig) -> Result<bool, HostError> {
        self.send(Command::SetSsr(config)).await
    }

    pub async fn set_timestep(&self, dt: f64) -> Result<bool, HostError> {
        self.send(Command::SetTimestep { dt }).await
    }

    pub async fn start(&self) -> Result<(), HostError> {
        self.send(Command::Start).await.map(|_| ())
    }

    pub async fn pause(&self) -> Result<(), HostError> {
        self.send(Command::Pause).await.map(|_| ())
    }

    pub async fn reset(&self, preserve_params: bool) -> Result<(), HostError> {
        self.send(Command::Reset { preserve_params }).await?;
        self.clear_buffer();
        *self.shared.metrics.lock() = None;
        Ok(())
    }

    // ========================================================================
    // Queries (cached, no round-trip)
    // ========================================================================

    /// Most recent samples within `seconds` of the latest one.
    pub fn get_window_data(&self, seconds: f64) -> Vec<SimulationSample> {
        self.shared.buffer.lock().window(seconds)
    }

    /// Whole mirror, oldest first.
    pub fn get_buffer_data(&self) -> Vec<SimulationSample> {
        self.shared.buffer.lock().to_vec()
    }

    pub fn clear_buffer(&self) {
        self.shared.buffer.lock().clear();
    }

    pub fn metrics(&self) -> Option<MetricsSnapshot> {
        *self.shared.metrics.lock()
    }

    pub fn status(&self) -> WorkerStatus {
        self.shared.status.lock().clone()
    }

    pub fn last_error(&self) -> Option<ErrorEvent> {
        self.shared.last_error.lock().clone()
    }

    pub fn engine_info(&self) -> Option<EngineInfo> {
        self.shared.info.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Lossy copy of every event from now on. Slow readers miss events.
    pub fn subscribe(&self) -> Receiver<EventEnvelope> {
        let (tx, rx) = bounded(self.config.subscriber_capacity);
        if self.is_connected() {
            self.shared.subscribers.lock().push(tx);
        }
        rx
    }

    // ========================================================================
    // Export
    // ========================================================================

    fn snapshot(&self, window: ExportWindow) -> (Vec<SimulationSample>, ExportMeta) {
        let samples = match window {
            ExportWindow::Full => self.get_buffer_data(),
            ExportWindow::Seconds(s) => self.get_window_data(s),
        };
        let timestep = match samples.as_slice() {
            [.., a, b] => b.t - a.t,
            _ => self.sim_config.timestep,
        };
        let meta = ExportMeta {
            timestep: (timestep * 1e6).round() / 1e6,
            buffer_size: self.sim_config.buffer_size,
            window,
        };
        (samples, meta)
    }

    pub fn export_csv<W: Write>(&self, window: ExportWindow, out: W) -> Result<usize, ExportError> {
        let (samples, meta) = self.snapshot(window);
        write_csv(&samples, &meta, out)
    }

    pub fn export_to_dir(
        &self,
        dir: impl AsRef<Path>,
        window: ExportWindow,
    ) -> Result<PathBuf, ExportError> {
        let (samples, meta) = self.snapshot(window);
        export_to_dir(dir, &samples, &meta)
    }
}

impl Drop for WorkerManager {
    fn drop(&mut self) {
        self.destroy();
    }
}
