//! Threaded protocol tests: host proxy <-> engine worker over bounded channels.

use std::time::Duration;

use pid_thermal_sim::{
    EngineState, Event, ManagerConfig, SimulationConfig, WorkerManager,
    config::MAX_BUFFER_SIZE,
    engine::{controller::PidParameters, plant::PlantParameters},
    error::HostError,
    protocol::Severity,
    utils::export::ExportWindow,
};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fast_config() -> SimulationConfig {
    SimulationConfig::new().with_timestep(0.01)
}

async fn manager() -> WorkerManager {
    init_logs();
    WorkerManager::initialize(fast_config(), ManagerConfig::default())
        .await
        .unwrap()
}

async fn wait_for<F: Fn(&WorkerManager) -> bool>(m: &WorkerManager, cond: F) -> bool {
    for _ in 0..100 {
        if cond(m) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond(m)
}

#[tokio::test]
async fn initialize_reports_ready_with_limits() {
    let m = manager().await;
    let info = m.engine_info().unwrap();
    assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
    assert_eq!(info.limits.max_buffer_size, MAX_BUFFER_SIZE);
    assert!(info.capabilities.iter().any(|c| c == "ssr"));

    let status = m.status();
    assert!(status.connected);
    assert!(matches!(status.state, EngineState::Ready));
}

#[tokio::test]
async fn start_streams_ticks_into_the_mirror() {
    let m = manager().await;
    m.start().await.unwrap();
    assert!(wait_for(&m, |m| m.get_buffer_data().len() >= 20).await);
    assert!(wait_for(&m, |m| m.status().state == EngineState::Running).await);

    let data = m.get_buffer_data();
    assert!(data.windows(2).all(|w| w[0].t < w[1].t));
    assert!(m.status().last_tick.is_some());
    assert!(wait_for(&m, |m| m.metrics().is_some()).await);
}

#[tokio::test]
async fn invalid_plant_is_rejected_with_warning() {
    let m = manager().await;
    let bad = PlantParameters {
        tau: -1.0,
        ..PlantParameters::default()
    };
    match m.set_plant(bad).await {
        Err(HostError::Rejected(err)) => {
            assert_eq!(err.severity, Severity::Warning);
            assert_eq!(err.code, "VALIDATION_002");
            assert!(err.recoverable);
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert_eq!(m.last_error().map(|e| e.code), Some("VALIDATION_002".to_string()));

    // Engine still takes commands
    m.set_plant(PlantParameters::default()).await.unwrap();
}

#[tokio::test]
async fn earlier_parameters_in_one_tick_report_superseded() {
    init_logs();
    // One-second cycle so both commands land in the same drained batch
    let sim = SimulationConfig::new().with_timestep(1.0);
    let m = WorkerManager::initialize(sim, ManagerConfig::default())
        .await
        .unwrap();

    let gentle = PidParameters::new(1.0, 0.0, 0.0);
    let invalid = PidParameters::new(-1.0, 0.0, 0.0);
    let (first, second) = tokio::join!(m.set_pid(gentle), m.set_pid(invalid));
    assert!(matches!(first, Ok(true)), "{:?}", first);
    assert!(matches!(second, Err(HostError::Rejected(_))), "{:?}", second);

    let (first, second) = tokio::join!(m.set_pid(gentle), m.set_pid(PidParameters::default()));
    assert_eq!((first.unwrap(), second.unwrap()), (true, false));
}

#[tokio::test]
async fn pause_stops_telemetry() {
    let m = manager().await;
    m.start().await.unwrap();
    assert!(wait_for(&m, |m| m.get_buffer_data().len() >= 10).await);

    m.pause().await.unwrap();
    let frozen = m.get_buffer_data().len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(m.get_buffer_data().len(), frozen);

    m.set_setpoint(80.0, None).await.unwrap();
    m.start().await.unwrap();
    assert!(wait_for(&m, |m| m.get_buffer_data().len() > frozen).await);
    assert!(wait_for(&m, |m| m.status().last_tick.map(|s| s.sp) == Some(80.0)).await);
}

#[tokio::test]
async fn window_queries_respect_seconds() {
    let m = manager().await;
    m.start().await.unwrap();
    assert!(wait_for(&m, |m| m.get_buffer_data().len() >= 80).await);
    m.pause().await.unwrap();

    let window = m.get_window_data(0.5);
    assert!(!window.is_empty());
    assert!(window.len() <= 50);
    assert_eq!(window.last(), m.get_buffer_data().last());

    m.clear_buffer();
    assert!(m.get_buffer_data().is_empty());
    assert!(m.get_window_data(0.5).is_empty());
}

#[tokio::test]
async fn reset_returns_to_ready_and_clears_mirror() {
    let m = manager().await;
    m.start().await.unwrap();
    assert!(wait_for(&m, |m| m.get_buffer_data().len() >= 10).await);

    m.reset(false).await.unwrap();
    assert!(wait_for(&m, |m| m.status().state == EngineState::Ready).await);
    assert!(m.get_buffer_data().is_empty());
    assert!(m.metrics().is_none());
}

#[tokio::test]
async fn subscribers_receive_events() {
    let m = manager().await;
    let rx = m.subscribe();
    m.start().await.unwrap();

    let mut saw_tick = false;
    for _ in 0..200 {
        if let Ok(env) = rx.recv_timeout(Duration::from_millis(20)) {
            if matches!(env.event, Event::Tick(_)) {
                saw_tick = true;
                break;
            }
        }
    }
    assert!(saw_tick);
}

#[tokio::test]
async fn export_writes_csv_snapshot() {
    let m = manager().await;
    m.start().await.unwrap();
    assert!(wait_for(&m, |m| m.get_buffer_data().len() >= 10).await);
    m.pause().await.unwrap();

    let mut out = Vec::new();
    let rows = m.export_csv(ExportWindow::Full, &mut out).unwrap();
    assert_eq!(rows, m.get_buffer_data().len());
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("# PID-Simulator CSV Export"));
    assert!(text.contains("# timestep: 0.01s"));
    assert!(text.contains("\nt,SP,PV,u,PV_clean\n"));
}

#[tokio::test]
async fn silence_marks_the_manager_disconnected() {
    init_logs();
    let sim = fast_config().with_state_interval(Duration::from_secs(60));
    let cfg = ManagerConfig::default().with_heartbeat_timeout(Duration::from_millis(300));
    let m = WorkerManager::initialize(sim, cfg).await.unwrap();

    // Ready and idle: no ticks and no heartbeat inside the timeout
    assert!(wait_for(&m, |m| !m.is_connected()).await);
    assert!(!m.status().connected);
    assert!(matches!(m.start().await, Err(HostError::Disconnected)));
}

#[tokio::test]
async fn invalid_configuration_fails_initialization() {
    init_logs();
    let sim = SimulationConfig::new().with_timestep(5.0);
    match WorkerManager::initialize(sim, ManagerConfig::default()).await {
        Err(HostError::Rejected(err)) => {
            assert_eq!(err.code, "INIT_001");
            assert_eq!(err.severity, Severity::Critical);
            assert!(!err.recoverable);
        }
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("initialization should fail"),
    }
}

#[tokio::test]
async fn destroy_invalidates_commands_and_reinitialize_recovers() {
    let mut m = manager().await;
    m.start().await.unwrap();
    assert!(wait_for(&m, |m| !m.get_buffer_data().is_empty()).await);

    m.destroy();
    assert!(!m.is_connected());
    assert!(matches!(m.pause().await, Err(HostError::Disconnected)));

    m.reinitialize().await.unwrap();
    assert!(m.is_connected());
    assert!(m.get_buffer_data().is_empty());
    assert_eq!(m.status().state, EngineState::Ready);
    m.start().await.unwrap();
}
