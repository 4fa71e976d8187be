//! # PID Thermal Simulator Entry Point
//! Runs real-time step-response sessions of the PID loop on one of the built-in plants.
//!
//! ## Modes
//! - **Single preset:** pick a plant, run a setpoint step for a chosen duration.
//! - **Default:** "Horno medio" step 25 -> 60 °C for 30 s.
//! - **Sweep:** every preset back to back.
//!
//! ## Outputs
//! - Console: live PV/SP/u every few seconds, final step metrics and loop performance.
//! - `data/pid_sim_<epoch_ms>.csv`: full telemetry buffer of each session.

use std::{
    io::{Write, stdin, stdout},
    time::Duration,
};

use log::{error, info};

use pid_thermal_sim::{
    ManagerConfig, SimulationConfig, WorkerManager,
    engine::plant::PlantMode,
    error::HostError,
    utils::{
        export::ExportWindow,
        perf::calculate_stats,
        presets::{PRESETS, Preset},
    },
};

const DEFAULT_SESSION_SECS: u64 = 30;
const DEFAULT_PRESET: usize = 1;
const STEP_DELAY_SECS: u64 = 2;
const STEP_SIZE: f64 = 35.0;
const PROGRESS_EVERY_SECS: u64 = 5;
const ENGINE_CORE: usize = 0;

#[tokio::main]
async fn main() {
    env_logger::init();
    info!("=== PID THERMAL SIMULATOR START ===");

    loop {
        let choice = prompt_menu();
        match choice.as_str() {
            "1" => {
                let preset = prompt_preset();
                let secs = prompt_duration();
                report(run_session(preset, secs).await);
            }
            "2" | "" => {
                report(run_session(&PRESETS[DEFAULT_PRESET], DEFAULT_SESSION_SECS).await);
            }
            "3" => {
                for preset in &PRESETS {
                    report(run_session(preset, DEFAULT_SESSION_SECS).await);
                }
            }
            "4" => {
                println!("Exiting. Goodbye!");
                info!("=== PID THERMAL SIMULATOR FINISHED ===");
                return;
            }
            other => {
                println!("Unrecognized option '{}', please try again.", other);
            }
        }
    }
}

fn report(result: Result<(), HostError>) {
    match result {
        Ok(()) => println!("\n Session completed. Returning to menu...\n"),
        Err(e) => {
            error!("Session failed: {}", e);
            println!("\n Session failed: {}\n", e);
        }
    }
}

fn prompt_menu() -> String {
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│     PID THERMAL SIMULATOR                   │");
    println!("├─────────────────────────────────────────────┤");
    println!("│  1) Choose preset and duration              │");
    println!("│  2) Default run (Horno medio, 30 s)         │");
    println!("│  3) Sweep all presets                       │");
    println!("│  4) Exit                                    │");
    println!("└─────────────────────────────────────────────┘");
    print!("Select [1/2/3/4] (default: 2): ");
    read_line()
}

fn prompt_preset() -> &'static Preset {
    for (i, preset) in PRESETS.iter().enumerate() {
        println!("  {}) {} ({:?})", i + 1, preset.name, preset.plant.mode);
    }
    print!("Preset [default: {}]: ", DEFAULT_PRESET + 1);
    let index = read_line()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .filter(|i| *i < PRESETS.len())
        .unwrap_or(DEFAULT_PRESET);
    &PRESETS[index]
}

fn prompt_duration() -> u64 {
    print!("Session length in seconds [default: {}]: ", DEFAULT_SESSION_SECS);
    read_line().parse::<u64>().unwrap_or(DEFAULT_SESSION_SECS)
}

fn read_line() -> String {
    let _ = stdout().flush();
    let mut input = String::new();
    let _ = stdin().read_line(&mut input);
    input.trim().to_string()
}

/// One real-time session: settle at ambient, step the setpoint, watch, export.
async fn run_session(preset: &Preset, secs: u64) -> Result<(), HostError> {
    info!("[Session] {} for {}s", preset.name, secs);
    let ambient = preset.plant.t_amb;
    let target = match preset.plant.mode {
        PlantMode::Heating => ambient + STEP_SIZE,
        PlantMode::Cooling => ambient - STEP_SIZE / 2.0,
    };

    let sim_config = SimulationConfig::new()
        .with_plant(preset.plant)
        .with_setpoint(ambient);
    let manager_config = ManagerConfig::default().with_pin_core(ENGINE_CORE);
    let mut manager = WorkerManager::initialize(sim_config, manager_config).await?;
    if let Some(engine) = manager.engine_info() {
        println!(
            "Engine {} ready, capabilities: {}",
            engine.version,
            engine.capabilities.join(", ")
        );
    }

    manager.start().await?;
    tokio::time::sleep(Duration::from_secs(STEP_DELAY_SECS)).await;
    manager.set_setpoint(target, None).await?;
    println!("Setpoint step {:.1} -> {:.1} °C", ambient, target);

    let mut elapsed = 0;
    while elapsed < secs {
        let wait = PROGRESS_EVERY_SECS.min(secs - elapsed);
        tokio::time::sleep(Duration::from_secs(wait)).await;
        elapsed += wait;
        if let Some(s) = manager.status().last_tick {
            println!(
                "  t={:>7.1}s  SP={:>6.2}  PV={:>7.3}  u={:.3}",
                s.t, s.sp, s.pv, s.u
            );
        }
    }
    manager.pause().await?;

    print_summary(&manager);
    match manager.export_to_dir("data", ExportWindow::Full) {
        Ok(path) => println!("Telemetry exported to {:?}", path),
        Err(e) => error!("Export failed: {}", e),
    }

    manager.destroy();
    Ok(())
}

fn print_summary(manager: &WorkerManager) {
    let pv: Vec<f64> = manager.get_buffer_data().iter().map(|s| s.pv).collect();
    if let Some(stats) = calculate_stats(&pv) {
        println!(
            "PV over session: min {:.2}  max {:.2}  mean {:.2}  ({} samples)",
            stats.min, stats.max, stats.mean, stats.count
        );
    }

    match manager.metrics() {
        Some(m) => println!(
            "Step metrics: overshoot {:.2}%  t_peak {:.1}s  settling {:.1}s  ({})",
            m.overshoot,
            m.t_peak,
            m.settling_time,
            if m.is_calculating { "still calculating" } else { "done" }
        ),
        None => println!("Step metrics: none yet"),
    }

    let perf = manager.status().performance;
    println!(
        "Loop: avg cycle {:.3} ms  max {:.3} ms  cpu {:.2}%  {} samples",
        perf.avg_cycle_time, perf.max_cycle_time, perf.cpu_usage_estimate, perf.samples_processed
    );
    if let Some(err) = manager.last_error() {
        println!("Last engine error: [{}] {}", err.code, err.message);
    }
}
