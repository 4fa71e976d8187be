//! Closed-loop scenarios on the deterministic simulation core (no threads, no clocks).

use pid_thermal_sim::{
    Command, EngineState, Simulation, SimulationConfig, SimulationSample,
    engine::{
        controller::{ControllerState, PidParameters},
        delay_line::DelayLine,
        metrics::{MetricsConfig, Transition},
        plant::{NoiseConfig, PlantMode, PlantParameters},
        ssr::SsrConfig,
    },
    protocol::{CommandEnvelope, ErrorEvent, Severity},
};

fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn started(config: SimulationConfig) -> Simulation {
    let mut sim = Simulation::new(config).unwrap();
    sim.apply(&Command::Start).unwrap();
    sim
}

fn run(sim: &mut Simulation, ticks: usize) -> Vec<SimulationSample> {
    (0..ticks)
        .map(|_| sim.step().unwrap().unwrap().sample)
        .collect()
}

fn setpoint(sim: &mut Simulation, value: f64) {
    sim.apply(&Command::SetSetpoint {
        value,
        ramp_rate: None,
    })
    .unwrap();
}

#[test]
fn scenario_a_step_to_100_rises_to_a_small_overshoot_and_settles() {
    init_logs();
    let config = SimulationConfig::new()
        .with_setpoint(0.0)
        .with_pid(PidParameters::new(2.0, 0.1, 10.0));
    let mut sim = started(config);

    run(&mut sim, 1);
    setpoint(&mut sim, 100.0);
    let samples = run(&mut sim, 3000);

    let peak = samples
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.pv.total_cmp(&b.1.pv))
        .map(|(i, _)| i)
        .unwrap();
    assert!(
        samples[..=peak].windows(2).all(|w| w[1].pv >= w[0].pv - 1e-9),
        "PV dips before its peak at t={}",
        samples[peak].t
    );
    let overshoot = samples[peak].pv - 100.0;
    assert!(overshoot > 0.0 && overshoot < 5.0, "overshoot {}", overshoot);

    // Default metrics configuration: settles inside the 60 s calculation limit
    let m = sim.metrics();
    assert!(!m.is_calculating);
    assert!(m.settling_time > 0.0 && m.settling_time < 60.0, "settling {}", m.settling_time);
    assert!(m.overshoot < 5.0);

    // At rest the output sits inside its range instead of switching between the rails
    let tail = &samples[2000..];
    assert!(tail.iter().all(|s| s.u > 0.0 && s.u < 1.0));
    assert!(tail.iter().all(|s| (s.pv - 100.0).abs() < 0.1));
}

#[test]
fn scenario_b_actuation_returns_after_thirty_ticks() {
    let mut line = DelayLine::new(3.0, 0.1);
    assert_eq!(line.capacity(), 30);
    assert_eq!(line.push(0.77), 0.0);
    for tick in 1..30 {
        assert_eq!(line.push(0.0), 0.0, "tick {}", tick);
    }
    assert_eq!(line.push(0.0), 0.77);
}

#[test]
fn scenario_c_negative_tau_is_rejected_and_previous_plant_kept() {
    let mut sim = started(SimulationConfig::default());
    let mut twin = started(SimulationConfig::default());
    run(&mut sim, 10);
    run(&mut twin, 10);

    let bad = PlantParameters {
        tau: -1.0,
        ..PlantParameters::default()
    };
    let replies = sim.handle_batch(vec![CommandEnvelope {
        id: 42,
        command: Command::SetPlant(bad),
    }]);
    let err = replies[0].outcome.clone().unwrap_err();
    let event = ErrorEvent::from(&err);
    assert_eq!(event.severity, Severity::Warning);
    assert!(event.recoverable);
    assert_eq!(sim.plant_params(), PlantParameters::default());

    assert_eq!(run(&mut sim, 1), run(&mut twin, 1));
}

#[test]
fn scenario_d_ring_buffer_keeps_last_hundred() {
    let mut sim = started(SimulationConfig::new().with_buffer_size(100));
    let all = run(&mut sim, 150);

    let kept = sim.buffer().to_vec();
    assert_eq!(kept.len(), 100);
    assert_eq!(kept.as_slice(), &all[50..]);
    assert!(kept.windows(2).all(|w| w[0].t < w[1].t));
    assert!(sim.buffer().window(5.0).len() <= 50);
}

#[test]
fn scenario_e_cooling_drives_pv_down() {
    let plant = PlantParameters {
        t_amb: 0.0,
        mode: PlantMode::Cooling,
        ..PlantParameters::default()
    };
    let mut sim = started(SimulationConfig::new().with_plant(plant).with_setpoint(-20.0));

    // Full output until the first effect arrives after L = 3 s
    let samples = run(&mut sim, 400);
    assert!(samples.iter().take(30).all(|s| s.u == 1.0));
    assert!(samples.windows(2).all(|w| w[1].pv <= w[0].pv));
    assert!(samples[199].pv < -10.0);
    assert!(samples[399].pv < -20.0);
}

#[test]
fn reset_without_preserve_restores_defaults() {
    let config = SimulationConfig::default();
    let fresh = Simulation::new(config.clone()).unwrap();
    let mut sim = started(config);

    let batch = vec![
        Command::SetPid(PidParameters::new(5.0, 1.0, 0.0)),
        Command::SetPlant(PlantParameters {
            k: 0.05,
            tau: 30.0,
            dead_time: 1.0,
            t_amb: 18.0,
            mode: PlantMode::Cooling,
        }),
        Command::SetNoise {
            enabled: true,
            sigma: Some(0.7),
            seed: Some(3),
        },
        Command::SetSsr(SsrConfig {
            enabled: true,
            period: 4.0,
        }),
        Command::SetTimestep { dt: 0.05 },
    ];
    for command in &batch {
        sim.apply(command).unwrap();
    }
    setpoint(&mut sim, 10.0);
    run(&mut sim, 200);

    for _ in 0..2 {
        sim.apply(&Command::Reset {
            preserve_params: false,
        })
        .unwrap();
        assert_eq!(sim.state(), EngineState::Ready);
        assert_eq!(sim.time(), 0.0);
        assert_eq!(sim.dt(), fresh.dt());
        assert_eq!(sim.pid_params(), fresh.pid_params());
        assert_eq!(sim.plant_params(), fresh.plant_params());
        assert_eq!(sim.noise(), fresh.noise());
        assert_eq!(sim.ssr(), fresh.ssr());
        assert_eq!(sim.setpoint(), fresh.setpoint());
        assert_eq!(sim.controller().state(), ControllerState::default());
        assert_eq!(sim.plant().pv(), fresh.plant().pv());
        assert_eq!(sim.plant().delay_line().capacity(), 30);
        assert_eq!(sim.metrics(), fresh.metrics());
        assert!(sim.buffer().is_empty());
    }
}

#[test]
fn reset_with_preserve_keeps_parameters() {
    let mut sim = started(SimulationConfig::default());
    let pid = PidParameters::new(1.5, 0.05, 4.0);
    sim.apply(&Command::SetPid(pid)).unwrap();
    run(&mut sim, 50);

    sim.apply(&Command::Reset {
        preserve_params: true,
    })
    .unwrap();
    assert_eq!(sim.pid_params(), pid);
    assert_eq!(sim.controller().state(), ControllerState::default());
    assert_eq!(sim.plant().pv(), 25.0);
    assert!(sim.buffer().is_empty());
}

#[test]
fn setpoint_change_at_threshold_does_not_retrigger() {
    let config = SimulationConfig::new()
        .with_setpoint(100.0)
        .with_metrics(MetricsConfig {
            max_calculation_time: 300.0,
            ..MetricsConfig::default()
        });
    let mut sim = started(config);
    let tick = |sim: &mut Simulation| sim.step().unwrap().unwrap().transition;

    assert_eq!(tick(&mut sim), Transition::Started);
    setpoint(&mut sim, 105.0);
    assert_ne!(tick(&mut sim), Transition::Started);
    setpoint(&mut sim, 100.0);
    assert_ne!(tick(&mut sim), Transition::Started);
    setpoint(&mut sim, 106.0);
    assert_eq!(tick(&mut sim), Transition::Started);
}

#[test]
fn ssr_changes_reported_actuation_only() {
    let config = SimulationConfig::new().with_setpoint(40.0);
    let mut plain = started(config.clone());
    let mut relay = started(config.with_ssr(SsrConfig {
        enabled: true,
        period: 2.0,
    }));

    let a = run(&mut plain, 600);
    let b = run(&mut relay, 600);
    for (x, y) in a.iter().zip(&b) {
        assert_eq!(x.pv, y.pv);
        assert_eq!(x.pv_clean, y.pv_clean);
        assert!(y.u == 0.0 || y.u == 1.0);
    }
    assert!(a.iter().any(|s| s.u > 0.0 && s.u < 1.0));
}

#[test]
fn seeded_noise_runs_are_identical() {
    let config = SimulationConfig::new().with_noise(NoiseConfig {
        enabled: true,
        sigma: 0.3,
        seed: Some(2024),
    });
    let mut a = started(config.clone());
    let mut b = started(config);
    let ra = run(&mut a, 200);
    assert_eq!(ra, run(&mut b, 200));
    assert!(ra.iter().any(|s| s.pv != s.pv_clean));
}

#[test]
fn invalid_initial_configuration_is_fatal() {
    let bad = PlantParameters {
        tau: -1.0,
        ..PlantParameters::default()
    };
    let err = Simulation::new(SimulationConfig::new().with_plant(bad)).unwrap_err();
    let event = ErrorEvent::from(&err);
    assert_eq!(event.severity, Severity::Critical);
    assert!(!event.recoverable);
}
