use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use pid_thermal_sim::engine::{
    controller::{PidController, PidParameters},
    plant::PlantMode,
};

fn pid_compute_bench(c: &mut Criterion) {
    let mut controller = PidController::new(PidParameters::default());
    let mut pv = 25.0;

    c.bench_function("pid_compute", |b| {
        b.iter(|| {
            // Walk PV so the derivative term is exercised
            pv = if pv > 70.0 { 25.0 } else { pv + 0.01 };
            black_box(controller.compute(black_box(60.0), black_box(pv), PlantMode::Heating, 0.1));
        })
    });

    // Saturated high with a large error: anti-windup clipping every call
    let mut saturated = PidController::new(PidParameters::new(2.0, 5.0, 0.0));
    c.bench_function("pid_compute_saturated", |b| {
        b.iter(|| {
            black_box(saturated.compute(black_box(500.0), black_box(25.0), PlantMode::Heating, 0.1));
        })
    });
}

criterion_group!(benches, pid_compute_bench);
criterion_main!(benches);
