//! Benchmarks for calibration solve
//!
//! SOLT calibrations over an ideal (identity) error box, for several port
//! counts and sweep lengths.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array3;
use num_complex::Complex64;
use vnacal_core::frequency::{Frequency, FrequencyUnit, SweepType};
use vnacal_core::{ErrorTermType, Measurement, NewCalibration, ParameterId, SolverConfig};

/// Raw measurement of an ideal standard with value `v` on `port`.
fn reflect(nfreq: usize, ports: usize, port: usize, v: f64) -> Measurement {
    let mut m = Array3::<Complex64>::zeros((nfreq, ports, ports));
    for f in 0..nfreq {
        m[[f, port, port]] = Complex64::new(v, 0.0);
    }
    Measurement::Ratio(m)
}

fn through(nfreq: usize, ports: usize, a: usize, b: usize) -> Measurement {
    let mut m = Array3::<Complex64>::zeros((nfreq, ports, ports));
    for f in 0..nfreq {
        m[[f, a, b]] = Complex64::new(1.0, 0.0);
        m[[f, b, a]] = Complex64::new(1.0, 0.0);
    }
    Measurement::Ratio(m)
}

fn solt(ty: ErrorTermType, nfreq: usize, ports: usize) -> NewCalibration {
    let freq = Frequency::sweep(1.0, 10.0, nfreq, FrequencyUnit::GHz, SweepType::Linear).unwrap();
    let mut cal = NewCalibration::new(ty, ports, ports, &freq, SolverConfig::default()).unwrap();
    for port in 0..ports {
        for (id, v) in [(ParameterId::SHORT, -1.0), (ParameterId::OPEN, 1.0), (ParameterId::MATCH, 0.0)] {
            cal.add_single_reflect(&reflect(nfreq, ports, port, v), id, port).unwrap();
        }
    }
    for a in 0..ports {
        for b in a + 1..ports {
            cal.add_through(&through(nfreq, ports, a, b), a, b).unwrap();
        }
    }
    cal
}

fn bench_solve(c: &mut Criterion) {
    let mut group = c.benchmark_group("solve");

    for ty in [ErrorTermType::T8, ErrorTermType::TE10, ErrorTermType::UE14] {
        for ports in [2, 4].iter() {
            for nfreq in [10, 100].iter() {
                let mut cal = solt(ty, *nfreq, *ports);
                let id = BenchmarkId::new(format!("{ty}/{ports}ports"), nfreq);
                group.bench_with_input(id, nfreq, |b, _| b.iter(|| black_box(cal.solve().unwrap())));
            }
        }
    }

    group.finish();
}

fn bench_solve_unknown(c: &mut Criterion) {
    let mut group = c.benchmark_group("solve_unknown_short");

    for nfreq in [10, 100].iter() {
        let freq = Frequency::sweep(1.0, 10.0, *nfreq, FrequencyUnit::GHz, SweepType::Linear).unwrap();
        let mut cal = NewCalibration::new(ErrorTermType::T8, 2, 2, &freq, SolverConfig::default()).unwrap();
        let short = cal.make_unknown(ParameterId::SHORT).unwrap();
        for port in 0..2 {
            cal.add_single_reflect(&reflect(*nfreq, 2, port, -0.95), short, port).unwrap();
            cal.add_single_reflect(&reflect(*nfreq, 2, port, 1.0), ParameterId::OPEN, port).unwrap();
            cal.add_single_reflect(&reflect(*nfreq, 2, port, 0.0), ParameterId::MATCH, port).unwrap();
        }
        cal.add_through(&through(*nfreq, 2, 0, 1), 0, 1).unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(nfreq), nfreq, |b, _| {
            b.iter(|| black_box(cal.solve().unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_solve, bench_solve_unknown);
criterion_main!(benches);
