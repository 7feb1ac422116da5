//! Calibration Solve Tests
//!
//! Every error-term type is solved from measurements synthesized from known
//! error terms and must give those terms back.

mod common;

use common::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use vnacal_core::{
    ErrorCategory, ErrorTermType, Frequency, MeasurementError, NewCalibration,
    ParameterId, SolverConfig,
};

fn frequency() -> Frequency {
    Frequency::from_hz(FREQUENCIES.to_vec()).unwrap()
}

fn solve_round_trip(ty: ErrorTermType, rows: usize, columns: usize, config: SolverConfig, seed: u64) -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let truth = Truth::random(ty, rows, columns, FREQUENCIES.len(), &mut rng);
    let mut cal = NewCalibration::new(ty, rows, columns, &frequency(), config)?;
    add_standards(&mut cal, &truth, &mut rng)?;
    let solved = cal.solve()?;

    assert_eq!(solved.error_term_type(), ty);
    assert_eq!(solved.frequencies(), &FREQUENCIES);
    assert_eq!(solved.terms().dim(), truth.terms.dim());
    for (findex, (row, expected)) in solved.terms().rows().into_iter().zip(truth.terms.rows()).enumerate() {
        for (k, (a, e)) in row.iter().zip(expected.iter()).enumerate() {
            assert!(
                (a - e).norm() < 1e-6,
                "{ty} {rows}x{columns}: term {k} at frequency {findex} is {a}, expected {e}"
            );
        }
    }
    Ok(())
}

#[test]
fn test_every_type_recovers_error_terms() -> anyhow::Result<()> {
    init_tracing();
    for (seed, ty) in ErrorTermType::ALL.into_iter().enumerate() {
        for (rows, columns) in valid_dims(ty) {
            solve_round_trip(ty, rows, columns, SolverConfig::default(), seed as u64)?;
        }
    }
    Ok(())
}

#[test]
fn test_weighted_solve_is_exact_without_noise() -> anyhow::Result<()> {
    let config = SolverConfig {
        measurement_error: Some(MeasurementError {
            noise_floor: 1e-6,
            tracking: 1e-3,
        }),
        ..SolverConfig::default()
    };
    for ty in [ErrorTermType::TE10, ErrorTermType::UE10, ErrorTermType::E12] {
        solve_round_trip(ty, 2, 2, config.clone(), 42)?;
    }
    Ok(())
}

#[test]
fn test_double_reflect_standards() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(7);
    let truth = Truth::random(ErrorTermType::T8, 2, 2, FREQUENCIES.len(), &mut rng);
    let mut cal = NewCalibration::new(ErrorTermType::T8, 2, 2, &frequency(), SolverConfig::default())?;
    for (id, v) in [
        (ParameterId::SHORT, -1.0),
        (ParameterId::OPEN, 1.0),
        (ParameterId::MATCH, 0.0),
    ] {
        let s = ndarray::array![[c(v, 0.0), c(0.0, 0.0)], [c(0.0, 0.0), c(v, 0.0)]];
        cal.add_double_reflect(&truth.measure(&s, &[0, 1]), id, id, 0, 1)?;
    }
    cal.add_through(&truth.measure(&through(), &[0, 1]), 0, 1)?;
    let solved = cal.solve()?;
    assert_all_close(solved.terms().iter(), truth.terms.iter(), 1e-8);
    Ok(())
}

#[test]
fn test_line_standard_with_port_map_reversed() -> anyhow::Result<()> {
    // A line connected backwards: standard port 0 on VNA port 1.
    let mut rng = StdRng::seed_from_u64(11);
    let truth = Truth::random(ErrorTermType::U8, 2, 2, FREQUENCIES.len(), &mut rng);
    let mut cal = NewCalibration::new(ErrorTermType::U8, 2, 2, &frequency(), SolverConfig::default())?;
    for port in 0..2 {
        for (id, v) in [(ParameterId::SHORT, -1.0), (ParameterId::OPEN, 1.0), (ParameterId::MATCH, 0.0)] {
            cal.add_single_reflect(&truth.measure(&reflect(c(v, 0.0)), &[port]), id, port)?;
        }
    }
    let line = ndarray::array![[c(0.1, 0.05), c(0.7, -0.2)], [c(0.6, -0.25), c(-0.05, 0.1)]];
    let mut ids = ndarray::Array2::from_elem((2, 2), ParameterId::MATCH);
    for ((i, j), v) in line.indexed_iter() {
        ids[[i, j]] = cal.make_scalar(*v)?;
    }
    cal.add_line(&truth.measure(&line, &[1, 0]), &ids, 1, 0)?;
    let solved = cal.solve()?;
    assert_all_close(solved.terms().iter(), truth.terms.iter(), 1e-8);
    Ok(())
}

#[test]
fn test_wave_measurements_match_ratios() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(3);
    for (ty, rows, columns) in [
        (ErrorTermType::T8, 2, 2),
        (ErrorTermType::TE10, 1, 2),
        (ErrorTermType::U8, 2, 1),
        (ErrorTermType::UE10, 3, 3),
        (ErrorTermType::UE14, 2, 2),
        (ErrorTermType::UE14, 2, 1),
        (ErrorTermType::E12, 2, 1),
        (ErrorTermType::E12, 3, 3),
    ] {
        let truth = Truth::random(ty, rows, columns, FREQUENCIES.len(), &mut rng);
        let mut cal = NewCalibration::new(ty, rows, columns, &frequency(), SolverConfig::default())?;
        let per_column = ty.is_per_column();
        add_solt_with(&mut cal, &truth, |m| to_waves(m, per_column, &mut rng))?;
        let solved = cal.solve()?;
        assert_all_close(solved.terms().iter(), truth.terms.iter(), 1e-8);
    }
    Ok(())
}

#[test]
fn test_dense_wave_standards() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(4);
    for ty in [ErrorTermType::T16, ErrorTermType::U16] {
        let truth = Truth::random(ty, 2, 2, FREQUENCIES.len(), &mut rng);
        let mut cal = NewCalibration::new(ty, 2, 2, &frequency(), SolverConfig::default())?;
        for _ in 0..6 {
            let s = random_s(2, &mut rng);
            let mut cells = ndarray::Array2::from_elem((2, 2), ParameterId::MATCH);
            for ((i, j), x) in s.indexed_iter() {
                cells[[i, j]] = cal.make_scalar(*x)?;
            }
            let m = to_waves(truth.measure(&s, &[0, 1]), false, &mut rng);
            cal.add_mapped_matrix(&m, &cells, &[0, 1])?;
        }
        let solved = cal.solve()?;
        assert_all_close(solved.terms().iter(), truth.terms.iter(), 1e-8);
    }
    Ok(())
}

#[test]
fn test_too_few_standards() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(5);
    let truth = Truth::random(ErrorTermType::T8, 2, 2, FREQUENCIES.len(), &mut rng);
    let mut cal = NewCalibration::new(ErrorTermType::T8, 2, 2, &frequency(), SolverConfig::default())?;
    cal.add_single_reflect(&truth.measure(&reflect(c(-1.0, 0.0)), &[0]), ParameterId::SHORT, 0)?;
    let err = cal.solve().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Usage);
    Ok(())
}

#[test]
fn test_repeated_standard_is_rank_deficient() -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(6);
    let truth = Truth::random(ErrorTermType::T8, 1, 1, FREQUENCIES.len(), &mut rng);
    let mut cal = NewCalibration::new(ErrorTermType::T8, 1, 1, &frequency(), SolverConfig::default())?;
    for _ in 0..3 {
        cal.add_single_reflect(&truth.measure(&reflect(c(-1.0, 0.0)), &[0]), ParameterId::SHORT, 0)?;
    }
    let err = cal.solve().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Math);
    Ok(())
}

#[test]
fn test_missing_leakage_observation_solves_with_zero() -> anyhow::Result<()> {
    // Every standard connects ports 0 and 1, so no standard observes the
    // leakage cells and they come back as zero.
    init_tracing();
    let truth = Truth::identity(ErrorTermType::TE10, 2, 2, FREQUENCIES.len());
    let mut cal = NewCalibration::new(ErrorTermType::TE10, 2, 2, &frequency(), SolverConfig::default())?;
    let standards = [
        ndarray::array![[c(-1.0, 0.0), c(0.5, 0.0)], [c(0.5, 0.0), c(-1.0, 0.0)]],
        ndarray::array![[c(1.0, 0.0), c(0.5, 0.0)], [c(0.5, 0.0), c(1.0, 0.0)]],
        ndarray::array![[c(0.2, 0.0), c(0.8, 0.0)], [c(0.8, 0.0), c(0.2, 0.0)]],
    ];
    for s in &standards {
        let mut cells = ndarray::Array2::from_elem((2, 2), ParameterId::MATCH);
        for ((i, j), x) in s.indexed_iter() {
            cells[[i, j]] = cal.make_scalar(*x)?;
        }
        cal.add_mapped_matrix(&truth.measure(s, &[0, 1]), &cells, &[0, 1])?;
    }
    cal.add_through(&truth.measure(&through(), &[0, 1]), 0, 1)?;
    let solved = cal.solve()?;
    assert_all_close(solved.terms().iter(), truth.terms.iter(), 1e-8);
    let el = *truth.layout.leakage().unwrap();
    for row in solved.terms().rows() {
        for k in el.range() {
            assert_eq!(row[k], c(0.0, 0.0));
        }
    }
    Ok(())
}
