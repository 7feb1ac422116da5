//! Calibration builder
//!
//! [`NewCalibration`] owns the parameters and measured standards of one
//! calibration in progress. Every public entry point validates its input
//! completely before changing any state, and passes errors through the
//! optional error handler before returning them.

use std::collections::HashMap;
use std::fmt;

use ndarray::{array, s, Array2, Array3};
use num_complex::Complex64;
use tracing::{debug, info, warn};

use super::equations::{build_equations, estimate_leakage, EvaluatedStandard, SValue};
use super::solve::{solve_frequency, ue14_to_e12, Constraint};
use super::{Calibration, Measurement};
use crate::config::SolverConfig;
use crate::error::{self, Error, ErrorHandler, Result};
use crate::frequency::Frequency;
use crate::layout::{ErrorTermType, Layout};
use crate::parameter::{
    CalkitStandard, DataStandard, ParameterArena, ParameterId, ParameterKind, Sigma,
};

const ZERO: Complex64 = Complex64::new(0.0, 0.0);
const ONE: Complex64 = Complex64::new(1.0, 0.0);

/// S-parameters of a standard, as parameter handles.
#[derive(Debug, Clone)]
enum Cells {
    /// One single-valued parameter per cell.
    Matrix(Array2<ParameterId>),
    /// One multi-port calkit or data parameter.
    Mapped(ParameterId),
}

#[derive(Debug, Clone)]
struct Standard {
    /// Ratio measurements [freq, row, column].
    m: Array3<Complex64>,
    /// VNA port of each standard port.
    ports: Vec<usize>,
    cells: Cells,
}

impl Standard {
    fn parameters(&self) -> Vec<ParameterId> {
        match &self.cells {
            Cells::Matrix(cells) => cells.iter().copied().collect(),
            Cells::Mapped(id) => vec![*id],
        }
    }
}

/// A calibration being built from measured standards.
pub struct NewCalibration {
    layout: Layout,
    frequencies: Vec<f64>,
    config: SolverConfig,
    parameters: ParameterArena,
    standards: Vec<Standard>,
    error_handler: Option<ErrorHandler>,
    solved: HashMap<ParameterId, Vec<Complex64>>,
}

impl fmt::Debug for NewCalibration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewCalibration")
            .field("layout", &self.layout)
            .field("frequencies", &self.frequencies.len())
            .field("standards", &self.standards.len())
            .field("config", &self.config)
            .finish()
    }
}

impl NewCalibration {
    /// Start a calibration of `ty` for a rows×columns measurement.
    pub fn new(
        ty: ErrorTermType,
        rows: usize,
        columns: usize,
        frequency: &Frequency,
        config: SolverConfig,
    ) -> Result<Self> {
        let layout = Layout::new(ty, rows, columns)?;
        config.validate()?;
        if frequency.npoints() == 0 {
            return Err(Error::usage("calibration needs at least one frequency"));
        }
        Ok(Self {
            layout,
            frequencies: frequency.f().to_vec(),
            config,
            parameters: ParameterArena::new(),
            standards: Vec::new(),
            error_handler: None,
            solved: HashMap::new(),
        })
    }

    fn check<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|e| error::report(self.error_handler.as_ref(), e))
    }

    pub fn error_term_type(&self) -> ErrorTermType {
        self.layout.error_term_type()
    }

    pub fn rows(&self) -> usize {
        self.layout.rows()
    }

    pub fn columns(&self) -> usize {
        self.layout.columns()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn standard_count(&self) -> usize {
        self.standards.len()
    }

    /// Install a callback that sees every error before it is returned.
    pub fn set_error_handler(&mut self, handler: ErrorHandler) {
        self.error_handler = Some(handler);
    }

    /// Replace the frequency vector. Only allowed before any standard is added.
    pub fn set_frequency_vector(&mut self, frequency: &Frequency) -> Result<()> {
        let result = if !self.standards.is_empty() {
            Err(Error::usage(
                "frequency vector cannot change once standards have been added",
            ))
        } else if frequency.npoints() == 0 {
            Err(Error::usage("calibration needs at least one frequency"))
        } else {
            self.frequencies = frequency.f().to_vec();
            Ok(())
        };
        self.check(result)
    }

    /// Reference impedance calkit and data standards are evaluated in.
    pub fn set_z0(&mut self, z0: f64) -> Result<()> {
        let config = SolverConfig {
            z0,
            ..self.config.clone()
        };
        self.set_config(config)
    }

    pub fn set_config(&mut self, config: SolverConfig) -> Result<()> {
        let result = config.validate();
        if result.is_ok() {
            self.config = config;
        }
        self.check(result)
    }

    // ========================================================================
    // Parameters
    // ========================================================================

    fn make(&mut self, kind: ParameterKind) -> Result<ParameterId> {
        let result = self.parameters.insert(kind);
        self.check(result)
    }

    pub fn make_scalar(&mut self, value: Complex64) -> Result<ParameterId> {
        self.make(ParameterKind::Scalar(value))
    }

    /// Tabulated parameter, interpolated between `frequencies`.
    pub fn make_vector(&mut self, frequencies: Vec<f64>, values: Vec<Complex64>) -> Result<ParameterId> {
        self.make(ParameterKind::Vector {
            frequencies,
            values: values.into(),
        })
    }

    /// Parameter solved for, with `other` as its initial guess.
    pub fn make_unknown(&mut self, other: ParameterId) -> Result<ParameterId> {
        self.make(ParameterKind::Unknown { other })
    }

    /// Parameter solved for and held within `sigma` of `other`.
    pub fn make_correlated(&mut self, other: ParameterId, sigma: Sigma) -> Result<ParameterId> {
        self.make(ParameterKind::Correlated { other, sigma })
    }

    pub fn make_calkit(&mut self, standard: CalkitStandard) -> Result<ParameterId> {
        self.make(ParameterKind::Calkit(standard))
    }

    pub fn make_data(&mut self, standard: DataStandard) -> Result<ParameterId> {
        self.make(ParameterKind::Data(standard))
    }

    /// Drop the caller's hold. The parameter lives on while standards or
    /// correlated parameters still refer to it.
    pub fn delete_parameter(&mut self, id: ParameterId) -> Result<()> {
        let result = self.parameters.release(id);
        self.check(result)
    }

    /// Value of a single-valued known parameter at `f`.
    pub fn parameter_value(&self, id: ParameterId, f: f64) -> Result<Complex64> {
        let result = self.parameters.kind(id).and_then(|kind| {
            if kind.ports() != 1 {
                return Err(Error::usage(format!("{id} is a {}-port standard", kind.ports())));
            }
            let s = self
                .parameters
                .s_matrix(id, f, self.config.interpolation_order, self.config.z0)?;
            Ok(s[[0, 0]])
        });
        self.check(result)
    }

    /// Per-frequency solved values of an unknown or correlated parameter.
    pub fn solved_values(&self, id: ParameterId) -> Option<&[Complex64]> {
        self.solved.get(&id).map(Vec::as_slice)
    }

    // ========================================================================
    // Standards
    // ========================================================================

    /// One-port standard `s` on `port`.
    pub fn add_single_reflect(&mut self, m: &Measurement, s: ParameterId, port: usize) -> Result<()> {
        let result = self.add_standard(m, vec![port], Cells::Matrix(array![[s]]));
        self.check(result)
    }

    /// Two independent one-port standards measured at the same time.
    pub fn add_double_reflect(
        &mut self,
        m: &Measurement,
        s1: ParameterId,
        s2: ParameterId,
        port1: usize,
        port2: usize,
    ) -> Result<()> {
        let cells = array![[s1, ParameterId::ZERO], [ParameterId::ZERO, s2]];
        let result = self.add_standard(m, vec![port1, port2], Cells::Matrix(cells));
        self.check(result)
    }

    /// Perfect zero-length through between two ports.
    pub fn add_through(&mut self, m: &Measurement, port1: usize, port2: usize) -> Result<()> {
        let cells = array![
            [ParameterId::ZERO, ParameterId::ONE],
            [ParameterId::ONE, ParameterId::ZERO]
        ];
        let result = self.add_standard(m, vec![port1, port2], Cells::Matrix(cells));
        self.check(result)
    }

    /// General two-port standard given as a 2×2 matrix of parameters.
    pub fn add_line(
        &mut self,
        m: &Measurement,
        s: &Array2<ParameterId>,
        port1: usize,
        port2: usize,
    ) -> Result<()> {
        let result = if s.dim() != (2, 2) {
            Err(Error::usage(format!("line standard must be 2x2, got {:?}", s.dim())))
        } else {
            self.add_standard(m, vec![port1, port2], Cells::Matrix(s.clone()))
        };
        self.check(result)
    }

    /// n-port standard given as an n×n matrix of parameters; standard port
    /// `k` is connected to VNA port `port_map[k]`.
    pub fn add_mapped_matrix(
        &mut self,
        m: &Measurement,
        s: &Array2<ParameterId>,
        port_map: &[usize],
    ) -> Result<()> {
        let result = self.add_standard(m, port_map.to_vec(), Cells::Matrix(s.clone()));
        self.check(result)
    }

    /// Multi-port calkit or data standard with a port map.
    pub fn add_mapped_standard(
        &mut self,
        m: &Measurement,
        standard: ParameterId,
        port_map: &[usize],
    ) -> Result<()> {
        let result = self.add_standard(m, port_map.to_vec(), Cells::Mapped(standard));
        self.check(result)
    }

    fn add_standard(&mut self, m: &Measurement, ports: Vec<usize>, cells: Cells) -> Result<()> {
        let p = self.layout.ports();
        let (rows, columns) = (self.layout.rows(), self.layout.columns());
        let ty = self.layout.error_term_type();
        let n = ports.len();
        if n == 0 {
            return Err(Error::usage("standard must cover at least one port"));
        }
        for (k, &port) in ports.iter().enumerate() {
            if port >= p {
                return Err(Error::usage(format!(
                    "port {port} out of range for a {p}-port calibration"
                )));
            }
            if ports[..k].contains(&port) {
                return Err(Error::usage(format!("port {port} appears twice in the port map")));
            }
        }
        match &cells {
            Cells::Matrix(s) => {
                if s.dim() != (n, n) {
                    return Err(Error::usage(format!(
                        "standard matrix is {:?} but the port map has {n} ports",
                        s.dim()
                    )));
                }
                for &id in s {
                    let kind = self.parameters.kind(id)?;
                    if kind.ports() != 1 {
                        return Err(Error::usage(format!(
                            "{id} is a multi-port standard; use add_mapped_standard"
                        )));
                    }
                }
            }
            Cells::Mapped(id) => {
                let kind = self.parameters.kind(*id)?;
                if kind.ports() != n {
                    return Err(Error::usage(format!(
                        "{id} has {} ports but the port map has {n}",
                        kind.ports()
                    )));
                }
            }
        }
        if ty.is_dense() && n != p {
            return Err(Error::usage(format!(
                "{ty} standards must connect all {p} ports"
            )));
        }
        if !ports.iter().any(|&q| q < rows) || !ports.iter().any(|&q| q < columns) {
            return Err(Error::usage(format!(
                "standard on ports {ports:?} is not observed by a {rows}x{columns} measurement"
            )));
        }

        let standard_parameters = match &cells {
            Cells::Matrix(s) => s.iter().copied().collect::<Vec<_>>(),
            Cells::Mapped(id) => vec![*id],
        };
        let (fmin, fmax) = (self.frequencies[0], self.frequencies[self.frequencies.len() - 1]);
        for &id in &standard_parameters {
            self.parameters.check_range(id, fmin, fmax)?;
        }

        let nfreq = self.frequencies.len();
        let per_column = ty.is_per_column();
        m.validate(nfreq, rows, columns, per_column)?;
        let ratio = match m {
            Measurement::Ratio(ratio) => ratio.clone(),
            Measurement::Waves { .. } => {
                let mut ratio = Array3::zeros((nfreq, rows, columns));
                for (findex, &f) in self.frequencies.iter().enumerate() {
                    ratio
                        .slice_mut(s![findex, .., ..])
                        .assign(&m.ratio_at(findex, per_column, f)?);
                }
                ratio
            }
        };
        if ratio.iter().any(|v| !v.is_finite()) {
            return Err(Error::usage("measurement contains non-finite values"));
        }

        self.standards.try_reserve(1)?;
        for &id in &standard_parameters {
            self.parameters.hold(id)?;
        }
        self.standards.push(Standard {
            m: ratio,
            ports,
            cells,
        });
        Ok(())
    }

    // ========================================================================
    // Solve
    // ========================================================================

    /// Solve for the error terms at every calibration frequency.
    pub fn solve(&mut self) -> Result<Calibration> {
        let result = self.solve_inner();
        self.check(result)
    }

    /// Unknown parameters the solver determines, in solve order.
    ///
    /// Every unknown or correlated parameter a standard uses, plus unknown
    /// correlation targets of correlated parameters.
    fn unknown_parameters(&self) -> Result<Vec<ParameterId>> {
        let mut ids: Vec<ParameterId> = Vec::new();
        for standard in &self.standards {
            for id in standard.parameters() {
                let mut current = Some(id);
                while let Some(id) = current.take() {
                    let kind = self.parameters.kind(id)?;
                    if !kind.is_unknown() || ids.contains(&id) {
                        break;
                    }
                    ids.push(id);
                    if let ParameterKind::Correlated { other, .. } = kind {
                        if self.parameters.kind(*other)?.is_unknown() {
                            current = Some(*other);
                        }
                    }
                }
            }
        }
        Ok(ids)
    }

    fn evaluate(
        &self,
        standard: &Standard,
        findex: usize,
        f: f64,
        unknowns: &HashMap<ParameterId, usize>,
    ) -> Result<EvaluatedStandard> {
        let p = self.layout.ports();
        let order = self.config.interpolation_order;
        let z0 = self.config.z0;
        let value = |id: ParameterId| -> Result<SValue> {
            match unknowns.get(&id) {
                Some(&k) => Ok(SValue::Unknown(k)),
                None => Ok(SValue::Known(self.parameters.s_matrix(id, f, order, z0)?[[0, 0]])),
            }
        };
        let mut smat = Array2::from_elem((p, p), SValue::Known(ZERO));
        match &standard.cells {
            Cells::Matrix(cells) => {
                for ((a, b), &id) in cells.indexed_iter() {
                    smat[[standard.ports[a], standard.ports[b]]] = value(id)?;
                }
            }
            Cells::Mapped(id) if unknowns.contains_key(id) => {
                smat[[standard.ports[0], standard.ports[0]]] = value(*id)?;
            }
            Cells::Mapped(id) => {
                let values = self.parameters.s_matrix(*id, f, order, z0)?;
                for ((a, b), &v) in values.indexed_iter() {
                    smat[[standard.ports[a], standard.ports[b]]] = SValue::Known(v);
                }
            }
        }
        let mut covered = standard.ports.clone();
        covered.sort_unstable();
        Ok(EvaluatedStandard {
            s: smat,
            covered,
            m: standard.m.slice(s![findex, .., ..]).to_owned(),
        })
    }

    fn constraints(
        &self,
        ids: &[ParameterId],
        unknowns: &HashMap<ParameterId, usize>,
        f: f64,
    ) -> Result<Vec<Constraint>> {
        let order = self.config.interpolation_order;
        let mut constraints = Vec::new();
        for (k, &id) in ids.iter().enumerate() {
            if let ParameterKind::Correlated { other, sigma } = self.parameters.kind(id)? {
                let target = match unknowns.get(other) {
                    Some(&o) => SValue::Unknown(o),
                    None => SValue::Known(
                        self.parameters.s_matrix(*other, f, order, self.config.z0)?[[0, 0]],
                    ),
                };
                constraints.push(Constraint {
                    unknown: k,
                    target,
                    sigma: sigma.at(f, order)?,
                });
            }
        }
        Ok(constraints)
    }

    fn solve_inner(&mut self) -> Result<Calibration> {
        if self.standards.is_empty() {
            return Err(Error::usage("no standards have been added"));
        }
        let ty = self.layout.error_term_type();
        let solve_layout = self.layout.solve_layout()?;
        let (rows, columns) = (self.layout.rows(), self.layout.columns());
        let ids = self.unknown_parameters()?;
        let unknowns: HashMap<ParameterId, usize> =
            ids.iter().enumerate().map(|(k, &id)| (id, k)).collect();
        let nfreq = self.frequencies.len();
        let total = self.layout.total_terms();
        let order = self.config.interpolation_order;

        let mut storage: Vec<Complex64> = Vec::new();
        storage.try_reserve_exact(nfreq * total)?;
        let mut solved: Vec<Vec<Complex64>> = ids.iter().map(|_| Vec::with_capacity(nfreq)).collect();
        let mut warned = false;

        for (findex, &f) in self.frequencies.iter().enumerate() {
            let standards = self
                .standards
                .iter()
                .map(|standard| self.evaluate(standard, findex, f, &unknowns))
                .collect::<Result<Vec<_>>>()?;

            let mut x = vec![ZERO; solve_layout.total_terms()];
            for t in solve_layout.normalization_terms() {
                x[t] = ONE;
            }
            let leakage = match solve_layout.leakage() {
                Some(el) => {
                    let estimate = estimate_leakage(el, &standards);
                    if !estimate.unobserved.is_empty() && !warned {
                        warn!(
                            cells = ?estimate.unobserved,
                            "no standard leaves these port pairs disconnected; leakage set to zero"
                        );
                        warned = true;
                    }
                    x[el.range()].copy_from_slice(&estimate.values);
                    el.to_matrix(&x)
                }
                None => Array2::zeros((rows, columns)),
            };

            let mut equations = Vec::new();
            for standard in &standards {
                equations.extend(build_equations(
                    &solve_layout,
                    standard,
                    &leakage,
                    self.config.measurement_error.as_ref(),
                ));
            }

            let mut u = ids
                .iter()
                .map(|&id| self.parameters.initial_guess(id, f, order, self.config.z0))
                .collect::<Result<Vec<_>>>()?;
            let constraints = self.constraints(&ids, &unknowns, f)?;

            let stats = solve_frequency(
                &solve_layout,
                &equations,
                &mut x,
                &mut u,
                &constraints,
                &self.config,
                f,
            )?;
            debug!(
                f,
                equations = equations.len(),
                iterations = stats.iterations,
                inverse_condition = stats.inverse_condition,
                "solved error terms"
            );

            if ty == ErrorTermType::E12 {
                x = ue14_to_e12(&solve_layout, &self.layout, &x, f)?;
            }
            storage.extend(x);
            for (values, v) in solved.iter_mut().zip(u) {
                values.push(v);
            }
        }

        let terms = Array2::from_shape_vec((nfreq, total), storage)
            .map_err(|e| Error::usage(format!("error-term storage: {e}")))?;
        let mut calibration = Calibration::new(
            String::new(),
            ty,
            rows,
            columns,
            self.frequencies.clone(),
            terms,
            self.config.z0,
        )?;
        calibration.set_interpolation_order(order)?;

        self.solved = ids.into_iter().zip(solved).collect();
        info!(
            error_term_type = %ty,
            rows,
            columns,
            frequencies = nfreq,
            standards = self.standards.len(),
            unknowns = self.solved.len(),
            "calibration solved"
        );
        Ok(calibration)
    }
}
