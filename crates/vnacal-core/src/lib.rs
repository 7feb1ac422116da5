//! vnacal-core: Vector network analyzer calibration
//!
//! Solves error-term models from measured calibration standards and applies
//! them to correct raw device-under-test measurements.
//!
//! ## Modules
//!
//! - `layout` - Error-term types and their block layout
//! - `math` - Dense complex linear algebra, rational interpolation
//! - `parameter` - Standard values: constants, curves, calkits, data, unknowns
//! - `calibration` - Calibration builder, solver and applier
//! - `calfile` - Calibration file format
//! - `vnacal` - Container of named calibrations
//! - `frequency`, `network` - Frequency grids and S-parameter networks
//!
//! ## Example
//!
//! ```no_run
//! use vnacal_core::{Frequency, Measurement, NewCalibration, ParameterId, SolverConfig, ErrorTermType};
//! # fn measured() -> Measurement { unimplemented!() }
//! # fn main() -> vnacal_core::Result<()> {
//! let freq = Frequency::from_hz(vec![1e9, 2e9])?;
//! let mut cal = NewCalibration::new(ErrorTermType::T8, 2, 2, &freq, SolverConfig::default())?;
//! cal.add_double_reflect(&measured(), ParameterId::SHORT, ParameterId::SHORT, 0, 1)?;
//! cal.add_double_reflect(&measured(), ParameterId::OPEN, ParameterId::OPEN, 0, 1)?;
//! cal.add_double_reflect(&measured(), ParameterId::MATCH, ParameterId::MATCH, 0, 1)?;
//! cal.add_through(&measured(), 0, 1)?;
//! let solved = cal.solve()?;
//! let dut = solved.apply(&[1e9, 2e9], &measured())?;
//! # Ok(())
//! # }
//! ```

pub mod calfile;
pub mod calibration;
pub mod config;
pub mod constants;
pub mod error;
pub mod frequency;
pub mod layout;
pub mod math;
pub mod network;
pub mod parameter;
pub mod properties;
pub mod vnacal;

pub use calibration::{Calibration, Measurement, NewCalibration};
pub use config::{MeasurementError, SolverConfig};
pub use error::{Error, ErrorCategory, ErrorHandler, Result};
pub use frequency::Frequency;
pub use layout::{ErrorTermType, Layout};
pub use network::Network;
pub use parameter::{CalkitStandard, DataStandard, ParameterId, Sigma};
pub use properties::{Properties, Property};
pub use vnacal::VnaCal;
