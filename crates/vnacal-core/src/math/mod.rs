//! Mathematical kernels
//!
//! Dense complex linear algebra, rational frequency interpolation and
//! network parameter transforms used by the solver and applier.

pub mod interpolate;
pub mod linalg;
pub mod transforms;

pub use interpolate::{rational_interpolate, SegmentHint};
