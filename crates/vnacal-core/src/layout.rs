//! Error-term layout
//!
//! Maps an error-term type and port dimensions to the position of every
//! named sub-block inside the flat per-frequency error-term vector. Solve,
//! apply and file storage all address the vector through a [`Layout`], never
//! through their own index arithmetic.
//!
//! Let `p = max(rows, columns)`. Block shapes:
//!
//! | type      | blocks                                                      |
//! |-----------|-------------------------------------------------------------|
//! | T8, TE10  | ts Diag(rows×p), ti Diag(rows×p), tx Diag(cols×p), tm Diag(cols×p) [, el] |
//! | T16       | ts, ti, tx, tm Full(p×p)                                    |
//! | U8, UE10  | um Diag(p×rows), ui Diag(p×cols), ux Diag(p×rows), us Diag(p×cols) [, el] |
//! | U16       | um, ui, ux, us Full(p×p)                                    |
//! | UE14      | per column: um14 Vec(rows), ui14, ux14 Vec(rows), us14; then el |
//! | E12       | per column: el12, er12, em12 Vec(rows)                      |
//!
//! `el` is OffDiag(rows×cols): every cell except the diagonal.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use ndarray::Array2;
use num_complex::Complex64;

use crate::error::{Error, Result};

/// The eight error-term models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorTermType {
    T8,
    U8,
    TE10,
    UE10,
    T16,
    U16,
    UE14,
    E12,
}

impl ErrorTermType {
    pub const ALL: [ErrorTermType; 8] = [
        ErrorTermType::T8,
        ErrorTermType::U8,
        ErrorTermType::TE10,
        ErrorTermType::UE10,
        ErrorTermType::T16,
        ErrorTermType::U16,
        ErrorTermType::UE14,
        ErrorTermType::E12,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ErrorTermType::T8 => "T8",
            ErrorTermType::U8 => "U8",
            ErrorTermType::TE10 => "TE10",
            ErrorTermType::UE10 => "UE10",
            ErrorTermType::T16 => "T16",
            ErrorTermType::U16 => "U16",
            ErrorTermType::UE14 => "UE14",
            ErrorTermType::E12 => "E12",
        }
    }

    /// Inverted by left division (`S = A⁻¹B`).
    pub fn is_t_family(&self) -> bool {
        matches!(self, ErrorTermType::T8 | ErrorTermType::TE10 | ErrorTermType::T16)
    }

    /// Off-diagonal leakage is estimated outside the main linear system.
    pub fn has_leakage_outside(&self) -> bool {
        matches!(
            self,
            ErrorTermType::TE10 | ErrorTermType::UE10 | ErrorTermType::UE14 | ErrorTermType::E12
        )
    }

    /// Each measurement column is an independent system.
    pub fn is_per_column(&self) -> bool {
        matches!(self, ErrorTermType::UE14 | ErrorTermType::E12)
    }

    /// Error-term blocks are full matrices.
    pub fn is_dense(&self) -> bool {
        matches!(self, ErrorTermType::T16 | ErrorTermType::U16)
    }

    /// The type the solver works in. E12 is solved as UE14 and converted.
    pub fn solve_type(&self) -> ErrorTermType {
        match self {
            ErrorTermType::E12 => ErrorTermType::UE14,
            other => *other,
        }
    }

    /// Check that a rows×columns measurement is meaningful for this type.
    pub fn validate_dimensions(&self, rows: usize, columns: usize) -> Result<()> {
        let ok = rows >= 1
            && columns >= 1
            && (rows == columns
                || match self {
                    ErrorTermType::T8 | ErrorTermType::TE10 => rows == 1 && columns == 2,
                    ErrorTermType::U8
                    | ErrorTermType::UE10
                    | ErrorTermType::UE14
                    | ErrorTermType::E12 => rows == 2 && columns == 1,
                    ErrorTermType::T16 | ErrorTermType::U16 => false,
                });
        if ok {
            Ok(())
        } else {
            Err(Error::usage(format!(
                "invalid dimensions {rows}x{columns} for error term type {self}"
            )))
        }
    }
}

impl fmt::Display for ErrorTermType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ErrorTermType {
    type Err = Error;

    /// Parse from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self> {
        ErrorTermType::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::usage(format!("unknown error term type: {s}")))
    }
}

// ============================================================================
// Blocks
// ============================================================================

/// Shape of a sub-block and how its cells map to positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockShape {
    /// Only the `min(rows, cols)` diagonal cells are stored.
    Diagonal { rows: usize, cols: usize },
    /// All cells, row-major.
    Full { rows: usize, cols: usize },
    /// All cells except the diagonal, row-major.
    OffDiagonal { rows: usize, cols: usize },
    /// A column vector.
    Vector { len: usize },
    Scalar,
}

/// A named run of terms inside the error-term vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub name: &'static str,
    pub offset: usize,
    pub shape: BlockShape,
}

impl Block {
    fn new(name: &'static str, offset: usize, shape: BlockShape) -> Self {
        Self { name, offset, shape }
    }

    /// Number of stored terms.
    pub fn len(&self) -> usize {
        match self.shape {
            BlockShape::Diagonal { rows, cols } => rows.min(cols),
            BlockShape::Full { rows, cols } => rows * cols,
            BlockShape::OffDiagonal { rows, cols } => rows * cols - rows.min(cols),
            BlockShape::Vector { len } => len,
            BlockShape::Scalar => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Positions occupied in the error-term vector.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len()
    }

    /// Matrix dimensions of the block; vectors are columns.
    pub fn dim(&self) -> (usize, usize) {
        match self.shape {
            BlockShape::Diagonal { rows, cols }
            | BlockShape::Full { rows, cols }
            | BlockShape::OffDiagonal { rows, cols } => (rows, cols),
            BlockShape::Vector { len } => (len, 1),
            BlockShape::Scalar => (1, 1),
        }
    }

    /// Position of cell `(i, j)`, or `None` if the cell is structurally zero.
    pub fn index(&self, i: usize, j: usize) -> Option<usize> {
        let (rows, cols) = self.dim();
        if i >= rows || j >= cols {
            return None;
        }
        let local = match self.shape {
            BlockShape::Diagonal { .. } => (i == j).then_some(i)?,
            BlockShape::Full { .. } => i * cols + j,
            BlockShape::OffDiagonal { .. } => {
                if i == j {
                    return None;
                }
                let d = rows.min(cols);
                let skipped = i.min(d) + usize::from(i < d && i < j);
                i * cols + j - skipped
            }
            BlockShape::Vector { .. } | BlockShape::Scalar => i,
        };
        Some(self.offset + local)
    }

    /// Expand the block into a dense matrix, structural zeros included.
    pub fn to_matrix(&self, terms: &[Complex64]) -> Array2<Complex64> {
        Array2::from_shape_fn(self.dim(), |(i, j)| {
            self.index(i, j).map_or(Complex64::new(0.0, 0.0), |k| terms[k])
        })
    }

    /// Scalar value of a 1×1 block.
    #[inline]
    pub fn scalar(&self, terms: &[Complex64]) -> Complex64 {
        terms[self.offset]
    }
}

// ============================================================================
// Layout
// ============================================================================

/// UE14 blocks for one measurement column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ue14Column {
    pub um: Block,
    pub ui: Block,
    pub ux: Block,
    pub us: Block,
}

impl Ue14Column {
    pub fn range(&self) -> Range<usize> {
        self.um.offset..self.us.range().end
    }
}

/// E12 blocks for one measurement column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct E12Column {
    pub el: Block,
    pub er: Block,
    pub em: Block,
}

/// Block structure of one error-term type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Model {
    T {
        ts: Block,
        ti: Block,
        tx: Block,
        tm: Block,
        el: Option<Block>,
    },
    U {
        um: Block,
        ui: Block,
        ux: Block,
        us: Block,
        el: Option<Block>,
    },
    Ue14 {
        columns: Vec<Ue14Column>,
        el: Block,
    },
    E12 {
        columns: Vec<E12Column>,
    },
}

/// Offsets and sizes of every block for a (type, rows, columns) triple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    ty: ErrorTermType,
    rows: usize,
    columns: usize,
    model: Model,
    total: usize,
}

impl Layout {
    /// Compute the layout, rejecting dimensions the type cannot represent.
    pub fn new(ty: ErrorTermType, rows: usize, columns: usize) -> Result<Self> {
        ty.validate_dimensions(rows, columns)?;
        let p = rows.max(columns);
        let mut offset = 0;
        let mut next = |name: &'static str, shape: BlockShape| {
            let block = Block::new(name, offset, shape);
            offset += block.len();
            block
        };
        use BlockShape::*;

        let model = match ty {
            ErrorTermType::T8 | ErrorTermType::TE10 => Model::T {
                ts: next("ts", Diagonal { rows, cols: p }),
                ti: next("ti", Diagonal { rows, cols: p }),
                tx: next("tx", Diagonal { rows: columns, cols: p }),
                tm: next("tm", Diagonal { rows: columns, cols: p }),
                el: (ty == ErrorTermType::TE10).then(|| next("el", OffDiagonal { rows, cols: columns })),
            },
            ErrorTermType::T16 => Model::T {
                ts: next("ts", Full { rows: p, cols: p }),
                ti: next("ti", Full { rows: p, cols: p }),
                tx: next("tx", Full { rows: p, cols: p }),
                tm: next("tm", Full { rows: p, cols: p }),
                el: None,
            },
            ErrorTermType::U8 | ErrorTermType::UE10 => Model::U {
                um: next("um", Diagonal { rows: p, cols: rows }),
                ui: next("ui", Diagonal { rows: p, cols: columns }),
                ux: next("ux", Diagonal { rows: p, cols: rows }),
                us: next("us", Diagonal { rows: p, cols: columns }),
                el: (ty == ErrorTermType::UE10).then(|| next("el", OffDiagonal { rows, cols: columns })),
            },
            ErrorTermType::U16 => Model::U {
                um: next("um", Full { rows: p, cols: p }),
                ui: next("ui", Full { rows: p, cols: p }),
                ux: next("ux", Full { rows: p, cols: p }),
                us: next("us", Full { rows: p, cols: p }),
                el: None,
            },
            ErrorTermType::UE14 => {
                let columns_layout = (0..columns)
                    .map(|_| Ue14Column {
                        um: next("um14", Vector { len: rows }),
                        ui: next("ui14", Scalar),
                        ux: next("ux14", Vector { len: rows }),
                        us: next("us14", Scalar),
                    })
                    .collect();
                let el = next("el", OffDiagonal { rows, cols: columns });
                Model::Ue14 { columns: columns_layout, el }
            }
            ErrorTermType::E12 => Model::E12 {
                columns: (0..columns)
                    .map(|_| E12Column {
                        el: next("el12", Vector { len: rows }),
                        er: next("er12", Vector { len: rows }),
                        em: next("em12", Vector { len: rows }),
                    })
                    .collect(),
            },
        };

        Ok(Self {
            ty,
            rows,
            columns,
            model,
            total: offset,
        })
    }

    #[inline]
    pub fn error_term_type(&self) -> ErrorTermType {
        self.ty
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Number of DUT ports, `max(rows, columns)`.
    #[inline]
    pub fn ports(&self) -> usize {
        self.rows.max(self.columns)
    }

    /// Length of the error-term vector.
    #[inline]
    pub fn total_terms(&self) -> usize {
        self.total
    }

    #[inline]
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Leakage block estimated outside the main system, if any.
    pub fn leakage(&self) -> Option<&Block> {
        match &self.model {
            Model::T { el, .. } | Model::U { el, .. } => el.as_ref(),
            Model::Ue14 { el, .. } => Some(el),
            Model::E12 { .. } => None,
        }
    }

    /// Layout used while solving (UE14 for an E12 calibration).
    pub fn solve_layout(&self) -> Result<Layout> {
        match self.ty {
            ErrorTermType::E12 => Layout::new(ErrorTermType::UE14, self.rows, self.columns),
            _ => Ok(self.clone()),
        }
    }

    /// Terms the solver pins to 1 to remove the scale ambiguity.
    pub fn normalization_terms(&self) -> Vec<usize> {
        match &self.model {
            Model::T { tm, .. } => tm.index(0, 0).into_iter().collect(),
            Model::U { um, .. } => um.index(0, 0).into_iter().collect(),
            Model::Ue14 { columns, .. } => columns
                .iter()
                .enumerate()
                .filter_map(|(j, col)| col.um.index(j, 0))
                .collect(),
            Model::E12 { .. } => Vec::new(),
        }
    }

    /// Every block in storage order.
    pub fn blocks(&self) -> Vec<Block> {
        match &self.model {
            Model::T { ts, ti, tx, tm, el } => {
                let mut v = vec![*ts, *ti, *tx, *tm];
                v.extend(el.iter().copied());
                v
            }
            Model::U { um, ui, ux, us, el } => {
                let mut v = vec![*um, *ui, *ux, *us];
                v.extend(el.iter().copied());
                v
            }
            Model::Ue14 { columns, el } => {
                let mut v: Vec<Block> = columns
                    .iter()
                    .flat_map(|c| [c.um, c.ui, c.ux, c.us])
                    .collect();
                v.push(*el);
                v
            }
            Model::E12 { columns } => columns.iter().flat_map(|c| [c.el, c.er, c.em]).collect(),
        }
    }

    /// Error terms of a perfect (identity) measurement path.
    pub fn identity_terms(&self) -> Vec<Complex64> {
        let one = Complex64::new(1.0, 0.0);
        let mut e = vec![Complex64::new(0.0, 0.0); self.total];
        fn set_diag(block: &Block, e: &mut [Complex64]) {
            let (r, c) = block.dim();
            for k in 0..r.min(c) {
                if let Some(idx) = block.index(k, k) {
                    e[idx] = Complex64::new(1.0, 0.0);
                }
            }
        }
        match &self.model {
            Model::T { ts, tm, .. } => {
                set_diag(ts, &mut e);
                set_diag(tm, &mut e);
            }
            Model::U { um, us, .. } => {
                set_diag(um, &mut e);
                set_diag(us, &mut e);
            }
            Model::Ue14 { columns, .. } => {
                for col in columns {
                    e[col.um.range()].fill(one);
                    e[col.us.offset] = one;
                }
            }
            Model::E12 { columns } => {
                for col in columns {
                    e[col.er.range()].fill(one);
                }
            }
        }
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_dims(ty: ErrorTermType) -> Vec<(usize, usize)> {
        let mut dims = Vec::new();
        for rows in 1..=5 {
            for columns in 1..=5 {
                if ty.validate_dimensions(rows, columns).is_ok() {
                    dims.push((rows, columns));
                }
            }
        }
        dims
    }

    #[test]
    fn test_blocks_partition_vector() {
        for ty in ErrorTermType::ALL {
            for (rows, columns) in valid_dims(ty) {
                let layout = Layout::new(ty, rows, columns).unwrap();
                let mut next = 0;
                for block in layout.blocks() {
                    assert_eq!(block.offset, next, "{ty} {rows}x{columns} {}", block.name);
                    next += block.len();
                }
                assert_eq!(next, layout.total_terms(), "{ty} {rows}x{columns}");
            }
        }
    }

    #[test]
    fn test_block_indices_cover_range() {
        for ty in ErrorTermType::ALL {
            for (rows, columns) in valid_dims(ty) {
                let layout = Layout::new(ty, rows, columns).unwrap();
                let mut seen = vec![0usize; layout.total_terms()];
                for block in layout.blocks() {
                    let (r, c) = block.dim();
                    for i in 0..r {
                        for j in 0..c {
                            if let Some(k) = block.index(i, j) {
                                assert!(block.range().contains(&k));
                                seen[k] += 1;
                            }
                        }
                    }
                }
                assert!(seen.iter().all(|&n| n == 1), "{ty} {rows}x{columns}: {seen:?}");
            }
        }
    }

    #[test]
    fn test_term_counts() {
        let count = |ty, r, c| Layout::new(ty, r, c).unwrap().total_terms();
        assert_eq!(count(ErrorTermType::T8, 2, 2), 8);
        assert_eq!(count(ErrorTermType::U8, 2, 2), 8);
        assert_eq!(count(ErrorTermType::TE10, 2, 2), 10);
        assert_eq!(count(ErrorTermType::UE10, 2, 2), 10);
        assert_eq!(count(ErrorTermType::T16, 2, 2), 16);
        assert_eq!(count(ErrorTermType::U16, 2, 2), 16);
        assert_eq!(count(ErrorTermType::UE14, 2, 2), 14);
        assert_eq!(count(ErrorTermType::E12, 2, 2), 12);
        assert_eq!(count(ErrorTermType::T8, 1, 2), 6);
        assert_eq!(count(ErrorTermType::TE10, 1, 2), 7);
        assert_eq!(count(ErrorTermType::UE14, 2, 1), 7);
        assert_eq!(count(ErrorTermType::E12, 2, 1), 6);
    }

    #[test]
    fn test_one_port_has_no_leakage() {
        for ty in ErrorTermType::ALL {
            let layout = Layout::new(ty, 1, 1).unwrap();
            if let Some(el) = layout.leakage() {
                assert!(el.is_empty(), "{ty}");
            }
            for block in layout.blocks() {
                assert!(block.len() <= 1, "{ty} {}", block.name);
            }
        }
    }

    #[test]
    fn test_invalid_dimensions() {
        assert!(Layout::new(ErrorTermType::T8, 2, 1).is_err());
        assert!(Layout::new(ErrorTermType::U8, 1, 2).is_err());
        assert!(Layout::new(ErrorTermType::T16, 1, 2).is_err());
        assert!(Layout::new(ErrorTermType::E12, 0, 0).is_err());
        assert!(Layout::new(ErrorTermType::UE14, 3, 2).is_err());
    }

    #[test]
    fn test_offdiagonal_index() {
        let el = Block::new("el", 10, BlockShape::OffDiagonal { rows: 3, cols: 3 });
        let expected = [(0, 1), (0, 2), (1, 0), (1, 2), (2, 0), (2, 1)];
        for (k, &(i, j)) in expected.iter().enumerate() {
            assert_eq!(el.index(i, j), Some(10 + k));
        }
        assert_eq!(el.index(1, 1), None);
    }

    #[test]
    fn test_normalization_terms() {
        let t = Layout::new(ErrorTermType::T8, 2, 2).unwrap();
        assert_eq!(t.normalization_terms(), vec![6]);
        let ue14 = Layout::new(ErrorTermType::UE14, 2, 2).unwrap();
        // Column 0: um14[0] at 0; column 1 starts at 6: um14[1] at 7.
        assert_eq!(ue14.normalization_terms(), vec![0, 7]);
    }

    #[test]
    fn test_type_names() {
        for ty in ErrorTermType::ALL {
            assert_eq!(ty.name().to_lowercase().parse::<ErrorTermType>().unwrap(), ty);
        }
        assert!("T9".parse::<ErrorTermType>().is_err());
    }
}
