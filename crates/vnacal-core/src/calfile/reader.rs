//! Calibration file reader
//!
//! Reads version 1.0 files and the legacy E12-only layouts. Any block whose
//! shape disagrees with the layout of the declared type is a syntax error.

use ndarray::{Array2, ArrayView1};
use num_complex::Complex64;
use serde_yaml::Value;

use super::{value_to_complex, FileVersion};
use crate::calibration::Calibration;
use crate::constants::DEFAULT_Z0;
use crate::error::{Error, Result};
use crate::layout::{Block, BlockShape, ErrorTermType, Layout, Model};
use crate::properties::Properties;

/// Global properties and calibrations of a file.
#[derive(Debug)]
pub(crate) struct FileContents {
    pub properties: Properties,
    pub calibrations: Vec<Calibration>,
}

fn field<'a>(map: &'a Value, name: &str, what: &str) -> Result<&'a Value> {
    map.get(name)
        .ok_or_else(|| Error::syntax(format!("{what}: missing \"{name}\"")))
}

fn usize_field(map: &Value, name: &str, what: &str) -> Result<usize> {
    field(map, name, what)?
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| Error::syntax(format!("{what}: \"{name}\" must be a non-negative integer")))
}

fn f64_field(map: &Value, name: &str, what: &str) -> Result<f64> {
    field(map, name, what)?
        .as_f64()
        .ok_or_else(|| Error::syntax(format!("{what}: \"{name}\" must be a number")))
}

fn sequence<'a>(value: &'a Value, len: usize, what: &str) -> Result<&'a [Value]> {
    match value.as_sequence() {
        Some(seq) if seq.len() == len => Ok(seq),
        Some(seq) => Err(Error::syntax(format!(
            "{what}: expected {len} elements, found {}",
            seq.len()
        ))),
        None => Err(Error::syntax(format!("{what}: expected a list"))),
    }
}

/// rows×cols matrix of optional complex values (`null` → `None`).
fn matrix(value: &Value, rows: usize, cols: usize, what: &str) -> Result<Vec<Vec<Option<Complex64>>>> {
    sequence(value, rows, what)?
        .iter()
        .enumerate()
        .map(|(i, row)| {
            sequence(row, cols, &format!("{what} row {i}"))?
                .iter()
                .enumerate()
                .map(|(j, cell)| match cell {
                    Value::Null => Ok(None),
                    cell => value_to_complex(cell, &format!("{what}[{i}][{j}]")).map(Some),
                })
                .collect()
        })
        .collect()
}

fn list(value: &Value, len: usize, what: &str) -> Result<Vec<Complex64>> {
    sequence(value, len, what)?
        .iter()
        .enumerate()
        .map(|(k, v)| value_to_complex(v, &format!("{what}[{k}]")))
        .collect()
}

/// Store `value` in cell (i, j) of `block`; null must match the block's
/// structural zeros exactly.
fn put(block: &Block, e: &mut [Complex64], i: usize, j: usize, value: Option<Complex64>, what: &str) -> Result<()> {
    match (block.index(i, j), value) {
        (Some(k), Some(v)) => {
            e[k] = v;
            Ok(())
        }
        (None, None) => Ok(()),
        (Some(_), None) => Err(Error::syntax(format!("{what}[{i}][{j}] must not be null"))),
        (None, Some(_)) => Err(Error::syntax(format!("{what}[{i}][{j}] must be null"))),
    }
}

fn decode_block(block: &Block, value: &Value, e: &mut [Complex64], what: &str) -> Result<()> {
    match block.shape {
        BlockShape::Diagonal { .. } | BlockShape::Vector { .. } => {
            let values = list(value, block.len(), what)?;
            e[block.range()].copy_from_slice(&values);
        }
        BlockShape::Scalar => e[block.offset] = value_to_complex(value, what)?,
        BlockShape::Full { rows, cols } | BlockShape::OffDiagonal { rows, cols } => {
            for (i, row) in matrix(value, rows, cols, what)?.into_iter().enumerate() {
                for (j, cell) in row.into_iter().enumerate() {
                    put(block, e, i, j, cell, what)?;
                }
            }
        }
    }
    Ok(())
}

/// Column vectors stored as a rows×columns matrix: column j is vector j.
fn decode_columns(blocks: &[Block], value: &Value, rows: usize, e: &mut [Complex64], what: &str) -> Result<()> {
    for (i, row) in matrix(value, rows, blocks.len(), what)?.into_iter().enumerate() {
        for (j, cell) in row.into_iter().enumerate() {
            put(&blocks[j], e, i, 0, cell, what)?;
        }
    }
    Ok(())
}

/// Error terms of one frequency entry, for any layout.
fn decode_terms(layout: &Layout, entry: &Value, what: &str) -> Result<Vec<Complex64>> {
    let mut e = vec![Complex64::new(0.0, 0.0); layout.total_terms()];
    let rows = layout.rows();
    let block_field = |name: &str| field(entry, name, what);
    match layout.model() {
        Model::T { .. } | Model::U { .. } => {
            for block in layout.blocks() {
                decode_block(&block, block_field(block.name)?, &mut e, &format!("{what} {}", block.name))?;
            }
        }
        Model::Ue14 { columns, el } => {
            let um: Vec<Block> = columns.iter().map(|c| c.um).collect();
            let ux: Vec<Block> = columns.iter().map(|c| c.ux).collect();
            decode_columns(&um, block_field("um")?, rows, &mut e, &format!("{what} um"))?;
            decode_columns(&ux, block_field("ux")?, rows, &mut e, &format!("{what} ux"))?;
            let ui = list(block_field("ui")?, columns.len(), &format!("{what} ui"))?;
            let us = list(block_field("us")?, columns.len(), &format!("{what} us"))?;
            for (col, (ui, us)) in columns.iter().zip(ui.into_iter().zip(us)) {
                e[col.ui.offset] = ui;
                e[col.us.offset] = us;
            }
            decode_block(el, block_field("el")?, &mut e, &format!("{what} el"))?;
        }
        Model::E12 { columns } => {
            let el: Vec<Block> = columns.iter().map(|c| c.el).collect();
            let er: Vec<Block> = columns.iter().map(|c| c.er).collect();
            let em: Vec<Block> = columns.iter().map(|c| c.em).collect();
            decode_columns(&el, block_field("el")?, rows, &mut e, &format!("{what} el"))?;
            decode_columns(&er, block_field("er")?, rows, &mut e, &format!("{what} er"))?;
            decode_columns(&em, block_field("em")?, rows, &mut e, &format!("{what} em"))?;
        }
    }
    Ok(e)
}

/// E12 terms from a rows×columns grid of `[el, er, em]` triples.
fn decode_triples(layout: &Layout, value: &Value, what: &str) -> Result<Vec<Complex64>> {
    let Model::E12 { columns } = layout.model() else {
        return Err(Error::syntax(format!("{what}: triples only describe E12 terms")));
    };
    let mut e = vec![Complex64::new(0.0, 0.0); layout.total_terms()];
    let grid = sequence(value, layout.rows(), what)?;
    for (i, row) in grid.iter().enumerate() {
        for (j, cell) in sequence(row, columns.len(), what)?.iter().enumerate() {
            let triple = list(cell, 3, &format!("{what}[{i}][{j}]"))?;
            let col = &columns[j];
            for (block, v) in [col.el, col.er, col.em].iter().zip(triple) {
                put(block, &mut e, i, 0, Some(v), what)?;
            }
        }
    }
    Ok(e)
}

fn decode_calibration(value: &Value, index: usize, version: FileVersion) -> Result<Calibration> {
    let what = format!("calibration {index}");
    let name = match value.get("name") {
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(Error::syntax(format!("{what}: name must be a string"))),
        None => String::new(),
    };
    let ty = match version {
        FileVersion::V1 => field(value, "type", &what)?
            .as_str()
            .ok_or_else(|| Error::syntax(format!("{what}: type must be a string")))?
            .parse::<ErrorTermType>()
            .map_err(|e| Error::syntax(format!("{what}: {e}")))?,
        FileVersion::Legacy | FileVersion::V0_2 => ErrorTermType::E12,
    };
    let rows = usize_field(value, "rows", &what)?;
    let columns = usize_field(value, "columns", &what)?;
    let layout = Layout::new(ty, rows, columns).map_err(|e| Error::syntax(format!("{what}: {e}")))?;
    let z0 = match value.get("z0") {
        Some(_) => f64_field(value, "z0", &what)?,
        None => DEFAULT_Z0,
    };

    let data = field(value, "data", &what)?;
    let nfreq = match value.get("frequencies") {
        Some(_) => usize_field(value, "frequencies", &what)?,
        None => data.as_sequence().map_or(0, Vec::len),
    };
    let entries = sequence(data, nfreq, &format!("{what} data"))?;
    let mut frequencies = Vec::with_capacity(nfreq);
    let mut terms = Array2::<Complex64>::zeros((nfreq, layout.total_terms()));
    for (findex, entry) in entries.iter().enumerate() {
        let what = format!("{what} frequency {findex}");
        frequencies.push(f64_field(entry, "f", &what)?);
        let e = match version {
            FileVersion::V0_2 => decode_triples(&layout, field(entry, "terms", &what)?, &what)?,
            _ => decode_terms(&layout, entry, &what)?,
        };
        terms.row_mut(findex).assign(&ArrayView1::from(e.as_slice()));
    }

    let mut calibration = Calibration::new(name, ty, rows, columns, frequencies, terms, z0)
        .map_err(|e| Error::syntax(format!("{what}: {e}")))?;
    if let Some(props) = value.get("properties") {
        *calibration.properties_mut() = Properties::from_yaml(props)?;
    }
    Ok(calibration)
}

/// Parse a calibration file.
pub(crate) fn read(content: &str) -> Result<FileContents> {
    let version = FileVersion::from_header(content)?;
    let doc: Value = serde_yaml::from_str(content)?;
    let list_key = match version {
        FileVersion::V1 | FileVersion::V0_2 => "calibrations",
        FileVersion::Legacy => "sets",
    };
    let properties = match doc.get("properties") {
        Some(props) => Properties::from_yaml(props)?,
        None => Properties::new(),
    };
    let calibrations = match doc.get(list_key) {
        Some(Value::Sequence(seq)) => seq
            .iter()
            .enumerate()
            .map(|(k, v)| decode_calibration(v, k, version))
            .collect::<Result<Vec<_>>>()?,
        Some(Value::Null) | None => Vec::new(),
        Some(_) => return Err(Error::syntax(format!("\"{list_key}\" must be a list"))),
    };
    Ok(FileContents {
        properties,
        calibrations,
    })
}
