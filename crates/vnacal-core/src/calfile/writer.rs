//! Calibration file writer (version 1.0).

use num_complex::Complex64;
use serde_yaml::{Mapping, Number, Value};

use super::{complex_to_value, FORMAT_VERSION, MAGIC};
use crate::calibration::Calibration;
use crate::error::Result;
use crate::layout::{Block, BlockShape, E12Column, Model, Ue14Column};
use crate::properties::Properties;

fn key(k: &str) -> Value {
    Value::String(k.to_string())
}

fn list(values: impl IntoIterator<Item = Complex64>) -> Value {
    Value::Sequence(values.into_iter().map(complex_to_value).collect())
}

/// rows×cols matrix; structurally zero cells are `null`.
fn matrix(rows: usize, cols: usize, cell: impl Fn(usize, usize) -> Option<Complex64>) -> Value {
    Value::Sequence(
        (0..rows)
            .map(|i| {
                Value::Sequence(
                    (0..cols)
                        .map(|j| cell(i, j).map_or(Value::Null, complex_to_value))
                        .collect(),
                )
            })
            .collect(),
    )
}

fn encode_block(block: &Block, e: &[Complex64]) -> Value {
    match block.shape {
        BlockShape::Diagonal { .. } | BlockShape::Vector { .. } => list(e[block.range()].iter().copied()),
        BlockShape::Scalar => complex_to_value(block.scalar(e)),
        BlockShape::Full { rows, cols } | BlockShape::OffDiagonal { rows, cols } => {
            matrix(rows, cols, |i, j| block.index(i, j).map(|k| e[k]))
        }
    }
}

/// Error terms of one frequency, keyed by block name.
fn encode_terms(calibration: &Calibration, e: &[Complex64], entry: &mut Mapping) {
    let layout = calibration.layout();
    let (rows, cols) = (layout.rows(), layout.columns());
    match layout.model() {
        Model::T { .. } | Model::U { .. } => {
            for block in layout.blocks() {
                entry.insert(key(block.name), encode_block(&block, e));
            }
        }
        Model::Ue14 { columns, el } => {
            let vector = |pick: fn(&Ue14Column) -> Block| {
                matrix(rows, cols, |i, j| pick(&columns[j]).index(i, 0).map(|k| e[k]))
            };
            entry.insert(key("um"), vector(|c| c.um));
            entry.insert(key("ui"), list(columns.iter().map(|c| c.ui.scalar(e))));
            entry.insert(key("ux"), vector(|c| c.ux));
            entry.insert(key("us"), list(columns.iter().map(|c| c.us.scalar(e))));
            entry.insert(key("el"), encode_block(el, e));
        }
        Model::E12 { columns } => {
            let vector = |pick: fn(&E12Column) -> Block| {
                matrix(rows, cols, |i, j| pick(&columns[j]).index(i, 0).map(|k| e[k]))
            };
            entry.insert(key("el"), vector(|c| c.el));
            entry.insert(key("er"), vector(|c| c.er));
            entry.insert(key("em"), vector(|c| c.em));
        }
    }
}

fn encode_calibration(calibration: &Calibration) -> Value {
    let mut map = Mapping::new();
    map.insert(key("name"), key(calibration.name()));
    map.insert(key("type"), key(calibration.error_term_type().name()));
    map.insert(key("rows"), Value::Number(Number::from(calibration.rows() as u64)));
    map.insert(key("columns"), Value::Number(Number::from(calibration.columns() as u64)));
    map.insert(
        key("frequencies"),
        Value::Number(Number::from(calibration.frequencies().len() as u64)),
    );
    map.insert(key("z0"), Value::Number(Number::from(calibration.z0())));
    if !calibration.properties().is_empty() {
        map.insert(key("properties"), calibration.properties().to_yaml());
    }
    let data = calibration
        .frequencies()
        .iter()
        .enumerate()
        .map(|(findex, &f)| {
            let mut entry = Mapping::new();
            entry.insert(key("f"), Value::Number(Number::from(f)));
            let e = calibration.terms_at(findex).to_vec();
            encode_terms(calibration, &e, &mut entry);
            Value::Mapping(entry)
        })
        .collect();
    map.insert(key("data"), Value::Sequence(data));
    Value::Mapping(map)
}

/// Serialize a calibration file.
pub(crate) fn write(properties: &Properties, calibrations: &[Calibration]) -> Result<String> {
    let mut root = Mapping::new();
    if !properties.is_empty() {
        root.insert(key("properties"), properties.to_yaml());
    }
    root.insert(
        key("calibrations"),
        Value::Sequence(calibrations.iter().map(encode_calibration).collect()),
    );
    let body = serde_yaml::to_string(&Value::Mapping(root))?;
    Ok(format!("{MAGIC} {FORMAT_VERSION}\n{body}"))
}
