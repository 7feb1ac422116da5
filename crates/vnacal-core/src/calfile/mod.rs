//! Calibration file format
//!
//! A calibration file is a YAML document preceded by a `#VNACAL <version>`
//! line. Version 1.0 stores any error-term type; the older 2.x/3.x and 0.2
//! layouts only ever held E12 terms and are read but never written.
//!
//! ```text
//! #VNACAL 1.0
//! properties: {...}
//! calibrations:
//!   - name: thru-reflect
//!     type: TE10
//!     rows: 2
//!     columns: 2
//!     frequencies: 2
//!     z0: 50
//!     data:
//!       - f: 1000000000
//!         ts: [1+0j, 1+0j]
//!         ...
//!         el: [[null, 1e-3+0j], [2e-3-1e-4j, null]]
//! ```
//!
//! Complex numbers are strings `<re>+<im>j` printed with the shortest
//! representation that reads back exactly; plain numbers are accepted as
//! real values.

pub(crate) mod reader;
pub(crate) mod writer;

use num_complex::Complex64;
use serde_yaml::Value;

use crate::error::{Error, Result};

/// Version written by this library.
pub const FORMAT_VERSION: &str = "1.0";

pub(crate) const MAGIC: &str = "#VNACAL";

/// Format a complex number as `<re>+<im>j`.
pub fn format_complex(z: Complex64) -> String {
    if z.im.is_sign_negative() {
        format!("{}-{}j", z.re, -z.im)
    } else {
        format!("{}+{}j", z.re, z.im)
    }
}

/// Parse `<re>`, `<im>j` or `<re>±<im>j`.
pub fn parse_complex(text: &str) -> Option<Complex64> {
    let t = text.trim();
    let Some(body) = t.strip_suffix('j').or_else(|| t.strip_suffix('i')) else {
        return t.parse::<f64>().ok().map(|re| Complex64::new(re, 0.0));
    };
    // Split at the last sign that is not leading and not part of an exponent.
    let bytes = body.as_bytes();
    let split = (1..bytes.len())
        .rev()
        .find(|&k| matches!(bytes[k], b'+' | b'-') && !matches!(bytes[k - 1], b'e' | b'E'));
    match split {
        Some(k) => {
            let re = body[..k].trim().parse::<f64>().ok()?;
            let im = match body[k..].trim() {
                "+" => 1.0,
                "-" => -1.0,
                s => s.parse::<f64>().ok()?,
            };
            Some(Complex64::new(re, im))
        }
        None => {
            let im = match body.trim() {
                "" | "+" => 1.0,
                "-" => -1.0,
                s => s.parse::<f64>().ok()?,
            };
            Some(Complex64::new(0.0, im))
        }
    }
}

pub(crate) fn complex_to_value(z: Complex64) -> Value {
    Value::String(format_complex(z))
}

pub(crate) fn value_to_complex(value: &Value, what: &str) -> Result<Complex64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64().map(|re| Complex64::new(re, 0.0)),
        Value::String(s) => parse_complex(s),
        _ => None,
    };
    parsed.ok_or_else(|| Error::syntax(format!("{what}: expected a complex number, got {value:?}")))
}

/// Calibration file layouts this library understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileVersion {
    /// 1.0: any error-term type.
    V1,
    /// 2.x and 3.x: `sets` of E12 matrices.
    Legacy,
    /// 0.2: `calibrations` of per-cell E12 triples.
    V0_2,
}

impl FileVersion {
    /// Read the `#VNACAL <version>` header line.
    pub(crate) fn from_header(content: &str) -> Result<Self> {
        let first = content.lines().next().unwrap_or_default().trim();
        let version = first
            .strip_prefix(MAGIC)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::syntax(format!("missing {MAGIC} header line")))?;
        let mut parts = version.split('.');
        let major = parts.next().and_then(|s| s.parse::<u32>().ok());
        let minor = parts.next().and_then(|s| s.parse::<u32>().ok());
        match (major, minor) {
            (Some(1), Some(0)) | (Some(1), None) => Ok(FileVersion::V1),
            (Some(2 | 3), _) => Ok(FileVersion::Legacy),
            (Some(0), Some(2)) => Ok(FileVersion::V0_2),
            _ => Err(Error::Version(version.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn test_complex_text_round_trip() {
        for z in [
            Complex64::new(0.1, -0.2),
            Complex64::new(-1.0, 0.0),
            Complex64::new(1.234567890123e-9, 5.5e12),
            Complex64::new(0.0, -0.0),
            Complex64::new(std::f64::consts::PI, std::f64::consts::E),
        ] {
            let text = format_complex(z);
            assert_eq!(parse_complex(&text), Some(z), "{text}");
        }
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(parse_complex("2.5"), Some(Complex64::new(2.5, 0.0)));
        assert_eq!(parse_complex("-3j"), Some(Complex64::new(0.0, -3.0)));
        assert_eq!(parse_complex("1e-3-2e-4j"), Some(Complex64::new(1e-3, -2e-4)));
        assert_eq!(parse_complex(" 1+j "), Some(Complex64::new(1.0, 1.0)));
        assert_eq!(parse_complex("x+1j"), None);
        assert_eq!(parse_complex(""), None);
    }

    #[test]
    fn test_numbers_are_real() {
        let v: Value = serde_yaml::from_str("0.25").unwrap();
        assert_eq!(value_to_complex(&v, "x").unwrap(), Complex64::new(0.25, 0.0));
        let v: Value = serde_yaml::from_str("[1]").unwrap();
        assert!(value_to_complex(&v, "x").is_err());
    }

    #[test]
    fn test_header_versions() {
        assert_eq!(FileVersion::from_header("#VNACAL 1.0\n").unwrap(), FileVersion::V1);
        assert_eq!(FileVersion::from_header("#VNACAL 2.1\n").unwrap(), FileVersion::Legacy);
        assert_eq!(FileVersion::from_header("#VNACAL 3.0").unwrap(), FileVersion::Legacy);
        assert_eq!(FileVersion::from_header("#VNACAL 0.2\n").unwrap(), FileVersion::V0_2);
        let err = FileVersion::from_header("#VNACAL 9.0\n").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Version);
        let err = FileVersion::from_header("calibrations: []\n").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Syntax);
    }
}
