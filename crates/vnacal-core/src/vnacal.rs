//! Calibration container
//!
//! A [`VnaCal`] holds named calibrations plus global properties and reads or
//! writes them as one calibration file.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::calfile::{reader, writer};
use crate::calibration::Calibration;
use crate::error::{report, Error, ErrorHandler, Result};
use crate::properties::Properties;

/// Named calibrations stored together in one file.
#[derive(Default)]
pub struct VnaCal {
    calibrations: Vec<Calibration>,
    properties: Properties,
    error_handler: Option<ErrorHandler>,
}

impl std::fmt::Debug for VnaCal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VnaCal")
            .field("calibrations", &self.names())
            .field("properties", &self.properties)
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

impl VnaCal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a callback that sees every error returned from this container.
    pub fn set_error_handler(&mut self, handler: ErrorHandler) {
        self.error_handler = Some(handler);
    }

    fn check<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|err| report(self.error_handler.as_ref(), err))
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    pub fn len(&self) -> usize {
        self.calibrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calibrations.is_empty()
    }

    /// Store `calibration` under `name`, replacing any calibration already
    /// using that name. Returns its index.
    pub fn add_calibration(&mut self, name: &str, mut calibration: Calibration) -> Result<usize> {
        if name.is_empty() {
            return self.check(Err(Error::usage("calibration name must not be empty")));
        }
        calibration.set_name(name);
        match self.find_calibration(name) {
            Some(index) => {
                self.calibrations[index] = calibration;
                Ok(index)
            }
            None => {
                self.calibrations.push(calibration);
                Ok(self.calibrations.len() - 1)
            }
        }
    }

    /// Index of the calibration named `name`.
    pub fn find_calibration(&self, name: &str) -> Option<usize> {
        self.calibrations.iter().position(|c| c.name() == name)
    }

    pub fn calibration(&self, index: usize) -> Result<&Calibration> {
        let result = self
            .calibrations
            .get(index)
            .ok_or_else(|| Error::usage(format!("no calibration at index {index}")));
        self.check(result)
    }

    pub fn calibration_mut(&mut self, index: usize) -> Result<&mut Calibration> {
        let handler = self.error_handler.clone();
        self.calibrations
            .get_mut(index)
            .ok_or_else(|| report(handler.as_ref(), Error::usage(format!("no calibration at index {index}"))))
    }

    /// Remove and return the calibration at `index`.
    pub fn delete_calibration(&mut self, index: usize) -> Result<Calibration> {
        if index >= self.calibrations.len() {
            return self.check(Err(Error::usage(format!("no calibration at index {index}"))));
        }
        Ok(self.calibrations.remove(index))
    }

    pub fn names(&self) -> Vec<&str> {
        self.calibrations.iter().map(Calibration::name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Calibration> {
        self.calibrations.iter()
    }

    /// Serialize every calibration in the current file format.
    pub fn to_yaml_string(&self) -> Result<String> {
        self.check(writer::write(&self.properties, &self.calibrations))
    }

    /// Parse a calibration file held in memory.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let contents = reader::read(content)?;
        Ok(Self {
            calibrations: contents.calibrations,
            properties: contents.properties,
            error_handler: None,
        })
    }

    /// Write all calibrations to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let text = self.to_yaml_string()?;
        self.check(fs::write(path, text).map_err(Error::from))?;
        info!(path = %path.display(), calibrations = self.len(), "saved calibration file");
        Ok(())
    }

    /// Read calibrations from `path`, keeping this container's error handler.
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let loaded = fs::read_to_string(path)
            .map_err(Error::from)
            .and_then(|text| Self::from_yaml_str(&text));
        let loaded = self.check(loaded)?;
        self.calibrations = loaded.calibrations;
        self.properties = loaded.properties;
        info!(path = %path.display(), calibrations = self.len(), "loaded calibration file");
        Ok(())
    }

    /// Open the calibration file at `path`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut vnacal = Self::new();
        vnacal.load(path)?;
        Ok(vnacal)
    }
}
