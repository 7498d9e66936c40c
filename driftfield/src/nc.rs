//! A [`Source`] reading NetCDF files from the local filesystem.
//!
//! libnetcdf calls block, so every access to an open file runs on tokio's blocking thread pool.
//!
use std::path::PathBuf;

use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};
use tokio::task;

use crate::{
    errors::{Error, Result},
    source::{Source, SourceFile, TimeCoordinate, VariableShape},
};

/// Names commonly given to the time coordinate by ocean models
const TIME_NAMES: [&str; 4] = ["time", "ocean_time", "time_counter", "scrum_time"];

/// Values larger than this in magnitude are fill values
const FILL_THRESHOLD: f64 = 1e30;

/// Opens NetCDF files by path, optionally relative to a root directory.
///
pub struct NetcdfSource {
    root: Option<PathBuf>,
}

impl NetcdfSource {
    pub fn new() -> Self {
        Self { root: None }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

impl Default for NetcdfSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Source for NetcdfSource {
    async fn open(&self, location: &str) -> Result<Box<dyn SourceFile>> {
        let path = match &self.root {
            Some(root) => root.join(location),
            None => PathBuf::from(location),
        };
        let opened = task::spawn_blocking(move || netcdf::open(path))
            .await
            .map_err(|err| Error::Source {
                location: location.to_string(),
                message: err.to_string(),
            })?;
        let file = opened.map_err(|err| source_error(location, err))?;
        tracing::debug!(location, "opened netcdf file");

        Ok(Box::new(NetcdfFile {
            location: location.to_string(),
            file: Some(file),
        }))
    }
}

struct NetcdfFile {
    location: String,

    /// Lent out to the blocking pool for the length of each call
    file: Option<netcdf::File>,
}

impl NetcdfFile {
    /// Run `call` against the file on the blocking thread pool.
    async fn blocking<T, F>(&mut self, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&netcdf::File, &str) -> Result<T> + Send + 'static,
    {
        let file = self.file.take().ok_or_else(|| Error::Source {
            location: self.location.clone(),
            message: String::from("file has been closed"),
        })?;
        let location = self.location.clone();

        let (file, result) = task::spawn_blocking(move || {
            let result = call(&file, &location);
            (file, result)
        })
        .await
        .map_err(|err| Error::Source {
            location: self.location.clone(),
            message: err.to_string(),
        })?;
        self.file = Some(file);

        result
    }
}

#[async_trait]
impl SourceFile for NetcdfFile {
    fn location(&self) -> &str {
        &self.location
    }

    async fn time(&mut self) -> Result<TimeCoordinate> {
        self.blocking(|file, location| {
            let variable = time_variable(file, location)?;
            let values = variable
                .get_values::<f64, _>(..)
                .map_err(|err| source_error(location, err))?;

            Ok(TimeCoordinate {
                values,
                units: text(&variable, "units"),
            })
        })
        .await
    }

    async fn shape(&mut self, name: &str) -> Result<VariableShape> {
        let name = name.to_string();
        self.blocking(move |file, location| {
            let variable = find(file, location, &name)?;
            let dims = variable.dimensions();

            Ok(VariableShape {
                dims: dims.iter().map(|dim| dim.len()).collect(),
                unlimited: dims.first().map(|dim| dim.is_unlimited()).unwrap_or(false),
            })
        })
        .await
    }

    async fn read(
        &mut self,
        name: &str,
        origin: &[usize],
        count: &[usize],
    ) -> Result<ArrayD<f64>> {
        let name = name.to_string();
        let origin = origin.to_vec();
        let count = count.to_vec();
        self.blocking(move |file, location| read_slab(file, location, &name, &origin, &count))
            .await
    }

    async fn close(self: Box<Self>) -> Result<()> {
        tracing::debug!(location = %self.location, "closing netcdf file");
        if let Some(file) = self.file {
            task::spawn_blocking(move || drop(file))
                .await
                .map_err(|err| Error::Source {
                    location: self.location.clone(),
                    message: err.to_string(),
                })?;
        }

        Ok(())
    }
}

/// Look a variable up by name, then by standard name or long name.
fn find<'f>(file: &'f netcdf::File, location: &str, name: &str) -> Result<netcdf::Variable<'f>> {
    if let Some(variable) = file.variable(name) {
        return Ok(variable);
    }

    file.variables()
        .find(|variable| {
            ["standard_name", "long_name"].iter().any(|attribute| {
                text(variable, attribute)
                    .map(|value| value.eq_ignore_ascii_case(name))
                    .unwrap_or(false)
            })
        })
        .ok_or_else(|| Error::BadName {
            location: location.to_string(),
            variable: name.to_string(),
        })
}

/// The variable named after the unlimited dimension, a variable with one of the usual time
/// coordinate names, or failing both the first one dimensional variable along the unlimited
/// dimension.
fn time_variable<'f>(file: &'f netcdf::File, location: &str) -> Result<netcdf::Variable<'f>> {
    let record = file.dimensions().find(|dim| dim.is_unlimited());
    if let Some(variable) = record.as_ref().and_then(|dim| file.variable(&dim.name())) {
        return Ok(variable);
    }
    if let Some(variable) = TIME_NAMES.iter().find_map(|name| file.variable(name)) {
        return Ok(variable);
    }

    file.variables()
        .find(|variable| {
            let dims = variable.dimensions();
            dims.len() == 1 && dims[0].is_unlimited()
        })
        .ok_or_else(|| Error::BadName {
            location: location.to_string(),
            variable: String::from("time"),
        })
}

fn read_slab(
    file: &netcdf::File,
    location: &str,
    name: &str,
    origin: &[usize],
    count: &[usize],
) -> Result<ArrayD<f64>> {
    let variable = find(file, location, name)?;
    let range = |axis: usize| origin[axis]..origin[axis] + count[axis];
    let raw = match origin.len() {
        2 => variable.get_values::<f64, _>((range(0), range(1))),
        3 => variable.get_values::<f64, _>((range(0), range(1), range(2))),
        4 => variable.get_values::<f64, _>((range(0), range(1), range(2), range(3))),
        rank => {
            return Err(Error::Source {
                location: location.to_string(),
                message: format!("{name}: can't read a rank {rank} hyperslab"),
            })
        }
    }
    .map_err(|err| source_error(location, err))?;

    let fill = number(&variable, "_FillValue");
    let scale = number(&variable, "scale_factor").unwrap_or(1.0);
    let offset = number(&variable, "add_offset").unwrap_or(0.0);
    let values = raw
        .into_iter()
        .map(|value| {
            if Some(value) == fill || value.is_nan() || value.abs() > FILL_THRESHOLD {
                f64::NAN
            } else {
                value * scale + offset
            }
        })
        .collect();

    ArrayD::from_shape_vec(IxDyn(count), values).map_err(|err| Error::Source {
        location: location.to_string(),
        message: format!("{name}: {err}"),
    })
}

fn source_error(location: &str, err: netcdf::Error) -> Error {
    Error::Source {
        location: location.to_string(),
        message: err.to_string(),
    }
}

fn text(variable: &netcdf::Variable, name: &str) -> Option<String> {
    match variable.attribute(name)?.value().ok()? {
        netcdf::AttributeValue::Str(text) => Some(text),
        _ => None,
    }
}

fn number(variable: &netcdf::Variable, name: &str) -> Option<f64> {
    match variable.attribute(name)?.value().ok()? {
        netcdf::AttributeValue::Double(value) => Some(value),
        netcdf::AttributeValue::Float(value) => Some(value as f64),
        netcdf::AttributeValue::Int(value) => Some(value as f64),
        netcdf::AttributeValue::Short(value) => Some(value as f64),
        _ => None,
    }
}
