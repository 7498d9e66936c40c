use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use ndarray::{Array3, Array4, ArrayD, Slice};
use parking_lot::Mutex;

use crate::{
    errors::{Error, Result},
    source::{Source, SourceFile, TimeCoordinate, VariableShape},
};

/// A test implementation of Source that keeps its files in RAM and keeps track of how it's used
///
pub(crate) struct MemorySource {
    files: HashMap<String, Arc<MemoryFile>>,
    usage: Arc<Mutex<Usage>>,
}

pub(crate) struct MemoryFile {
    times: Vec<f64>,
    units: Option<String>,
    variables: HashMap<String, (ArrayD<f64>, bool)>,
}

#[derive(Default)]
struct Usage {
    opens: HashMap<String, usize>,
    closes: HashMap<String, usize>,
    reads: HashMap<(String, String), Vec<Vec<usize>>>,
    failing: HashSet<(String, String)>,
    open_limits: HashMap<String, usize>,
}

struct MemoryHandle {
    location: String,
    file: Arc<MemoryFile>,
    usage: Arc<Mutex<Usage>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
            usage: Arc::new(Mutex::new(Usage::default())),
        }
    }

    pub fn with_file(mut self, location: &str, file: MemoryFile) -> Self {
        self.files.insert(location.to_string(), Arc::new(file));
        self
    }

    /// Make every read of `variable` in `location` fail from now on
    pub fn fail_reads(&self, location: &str, variable: &str) {
        self.usage
            .lock()
            .failing
            .insert((location.to_string(), variable.to_string()));
    }

    /// Let `location` be opened at most `limit` times, failing every open after that
    pub fn limit_opens(&self, location: &str, limit: usize) {
        self.usage
            .lock()
            .open_limits
            .insert(location.to_string(), limit);
    }

    /// Number of reads of `variable` in `location`, failed ones included
    pub fn reads(&self, location: &str, variable: &str) -> usize {
        self.read_origins(location, variable).len()
    }

    /// Disk order origin of every read of `variable` in `location`
    pub fn read_origins(&self, location: &str, variable: &str) -> Vec<Vec<usize>> {
        self.usage
            .lock()
            .reads
            .get(&(location.to_string(), variable.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn opens(&self, location: &str) -> usize {
        self.usage.lock().opens.get(location).copied().unwrap_or(0)
    }

    pub fn closes(&self, location: &str) -> usize {
        self.usage.lock().closes.get(location).copied().unwrap_or(0)
    }

    pub fn open_handles(&self, location: &str) -> usize {
        self.opens(location) - self.closes(location)
    }
}

#[async_trait]
impl Source for MemorySource {
    async fn open(&self, location: &str) -> Result<Box<dyn SourceFile>> {
        let file = self.files.get(location).ok_or_else(|| Error::Source {
            location: location.to_string(),
            message: String::from("no such file"),
        })?;
        {
            let mut usage = self.usage.lock();
            let opens = usage.opens.get(location).copied().unwrap_or(0);
            if usage.open_limits.get(location).map_or(false, |&limit| opens >= limit) {
                return Err(Error::Source {
                    location: location.to_string(),
                    message: String::from("too many open files"),
                });
            }
            *usage.opens.entry(location.to_string()).or_default() += 1;
        }

        Ok(Box::new(MemoryHandle {
            location: location.to_string(),
            file: Arc::clone(file),
            usage: Arc::clone(&self.usage),
        }))
    }
}

impl MemoryFile {
    pub fn new(times: Vec<f64>, units: Option<&str>) -> Self {
        Self {
            times,
            units: units.map(String::from),
            variables: HashMap::new(),
        }
    }

    /// Add a variable. `unlimited` marks the leading axis as the record axis.
    pub fn with_variable(mut self, name: &str, data: ArrayD<f64>, unlimited: bool) -> Self {
        self.variables.insert(name.to_string(), (data, unlimited));
        self
    }
}

#[async_trait]
impl SourceFile for MemoryHandle {
    fn location(&self) -> &str {
        &self.location
    }

    async fn time(&mut self) -> Result<TimeCoordinate> {
        Ok(TimeCoordinate {
            values: self.file.times.clone(),
            units: self.file.units.clone(),
        })
    }

    async fn shape(&mut self, variable: &str) -> Result<VariableShape> {
        let (data, unlimited) = self.variable(variable)?;

        Ok(VariableShape {
            dims: data.shape().to_vec(),
            unlimited: *unlimited,
        })
    }

    async fn read(
        &mut self,
        variable: &str,
        origin: &[usize],
        count: &[usize],
    ) -> Result<ArrayD<f64>> {
        let failing = {
            let mut usage = self.usage.lock();
            let key = (self.location.clone(), variable.to_string());
            usage.reads.entry(key.clone()).or_default().push(origin.to_vec());
            usage.failing.contains(&key)
        };
        if failing {
            return Err(Error::Source {
                location: self.location.clone(),
                message: format!("failed to read {variable}"),
            });
        }

        let (data, _) = self.variable(variable)?;
        let in_bounds = origin.len() == data.ndim()
            && count.len() == data.ndim()
            && (0..data.ndim()).all(|axis| origin[axis] + count[axis] <= data.shape()[axis]);
        if !in_bounds {
            return Err(Error::Source {
                location: self.location.clone(),
                message: format!("hyperslab {origin:?} + {count:?} out of bounds"),
            });
        }

        let slab = data.slice_each_axis(|description| {
            let axis = description.axis.index();
            Slice::from(origin[axis]..origin[axis] + count[axis])
        });

        Ok(slab.to_owned())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        *self
            .usage
            .lock()
            .closes
            .entry(self.location.clone())
            .or_default() += 1;

        Ok(())
    }
}

impl MemoryHandle {
    fn variable(&self, name: &str) -> Result<&(ArrayD<f64>, bool)> {
        self.file.variables.get(name).ok_or_else(|| Error::BadName {
            location: self.location.clone(),
            variable: name.to_string(),
        })
    }
}

/// A `(time, depth, y, x)` array with `ntime` records over an `[nx, ny, nz]` grid, filled by
/// calling `value(t, i, j, k)`.
pub(crate) fn volume_series<F>(ntime: usize, shape: [usize; 3], value: F) -> ArrayD<f64>
where
    F: Fn(usize, usize, usize, usize) -> f64,
{
    let [nx, ny, nz] = shape;
    Array4::from_shape_fn((ntime, nz, ny, nx), |(t, k, j, i)| value(t, i, j, k)).into_dyn()
}

/// A `(time, y, x)` array with `ntime` records over an `[nx, ny]` grid, filled by calling
/// `value(t, i, j)`.
pub(crate) fn surface_series<F>(ntime: usize, shape: [usize; 2], value: F) -> ArrayD<f64>
where
    F: Fn(usize, usize, usize) -> f64,
{
    let [nx, ny] = shape;
    Array3::from_shape_fn((ntime, ny, nx), |(t, j, i)| value(t, i, j)).into_dyn()
}

/// Compare interpolated values, which pick up rounding error from the weighting
#[track_caller]
pub(crate) fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}
