//! Access to the files holding field snapshots.
//!
use async_trait::async_trait;
use ndarray::ArrayD;

use crate::{
    errors::{Error, Result},
    grid::Grid,
};

/// A trait for opening dataset files from an arbitrary store.
///
#[async_trait]
pub trait Source: Send + Sync {
    /// Open the file at `location`.
    ///
    /// Every call returns a fresh handle. Handles are never shared between tile stores.
    ///
    async fn open(&self, location: &str) -> Result<Box<dyn SourceFile>>;
}

/// An open dataset file.
///
#[async_trait]
pub trait SourceFile: Send {
    /// Where this file was opened from, for messages
    fn location(&self) -> &str;

    /// Read the time coordinate of this file.
    async fn time(&mut self) -> Result<TimeCoordinate>;

    /// Get the dimensions of `variable`, in disk order.
    ///
    /// Should return `Error::BadName` if there is no such variable.
    ///
    async fn shape(&mut self, variable: &str) -> Result<VariableShape>;

    /// Read a hyperslab of `variable` starting at `origin` with `count` elements along each axis.
    ///
    /// Both are in disk order. Masked or fill values are returned as NaN.
    ///
    async fn read(
        &mut self,
        variable: &str,
        origin: &[usize],
        count: &[usize],
    ) -> Result<ArrayD<f64>>;

    /// Release the file.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Raw values of a time coordinate variable and its units attribute.
#[derive(Clone, Debug)]
pub struct TimeCoordinate {
    pub values: Vec<f64>,
    pub units: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VariableShape {
    /// Length of each dimension, in disk order
    pub dims: Vec<usize>,

    /// Whether the leading dimension is the unlimited (record) dimension
    pub unlimited: bool,
}

/// How a variable's axes are laid out on disk.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// `(y, x)`
    Surface,

    /// `(time, y, x)`
    SurfaceSeries,

    /// `(depth, y, x)`
    Volume,

    /// `(time, depth, y, x)`
    VolumeSeries,
}

impl Layout {
    pub fn of(shape: &VariableShape) -> Option<Self> {
        match (shape.dims.len(), shape.unlimited) {
            (2, _) => Some(Layout::Surface),
            (3, true) => Some(Layout::SurfaceSeries),
            (3, false) => Some(Layout::Volume),
            (4, _) => Some(Layout::VolumeSeries),
            _ => None,
        }
    }

    pub fn has_time(&self) -> bool {
        matches!(self, Layout::SurfaceSeries | Layout::VolumeSeries)
    }

    pub fn has_depth(&self) -> bool {
        matches!(self, Layout::Volume | Layout::VolumeSeries)
    }

    /// Check a variable's shape against the grid it's read on and work out its layout.
    ///
    /// `ntime` is the length of the file's time coordinate.
    ///
    pub fn validate(
        shape: &VariableShape,
        grid: &dyn Grid,
        ntime: usize,
        location: &str,
        variable: &str,
    ) -> Result<Self> {
        let malformed = |cause: String| Error::MalformedField {
            location: location.to_string(),
            variable: variable.to_string(),
            cause,
        };

        let layout = Layout::of(shape).ok_or_else(|| {
            malformed(format!(
                "expecting 2 to 4 dimensions, found {:?}",
                shape.dims
            ))
        })?;

        let n = shape.dims.len();
        let (ny, nx) = (shape.dims[n - 2], shape.dims[n - 1]);
        if nx < grid.i0() + grid.nx() || ny < grid.j0() + grid.ny() {
            return Err(malformed(format!(
                "horizontal extent {ny} x {nx} doesn't cover grid of {} x {} at offset ({}, {})",
                grid.ny(),
                grid.nx(),
                grid.j0(),
                grid.i0()
            )));
        }

        if layout.has_depth() {
            let nz = shape.dims[n - 3];
            if nz != grid.nz() {
                return Err(malformed(format!(
                    "{nz} depth levels, grid has {}",
                    grid.nz()
                )));
            }
        }

        if layout.has_time() && shape.dims[0] != ntime {
            return Err(malformed(format!(
                "{} time records but time coordinate has {ntime} values",
                shape.dims[0]
            )));
        }

        Ok(layout)
    }

    /// Number of levels stored along z
    pub fn depth(&self, grid: &dyn Grid) -> usize {
        if self.has_depth() {
            grid.nz()
        } else {
            1
        }
    }

    /// Compute the disk order origin and count for a tile.
    ///
    /// `origin` and `extent` are `[x, y, z]` in grid indices. `offset` is the grid's sub-domain
    /// offset `[i0, j0]`. Time series are read at `rank` only.
    ///
    pub fn hyperslab(
        &self,
        rank: usize,
        offset: [usize; 2],
        origin: [usize; 3],
        extent: [usize; 3],
    ) -> (Vec<usize>, Vec<usize>) {
        let x = (offset[0] + origin[0], extent[0]);
        let y = (offset[1] + origin[1], extent[1]);
        let z = (origin[2], extent[2]);
        let t = (rank, 1);

        let axes = match self {
            Layout::Surface => vec![y, x],
            Layout::SurfaceSeries => vec![t, y, x],
            Layout::Volume => vec![z, y, x],
            Layout::VolumeSeries => vec![t, z, y, x],
        };

        axes.into_iter().unzip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::grid::RegularGrid;

    fn shape(dims: &[usize], unlimited: bool) -> VariableShape {
        VariableShape {
            dims: dims.to_vec(),
            unlimited,
        }
    }

    #[test]
    fn test_layout_of() {
        assert_eq!(Layout::of(&shape(&[4, 5], false)), Some(Layout::Surface));
        assert_eq!(Layout::of(&shape(&[3, 4, 5], true)), Some(Layout::SurfaceSeries));
        assert_eq!(Layout::of(&shape(&[3, 4, 5], false)), Some(Layout::Volume));
        assert_eq!(Layout::of(&shape(&[2, 3, 4, 5], true)), Some(Layout::VolumeSeries));
        assert_eq!(Layout::of(&shape(&[5], false)), None);
    }

    #[test]
    fn test_hyperslab() {
        let (origin, count) =
            Layout::VolumeSeries.hyperslab(3, [10, 20], [4, 8, 0], [4, 2, 5]);
        assert_eq!(origin, vec![3, 0, 28, 14]);
        assert_eq!(count, vec![1, 5, 2, 4]);

        let (origin, count) = Layout::Surface.hyperslab(3, [0, 0], [4, 8, 0], [4, 2, 1]);
        assert_eq!(origin, vec![8, 4]);
        assert_eq!(count, vec![2, 4]);

        let (origin, count) = Layout::SurfaceSeries.hyperslab(7, [1, 1], [0, 0, 0], [3, 3, 1]);
        assert_eq!(origin, vec![7, 1, 1]);
        assert_eq!(count, vec![1, 3, 3]);
    }

    #[test]
    fn test_validate() {
        let grid = RegularGrid::new(10, 8, 5).with_offset(2, 0);

        let layout = Layout::validate(&shape(&[4, 5, 8, 12], true), &grid, 4, "a.nc", "u");
        assert_eq!(layout.unwrap(), Layout::VolumeSeries);

        // Doesn't cover the sub-domain
        let result = Layout::validate(&shape(&[4, 5, 8, 11], true), &grid, 4, "a.nc", "u");
        assert!(matches!(result, Err(Error::MalformedField { .. })));

        // Wrong number of levels
        let result = Layout::validate(&shape(&[4, 6, 8, 12], true), &grid, 4, "a.nc", "u");
        assert!(matches!(result, Err(Error::MalformedField { .. })));

        // Record count disagrees with time coordinate
        let result = Layout::validate(&shape(&[3, 8, 12], true), &grid, 4, "a.nc", "zeta");
        assert!(matches!(result, Err(Error::MalformedField { .. })));

        let result = Layout::validate(&shape(&[12], false), &grid, 4, "a.nc", "zeta");
        assert!(matches!(result, Err(Error::MalformedField { .. })));
    }
}
