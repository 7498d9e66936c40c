//! The geometry a field is read against.
//!
//! Concrete ocean model grids live outside this crate. They only need to implement [`Grid`].
//! [`RegularGrid`] is a uniformly spaced grid with an optional land mask, enough for idealized
//! setups and for exercising the field readers.
//!
use ndarray::Array2;

use crate::{
    errors::{Error, Result},
    geom::{Axis, GridCoordinate},
};

pub trait Grid: Send + Sync {
    fn nx(&self) -> usize;
    fn ny(&self) -> usize;
    fn nz(&self) -> usize;

    /// Offset of the simulated sub-domain along x within the on-disk arrays
    fn i0(&self) -> usize {
        0
    }

    /// Offset of the simulated sub-domain along y within the on-disk arrays
    fn j0(&self) -> usize {
        0
    }

    /// Cell size along x, in meters
    fn dx(&self, i: usize, j: usize) -> f64;

    /// Cell size along y, in meters
    fn dy(&self, i: usize, j: usize) -> f64;

    /// Cell thickness, in meters
    fn dz(&self, i: usize, j: usize, k: usize) -> f64;

    /// Whether `position` is close enough to land that interpolation should use a reduced
    /// footprint.
    fn is_close_to_coast(&self, position: &GridCoordinate) -> bool;

    fn is_in_water(&self, _position: &GridCoordinate) -> bool {
        true
    }

    /// Whether indices wrap around along `axis`.
    fn cyclic(&self, axis: Axis) -> bool;

    /// Deepest level index holding water in column `(i, j)`.
    fn bottom_level(&self, _i: usize, _j: usize) -> usize {
        self.nz().saturating_sub(1)
    }

    fn len(&self, axis: Axis) -> usize {
        match axis {
            Axis::X => self.nx(),
            Axis::Y => self.ny(),
            Axis::Z => self.nz(),
        }
    }

    /// Map a possibly out of range index onto the grid.
    ///
    /// Cyclic axes wrap around. Otherwise an index outside `0..len` yields `None`.
    ///
    fn wrap(&self, axis: Axis, index: isize) -> Option<usize> {
        let len = self.len(axis) as isize;
        if len == 0 {
            None
        } else if self.cyclic(axis) {
            Some(index.rem_euclid(len) as usize)
        } else if index < 0 || index >= len {
            None
        } else {
            Some(index as usize)
        }
    }
}

/// A grid with constant cell sizes.
///
/// Land cells are flagged in an optional `(ny, nx)` mask. A position counts as close to the coast
/// when any of the four corners of its horizontal cell is land.
///
pub struct RegularGrid {
    shape: [usize; 3],
    spacing: [f64; 3],
    offset: [usize; 2],
    cyclic: [bool; 3],
    land: Option<Array2<bool>>,
}

impl RegularGrid {
    pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
        Self {
            shape: [nx, ny, nz],
            spacing: [1.0, 1.0, 1.0],
            offset: [0, 0],
            cyclic: [false; 3],
            land: None,
        }
    }

    pub fn with_spacing(mut self, dx: f64, dy: f64, dz: f64) -> Self {
        self.spacing = [dx, dy, dz];
        self
    }

    pub fn with_offset(mut self, i0: usize, j0: usize) -> Self {
        self.offset = [i0, j0];
        self
    }

    pub fn with_cyclic(mut self, axis: Axis) -> Self {
        self.cyclic[axis.index()] = true;
        self
    }

    /// Set the land mask. Indexed `[j, i]`, `true` meaning land.
    pub fn with_land(mut self, land: Array2<bool>) -> Result<Self> {
        if land.shape() != [self.shape[1], self.shape[0]] {
            return Err(Error::Config(format!(
                "land mask is {:?}, grid is {} x {}",
                land.shape(),
                self.shape[1],
                self.shape[0]
            )));
        }
        self.land = Some(land);

        Ok(self)
    }

    fn is_land(&self, i: isize, j: isize) -> bool {
        match (&self.land, self.wrap(Axis::X, i), self.wrap(Axis::Y, j)) {
            (Some(land), Some(i), Some(j)) => land[[j, i]],
            (Some(_), _, _) => true,
            (None, _, _) => false,
        }
    }
}

impl Grid for RegularGrid {
    fn nx(&self) -> usize {
        self.shape[0]
    }

    fn ny(&self) -> usize {
        self.shape[1]
    }

    fn nz(&self) -> usize {
        self.shape[2]
    }

    fn i0(&self) -> usize {
        self.offset[0]
    }

    fn j0(&self) -> usize {
        self.offset[1]
    }

    fn dx(&self, _i: usize, _j: usize) -> f64 {
        self.spacing[0]
    }

    fn dy(&self, _i: usize, _j: usize) -> f64 {
        self.spacing[1]
    }

    fn dz(&self, _i: usize, _j: usize, _k: usize) -> f64 {
        self.spacing[2]
    }

    fn is_close_to_coast(&self, position: &GridCoordinate) -> bool {
        if self.land.is_none() {
            return false;
        }
        let [i, j, _] = position.floor();
        self.is_land(i, j)
            || self.is_land(i + 1, j)
            || self.is_land(i, j + 1)
            || self.is_land(i + 1, j + 1)
    }

    fn is_in_water(&self, position: &GridCoordinate) -> bool {
        let [i, j, _] = position.round();
        !self.is_land(i, j)
    }

    fn cyclic(&self, axis: Axis) -> bool {
        self.cyclic[axis.index()]
    }
}
