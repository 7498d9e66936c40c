use ndarray::{ArrayD, IxDyn};

use crate::{
    cache::Cacheable,
    tiling::{TileSpan, TileTag},
};

/// One materialized block of a field snapshot.
///
/// Only the axes along which the tile has more than one element are kept, so a tile may be
/// stored with rank 0, 1, 2 or 3. The kept axes are always in disk order: z, y, x.
///
pub struct Tile {
    span: TileSpan,
    data: TileData,
}

enum TileData {
    Loaded(ArrayD<f64>),

    /// The tile couldn't be read. Every cell is masked.
    Masked,
}

impl Tile {
    /// Wrap the values read for `span`.
    ///
    /// `values` must hold exactly `span.len()` elements in z, y, x order. Any shape with that many
    /// elements is accepted, since readers are free to drop or keep length one axes. Returns
    /// `None` if the element count is off.
    ///
    pub fn new(span: TileSpan, values: ArrayD<f64>) -> Option<Self> {
        if values.len() != span.len() {
            return None;
        }
        let [nx, ny, nz] = span.extent;
        let shape: Vec<usize> = [nz, ny, nx].into_iter().filter(|&n| n > 1).collect();
        let values = values.as_standard_layout().into_owned();
        let data = values.into_shape(IxDyn(&shape)).ok()?;

        Some(Self {
            span,
            data: TileData::Loaded(data),
        })
    }

    pub fn masked(span: TileSpan) -> Self {
        Self {
            span,
            data: TileData::Masked,
        }
    }

    pub fn tag(&self) -> TileTag {
        self.span.tag
    }

    pub fn span(&self) -> &TileSpan {
        &self.span
    }

    pub fn is_masked(&self) -> bool {
        matches!(self.data, TileData::Masked)
    }

    /// Number of non-trivial axes held by this tile
    pub fn rank(&self) -> usize {
        match &self.data {
            TileData::Loaded(data) => data.ndim(),
            TileData::Masked => 0,
        }
    }

    /// Get the value at global index `(i, j, k)`, which must lie within this tile.
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        let data = match &self.data {
            TileData::Loaded(data) => data,
            TileData::Masked => return f64::NAN,
        };
        let [li, lj, lk] = self.span.local(i, j, k);
        let [nx, ny, nz] = self.span.extent;

        match data.ndim() {
            0 => data.iter().next().copied().unwrap_or(f64::NAN),
            1 => {
                if nz > 1 {
                    data[&[lk][..]]
                } else if ny > 1 {
                    data[&[lj][..]]
                } else {
                    data[&[li][..]]
                }
            }
            2 => {
                if nz <= 1 {
                    data[&[lj, li][..]]
                } else if ny <= 1 {
                    data[&[lk, li][..]]
                } else {
                    debug_assert!(nx <= 1);
                    data[&[lk, lj][..]]
                }
            }
            _ => data[&[lk, lj, li][..]],
        }
    }
}

impl Cacheable for Tile {
    fn size(&self) -> u64 {
        match &self.data {
            TileData::Loaded(data) => (data.len() * std::mem::size_of::<f64>()) as u64,
            TileData::Masked => 0,
        }
    }
}
