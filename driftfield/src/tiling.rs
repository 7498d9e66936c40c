use std::cmp;

use crate::helpers::block_count;

/// Integer identifying one tile of a field snapshot.
///
/// Tiles are numbered x fastest, then y, then z:
///
/// ```text
/// k = 0          k = 1
/// 3 4 5          9 10 11
/// 0 1 2          6  7  8
/// ```
///
pub type TileTag = usize;

/// How a `[nx, ny, nz]` field is cut up into tiles of nominal size `h` x `h` x `v`.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tiling {
    shape: [usize; 3],
    h: usize,
    v: usize,
    ntiles: [usize; 3],
}

/// The region of the field covered by one tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileSpan {
    pub tag: TileTag,

    /// Global `[i, j, k]` index of the tile's first element
    pub origin: [usize; 3],

    /// Number of elements along `[x, y, z]`
    pub extent: [usize; 3],
}

impl Tiling {
    pub fn new(shape: [usize; 3], h: usize, v: usize) -> Self {
        let h = cmp::max(h, 1);
        let v = cmp::max(v, 1);
        let [nx, ny, nz] = shape;
        let ntiles = [block_count(nx, h), block_count(ny, h), block_count(nz, v)];

        Self {
            shape,
            h,
            v,
            ntiles,
        }
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    /// Number of tiles along `[x, y, z]`
    pub fn ntiles(&self) -> [usize; 3] {
        self.ntiles
    }

    pub fn len(&self) -> usize {
        self.ntiles.iter().product()
    }

    /// Tag of the tile containing global index `(i, j, k)`.
    ///
    /// Indices past the last full tile land in the last tile along that axis.
    ///
    pub fn tag(&self, i: usize, j: usize, k: usize) -> TileTag {
        let [ntilex, ntiley, ntilez] = self.ntiles;

        cmp::min(i / self.h, ntilex - 1)
            + ntilex * cmp::min(j / self.h, ntiley - 1)
            + ntilex * ntiley * cmp::min(k / self.v, ntilez - 1)
    }

    /// Global index of the first element of tile `tag`
    pub fn origin(&self, tag: TileTag) -> [usize; 3] {
        let [itile, jtile, ktile] = self.position(tag);

        [self.h * itile, self.h * jtile, self.v * ktile]
    }

    /// Number of elements in tile `tag` along `[x, y, z]`.
    ///
    /// The last tile along an axis runs to the end of the axis, so may be shorter or longer than
    /// the nominal size.
    ///
    pub fn extent(&self, tag: TileTag) -> [usize; 3] {
        let position = self.position(tag);
        let origin = self.origin(tag);
        let nominal = [self.h, self.h, self.v];

        let mut extent = [0; 3];
        for axis in 0..3 {
            extent[axis] = if position[axis] + 1 == self.ntiles[axis] {
                self.shape[axis].saturating_sub(origin[axis])
            } else {
                nominal[axis]
            };
        }

        extent
    }

    pub fn span(&self, tag: TileTag) -> TileSpan {
        TileSpan {
            tag,
            origin: self.origin(tag),
            extent: self.extent(tag),
        }
    }

    /// Block indices of tile `tag` along `[x, y, z]`
    fn position(&self, tag: TileTag) -> [usize; 3] {
        let [ntilex, ntiley, ntilez] = self.ntiles;

        [
            tag % ntilex,
            (tag / ntilex) % ntiley,
            (tag / (ntilex * ntiley)) % ntilez,
        ]
    }
}

impl TileSpan {
    pub fn contains(&self, i: usize, j: usize, k: usize) -> bool {
        let index = [i, j, k];
        (0..3).all(|axis| {
            index[axis] >= self.origin[axis]
                && index[axis] < self.origin[axis] + self.extent[axis]
        })
    }

    /// Number of elements in the tile
    pub fn len(&self) -> usize {
        self.extent.iter().product()
    }

    /// Translate a global index into an index local to this tile.
    pub fn local(&self, i: usize, j: usize, k: usize) -> [usize; 3] {
        [
            i - self.origin[0],
            j - self.origin[1],
            k - self.origin[2],
        ]
    }
}
