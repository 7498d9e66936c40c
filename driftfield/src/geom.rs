/// A continuous position in grid index units.
///
/// `x` runs along the i axis, `y` along j and `z` along k. Integer values fall exactly on grid
/// nodes.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridCoordinate {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl GridCoordinate {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// A position on the surface layer of a 2-D field
    pub fn surface(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }

    /// The grid node whose cell contains this position
    pub fn floor(&self) -> [isize; 3] {
        [
            self.x.floor() as isize,
            self.y.floor() as isize,
            self.z.floor() as isize,
        ]
    }

    /// The grid node nearest to this position
    pub fn round(&self) -> [isize; 3] {
        [
            self.x.round() as isize,
            self.y.round() as isize,
            self.z.round() as isize,
        ]
    }

    /// Sum of `|self - node|^power` along each axis.
    ///
    /// With `power == 2` this is the squared euclidean distance to the node.
    ///
    pub fn distance(&self, node: [isize; 3], power: i32) -> f64 {
        (self.x - node[0] as f64).abs().powi(power)
            + (self.y - node[1] as f64).abs().powi(power)
            + (self.z - node[2] as f64).abs().powi(power)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(&self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}
