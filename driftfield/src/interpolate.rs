//! Inverse distance weighted interpolation in space, linear in time.
//!
use std::sync::Arc;

use crate::{
    geom::{Axis, GridCoordinate},
    grid::Grid,
    helpers::clamp_unit,
    stack::TimeStack,
    store::TileStore,
};

/// Exponent applied to the distance between a position and a node
const POWER: i32 = 2;

/// Nodes of the 8 corner footprint, as offsets from the node at the floor of the position
const CORNERS: [[isize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [0, 1, 0],
    [1, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [0, 1, 1],
    [1, 1, 1],
];

/// A grid node taking part in an interpolation.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Node {
    index: [usize; 3],
    weight: f64,
}

#[derive(Debug, PartialEq)]
enum Footprint {
    /// The position sits right on this node
    Exact([usize; 3]),

    Weighted(Vec<Node>),
}

/// Sample the field held in the two oldest layers of `stack` at `position` and `time`.
///
/// Each layer is interpolated in space, then the two results are blended linearly according to
/// where `time` falls between the layers' timestamps. Positions on land yield NaN. A position
/// whose every neighbor is masked yields 0.
///
pub async fn sample(
    grid: &dyn Grid,
    stack: &TimeStack,
    position: &GridCoordinate,
    time: f64,
) -> f64 {
    let first = match stack.layer(0) {
        Some(layer) => layer,
        None => return f64::NAN,
    };
    if !grid.is_in_water(position) {
        return f64::NAN;
    }

    let second = stack.layer(1);
    let dt = match second {
        Some(second) => {
            let span = (second.timestamp() - first.timestamp()).abs();
            clamp_unit((time - first.timestamp()).abs() / span)
        }
        None => 0.0,
    };

    let footprint = footprint(grid, position, first.depth());
    match second {
        Some(second) if dt > 0.0 => {
            let after = interpolate(second, &footprint).await;
            if dt < 1.0 {
                let before = interpolate(first, &footprint).await;
                (1.0 - dt) * before + dt * after
            } else {
                after
            }
        }
        _ => interpolate(first, &footprint).await,
    }
}

/// Spatially interpolate one layer over `footprint`.
async fn interpolate(store: &Arc<TileStore>, footprint: &Footprint) -> f64 {
    match footprint {
        Footprint::Exact([i, j, k]) => store.get(*i, *j, *k).await,
        Footprint::Weighted(nodes) => {
            let mut sum = 0.0;
            let mut total = 0.0;
            for node in nodes {
                let [i, j, k] = node.index;
                let value = store.get(i, j, k).await;
                if !value.is_nan() {
                    sum += node.weight * value;
                    total += node.weight;
                }
            }

            if total == 0.0 {
                0.0
            } else {
                sum / total
            }
        }
    }
}

/// Work out which nodes contribute to the value at `position`, and how much.
///
/// `depth` is the number of levels of the field. Single level fields are interpolated in the
/// horizontal only. Close to the coast only the four horizontal corners at the nearest level are
/// used.
///
fn footprint(grid: &dyn Grid, position: &GridCoordinate, depth: usize) -> Footprint {
    let position = if depth > 1 {
        *position
    } else {
        GridCoordinate::surface(position.x, position.y)
    };
    let origin = position.floor();

    let corners = if grid.is_close_to_coast(&position) {
        let k = position.round()[2];
        CORNERS[..4]
            .iter()
            .map(|[di, dj, _]| [origin[0] + di, origin[1] + dj, k])
            .collect::<Vec<_>>()
    } else {
        let ncorners = if depth > 1 { 8 } else { 4 };
        CORNERS[..ncorners]
            .iter()
            .map(|[di, dj, dk]| [origin[0] + di, origin[1] + dj, origin[2] + dk])
            .collect::<Vec<_>>()
    };

    let mut nodes = Vec::with_capacity(corners.len());
    for corner in corners {
        let index = match wrap(grid, corner, depth) {
            Some(index) => index,
            None => continue,
        };

        let distance = position.distance(corner, POWER);
        if distance == 0.0 {
            return Footprint::Exact(index);
        }
        nodes.push(Node {
            index,
            weight: 1.0 / distance,
        });
    }

    Footprint::Weighted(nodes)
}

/// Map a node onto the grid, or `None` if it falls outside along a non cyclic axis.
fn wrap(grid: &dyn Grid, node: [isize; 3], depth: usize) -> Option<[usize; 3]> {
    let i = grid.wrap(Axis::X, node[0])?;
    let j = grid.wrap(Axis::Y, node[1])?;
    let k = if depth == grid.nz() {
        grid.wrap(Axis::Z, node[2])?
    } else if node[2] >= 0 && (node[2] as usize) < depth {
        node[2] as usize
    } else {
        return None;
    };

    Some([i, j, k])
}
