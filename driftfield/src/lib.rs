//! Time stacked, tiled, interpolating readers for gridded ocean model output.
//!
//! A [`Field`] turns a sequence of on-disk snapshots into a value that can be sampled at any grid
//! position and time. Snapshots are cut into tiles that are read lazily, at most once each, and
//! held in a sliding window of time layers that is advanced as simulation time goes by.
//!
mod cache;
mod config;
mod errors;
mod flux;
mod geom;
mod grid;
mod helpers;
mod interpolate;
#[cfg(feature = "netcdf")]
mod nc;
mod prefetch;
mod registry;
mod source;
mod stack;
mod store;
mod tile;
mod tiling;
mod time;
mod variable;

#[cfg(test)]
mod testing;

pub use config::{FieldConfig, TilingConfig, VelocityConfig};
pub use errors::{Error, Result};
pub use flux::{FluxTiles, VerticalVelocity};
pub use geom::{Axis, GridCoordinate};
pub use grid::{Grid, RegularGrid};
pub use interpolate::sample;
#[cfg(feature = "netcdf")]
pub use nc::NetcdfSource;
pub use prefetch::Prefetcher;
pub use registry::{FieldFactory, FieldRegistry};
pub use source::{Layout, Source, SourceFile, TimeCoordinate, VariableShape};
pub use stack::{StackState, TimeStack};
pub use store::{FileTiles, TileLoader, TileStore};
pub use tile::Tile;
pub use tiling::{TileSpan, TileTag, Tiling};
pub use time::{seconds_per_unit, Cursor, Direction, FileTimes, Timeline};
pub use variable::{DatasetVariable, Field};
