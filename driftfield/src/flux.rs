//! Vertical velocity derived from the divergence of horizontal volume fluxes.
//!
use std::sync::Arc;

use async_trait::async_trait;
use ndarray::{Array1, ArrayD};

use crate::{
    config::FieldConfig,
    errors::{Error, Result},
    geom::{Axis, GridCoordinate},
    grid::Grid,
    interpolate,
    prefetch::Prefetcher,
    source::Source,
    stack::{StackState, TimeStack},
    store::{TileLoader, TileStore},
    tiling::{TileSpan, Tiling},
    time::Direction,
    variable::{DatasetVariable, Field},
};

/// Computes whole water columns of vertical velocity from the u and v snapshots of one time rank.
///
/// Tiles are one column each.
///
pub struct FluxTiles {
    u: Arc<TileStore>,
    v: Arc<TileStore>,
    grid: Arc<dyn Grid>,
}

impl FluxTiles {
    pub fn new(u: Arc<TileStore>, v: Arc<TileStore>, grid: Arc<dyn Grid>) -> Self {
        Self { u, v, grid }
    }

    /// Tiling of a derived store: one tile per column, tagged `i + nx * j`
    pub fn tiling(grid: &dyn Grid) -> Tiling {
        Tiling::new([grid.nx(), grid.ny(), grid.nz()], 1, grid.nz())
    }

    /// Index of a cell and of its neighbor on the low side along a horizontal axis.
    ///
    /// On the first cell of a closed axis, the first two cells stand in.
    ///
    fn neighbors(&self, axis: Axis, index: usize) -> (usize, usize) {
        if index > 0 {
            (index, index - 1)
        } else if self.grid.cyclic(axis) {
            (0, self.grid.len(axis).saturating_sub(1))
        } else {
            (1, 0)
        }
    }

    async fn column(&self, i: usize, j: usize) -> Array1<f64> {
        let grid = &*self.grid;
        let nz = grid.nz();
        let mut w = Array1::zeros(nz);

        let (ci, cim1) = self.neighbors(Axis::X, i);
        let (cj, cjm1) = self.neighbors(Axis::Y, j);

        // Deepest level with water
        let bottom = grid.bottom_level(ci, cj).min(nz.saturating_sub(1));
        let mut k0 = None;
        for k in (1..=bottom).rev() {
            if !self.u.get(ci, cj, k).await.is_nan() {
                k0 = Some(k);
                break;
            }
        }
        let k0 = match k0 {
            Some(k0) => k0,
            None => return w,
        };

        let area = grid.dx(ci, cj) * grid.dy(ci, cj);
        for k in (1..=k0).rev() {
            let huon1 = flux(self.u.get(ci, cj, k).await, grid.dy(ci, cj) * grid.dz(ci, cj, k));
            let huon0 = flux(
                self.u.get(cim1, cj, k).await,
                grid.dy(cim1, cj) * grid.dz(cim1, cj, k),
            );
            let hvom1 = flux(self.v.get(ci, cj, k).await, grid.dx(ci, cj) * grid.dz(ci, cj, k));
            let hvom0 = flux(
                self.v.get(ci, cjm1, k).await,
                grid.dx(ci, cjm1) * grid.dz(ci, cjm1, k),
            );

            let below = if k + 1 < nz { w[k + 1] } else { 0.0 };
            w[k] = below - (huon1 - huon0 + hvom1 - hvom0) / area;
        }

        w
    }
}

/// Volume flux through a cell face. Masked velocities carry nothing.
fn flux(velocity: f64, face: f64) -> f64 {
    if velocity.is_nan() {
        0.0
    } else {
        velocity * face
    }
}

#[async_trait]
impl TileLoader for FluxTiles {
    async fn load(&self, span: &TileSpan) -> Result<ArrayD<f64>> {
        let [i, j, _] = span.origin;

        Ok(self.column(i, j).await.into_dyn())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Vertical velocity, derived layer by layer from the u and v fields.
///
/// u and v are read with tiles spanning whole columns, and kept in step with the derived field
/// so each derived layer's u and v layers stay loaded for as long as it does.
///
pub struct VerticalVelocity {
    name: String,
    u: DatasetVariable,
    v: DatasetVariable,
    grid: Arc<dyn Grid>,
    stack: TimeStack,
}

impl VerticalVelocity {
    pub fn new(
        name: impl Into<String>,
        u: DatasetVariable,
        v: DatasetVariable,
        grid: Arc<dyn Grid>,
    ) -> Self {
        let nlayer = u.stack().nlayer();
        let prefetcher = u.stack().prefetcher().clone();

        Self {
            name: name.into(),
            u,
            v,
            grid,
            stack: TimeStack::new(nlayer, prefetcher),
        }
    }

    /// Factory for the `"vertical_velocity"` kind.
    pub fn from_config(
        config: &FieldConfig,
        grid: Arc<dyn Grid>,
        source: Arc<dyn Source>,
    ) -> Result<Box<dyn Field>> {
        let velocity = config.velocity.as_ref().ok_or_else(|| {
            Error::Config(format!(
                "{}: vertical velocity needs u and v variable names",
                config.name
            ))
        })?;
        let prefetcher = Prefetcher::new(config.prefetch_workers);
        let tile_size = [config.tiling.horizontal, grid.nz()];

        let component = |name: &str| {
            DatasetVariable::new(
                name,
                config.locations.clone(),
                Arc::clone(&source),
                Arc::clone(&grid),
                tile_size,
                config.nlayer,
                prefetcher.clone(),
            )
        };
        let u = component(&velocity.u);
        let v = component(&velocity.v);

        Ok(Box::new(Self::new(config.name.clone(), u, v, grid)))
    }

    pub fn stack(&self) -> &TimeStack {
        &self.stack
    }

    fn derive(&self, u: &Arc<TileStore>, v: &Arc<TileStore>) -> Arc<TileStore> {
        let loader = FluxTiles::new(Arc::clone(u), Arc::clone(v), Arc::clone(&self.grid));

        Arc::new(TileStore::new(
            self.name.as_str(),
            FluxTiles::tiling(&*self.grid),
            u.rank(),
            u.timestamp(),
            Box::new(loader),
        ))
    }

    /// Move u, v and the derived field one snapshot on in the direction of time.
    async fn advance(&mut self, direction: Direction) -> Result<StackState> {
        let u = self.u.advance(direction).await?;
        let v = self.v.advance(direction).await?;
        if u == StackState::Exhausted || v == StackState::Exhausted {
            self.stack.exhaust();
            return Ok(StackState::Exhausted);
        }

        match (self.u.stack().top(), self.v.stack().top()) {
            (Some(u), Some(v)) => {
                let store = self.derive(u, v);
                self.stack.push(store).await;

                Ok(self.stack.state())
            }
            _ => Err(Error::Uninitialized {
                variable: self.name.clone(),
            }),
        }
    }
}

#[async_trait]
impl Field for VerticalVelocity {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> StackState {
        self.stack.state()
    }

    async fn init(&mut self, t0: f64, direction: Direction) -> Result<()> {
        self.stack.clear().await;
        self.u.init(t0, direction).await?;
        self.v.init(t0, direction).await?;

        let layers: Vec<_> = self
            .u
            .stack()
            .layers()
            .zip(self.v.stack().layers())
            .map(|(u, v)| self.derive(u, v))
            .collect();
        for store in layers {
            self.stack.push(store).await;
        }
        self.stack.ready();

        Ok(())
    }

    async fn update(&mut self, time: f64, direction: Direction) -> Result<StackState> {
        match self.stack.state() {
            StackState::Uninitialized => Err(Error::Uninitialized {
                variable: self.name.clone(),
            }),
            StackState::Exhausted => Ok(StackState::Exhausted),
            StackState::Ready => {
                while self.stack.needs_update(time, direction) {
                    if self.advance(direction).await? == StackState::Exhausted {
                        break;
                    }
                }

                Ok(self.stack.state())
            }
        }
    }

    async fn sample(&self, position: &GridCoordinate, time: f64) -> Result<f64> {
        match self.stack.state() {
            StackState::Uninitialized => Err(Error::Uninitialized {
                variable: self.name.clone(),
            }),
            StackState::Exhausted => Err(Error::Exhausted {
                variable: self.name.clone(),
            }),
            StackState::Ready => {
                Ok(interpolate::sample(&*self.grid, &self.stack, position, time).await)
            }
        }
    }
}
