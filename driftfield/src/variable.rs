use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    config::FieldConfig,
    errors::{Error, Result},
    geom::GridCoordinate,
    grid::Grid,
    interpolate,
    prefetch::Prefetcher,
    source::{Layout, Source, SourceFile},
    stack::{StackState, TimeStack},
    store::{FileTiles, TileStore},
    tiling::Tiling,
    time::{Cursor, Direction, FileTimes, Timeline},
};

/// A field that can be sampled anywhere on the grid at any time covered by its data.
///
#[async_trait]
pub trait Field: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> StackState;

    /// Load the snapshots bracketing `t0`.
    ///
    /// Any previously loaded snapshots are released first.
    ///
    async fn init(&mut self, t0: f64, direction: Direction) -> Result<()>;

    /// Slide the time window forward (in the direction of time) until it covers `time`.
    ///
    /// Returns `StackState::Exhausted` once there's no more data to slide onto.
    ///
    async fn update(&mut self, time: f64, direction: Direction) -> Result<StackState>;

    /// Interpolated value at `position` and `time`.
    ///
    /// NaN on land. Fails if the field hasn't been initialized or has run out of data.
    ///
    async fn sample(&self, position: &GridCoordinate, time: f64) -> Result<f64>;
}

/// A field read from a named variable spread over a sequence of dataset files.
///
pub struct DatasetVariable {
    name: String,
    locations: Vec<String>,
    source: Arc<dyn Source>,
    grid: Arc<dyn Grid>,
    tile_size: [usize; 2],
    stack: TimeStack,
    track: Option<Track>,
}

/// Where a variable's data lives and how far into it we've read.
struct Track {
    timeline: Timeline,
    layout: Layout,
    cursor: Cursor,
}

impl DatasetVariable {
    /// `tile_size` is the horizontal and vertical tile size.
    pub fn new(
        name: impl Into<String>,
        locations: Vec<String>,
        source: Arc<dyn Source>,
        grid: Arc<dyn Grid>,
        tile_size: [usize; 2],
        nlayer: usize,
        prefetcher: Prefetcher,
    ) -> Self {
        Self {
            name: name.into(),
            locations,
            source,
            grid,
            tile_size,
            stack: TimeStack::new(nlayer, prefetcher),
            track: None,
        }
    }

    /// Factory for the `"dataset"` kind.
    pub fn from_config(
        config: &FieldConfig,
        grid: Arc<dyn Grid>,
        source: Arc<dyn Source>,
    ) -> Result<Box<dyn Field>> {
        let prefetcher = Prefetcher::new(config.prefetch_workers);
        let tile_size = [config.tiling.horizontal, config.tiling.vertical];

        Ok(Box::new(Self::new(
            config.name.clone(),
            config.locations.clone(),
            source,
            grid,
            tile_size,
            config.nlayer,
            prefetcher,
        )))
    }

    pub fn stack(&self) -> &TimeStack {
        &self.stack
    }

    pub fn layout(&self) -> Option<Layout> {
        self.track.as_ref().map(|track| track.layout)
    }

    /// Current `(file, rank)` of the newest layer
    pub fn cursor(&self) -> Option<Cursor> {
        self.track.as_ref().map(|track| track.cursor)
    }

    /// Read the time axis of every file and check the variable is laid out as expected in each.
    async fn scan(&self) -> Result<(Timeline, Layout)> {
        let mut files = Vec::with_capacity(self.locations.len());
        let mut layout = None;
        for location in &self.locations {
            let mut file = self.source.open(location).await?;
            let scanned = self.scan_file(file.as_mut()).await;
            file.close().await?;
            let (times, found) = scanned?;

            match layout {
                None => layout = Some(found),
                Some(expected) if expected != found => {
                    return Err(Error::MalformedField {
                        location: location.clone(),
                        variable: self.name.clone(),
                        cause: format!("laid out as {found:?}, earlier files as {expected:?}"),
                    });
                }
                Some(_) => {}
            }
            files.push(times);
        }

        let layout = layout.ok_or_else(|| {
            Error::Config(format!("no dataset files given for {}", self.name))
        })?;

        Ok((Timeline::new(files), layout))
    }

    async fn scan_file(&self, file: &mut dyn SourceFile) -> Result<(FileTimes, Layout)> {
        let coordinate = file.time().await?;
        let times = FileTimes::new(file.location(), &coordinate);
        let shape = file.shape(&self.name).await?;
        let layout =
            Layout::validate(&shape, &*self.grid, times.len(), file.location(), &self.name)?;

        Ok((times, layout))
    }

    /// Open a fresh tile store for the snapshot at `cursor`.
    async fn open_store(&self, track: &Track, cursor: Cursor) -> Result<Arc<TileStore>> {
        let location = track.timeline.location(cursor);
        let file = self.source.open(location).await?;
        let offset = [self.grid.i0(), self.grid.j0()];
        let loader = FileTiles::new(file, self.name.as_str(), track.layout, cursor.rank, offset);

        let [h, v] = self.tile_size;
        let shape = [self.grid.nx(), self.grid.ny(), track.layout.depth(&*self.grid)];
        let tiling = Tiling::new(shape, h, v);

        tracing::debug!(
            variable = %self.name,
            location,
            rank = cursor.rank,
            "opening time layer"
        );

        Ok(Arc::new(TileStore::new(
            self.name.as_str(),
            tiling,
            cursor.rank,
            track.timeline.time(cursor),
            Box::new(loader),
        )))
    }

    /// Push snapshots onto the empty stack, starting at `cursor`, until it's full.
    ///
    /// Returns the cursor of the newest layer.
    ///
    async fn fill(&mut self, track: &Track, start: Cursor, direction: Direction) -> Result<Cursor> {
        let mut cursor = start;
        let store = self.open_store(track, cursor).await?;
        self.stack.push(store).await;
        while !self.stack.is_full() {
            cursor = track
                .timeline
                .next(cursor, direction)
                .ok_or_else(|| Error::Exhausted {
                    variable: self.name.clone(),
                })?;
            let store = self.open_store(track, cursor).await?;
            self.stack.push(store).await;
        }

        Ok(cursor)
    }

    /// Push the next snapshot in the direction of time onto the stack.
    ///
    /// Crosses over into the next file when the current one runs out. Once every file has run
    /// out the stack is marked exhausted.
    ///
    pub async fn advance(&mut self, direction: Direction) -> Result<StackState> {
        let track = self.track.as_ref().ok_or_else(|| Error::Uninitialized {
            variable: self.name.clone(),
        })?;

        let cursor = match track.timeline.next(track.cursor, direction) {
            Some(cursor) => cursor,
            None => {
                self.stack.exhaust();
                return Ok(StackState::Exhausted);
            }
        };

        let store = self.open_store(track, cursor).await?;
        self.stack.push(store).await;
        if let Some(track) = self.track.as_mut() {
            track.cursor = cursor;
        }

        Ok(self.stack.state())
    }
}

#[async_trait]
impl Field for DatasetVariable {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> StackState {
        self.stack.state()
    }

    async fn init(&mut self, t0: f64, direction: Direction) -> Result<()> {
        self.stack.clear().await;
        self.track = None;

        let (timeline, layout) = self.scan().await?;
        let cursor = timeline.locate(&self.name, t0, direction)?;
        let mut track = Track {
            timeline,
            layout,
            cursor,
        };

        match self.fill(&track, cursor, direction).await {
            Ok(cursor) => {
                track.cursor = cursor;
                self.track = Some(track);
                self.stack.ready();

                Ok(())
            }
            Err(err) => {
                // Release whatever layers made it onto the stack
                self.stack.clear().await;
                Err(err)
            }
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        grid::RegularGrid,
        testing::{assert_close, surface_series, volume_series, MemoryFile, MemorySource},
    };

    fn variable(
        source: &Arc<MemorySource>,
        grid: RegularGrid,
        locations: &[&str],
    ) -> DatasetVariable {
        DatasetVariable::new(
            "u",
            locations.iter().map(|l| l.to_string()).collect(),
            Arc::clone(source) as Arc<dyn Source>,
            Arc::new(grid),
            [8, 1],
            2,
            Prefetcher::disabled(),
        )
    }

    /// u = 1 + 2t everywhere, for t = 0, 1, 2, ... at 100 second intervals
    fn ramp(times: &[f64], first: usize) -> MemoryFile {
        let u = volume_series(times.len(), [20, 6, 2], |t, _, _, _| {
            1.0 + 2.0 * (first + t) as f64
        });

        MemoryFile::new(times.to_vec(), Some("seconds since 2000-01-01"))
            .with_variable("u", u, true)
    }

    #[tokio::test]
    async fn test_end_to_end() -> Result<()> {
        let source = Arc::new(MemorySource::new().with_file("a.nc", ramp(&[0.0, 100.0, 200.0], 0)));
        let mut u = variable(&source, RegularGrid::new(20, 6, 2), &["a.nc"]);

        u.init(0.0, Direction::Forward).await?;
        assert_eq!(u.state(), StackState::Ready);
        assert_eq!(u.layout(), Some(Layout::VolumeSeries));

        let position = GridCoordinate::new(4.3, 2.7, 0.5);
        assert_close(u.sample(&position, 25.0).await?, 1.5);
        assert_close(u.sample(&position, 0.0).await?, 1.0);
        assert_close(u.sample(&position, 100.0).await?, 3.0);

        assert_eq!(u.update(150.0, Direction::Forward).await?, StackState::Ready);
        assert_eq!(u.stack().layer(0).unwrap().timestamp(), 100.0);
        assert_close(u.sample(&position, 150.0).await?, 4.0);

        Ok(())
    }

    #[tokio::test]
    async fn test_eviction() -> Result<()> {
        let source = Arc::new(MemorySource::new().with_file("a.nc", ramp(&[0.0, 100.0, 200.0], 0)));
        let mut u = variable(&source, RegularGrid::new(20, 6, 2), &["a.nc"]);
        u.init(0.0, Direction::Forward).await?;

        let oldest = Arc::clone(u.stack().layer(0).unwrap());
        let position = GridCoordinate::new(10.0, 3.0, 0.0);
        u.sample(&position, 50.0).await?;
        assert!(!oldest.resident_tags().is_empty());
        let reads = source.reads("a.nc", "u");

        assert_eq!(u.advance(Direction::Forward).await?, StackState::Ready);
        assert!(oldest.is_closed());
        assert!(oldest.resident_tags().is_empty());
        assert_eq!(u.stack().len(), 2);
        assert_eq!(u.cursor(), Some(Cursor { file: 0, rank: 2 }));

        // One handle per layer. The scan's handle and the evicted layer's are closed.
        assert_eq!(source.open_handles("a.nc"), 2);

        // The new top layer reads rank 2 from disk
        assert_eq!(u.sample(&position, 200.0).await?, 5.0);
        let origins = source.read_origins("a.nc", "u");
        assert!(origins.len() > reads);
        assert!(origins[reads..].iter().all(|origin| origin[0] == 2));

        Ok(())
    }

    #[tokio::test]
    async fn test_file_crossing() -> Result<()> {
        let source = Arc::new(
            MemorySource::new()
                .with_file("b.nc", ramp(&[200.0, 300.0], 2))
                .with_file("a.nc", ramp(&[0.0, 100.0], 0)),
        );
        let mut u = variable(&source, RegularGrid::new(20, 6, 2), &["b.nc", "a.nc"]);
        u.init(50.0, Direction::Forward).await?;
        assert_eq!(u.cursor(), Some(Cursor { file: 0, rank: 1 }));

        let position = GridCoordinate::new(1.5, 1.5, 0.5);
        assert_eq!(u.update(150.0, Direction::Forward).await?, StackState::Ready);
        assert_eq!(u.cursor(), Some(Cursor { file: 1, rank: 0 }));
        assert_close(u.sample(&position, 150.0).await?, 4.0);
        assert_eq!(u.stack().top().unwrap().timestamp(), 200.0);

        // Jumping more than one interval at once
        assert_eq!(u.update(300.0, Direction::Forward).await?, StackState::Exhausted);
        assert!(matches!(
            u.sample(&position, 300.0).await,
            Err(Error::Exhausted { .. })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_exhaustion() -> Result<()> {
        let source = Arc::new(MemorySource::new().with_file("a.nc", ramp(&[0.0, 100.0, 200.0], 0)));
        let mut u = variable(&source, RegularGrid::new(20, 6, 2), &["a.nc"]);
        u.init(120.0, Direction::Forward).await?;

        let position = GridCoordinate::new(1.0, 1.0, 0.0);
        assert_eq!(u.sample(&position, 150.0).await?, 4.0);
        assert_eq!(u.update(199.0, Direction::Forward).await?, StackState::Ready);
        assert_eq!(u.update(200.0, Direction::Forward).await?, StackState::Exhausted);
        assert_eq!(u.state(), StackState::Exhausted);

        // Window is kept but sampling refuses to extrapolate
        assert_eq!(u.stack().len(), 2);
        assert!(matches!(
            u.sample(&position, 200.0).await,
            Err(Error::Exhausted { .. })
        ));
        assert_eq!(u.update(250.0, Direction::Forward).await?, StackState::Exhausted);

        Ok(())
    }

    #[tokio::test]
    async fn test_backward() -> Result<()> {
        let source = Arc::new(
            MemorySource::new()
                .with_file("a.nc", ramp(&[0.0, 100.0], 0))
                .with_file("b.nc", ramp(&[200.0, 300.0], 2)),
        );
        let mut u = variable(&source, RegularGrid::new(20, 6, 2), &["a.nc", "b.nc"]);
        u.init(250.0, Direction::Backward).await?;
        assert_eq!(u.cursor(), Some(Cursor { file: 1, rank: 0 }));
        assert_eq!(u.stack().layer(0).unwrap().timestamp(), 300.0);
        assert_eq!(u.stack().layer(1).unwrap().timestamp(), 200.0);

        let position = GridCoordinate::new(7.5, 0.5, 1.0);
        assert_close(u.sample(&position, 275.0).await?, 6.5);

        assert_eq!(u.update(180.0, Direction::Backward).await?, StackState::Ready);
        assert_eq!(u.cursor(), Some(Cursor { file: 0, rank: 1 }));
        assert_close(u.sample(&position, 150.0).await?, 4.0);

        assert_eq!(u.update(50.0, Direction::Backward).await?, StackState::Ready);
        assert_eq!(u.update(0.0, Direction::Backward).await?, StackState::Exhausted);

        Ok(())
    }

    #[tokio::test]
    async fn test_surface_field() -> Result<()> {
        let zeta = surface_series(2, [20, 6], |t, i, _| (t * 10 + i) as f64);
        let file = MemoryFile::new(vec![0.0, 1.0], Some("hours since 1970-01-01"))
            .with_variable("zeta", zeta, true);
        let source: Arc<dyn Source> = Arc::new(MemorySource::new().with_file("a.nc", file));
        let mut zeta = DatasetVariable::new(
            "zeta",
            vec![String::from("a.nc")],
            source,
            Arc::new(RegularGrid::new(20, 6, 4)),
            [8, 1],
            2,
            Prefetcher::disabled(),
        );

        zeta.init(0.0, Direction::Forward).await?;
        assert_eq!(zeta.layout(), Some(Layout::SurfaceSeries));
        assert_eq!(zeta.stack().top().unwrap().timestamp(), 3600.0);

        // Depth is ignored for a surface field
        let value = zeta.sample(&GridCoordinate::new(3.0, 2.0, 2.6), 900.0).await?;
        assert_eq!(value, 0.75 * 3.0 + 0.25 * 13.0);

        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_field() {
        let u = volume_series(3, [20, 6, 3], |_, _, _, _| 1.0);
        let file = MemoryFile::new(vec![0.0, 100.0, 200.0], None).with_variable("u", u, true);
        let source = Arc::new(MemorySource::new().with_file("a.nc", file));
        let mut u = variable(&source, RegularGrid::new(20, 6, 2), &["a.nc"]);

        let result = u.init(0.0, Direction::Forward).await;
        match result {
            Err(Error::MalformedField {
                location, variable, ..
            }) => {
                assert_eq!(location, "a.nc");
                assert_eq!(variable, "u");
            }
            _ => panic!("expecting malformed field error"),
        }
        assert_eq!(u.state(), StackState::Uninitialized);
        assert_eq!(source.open_handles("a.nc"), 0);
    }

    #[tokio::test]
    async fn test_init_failure_releases_layers() {
        let source = Arc::new(
            MemorySource::new()
                .with_file("a.nc", ramp(&[0.0, 100.0], 0))
                .with_file("b.nc", ramp(&[200.0, 300.0], 2)),
        );
        // b.nc can be scanned but not opened again for its layer
        source.limit_opens("b.nc", 1);
        let mut u = DatasetVariable::new(
            "u",
            vec![String::from("a.nc"), String::from("b.nc")],
            Arc::clone(&source) as Arc<dyn Source>,
            Arc::new(RegularGrid::new(20, 6, 2)),
            [8, 1],
            3,
            Prefetcher::disabled(),
        );

        assert!(matches!(
            u.init(50.0, Direction::Forward).await,
            Err(Error::Source { .. })
        ));
        assert_eq!(u.state(), StackState::Uninitialized);
        assert_eq!(u.stack().len(), 0);
        assert_eq!(source.opens("a.nc"), 3);
        assert_eq!(source.open_handles("a.nc"), 0);
        assert_eq!(source.open_handles("b.nc"), 0);
    }

    #[tokio::test]
    async fn test_init_errors() {
        let source = Arc::new(MemorySource::new().with_file("a.nc", ramp(&[0.0, 100.0], 0)));

        let mut u = variable(&source, RegularGrid::new(20, 6, 2), &["missing.nc"]);
        assert!(matches!(
            u.init(0.0, Direction::Forward).await,
            Err(Error::Source { .. })
        ));

        let mut u = variable(&source, RegularGrid::new(20, 6, 2), &["a.nc"]);
        assert!(matches!(
            u.init(500.0, Direction::Forward).await,
            Err(Error::TimeNotFound { .. })
        ));

        assert!(matches!(
            u.sample(&GridCoordinate::new(1.0, 1.0, 0.0), 0.0).await,
            Err(Error::Uninitialized { .. })
        ));
        assert!(matches!(
            u.update(0.0, Direction::Forward).await,
            Err(Error::Uninitialized { .. })
        ));

        let mut v = DatasetVariable::new(
            "v",
            vec![String::from("a.nc")],
            Arc::clone(&source) as Arc<dyn Source>,
            Arc::new(RegularGrid::new(20, 6, 2)),
            [8, 1],
            2,
            Prefetcher::disabled(),
        );
        assert!(matches!(
            v.init(0.0, Direction::Forward).await,
            Err(Error::BadName { .. })
        ));
    }
}
