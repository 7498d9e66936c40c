use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use futures::{lock::Mutex as AsyncMutex, FutureExt};
use ndarray::ArrayD;

use crate::{
    cache::Cache,
    errors::{Error, Result},
    prefetch::Prefetcher,
    source::{Layout, SourceFile},
    tile::Tile,
    tiling::{TileSpan, TileTag, Tiling},
};

/// Produces the values of one tile of a field snapshot.
///
#[async_trait]
pub trait TileLoader: Send + Sync {
    /// Read the `span.len()` values covered by `span`, in z, y, x order.
    async fn load(&self, span: &TileSpan) -> Result<ArrayD<f64>>;

    /// Release whatever the loader holds on to. Called exactly once, after which `load` is
    /// expected to fail.
    async fn close(&self) -> Result<()>;
}

/// The tiles of one variable at one time rank.
///
/// Tiles are loaded on first use and kept until the store is cleared. However many tasks ask for
/// the same tile at once, it's only read once. A tile that can't be read is logged and stored as
/// masked, so every value in it is NaN.
///
pub struct TileStore {
    variable: String,
    tiling: Tiling,
    rank: usize,
    timestamp: f64,
    cache: Cache<TileTag, Tile>,
    loader: Box<dyn TileLoader>,
    closed: AtomicBool,
}

impl TileStore {
    pub fn new(
        variable: impl Into<String>,
        tiling: Tiling,
        rank: usize,
        timestamp: f64,
        loader: Box<dyn TileLoader>,
    ) -> Self {
        Self {
            variable: variable.into(),
            tiling,
            rank,
            timestamp,
            cache: Cache::new(),
            loader,
            closed: AtomicBool::new(false),
        }
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    /// Number of levels along z
    pub fn depth(&self) -> usize {
        self.tiling.shape()[2]
    }

    /// Time rank within the file this store reads from
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Time of this snapshot, in seconds
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    /// Get the value at grid index `(i, j, k)`.
    ///
    /// Loads the containing tile if it isn't loaded yet. Indices outside the field yield NaN.
    ///
    pub async fn get(self: &Arc<Self>, i: usize, j: usize, k: usize) -> f64 {
        let tile = self.tile(self.tiling.tag(i, j, k)).await;
        if tile.span().contains(i, j, k) {
            tile.get(i, j, k)
        } else {
            f64::NAN
        }
    }

    /// Get a tile, loading it if needed.
    ///
    /// A cleared store has nothing left to read from and hands out masked tiles without caching
    /// them.
    ///
    pub async fn tile(self: &Arc<Self>, tag: TileTag) -> Arc<Tile> {
        if self.is_closed() {
            return Arc::new(Tile::masked(self.tiling.span(tag)));
        }
        let store = Arc::clone(self);
        let load = |tag| async move { store.load_tile(tag).await }.boxed();

        self.cache.get(&tag, load).await
    }

    /// Start loading `tags` in the background.
    ///
    /// Tiles already loaded are skipped. Returns right away.
    ///
    pub fn prefetch(self: &Arc<Self>, tags: Vec<TileTag>, prefetcher: &Prefetcher) {
        if !prefetcher.is_enabled() || self.is_closed() {
            return;
        }

        for tag in tags {
            if tag >= self.tiling.len() || self.cache.lookup(&tag).is_some() {
                continue;
            }
            let store = Arc::clone(self);
            prefetcher.spawn(async move {
                store.tile(tag).await;
            });
        }
    }

    /// Tags of all tiles loaded so far, in ascending order
    pub fn resident_tags(&self) -> Vec<TileTag> {
        let mut tags = self.cache.keys();
        tags.sort_unstable();

        tags
    }

    /// Approximate number of bytes held by loaded tiles
    pub fn resident_bytes(&self) -> u64 {
        self.cache.size()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drop all tiles and release the underlying file.
    ///
    /// The file is only ever closed once, however many times this is called. Loads still running
    /// or queued for prefetch don't put tiles back.
    ///
    pub async fn clear(&self) {
        self.cache.clear();
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(err) = self.loader.close().await {
            tracing::warn!(
                variable = %self.variable,
                rank = self.rank,
                "failed to close source: {err}"
            );
        }
        tracing::debug!(variable = %self.variable, rank = self.rank, "cleared tile store");
    }

    async fn load_tile(&self, tag: TileTag) -> Tile {
        let span = self.tiling.span(tag);
        match self.loader.load(&span).await {
            Ok(values) => {
                let shape = values.shape().to_vec();
                match Tile::new(span, values) {
                    Some(tile) => {
                        tracing::debug!(
                            variable = %self.variable,
                            rank = self.rank,
                            tag,
                            "loaded tile"
                        );
                        tile
                    }
                    None => {
                        tracing::error!(
                            variable = %self.variable,
                            rank = self.rank,
                            tag,
                            "read {shape:?} values for a tile spanning {:?}, masking tile",
                            span.extent
                        );
                        Tile::masked(span)
                    }
                }
            }
            Err(err) if self.is_closed() => {
                tracing::debug!(
                    variable = %self.variable,
                    rank = self.rank,
                    tag,
                    "store cleared while loading tile: {err}"
                );
                Tile::masked(span)
            }
            Err(err) => {
                tracing::error!(
                    variable = %self.variable,
                    rank = self.rank,
                    tag,
                    "failed to read tile, masking it: {err}"
                );
                Tile::masked(span)
            }
        }
    }
}

/// Loads tiles of a variable at one time rank from an open dataset file.
///
/// The file handle belongs to this loader alone. Reads through it are serialized.
///
pub struct FileTiles {
    location: String,
    variable: String,
    layout: Layout,
    rank: usize,
    offset: [usize; 2],
    file: AsyncMutex<Option<Box<dyn SourceFile>>>,
}

impl FileTiles {
    /// `offset` is the grid's `[i0, j0]` sub-domain offset.
    pub fn new(
        file: Box<dyn SourceFile>,
        variable: impl Into<String>,
        layout: Layout,
        rank: usize,
        offset: [usize; 2],
    ) -> Self {
        Self {
            location: file.location().to_string(),
            variable: variable.into(),
            layout,
            rank,
            offset,
            file: AsyncMutex::new(Some(file)),
        }
    }
}

#[async_trait]
impl TileLoader for FileTiles {
    async fn load(&self, span: &TileSpan) -> Result<ArrayD<f64>> {
        let (origin, count) = self
            .layout
            .hyperslab(self.rank, self.offset, span.origin, span.extent);

        let mut file = self.file.lock().await;
        match file.as_mut() {
            Some(file) => file.read(&self.variable, &origin, &count).await,
            None => Err(Error::Source {
                location: self.location.clone(),
                message: String::from("file has been closed"),
            }),
        }
    }

    async fn close(&self) -> Result<()> {
        let file = self.file.lock().await.take();
        match file {
            Some(file) => file.close().await,
            None => Ok(()),
        }
    }
}
