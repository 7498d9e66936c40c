use std::{collections::VecDeque, sync::Arc};

use crate::{prefetch::Prefetcher, store::TileStore, time::Direction};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackState {
    /// Nothing loaded yet
    Uninitialized,

    Ready,

    /// Ran out of time ranks. The last window is kept but can't be sampled.
    Exhausted,
}

/// A sliding window of consecutive snapshots of one field.
///
/// Holds up to `nlayer` tile stores ordered in the direction of time. Layers 0 and 1 bracket the
/// interpolation interval. Pushing onto a full stack evicts the oldest store, which is cleared and
/// so releases its file.
///
pub struct TimeStack {
    nlayer: usize,
    layers: VecDeque<Arc<TileStore>>,
    state: StackState,
    prefetcher: Prefetcher,
}

impl TimeStack {
    pub fn new(nlayer: usize, prefetcher: Prefetcher) -> Self {
        let nlayer = nlayer.max(1);

        Self {
            nlayer,
            layers: VecDeque::with_capacity(nlayer),
            state: StackState::Uninitialized,
            prefetcher,
        }
    }

    pub fn nlayer(&self) -> usize {
        self.nlayer
    }

    pub fn state(&self) -> StackState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_full(&self) -> bool {
        self.layers.len() == self.nlayer
    }

    /// Layer `index`, counting from the oldest
    pub fn layer(&self, index: usize) -> Option<&Arc<TileStore>> {
        self.layers.get(index)
    }

    pub fn layers(&self) -> impl Iterator<Item = &Arc<TileStore>> {
        self.layers.iter()
    }

    /// The newest layer
    pub fn top(&self) -> Option<&Arc<TileStore>> {
        self.layers.back()
    }

    pub fn prefetcher(&self) -> &Prefetcher {
        &self.prefetcher
    }

    /// Put `store` on top of the stack.
    ///
    /// If the stack is full the oldest layer is evicted first. The new store starts loading, in
    /// the background, the tiles that are loaded in the layer directly below it.
    ///
    pub async fn push(&mut self, store: Arc<TileStore>) {
        let carried = self.top().map(|below| below.resident_tags());

        if self.is_full() {
            if let Some(oldest) = self.layers.pop_front() {
                tracing::debug!(
                    variable = %oldest.variable(),
                    rank = oldest.rank(),
                    timestamp = oldest.timestamp(),
                    "evicting time layer"
                );
                oldest.clear().await;
            }
        }

        if let Some(tags) = carried {
            store.prefetch(tags, &self.prefetcher);
        }
        self.layers.push_back(store);
    }

    /// Mark the window as filled and ready for sampling.
    pub fn ready(&mut self) {
        self.state = StackState::Ready;
    }

    /// Mark the stack as having run out of data. There's no way back from this.
    pub fn exhaust(&mut self) {
        if self.state != StackState::Exhausted {
            if let Some(top) = self.top() {
                tracing::info!(
                    variable = %top.variable(),
                    timestamp = top.timestamp(),
                    "no more time ranks"
                );
            }
        }
        self.state = StackState::Exhausted;
    }

    /// Whether `time` has moved past the end of the current interpolation interval.
    ///
    /// The interval ends at layer 1, or at layer 0 for a single layer stack. Only a ready stack
    /// ever needs an update.
    ///
    pub fn needs_update(&self, time: f64, direction: Direction) -> bool {
        if self.state != StackState::Ready {
            return false;
        }

        let index = if self.nlayer == 1 { 0 } else { 1 };
        match self.layer(index) {
            Some(layer) => direction.signum() * time >= direction.signum() * layer.timestamp(),
            None => false,
        }
    }

    /// Evict every layer.
    pub async fn clear(&mut self) {
        for store in self.layers.drain(..) {
            store.clear().await;
        }
        self.state = StackState::Uninitialized;
    }
}
