/// A load-once object cache.
///
use std::{
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    mem,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use futures::{
    channel::oneshot::{channel, Sender},
    future::BoxFuture,
};

use parking_lot::Mutex;

/// A cache of immutable objects that are each loaded at most once.
///
/// When interrogating the cache with ``get``, a ``load`` function is passed in that is used to load
/// the object from the underlying data source in the event of a cache miss. If multiple requests
/// for the same object come in while it is being loaded, the object is only loaded once, with all
/// requests waiting for the single load to finish before returning to their respective callers.
/// Requests for other keys are never blocked by an ongoing load.
///
/// Objects are never evicted individually. The owner drops them all at once with ``clear``. A load
/// that was started before ``clear`` still hands its object to the tasks waiting for it, but the
/// object isn't stored.
///
pub(crate) struct Cache<K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    /// Loaded objects
    entries: Mutex<HashMap<K, Arc<V>>>,

    /// Synchronization objects for objects that are currently being loaded from the underlying
    /// data source.
    loaders: Mutex<HashMap<K, Arc<Loader<V>>>>,

    /// Bumped by every ``clear``
    generation: AtomicU64,
}

/// A trait for objects that can be cached
///
/// Cacheable objects must be able to self report their size via the ``size`` method.
///
pub trait Cacheable: Sized {
    /// Return the approximate number of bytes held in RAM
    fn size(&self) -> u64;
}

/// A structure used to synchronize an object's load operation among all the tasks waiting for
/// that object.
struct Loader<V> {
    state: Mutex<LoadState<V>>,
}

enum LoadState<V> {
    /// Still loading. Holds the tasks waiting for the object.
    Pending(Vec<Sender<Arc<V>>>),

    Done(Arc<V>),

    /// The loading task was dropped before it finished. Waiters have to try again.
    Abandoned,
}

enum Claim<V> {
    Cached(Arc<V>),
    First(Arc<Loader<V>>),
    Wait(Arc<Loader<V>>),
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            loaders: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Get an object by key
    ///
    /// If object isn't in the cache, will call ``load`` to load the object and then store it in
    /// the cache. If the same object is already being loaded in another task, this will wait for
    /// that load to finish and then return.
    ///
    pub async fn get<'a, L>(&self, key: &K, load: L) -> Arc<V>
    where
        L: FnOnce(K) -> BoxFuture<'a, V>,
    {
        loop {
            if let Some(object) = self.lookup(key) {
                return object;
            }

            match self.claim(key) {
                Claim::Cached(object) => return object,
                Claim::First(loader) => {
                    // We're the first task to try and load this object, so we'll load it here
                    let generation = self.generation.load(Ordering::SeqCst);
                    let guard = LoadGuard {
                        cache: self,
                        key: *key,
                        loader,
                        finished: false,
                    };
                    let object = Arc::new(load(*key).await);
                    {
                        let mut entries = self.entries.lock();
                        if self.generation.load(Ordering::SeqCst) == generation {
                            entries.insert(*key, Arc::clone(&object));
                        }
                    }
                    guard.finish(Arc::clone(&object));

                    return object;
                }
                Claim::Wait(loader) => {
                    // Another task is loading this object already, just wait for it to finish
                    if let Some(object) = loader.wait().await {
                        return object;
                    }
                }
            }
        }
    }

    /// Check if an object is already stored in the cache.
    ///
    pub fn lookup(&self, key: &K) -> Option<Arc<V>> {
        self.entries.lock().get(key).cloned()
    }

    /// Keys of all loaded objects
    pub fn keys(&self) -> Vec<K> {
        self.entries.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Sum of sizes of all loaded objects
    pub fn size(&self) -> u64 {
        self.entries.lock().values().map(|object| object.size()).sum()
    }

    /// Drop all loaded objects. Loads in progress still complete but their objects are not stored.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        entries.clear();
    }

    fn claim(&self, key: &K) -> Claim<V> {
        let mut loaders = self.loaders.lock();
        if let Some(loader) = loaders.get(key) {
            return Claim::Wait(Arc::clone(loader));
        }

        // A load may have finished between our lookup and taking the loaders lock. Loads store
        // their object before giving up their loader, so checking again here is enough.
        if let Some(object) = self.lookup(key) {
            return Claim::Cached(object);
        }

        let loader = Arc::new(Loader::new());
        loaders.insert(*key, Arc::clone(&loader));

        Claim::First(loader)
    }
}

/// Releases a claimed load, also when the loading future is dropped halfway.
struct LoadGuard<'c, K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    cache: &'c Cache<K, V>,
    key: K,
    loader: Arc<Loader<V>>,
    finished: bool,
}

impl<'c, K, V> LoadGuard<'c, K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    fn finish(mut self, object: Arc<V>) {
        self.loader.finish(object);
        self.cache.loaders.lock().remove(&self.key);
        self.finished = true;
    }
}

impl<'c, K, V> Drop for LoadGuard<'c, K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    fn drop(&mut self) {
        if !self.finished {
            self.cache.loaders.lock().remove(&self.key);
            self.loader.abandon();
        }
    }
}

impl<V> Loader<V> {
    fn new() -> Self {
        Loader {
            state: Mutex::new(LoadState::Pending(Vec::new())),
        }
    }

    /// Inform any waiting tasks that the object has been loaded.
    ///
    fn finish(&self, object: Arc<V>) {
        let state = mem::replace(&mut *self.state.lock(), LoadState::Done(Arc::clone(&object)));
        if let LoadState::Pending(waiters) = state {
            for waiter in waiters {
                // A waiter that went away doesn't need the object anymore
                let _ = waiter.send(Arc::clone(&object));
            }
        }
    }

    /// Wake up waiting tasks empty handed, so they can retry the load themselves.
    ///
    fn abandon(&self) {
        let state = mem::replace(&mut *self.state.lock(), LoadState::Abandoned);
        drop(state);
    }

    /// Wait for the loading task to finish loading the object, or give up trying.
    async fn wait(&self) -> Option<Arc<V>> {
        let receive = {
            let mut state = self.state.lock();
            match &mut *state {
                LoadState::Done(object) => return Some(Arc::clone(object)),
                LoadState::Abandoned => return None,
                LoadState::Pending(waiters) => {
                    let (send, receive) = channel::<Arc<V>>();
                    waiters.push(send);

                    receive
                }
            }
        };

        receive.await.ok()
    }
}
