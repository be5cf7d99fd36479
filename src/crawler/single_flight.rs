//! Keyed single-flight memo
//!
//! Concurrent callers asking for the same key share one lazily started
//! future and all observe its result. Entries are kept after completion, so
//! later callers get the memoised value without starting any work.

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;

/// Future shared by every caller of one key
pub type SharedFuture<V> = Shared<BoxFuture<'static, V>>;

pub struct SingleFlight<K, V> {
    entries: Mutex<HashMap<K, SharedFuture<V>>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the future for `key`, creating it with `start` if absent
    ///
    /// The lookup and the insertion happen under one lock, so `start` is
    /// called at most once per key. The created future does not run until
    /// the first caller awaits it.
    pub fn get_or_start<F, Fut>(&self, key: K, start: F) -> SharedFuture<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        self.entries
            .lock()
            .unwrap()
            .entry(key)
            .or_insert_with(|| start().boxed().shared())
            .clone()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
