//! Interfaces to the data side: historical fetches and streaming updates.

use crate::data_types::{PointPayload, SeriesData, UpdateMode, ValueKey};
use crate::series_key::SeriesKey;
use futures::future::{FutureExt, LocalBoxFuture};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

/// Provides the backing data of a series. Each fetch is an independent future
/// so completions may arrive in any order.
pub trait DataService {
    fn fetch(&self, key: &SeriesKey) -> LocalBoxFuture<'static, eyre::Result<SeriesData>>;
}

/// Sink the reconciler uses to start a fetch for a key that has no data yet.
pub trait FetchRequester {
    fn request(&mut self, key: &SeriesKey);

    /// Whether a key that already failed `failed_attempts` times is fetched again.
    fn allows_retry(&self, _failed_attempts: u32) -> bool {
        true
    }
}

/// One message of the streaming channel.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamUpdate {
    pub key: SeriesKey,
    /// `None` for klines.
    pub value_key: Option<ValueKey>,
    pub payload: PointPayload,
    pub mode: UpdateMode,
}

/// Data service answering from memory. Keys marked as failing return an error.
#[derive(Default)]
pub struct MemoryDataService {
    series: RefCell<HashMap<SeriesKey, SeriesData>>,
    failing: RefCell<HashSet<SeriesKey>>,
}

impl MemoryDataService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: SeriesKey, data: SeriesData) {
        self.series.borrow_mut().insert(key, data);
    }

    pub fn set_failing(&self, key: SeriesKey, failing: bool) {
        let mut set = self.failing.borrow_mut();
        if failing {
            set.insert(key);
        } else {
            set.remove(&key);
        }
    }
}

impl DataService for MemoryDataService {
    fn fetch(&self, key: &SeriesKey) -> LocalBoxFuture<'static, eyre::Result<SeriesData>> {
        let result = if self.failing.borrow().contains(key) {
            Err(eyre::eyre!("fetch of {} failed", key))
        } else {
            self.series
                .borrow()
                .get(key)
                .cloned()
                .ok_or_else(|| eyre::eyre!("no data for {}", key))
        };
        futures::future::ready(result).boxed_local()
    }
}
