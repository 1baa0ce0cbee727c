//! Catalog of the series keys the data service currently offers.

use crate::series_key::SeriesKey;
use parking_lot::RwLock;
use std::sync::Arc;

/// Catalog handle shared between the chart group and whatever feed keeps it
/// up to date.
pub type SharedCatalog = Arc<RwLock<SeriesCatalog>>;

/// Ordered, de-duplicated set of available keys. Order matters: the first
/// base key is the default for new charts and for repairs.
#[derive(Clone, Debug, Default)]
pub struct SeriesCatalog {
    keys: Vec<SeriesKey>,
}

impl SeriesCatalog {
    pub fn new(keys: impl IntoIterator<Item = SeriesKey>) -> Self {
        let mut catalog = Self::default();
        for key in keys {
            catalog.insert(key);
        }
        catalog
    }

    pub fn shared(self) -> SharedCatalog {
        Arc::new(RwLock::new(self))
    }

    /// Returns `false` if the key was already present.
    pub fn insert(&mut self, key: SeriesKey) -> bool {
        if self.keys.contains(&key) {
            return false;
        }
        self.keys.push(key);
        true
    }

    pub fn remove(&mut self, key: &SeriesKey) -> bool {
        let before = self.keys.len();
        self.keys.retain(|k| k != key);
        self.keys.len() != before
    }

    pub fn contains(&self, key: &SeriesKey) -> bool {
        self.keys.contains(key)
    }

    pub fn first_base_key(&self) -> Option<&SeriesKey> {
        self.keys.iter().find(|k| k.is_base())
    }

    pub fn base_keys(&self) -> impl Iterator<Item = &SeriesKey> {
        self.keys.iter().filter(|k| k.is_base())
    }

    pub fn companions_of<'a>(&'a self, base: &'a SeriesKey) -> impl Iterator<Item = &'a SeriesKey> {
        crate::series_key::companions_of(base, self.keys.iter())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
