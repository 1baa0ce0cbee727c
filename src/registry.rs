//! Runtime reference registry
//!
//! Holds the live runtime handles of one chart instance, keyed by stable
//! series keys (never by position), plus the raw data behind them. The
//! reconciler is the only writer; everything else reads.

use crate::backend::{CandleStyle, ChartHandle, PaneHandle, SeriesHandle, SeriesStyle};
use crate::data_types::{BackingData, ChartConfig, ChartId, ValueKey};
use crate::series_key::SeriesKey;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::warn;

/// Identifies one runtime series: an output of a derived series.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub series: SeriesKey,
    pub value: ValueKey,
}

impl SlotKey {
    pub fn new(series: SeriesKey, value: impl Into<ValueKey>) -> Self {
        Self {
            series,
            value: value.into(),
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.series, self.value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Placement {
    Main,
    Secondary,
}

impl Placement {
    pub fn from_main_flag(in_main_pane: bool) -> Self {
        if in_main_pane {
            Self::Main
        } else {
            Self::Secondary
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BaseEntry {
    pub key: SeriesKey,
    pub handle: SeriesHandle,
    pub applied: CandleStyle,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DerivedEntry {
    pub handle: SeriesHandle,
    pub placement: Placement,
    /// Last style pushed to the runtime.
    pub applied: SeriesStyle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchState {
    InFlight,
    Failed { attempts: u32 },
}

/// Handles forgotten by [`RuntimeRegistry::release_all`].
#[derive(Debug, Default)]
pub struct Released {
    pub chart: Option<ChartHandle>,
    pub series: Vec<SeriesHandle>,
    pub panes: Vec<PaneHandle>,
}

#[derive(Debug)]
pub struct RuntimeRegistry {
    chart_id: ChartId,
    chart: Option<ChartHandle>,
    base: Option<BaseEntry>,
    derived: HashMap<SlotKey, DerivedEntry>,
    panes: HashMap<SeriesKey, PaneHandle>,
    data: BackingData,
    fetches: HashMap<SeriesKey, FetchState>,
    failures: HashMap<SeriesKey, u32>,
}

impl RuntimeRegistry {
    pub fn new(chart_id: ChartId) -> Self {
        Self {
            chart_id,
            chart: None,
            base: None,
            derived: HashMap::new(),
            panes: HashMap::new(),
            data: BackingData::new(),
            fetches: HashMap::new(),
            failures: HashMap::new(),
        }
    }

    pub fn chart_id(&self) -> ChartId {
        self.chart_id
    }

    pub fn chart(&self) -> Option<ChartHandle> {
        self.chart
    }

    pub fn set_chart(&mut self, handle: ChartHandle) {
        if let Some(old) = self.chart.replace(handle) {
            warn!("{}: chart handle {} replaced by {}", self.chart_id, old, handle);
        }
    }

    pub fn base(&self) -> Option<&BaseEntry> {
        self.base.as_ref()
    }

    pub fn base_mut(&mut self) -> Option<&mut BaseEntry> {
        self.base.as_mut()
    }

    pub fn set_base(&mut self, entry: BaseEntry) {
        if let Some(old) = self.base.replace(entry) {
            warn!("{}: base series {} overwritten", self.chart_id, old.handle);
        }
    }

    pub fn take_base(&mut self) -> Option<BaseEntry> {
        let base = self.base.take();
        if base.is_none() {
            warn!("{}: no base series to remove", self.chart_id);
        }
        base
    }

    pub fn derived(&self, slot: &SlotKey) -> Option<&DerivedEntry> {
        self.derived.get(slot)
    }

    pub fn derived_mut(&mut self, slot: &SlotKey) -> Option<&mut DerivedEntry> {
        self.derived.get_mut(slot)
    }

    pub fn insert_derived(&mut self, slot: SlotKey, entry: DerivedEntry) {
        if self.derived.contains_key(&slot) {
            warn!("{}: {} already has a runtime series, keeping it", self.chart_id, slot);
            return;
        }
        self.derived.insert(slot, entry);
    }

    pub fn take_derived(&mut self, slot: &SlotKey) -> Option<DerivedEntry> {
        let entry = self.derived.remove(slot);
        if entry.is_none() {
            warn!("{}: no runtime series for {}", self.chart_id, slot);
        }
        entry
    }

    pub fn slots(&self) -> impl Iterator<Item = (&SlotKey, &DerivedEntry)> {
        self.derived.iter()
    }

    /// Sorted so passes over the registry are deterministic.
    pub fn slot_keys(&self) -> Vec<SlotKey> {
        let mut keys: Vec<SlotKey> = self.derived.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn has_slots_for(&self, key: &SeriesKey) -> bool {
        self.derived.keys().any(|s| &s.series == key)
    }

    pub fn pane(&self, key: &SeriesKey) -> Option<PaneHandle> {
        self.panes.get(key).copied()
    }

    pub fn insert_pane(&mut self, key: SeriesKey, pane: PaneHandle) {
        if let Some(old) = self.panes.insert(key.clone(), pane) {
            warn!("{}: pane {} for {} replaced by {}", self.chart_id, old, key, pane);
        }
    }

    pub fn take_pane(&mut self, key: &SeriesKey) -> Option<PaneHandle> {
        let pane = self.panes.remove(key);
        if pane.is_none() {
            warn!("{}: no pane for {}", self.chart_id, key);
        }
        pane
    }

    pub fn pane_keys(&self) -> Vec<SeriesKey> {
        let mut keys: Vec<SeriesKey> = self.panes.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn data(&self) -> &BackingData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut BackingData {
        &mut self.data
    }

    pub fn fetch_state(&self, key: &SeriesKey) -> Option<FetchState> {
        self.fetches.get(key).copied()
    }

    pub fn mark_in_flight(&mut self, key: SeriesKey) {
        self.fetches.insert(key, FetchState::InFlight);
    }

    /// Failure counts survive the retry's `InFlight` state.
    pub fn mark_failed(&mut self, key: SeriesKey) {
        let attempts = self.failures.entry(key.clone()).or_default();
        *attempts += 1;
        let attempts = *attempts;
        self.fetches.insert(key, FetchState::Failed { attempts });
    }

    pub fn clear_fetch(&mut self, key: &SeriesKey) {
        self.fetches.remove(key);
        self.failures.remove(key);
    }

    pub fn fetch_keys(&self) -> Vec<SeriesKey> {
        self.fetches.keys().cloned().collect()
    }

    /// Base plus derived runtime series.
    pub fn handle_count(&self) -> usize {
        self.derived.len() + usize::from(self.base.is_some())
    }

    pub fn pane_count(&self) -> usize {
        self.panes.len()
    }

    /// Keys held by the registry that have no active entry in `config`.
    pub fn check_invariant(&self, config: &ChartConfig) -> Vec<SeriesKey> {
        let active: HashSet<&SeriesKey> = config.active_derived().map(|d| &d.key).collect();
        let mut stray: Vec<SeriesKey> = self
            .derived
            .keys()
            .map(|s| &s.series)
            .chain(self.panes.keys())
            .filter(|k| !active.contains(k))
            .cloned()
            .collect();
        if let Some(base) = &self.base {
            if base.key != config.base.key {
                stray.push(base.key.clone());
            }
        }
        stray.sort();
        stray.dedup();
        stray
    }

    /// Forgets every runtime handle without touching the runtime. Used on
    /// teardown, after the chart itself has been disposed.
    pub fn release_all(&mut self) -> Released {
        let mut series: Vec<SeriesHandle> = self.derived.drain().map(|(_, e)| e.handle).collect();
        series.extend(self.base.take().map(|b| b.handle));
        Released {
            chart: self.chart.take(),
            series,
            panes: self.panes.drain().map(|(_, p)| p).collect(),
        }
    }
}
