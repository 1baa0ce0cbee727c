//! Reconciliation engine
//!
//! Makes the runtime objects recorded in a [`RuntimeRegistry`] match a
//! [`ChartConfig`]. A pass runs four steps in a fixed order:
//!
//! 1. deletion: destroy series and panes nothing asks for anymore,
//! 2. data availability: start fetches for series without backing data,
//! 3. creation: create missing series whose data is ready,
//! 4. update: push only the style attributes that changed.
//!
//! Deletion strictly precedes creation so a pane freed in this pass can be
//! taken again by the creation step. Running the same pass twice on an
//! unchanged configuration issues no runtime calls the second time.

use crate::backend::{
    CandleStyle, ChartBackend, ChartHandle, PaneTarget, SeriesStyle, StylePatch,
};
use crate::data_service::FetchRequester;
use crate::data_types::{ChartConfig, PointPayload, SeriesData};
use crate::registry::{BaseEntry, DerivedEntry, FetchState, Placement, RuntimeRegistry, SlotKey};
use crate::series_key::SeriesKey;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// What one pass did to the runtime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub charts_created: usize,
    pub created: usize,
    pub destroyed: usize,
    pub updated: usize,
    pub panes_created: usize,
    pub panes_destroyed: usize,
    pub fetches_requested: usize,
    /// Active series still waiting for data. Not a runtime change.
    pub deferred: usize,
}

impl ReconcileReport {
    /// True when the pass touched neither the runtime nor the fetch queue.
    pub fn is_noop(&self) -> bool {
        Self {
            deferred: 0,
            ..*self
        } == Self::default()
    }

    /// Accumulates the counters of a follow-up pass.
    pub fn merge(&mut self, other: &Self) {
        self.charts_created += other.charts_created;
        self.created += other.created;
        self.destroyed += other.destroyed;
        self.updated += other.updated;
        self.panes_created += other.panes_created;
        self.panes_destroyed += other.panes_destroyed;
        self.fetches_requested += other.fetches_requested;
        // Only the last pass tells how many series still wait.
        self.deferred = other.deferred;
    }
}

struct DesiredSlot {
    placement: Placement,
    style: SeriesStyle,
}

fn desired_slots(config: &ChartConfig) -> HashMap<SlotKey, DesiredSlot> {
    let mut slots = HashMap::new();
    for entry in config.active_derived() {
        let placement = Placement::from_main_flag(entry.in_main_pane);
        for value in &entry.values {
            slots
                .entry(SlotKey::new(entry.key.clone(), value.value_key.clone()))
                .or_insert(DesiredSlot {
                    placement,
                    style: SeriesStyle {
                        visible: entry.visible,
                        color: value.color,
                        render_kind: value.render_kind,
                    },
                });
        }
    }
    slots
}

fn desired_candle_style(config: &ChartConfig) -> CandleStyle {
    CandleStyle {
        visible: config.base.visible,
        up_color: config.base.up_color,
        down_color: config.base.down_color,
    }
}

/// Brings the runtime state of one chart in line with `config`.
pub fn reconcile<B: ChartBackend + ?Sized>(
    config: &ChartConfig,
    registry: &mut RuntimeRegistry,
    backend: &mut B,
    fetcher: &mut dyn FetchRequester,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    let chart = match registry.chart() {
        Some(chart) => chart,
        None => {
            let chart = backend.create_chart(config.id);
            debug!("{}: created runtime chart {}", config.id, chart);
            registry.set_chart(chart);
            report.charts_created += 1;
            chart
        }
    };

    let desired = desired_slots(config);

    delete_pass(config, &desired, registry, backend, chart, &mut report);
    request_missing_data(config, registry, fetcher, &mut report);
    create_pass(config, &desired, registry, backend, chart, &mut report);
    update_pass(config, &desired, registry, backend, &mut report);

    debug_assert!(
        registry.check_invariant(config).is_empty(),
        "registry out of sync after reconcile"
    );
    if !report.is_noop() {
        debug!("{}: reconciled {:?}", config.id, report);
    }
    report
}

fn delete_pass<B: ChartBackend + ?Sized>(
    config: &ChartConfig,
    desired: &HashMap<SlotKey, DesiredSlot>,
    registry: &mut RuntimeRegistry,
    backend: &mut B,
    chart: ChartHandle,
    report: &mut ReconcileReport,
) {
    for slot in registry.slot_keys() {
        let stale = match (desired.get(&slot), registry.derived(&slot)) {
            (Some(want), Some(have)) => {
                want.placement != have.placement
                    || want.style.render_kind != have.applied.render_kind
            }
            (None, Some(_)) => true,
            (_, None) => false,
        };
        if stale {
            if let Some(entry) = registry.take_derived(&slot) {
                backend.destroy_series(chart, entry.handle);
                debug!("{}: destroyed {} ({})", config.id, slot, entry.handle);
                report.destroyed += 1;
            }
        }
    }

    for key in registry.pane_keys() {
        let wants_pane = desired
            .iter()
            .any(|(slot, d)| slot.series == key && d.placement == Placement::Secondary);
        if !wants_pane && !registry.has_slots_for(&key) {
            if let Some(pane) = registry.take_pane(&key) {
                backend.destroy_pane(chart, pane);
                debug!("{}: destroyed {} of {}", config.id, pane, key);
                report.panes_destroyed += 1;
            }
        }
    }

    // Base series: a different key means a full replace.
    let stale_base = registry
        .base()
        .filter(|b| b.key != config.base.key)
        .map(|b| b.key.clone());
    if let Some(old_key) = stale_base {
        if let Some(entry) = registry.take_base() {
            backend.destroy_series(chart, entry.handle);
            debug!("{}: destroyed base {} ({})", config.id, old_key, entry.handle);
            report.destroyed += 1;
        }
    }

    // Data of keys the configuration no longer mentions at all. Tombstoned
    // entries keep theirs so a restore does not refetch.
    let known: HashSet<&SeriesKey> = config
        .derived
        .iter()
        .map(|d| &d.key)
        .chain(std::iter::once(&config.base.key))
        .collect();
    let orphaned: Vec<SeriesKey> = registry
        .data()
        .keys()
        .chain(registry.fetch_keys().iter())
        .filter(|k| !known.contains(k))
        .cloned()
        .collect();
    for key in orphaned {
        registry.data_mut().remove(&key);
        registry.clear_fetch(&key);
    }
}

fn request_missing_data(
    config: &ChartConfig,
    registry: &mut RuntimeRegistry,
    fetcher: &mut dyn FetchRequester,
    report: &mut ReconcileReport,
) {
    let wanted = std::iter::once(&config.base.key).chain(config.active_derived().map(|d| &d.key));
    for key in wanted {
        if registry.data().contains(key) {
            continue;
        }
        report.deferred += 1;
        match registry.fetch_state(key) {
            Some(FetchState::InFlight) => continue,
            Some(FetchState::Failed { attempts }) => {
                if !fetcher.allows_retry(attempts) {
                    continue;
                }
                debug!("{}: retrying {} after {} failed attempt(s)", config.id, key, attempts);
            }
            None => {}
        }
        fetcher.request(key);
        registry.mark_in_flight(key.clone());
        report.fetches_requested += 1;
    }
}

fn create_pass<B: ChartBackend + ?Sized>(
    config: &ChartConfig,
    desired: &HashMap<SlotKey, DesiredSlot>,
    registry: &mut RuntimeRegistry,
    backend: &mut B,
    chart: ChartHandle,
    report: &mut ReconcileReport,
) {
    if registry.base().is_none() {
        if let Some(data) = registry.data().get(&config.base.key) {
            let style = desired_candle_style(config);
            let handle = backend.create_candle_series(chart, &style);
            match data.candles() {
                Some(candles) => backend.set_candles(handle, candles),
                None => {
                    warn!("{}: base {} has no candle data", config.id, config.base.key);
                    backend.set_candles(handle, &[]);
                }
            }
            debug!("{}: created base {} ({})", config.id, config.base.key, handle);
            registry.set_base(BaseEntry {
                key: config.base.key.clone(),
                handle,
                applied: style,
            });
            report.created += 1;
        }
    }

    for entry in config.active_derived() {
        if !registry.data().contains(&entry.key) {
            continue;
        }
        for value in &entry.values {
            let slot = SlotKey::new(entry.key.clone(), value.value_key.clone());
            if registry.derived(&slot).is_some() {
                continue;
            }
            let Some(want) = desired.get(&slot) else {
                continue;
            };

            let target = match want.placement {
                Placement::Main => PaneTarget::Main,
                Placement::Secondary => match registry.pane(&entry.key) {
                    Some(pane) => PaneTarget::Pane(pane),
                    None => {
                        let pane = backend.create_pane(chart);
                        debug!("{}: created {} for {}", config.id, pane, entry.key);
                        registry.insert_pane(entry.key.clone(), pane);
                        report.panes_created += 1;
                        PaneTarget::Pane(pane)
                    }
                },
            };

            let handle = backend.create_value_series(chart, target, &want.style);
            let points = registry
                .data()
                .get(&entry.key)
                .and_then(|d| d.points(&value.value_key))
                .unwrap_or(&[]);
            backend.set_points(handle, points);
            debug!("{}: created {} ({})", config.id, slot, handle);
            registry.insert_derived(
                slot,
                DerivedEntry {
                    handle,
                    placement: want.placement,
                    applied: want.style,
                },
            );
            report.created += 1;
        }
    }
}

fn update_pass<B: ChartBackend + ?Sized>(
    config: &ChartConfig,
    desired: &HashMap<SlotKey, DesiredSlot>,
    registry: &mut RuntimeRegistry,
    backend: &mut B,
    report: &mut ReconcileReport,
) {
    let candle_style = desired_candle_style(config);
    if let Some(base) = registry.base_mut() {
        let patch = StylePatch::for_candles(&base.applied, &candle_style);
        if !patch.is_empty() {
            backend.apply_style(base.handle, &patch);
            base.applied = candle_style;
            report.updated += 1;
        }
    }

    for slot in registry.slot_keys() {
        let Some(want) = desired.get(&slot) else {
            continue;
        };
        let Some(entry) = registry.derived_mut(&slot) else {
            continue;
        };
        let patch = StylePatch::for_series(&entry.applied, &want.style);
        if !patch.is_empty() {
            backend.apply_style(entry.handle, &patch);
            entry.applied = want.style;
            report.updated += 1;
        }
    }
}

/// Pushes the full backing data of `key` to every runtime series showing it.
/// Used when fresh data replaces what an existing series was created with.
pub fn push_series_data<B: ChartBackend + ?Sized>(
    registry: &RuntimeRegistry,
    backend: &mut B,
    key: &SeriesKey,
) -> usize {
    let Some(data) = registry.data().get(key) else {
        return 0;
    };
    let mut pushed = 0;
    if let (Some(base), SeriesData::Candles(candles)) = (registry.base(), data) {
        if &base.key == key {
            backend.set_candles(base.handle, candles);
            pushed += 1;
        }
    }
    for (slot, entry) in registry.slots() {
        if &slot.series != key {
            continue;
        }
        backend.set_points(entry.handle, data.points(&slot.value).unwrap_or(&[]));
        pushed += 1;
    }
    pushed
}

/// Forwards one accepted streaming point to the runtime series showing it.
pub fn push_point<B: ChartBackend + ?Sized>(
    registry: &RuntimeRegistry,
    backend: &mut B,
    key: &SeriesKey,
    value_key: Option<&str>,
    payload: PointPayload,
) -> bool {
    match payload {
        PointPayload::Candle(candle) => match registry.base() {
            Some(base) if &base.key == key => {
                backend.update_candle(base.handle, candle);
                true
            }
            _ => false,
        },
        PointPayload::Point(point) => {
            let Some(value_key) = value_key else {
                return false;
            };
            match registry.derived(&SlotKey::new(key.clone(), value_key)) {
                Some(entry) => {
                    backend.update_point(entry.handle, point);
                    true
                }
                None => false,
            }
        }
    }
}
