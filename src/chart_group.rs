//! Chart group orchestration
//!
//! A [`ChartGroup`] owns the configurations of a set of charts together with
//! everything that makes them live: one [`RuntimeRegistry`] per chart, the
//! runtime backend, the data service, a shared [`AxisSynchronizer`] and the
//! stacked [`PaneLayout`].
//!
//! Every configuration mutation notifies subscribers and requests a reconcile
//! of the chart it touched. Requests go through a [`ReconcileRequests`] queue
//! that callbacks may also hold, so a request made while a pass is running
//! turns into a single follow-up pass for that chart.
//!
//! Fetches run as independent futures. Each is tagged with the chart id and
//! the instance epoch it was started for; a completion whose instance is gone
//! is dropped, and a successful one reconciles its own chart only.

use crate::axis_sync::{AxisSynchronizer, TimeAxis};
use crate::backend::ChartBackend;
use crate::catalog::SharedCatalog;
use crate::data_service::{DataService, FetchRequester, StreamUpdate};
use crate::data_types::{
    AddOutcome, AxisId, AxisRange, ChartConfig, ChartId, Color, DerivedSeriesConfig,
    EngineSettings, FetchSettings, RenderKind, SeriesData, Time, UpdateOutcome, ValueSeriesConfig,
};
use crate::error::GroupError;
use crate::layout::{PaneLayout, PanelId};
use crate::legend::{derive_legend, LegendSeries, LegendView};
use crate::persistence::{repair, ChartGroupSnapshot, LayoutMode, PersistenceService, RepairReport};
use crate::reconcile::{push_point, push_series_data, reconcile, ReconcileReport};
use crate::registry::RuntimeRegistry;
use crate::series_key::SeriesKey;
use eyre::WrapErr;
use futures::future::{FutureExt, LocalBoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use tracing::{debug, info, warn};

/// Margin applied when the group's time axes are first fitted to data.
const FIT_MARGIN_PCT: f64 = 0.05;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigChange {
    ChartAdded,
    ChartRemoved,
    /// A derived entry was added, removed or restored.
    Series,
    Style,
    Placement,
    Base,
    LayoutMode,
    /// The whole list was replaced by a load.
    Loaded,
}

/// What `ChartGroup::change_base` did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BaseChange {
    pub changed: bool,
    /// Rebased companions the catalog does not offer; they were tombstoned.
    pub removed: Vec<SeriesKey>,
}

/// Emitted after every structural mutation so the latest configuration list
/// can be persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigChanged {
    pub chart: Option<ChartId>,
    pub change: ConfigChange,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Pending reconcile requests. Cloned handles share one queue; requesting a
/// chart that is already pending is a no-op.
#[derive(Clone, Debug, Default)]
pub struct ReconcileRequests(Rc<RefCell<BTreeSet<ChartId>>>);

impl ReconcileRequests {
    /// Returns `false` when the request coalesced with a pending one.
    pub fn request(&self, chart: ChartId) -> bool {
        self.0.borrow_mut().insert(chart)
    }

    pub fn is_pending(&self, chart: ChartId) -> bool {
        self.0.borrow().contains(&chart)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    fn pop(&self) -> Option<ChartId> {
        self.0.borrow_mut().pop_first()
    }

    fn cancel(&self, chart: ChartId) {
        self.0.borrow_mut().remove(&chart);
    }
}

#[derive(Debug)]
pub struct LoadOutcome {
    pub charts: Vec<ChartId>,
    /// Set when the stored configuration needed repairs.
    pub notice: Option<RepairReport>,
    /// The store failed and a single default chart was created instead.
    pub fell_back: bool,
}

struct FetchCompletion {
    chart: ChartId,
    epoch: u64,
    key: SeriesKey,
    result: eyre::Result<SeriesData>,
}

/// Collects the keys one reconcile pass wants fetched.
struct FetchQueue<'a> {
    keys: Vec<SeriesKey>,
    settings: &'a FetchSettings,
}

impl FetchRequester for FetchQueue<'_> {
    fn request(&mut self, key: &SeriesKey) {
        self.keys.push(key.clone());
    }

    fn allows_retry(&self, failed_attempts: u32) -> bool {
        self.settings.allows_retry(failed_attempts)
    }
}

struct ChartInstance {
    config: ChartConfig,
    registry: RuntimeRegistry,
    axis: Rc<TimeAxis>,
    panel: PanelId,
    /// Identifies this mount; never reused, even when a chart id is.
    epoch: u64,
    cursor: Option<Time>,
    passes: u64,
}

type Listener = Box<dyn Fn(&ConfigChanged)>;

pub struct ChartGroup<B: ChartBackend> {
    backend: B,
    service: Rc<dyn DataService>,
    catalog: SharedCatalog,
    settings: EngineSettings,
    sync: Rc<AxisSynchronizer>,
    layout: PaneLayout,
    layout_mode: LayoutMode,
    charts: Vec<ChartInstance>,
    next_id: u32,
    next_epoch: u64,
    requests: ReconcileRequests,
    fetches: FuturesUnordered<LocalBoxFuture<'static, FetchCompletion>>,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

impl<B: ChartBackend> ChartGroup<B> {
    pub fn new(
        backend: B,
        service: Rc<dyn DataService>,
        catalog: SharedCatalog,
        settings: EngineSettings,
    ) -> Self {
        let layout = PaneLayout::new(settings.layout.clone());
        Self {
            backend,
            service,
            catalog,
            settings,
            sync: AxisSynchronizer::new(),
            layout,
            layout_mode: LayoutMode::default(),
            charts: Vec::new(),
            next_id: ChartId::FIRST.0,
            next_epoch: 0,
            requests: ReconcileRequests::default(),
            fetches: FuturesUnordered::new(),
            listeners: Vec::new(),
            next_subscription: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn synchronizer(&self) -> &Rc<AxisSynchronizer> {
        &self.sync
    }

    pub fn layout(&self) -> &PaneLayout {
        &self.layout
    }

    pub fn layout_mut(&mut self) -> &mut PaneLayout {
        &mut self.layout
    }

    pub fn layout_mode(&self) -> LayoutMode {
        self.layout_mode
    }

    pub fn set_layout_mode(&mut self, mode: LayoutMode) {
        if self.layout_mode != mode {
            self.layout_mode = mode;
            self.emit(None, ConfigChange::LayoutMode);
        }
    }

    /// Handle to the reconcile queue, for callbacks that run during a pass.
    pub fn requests(&self) -> ReconcileRequests {
        self.requests.clone()
    }

    pub fn chart_ids(&self) -> Vec<ChartId> {
        self.charts.iter().map(|c| c.config.id).collect()
    }

    pub fn len(&self) -> usize {
        self.charts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.charts.is_empty()
    }

    pub fn config(&self, id: ChartId) -> Option<&ChartConfig> {
        self.instance(id).map(|c| &c.config)
    }

    pub fn registry(&self, id: ChartId) -> Option<&RuntimeRegistry> {
        self.instance(id).map(|c| &c.registry)
    }

    pub fn axis(&self, id: ChartId) -> Option<Rc<TimeAxis>> {
        self.instance(id).map(|c| c.axis.clone())
    }

    pub fn panel(&self, id: ChartId) -> Option<PanelId> {
        self.instance(id).map(|c| c.panel)
    }

    /// Reconcile passes run for `id` since it was mounted.
    pub fn passes(&self, id: ChartId) -> Option<u64> {
        self.instance(id).map(|c| c.passes)
    }

    pub fn pending_fetches(&self) -> usize {
        self.fetches.len()
    }

    fn instance(&self, id: ChartId) -> Option<&ChartInstance> {
        self.charts.iter().find(|c| c.config.id == id)
    }

    fn instance_mut(&mut self, id: ChartId) -> Result<&mut ChartInstance, GroupError> {
        self.charts
            .iter_mut()
            .find(|c| c.config.id == id)
            .ok_or(GroupError::UnknownChart(id))
    }

    pub fn subscribe(&mut self, listener: impl Fn(&ConfigChanged) + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(l, _)| *l != id);
        self.listeners.len() != before
    }

    fn emit(&self, chart: Option<ChartId>, change: ConfigChange) {
        let event = ConfigChanged { chart, change };
        for (_, listener) in &self.listeners {
            listener(&event);
        }
    }

    // ---- lifecycle ----

    /// Adds a chart on the catalog's first kline, in a new panel at the bottom.
    pub fn add_chart(&mut self) -> Result<ChartId, GroupError> {
        let base = self
            .catalog
            .read()
            .first_base_key()
            .cloned()
            .ok_or(GroupError::NoBaseKey)?;
        let id = ChartId(self.next_id);
        if !id.is_assignable() {
            return Err(GroupError::IdsExhausted);
        }
        let config = ChartConfig::with_colors(id, base, &self.settings.colors);
        self.mount(config);
        self.emit(Some(id), ConfigChange::ChartAdded);
        self.request_reconcile(id);
        Ok(id)
    }

    fn mount(&mut self, config: ChartConfig) {
        let id = config.id;
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        self.next_id = self.next_id.max(id.0.saturating_add(1));

        let axis = TimeAxis::new(AxisId(epoch), AxisRange::new(0.0, 1.0));
        axis.attach(&self.sync);
        let panel = self.layout.add_panel();
        debug!("{}: mounted (epoch {}, {:?})", id, epoch, panel);

        self.charts.push(ChartInstance {
            registry: RuntimeRegistry::new(id),
            config,
            axis,
            panel,
            epoch,
            cursor: None,
            passes: 0,
        });
    }

    /// Tears the chart down and removes its panel. The last chart of a group
    /// stays.
    pub fn remove_chart(&mut self, id: ChartId) -> Result<(), GroupError> {
        let index = self
            .charts
            .iter()
            .position(|c| c.config.id == id)
            .ok_or(GroupError::UnknownChart(id))?;
        if self.charts.len() == 1 {
            return Err(GroupError::LastChart);
        }
        let instance = self.charts.remove(index);
        let panel = instance.panel;
        self.teardown(instance);
        self.layout.remove_panel_by_id(panel);
        self.emit(Some(id), ConfigChange::ChartRemoved);
        Ok(())
    }

    // Order: chart handle, series and pane handles, synchronizer, crosshair.
    // In-flight fetches for the instance fail the epoch check once it is gone.
    fn teardown(&mut self, mut instance: ChartInstance) {
        let id = instance.config.id;
        if let Some(chart) = instance.registry.chart() {
            self.backend.destroy_chart(chart);
        }
        let released = instance.registry.release_all();
        instance.axis.detach();
        instance.cursor = None;
        self.requests.cancel(id);
        debug!(
            "{}: torn down ({} series, {} panes released)",
            id,
            released.series.len(),
            released.panes.len()
        );
    }

    // ---- mutations ----

    fn changed(&mut self, id: ChartId, change: ConfigChange) {
        self.emit(Some(id), change);
        self.request_reconcile(id);
    }

    pub fn add_derived(
        &mut self,
        id: ChartId,
        entry: DerivedSeriesConfig,
    ) -> Result<AddOutcome, GroupError> {
        let available = self.catalog.read().contains(&entry.key);
        let instance = self.instance_mut(id)?;
        if !entry.key.is_companion_of(&instance.config.base.key) {
            return Err(GroupError::NotCompanion {
                key: entry.key,
                base: instance.config.base.key.clone(),
            });
        }
        if !available {
            return Err(GroupError::Unavailable(entry.key));
        }
        let outcome = instance.config.add_derived(entry);
        if outcome != AddOutcome::AlreadyActive {
            self.changed(id, ConfigChange::Series);
        }
        Ok(outcome)
    }

    /// Adds `key` with one line per value key, coloured from the palette.
    pub fn add_indicator(
        &mut self,
        id: ChartId,
        key: SeriesKey,
        value_keys: &[&str],
        in_main_pane: bool,
    ) -> Result<AddOutcome, GroupError> {
        let used: usize = self
            .instance(id)
            .ok_or(GroupError::UnknownChart(id))?
            .config
            .derived
            .iter()
            .map(|d| d.values.len())
            .sum();
        let colors = &self.settings.colors;
        let values = value_keys
            .iter()
            .enumerate()
            .map(|(i, value_key)| {
                ValueSeriesConfig::new(*value_key, RenderKind::Line, colors.pick(used + i))
            })
            .collect();
        self.add_derived(id, DerivedSeriesConfig::new(key, in_main_pane, values))
    }

    pub fn remove_derived(&mut self, id: ChartId, key: &SeriesKey) -> Result<bool, GroupError> {
        let removed = self.instance_mut(id)?.config.remove_derived(key);
        if removed {
            self.changed(id, ConfigChange::Series);
        }
        Ok(removed)
    }

    pub fn set_derived_visible(
        &mut self,
        id: ChartId,
        key: &SeriesKey,
        visible: bool,
    ) -> Result<bool, GroupError> {
        let changed = self.instance_mut(id)?.config.set_derived_visible(key, visible);
        if changed {
            self.changed(id, ConfigChange::Style);
        }
        Ok(changed)
    }

    pub fn set_value_color(
        &mut self,
        id: ChartId,
        key: &SeriesKey,
        value_key: &str,
        color: Color,
    ) -> Result<bool, GroupError> {
        let changed = self
            .instance_mut(id)?
            .config
            .set_value_color(key, value_key, color);
        if changed {
            self.changed(id, ConfigChange::Style);
        }
        Ok(changed)
    }

    pub fn set_in_main_pane(
        &mut self,
        id: ChartId,
        key: &SeriesKey,
        in_main_pane: bool,
    ) -> Result<bool, GroupError> {
        let changed = self.instance_mut(id)?.config.set_in_main_pane(key, in_main_pane);
        if changed {
            self.changed(id, ConfigChange::Placement);
        }
        Ok(changed)
    }

    pub fn set_base_visible(&mut self, id: ChartId, visible: bool) -> Result<bool, GroupError> {
        let changed = self.instance_mut(id)?.config.set_base_visible(visible);
        if changed {
            self.changed(id, ConfigChange::Style);
        }
        Ok(changed)
    }

    /// Switches the chart's kline (symbol or interval change). Companions the
    /// catalog does not offer on the new market are removed.
    pub fn change_base(
        &mut self,
        id: ChartId,
        new_key: SeriesKey,
    ) -> Result<BaseChange, GroupError> {
        if !new_key.is_base() || !self.catalog.read().contains(&new_key) {
            return Err(GroupError::Unavailable(new_key));
        }
        let catalog = self.catalog.clone();
        let config = &mut self.instance_mut(id)?.config;
        if !config.change_base(new_key) {
            return Ok(BaseChange::default());
        }
        let removed: Vec<SeriesKey> = {
            let catalog = catalog.read();
            config
                .active_derived()
                .filter(|d| !catalog.contains(&d.key))
                .map(|d| d.key.clone())
                .collect()
        };
        for key in &removed {
            config.remove_derived(key);
            warn!("{}: {} is not offered on the new market, removed", id, key);
        }
        self.changed(id, ConfigChange::Base);
        Ok(BaseChange {
            changed: true,
            removed,
        })
    }

    // ---- reconciliation ----

    /// Reconciles `id` now, plus any chart requested while doing so.
    pub fn request_reconcile(&mut self, id: ChartId) -> ReconcileReport {
        self.requests.request(id);
        self.drain_requests()
    }

    /// Runs one pass per pending request. A chart requested again during its
    /// own pass gets exactly one follow-up pass.
    pub fn drain_requests(&mut self) -> ReconcileReport {
        let mut total = ReconcileReport::default();
        while let Some(id) = self.requests.pop() {
            if let Some(report) = self.run_pass(id) {
                total.merge(&report);
            }
        }
        total
    }

    fn run_pass(&mut self, id: ChartId) -> Option<ReconcileReport> {
        let Self {
            charts,
            backend,
            service,
            fetches,
            settings,
            ..
        } = self;
        let instance = charts.iter_mut().find(|c| c.config.id == id)?;

        let mut queue = FetchQueue {
            keys: Vec::new(),
            settings: &settings.fetch,
        };
        let report = reconcile(&instance.config, &mut instance.registry, backend, &mut queue);
        instance.passes += 1;

        let epoch = instance.epoch;
        for key in queue.keys {
            let fetch = service.fetch(&key);
            fetches.push(
                async move {
                    let result = fetch.await;
                    FetchCompletion {
                        chart: id,
                        epoch,
                        key,
                        result,
                    }
                }
                .boxed_local(),
            );
        }
        Some(report)
    }

    // ---- fetch plumbing ----

    /// Handles every fetch that has already completed, without waiting.
    /// Returns the number of completions processed.
    pub fn poll_fetches(&mut self) -> usize {
        let mut handled = 0;
        while let Some(Some(done)) = self.fetches.next().now_or_never() {
            self.complete_fetch(done);
            handled += 1;
        }
        handled
    }

    /// Drives fetches, including the ones their completions start, until
    /// none is left.
    pub async fn run_until_idle(&mut self) -> usize {
        let mut handled = 0;
        while let Some(done) = self.fetches.next().await {
            self.complete_fetch(done);
            handled += 1;
        }
        handled
    }

    fn complete_fetch(&mut self, done: FetchCompletion) {
        let FetchCompletion {
            chart,
            epoch,
            key,
            result,
        } = done;

        let Some(instance) = self
            .charts
            .iter_mut()
            .find(|c| c.config.id == chart && c.epoch == epoch)
        else {
            debug!("{}: dropping fetch of {} for a torn down instance", chart, key);
            return;
        };
        let referenced = instance.config.base.key == key
            || instance.config.derived.iter().any(|d| d.key == key);
        if !referenced {
            debug!("{}: dropping fetch of {}, no longer configured", chart, key);
            return;
        }

        match result {
            Ok(data) => {
                instance.registry.data_mut().insert(key.clone(), data);
                instance.registry.clear_fetch(&key);
                push_series_data(&instance.registry, &mut self.backend, &key);
                if key == instance.config.base.key && self.sync.shared_range().is_none() {
                    let bounds = instance
                        .registry
                        .data()
                        .get(&key)
                        .and_then(|d| d.candles())
                        .and_then(|c| Some((c.first()?.time, c.last()?.time)));
                    if let Some((first, last)) = bounds {
                        instance.axis.fit(first as f64, last as f64, FIT_MARGIN_PCT);
                    }
                }
                self.request_reconcile(chart);
            }
            Err(err) => {
                instance.registry.mark_failed(key.clone());
                warn!("{}: fetch of {} failed: {:#}", chart, key, err);
            }
        }
    }

    // ---- streaming ----

    /// Applies one streamed point to every chart holding its series. Returns
    /// the number of charts that accepted it.
    pub fn apply_stream_update(&mut self, update: &StreamUpdate) -> usize {
        let mut accepted = 0;
        for instance in self.charts.iter_mut() {
            let outcome = instance.registry.data_mut().apply(
                &update.key,
                update.value_key.as_deref(),
                update.payload,
                update.mode,
            );
            match outcome {
                UpdateOutcome::Rejected => {
                    if instance.registry.data().contains(&update.key) {
                        debug!(
                            "{}: rejected stream point for {} at {}",
                            instance.config.id,
                            update.key,
                            update.payload.time()
                        );
                    }
                }
                UpdateOutcome::Appended | UpdateOutcome::Replaced => {
                    push_point(
                        &instance.registry,
                        &mut self.backend,
                        &update.key,
                        update.value_key.as_deref(),
                        update.payload,
                    );
                    accepted += 1;
                }
            }
        }
        accepted
    }

    // ---- crosshair ----

    /// Moves (or clears, with `None`) the crosshair of `id` and returns the
    /// legend for it.
    pub fn set_cursor(&mut self, id: ChartId, cursor: Option<Time>) -> Option<LegendView> {
        let instance = self.instance_mut(id).ok()?;
        instance.cursor = cursor;
        self.legend(id)
    }

    pub fn legend(&self, id: ChartId) -> Option<LegendView> {
        let instance = self.instance(id)?;
        let series = LegendSeries::for_chart(&instance.config);
        Some(derive_legend(
            &series,
            instance.registry.data(),
            instance.cursor,
            &self.settings.legend,
        ))
    }

    // ---- persistence ----

    pub fn snapshot(&self) -> ChartGroupSnapshot {
        ChartGroupSnapshot {
            layout_mode: self.layout_mode,
            charts: self.charts.iter().map(|c| c.config.clone()).collect(),
        }
    }

    pub fn save(&self, store: &dyn PersistenceService, strategy_id: &str) -> eyre::Result<()> {
        store
            .save(strategy_id, &self.snapshot())
            .wrap_err_with(|| format!("saving charts of strategy {}", strategy_id))
    }

    /// Replaces every chart with the stored configuration of `strategy_id`.
    /// Stored configurations are repaired against the catalog first; a store
    /// failure falls back to one default chart.
    pub fn load(&mut self, store: &dyn PersistenceService, strategy_id: &str) -> LoadOutcome {
        let (snapshot, notice, fell_back) = match store.load(strategy_id) {
            Ok(Some(mut snapshot)) => {
                let report = repair(&mut snapshot, &self.catalog.read());
                let notice = (!report.is_empty()).then_some(report);
                (Some(snapshot), notice, false)
            }
            Ok(None) => (None, None, false),
            Err(err) => {
                warn!("loading charts of strategy {} failed: {:#}", strategy_id, err);
                (None, None, true)
            }
        };

        for instance in std::mem::take(&mut self.charts) {
            self.teardown(instance);
        }
        self.layout = PaneLayout::new(self.settings.layout.clone());
        self.next_id = ChartId::FIRST.0;
        // The loaded charts fit their own data instead of the old window.
        self.sync.clear_shared_range();

        let snapshot = snapshot.filter(|s| !s.charts.is_empty());
        match snapshot {
            Some(snapshot) => {
                self.layout_mode = snapshot.layout_mode;
                for config in snapshot.charts {
                    self.mount(config);
                }
            }
            None => {
                self.layout_mode = LayoutMode::default();
                let base = self.catalog.read().first_base_key().cloned();
                match base {
                    Some(base) => {
                        let config =
                            ChartConfig::with_colors(ChartId::FIRST, base, &self.settings.colors);
                        self.mount(config);
                    }
                    None => warn!("no kline in the catalog, group left empty"),
                }
            }
        }

        let charts = self.chart_ids();
        for id in &charts {
            self.requests.request(*id);
        }
        self.drain_requests();
        info!("loaded {} chart(s) for strategy {}", charts.len(), strategy_id);
        self.emit(None, ConfigChange::Loaded);

        LoadOutcome {
            charts,
            notice,
            fell_back,
        }
    }
}
