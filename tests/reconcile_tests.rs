use strategy_chart::backend::{BackendCall, HeadlessBackend, PaneTarget, SeriesLook, StylePatch};
use strategy_chart::data_service::FetchRequester;
use strategy_chart::data_types::{
    AddOutcome, Candle, ChartConfig, ChartId, Color, DerivedSeriesConfig, EntryState,
    PointPayload, RenderKind, SeriesData, TimePoint, ValueSeriesConfig,
};
use strategy_chart::reconcile::{push_point, push_series_data, reconcile};
use strategy_chart::registry::{FetchState, Placement, RuntimeRegistry, SlotKey};
use strategy_chart::series_key::{SeriesKey, SeriesKind};

#[derive(Default)]
struct Requests {
    keys: Vec<SeriesKey>,
    deny_retries: bool,
}

impl FetchRequester for Requests {
    fn request(&mut self, key: &SeriesKey) {
        self.keys.push(key.clone());
    }

    fn allows_retry(&self, _failed_attempts: u32) -> bool {
        !self.deny_retries
    }
}

fn btc() -> SeriesKey {
    "kline|BINANCE|BTCUSDT|1m".parse().unwrap()
}

fn ma(base: &SeriesKey) -> SeriesKey {
    base.derive(SeriesKind::Indicator, "MA", [("period", "20")]).unwrap()
}

fn bands(base: &SeriesKey) -> SeriesKey {
    base.derive(SeriesKind::Indicator, "BOLL", [("period", "20"), ("k", "2")])
        .unwrap()
}

fn candles(n: i64) -> SeriesData {
    SeriesData::Candles(
        (0..n)
            .map(|i| Candle {
                time: 60 * i,
                open: 100.0,
                high: 110.0,
                low: 90.0,
                close: 105.0,
                volume: 1.0,
            })
            .collect(),
    )
}

fn line(value_keys: &[&str], n: i64) -> SeriesData {
    SeriesData::values(value_keys.iter().map(|k| {
        (
            *k,
            (0..n).map(|i| TimePoint::new(60 * i, i as f64)).collect::<Vec<_>>(),
        )
    }))
}

fn red() -> Color {
    Color::rgb(255, 0, 0)
}

fn blue() -> Color {
    Color::rgb(0, 0, 255)
}

fn ma_entry(base: &SeriesKey, in_main: bool) -> DerivedSeriesConfig {
    DerivedSeriesConfig::new(
        ma(base),
        in_main,
        vec![ValueSeriesConfig::new("ma", RenderKind::Line, blue())],
    )
}

fn bands_entry(base: &SeriesKey, in_main: bool) -> DerivedSeriesConfig {
    DerivedSeriesConfig::new(
        bands(base),
        in_main,
        vec![
            ValueSeriesConfig::new("upper", RenderKind::Line, red()),
            ValueSeriesConfig::new("lower", RenderKind::Dashed, red()),
        ],
    )
}

/// Config, registry with all data present, and a backend.
fn setup(entries: Vec<DerivedSeriesConfig>) -> (ChartConfig, RuntimeRegistry, HeadlessBackend) {
    let base = btc();
    let mut config = ChartConfig::new(ChartId(1), base.clone());
    let mut registry = RuntimeRegistry::new(ChartId(1));
    registry.data_mut().insert(base, candles(10));
    for entry in entries {
        let values: Vec<&str> = entry.values.iter().map(|v| v.value_key.as_str()).collect();
        registry.data_mut().insert(entry.key.clone(), line(&values, 10));
        config.add_derived(entry);
    }
    (config, registry, HeadlessBackend::new())
}

#[test]
fn test_example_scenario_main_pane_indicator() {
    let base = btc();
    let (mut config, mut registry, mut backend) = setup(vec![ma_entry(&base, true)]);
    let mut fetches = Requests::default();

    let report = reconcile(&config, &mut registry, &mut backend, &mut fetches);
    assert_eq!(report.charts_created, 1);
    assert_eq!(report.created, 2);
    assert!(fetches.keys.is_empty());

    let base_handle = registry.base().unwrap().handle;
    let slot = SlotKey::new(ma(&base), "ma");
    let entry = registry.derived(&slot).unwrap();
    assert_eq!(entry.placement, Placement::Main);
    assert_eq!(backend.series(entry.handle).unwrap().target, PaneTarget::Main);
    assert_eq!(backend.series(entry.handle).unwrap().len, 10);
    assert_eq!(registry.handle_count(), 2);
    assert_eq!(registry.pane_count(), 0);

    backend.take_calls();
    assert!(config.remove_derived(&ma(&base)));
    let report = reconcile(&config, &mut registry, &mut backend, &mut fetches);
    assert_eq!(report.destroyed, 1);
    assert_eq!(report.created, 0);

    assert!(registry.derived(&slot).is_none());
    assert_eq!(registry.base().unwrap().handle, base_handle);
    assert_eq!(backend.live_series(), 1);
    let calls = backend.take_calls();
    assert_eq!(calls.len(), 1);
    assert!(matches!(calls[0], BackendCall::DestroySeries(..)));
}

#[test]
fn test_reconcile_is_idempotent() {
    let base = btc();
    let (config, mut registry, mut backend) =
        setup(vec![ma_entry(&base, true), bands_entry(&base, false)]);
    let mut fetches = Requests::default();

    reconcile(&config, &mut registry, &mut backend, &mut fetches);
    let handles = registry.handle_count();
    backend.take_calls();

    let report = reconcile(&config, &mut registry, &mut backend, &mut fetches);
    assert!(report.is_noop(), "{:?}", report);
    assert!(backend.calls().is_empty());
    assert_eq!(registry.handle_count(), handles);
    assert!(registry.check_invariant(&config).is_empty());
}

#[test]
fn test_creation_waits_for_data() {
    let base = btc();
    let mut config = ChartConfig::new(ChartId(1), base.clone());
    config.add_derived(ma_entry(&base, true));
    let mut registry = RuntimeRegistry::new(ChartId(1));
    let mut backend = HeadlessBackend::new();
    let mut fetches = Requests::default();

    let report = reconcile(&config, &mut registry, &mut backend, &mut fetches);
    assert_eq!(report.fetches_requested, 2);
    assert_eq!(report.deferred, 2);
    assert_eq!(registry.handle_count(), 0);
    assert_eq!(registry.fetch_state(&ma(&base)), Some(FetchState::InFlight));

    // In flight: not requested again
    let report = reconcile(&config, &mut registry, &mut backend, &mut fetches);
    assert_eq!(report.fetches_requested, 0);
    assert!(report.is_noop());
    assert_eq!(fetches.keys.len(), 2);

    // The indicator arrives first; it does not wait for the kline
    registry.data_mut().insert(ma(&base), line(&["ma"], 5));
    registry.clear_fetch(&ma(&base));
    let report = reconcile(&config, &mut registry, &mut backend, &mut fetches);
    assert_eq!(report.created, 1);
    assert!(registry.base().is_none());

    registry.data_mut().insert(base.clone(), candles(5));
    registry.clear_fetch(&base);
    let report = reconcile(&config, &mut registry, &mut backend, &mut fetches);
    assert_eq!(report.created, 1);
    assert!(registry.base().is_some());
}

#[test]
fn test_failed_fetch_is_retried_independently() {
    let base = btc();
    let mut config = ChartConfig::new(ChartId(1), base.clone());
    config.add_derived(ma_entry(&base, true));
    let mut registry = RuntimeRegistry::new(ChartId(1));
    registry.data_mut().insert(base.clone(), candles(3));
    let mut backend = HeadlessBackend::new();
    let mut fetches = Requests::default();

    reconcile(&config, &mut registry, &mut backend, &mut fetches);
    registry.mark_failed(ma(&base));
    assert_eq!(
        registry.fetch_state(&ma(&base)),
        Some(FetchState::Failed { attempts: 1 })
    );
    // The kline is shown regardless
    assert!(registry.base().is_some());

    let report = reconcile(&config, &mut registry, &mut backend, &mut fetches);
    assert_eq!(report.fetches_requested, 1);
    registry.mark_failed(ma(&base));
    assert_eq!(
        registry.fetch_state(&ma(&base)),
        Some(FetchState::Failed { attempts: 2 })
    );

    let mut no_retry = Requests {
        deny_retries: true,
        ..Default::default()
    };
    let report = reconcile(&config, &mut registry, &mut backend, &mut no_retry);
    assert_eq!(report.fetches_requested, 0);
    assert_eq!(report.deferred, 1);
    assert!(no_retry.keys.is_empty());
}

#[test]
fn test_tombstone_restore_keeps_style() {
    let base = btc();
    let (mut config, mut registry, mut backend) = setup(vec![ma_entry(&base, true)]);
    let mut fetches = Requests::default();
    let key = ma(&base);

    config.set_value_color(&key, "ma", red());
    config.set_derived_visible(&key, false);
    reconcile(&config, &mut registry, &mut backend, &mut fetches);

    config.remove_derived(&key);
    reconcile(&config, &mut registry, &mut backend, &mut fetches);
    assert_eq!(registry.handle_count(), 1);
    // Tombstoned series keep their data
    assert!(registry.data().contains(&key));

    // Re-adding with a fresh default style restores the old one
    assert_eq!(config.add_derived(ma_entry(&base, true)), AddOutcome::Restored);
    assert_eq!(config.derived.len(), 1);
    let report = reconcile(&config, &mut registry, &mut backend, &mut fetches);
    assert_eq!(report.created, 1);
    assert_eq!(report.fetches_requested, 0);

    let handle = registry.derived(&SlotKey::new(key, "ma")).unwrap().handle;
    match &backend.series(handle).unwrap().look {
        SeriesLook::Values(style) => {
            assert_eq!(style.color, red());
            assert!(!style.visible);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(registry.handle_count(), 2);
}

#[test]
fn test_secondary_pane_shared_by_values() {
    let base = btc();
    let (mut config, mut registry, mut backend) = setup(vec![bands_entry(&base, false)]);
    let mut fetches = Requests::default();

    let report = reconcile(&config, &mut registry, &mut backend, &mut fetches);
    assert_eq!(report.panes_created, 1);
    let pane = registry.pane(&bands(&base)).unwrap();
    for value in ["upper", "lower"] {
        let entry = registry.derived(&SlotKey::new(bands(&base), value)).unwrap();
        assert_eq!(entry.placement, Placement::Secondary);
        assert_eq!(backend.series(entry.handle).unwrap().target, PaneTarget::Pane(pane));
    }

    // Moving to the main pane recreates both series and frees the pane
    config.set_in_main_pane(&bands(&base), true);
    let report = reconcile(&config, &mut registry, &mut backend, &mut fetches);
    assert_eq!(report.destroyed, 2);
    assert_eq!(report.created, 2);
    assert_eq!(report.panes_destroyed, 1);
    assert!(!backend.is_live_pane(pane));
    assert_eq!(registry.pane_count(), 0);
    assert!(registry.check_invariant(&config).is_empty());
}

#[test]
fn test_deletion_runs_before_creation() {
    let base = btc();
    let (mut config, mut registry, mut backend) = setup(vec![bands_entry(&base, false)]);
    let mut fetches = Requests::default();
    reconcile(&config, &mut registry, &mut backend, &mut fetches);
    backend.take_calls();

    // Swap one secondary indicator for another in a single pass
    config.remove_derived(&bands(&base));
    let rsi = base.derive(SeriesKind::Indicator, "RSI", [("period", "14")]).unwrap();
    registry.data_mut().insert(rsi.clone(), line(&["rsi"], 10));
    config.add_derived(DerivedSeriesConfig::new(
        rsi,
        false,
        vec![ValueSeriesConfig::new("rsi", RenderKind::Line, blue()).percent()],
    ));
    reconcile(&config, &mut registry, &mut backend, &mut fetches);

    let calls = backend.calls();
    let last_destroy = calls.iter().rposition(BackendCall::is_destroy).unwrap();
    let first_create = calls.iter().position(BackendCall::is_create).unwrap();
    assert!(last_destroy < first_create);
    assert_eq!(backend.live_panes(), 1);
}

#[test]
fn test_style_changes_are_patched() {
    let base = btc();
    let (mut config, mut registry, mut backend) = setup(vec![ma_entry(&base, true)]);
    let mut fetches = Requests::default();
    reconcile(&config, &mut registry, &mut backend, &mut fetches);
    backend.take_calls();

    config.set_value_color(&ma(&base), "ma", red());
    let report = reconcile(&config, &mut registry, &mut backend, &mut fetches);
    assert_eq!(report.updated, 1);
    assert_eq!(report.created + report.destroyed, 0);
    let handle = registry.derived(&SlotKey::new(ma(&base), "ma")).unwrap().handle;
    assert_eq!(
        backend.take_calls(),
        vec![BackendCall::ApplyStyle(
            handle,
            StylePatch {
                color: Some(red()),
                ..Default::default()
            }
        )]
    );

    config.set_base_visible(false);
    let report = reconcile(&config, &mut registry, &mut backend, &mut fetches);
    assert_eq!(report.updated, 1);
}

#[test]
fn test_render_kind_change_recreates() {
    let base = btc();
    let (mut config, mut registry, mut backend) = setup(vec![ma_entry(&base, true)]);
    let mut fetches = Requests::default();
    reconcile(&config, &mut registry, &mut backend, &mut fetches);
    let slot = SlotKey::new(ma(&base), "ma");
    let old = registry.derived(&slot).unwrap().handle;

    config.derived[0].values[0].render_kind = RenderKind::Column;
    let report = reconcile(&config, &mut registry, &mut backend, &mut fetches);
    assert_eq!((report.destroyed, report.created), (1, 1));
    assert_ne!(registry.derived(&slot).unwrap().handle, old);
}

#[test]
fn test_change_base_follows_market() {
    let base = btc();
    let (mut config, mut registry, mut backend) = setup(vec![ma_entry(&base, true)]);
    let mut fetches = Requests::default();
    reconcile(&config, &mut registry, &mut backend, &mut fetches);

    let eth: SeriesKey = "kline|BINANCE|ETHUSDT|5m".parse().unwrap();
    assert!(config.change_base(eth.clone()));
    assert_eq!(config.derived[0].key, ma(&eth));

    let report = reconcile(&config, &mut registry, &mut backend, &mut fetches);
    // Old base and old indicator destroyed, nothing to show until data comes
    assert_eq!(report.destroyed, 2);
    assert_eq!(report.fetches_requested, 2);
    assert_eq!(registry.handle_count(), 0);
    assert!(!registry.data().contains(&base));
    assert!(!registry.data().contains(&ma(&base)));
    assert_eq!(fetches.keys, vec![eth.clone(), ma(&eth)]);
}

#[test]
fn test_change_base_rebases_tombstones() {
    let base = btc();
    let eth: SeriesKey = "kline|BINANCE|ETHUSDT|5m".parse().unwrap();
    let (mut config, mut registry, mut backend) = setup(vec![ma_entry(&base, true)]);
    let mut fetches = Requests::default();
    config.remove_derived(&ma(&base));
    reconcile(&config, &mut registry, &mut backend, &mut fetches);
    assert!(registry.data().contains(&ma(&base)));

    assert!(config.change_base(eth.clone()));
    assert_eq!(config.derived.len(), 1);
    assert_eq!(config.derived[0].key, ma(&eth));
    assert!(config.derived[0].is_deleted());

    // Old market data goes with the old key
    reconcile(&config, &mut registry, &mut backend, &mut fetches);
    assert!(!registry.data().contains(&ma(&base)));

    // Restorable on the new market
    assert_eq!(config.add_derived(ma_entry(&eth, true)), AddOutcome::Restored);
    assert_eq!(config.derived.len(), 1);
}

#[test]
fn test_change_base_drops_tombstone_colliding_with_active_entry() {
    let base = btc();
    let eth: SeriesKey = "kline|BINANCE|ETHUSDT|5m".parse().unwrap();
    let mut config = ChartConfig::new(ChartId(1), base.clone());
    config.add_derived(ma_entry(&base, true));
    let mut stale = ma_entry(&eth, false);
    stale.state = EntryState::Deleted;
    config.derived.push(stale);

    assert!(config.change_base(eth.clone()));
    assert_eq!(config.derived.len(), 1);
    assert_eq!(config.derived[0].key, ma(&eth));
    assert!(!config.derived[0].is_deleted());
    assert!(config.derived[0].in_main_pane);
}

#[test]
fn test_push_data_and_points() {
    let base = btc();
    let (config, mut registry, mut backend) = setup(vec![ma_entry(&base, true)]);
    let mut fetches = Requests::default();
    reconcile(&config, &mut registry, &mut backend, &mut fetches);

    registry.data_mut().insert(ma(&base), line(&["ma"], 20));
    assert_eq!(push_series_data(&registry, &mut backend, &ma(&base)), 1);
    let handle = registry.derived(&SlotKey::new(ma(&base), "ma")).unwrap().handle;
    assert_eq!(backend.series(handle).unwrap().len, 20);

    let point = PointPayload::Point(TimePoint::new(60 * 20, 1.0));
    assert!(push_point(&registry, &mut backend, &ma(&base), Some("ma"), point));
    assert_eq!(backend.series(handle).unwrap().len, 21);
    // No value key, no target
    assert!(!push_point(&registry, &mut backend, &ma(&base), None, point));
}
