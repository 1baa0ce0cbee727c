use futures::executor::block_on;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use strategy_chart::backend::HeadlessBackend;
use strategy_chart::catalog::SeriesCatalog;
use strategy_chart::chart_group::ChartGroup;
use strategy_chart::data_service::MemoryDataService;
use strategy_chart::error::GroupError;
use strategy_chart::data_types::{
    Candle, ChartConfig, ChartId, Color, DerivedSeriesConfig, EngineSettings, EntryState,
    RenderKind, SeriesData, ValueSeriesConfig,
};
use strategy_chart::persistence::{
    decode_snapshot, repair, ChartGroupSnapshot, JsonFileStore, LayoutMode, MemoryStore,
    PersistenceService,
};
use strategy_chart::series_key::{SeriesKey, SeriesKind};

fn btc() -> SeriesKey {
    "kline|BINANCE|BTCUSDT|1m".parse().unwrap()
}

fn eth() -> SeriesKey {
    "kline|BINANCE|ETHUSDT|1m".parse().unwrap()
}

fn indicator(base: &SeriesKey, name: &str) -> SeriesKey {
    base.derive(SeriesKind::Indicator, name, [("period", "14")]).unwrap()
}

fn entry(key: SeriesKey, value_key: &str) -> DerivedSeriesConfig {
    DerivedSeriesConfig::new(
        key,
        true,
        vec![ValueSeriesConfig::new(value_key, RenderKind::Line, Color::rgb(10, 20, 30))],
    )
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "strategy_chart_{}_{}",
        name,
        std::process::id()
    ));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn sample_snapshot() -> ChartGroupSnapshot {
    let mut first = ChartConfig::new(ChartId(1), btc());
    first.add_derived(entry(indicator(&btc(), "RSI"), "rsi"));
    first.add_derived(entry(indicator(&btc(), "MA"), "ma"));
    first.remove_derived(&indicator(&btc(), "MA"));

    let second = ChartConfig::new(ChartId(3), eth());
    ChartGroupSnapshot {
        layout_mode: LayoutMode::Grid,
        charts: vec![first, second],
    }
}

#[test]
fn test_file_store_round_trip_drops_tombstones() {
    let dir = scratch_dir("round_trip");
    let store = JsonFileStore::new(&dir);
    assert_eq!(store.load("alpha").unwrap(), None);

    let snapshot = sample_snapshot();
    store.save("alpha", &snapshot).unwrap();
    assert!(dir.join("alpha.charts.json").exists());
    // Nothing left behind from the atomic write
    assert_eq!(fs::read_dir(&dir).unwrap().count(), 1);

    let loaded = store.load("alpha").unwrap().unwrap();
    assert_eq!(loaded, snapshot.clone().compacted());
    assert_eq!(loaded.layout_mode, LayoutMode::Grid);
    assert_eq!(loaded.charts[0].derived.len(), 1);
    assert_eq!(loaded.charts[1].id, ChartId(3));

    // Saving again overwrites
    store.save("alpha", &ChartGroupSnapshot::default()).unwrap();
    assert!(store.load("alpha").unwrap().unwrap().charts.is_empty());

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_file_store_rejects_path_like_ids() {
    let store = JsonFileStore::new(scratch_dir("ids"));
    for id in ["", ".", "..", "a/b", "..\\up"] {
        assert!(store.path_for(id).is_err(), "{:?} accepted", id);
        assert!(store.save(id, &ChartGroupSnapshot::default()).is_err());
    }
    assert!(store.path_for("strategy-7").is_ok());
}

#[test]
fn test_malformed_file_is_an_error() {
    let dir = scratch_dir("malformed");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("broken.charts.json"), b"{ not json").unwrap();
    let store = JsonFileStore::new(&dir);
    assert!(store.load("broken").is_err());
    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_unreadable_entries_are_skipped() {
    let json = format!(
        r##"{{
            "layout_mode": "single",
            "charts": [
                {{
                    "id": 1,
                    "base": {{ "key": "{btc}", "up_color": "#26a69a", "down_color": "#ef5350" }},
                    "derived": [
                        {{ "key": "not a key", "in_main_pane": true, "values": [] }},
                        {{
                            "key": "{rsi}",
                            "in_main_pane": false,
                            "values": [
                                {{ "value_key": "rsi", "render_kind": "line", "color": "#ff00ff" }}
                            ]
                        }}
                    ]
                }},
                {{
                    "id": 2,
                    "base": {{ "key": "kline|NOWHERE", "up_color": "#26a69a", "down_color": "#ef5350" }}
                }}
            ]
        }}"##,
        btc = btc(),
        rsi = indicator(&btc(), "RSI"),
    );

    let snapshot = decode_snapshot(json.as_bytes()).unwrap();
    assert_eq!(snapshot.layout_mode, LayoutMode::Single);
    assert_eq!(snapshot.charts.len(), 1);
    let chart = &snapshot.charts[0];
    assert_eq!(chart.base.key, btc());
    assert_eq!(chart.derived.len(), 1);
    assert_eq!(chart.derived[0].key, indicator(&btc(), "RSI"));
    assert!(chart.base.visible);

    assert!(decode_snapshot(b"42").is_err());
}

#[test]
fn test_repair_replaces_unknown_base() {
    let catalog = SeriesCatalog::new([eth(), indicator(&eth(), "RSI")]);
    let mut snapshot = sample_snapshot();
    let report = repair(&mut snapshot, &catalog);

    assert_eq!(report.replaced_bases, vec![(ChartId(1), btc(), eth())]);
    assert_eq!(snapshot.charts[0].base.key, eth());
    // The BTC indicator no longer fits the ETH base
    assert_eq!(
        report.tombstoned,
        vec![(ChartId(1), indicator(&btc(), "RSI"))]
    );
    assert_eq!(snapshot.charts[0].active_derived().count(), 0);
    assert!(report.dropped.is_empty());
    assert!(!report.to_string().is_empty());
}

#[test]
fn test_repair_tombstones_duplicates_and_renumbers() {
    let rsi = indicator(&btc(), "RSI");
    let catalog = SeriesCatalog::new([btc(), rsi.clone()]);

    let mut chart = ChartConfig::new(ChartId(2), btc());
    chart.derived.push(entry(rsi.clone(), "rsi"));
    chart.derived.push(entry(rsi.clone(), "rsi"));
    let twin = ChartConfig::new(ChartId(2), btc());
    let mut snapshot = ChartGroupSnapshot {
        layout_mode: LayoutMode::Stacked,
        charts: vec![chart, twin],
    };

    let report = repair(&mut snapshot, &catalog);
    assert_eq!(report.tombstoned, vec![(ChartId(2), rsi.clone())]);
    assert_eq!(snapshot.charts[0].derived[0].state, EntryState::Active);
    assert_eq!(snapshot.charts[0].derived[1].state, EntryState::Deleted);
    assert_eq!(report.renumbered, vec![(ChartId(2), ChartId(3))]);
    assert_eq!(snapshot.charts[1].id, ChartId(3));

    // A repaired snapshot needs no further repair
    assert!(repair(&mut snapshot, &catalog).is_empty());
}

#[test]
fn test_repair_drops_charts_without_any_kline() {
    let catalog = SeriesCatalog::new([indicator(&btc(), "RSI")]);
    let mut snapshot = sample_snapshot();
    let report = repair(&mut snapshot, &catalog);
    assert_eq!(report.dropped, vec![ChartId(1), ChartId(3)]);
    assert!(snapshot.charts.is_empty());
}

#[test]
fn test_repair_wraps_around_when_ids_run_out() {
    let catalog = SeriesCatalog::new([btc()]);
    let high = ChartId(u32::MAX - 1);
    let mut snapshot = ChartGroupSnapshot {
        layout_mode: LayoutMode::Stacked,
        charts: vec![ChartConfig::new(high, btc()), ChartConfig::new(high, btc())],
    };

    let report = repair(&mut snapshot, &catalog);
    assert_eq!(report.renumbered, vec![(high, ChartId(1))]);
    assert_eq!(snapshot.charts[0].id, high);
    assert!(repair(&mut snapshot, &catalog).is_empty());
}

fn group() -> ChartGroup<HeadlessBackend> {
    let service = MemoryDataService::new();
    let candles = (0..5)
        .map(|i| Candle {
            time: 60 * i,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 1.0,
        })
        .collect();
    service.insert(btc(), SeriesData::Candles(candles));
    ChartGroup::new(
        HeadlessBackend::new(),
        Rc::new(service),
        SeriesCatalog::new([btc(), indicator(&btc(), "RSI")]).shared(),
        EngineSettings::default(),
    )
}

#[test]
fn test_group_save_then_load() {
    let store = MemoryStore::new();
    let mut saved = group();
    let first = saved.add_chart().unwrap();
    saved
        .add_derived(first, entry(indicator(&btc(), "RSI"), "rsi"))
        .unwrap();
    saved.add_chart().unwrap();
    saved.set_layout_mode(LayoutMode::Grid);
    saved.save(&store, "alpha").unwrap();

    let mut restored = group();
    let outcome = restored.load(&store, "alpha");
    assert_eq!(outcome.charts, vec![ChartId(1), ChartId(2)]);
    assert!(outcome.notice.is_none());
    assert!(!outcome.fell_back);
    assert_eq!(restored.layout_mode(), LayoutMode::Grid);
    assert_eq!(restored.layout().len(), 2);
    assert_eq!(restored.snapshot(), saved.snapshot());

    // Fetches were started for every chart by the load
    block_on(restored.run_until_idle());
    assert_eq!(restored.backend().live_charts(), 2);
    assert_eq!(restored.backend().live_series(), 2);
}

#[test]
fn test_load_falls_back_when_the_store_fails() {
    let store = MemoryStore::new();
    let mut group = group();
    group.add_chart().unwrap();
    group.add_chart().unwrap();
    group.save(&store, "alpha").unwrap();

    store.set_failing(true);
    assert!(group.save(&store, "alpha").is_err());
    let outcome = group.load(&store, "alpha");
    assert!(outcome.fell_back);
    assert_eq!(outcome.charts, vec![ChartId(1)]);
    assert_eq!(group.config(ChartId(1)).unwrap().base.key, btc());
    // The previous runtime charts were torn down
    assert_eq!(group.backend().live_charts(), 1);
}

#[test]
fn test_load_reports_repairs() {
    let store = MemoryStore::new();
    let mut stale = ChartConfig::new(ChartId(1), eth());
    stale.add_derived(entry(indicator(&eth(), "RSI"), "rsi"));
    store
        .save(
            "alpha",
            &ChartGroupSnapshot {
                layout_mode: LayoutMode::Stacked,
                charts: vec![stale],
            },
        )
        .unwrap();

    let mut group = group();
    let outcome = group.load(&store, "alpha");
    let notice = outcome.notice.unwrap();
    assert_eq!(notice.replaced_bases, vec![(ChartId(1), eth(), btc())]);
    assert_eq!(notice.tombstoned.len(), 1);
    assert_eq!(group.config(ChartId(1)).unwrap().base.key, btc());
    assert_eq!(group.config(ChartId(1)).unwrap().active_derived().count(), 0);
}

#[test]
fn test_load_renumbers_ids_never_handed_out() {
    let store = MemoryStore::new();
    store
        .save(
            "alpha",
            &ChartGroupSnapshot {
                layout_mode: LayoutMode::Stacked,
                charts: vec![
                    ChartConfig::new(ChartId(u32::MAX), btc()),
                    ChartConfig::new(ChartId(0), btc()),
                ],
            },
        )
        .unwrap();

    let mut group = group();
    let outcome = group.load(&store, "alpha");
    assert_eq!(outcome.charts, vec![ChartId(1), ChartId(2)]);
    assert_eq!(
        outcome.notice.unwrap().renumbered,
        vec![(ChartId(u32::MAX), ChartId(1)), (ChartId(0), ChartId(2))]
    );
    assert_eq!(group.add_chart(), Ok(ChartId(3)));
}

#[test]
fn test_add_chart_stops_at_the_last_id() {
    let store = MemoryStore::new();
    let last = ChartId(u32::MAX - 1);
    store
        .save(
            "alpha",
            &ChartGroupSnapshot {
                layout_mode: LayoutMode::Stacked,
                charts: vec![ChartConfig::new(last, btc())],
            },
        )
        .unwrap();

    let mut group = group();
    let outcome = group.load(&store, "alpha");
    assert_eq!(outcome.charts, vec![last]);
    assert!(outcome.notice.is_none());
    assert_eq!(group.add_chart(), Err(GroupError::IdsExhausted));
    assert_eq!(group.chart_ids(), vec![last]);
}
