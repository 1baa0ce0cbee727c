//! In-memory runtime that records every call.
//!
//! Useful wherever no real charting runtime is attached: tests, server-side
//! snapshotting, or checking a configuration before showing it.

use super::{
    CandleStyle, ChartBackend, ChartHandle, PaneHandle, PaneTarget, SeriesHandle, SeriesStyle,
    StylePatch,
};
use crate::data_types::{Candle, ChartId, TimePoint};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

#[derive(Clone, Debug, PartialEq)]
pub enum BackendCall {
    CreateChart(ChartId, ChartHandle),
    DestroyChart(ChartHandle),
    CreatePane(ChartHandle, PaneHandle),
    DestroyPane(ChartHandle, PaneHandle),
    CreateCandleSeries(ChartHandle, SeriesHandle),
    CreateValueSeries(ChartHandle, PaneTarget, SeriesHandle),
    DestroySeries(ChartHandle, SeriesHandle),
    SetCandles(SeriesHandle, usize),
    SetPoints(SeriesHandle, usize),
    UpdateCandle(SeriesHandle, Candle),
    UpdatePoint(SeriesHandle, TimePoint),
    ApplyStyle(SeriesHandle, StylePatch),
}

impl BackendCall {
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Self::CreateChart(..)
                | Self::CreatePane(..)
                | Self::CreateCandleSeries(..)
                | Self::CreateValueSeries(..)
        )
    }

    pub fn is_destroy(&self) -> bool {
        matches!(
            self,
            Self::DestroyChart(..) | Self::DestroyPane(..) | Self::DestroySeries(..)
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SeriesLook {
    Candles(CandleStyle),
    Values(SeriesStyle),
}

/// A live series as the headless runtime sees it.
#[derive(Clone, Debug, PartialEq)]
pub struct HeadlessSeries {
    pub chart: ChartHandle,
    pub target: PaneTarget,
    pub look: SeriesLook,
    pub len: usize,
    pub last_time: Option<i64>,
}

#[derive(Debug, Default)]
pub struct HeadlessBackend {
    next_handle: u64,
    calls: Vec<BackendCall>,
    charts: BTreeSet<ChartHandle>,
    panes: BTreeMap<PaneHandle, ChartHandle>,
    series: BTreeMap<SeriesHandle, HeadlessSeries>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<BackendCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn live_charts(&self) -> usize {
        self.charts.len()
    }

    pub fn live_panes(&self) -> usize {
        self.panes.len()
    }

    pub fn live_series(&self) -> usize {
        self.series.len()
    }

    pub fn series(&self, handle: SeriesHandle) -> Option<&HeadlessSeries> {
        self.series.get(&handle)
    }

    pub fn series_on(&self, chart: ChartHandle) -> impl Iterator<Item = (&SeriesHandle, &HeadlessSeries)> {
        self.series.iter().filter(move |(_, s)| s.chart == chart)
    }

    pub fn is_live_pane(&self, pane: PaneHandle) -> bool {
        self.panes.contains_key(&pane)
    }

    fn series_mut(&mut self, handle: SeriesHandle, op: &str) -> Option<&mut HeadlessSeries> {
        let series = self.series.get_mut(&handle);
        if series.is_none() {
            warn!("headless backend: {} on unknown {}", op, handle);
        }
        series
    }
}

impl ChartBackend for HeadlessBackend {
    fn create_chart(&mut self, id: ChartId) -> ChartHandle {
        let handle = ChartHandle(self.next());
        self.charts.insert(handle);
        self.calls.push(BackendCall::CreateChart(id, handle));
        handle
    }

    fn destroy_chart(&mut self, chart: ChartHandle) {
        self.calls.push(BackendCall::DestroyChart(chart));
        if !self.charts.remove(&chart) {
            warn!("headless backend: destroy of unknown {}", chart);
            return;
        }
        self.panes.retain(|_, owner| *owner != chart);
        self.series.retain(|_, s| s.chart != chart);
    }

    fn create_pane(&mut self, chart: ChartHandle) -> PaneHandle {
        let handle = PaneHandle(self.next());
        self.panes.insert(handle, chart);
        self.calls.push(BackendCall::CreatePane(chart, handle));
        handle
    }

    fn destroy_pane(&mut self, chart: ChartHandle, pane: PaneHandle) {
        self.calls.push(BackendCall::DestroyPane(chart, pane));
        if self.panes.remove(&pane).is_none() {
            warn!("headless backend: destroy of unknown {}", pane);
        }
        self.series
            .retain(|_, s| s.target != PaneTarget::Pane(pane));
    }

    fn create_candle_series(&mut self, chart: ChartHandle, style: &CandleStyle) -> SeriesHandle {
        let handle = SeriesHandle(self.next());
        self.series.insert(
            handle,
            HeadlessSeries {
                chart,
                target: PaneTarget::Main,
                look: SeriesLook::Candles(*style),
                len: 0,
                last_time: None,
            },
        );
        self.calls.push(BackendCall::CreateCandleSeries(chart, handle));
        handle
    }

    fn create_value_series(
        &mut self,
        chart: ChartHandle,
        target: PaneTarget,
        style: &SeriesStyle,
    ) -> SeriesHandle {
        let handle = SeriesHandle(self.next());
        self.series.insert(
            handle,
            HeadlessSeries {
                chart,
                target,
                look: SeriesLook::Values(*style),
                len: 0,
                last_time: None,
            },
        );
        self.calls
            .push(BackendCall::CreateValueSeries(chart, target, handle));
        handle
    }

    fn destroy_series(&mut self, chart: ChartHandle, series: SeriesHandle) {
        self.calls.push(BackendCall::DestroySeries(chart, series));
        if self.series.remove(&series).is_none() {
            warn!("headless backend: destroy of unknown {}", series);
        }
    }

    fn set_candles(&mut self, series: SeriesHandle, candles: &[Candle]) {
        self.calls.push(BackendCall::SetCandles(series, candles.len()));
        if let Some(s) = self.series_mut(series, "set_candles") {
            s.len = candles.len();
            s.last_time = candles.last().map(|c| c.time);
        }
    }

    fn set_points(&mut self, series: SeriesHandle, points: &[TimePoint]) {
        self.calls.push(BackendCall::SetPoints(series, points.len()));
        if let Some(s) = self.series_mut(series, "set_points") {
            s.len = points.len();
            s.last_time = points.last().map(|p| p.time);
        }
    }

    fn update_candle(&mut self, series: SeriesHandle, candle: Candle) {
        self.calls.push(BackendCall::UpdateCandle(series, candle));
        if let Some(s) = self.series_mut(series, "update_candle") {
            if s.last_time != Some(candle.time) {
                s.len += 1;
                s.last_time = Some(candle.time);
            }
        }
    }

    fn update_point(&mut self, series: SeriesHandle, point: TimePoint) {
        self.calls.push(BackendCall::UpdatePoint(series, point));
        if let Some(s) = self.series_mut(series, "update_point") {
            if s.last_time != Some(point.time) {
                s.len += 1;
                s.last_time = Some(point.time);
            }
        }
    }

    fn apply_style(&mut self, series: SeriesHandle, patch: &StylePatch) {
        self.calls.push(BackendCall::ApplyStyle(series, *patch));
        let Some(s) = self.series_mut(series, "apply_style") else {
            return;
        };
        match &mut s.look {
            SeriesLook::Values(style) => {
                if let Some(v) = patch.visible {
                    style.visible = v;
                }
                if let Some(c) = patch.color {
                    style.color = c;
                }
            }
            SeriesLook::Candles(style) => {
                if let Some(v) = patch.visible {
                    style.visible = v;
                }
                if let Some(c) = patch.up_color {
                    style.up_color = c;
                }
                if let Some(c) = patch.down_color {
                    style.down_color = c;
                }
            }
        }
    }
}
