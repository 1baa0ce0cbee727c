//! Boundary to the imperative charting runtime.
//!
//! The runtime owns canvases, panes and series objects; the engine only ever
//! sees opaque handles. Painting is entirely the runtime's business.

pub mod headless;

pub use headless::{BackendCall, HeadlessBackend, HeadlessSeries, SeriesLook};

use crate::data_types::{Candle, ChartId, Color, RenderKind, TimePoint};
use std::fmt;

macro_rules! handle {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

handle!(ChartHandle, "chart@");
handle!(PaneHandle, "pane@");
handle!(SeriesHandle, "series@");

/// Where a value series lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PaneTarget {
    Main,
    Pane(PaneHandle),
}

/// Style of a value (indicator/operation output) series.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeriesStyle {
    pub visible: bool,
    pub color: Color,
    pub render_kind: RenderKind,
}

/// Style of the base kline series.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CandleStyle {
    pub visible: bool,
    pub up_color: Color,
    pub down_color: Color,
}

/// Attributes to change on an existing series. `None` means untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StylePatch {
    pub visible: Option<bool>,
    pub color: Option<Color>,
    pub up_color: Option<Color>,
    pub down_color: Option<Color>,
}

fn changed<T: PartialEq + Copy>(applied: T, desired: T) -> Option<T> {
    (applied != desired).then_some(desired)
}

impl StylePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Render kind is not patchable; a kind change means a new series.
    pub fn for_series(applied: &SeriesStyle, desired: &SeriesStyle) -> Self {
        Self {
            visible: changed(applied.visible, desired.visible),
            color: changed(applied.color, desired.color),
            ..Default::default()
        }
    }

    pub fn for_candles(applied: &CandleStyle, desired: &CandleStyle) -> Self {
        Self {
            visible: changed(applied.visible, desired.visible),
            up_color: changed(applied.up_color, desired.up_color),
            down_color: changed(applied.down_color, desired.down_color),
            ..Default::default()
        }
    }
}

/// The imperative runtime the reconciler drives.
///
/// Calls are infallible from the engine's point of view. Implementations should
/// tolerate redundant destroy calls, but the engine never issues them.
pub trait ChartBackend {
    fn create_chart(&mut self, id: ChartId) -> ChartHandle;
    /// Disposes the chart along with every pane and series it owns.
    fn destroy_chart(&mut self, chart: ChartHandle);

    fn create_pane(&mut self, chart: ChartHandle) -> PaneHandle;
    fn destroy_pane(&mut self, chart: ChartHandle, pane: PaneHandle);

    fn create_candle_series(&mut self, chart: ChartHandle, style: &CandleStyle) -> SeriesHandle;
    fn create_value_series(
        &mut self,
        chart: ChartHandle,
        target: PaneTarget,
        style: &SeriesStyle,
    ) -> SeriesHandle;
    fn destroy_series(&mut self, chart: ChartHandle, series: SeriesHandle);

    fn set_candles(&mut self, series: SeriesHandle, candles: &[Candle]);
    fn set_points(&mut self, series: SeriesHandle, points: &[TimePoint]);
    /// Appends, or replaces the last bar when the time matches.
    fn update_candle(&mut self, series: SeriesHandle, candle: Candle);
    fn update_point(&mut self, series: SeriesHandle, point: TimePoint);

    fn apply_style(&mut self, series: SeriesHandle, patch: &StylePatch);
}
