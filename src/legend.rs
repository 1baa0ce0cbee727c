//! Crosshair legend derivation
//!
//! Turns a cursor position (or its absence) into the label/value/colour rows
//! of a chart's legend overlay. Pure: reads backing data, writes nothing.

use crate::data_types::{
    BackingData, BaseSeriesConfig, ChartConfig, Color, DerivedSeriesConfig, LegendOptions, Time,
    ValueKey, ValueKind, CANDLE_VALUE_KEYS,
};
use crate::series_key::SeriesKey;
use crate::utils::date_formatter::{format_for_interval, format_timestamp};
use std::collections::{BTreeMap, HashMap};

/// Placeholder shown for a series with no value at the active time.
pub const EMPTY_MARKER: &str = "--";

#[derive(Clone, Debug, PartialEq)]
pub struct LegendValue {
    pub value_key: ValueKey,
    pub label: String,
    pub color: Color,
    /// Used instead of `color` when the candle at the active time closed down.
    pub down_color: Option<Color>,
    pub kind: ValueKind,
}

/// One series as the legend sees it.
#[derive(Clone, Debug, PartialEq)]
pub struct LegendSeries {
    pub key: SeriesKey,
    pub values: Vec<LegendValue>,
}

impl LegendSeries {
    pub fn for_base(base: &BaseSeriesConfig) -> Self {
        let values = CANDLE_VALUE_KEYS
            .iter()
            .map(|k| LegendValue {
                value_key: (*k).to_string(),
                label: k[..1].to_uppercase(),
                color: base.up_color,
                down_color: Some(base.down_color),
                kind: ValueKind::Number,
            })
            .collect();
        Self {
            key: base.key.clone(),
            values,
        }
    }

    pub fn for_derived(entry: &DerivedSeriesConfig) -> Self {
        let series_label = entry.key.label();
        let single = entry.values.len() == 1;
        let values = entry
            .values
            .iter()
            .map(|v| LegendValue {
                value_key: v.value_key.clone(),
                label: if single {
                    series_label.clone()
                } else {
                    format!("{} {}", series_label, v.value_key)
                },
                color: v.color,
                down_color: None,
                kind: v.value_kind,
            })
            .collect();
        Self {
            key: entry.key.clone(),
            values,
        }
    }

    /// Visible series of a chart, base first, in configuration order.
    pub fn for_chart(config: &ChartConfig) -> Vec<Self> {
        let mut series = Vec::new();
        if config.base.visible {
            series.push(Self::for_base(&config.base));
        }
        series.extend(
            config
                .active_derived()
                .filter(|d| d.visible)
                .map(Self::for_derived),
        );
        series
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LegendEntry {
    pub label: String,
    pub value: String,
    pub color: Color,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LegendView {
    /// Resolved time of the displayed values.
    pub time: Option<Time>,
    pub time_label: Option<String>,
    /// Keyed by value key; `series_key/value_key` when two series share one.
    pub entries: BTreeMap<String, LegendEntry>,
}

pub fn format_value(value: f64, kind: ValueKind) -> String {
    match kind {
        ValueKind::Number => format!("{:.2}", value),
        ValueKind::Percent => format!("{:.2}%", value),
    }
}

fn closed_down(data: &BackingData, key: &SeriesKey, time: Option<Time>) -> bool {
    let Some(candles) = data.get(key) else {
        return false;
    };
    match (candles.lookup("open", time), candles.lookup("close", time)) {
        (Some((_, open)), Some((_, close))) => close < open,
        _ => false,
    }
}

/// Legend rows for `series` at `cursor`, or at each series' last point when
/// the pointer is not over the chart.
pub fn derive_legend(
    series: &[LegendSeries],
    data: &BackingData,
    cursor: Option<Time>,
    options: &LegendOptions,
) -> LegendView {
    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    for s in series {
        for v in &s.values {
            *occurrences.entry(v.value_key.as_str()).or_default() += 1;
        }
    }

    let mut view = LegendView::default();
    let mut latest: Option<Time> = None;

    for s in series {
        let series_data = data.get(&s.key);
        let down = closed_down(data, &s.key, cursor);
        for v in &s.values {
            let hit = series_data.and_then(|d| d.lookup(&v.value_key, cursor));
            if let Some((t, _)) = hit {
                latest = latest.max(Some(t));
            }
            let value = match hit {
                Some((_, value)) => format_value(value, v.kind),
                None => options.empty_marker.clone(),
            };
            let color = match v.down_color {
                Some(c) if down => c,
                _ => v.color,
            };
            let key = if occurrences.get(v.value_key.as_str()).copied().unwrap_or(0) > 1 {
                format!("{}/{}", s.key, v.value_key)
            } else {
                v.value_key.clone()
            };
            view.entries.insert(
                key,
                LegendEntry {
                    label: v.label.clone(),
                    value,
                    color,
                },
            );
        }
    }

    view.time = cursor.or(latest);
    if let (Some(time), Some(first)) = (view.time, series.first()) {
        let format = format_for_interval(first.key.interval().as_seconds());
        view.time_label = Some(format_timestamp(time, format, options.timezone));
    }
    view
}
