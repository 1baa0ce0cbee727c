use super::config::ValueKey;
use crate::series_key::SeriesKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Unix time in seconds. All charts share one discretised time axis.
pub type Time = i64;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimePoint {
    pub time: Time,
    pub value: f64,
}

impl TimePoint {
    pub fn new(time: Time, value: f64) -> Self {
        Self { time, value }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: Time,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Value keys a kline exposes to the legend.
pub const CANDLE_VALUE_KEYS: [&str; 5] = ["open", "high", "low", "close", "volume"];

impl Candle {
    pub fn field(&self, value_key: &str) -> Option<f64> {
        match value_key {
            "open" => Some(self.open),
            "high" => Some(self.high),
            "low" => Some(self.low),
            "close" => Some(self.close),
            "volume" => Some(self.volume),
            _ => None,
        }
    }
}

/// One incremental point from the streaming channel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PointPayload {
    Candle(Candle),
    Point(TimePoint),
}

impl PointPayload {
    pub fn time(&self) -> Time {
        match self {
            Self::Candle(c) => c.time,
            Self::Point(p) => p.time,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpdateMode {
    #[default]
    Append,
    /// Overwrite the last point when the time matches; append when newer.
    ReplaceLast,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateOutcome {
    Appended,
    Replaced,
    /// Out of order, wrong payload shape or unknown value key.
    Rejected,
}

/// Backing data of one series.
#[derive(Clone, Debug, PartialEq)]
pub enum SeriesData {
    Candles(Vec<Candle>),
    Values(BTreeMap<ValueKey, Vec<TimePoint>>),
}

fn push_ordered<T>(
    items: &mut Vec<T>,
    item: T,
    mode: UpdateMode,
    time_of: impl Fn(&T) -> Time,
) -> UpdateOutcome {
    let time = time_of(&item);
    match items.last() {
        Some(last) if time_of(last) == time && mode == UpdateMode::ReplaceLast => {
            if let Some(slot) = items.last_mut() {
                *slot = item;
            }
            UpdateOutcome::Replaced
        }
        Some(last) if time_of(last) >= time => UpdateOutcome::Rejected,
        _ => {
            items.push(item);
            UpdateOutcome::Appended
        }
    }
}

impl SeriesData {
    pub fn values<K: Into<ValueKey>>(values: impl IntoIterator<Item = (K, Vec<TimePoint>)>) -> Self {
        Self::Values(values.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Sorts by time and keeps the last point of any duplicated timestamp.
    pub fn normalize(&mut self) {
        fn fix<T: Copy>(items: &mut Vec<T>, time_of: impl Fn(&T) -> Time) -> bool {
            if items.windows(2).all(|w| time_of(&w[0]) < time_of(&w[1])) {
                return false;
            }
            items.sort_by_key(|p| time_of(p));
            let mut out: Vec<T> = Vec::with_capacity(items.len());
            for item in items.drain(..) {
                match out.last_mut() {
                    Some(last) if time_of(last) == time_of(&item) => *last = item,
                    _ => out.push(item),
                }
            }
            *items = out;
            true
        }

        let fixed = match self {
            Self::Candles(c) => fix(c, |c| c.time),
            Self::Values(map) => map
                .values_mut()
                .fold(false, |acc, pts| fix(pts, |p| p.time) || acc),
        };
        if fixed {
            tracing::debug!("series data was not strictly increasing, normalised");
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Candles(c) => c.len(),
            Self::Values(map) => map.values().map(Vec::len).max().unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn points(&self, value_key: &str) -> Option<&[TimePoint]> {
        match self {
            Self::Values(map) => map.get(value_key).map(Vec::as_slice),
            Self::Candles(_) => None,
        }
    }

    pub fn candles(&self) -> Option<&[Candle]> {
        match self {
            Self::Candles(c) => Some(c),
            Self::Values(_) => None,
        }
    }

    pub fn last_time(&self) -> Option<Time> {
        match self {
            Self::Candles(c) => c.last().map(|c| c.time),
            Self::Values(map) => map.values().filter_map(|p| p.last()).map(|p| p.time).max(),
        }
    }

    /// Value of `value_key` at exactly `time`, or at the last point when `time`
    /// is `None`.
    pub fn lookup(&self, value_key: &str, time: Option<Time>) -> Option<(Time, f64)> {
        match self {
            Self::Candles(candles) => {
                let candle = match time {
                    None => candles.last()?,
                    Some(t) => {
                        let idx = candles.binary_search_by_key(&t, |c| c.time).ok()?;
                        &candles[idx]
                    }
                };
                candle.field(value_key).map(|v| (candle.time, v))
            }
            Self::Values(map) => {
                let points = map.get(value_key)?;
                let point = match time {
                    None => points.last()?,
                    Some(t) => {
                        let idx = points.binary_search_by_key(&t, |p| p.time).ok()?;
                        &points[idx]
                    }
                };
                Some((point.time, point.value))
            }
        }
    }

    pub fn apply(
        &mut self,
        value_key: Option<&str>,
        payload: PointPayload,
        mode: UpdateMode,
    ) -> UpdateOutcome {
        match (self, payload) {
            (Self::Candles(candles), PointPayload::Candle(c)) => {
                push_ordered(candles, c, mode, |c| c.time)
            }
            (Self::Values(map), PointPayload::Point(p)) => {
                let Some(points) = value_key.and_then(|k| map.get_mut(k)) else {
                    return UpdateOutcome::Rejected;
                };
                push_ordered(points, p, mode, |p| p.time)
            }
            _ => UpdateOutcome::Rejected,
        }
    }
}

/// Raw data behind every series of one chart instance. Presence of a key is
/// the readiness signal for creating its runtime series.
#[derive(Clone, Debug, Default)]
pub struct BackingData {
    series: HashMap<SeriesKey, SeriesData>,
}

impl BackingData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &SeriesKey) -> bool {
        self.series.contains_key(key)
    }

    pub fn get(&self, key: &SeriesKey) -> Option<&SeriesData> {
        self.series.get(key)
    }

    /// Full replace, e.g. after a fetch or a symbol/interval change.
    pub fn insert(&mut self, key: SeriesKey, mut data: SeriesData) {
        data.normalize();
        self.series.insert(key, data);
    }

    pub fn remove(&mut self, key: &SeriesKey) -> Option<SeriesData> {
        self.series.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &SeriesKey> {
        self.series.keys()
    }

    pub fn apply(
        &mut self,
        key: &SeriesKey,
        value_key: Option<&str>,
        payload: PointPayload,
        mode: UpdateMode,
    ) -> UpdateOutcome {
        match self.series.get_mut(key) {
            Some(data) => data.apply(value_key, payload, mode),
            None => UpdateOutcome::Rejected,
        }
    }

    pub fn clear(&mut self) {
        self.series.clear();
    }
}
