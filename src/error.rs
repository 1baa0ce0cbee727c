//! Typed errors for the parts of the engine callers may want to match on.
//!
//! Failures coming from external collaborators (fetching, persistence) travel
//! as `eyre::Result` instead.

use crate::data_types::ChartId;
use crate::series_key::SeriesKey;
use thiserror::Error;

/// A series key string or component could not be turned into a valid key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("empty series key")]
    Empty,
    #[error("unknown series kind `{0}`")]
    UnknownKind(String),
    #[error("series key `{key}` has {found} fields, expected {expected}")]
    FieldCount {
        key: String,
        expected: usize,
        found: usize,
    },
    #[error("empty `{0}` component in series key")]
    EmptyComponent(&'static str),
    #[error("component `{0}` contains a reserved separator")]
    ReservedCharacter(String),
    #[error("malformed parameter `{0}`, expected name=value")]
    MalformedParam(String),
    #[error("duplicate parameter `{0}`")]
    DuplicateParam(String),
    #[error("invalid interval `{0}`")]
    InvalidInterval(String),
}

/// Caller bugs when driving the pane layout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("splitter index {index} out of range for {panels} panels")]
    SplitterOutOfRange { index: usize, panels: usize },
    #[error("panel index {index} out of range for {panels} panels")]
    PanelOutOfRange { index: usize, panels: usize },
}

/// Rejected chart group operations. The group is left unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GroupError {
    #[error("no chart with id {0}")]
    UnknownChart(ChartId),
    #[error("the last chart of a group cannot be removed")]
    LastChart,
    #[error("no chart id left to hand out")]
    IdsExhausted,
    #[error("the catalog offers no kline to base a chart on")]
    NoBaseKey,
    #[error("series `{0}` is not offered by the catalog")]
    Unavailable(SeriesKey),
    #[error("series `{key}` does not belong to the market of `{base}`")]
    NotCompanion { key: SeriesKey, base: SeriesKey },
}
