//! strategy_chart: declarative multi-pane chart groups on top of an imperative
//! charting runtime.
//!
//! A chart is described by a [`ChartConfig`]; the [`reconcile`] engine keeps
//! the runtime objects behind a [`ChartBackend`] in line with it, fetching the
//! data each series needs on the way. [`ChartGroup`] ties several charts
//! together with a synchronised time axis, a split-pane layout, crosshair
//! legends and persistence.

pub mod axis_sync;
pub mod backend;
pub mod catalog;
pub mod chart_group;
pub mod data_service;
pub mod data_types;
pub mod error;
pub mod layout;
pub mod legend;
pub mod persistence;
pub mod reconcile;
pub mod registry;
pub mod series_key;
pub mod utils;
pub mod view_controller;

pub use axis_sync::{AxisSynchronizer, Propagation, SyncedAxis, TimeAxis};
pub use backend::{ChartBackend, HeadlessBackend};
pub use catalog::{SeriesCatalog, SharedCatalog};
pub use chart_group::{
    BaseChange, ChartGroup, ConfigChange, ConfigChanged, LoadOutcome, ReconcileRequests,
};
pub use data_service::{DataService, MemoryDataService, StreamUpdate};
pub use data_types::{
    BackingData, Candle, ChartConfig, ChartId, Color, DerivedSeriesConfig, EngineSettings,
    RenderKind, SeriesData, TimePoint, ValueSeriesConfig,
};
pub use error::{GroupError, KeyError, LayoutError};
pub use layout::{PaneLayout, PanelId};
pub use legend::{derive_legend, LegendView};
pub use persistence::{
    repair, ChartGroupSnapshot, JsonFileStore, LayoutMode, MemoryStore, PersistenceService,
    RepairReport,
};
pub use reconcile::{reconcile, ReconcileReport};
pub use registry::RuntimeRegistry;
pub use series_key::{SeriesKey, SeriesKind};
