//! Declarative chart configuration: what one chart should show.

use super::color::Color;
use super::settings::DefaultColors;
use crate::series_key::SeriesKey;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Name of one output of a series (`close`, `ma`, `upper`, ...).
pub type ValueKey = String;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChartId(pub u32);

impl ChartId {
    /// First id a group hands out.
    pub const FIRST: ChartId = ChartId(1);

    /// `0` and `u32::MAX` are never handed out, so the next id always fits.
    pub fn is_assignable(self) -> bool {
        self.0 != 0 && self.0 != u32::MAX
    }
}

impl fmt::Display for ChartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chart#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderKind {
    #[default]
    Line,
    Column,
    Area,
    Dashed,
}

/// Semantic kind of a value, drives legend formatting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    #[default]
    Number,
    Percent,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueSeriesConfig {
    pub value_key: ValueKey,
    #[serde(default)]
    pub render_kind: RenderKind,
    pub color: Color,
    #[serde(default)]
    pub value_kind: ValueKind,
}

impl ValueSeriesConfig {
    pub fn new(value_key: impl Into<ValueKey>, render_kind: RenderKind, color: Color) -> Self {
        Self {
            value_key: value_key.into(),
            render_kind,
            color,
            value_kind: ValueKind::Number,
        }
    }

    pub fn percent(mut self) -> Self {
        self.value_kind = ValueKind::Percent;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BaseSeriesConfig {
    pub key: SeriesKey,
    #[serde(default = "default_true")]
    pub visible: bool,
    pub up_color: Color,
    pub down_color: Color,
}

impl BaseSeriesConfig {
    pub fn new(key: SeriesKey, colors: &DefaultColors) -> Self {
        Self {
            key,
            visible: true,
            up_color: colors.up,
            down_color: colors.down,
        }
    }
}

/// Tombstone tag of a derived entry. The entry's style lives next to the tag so
/// a deleted entry comes back exactly as it was.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    #[default]
    Active,
    Deleted,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DerivedSeriesConfig {
    pub key: SeriesKey,
    pub in_main_pane: bool,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub state: EntryState,
    pub values: Vec<ValueSeriesConfig>,
}

impl DerivedSeriesConfig {
    pub fn new(key: SeriesKey, in_main_pane: bool, values: Vec<ValueSeriesConfig>) -> Self {
        Self {
            key,
            in_main_pane,
            visible: true,
            state: EntryState::Active,
            values,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.state == EntryState::Deleted
    }

    pub fn value(&self, value_key: &str) -> Option<&ValueSeriesConfig> {
        self.values.iter().find(|v| v.value_key == value_key)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// A tombstoned entry with the same key was reactivated with its old style.
    Restored,
    AlreadyActive,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChartConfig {
    pub id: ChartId,
    pub base: BaseSeriesConfig,
    #[serde(default)]
    pub derived: Vec<DerivedSeriesConfig>,
}

impl ChartConfig {
    pub fn new(id: ChartId, base_key: SeriesKey) -> Self {
        Self::with_colors(id, base_key, &DefaultColors::default())
    }

    pub fn with_colors(id: ChartId, base_key: SeriesKey, colors: &DefaultColors) -> Self {
        Self {
            id,
            base: BaseSeriesConfig::new(base_key, colors),
            derived: vec![],
        }
    }

    pub fn active_derived(&self) -> impl Iterator<Item = &DerivedSeriesConfig> {
        self.derived.iter().filter(|d| !d.is_deleted())
    }

    /// The active entry for `key`, if any.
    pub fn active(&self, key: &SeriesKey) -> Option<&DerivedSeriesConfig> {
        self.active_derived().find(|d| &d.key == key)
    }

    fn active_mut(&mut self, key: &SeriesKey) -> Option<&mut DerivedSeriesConfig> {
        self.derived
            .iter_mut()
            .find(|d| !d.is_deleted() && &d.key == key)
    }

    pub fn add_derived(&mut self, entry: DerivedSeriesConfig) -> AddOutcome {
        if self.active(&entry.key).is_some() {
            return AddOutcome::AlreadyActive;
        }
        if let Some(tomb) = self.derived.iter_mut().find(|d| d.key == entry.key) {
            tomb.state = EntryState::Active;
            return AddOutcome::Restored;
        }
        let mut entry = entry;
        entry.state = EntryState::Active;
        self.derived.push(entry);
        AddOutcome::Added
    }

    /// Tombstones the entry. Returns `false` if there was no active entry.
    pub fn remove_derived(&mut self, key: &SeriesKey) -> bool {
        match self.active_mut(key) {
            Some(entry) => {
                entry.state = EntryState::Deleted;
                true
            }
            None => false,
        }
    }

    pub fn set_derived_visible(&mut self, key: &SeriesKey, visible: bool) -> bool {
        match self.active_mut(key) {
            Some(entry) if entry.visible != visible => {
                entry.visible = visible;
                true
            }
            _ => false,
        }
    }

    pub fn set_in_main_pane(&mut self, key: &SeriesKey, in_main_pane: bool) -> bool {
        match self.active_mut(key) {
            Some(entry) if entry.in_main_pane != in_main_pane => {
                entry.in_main_pane = in_main_pane;
                true
            }
            _ => false,
        }
    }

    pub fn set_value_color(&mut self, key: &SeriesKey, value_key: &str, color: Color) -> bool {
        let Some(entry) = self.active_mut(key) else {
            return false;
        };
        match entry.values.iter_mut().find(|v| v.value_key == value_key) {
            Some(v) if v.color != color => {
                v.color = color;
                true
            }
            _ => false,
        }
    }

    pub fn set_base_visible(&mut self, visible: bool) -> bool {
        if self.base.visible == visible {
            return false;
        }
        self.base.visible = visible;
        true
    }

    /// Switches the chart to another kline. Derived entries, tombstones
    /// included, follow the new market.
    pub fn change_base(&mut self, new_key: SeriesKey) -> bool {
        if self.base.key == new_key || !new_key.is_base() {
            return false;
        }
        let mut active = HashSet::new();
        for entry in self.derived.iter_mut().filter(|d| !d.is_deleted()) {
            if let Some(key) = entry.key.rebased(&new_key) {
                entry.key = key;
            }
            active.insert(entry.key.clone());
        }
        // A tombstone landing on the key of an active entry, or of an earlier
        // tombstone, would break key uniqueness on restore.
        let mut tombstones = HashSet::new();
        self.derived.retain_mut(|entry| {
            if !entry.is_deleted() {
                return true;
            }
            match entry.key.rebased(&new_key) {
                Some(key) if !active.contains(&key) && tombstones.insert(key.clone()) => {
                    entry.key = key;
                    true
                }
                _ => false,
            }
        });
        self.base.key = new_key;
        true
    }

    /// Physically drops tombstones. Only used when persisting.
    pub fn compact(&mut self) {
        self.derived.retain(|d| !d.is_deleted());
    }
}
