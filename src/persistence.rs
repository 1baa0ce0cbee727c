//! Persistence of a chart group's configuration list, keyed by the owning
//! strategy. Loading goes through [`repair`] so configurations that name
//! series the catalog no longer offers never reach the reconciler.

use crate::catalog::SeriesCatalog;
use crate::data_types::{BaseSeriesConfig, ChartConfig, ChartId, DerivedSeriesConfig, EntryState};
use crate::series_key::SeriesKey;
use eyre::{bail, ContextCompat, Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    Single,
    Grid,
    #[default]
    Stacked,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartGroupSnapshot {
    #[serde(default)]
    pub layout_mode: LayoutMode,
    #[serde(default)]
    pub charts: Vec<ChartConfig>,
}

impl ChartGroupSnapshot {
    /// Tombstones are only kept in memory; a persisted snapshot has none.
    pub fn compacted(mut self) -> Self {
        self.charts.iter_mut().for_each(ChartConfig::compact);
        self
    }
}

#[derive(Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    layout_mode: LayoutMode,
    #[serde(default)]
    charts: Vec<RawChart>,
}

#[derive(Deserialize)]
struct RawChart {
    id: ChartId,
    base: serde_json::Value,
    #[serde(default)]
    derived: Vec<serde_json::Value>,
}

/// Parses a stored snapshot. An entry that does not decode (bad series key,
/// unknown colour...) is skipped with a warning instead of failing the load;
/// a chart whose base does not decode is skipped whole.
pub fn decode_snapshot(json: &[u8]) -> Result<ChartGroupSnapshot> {
    let raw: RawSnapshot = serde_json::from_slice(json).wrap_err("malformed chart group")?;
    let mut charts = Vec::with_capacity(raw.charts.len());
    for chart in raw.charts {
        let base = match serde_json::from_value::<BaseSeriesConfig>(chart.base) {
            Ok(base) => base,
            Err(err) => {
                warn!("{}: skipping chart with unreadable base: {}", chart.id, err);
                continue;
            }
        };
        let derived = chart
            .derived
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<DerivedSeriesConfig>(value) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!("{}: skipping unreadable series entry: {}", chart.id, err);
                    None
                }
            })
            .collect();
        charts.push(ChartConfig {
            id: chart.id,
            base,
            derived,
        });
    }
    Ok(ChartGroupSnapshot {
        layout_mode: raw.layout_mode,
        charts,
    })
}

pub trait PersistenceService {
    /// `Ok(None)` when nothing was saved for `strategy_id` yet.
    fn load(&self, strategy_id: &str) -> Result<Option<ChartGroupSnapshot>>;

    fn save(&self, strategy_id: &str, snapshot: &ChartGroupSnapshot) -> Result<()>;
}

/// One JSON file per strategy in a directory.
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, strategy_id: &str) -> Result<PathBuf> {
        if strategy_id.is_empty()
            || strategy_id == "."
            || strategy_id == ".."
            || strategy_id.contains(['/', '\\'])
        {
            bail!("invalid strategy id {:?}", strategy_id);
        }
        Ok(self.dir.join(format!("{}.charts.json", strategy_id)))
    }
}

impl PersistenceService for JsonFileStore {
    fn load(&self, strategy_id: &str) -> Result<Option<ChartGroupSnapshot>> {
        let path = self.path_for(strategy_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).wrap_err_with(|| format!("reading {}", path.display()))?;
        let snapshot =
            decode_snapshot(&bytes).wrap_err_with(|| format!("parsing {}", path.display()))?;
        Ok(Some(snapshot))
    }

    fn save(&self, strategy_id: &str, snapshot: &ChartGroupSnapshot) -> Result<()> {
        let path = self.path_for(strategy_id)?;
        fs::create_dir_all(&self.dir)
            .wrap_err_with(|| format!("creating {}", self.dir.display()))?;
        let json = serde_json::to_string_pretty(&snapshot.clone().compacted())
            .wrap_err("serializing chart group")?;
        atomic_write(&path, json.as_bytes())?;
        debug!("saved {} chart(s) to {}", snapshot.charts.len(), path.display());
        Ok(())
    }
}

// Write to a sibling temp file, then rename over the target.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().wrap_err("no parent directory")?;
    let name = path.file_name().wrap_err("no file name")?;
    let tmp = dir.join(format!(".{}.tmp", name.to_string_lossy()));
    {
        let mut file =
            fs::File::create(&tmp).wrap_err_with(|| format!("creating {}", tmp.display()))?;
        file.write_all(bytes)
            .wrap_err_with(|| format!("writing {}", tmp.display()))?;
        if let Err(err) = file.sync_all() {
            warn!("sync of {} failed: {}", tmp.display(), err);
        }
    }
    fs::rename(&tmp, path)
        .wrap_err_with(|| format!("renaming {} to {}", tmp.display(), path.display()))
}

/// In-memory store. `set_failing` makes every call error, for exercising the
/// fallback paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshots: RefCell<HashMap<String, ChartGroupSnapshot>>,
    failing: Cell<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    pub fn get(&self, strategy_id: &str) -> Option<ChartGroupSnapshot> {
        self.snapshots.borrow().get(strategy_id).cloned()
    }
}

impl PersistenceService for MemoryStore {
    fn load(&self, strategy_id: &str) -> Result<Option<ChartGroupSnapshot>> {
        if self.failing.get() {
            bail!("store unavailable");
        }
        Ok(self.get(strategy_id))
    }

    fn save(&self, strategy_id: &str, snapshot: &ChartGroupSnapshot) -> Result<()> {
        if self.failing.get() {
            bail!("store unavailable");
        }
        self.snapshots
            .borrow_mut()
            .insert(strategy_id.to_string(), snapshot.clone().compacted());
        Ok(())
    }
}

/// What [`repair`] changed. Shown to the user once, never blocking.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RepairReport {
    /// `(chart, old base, substitute)`.
    pub replaced_bases: Vec<(ChartId, SeriesKey, SeriesKey)>,
    pub tombstoned: Vec<(ChartId, SeriesKey)>,
    /// `(old id, new id)`.
    pub renumbered: Vec<(ChartId, ChartId)>,
    /// Charts whose base could not be substituted (no kline in the catalog).
    pub dropped: Vec<ChartId>,
}

impl RepairReport {
    pub fn is_empty(&self) -> bool {
        self.replaced_bases.is_empty()
            && self.tombstoned.is_empty()
            && self.renumbered.is_empty()
            && self.dropped.is_empty()
    }
}

impl fmt::Display for RepairReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        for (chart, old, new) in &self.replaced_bases {
            parts.push(format!("{}: {} replaced by {}", chart, old, new));
        }
        for (chart, key) in &self.tombstoned {
            parts.push(format!("{}: {} removed", chart, key));
        }
        for (old, new) in &self.renumbered {
            parts.push(format!("{} renumbered to {}", old, new));
        }
        for chart in &self.dropped {
            parts.push(format!("{} dropped", chart));
        }
        write!(f, "{}", parts.join("; "))
    }
}

/// First assignable id at or after `from` that is not taken, wrapping around
/// to the lowest ids.
fn free_id(taken: &HashSet<ChartId>, from: u32) -> Option<ChartId> {
    let from = from.max(ChartId::FIRST.0);
    (from..u32::MAX)
        .chain(ChartId::FIRST.0..from)
        .map(ChartId)
        .find(|id| id.is_assignable() && !taken.contains(id))
}

/// Rewrites `snapshot` so every chart only references series the catalog
/// offers.
pub fn repair(snapshot: &mut ChartGroupSnapshot, catalog: &SeriesCatalog) -> RepairReport {
    let mut report = RepairReport::default();
    let substitute = catalog.first_base_key().cloned();

    snapshot.charts.retain_mut(|chart| {
        if catalog.contains(&chart.base.key) && chart.base.key.is_base() {
            return true;
        }
        match &substitute {
            Some(new_base) => {
                let old = std::mem::replace(&mut chart.base.key, new_base.clone());
                report.replaced_bases.push((chart.id, old, new_base.clone()));
                true
            }
            None => {
                report.dropped.push(chart.id);
                false
            }
        }
    });

    for chart in &mut snapshot.charts {
        let base = chart.base.key.clone();
        let mut seen = HashSet::new();
        for entry in chart.derived.iter_mut().filter(|d| !d.is_deleted()) {
            let usable = catalog.contains(&entry.key) && entry.key.is_companion_of(&base);
            // Second active entry with a key already seen breaks uniqueness.
            if !usable || !seen.insert(entry.key.clone()) {
                entry.state = EntryState::Deleted;
                report.tombstoned.push((chart.id, entry.key.clone()));
            }
        }
    }

    // Duplicates and ids a group never hands out get a fresh id.
    let mut taken: HashSet<ChartId> = snapshot
        .charts
        .iter()
        .map(|c| c.id)
        .filter(|id| id.is_assignable())
        .collect();
    let mut next = taken.iter().map(|id| id.0).max().unwrap_or(0).saturating_add(1);
    let mut kept = HashSet::new();
    snapshot.charts.retain_mut(|chart| {
        if chart.id.is_assignable() && kept.insert(chart.id) {
            return true;
        }
        match free_id(&taken, next) {
            Some(new_id) => {
                report.renumbered.push((chart.id, new_id));
                chart.id = new_id;
                taken.insert(new_id);
                kept.insert(new_id);
                next = new_id.0.saturating_add(1);
                true
            }
            None => {
                report.dropped.push(chart.id);
                false
            }
        }
    });

    if !report.is_empty() {
        info!("repaired chart group: {}", report);
    }
    report
}
