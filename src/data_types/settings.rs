use super::color::Color;
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Sizing rules of the stacked pane layout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutSettings {
    /// Minimum panel height as a share of the container height.
    pub min_size_ratio: f64,
    /// Absolute floor for the minimum panel height.
    pub min_size_px: f64,
    pub splitter_px: f64,
    /// Side of the square close control drawn in each panel's corner.
    pub close_control_px: f64,
    pub close_control_margin_px: f64,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            min_size_ratio: 0.1,
            min_size_px: 40.0,
            splitter_px: 4.0,
            close_control_px: 20.0,
            close_control_margin_px: 8.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegendOptions {
    /// Timezone the legend's time label is rendered in.
    pub timezone: chrono_tz::Tz,
    /// Placeholder for a series with no value at the active time.
    pub empty_marker: String,
}

impl Default for LegendOptions {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::UTC,
            empty_marker: crate::legend::EMPTY_MARKER.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultColors {
    pub up: Color,
    pub down: Color,
    /// Cycled through when a new derived value series needs a colour.
    pub palette: Vec<Color>,
}

impl Default for DefaultColors {
    fn default() -> Self {
        Self {
            up: Color::rgb(0x26, 0xa6, 0x9a),
            down: Color::rgb(0xef, 0x53, 0x50),
            palette: vec![
                Color::rgb(0x29, 0x62, 0xff),
                Color::rgb(0xff, 0x98, 0x00),
                Color::rgb(0x9c, 0x27, 0xb0),
                Color::rgb(0x00, 0xbc, 0xd4),
                Color::rgb(0xe9, 0x1e, 0x63),
            ],
        }
    }
}

impl DefaultColors {
    pub fn pick(&self, index: usize) -> Color {
        if self.palette.is_empty() {
            return self.up;
        }
        self.palette[index % self.palette.len()]
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Failed fetches of a key stop being retried after this many attempts.
    /// `None` retries on every reconcile.
    pub max_attempts: Option<u32>,
}

impl FetchSettings {
    pub fn allows_retry(&self, failed_attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| failed_attempts < max)
    }
}

/// Engine-wide settings. Every field falls back to its default when missing
/// from a settings file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub layout: LayoutSettings,
    pub legend: LegendOptions,
    pub colors: DefaultColors,
    pub fetch: FetchSettings,
}

impl EngineSettings {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).wrap_err("invalid engine settings")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading settings from {}", path.display()))?;
        Self::from_json_str(&raw)
    }
}
