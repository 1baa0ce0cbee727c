//! Dynamic pane layout
//!
//! N panels stacked vertically in one container, sized by proportions that
//! always sum to 1. Splitters between panels can be dragged; panels can be
//! added and removed. Pixel geometry (panels, splitters, close controls) is
//! always recomputed from the proportions in one pass, never patched.

use crate::data_types::LayoutSettings;
use crate::error::LayoutError;
use tracing::{debug, trace};

const SUM_TOLERANCE: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PanelId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Panel {
    pub id: PanelId,
    pub proportion: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed(PanelId),
    /// The layout keeps at least one panel.
    LastPanel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResizeOutcome {
    Applied,
    /// Would shrink a panel below the minimum; nothing changed.
    Rejected,
}

/// Geometry of the whole layout for one container size.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayoutFrame {
    pub panels: Vec<(PanelId, Rect)>,
    pub splitters: Vec<Rect>,
    pub close_controls: Vec<(PanelId, Rect)>,
}

#[derive(Clone, Debug)]
pub struct PaneLayout {
    panels: Vec<Panel>,
    next_id: u64,
    settings: LayoutSettings,
    container: Size,
    dragging_splitter: Option<usize>,
}

impl PaneLayout {
    pub fn new(settings: LayoutSettings) -> Self {
        Self {
            panels: Vec::new(),
            next_id: 0,
            settings,
            container: Size::default(),
            dragging_splitter: None,
        }
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }

    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    pub fn proportions(&self) -> Vec<f64> {
        self.panels.iter().map(|p| p.proportion).collect()
    }

    pub fn index_of(&self, id: PanelId) -> Option<usize> {
        self.panels.iter().position(|p| p.id == id)
    }

    pub fn container(&self) -> Size {
        self.container
    }

    /// Container size as reported by the host's resize observer.
    pub fn set_container(&mut self, size: Size) {
        self.container = size;
    }

    fn splitter_total(&self) -> f64 {
        self.settings.splitter_px * self.panels.len().saturating_sub(1) as f64
    }

    /// Height shared by the panels once splitters are taken out.
    fn available_height(&self) -> f64 {
        (self.container.height - self.splitter_total()).max(0.0)
    }

    /// Minimum panel size as a fraction of the available height.
    fn min_fraction(&self) -> f64 {
        let available = self.available_height();
        if available <= 0.0 {
            return self.settings.min_size_ratio;
        }
        let min_px = (self.container.height * self.settings.min_size_ratio).max(self.settings.min_size_px);
        min_px / available
    }

    fn renormalize(&mut self) {
        let sum: f64 = self.panels.iter().map(|p| p.proportion).sum();
        if sum <= 0.0 {
            let equal = 1.0 / self.panels.len().max(1) as f64;
            self.panels.iter_mut().for_each(|p| p.proportion = equal);
            return;
        }
        self.panels.iter_mut().for_each(|p| p.proportion /= sum);
        debug_assert!((self.sum() - 1.0).abs() < SUM_TOLERANCE);
    }

    fn sum(&self) -> f64 {
        self.panels.iter().map(|p| p.proportion).sum()
    }

    pub fn add_panel(&mut self) -> PanelId {
        let id = PanelId(self.next_id);
        self.next_id += 1;

        let n = self.panels.len() as f64;
        if self.panels.is_empty() {
            self.panels.push(Panel { id, proportion: 1.0 });
        } else {
            let shrink = n / (n + 1.0);
            self.panels.iter_mut().for_each(|p| p.proportion *= shrink);
            self.panels.push(Panel {
                id,
                proportion: 1.0 / (n + 1.0),
            });
            self.renormalize();
        }
        debug!("layout: added panel {:?}, {} panel(s)", id, self.panels.len());
        id
    }

    pub fn remove_panel(&mut self, index: usize) -> Result<RemoveOutcome, LayoutError> {
        if index >= self.panels.len() {
            return Err(LayoutError::PanelOutOfRange {
                index,
                panels: self.panels.len(),
            });
        }
        if self.panels.len() == 1 {
            return Ok(RemoveOutcome::LastPanel);
        }
        let removed = self.panels.remove(index);
        self.renormalize();
        self.dragging_splitter = None;
        debug!("layout: removed panel {:?}, {} panel(s)", removed.id, self.panels.len());
        Ok(RemoveOutcome::Removed(removed.id))
    }

    pub fn remove_panel_by_id(&mut self, id: PanelId) -> Option<RemoveOutcome> {
        let index = self.index_of(id)?;
        self.remove_panel(index).ok()
    }

    pub fn move_panel_up(&mut self, index: usize) -> bool {
        if index > 0 && index < self.panels.len() {
            self.panels.swap(index, index - 1);
            return true;
        }
        false
    }

    pub fn move_panel_down(&mut self, index: usize) -> bool {
        if index + 1 < self.panels.len() {
            self.panels.swap(index, index + 1);
            return true;
        }
        false
    }

    /// Moves splitter `splitter` (between panels `splitter` and `splitter + 1`)
    /// to `pointer_fraction` of the available height. Only those two panels
    /// change, and only if both stay above the minimum size.
    pub fn resize(&mut self, splitter: usize, pointer_fraction: f64) -> Result<ResizeOutcome, LayoutError> {
        if splitter + 1 >= self.panels.len() {
            return Err(LayoutError::SplitterOutOfRange {
                index: splitter,
                panels: self.panels.len(),
            });
        }
        if !pointer_fraction.is_finite() {
            return Ok(ResizeOutcome::Rejected);
        }

        let start: f64 = self.panels[..splitter].iter().map(|p| p.proportion).sum();
        let pair = self.panels[splitter].proportion + self.panels[splitter + 1].proportion;
        let upper = pointer_fraction - start;
        let lower = pair - upper;

        let min = self.min_fraction();
        if upper < min || lower < min {
            trace!(
                "layout: resize of splitter {} to {:.4} rejected (min {:.4})",
                splitter,
                pointer_fraction,
                min
            );
            return Ok(ResizeOutcome::Rejected);
        }

        self.panels[splitter].proportion = upper;
        self.panels[splitter + 1].proportion = lower;
        Ok(ResizeOutcome::Applied)
    }

    pub fn begin_drag(&mut self, splitter: usize) -> Result<(), LayoutError> {
        if splitter + 1 >= self.panels.len() {
            return Err(LayoutError::SplitterOutOfRange {
                index: splitter,
                panels: self.panels.len(),
            });
        }
        self.dragging_splitter = Some(splitter);
        Ok(())
    }

    /// Pointer move while dragging, `pointer_y` in container pixels.
    pub fn drag_to(&mut self, pointer_y: f64) -> Option<ResizeOutcome> {
        let splitter = self.dragging_splitter?;
        let available = self.available_height();
        if available <= 0.0 {
            return Some(ResizeOutcome::Rejected);
        }
        // Splitters above the dragged one take room that is not part of any panel.
        let before = self.settings.splitter_px * splitter as f64 + self.settings.splitter_px / 2.0;
        let fraction = (pointer_y - before) / available;
        self.resize(splitter, fraction).ok()
    }

    pub fn end_drag(&mut self) {
        self.dragging_splitter = None;
    }

    pub fn dragging_splitter(&self) -> Option<usize> {
        self.dragging_splitter
    }

    /// Full geometry for the current container size.
    pub fn frame(&self) -> LayoutFrame {
        let mut frame = LayoutFrame::default();
        let available = self.available_height();
        let width = self.container.width;
        let control = self.settings.close_control_px;
        let margin = self.settings.close_control_margin_px;
        let last = self.panels.len().saturating_sub(1);

        let mut y = 0.0;
        for (i, panel) in self.panels.iter().enumerate() {
            let height = panel.proportion * available;
            frame.panels.push((
                panel.id,
                Rect {
                    x: 0.0,
                    y,
                    width,
                    height,
                },
            ));
            frame.close_controls.push((
                panel.id,
                Rect {
                    x: (width - margin - control).max(0.0),
                    y: y + margin,
                    width: control,
                    height: control,
                },
            ));
            y += height;
            if i < last {
                frame.splitters.push(Rect {
                    x: 0.0,
                    y,
                    width,
                    height: self.settings.splitter_px,
                });
                y += self.settings.splitter_px;
            }
        }
        frame
    }
}
