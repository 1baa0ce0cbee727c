use serde::{Deserialize, Serialize};

/// Visible window of a time axis, in data units (unix seconds).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VisibleRange {
    pub start: f64,
    pub end: f64,
}

impl VisibleRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn span(&self) -> f64 {
        self.end - self.start
    }

    pub fn midpoint(&self) -> f64 {
        self.start + self.span() / 2.0
    }

    fn shifted(self, delta: f64) -> Self {
        Self::new(self.start + delta, self.end + delta)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AxisId(pub u64);

/// Bounds the window of an axis may not scroll past. Either side is optional.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimeLimits {
    pub earliest: Option<f64>,
    pub latest: Option<f64>,
}

impl TimeLimits {
    pub fn new(earliest: Option<f64>, latest: Option<f64>) -> Self {
        Self { earliest, latest }
    }

    fn span(&self) -> Option<f64> {
        Some(self.latest? - self.earliest?)
    }
}

/// Window of one time axis plus the limits it is kept inside.
///
/// The window may be wider than the limits (zoomed out past the data); it is
/// then only ever moved so that it keeps covering them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AxisRange {
    window: VisibleRange,
    limits: TimeLimits,
}

impl AxisRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            window: VisibleRange::new(start, end),
            limits: TimeLimits::default(),
        }
    }

    pub fn window(&self) -> VisibleRange {
        self.window
    }

    /// Replaces the window as is, without applying the limits. Used for
    /// writes coming from the synchronizer.
    pub fn set_window(&mut self, window: VisibleRange) {
        self.window = window;
    }

    pub fn limits(&self) -> TimeLimits {
        self.limits
    }

    pub fn set_limits(&mut self, limits: TimeLimits) {
        self.limits = limits;
        self.clamp();
    }

    pub fn span(&self) -> f64 {
        self.window.span()
    }

    pub fn shift(&mut self, delta: f64) {
        self.window = self.window.shifted(delta);
    }

    /// Scales the span by `factor` keeping `pivot` at the same relative
    /// position in the window.
    pub fn scale_around(&mut self, pivot: f64, factor: f64) {
        self.window = VisibleRange::new(
            pivot - (pivot - self.window.start) * factor,
            pivot + (self.window.end - pivot) * factor,
        );
    }

    /// What is actually shown: the window cut down to the limits.
    pub fn bounded_window(&self) -> VisibleRange {
        let mut shown = self.window;
        if let Some(earliest) = self.limits.earliest {
            shown.start = shown.start.max(earliest);
            shown.end = shown.end.max(earliest);
        }
        if let Some(latest) = self.limits.latest {
            shown.start = shown.start.min(latest);
            shown.end = shown.end.min(latest);
        }
        shown
    }

    /// Moves the window back inside the limits. The span never changes.
    pub fn clamp(&mut self) {
        let TimeLimits { earliest, latest } = self.limits;
        let too_wide = self.limits.span().is_some_and(|room| self.span() > room);

        let delta = if too_wide {
            // Keep covering the whole limited interval.
            match (earliest, latest) {
                (Some(e), _) if self.window.start > e => e - self.window.start,
                (_, Some(l)) if self.window.end < l => l - self.window.end,
                _ => 0.0,
            }
        } else {
            match (earliest, latest) {
                (Some(e), _) if self.window.start < e => e - self.window.start,
                (_, Some(l)) if self.window.end > l => l - self.window.end,
                _ => 0.0,
            }
        };
        if delta != 0.0 {
            self.shift(delta);
        }
    }
}
