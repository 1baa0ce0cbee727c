//! Pointer and wheel interaction math for a time axis, independent of any UI
//! so it can be tested on its own. Every operation leaves the axis inside its
//! limits.

use crate::data_types::{AxisRange, VisibleRange};

/// Smallest span a zoom may reach, in seconds.
pub const MIN_SPAN: f64 = 1e-9;

/// Drag by `delta_px` over a plot `width_px` wide. Dragging right pulls
/// older data into view, so the window moves back in time.
pub fn pan_by_pixels(axis: &mut AxisRange, delta_px: f32, width_px: f32) {
    if width_px <= 0.0 {
        return;
    }
    let seconds_per_px = axis.span() / f64::from(width_px);
    axis.shift(-f64::from(delta_px) * seconds_per_px);
    axis.clamp();
}

/// Span multiplier for one wheel step. Wheel up (positive) zooms in.
pub fn wheel_zoom_factor(delta: f32, sensitivity: f32) -> f64 {
    let step = 1.0 + f64::from(delta.abs() / sensitivity);
    if delta > 0.0 {
        step.recip()
    } else {
        step
    }
}

/// Zooms around the point at `pivot_fraction` (0 = left edge, 1 = right
/// edge) of the current window.
pub fn zoom_at_fraction(axis: &mut AxisRange, pivot_fraction: f64, factor: f64) {
    let span = axis.span();
    let factor = if span * factor < MIN_SPAN && span > 0.0 {
        MIN_SPAN / span
    } else {
        factor
    };
    let pivot = axis.window().start + span * pivot_fraction.clamp(0.0, 1.0);
    axis.scale_around(pivot, factor);
    axis.clamp();
}

/// Window showing `[data_min, data_max]` with `margin_pct` of the span added
/// on both sides. A single timestamp gets a one second wide window. `None`
/// when there is nothing to fit.
pub fn fit_window(data_min: f64, data_max: f64, margin_pct: f64) -> Option<VisibleRange> {
    if !data_min.is_finite() || !data_max.is_finite() || data_min > data_max {
        return None;
    }
    let span = if data_max - data_min < f64::EPSILON {
        1.0
    } else {
        data_max - data_min
    };
    let margin = span * margin_pct;
    Some(VisibleRange::new(data_min - margin, data_max + margin))
}

/// Returns `false` and leaves the axis alone when there is nothing to fit.
pub fn fit(axis: &mut AxisRange, data_min: f64, data_max: f64, margin_pct: f64) -> bool {
    let Some(window) = fit_window(data_min, data_max, margin_pct) else {
        return false;
    };
    axis.set_window(window);
    axis.clamp();
    true
}

/// Keeps the span and puts `time` in the middle, as far as the limits allow.
pub fn center_on(axis: &mut AxisRange, time: f64) {
    let delta = time - axis.window().midpoint();
    axis.shift(delta);
    axis.clamp();
}

/// Time under a pointer `x_px` from the left of a plot `width_px` wide.
/// Positions outside the plot map to its edges.
pub fn time_at_pixel(x_px: f32, width_px: f32, window: VisibleRange) -> f64 {
    if width_px <= 0.0 {
        return window.start;
    }
    let fraction = f64::from((x_px / width_px).clamp(0.0, 1.0));
    window.start + window.span() * fraction
}
