use rand::Rng;
use strategy_chart::data_types::LayoutSettings;
use strategy_chart::error::LayoutError;
use strategy_chart::layout::{PaneLayout, RemoveOutcome, ResizeOutcome, Size};

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn sum(layout: &PaneLayout) -> f64 {
    layout.proportions().iter().sum()
}

fn layout_with(panels: usize, height: f64) -> PaneLayout {
    let mut layout = PaneLayout::new(LayoutSettings::default());
    layout.set_container(Size::new(800.0, height));
    for _ in 0..panels {
        layout.add_panel();
    }
    layout
}

#[test]
fn test_add_panel_splits_evenly() {
    let mut layout = PaneLayout::new(LayoutSettings::default());
    layout.add_panel();
    assert_eq!(layout.proportions(), vec![1.0]);

    layout.add_panel();
    assert!(approx(layout.proportions()[0], 0.5));
    assert!(approx(layout.proportions()[1], 0.5));

    layout.add_panel();
    for p in layout.proportions() {
        assert!(approx(p, 1.0 / 3.0));
    }
    assert!(approx(sum(&layout), 1.0));
}

#[test]
fn test_add_panel_keeps_relative_sizes() {
    let mut layout = layout_with(2, 1000.0);
    layout.resize(0, 0.25).unwrap();
    layout.add_panel();
    let p = layout.proportions();
    // [0.25, 0.75] scaled by 2/3, new panel gets 1/3
    assert!(approx(p[0], 0.25 * 2.0 / 3.0));
    assert!(approx(p[1], 0.75 * 2.0 / 3.0));
    assert!(approx(p[2], 1.0 / 3.0));
}

#[test]
fn test_resize_then_rejected_below_minimum() {
    let mut layout = layout_with(2, 600.0);

    assert_eq!(layout.resize(0, 0.3), Ok(ResizeOutcome::Applied));
    let p = layout.proportions();
    assert!(approx(p[0], 0.3));
    assert!(approx(p[1], 0.7));

    // Would leave the upper panel at 0.1% of the height: nothing changes
    assert_eq!(layout.resize(0, 0.001), Ok(ResizeOutcome::Rejected));
    let after = layout.proportions();
    assert!(approx(after[0], 0.3));
    assert!(approx(after[1], 0.7));
}

#[test]
fn test_resize_only_touches_adjacent_panels() {
    let mut layout = layout_with(4, 1000.0);
    let before = layout.proportions();
    // Splitter 1 sits between panels 1 and 2, at 0.5 of the height
    assert_eq!(layout.resize(1, 0.6), Ok(ResizeOutcome::Applied));
    let after = layout.proportions();
    assert_eq!(after[0], before[0]);
    assert_eq!(after[3], before[3]);
    assert!(approx(after[1], 0.35));
    assert!(approx(after[2], 0.15));
    assert!(approx(sum(&layout), 1.0));
}

#[test]
fn test_minimum_uses_pixel_floor_on_small_containers() {
    // 10% of 200px is 20px, below the 40px floor
    let mut layout = layout_with(2, 200.0);
    let splitters = LayoutSettings::default().splitter_px;
    let min_fraction = 40.0 / (200.0 - splitters);

    assert_eq!(layout.resize(0, min_fraction * 0.9), Ok(ResizeOutcome::Rejected));
    assert_eq!(layout.resize(0, min_fraction * 1.1), Ok(ResizeOutcome::Applied));
}

#[test]
fn test_resize_errors_and_non_finite() {
    let mut layout = layout_with(2, 600.0);
    assert_eq!(
        layout.resize(1, 0.5),
        Err(LayoutError::SplitterOutOfRange { index: 1, panels: 2 })
    );
    assert_eq!(layout.resize(0, f64::NAN), Ok(ResizeOutcome::Rejected));
}

#[test]
fn test_remove_panel() {
    let mut layout = layout_with(3, 600.0);
    let ids: Vec<_> = layout.panels().iter().map(|p| p.id).collect();

    assert_eq!(layout.remove_panel(1), Ok(RemoveOutcome::Removed(ids[1])));
    assert_eq!(layout.len(), 2);
    assert!(approx(sum(&layout), 1.0));
    assert!(approx(layout.proportions()[0], 0.5));

    assert_eq!(layout.remove_panel_by_id(ids[0]), Some(RemoveOutcome::Removed(ids[0])));
    // One panel is always kept
    assert_eq!(layout.remove_panel(0), Ok(RemoveOutcome::LastPanel));
    assert_eq!(layout.proportions(), vec![1.0]);

    assert_eq!(
        layout.remove_panel(5),
        Err(LayoutError::PanelOutOfRange { index: 5, panels: 1 })
    );
}

#[test]
fn test_move_panels() {
    let mut layout = layout_with(3, 600.0);
    let ids: Vec<_> = layout.panels().iter().map(|p| p.id).collect();
    assert!(layout.move_panel_down(0));
    assert!(layout.move_panel_up(2));
    assert!(!layout.move_panel_up(0));
    assert!(!layout.move_panel_down(2));
    let order: Vec<_> = layout.panels().iter().map(|p| p.id).collect();
    assert_eq!(order, vec![ids[1], ids[2], ids[0]]);
}

#[test]
fn test_frame_geometry() {
    let mut layout = layout_with(2, 404.0);
    layout.resize(0, 0.25).unwrap();
    let frame = layout.frame();

    assert_eq!(frame.panels.len(), 2);
    assert_eq!(frame.splitters.len(), 1);
    assert_eq!(frame.close_controls.len(), 2);

    // 404px minus one 4px splitter leaves 400px for the panels
    let (_, top) = frame.panels[0];
    let (_, bottom) = frame.panels[1];
    assert!(approx(top.height, 100.0));
    assert!(approx(frame.splitters[0].y, 100.0));
    assert!(approx(bottom.y, 104.0));
    assert!(approx(bottom.height, 300.0));

    // Close controls sit in the top right corner of their panel
    let settings = LayoutSettings::default();
    let (_, close) = frame.close_controls[1];
    assert!(approx(close.x, 800.0 - settings.close_control_margin_px - settings.close_control_px));
    assert!(approx(close.y, bottom.y + settings.close_control_margin_px));
}

#[test]
fn test_drag_splitter() {
    let mut layout = layout_with(2, 404.0);
    layout.begin_drag(0).unwrap();
    // 102px is the middle of a splitter below a 100px panel
    assert_eq!(layout.drag_to(102.0), Some(ResizeOutcome::Applied));
    assert!(approx(layout.proportions()[0], 0.25));
    assert_eq!(layout.drag_to(1.0), Some(ResizeOutcome::Rejected));
    layout.end_drag();
    assert_eq!(layout.drag_to(300.0), None);
    assert!(layout.begin_drag(1).is_err());
}

#[test]
fn test_random_operations_keep_sum() {
    let mut rng = rand::rng();
    let mut layout = layout_with(1, 900.0);

    for _ in 0..5_000 {
        match rng.random_range(0..4) {
            0 if layout.len() < 8 => {
                layout.add_panel();
            }
            1 => {
                let index = rng.random_range(0..layout.len());
                layout.remove_panel(index).unwrap();
            }
            _ if layout.len() > 1 => {
                let splitter = rng.random_range(0..layout.len() - 1);
                let before = layout.proportions();
                let outcome = layout.resize(splitter, rng.random::<f64>()).unwrap();
                if outcome == ResizeOutcome::Rejected {
                    assert_eq!(before, layout.proportions());
                }
            }
            _ => {}
        }
        assert!(layout.len() >= 1);
        assert!((sum(&layout) - 1.0).abs() < 1e-9, "sum drifted: {}", sum(&layout));
    }
}
