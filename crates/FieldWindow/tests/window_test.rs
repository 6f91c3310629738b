use field_window::{RenderPlan, WindowConfig, Windower, select_window};

fn field_ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("field_{i}")).collect()
}

#[test]
fn test_large_form_renders_bounded_window_at_midpoint() {
    let config = WindowConfig::default();
    let viewport = 800.0;
    let max_rendered = (viewport / config.estimated_item_height).ceil() as usize + 1 + 2 * config.overscan;

    for total in [500, 5_000] {
        // 1. Setup
        let mut windower = Windower::new(config.clone());
        windower.set_form_shape(total, false);
        windower.update_visible(&field_ids(total));
        assert!(windower.is_virtualized());

        // 2. Scroll to the middle
        let midpoint = windower.index().total_height() / 2.0;
        let RenderPlan::Windowed(window) = windower.plan(midpoint, viewport) else {
            panic!("{total} fields should render windowed");
        };

        // 3. Verify
        assert!(window.render_range.contains(&(total / 2)));
        assert!(window.len() <= max_rendered, "{} rendered of {total}", window.len());
        let rendered_height = window.len() as f32 * config.estimated_item_height;
        let sum = window.offset_before + rendered_height + window.offset_after;
        assert!((sum - windower.index().total_height()).abs() < 0.5);
    }
}

#[test]
fn test_small_form_renders_everything() {
    let mut windower = Windower::new(WindowConfig::default());
    windower.set_form_shape(40, false);
    windower.update_visible(&field_ids(40));
    assert_eq!(windower.plan(0.0, 600.0), RenderPlan::Full);

    // Custom cross-field rules push even a small form into windowed mode
    windower.set_form_shape(40, true);
    assert!(matches!(windower.plan(0.0, 600.0), RenderPlan::Windowed(_)));
}

#[test]
fn test_visibility_change_rebuilds_index() {
    let mut windower = Windower::new(WindowConfig::default());
    windower.set_form_shape(300, false);
    let all = field_ids(300);
    assert!(windower.update_visible(&all));
    assert!(!windower.update_visible(&all));

    // Hide every other field
    let half: Vec<String> = all.iter().step_by(2).cloned().collect();
    assert!(windower.update_visible(&half));
    assert_eq!(windower.index().len(), 150);

    let RenderPlan::Windowed(window) = windower.plan(0.0, 720.0) else {
        panic!("expected windowed plan");
    };
    let first_ids: Vec<&str> = windower.index().ids()[window.render_range.clone()]
        .iter()
        .map(|s| s.as_str())
        .take(2)
        .collect();
    assert_eq!(first_ids, vec!["field_0", "field_2"]);
}

#[test]
fn test_measured_heights_shift_the_window() {
    let config = WindowConfig {
        overscan: 0,
        estimated_item_height: 50.0,
        ..WindowConfig::default()
    };
    let mut windower = Windower::new(config);
    windower.set_form_shape(200, false);
    windower.update_visible(&field_ids(200));

    let before = select_window(windower.index(), 500.0, 100.0, 0);
    assert_eq!(before.render_range.start, 10);

    // A tall address block near the top pushes everything below it down
    assert!(windower.measure("field_2", 250.0));
    let after = select_window(windower.index(), 500.0, 100.0, 0);
    assert_eq!(after.render_range.start, 6);
    assert_eq!(after.offset_before, 500.0);
}
