//! # FormFlux Inspector
//!
//! This crate provides the headless logic for painting a live form.
//! It bridges the gap between a `FormManager` session and the visual UI: the host
//! asks for a frame, paints the field views in it, and routes input back.

pub mod view;

use field_window::{RenderPlan, WindowConfig, Windower};
use formflux_core::error::StateError;
use formflux_core::manager::FormManager;
use serde_json::Value;
use view::{FieldView, visible_names};

/// One paint's worth of fields.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectorFrame {
    /// The fields to display in the UI, in document order.
    pub fields: Vec<FieldView>,
    /// Spacer above the first rendered field, in pixels.
    pub offset_before: f32,
    /// Spacer below the last rendered field, in pixels.
    pub offset_after: f32,
    /// Number of visible fields in the whole form.
    pub total_visible: usize,
    pub windowed: bool,
}

/// The inspector for a single form session.
pub struct FormInspector {
    manager: FormManager,
    windower: Windower,
}

impl FormInspector {
    /// The window threshold always follows the session's
    /// `virtualization_threshold`, whatever `config` says.
    pub fn new(manager: FormManager, mut config: WindowConfig) -> Self {
        config.threshold = manager.config().virtualization_threshold;
        let mut windower = Windower::new(config);
        let schema = manager.schema();
        windower.set_form_shape(schema.field_count(), schema.has_custom_cross_field_rules());
        Self { manager, windower }
    }

    pub fn manager(&self) -> &FormManager {
        &self.manager
    }

    /// Routes a user edit to the session.
    pub async fn input(&self, name: &str, value: Value) -> Result<(), StateError> {
        self.manager.set_value(name, value).await
    }

    /// Routes a blur to the session.
    pub async fn blur(&self, name: &str) -> Result<(), StateError> {
        self.manager.set_touched(name).await
    }

    /// Reports a painted field's real height.
    pub fn measure(&mut self, name: &str, height: f32) {
        self.windower.measure(name, height);
    }

    /// Builds the views the host should paint for this scroll position.
    pub async fn frame(&mut self, scroll_top: f32, viewport_height: f32) -> InspectorFrame {
        let schema = self.manager.schema();
        let state = self.manager.snapshot().await;

        // The schema can be swapped mid-session
        self.windower
            .set_form_shape(schema.field_count(), schema.has_custom_cross_field_rules());

        let names = visible_names(&schema, &state);
        if self.windower.update_visible(&names) {
            tracing::debug!(visible = names.len(), "Rebuilt field window index");
        }

        let (range, offset_before, offset_after, windowed) =
            match self.windower.plan(scroll_top, viewport_height) {
                RenderPlan::Full => (0..names.len(), 0.0, 0.0, false),
                RenderPlan::Windowed(w) => (w.render_range, w.offset_before, w.offset_after, true),
            };

        let fields = names[range]
            .iter()
            .filter_map(|name| schema.field_by_name(name))
            .map(|def| FieldView::from_definition(def, &state))
            .collect();

        InspectorFrame {
            fields,
            offset_before,
            offset_after,
            total_visible: names.len(),
            windowed,
        }
    }
}
