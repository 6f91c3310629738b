//! # FieldWindow
//!
//! `field_window` is a headless windowing library for long forms. It decides which
//! fields are worth materializing for the current scroll position, while
//! delegating rendering to the host application.
//!
//! ## Core Architecture
//! - **Index (`src/index.rs`)**: Ordered visible field ids with prefix height offsets.
//! - **Window (`src/window.rs`)**: Picks the render range and spacer sizes.
//! - **Windower (this file)**: Ties both to a configuration and the visible field list.

pub mod config;
pub mod index;
pub mod window;

use index::HeightIndex;

// Re-exports for convenience
pub use config::WindowConfig;
pub use window::{WindowRange, select_window, should_virtualize};

/// What the host should paint.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderPlan {
    /// Render every visible field.
    Full,
    /// Render only `render_range`, with spacers around it.
    Windowed(WindowRange),
}

/// The main entry point for the library.
///
/// Holds the configuration and the height index for one form. The index is rebuilt
/// only when the visible field list actually changes.
pub struct Windower {
    /// Configuration settings.
    pub config: WindowConfig,
    index: HeightIndex,
    total_fields: usize,
    complex: bool,
}

impl Windower {
    pub fn new(config: WindowConfig) -> Self {
        let index = HeightIndex::new(config.estimated_item_height);
        Self {
            config,
            index,
            total_fields: 0,
            complex: false,
        }
    }

    /// Sets the schema-level inputs of the virtualization decision.
    pub fn set_form_shape(&mut self, total_fields: usize, has_custom_cross_field_rules: bool) {
        self.total_fields = total_fields;
        self.complex = has_custom_cross_field_rules;
    }

    pub fn is_virtualized(&self) -> bool {
        should_virtualize(self.total_fields, self.complex, &self.config)
    }

    /// Feeds the current visible fields, in document order. Returns true if the
    /// index was rebuilt.
    pub fn update_visible(&mut self, visible_ids: &[String]) -> bool {
        if self.index.ids() == visible_ids {
            return false;
        }
        self.index.rebuild(visible_ids);
        true
    }

    /// Reports a rendered field's real height.
    pub fn measure(&mut self, id: &str, height: f32) -> bool {
        self.index.measure(id, height)
    }

    pub fn index(&self) -> &HeightIndex {
        &self.index
    }

    /// The core update call, made on scroll, resize, or after `update_visible`.
    pub fn plan(&self, scroll_top: f32, viewport_height: f32) -> RenderPlan {
        if !self.is_virtualized() {
            return RenderPlan::Full;
        }
        RenderPlan::Windowed(select_window(
            &self.index,
            scroll_top,
            viewport_height,
            self.config.overscan,
        ))
    }
}
