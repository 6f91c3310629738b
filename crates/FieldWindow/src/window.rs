//! # Window Selection
//!
//! Picks the contiguous slice of fields to materialize for a scroll position.

use crate::config::WindowConfig;
use crate::index::HeightIndex;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// The slice to render plus the spacer heights that stand in for the rest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowRange {
    pub render_range: Range<usize>,
    /// Cumulative height of the fields skipped above the window.
    pub offset_before: f32,
    /// Cumulative height of the fields skipped below the window.
    pub offset_after: f32,
}

impl WindowRange {
    pub fn empty() -> Self {
        Self {
            render_range: 0..0,
            offset_before: 0.0,
            offset_after: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.render_range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.render_range.is_empty()
    }
}

/// Whether a form is large or complex enough to render windowed.
pub fn should_virtualize(total_fields: usize, has_custom_cross_field_rules: bool, config: &WindowConfig) -> bool {
    total_fields > config.threshold || has_custom_cross_field_rules
}

/// Selects the fields intersecting `[scroll_top, scroll_top + viewport_height)`,
/// widened by `overscan` fields on each side.
pub fn select_window(index: &HeightIndex, scroll_top: f32, viewport_height: f32, overscan: usize) -> WindowRange {
    if index.is_empty() {
        return WindowRange::empty();
    }

    let total = index.total_height();
    let viewport = viewport_height.max(0.0);
    // Keep the viewport inside the content; elastic overscroll reports out-of-range values
    let top = scroll_top.clamp(0.0, (total - viewport).max(0.0));
    let bottom = top + viewport;

    let first = index.index_at_offset(top);
    let last = if viewport > 0.0 {
        index.last_index_before(bottom).max(first)
    } else {
        first
    };

    let start = first.saturating_sub(overscan);
    let end = (last + 1 + overscan).min(index.len());

    WindowRange {
        render_range: start..end,
        offset_before: index.offset_of(start),
        offset_after: (total - index.offset_of(end)).max(0.0),
    }
}
