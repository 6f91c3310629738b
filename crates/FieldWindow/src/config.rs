//! # Configuration
//!
//! This module defines the configuration struct for the Windower.

use serde::{Deserialize, Serialize};

/// Configuration parameters for windowed rendering.
///
/// These settings let the host trade memory for smoother scrolling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Field count above which only a window is rendered. Default: 100.
    pub threshold: usize,
    /// Height in pixels assumed for a field that has not been measured yet. Default: 72.0.
    pub estimated_item_height: f32,
    /// Extra fields rendered on each side of the viewport. Default: 5.
    pub overscan: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            threshold: 100,
            estimated_item_height: 72.0,
            overscan: 5,
        }
    }
}
