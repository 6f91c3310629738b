//! # Height Index
//!
//! Ordered visible field ids with their heights and prefix offsets, so that an
//! offset lookup is a binary search instead of a walk over the whole form.

use std::collections::HashMap;

#[derive(Clone, Debug, Default)]
pub struct HeightIndex {
    ids: Vec<String>,
    heights: Vec<f32>,
    /// `offsets[i]` is the top of item `i`; the last entry is the total height.
    offsets: Vec<f32>,
    /// Measurements survive rebuilds, keyed by field id.
    measured: HashMap<String, f32>,
    estimate: f32,
}

impl HeightIndex {
    pub fn new(estimated_item_height: f32) -> Self {
        Self {
            ids: Vec::new(),
            heights: Vec::new(),
            offsets: vec![0.0],
            measured: HashMap::new(),
            estimate: estimated_item_height.max(1.0),
        }
    }

    /// Replaces the ordered id list. Called whenever the visible fields change.
    pub fn rebuild(&mut self, ids: &[String]) {
        self.ids = ids.to_vec();
        self.heights = ids
            .iter()
            .map(|id| self.measured.get(id).copied().unwrap_or(self.estimate))
            .collect();
        self.recompute_offsets(0);
    }

    /// Records a rendered height. Returns true if the layout moved.
    pub fn measure(&mut self, id: &str, height: f32) -> bool {
        let height = height.max(0.0);
        let previous = self.measured.insert(id.to_string(), height);
        if previous == Some(height) {
            return false;
        }
        let Some(pos) = self.ids.iter().position(|x| x == id) else {
            return false;
        };
        if self.heights[pos] == height {
            return false;
        }
        self.heights[pos] = height;
        self.recompute_offsets(pos);
        true
    }

    fn recompute_offsets(&mut self, from: usize) {
        self.offsets.resize(self.heights.len() + 1, 0.0);
        self.offsets[0] = 0.0;
        for i in from..self.heights.len() {
            self.offsets[i + 1] = self.offsets[i] + self.heights[i];
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn total_height(&self) -> f32 {
        self.offsets.last().copied().unwrap_or(0.0)
    }

    pub fn offset_of(&self, index: usize) -> f32 {
        self.offsets[index.min(self.ids.len())]
    }

    /// Index of the item covering `y`. Clamped to the last item.
    pub fn index_at_offset(&self, y: f32) -> usize {
        if self.ids.is_empty() {
            return 0;
        }
        let after = self.offsets[..self.ids.len()].partition_point(|top| *top <= y);
        after.saturating_sub(1)
    }

    /// Last index whose top lies strictly above `y`.
    pub fn last_index_before(&self, y: f32) -> usize {
        if self.ids.is_empty() {
            return 0;
        }
        let before = self.offsets[..self.ids.len()].partition_point(|top| *top < y);
        before.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{i}")).collect()
    }

    #[test]
    fn test_offsets_follow_estimates_and_measurements() {
        let mut index = HeightIndex::new(10.0);
        index.rebuild(&ids(4));
        assert_eq!(index.total_height(), 40.0);
        assert_eq!(index.index_at_offset(25.0), 2);

        assert!(index.measure("f1", 30.0));
        assert!(!index.measure("f1", 30.0));
        assert_eq!(index.offset_of(2), 40.0);
        assert_eq!(index.total_height(), 60.0);
        assert_eq!(index.index_at_offset(15.0), 1);
    }

    #[test]
    fn test_measurements_survive_rebuild() {
        let mut index = HeightIndex::new(10.0);
        index.rebuild(&ids(3));
        index.measure("f2", 50.0);

        index.rebuild(&["f2".to_string(), "f0".to_string()]);
        assert_eq!(index.total_height(), 60.0);
        assert_eq!(index.offset_of(1), 50.0);
    }

    #[test]
    fn test_lookup_clamps() {
        let mut index = HeightIndex::new(10.0);
        assert_eq!(index.index_at_offset(5.0), 0);
        index.rebuild(&ids(3));
        assert_eq!(index.index_at_offset(-4.0), 0);
        assert_eq!(index.index_at_offset(1_000.0), 2);
        assert_eq!(index.last_index_before(20.0), 1);
    }
}
