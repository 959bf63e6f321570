//! Visibility and coverage of layers on an output
//!
//! Layers are visited front to back (topmost first). For each one the
//! accumulated coverage of everything above decides what is still visible,
//! what is covered by translucent content, and what needs repainting compared
//! to the previous frame.
//!
//! All regions here are in layer stack space except the final on-screen test
//! and `output_space_visible_region`, which use the output transform.

use super::output_layer::OutputLayerState;
use super::state::OutputCompositionState;
use crate::geometry::{Orientation, Region, Transform};
use crate::layer::{LayerFeSet, LayerFeState};

/// Accumulator for one visibility pass over an output
pub struct CoverageState<'a> {
    /// Front ends whose basic geometry was latched this frame
    pub latched_layers: &'a mut LayerFeSet,
    /// Union of visible regions of layers above
    pub above_covered_layers: Region,
    /// Union of opaque regions of layers above
    pub above_opaque_layers: Region,
    /// Area of the output that needs repainting
    pub dirty_region: Region,
}

impl<'a> CoverageState<'a> {
    pub fn new(latched_layers: &'a mut LayerFeSet) -> Self {
        Self {
            latched_layers,
            above_covered_layers: Region::new(),
            above_opaque_layers: Region::new(),
            dirty_region: Region::new(),
        }
    }

    /// Output space area no opaque layer paints
    pub fn undefined_region(&self, output: &OutputCompositionState) -> Region {
        let mut undefined = Region::from_rect(output.bounds);
        undefined.subtract_self(&output.transform.transform_region(&self.above_opaque_layers));
        undefined
    }
}

/// Coverage of one visible layer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerCoverage {
    pub visible_region: Region,
    pub visible_non_transparent_region: Region,
    pub covered_region: Region,
    pub output_space_visible_region: Region,
}

impl LayerCoverage {
    pub fn store(self, state: &mut OutputLayerState) {
        state.visible_region = self.visible_region;
        state.visible_non_transparent_region = self.visible_non_transparent_region;
        state.covered_region = self.covered_region;
        state.output_space_visible_region = self.output_space_visible_region;
    }
}

/// Result of processing one candidate layer
#[derive(Debug, Clone, PartialEq)]
pub enum CoverageOutcome {
    /// Filtered out or hidden before it could affect coverage
    Skipped,
    /// Fully occluded by opaque layers above
    Occluded,
    /// Visible in layer stack space but nothing lands inside the output
    Offscreen,
    Visible(LayerCoverage),
}

/// Runs one layer through the coverage pass
///
/// `previous` is the layer's state from the last frame, if it was visible
/// then. The accumulator is updated in place.
pub fn compute_layer_coverage(
    fe: &LayerFeState,
    previous: Option<&OutputLayerState>,
    output: &OutputCompositionState,
    coverage: &mut CoverageState<'_>,
) -> CoverageOutcome {
    if !output.belongs_in_output(fe.layer_stack_id, fe.internal_only) || !fe.is_visible {
        return CoverageOutcome::Skipped;
    }

    let tr = &fe.geom_layer_transform;

    let mut visible_region = Region::from_rect(tr.transform_rect(&fe.geom_layer_bounds));
    if visible_region.is_empty() {
        return CoverageOutcome::Skipped;
    }

    // The hint only matters when a rect preserving transform keeps it exact.
    let transparent_region = if !fe.is_opaque && tr.preserve_rects() {
        tr.transform_region(&fe.transparent_region_hint)
    } else {
        Region::new()
    };

    let opaque_region = if fe.is_opaque && !tr.orientation().contains(Orientation::ROT_INVALID) {
        visible_region.clone()
    } else {
        Region::new()
    };

    let covered_region = coverage.above_covered_layers.intersect(&visible_region);
    coverage.above_covered_layers.or_self(&visible_region);

    visible_region.subtract_self(&coverage.above_opaque_layers);
    if visible_region.is_empty() {
        return CoverageOutcome::Occluded;
    }

    let empty = Region::new();
    let (old_visible, old_covered) = match previous {
        Some(prev) => (&prev.visible_region, &prev.covered_region),
        None => (&empty, &empty),
    };

    let mut dirty = if fe.content_dirty {
        visible_region.union(old_visible)
    } else {
        // Visible now but covered before, plus newly exposed by a resize.
        let new_exposed = &visible_region - &covered_region;
        let old_exposed = old_visible - old_covered;
        &(&visible_region & old_covered) | &(&new_exposed - &old_exposed)
    };
    dirty.subtract_self(&coverage.above_opaque_layers);

    coverage.dirty_region.or_self(&dirty);
    coverage.above_opaque_layers.or_self(&opaque_region);

    let visible_non_transparent_region = visible_region.subtract(&transparent_region);

    let mut draw_region = output.transform.transform_region(&visible_non_transparent_region);
    draw_region.and_rect(&output.bounds);
    if draw_region.is_empty() {
        return CoverageOutcome::Offscreen;
    }

    let output_space_visible_region = output
        .transform
        .transform_region(&visible_region.intersect_rect(&output.viewport));

    CoverageOutcome::Visible(LayerCoverage {
        visible_region,
        visible_non_transparent_region,
        covered_region,
        output_space_visible_region,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    fn output() -> OutputCompositionState {
        OutputCompositionState {
            is_enabled: true,
            bounds: Rect::new(0, 0, 100, 100),
            viewport: Rect::new(0, 0, 100, 100),
            frame: Rect::new(0, 0, 100, 100),
            scissor: Rect::new(0, 0, 100, 100),
            ..OutputCompositionState::default()
        }
    }

    fn layer(bounds: Rect, opaque: bool) -> LayerFeState {
        LayerFeState {
            is_visible: true,
            is_opaque: opaque,
            layer_stack_id: Some(0),
            geom_layer_bounds: bounds,
            content_dirty: true,
            ..LayerFeState::default()
        }
    }

    #[test]
    fn test_opaque_layer_occludes_layer_below() {
        let output = output();
        let mut latched = LayerFeSet::new();
        let mut coverage = CoverageState::new(&mut latched);

        let top = layer(Rect::new(0, 0, 100, 100), true);
        let bottom = layer(Rect::new(10, 10, 50, 50), true);

        assert!(matches!(
            compute_layer_coverage(&top, None, &output, &mut coverage),
            CoverageOutcome::Visible(_)
        ));
        assert_eq!(
            compute_layer_coverage(&bottom, None, &output, &mut coverage),
            CoverageOutcome::Occluded
        );
        assert!(coverage.undefined_region(&output).is_empty());
    }

    #[test]
    fn test_translucent_layer_covers_without_occluding() {
        let output = output();
        let mut latched = LayerFeSet::new();
        let mut coverage = CoverageState::new(&mut latched);

        let top = layer(Rect::new(0, 0, 50, 100), false);
        let bottom = layer(Rect::new(0, 0, 100, 100), true);

        compute_layer_coverage(&top, None, &output, &mut coverage);
        let CoverageOutcome::Visible(result) =
            compute_layer_coverage(&bottom, None, &output, &mut coverage)
        else {
            panic!("bottom layer should be visible");
        };

        assert_eq!(result.visible_region, Region::from_rect(Rect::new(0, 0, 100, 100)));
        assert_eq!(result.covered_region, Region::from_rect(Rect::new(0, 0, 50, 100)));
    }

    #[test]
    fn test_layer_outside_output_is_offscreen() {
        let output = output();
        let mut latched = LayerFeSet::new();
        let mut coverage = CoverageState::new(&mut latched);

        let off = layer(Rect::new(200, 200, 300, 300), true);
        assert_eq!(
            compute_layer_coverage(&off, None, &output, &mut coverage),
            CoverageOutcome::Offscreen
        );
    }

    #[test]
    fn test_other_layer_stack_is_skipped() {
        let output = output();
        let mut latched = LayerFeSet::new();
        let mut coverage = CoverageState::new(&mut latched);

        let mut elsewhere = layer(Rect::new(0, 0, 10, 10), true);
        elsewhere.layer_stack_id = Some(7);
        assert_eq!(
            compute_layer_coverage(&elsewhere, None, &output, &mut coverage),
            CoverageOutcome::Skipped
        );

        let mut internal = layer(Rect::new(0, 0, 10, 10), true);
        internal.internal_only = true;
        assert_eq!(
            compute_layer_coverage(&internal, None, &output, &mut coverage),
            CoverageOutcome::Skipped
        );
    }

    #[test]
    fn test_transparent_hint_removes_non_transparent_area() {
        let output = output();
        let mut latched = LayerFeSet::new();
        let mut coverage = CoverageState::new(&mut latched);

        let mut hinted = layer(Rect::new(0, 0, 100, 100), false);
        hinted.transparent_region_hint = Region::from_rect(Rect::new(0, 0, 100, 100));
        // Everything is hinted transparent, so nothing lands on screen.
        assert_eq!(
            compute_layer_coverage(&hinted, None, &output, &mut coverage),
            CoverageOutcome::Offscreen
        );
    }

    #[test]
    fn test_unchanged_layer_has_no_dirty_area() {
        let output = output();
        let mut fe = layer(Rect::new(0, 0, 100, 100), true);

        let mut latched = LayerFeSet::new();
        let mut first = CoverageState::new(&mut latched);
        let CoverageOutcome::Visible(cov) = compute_layer_coverage(&fe, None, &output, &mut first)
        else {
            panic!("layer should be visible");
        };
        let mut prev = OutputLayerState::default();
        cov.store(&mut prev);

        fe.content_dirty = false;
        let mut latched = LayerFeSet::new();
        let mut second = CoverageState::new(&mut latched);
        compute_layer_coverage(&fe, Some(&prev), &output, &mut second);
        assert!(second.dirty_region.is_empty());
    }

    #[test]
    fn test_resize_exposes_new_area() {
        let output = output();
        let mut fe = layer(Rect::new(0, 0, 50, 50), true);

        let mut latched = LayerFeSet::new();
        let mut first = CoverageState::new(&mut latched);
        let CoverageOutcome::Visible(cov) = compute_layer_coverage(&fe, None, &output, &mut first)
        else {
            panic!("layer should be visible");
        };
        let mut prev = OutputLayerState::default();
        cov.store(&mut prev);

        fe.content_dirty = false;
        fe.geom_layer_bounds = Rect::new(0, 0, 100, 50);
        let mut latched = LayerFeSet::new();
        let mut second = CoverageState::new(&mut latched);
        compute_layer_coverage(&fe, Some(&prev), &output, &mut second);
        assert_eq!(second.dirty_region, Region::from_rect(Rect::new(50, 0, 100, 50)));
    }

    #[test]
    fn test_skewed_opaque_layer_is_translucent() {
        let output = output();
        let mut latched = LayerFeSet::new();
        let mut coverage = CoverageState::new(&mut latched);

        let mut rotated = layer(Rect::new(0, 0, 20, 20), true);
        rotated.geom_layer_transform =
            Transform::translate(50.0, 50.0).compose(&Transform::rotation(45.0));
        compute_layer_coverage(&rotated, None, &output, &mut coverage);
        assert!(coverage.above_opaque_layers.is_empty());
        assert!(!coverage.above_covered_layers.is_empty());
    }
}
