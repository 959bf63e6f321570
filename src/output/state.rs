//! Per-output composition state

use crate::color::{ColorMatrix, ColorMode, Dataspace, RenderIntent, identity_color_matrix};
use crate::geometry::{Orientation, Rect, Region, Transform};
use std::fmt::Write;

/// Everything one output remembers between pipeline stages and frames
#[derive(Debug, Clone, PartialEq)]
pub struct OutputCompositionState {
    pub is_enabled: bool,
    pub is_secure: bool,

    pub layer_stack_id: u32,
    /// Internal-only layers are shown on this output
    pub layer_stack_internal: bool,

    /// Layer stack space to output space
    pub transform: Transform,
    pub orientation: Orientation,
    /// Output space
    pub frame: Rect,
    /// Layer stack space
    pub viewport: Rect,
    /// Output space
    pub scissor: Rect,
    pub needs_filtering: bool,

    /// Output space rectangle covered by the render surface
    pub bounds: Rect,

    pub dirty_region: Region,
    /// Area not covered by any opaque layer
    pub undefined_region: Region,

    pub uses_client_composition: bool,
    pub uses_device_composition: bool,
    pub flip_client_target: bool,

    pub last_composition_had_visible_layers: bool,

    pub color_mode: ColorMode,
    pub dataspace: Dataspace,
    pub render_intent: RenderIntent,
    pub target_dataspace: Dataspace,
    pub color_transform_matrix: ColorMatrix,
}

impl Default for OutputCompositionState {
    fn default() -> Self {
        Self {
            is_enabled: false,
            is_secure: false,
            layer_stack_id: 0,
            layer_stack_internal: false,
            transform: Transform::identity(),
            orientation: Orientation::ROT_0,
            frame: Rect::EMPTY,
            viewport: Rect::EMPTY,
            scissor: Rect::EMPTY,
            needs_filtering: false,
            bounds: Rect::EMPTY,
            dirty_region: Region::new(),
            undefined_region: Region::new(),
            uses_client_composition: false,
            uses_device_composition: false,
            flip_client_target: false,
            last_composition_had_visible_layers: false,
            color_mode: ColorMode::Native,
            dataspace: Dataspace::Unknown,
            render_intent: RenderIntent::Colorimetric,
            target_dataspace: Dataspace::Unknown,
            color_transform_matrix: identity_color_matrix(),
        }
    }
}

impl OutputCompositionState {
    /// Layer stacks must match; internal-only layers need an internal output
    pub fn belongs_in_output(&self, layer_stack_id: Option<u32>, internal_only: bool) -> bool {
        layer_stack_id == Some(self.layer_stack_id) && (!internal_only || self.layer_stack_internal)
    }

    pub fn dump(&self, out: &mut String) {
        let _ = writeln!(
            out,
            "   isEnabled={} isSecure={} layerStack={} internal={}",
            self.is_enabled, self.is_secure, self.layer_stack_id, self.layer_stack_internal
        );
        let _ = writeln!(
            out,
            "   bounds={:?} frame={:?} viewport={:?} scissor={:?} orientation={:#x} needsFiltering={}",
            self.bounds,
            self.frame,
            self.viewport,
            self.scissor,
            self.orientation.bits(),
            self.needs_filtering
        );
        let _ = writeln!(
            out,
            "   client={} device={} flipClientTarget={} hadVisibleLayers={}",
            self.uses_client_composition,
            self.uses_device_composition,
            self.flip_client_target,
            self.last_composition_had_visible_layers
        );
        let _ = writeln!(
            out,
            "   colorMode={:?} dataspace={:?} renderIntent={:?} targetDataspace={:?}",
            self.color_mode, self.dataspace, self.render_intent, self.target_dataspace
        );
        let _ = writeln!(
            out,
            "   dirtyRegion={:?} undefinedRegion={:?}",
            self.dirty_region.rects(),
            self.undefined_region.rects()
        );
    }
}
