//! Per-output view of a source layer

use super::state::OutputCompositionState;
use crate::color::Dataspace;
use crate::geometry::{Rect, Region};
use crate::hwc::{Composition, DisplayId, HwComposer, HwcLayerId, LayerRequest};
use crate::layer::{Layer, LayerFe, LayerId};
use log::{error, trace};
use std::fmt::Write;
use std::sync::Arc;

/// Device-side state of an output layer on a hardware display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwcLayerState {
    pub layer: HwcLayerId,
    pub composition: Composition,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputLayerState {
    /// Layer stack space, minus what opaque layers above hide
    pub visible_region: Region,
    pub visible_non_transparent_region: Region,
    /// Part of the visible region under any layer above, opaque or not
    pub covered_region: Region,
    pub output_space_visible_region: Region,

    /// Output space rectangle the layer lands on
    pub display_frame: Rect,
    pub dataspace: Dataspace,
    pub force_client_composition: bool,
    /// The device asked for the client target under this layer to be cleared
    pub clear_client_target: bool,
    /// Position in the output's back-to-front list
    pub z: u32,
    pub hwc: Option<HwcLayerState>,
}

pub struct OutputLayer {
    layer: Arc<Layer>,
    layer_fe: Arc<dyn LayerFe>,
    state: OutputLayerState,
}

impl OutputLayer {
    pub(crate) fn new(layer: Arc<Layer>, layer_fe: Arc<dyn LayerFe>) -> Self {
        Self {
            layer,
            layer_fe,
            state: OutputLayerState::default(),
        }
    }

    pub fn layer(&self) -> &Arc<Layer> {
        &self.layer
    }

    pub fn layer_id(&self) -> LayerId {
        self.layer.id()
    }

    pub fn layer_fe(&self) -> &Arc<dyn LayerFe> {
        &self.layer_fe
    }

    pub fn state(&self) -> &OutputLayerState {
        &self.state
    }

    pub fn edit_state(&mut self) -> &mut OutputLayerState {
        &mut self.state
    }

    pub fn hwc_layer(&self) -> Option<HwcLayerId> {
        self.state.hwc.map(|hwc| hwc.layer)
    }

    /// Layers without a device layer can only be drawn by the GPU
    pub fn requires_client_composition(&self) -> bool {
        match self.state.hwc {
            Some(hwc) => hwc.composition == Composition::Client,
            None => true,
        }
    }

    /// Drawing needs sampling between pixels (scaled or rotated content)
    pub fn needs_filtering(&self) -> bool {
        let fe_state = self.layer.fe_state();
        let transform = &fe_state.geom_layer_transform;
        transform.has_scale() || !transform.preserve_rects()
    }

    /// Refreshes derived state from the latched front-end state
    pub fn update_composition_state(
        &mut self,
        output: &OutputCompositionState,
        include_geometry: bool,
        force_client_composition: bool,
    ) {
        let fe_state = self.layer.fe_state();

        if include_geometry {
            let bounds = fe_state.geom_layer_transform.transform_rect(&fe_state.geom_layer_bounds);
            let frame = output.transform.transform_rect(&bounds);
            self.state.display_frame = frame.intersection(&output.bounds).unwrap_or(Rect::EMPTY);
        }

        self.state.dataspace = fe_state.dataspace;
        self.state.force_client_composition =
            force_client_composition || fe_state.force_client_composition;
    }

    /// Sends the requested composition type to the device
    pub fn write_state_to_hwc(&mut self, hwc: &dyn HwComposer, display: DisplayId) {
        let Some(mut hwc_state) = self.state.hwc else {
            return;
        };

        let requested = if self.state.force_client_composition {
            Composition::Client
        } else {
            self.layer.fe_state().composition_type
        };

        if let Err(err) = hwc.set_layer_composition_type(display, hwc_state.layer, requested) {
            error!(
                "Failed to set composition type for {}: {}",
                self.layer_fe.debug_name(),
                err
            );
        }
        hwc_state.composition = requested;
        self.state.hwc = Some(hwc_state);
    }

    pub fn apply_device_composition_type_change(&mut self, composition: Composition) {
        if let Some(hwc) = self.state.hwc.as_mut() {
            trace!(
                "{}: device changed composition {:?} -> {:?}",
                self.layer_fe.debug_name(),
                hwc.composition,
                composition
            );
            hwc.composition = composition;
        }
    }

    pub fn prepare_for_device_layer_requests(&mut self) {
        self.state.clear_client_target = false;
    }

    pub fn apply_device_layer_request(&mut self, request: LayerRequest) {
        match request {
            LayerRequest::ClearClientTarget => self.state.clear_client_target = true,
        }
    }

    pub fn dump(&self, out: &mut String) {
        let _ = writeln!(
            out,
            "    - {} z={} visible={:?} covered={:?} frame={:?} hwc={:?} forceClient={} clearClientTarget={}",
            self.layer_fe.debug_name(),
            self.state.z,
            self.state.visible_region.rects(),
            self.state.covered_region.rects(),
            self.state.display_frame,
            self.state.hwc,
            self.state.force_client_composition,
            self.state.clear_client_target
        );
    }
}
