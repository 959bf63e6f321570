//! Hardware-backed outputs
//!
//! A display adds a hardware composer identity to an output. While the id is
//! present, composition-type decisions, color changes and presentation all go
//! through the device. The id is dropped on disconnect, after which the
//! display behaves like a plain output that never skips the client color
//! transform.

use super::hooks::{choose_client_only, FrameFences, OutputHooks};
use super::output_layer::{HwcLayerState, OutputLayer};
use super::state::OutputCompositionState;
use crate::color::{ColorMatrix, ColorMode, RenderIntent};
use crate::hwc::{
    Composition, DeviceRequestedChanges, DisplayCapability, DisplayId, DisplayRequests,
    HwComposer, HwcLayerId, LayerRequest, PowerAdvisor,
};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Inputs for creating a display output
#[derive(Clone, Default)]
pub struct DisplayCreationArgs {
    /// `None` for displays the device does not know (yet)
    pub id: Option<DisplayId>,
    pub is_virtual: bool,
    pub is_secure: bool,
    pub power_advisor: Option<Arc<dyn PowerAdvisor>>,
}

impl fmt::Debug for DisplayCreationArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayCreationArgs")
            .field("id", &self.id)
            .field("is_virtual", &self.is_virtual)
            .field("is_secure", &self.is_secure)
            .field("power_advisor", &self.power_advisor.is_some())
            .finish()
    }
}

pub struct HardwareDisplay {
    hwc: Arc<dyn HwComposer>,
    id: Option<DisplayId>,
    is_virtual: bool,
    power_advisor: Option<Arc<dyn PowerAdvisor>>,
}

impl HardwareDisplay {
    pub(crate) fn new(hwc: Arc<dyn HwComposer>, args: &DisplayCreationArgs) -> Self {
        Self {
            hwc,
            id: args.id,
            is_virtual: args.is_virtual,
            power_advisor: args.power_advisor.clone(),
        }
    }

    pub fn id(&self) -> Option<DisplayId> {
        self.id
    }

    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    /// Releases the hardware identity; returns false if already disconnected
    pub(crate) fn disconnect(&mut self) -> bool {
        let Some(id) = self.id.take() else {
            return false;
        };

        info!("Disconnecting display {}", id);
        self.hwc.disconnect_display(id);
        true
    }

    fn any_layers_require_client_composition(layers: &[OutputLayer]) -> bool {
        layers.iter().any(OutputLayer::requires_client_composition)
    }

    fn all_layers_require_client_composition(layers: &[OutputLayer]) -> bool {
        layers.iter().all(OutputLayer::requires_client_composition)
    }

    fn apply_changed_types_to_layers(
        layers: &mut [OutputLayer],
        changed_types: &HashMap<HwcLayerId, Composition>,
    ) {
        if changed_types.is_empty() {
            return;
        }

        for layer in layers.iter_mut() {
            let Some(hwc_layer) = layer.hwc_layer() else {
                continue;
            };
            if let Some(composition) = changed_types.get(&hwc_layer) {
                layer.apply_device_composition_type_change(*composition);
            }
        }
    }

    fn apply_display_requests(state: &mut OutputCompositionState, requests: DisplayRequests) {
        state.flip_client_target = requests.contains(DisplayRequests::FLIP_CLIENT_TARGET);
    }

    fn apply_layer_requests_to_layers(
        layers: &mut [OutputLayer],
        layer_requests: &HashMap<HwcLayerId, LayerRequest>,
    ) {
        for layer in layers.iter_mut() {
            layer.prepare_for_device_layer_requests();

            let Some(hwc_layer) = layer.hwc_layer() else {
                continue;
            };
            if let Some(request) = layer_requests.get(&hwc_layer) {
                layer.apply_device_layer_request(*request);
            }
        }
    }

    fn apply_changes(
        state: &mut OutputCompositionState,
        layers: &mut [OutputLayer],
        changes: &DeviceRequestedChanges,
    ) {
        Self::apply_changed_types_to_layers(layers, &changes.changed_types);
        Self::apply_display_requests(state, changes.display_requests);
        Self::apply_layer_requests_to_layers(layers, &changes.layer_requests);
    }
}

impl OutputHooks for HardwareDisplay {
    fn choose_composition_strategy(
        &self,
        state: &mut OutputCompositionState,
        layers: &mut [OutputLayer],
    ) {
        choose_client_only(state);

        let Some(id) = self.id else {
            return;
        };

        let any_client = Self::any_layers_require_client_composition(layers);
        match self.hwc.get_device_composition_changes(id, any_client) {
            Ok(Some(changes)) => Self::apply_changes(state, layers, &changes),
            Ok(None) => {}
            Err(err) => {
                error!("Choosing composition strategy failed for display {}: {}", id, err);
                return;
            }
        }

        state.uses_client_composition = Self::any_layers_require_client_composition(layers);
        state.uses_device_composition = !Self::all_layers_require_client_composition(layers);

        debug!(
            "Display {} strategy: client={} device={} flip={}",
            id,
            state.uses_client_composition,
            state.uses_device_composition,
            state.flip_client_target
        );
    }

    fn skip_color_transform(&self) -> bool {
        match self.id {
            Some(id) => self
                .hwc
                .has_display_capability(id, DisplayCapability::SkipClientColorTransform),
            None => false,
        }
    }

    fn create_hwc_layer(&self) -> Option<HwcLayerState> {
        let id = self.id?;
        match self.hwc.create_layer(id) {
            Ok(layer) => Some(HwcLayerState {
                layer,
                composition: Composition::Invalid,
            }),
            Err(err) => {
                error!("Failed to create device layer on display {}: {}", id, err);
                None
            }
        }
    }

    fn release_hwc_layer(&self, layer: HwcLayerId) {
        if let Some(id) = self.id {
            self.hwc.destroy_layer(id, layer);
        }
    }

    fn write_layer_state(&self, layers: &mut [OutputLayer]) {
        let Some(id) = self.id else {
            return;
        };
        for layer in layers.iter_mut() {
            layer.write_state_to_hwc(self.hwc.as_ref(), id);
        }
    }

    fn accepts_color_mode(&self) -> bool {
        if self.is_virtual {
            warn!("Ignoring color mode change on virtual display");
            return false;
        }
        true
    }

    fn push_color_mode(&self, mode: ColorMode, intent: RenderIntent) {
        let Some(id) = self.id else {
            return;
        };
        if let Err(err) = self.hwc.set_active_color_mode(id, mode, intent) {
            error!("Failed to set color mode on display {}: {}", id, err);
        }
    }

    fn push_color_transform(&self, matrix: &ColorMatrix) {
        let Some(id) = self.id else {
            return;
        };
        if let Err(err) = self.hwc.set_color_transform(id, matrix) {
            error!("Failed to set color transform on display {}: {}", id, err);
        }
    }

    fn present_and_get_frame_fences(&self, layers: &[OutputLayer], fences: &mut FrameFences) {
        let Some(id) = self.id else {
            return;
        };

        if let Err(err) = self.hwc.present_and_get_release_fences(id) {
            error!("Present failed on display {}: {}", id, err);
        }

        fences.present_fence = self.hwc.get_present_fence(id);

        for layer in layers {
            let Some(hwc_layer) = layer.hwc_layer() else {
                continue;
            };
            fences
                .layer_fences
                .insert(hwc_layer, self.hwc.get_layer_release_fence(id, hwc_layer));
        }

        self.hwc.clear_release_fences(id);
    }

    fn set_expensive_rendering_expected(&self, expected: bool) {
        if let (Some(advisor), Some(id)) = (&self.power_advisor, self.id) {
            advisor.set_expensive_rendering_expected(id, expected);
        }
    }
}
