//! Points where output variants differ
//!
//! A plain output can only compose with the GPU and has no device to talk to.
//! Hardware displays override the hooks to consult the hardware composer.

use super::output_layer::{HwcLayerState, OutputLayer};
use super::state::OutputCompositionState;
use crate::color::{ColorMatrix, ColorMode, RenderIntent};
use crate::fence::Fence;
use crate::hwc::HwcLayerId;
use std::collections::HashMap;

/// Fences produced by presenting a frame
#[derive(Debug, Clone, Default)]
pub struct FrameFences {
    pub present_fence: Fence,
    pub client_target_acquire_fence: Fence,
    pub layer_fences: HashMap<HwcLayerId, Fence>,
}

/// Client composition of every layer, nothing for the device
pub fn choose_client_only(state: &mut OutputCompositionState) {
    state.uses_client_composition = true;
    state.uses_device_composition = false;
}

/// Variant specific behavior of an output
///
/// Every method defaults to what a plain GPU-only output does.
pub trait OutputHooks: Send {
    fn choose_composition_strategy(
        &self,
        state: &mut OutputCompositionState,
        _layers: &mut [OutputLayer],
    ) {
        choose_client_only(state);
    }

    /// True when the device applies the color transform itself
    fn skip_color_transform(&self) -> bool {
        true
    }

    /// Allocates device-side state for a newly visible layer
    fn create_hwc_layer(&self) -> Option<HwcLayerState> {
        None
    }

    fn release_hwc_layer(&self, _layer: HwcLayerId) {}

    /// Sends per-layer composition requests to the device
    fn write_layer_state(&self, _layers: &mut [OutputLayer]) {}

    /// False when the output refuses color mode changes entirely
    fn accepts_color_mode(&self) -> bool {
        true
    }

    fn push_color_mode(&self, _mode: ColorMode, _intent: RenderIntent) {}

    fn push_color_transform(&self, _matrix: &ColorMatrix) {}

    /// Adds device fences to what the output already collected
    fn present_and_get_frame_fences(&self, _layers: &[OutputLayer], _fences: &mut FrameFences) {}

    fn set_expensive_rendering_expected(&self, _expected: bool) {}
}

/// A GPU-only output with no backing device
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicOutput;

impl OutputHooks for BasicOutput {}
