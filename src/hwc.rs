//! Hardware composer boundary
//!
//! The hardware composer programs the display controller. It owns per-display
//! device layers, decides which of them it can scan out directly, and hands
//! back present/release fences. Everything in this crate talks to it through
//! the [`HwComposer`] trait.

use crate::color::{ColorMatrix, ColorMode, RenderIntent};
use crate::error::HwcError;
use crate::fence::Fence;
use bitflags::bitflags;
use std::collections::HashMap;
use std::fmt;

/// Identity of a display known to the hardware composer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DisplayId(pub u64);

impl fmt::Display for DisplayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Device-side layer handle, unique within a display
pub type HwcLayerId = u64;

/// How the device composes a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Composition {
    #[default]
    Invalid,
    /// Drawn by the GPU into the client target
    Client,
    Device,
    SolidColor,
    Cursor,
    Sideband,
}

bitflags! {
    /// Display level requests returned with composition changes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DisplayRequests: u32 {
        const FLIP_CLIENT_TARGET = 1 << 0;
        const WRITE_CLIENT_TARGET_TO_OUTPUT = 1 << 1;
    }
}

/// Per-layer request returned with composition changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerRequest {
    /// Clear the client target under this layer
    ClearClientTarget,
}

/// Optional display features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayCapability {
    SkipClientColorTransform,
    Doze,
    Brightness,
}

/// Changes the device wants applied to the composition it was handed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceRequestedChanges {
    pub changed_types: HashMap<HwcLayerId, Composition>,
    pub display_requests: DisplayRequests,
    pub layer_requests: HashMap<HwcLayerId, LayerRequest>,
}

/// The hardware composer as seen by outputs
#[cfg_attr(test, mockall::automock)]
pub trait HwComposer: Send + Sync {
    /// Forgets a display; later calls against it fail with `NotConnected`
    fn disconnect_display(&self, display: DisplayId);

    fn create_layer(&self, display: DisplayId) -> Result<HwcLayerId, HwcError>;

    fn destroy_layer(&self, display: DisplayId, layer: HwcLayerId);

    /// Tells the device how this frame would like a layer composed
    fn set_layer_composition_type(
        &self,
        display: DisplayId,
        layer: HwcLayerId,
        composition: Composition,
    ) -> Result<(), HwcError>;

    fn set_color_transform(&self, display: DisplayId, matrix: &ColorMatrix)
        -> Result<(), HwcError>;

    fn set_active_color_mode(
        &self,
        display: DisplayId,
        mode: ColorMode,
        intent: RenderIntent,
    ) -> Result<(), HwcError>;

    /// Validates the frame; `Ok(None)` means the device accepted it as is
    fn get_device_composition_changes(
        &self,
        display: DisplayId,
        any_layers_require_client_composition: bool,
    ) -> Result<Option<DeviceRequestedChanges>, HwcError>;

    fn present_and_get_release_fences(&self, display: DisplayId) -> Result<(), HwcError>;

    fn get_present_fence(&self, display: DisplayId) -> Fence;

    fn get_layer_release_fence(&self, display: DisplayId, layer: HwcLayerId) -> Fence;

    fn clear_release_fences(&self, display: DisplayId);

    fn has_display_capability(&self, display: DisplayId, capability: DisplayCapability) -> bool;

    /// Turns the display's hardware vsync interrupts on or off
    fn set_vsync_enabled(&self, display: DisplayId, enabled: bool) -> Result<(), HwcError>;
}

/// Receives GPU load hints for hardware displays
pub trait PowerAdvisor: Send + Sync {
    fn set_expensive_rendering_expected(&self, display: DisplayId, expected: bool);
}
