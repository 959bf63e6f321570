//! Rendering backend boundary
//!
//! Client composition hands the render engine a list of [`LayerSettings`]
//! to draw into a target [`GraphicBuffer`], described by one set of
//! [`DisplaySettings`]. The draw is asynchronous: the engine returns a fence
//! that signals when the GPU is done.

use crate::color::{ColorMatrix, Dataspace, identity_color_matrix};
use crate::error::RenderError;
use crate::fence::Fence;
use crate::geometry::{FloatRect, Orientation, Rect, Region, Transform};

/// A buffer that can be drawn into or sampled from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicBuffer {
    pub id: u64,
    pub width: i32,
    pub height: i32,
    pub protected: bool,
}

/// Global settings for one draw submission
#[derive(Debug, Clone, PartialEq)]
pub struct DisplaySettings {
    /// Area of the target buffer that maps to the display
    pub physical_display: Rect,
    pub clip: Rect,
    pub global_transform: Transform,
    pub orientation: Orientation,
    pub output_dataspace: Dataspace,
    pub max_luminance: f32,
    pub color_transform: ColorMatrix,
    /// Region the engine should clear before drawing layers
    pub clear_region: Region,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            physical_display: Rect::EMPTY,
            clip: Rect::EMPTY,
            global_transform: Transform::identity(),
            orientation: Orientation::ROT_0,
            output_dataspace: Dataspace::Unknown,
            max_luminance: 0.0,
            color_transform: identity_color_matrix(),
            clear_region: Region::new(),
        }
    }
}

/// Where a layer's pixels come from
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PixelSource {
    pub buffer: Option<GraphicBuffer>,
    pub solid_color: [f32; 3],
}

/// Per-layer draw request
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSettings {
    pub boundaries: FloatRect,
    pub position_transform: Transform,
    pub source: PixelSource,
    pub alpha: f32,
    pub source_dataspace: Dataspace,
    pub disable_blending: bool,
}

impl Default for LayerSettings {
    fn default() -> Self {
        Self {
            boundaries: FloatRect::default(),
            position_transform: Transform::identity(),
            source: PixelSource::default(),
            alpha: 0.0,
            source_dataspace: Dataspace::Unknown,
            disable_blending: false,
        }
    }
}

impl LayerSettings {
    /// Turns the request into an opaque black hole punch
    ///
    /// Used for device-composed layers that asked for the client target
    /// underneath them to be cleared.
    pub fn make_clear(&mut self) {
        self.source.buffer = None;
        self.source.solid_color = [0.0, 0.0, 0.0];
        self.alpha = 0.0;
        self.disable_blending = true;
    }
}

/// The GPU renderer used for client composition
pub trait RenderEngine: Send + Sync {
    fn supports_protected_content(&self) -> bool;

    /// True while the protected context is current
    fn is_protected(&self) -> bool;

    /// Switches to/from the protected context, returns whether it switched
    fn use_protected_context(&self, protected: bool) -> bool;

    /// Draws `layers` into `buffer` once `buffer_fence` signals
    fn draw_layers(
        &self,
        display: &DisplaySettings,
        layers: &[LayerSettings],
        buffer: &GraphicBuffer,
        use_framebuffer_cache: bool,
        buffer_fence: Fence,
    ) -> Result<Fence, RenderError>;
}
