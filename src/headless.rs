//! Headless backends
//!
//! In-process implementations of the device, renderer, surface and front-end
//! boundaries. They record what the pipeline asks of them so the binary can
//! run without hardware and tests can assert on the traffic.

use crate::color::{ColorMatrix, ColorMode, Dataspace, RenderIntent};
use crate::error::{HwcError, RenderError};
use crate::fence::Fence;
use crate::geometry::{Rect, Region, Size, Transform};
use crate::hwc::{
    Composition, DeviceRequestedChanges, DisplayCapability, DisplayId, HwComposer, HwcLayerId,
};
use crate::layer::{ClientCompositionTargetSettings, LayerFe, LayerFeState, StateSubset};
use crate::render::{DisplaySettings, GraphicBuffer, LayerSettings, PixelSource, RenderEngine};
use crate::surface::RenderSurface;
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Per-display bookkeeping of [`HeadlessHwc`]
#[derive(Debug, Default)]
struct HeadlessDisplay {
    layers: HashSet<HwcLayerId>,
    compositions: HashMap<HwcLayerId, Composition>,
    color_modes: Vec<(ColorMode, RenderIntent)>,
    color_transforms: Vec<ColorMatrix>,
    scripted_changes: Option<DeviceRequestedChanges>,
    fail_validate: bool,
    presents: u32,
    present_fence: Fence,
    release_fences: HashMap<HwcLayerId, Fence>,
    capabilities: HashSet<DisplayCapability>,
    vsync_enabled: bool,
    vsync_toggles: u32,
}

/// Hardware composer that composes nothing and records everything
#[derive(Debug, Default)]
pub struct HeadlessHwc {
    displays: Mutex<HashMap<DisplayId, HeadlessDisplay>>,
    disconnected: Mutex<HashSet<DisplayId>>,
    destroyed_layers: Mutex<Vec<(DisplayId, HwcLayerId)>>,
    next_layer: AtomicU64,
    clock: AtomicI64,
}

impl HeadlessHwc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes returned from every later validate on `display`
    pub fn script_changes(&self, display: DisplayId, changes: Option<DeviceRequestedChanges>) {
        self.displays.lock().entry(display).or_default().scripted_changes = changes;
    }

    /// Makes validate fail on `display`
    pub fn fail_validate(&self, display: DisplayId, fail: bool) {
        self.displays.lock().entry(display).or_default().fail_validate = fail;
    }

    pub fn add_capability(&self, display: DisplayId, capability: DisplayCapability) {
        self.displays
            .lock()
            .entry(display)
            .or_default()
            .capabilities
            .insert(capability);
    }

    pub fn color_mode_calls(&self, display: DisplayId) -> Vec<(ColorMode, RenderIntent)> {
        self.displays
            .lock()
            .get(&display)
            .map(|d| d.color_modes.clone())
            .unwrap_or_default()
    }

    pub fn color_transform_calls(&self, display: DisplayId) -> usize {
        self.displays
            .lock()
            .get(&display)
            .map_or(0, |d| d.color_transforms.len())
    }

    pub fn present_count(&self, display: DisplayId) -> u32 {
        self.displays.lock().get(&display).map_or(0, |d| d.presents)
    }

    pub fn layer_count(&self, display: DisplayId) -> usize {
        self.displays.lock().get(&display).map_or(0, |d| d.layers.len())
    }

    pub fn composition_of(&self, display: DisplayId, layer: HwcLayerId) -> Option<Composition> {
        self.displays
            .lock()
            .get(&display)
            .and_then(|d| d.compositions.get(&layer).copied())
    }

    pub fn destroyed_layers(&self) -> Vec<(DisplayId, HwcLayerId)> {
        self.destroyed_layers.lock().clone()
    }

    pub fn vsync_enabled(&self, display: DisplayId) -> bool {
        self.displays.lock().get(&display).is_some_and(|d| d.vsync_enabled)
    }

    /// Number of actual on/off transitions of hardware vsync
    pub fn vsync_toggles(&self, display: DisplayId) -> u32 {
        self.displays.lock().get(&display).map_or(0, |d| d.vsync_toggles)
    }

    pub fn is_disconnected(&self, display: DisplayId) -> bool {
        self.disconnected.lock().contains(&display)
    }

    fn check_connected(&self, display: DisplayId) -> Result<(), HwcError> {
        if self.is_disconnected(display) {
            return Err(HwcError::NotConnected(display));
        }
        Ok(())
    }
}

impl HwComposer for HeadlessHwc {
    fn disconnect_display(&self, display: DisplayId) {
        debug!("Headless display {} disconnected", display);
        self.disconnected.lock().insert(display);
        self.displays.lock().remove(&display);
    }

    fn create_layer(&self, display: DisplayId) -> Result<HwcLayerId, HwcError> {
        self.check_connected(display)?;
        let layer = self.next_layer.fetch_add(1, Ordering::Relaxed) + 1;
        self.displays
            .lock()
            .entry(display)
            .or_default()
            .layers
            .insert(layer);
        Ok(layer)
    }

    fn destroy_layer(&self, display: DisplayId, layer: HwcLayerId) {
        if let Some(d) = self.displays.lock().get_mut(&display) {
            d.layers.remove(&layer);
            d.compositions.remove(&layer);
        }
        self.destroyed_layers.lock().push((display, layer));
    }

    fn set_layer_composition_type(
        &self,
        display: DisplayId,
        layer: HwcLayerId,
        composition: Composition,
    ) -> Result<(), HwcError> {
        self.check_connected(display)?;
        let mut displays = self.displays.lock();
        let d = displays.entry(display).or_default();
        if !d.layers.contains(&layer) {
            return Err(HwcError::BadLayer { display, layer });
        }
        d.compositions.insert(layer, composition);
        Ok(())
    }

    fn set_color_transform(
        &self,
        display: DisplayId,
        matrix: &ColorMatrix,
    ) -> Result<(), HwcError> {
        self.check_connected(display)?;
        self.displays
            .lock()
            .entry(display)
            .or_default()
            .color_transforms
            .push(*matrix);
        Ok(())
    }

    fn set_active_color_mode(
        &self,
        display: DisplayId,
        mode: ColorMode,
        intent: RenderIntent,
    ) -> Result<(), HwcError> {
        self.check_connected(display)?;
        self.displays
            .lock()
            .entry(display)
            .or_default()
            .color_modes
            .push((mode, intent));
        Ok(())
    }

    fn get_device_composition_changes(
        &self,
        display: DisplayId,
        _any_layers_require_client_composition: bool,
    ) -> Result<Option<DeviceRequestedChanges>, HwcError> {
        self.check_connected(display)?;
        let displays = self.displays.lock();
        let Some(d) = displays.get(&display) else {
            return Ok(None);
        };
        if d.fail_validate {
            return Err(HwcError::CallFailed {
                call: "validate",
                display,
                status: -1,
            });
        }
        Ok(d.scripted_changes.clone())
    }

    fn present_and_get_release_fences(&self, display: DisplayId) -> Result<(), HwcError> {
        self.check_connected(display)?;
        let now = self.clock.fetch_add(16_666_667, Ordering::Relaxed);

        let mut displays = self.displays.lock();
        let d = displays.entry(display).or_default();
        d.presents += 1;
        d.present_fence = Fence::signalled(format!("present-{}", display), now);
        let layers: Vec<HwcLayerId> = d.layers.iter().copied().collect();
        d.release_fences = layers
            .into_iter()
            .map(|layer| (layer, Fence::signalled(format!("release-{}-{}", display, layer), now)))
            .collect();

        trace!("Headless present #{} on display {}", d.presents, display);
        Ok(())
    }

    fn get_present_fence(&self, display: DisplayId) -> Fence {
        self.displays
            .lock()
            .get(&display)
            .map(|d| d.present_fence.clone())
            .unwrap_or_default()
    }

    fn get_layer_release_fence(&self, display: DisplayId, layer: HwcLayerId) -> Fence {
        self.displays
            .lock()
            .get(&display)
            .and_then(|d| d.release_fences.get(&layer).cloned())
            .unwrap_or_default()
    }

    fn clear_release_fences(&self, display: DisplayId) {
        if let Some(d) = self.displays.lock().get_mut(&display) {
            d.release_fences.clear();
        }
    }

    fn has_display_capability(&self, display: DisplayId, capability: DisplayCapability) -> bool {
        self.displays
            .lock()
            .get(&display)
            .is_some_and(|d| d.capabilities.contains(&capability))
    }

    fn set_vsync_enabled(&self, display: DisplayId, enabled: bool) -> Result<(), HwcError> {
        self.check_connected(display)?;
        let mut displays = self.displays.lock();
        let state = displays.entry(display).or_default();
        if state.vsync_enabled != enabled {
            trace!("Headless display {} vsync {}", display, if enabled { "on" } else { "off" });
            state.vsync_enabled = enabled;
            state.vsync_toggles += 1;
        }
        Ok(())
    }
}

/// One recorded draw submission
#[derive(Debug, Clone)]
pub struct DrawCall {
    pub display: DisplaySettings,
    pub layers: Vec<LayerSettings>,
    pub buffer: GraphicBuffer,
}

/// Render engine that records draws and completes them immediately
#[derive(Debug, Default)]
pub struct HeadlessRenderEngine {
    draws: Mutex<Vec<DrawCall>>,
    supports_protected: AtomicBool,
    protected: AtomicBool,
    clock: AtomicI64,
}

impl HeadlessRenderEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_protected_content_support() -> Self {
        let engine = Self::default();
        engine.supports_protected.store(true, Ordering::Relaxed);
        engine
    }

    pub fn draw_count(&self) -> usize {
        self.draws.lock().len()
    }

    pub fn draws(&self) -> Vec<DrawCall> {
        self.draws.lock().clone()
    }

    pub fn last_draw(&self) -> Option<DrawCall> {
        self.draws.lock().last().cloned()
    }
}

impl RenderEngine for HeadlessRenderEngine {
    fn supports_protected_content(&self) -> bool {
        self.supports_protected.load(Ordering::Relaxed)
    }

    fn is_protected(&self) -> bool {
        self.protected.load(Ordering::Relaxed)
    }

    fn use_protected_context(&self, protected: bool) -> bool {
        if protected && !self.supports_protected_content() {
            return false;
        }
        self.protected.store(protected, Ordering::Relaxed);
        true
    }

    fn draw_layers(
        &self,
        display: &DisplaySettings,
        layers: &[LayerSettings],
        buffer: &GraphicBuffer,
        _use_framebuffer_cache: bool,
        _buffer_fence: Fence,
    ) -> Result<Fence, RenderError> {
        if buffer.protected && !self.is_protected() {
            return Err(RenderError::BadBuffer(buffer.id));
        }

        self.draws.lock().push(DrawCall {
            display: display.clone(),
            layers: layers.to_vec(),
            buffer: buffer.clone(),
        });

        let now = self.clock.fetch_add(1_000_000, Ordering::Relaxed);
        Ok(Fence::signalled("gpu-draw", now))
    }
}

/// What a [`HeadlessSurface`] has been asked to do
#[derive(Debug, Default)]
pub struct SurfaceRecord {
    /// `must_recompose` of every `begin_frame`
    pub begin_frames: Vec<bool>,
    pub dequeues: u32,
    pub queued: Vec<Fence>,
    pub flips: u32,
    pub dataspace: Dataspace,
    pub fail_dequeue: bool,
}

/// Render surface with a single rotating buffer slot
pub struct HeadlessSurface {
    size: Size,
    protected: bool,
    next_buffer: u64,
    acquire_fence: Fence,
    record: Arc<Mutex<SurfaceRecord>>,
}

impl HeadlessSurface {
    pub fn new(size: Size) -> Self {
        Self {
            size,
            protected: false,
            next_buffer: 1,
            acquire_fence: Fence::no_fence(),
            record: Arc::new(Mutex::new(SurfaceRecord::default())),
        }
    }

    /// Shared view of the recorded calls, usable after the surface is moved
    pub fn record(&self) -> Arc<Mutex<SurfaceRecord>> {
        self.record.clone()
    }
}

impl RenderSurface for HeadlessSurface {
    fn is_valid(&self) -> bool {
        !self.size.is_empty()
    }

    fn size(&self) -> Size {
        self.size
    }

    fn set_display_size(&mut self, size: Size) {
        self.size = size;
    }

    fn set_buffer_dataspace(&mut self, dataspace: Dataspace) {
        self.record.lock().dataspace = dataspace;
    }

    fn is_protected(&self) -> bool {
        self.protected
    }

    fn set_protected(&mut self, protected: bool) {
        self.protected = protected;
    }

    fn begin_frame(&mut self, must_recompose: bool) {
        self.record.lock().begin_frames.push(must_recompose);
    }

    fn prepare_frame(&mut self, _uses_client_composition: bool, _uses_device_composition: bool) {}

    fn dequeue_buffer(&mut self) -> Option<(GraphicBuffer, Fence)> {
        let mut record = self.record.lock();
        if record.fail_dequeue {
            return None;
        }
        record.dequeues += 1;

        let buffer = GraphicBuffer {
            id: self.next_buffer,
            width: self.size.width,
            height: self.size.height,
            protected: self.protected,
        };
        self.next_buffer += 1;
        Some((buffer, Fence::no_fence()))
    }

    fn queue_buffer(&mut self, ready_fence: Fence) {
        self.acquire_fence = ready_fence.clone();
        self.record.lock().queued.push(ready_fence);
    }

    fn client_target_acquire_fence(&self) -> Fence {
        self.acquire_fence.clone()
    }

    fn on_present_display_completed(&mut self) {}

    fn flip(&mut self) {
        self.record.lock().flips += 1;
    }

    fn page_flip_count(&self) -> u32 {
        self.record.lock().flips
    }
}

/// Front-end layer drawing a solid rectangle
///
/// Setters change the pending state, which the pipeline picks up at its latch
/// points. Any geometry or content change marks the content dirty until the
/// next basic geometry latch.
pub struct SolidLayerFe {
    name: String,
    pending: Mutex<LayerFeState>,
    latches: Mutex<HashMap<StateSubset, u32>>,
    release_fences: Mutex<Vec<Fence>>,
}

impl SolidLayerFe {
    /// A visible, opaque layer on layer stack 0
    pub fn new(name: impl Into<String>, bounds: Rect) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            pending: Mutex::new(LayerFeState {
                is_visible: true,
                is_opaque: true,
                layer_stack_id: Some(0),
                geom_layer_bounds: bounds,
                content_dirty: true,
                dataspace: Dataspace::V0Srgb,
                solid_color: [0.5, 0.5, 0.5],
                ..LayerFeState::default()
            }),
            latches: Mutex::new(HashMap::new()),
            release_fences: Mutex::new(Vec::new()),
        })
    }

    /// Applies `f` to the pending state and marks the content dirty
    pub fn update(&self, f: impl FnOnce(&mut LayerFeState)) {
        let mut pending = self.pending.lock();
        f(&mut pending);
        pending.content_dirty = true;
    }

    pub fn set_bounds(&self, bounds: Rect) {
        self.update(|state| state.geom_layer_bounds = bounds);
    }

    pub fn set_transform(&self, transform: Transform) {
        self.update(|state| state.geom_layer_transform = transform);
    }

    pub fn set_opaque(&self, opaque: bool) {
        self.update(|state| state.is_opaque = opaque);
    }

    pub fn set_visible(&self, visible: bool) {
        self.update(|state| state.is_visible = visible);
    }

    pub fn set_dataspace(&self, dataspace: Dataspace) {
        self.update(|state| state.dataspace = dataspace);
    }

    pub fn set_transparent_region_hint(&self, hint: Region) {
        self.update(|state| state.transparent_region_hint = hint);
    }

    pub fn latch_count(&self, subset: StateSubset) -> u32 {
        self.latches.lock().get(&subset).copied().unwrap_or(0)
    }

    pub fn release_fences(&self) -> Vec<Fence> {
        self.release_fences.lock().clone()
    }

    fn latch_basic_geometry(pending: &mut LayerFeState, state: &mut LayerFeState) {
        state.is_visible = pending.is_visible;
        state.is_opaque = pending.is_opaque;
        state.layer_stack_id = pending.layer_stack_id;
        state.internal_only = pending.internal_only;
        state.geom_layer_transform = pending.geom_layer_transform;
        state.geom_layer_bounds = pending.geom_layer_bounds;
        state.transparent_region_hint = pending.transparent_region_hint.clone();
        state.content_dirty = pending.content_dirty;
        pending.content_dirty = false;
    }

    fn latch_content(pending: &LayerFeState, state: &mut LayerFeState) {
        state.composition_type = pending.composition_type;
        state.force_client_composition = pending.force_client_composition;
        state.dataspace = pending.dataspace;
        state.has_protected_content = pending.has_protected_content;
        state.alpha = pending.alpha;
        state.buffer = pending.buffer.clone();
        state.solid_color = pending.solid_color;
    }
}

impl LayerFe for SolidLayerFe {
    fn latch_composition_state(&self, state: &mut LayerFeState, subset: StateSubset) {
        *self.latches.lock().entry(subset).or_insert(0) += 1;

        let mut pending = self.pending.lock();
        match subset {
            StateSubset::BasicGeometry => Self::latch_basic_geometry(&mut pending, state),
            StateSubset::GeometryAndContent => {
                state.geom_layer_transform = pending.geom_layer_transform;
                state.geom_layer_bounds = pending.geom_layer_bounds;
                Self::latch_content(&pending, state);
            }
            StateSubset::Content => Self::latch_content(&pending, state),
        }
    }

    fn prepare_client_composition(
        &self,
        settings: &mut ClientCompositionTargetSettings<'_>,
    ) -> Option<LayerSettings> {
        let pending = self.pending.lock();
        if settings.clip.is_empty() {
            return None;
        }
        if pending.has_protected_content && !settings.is_secure {
            // Protected content on an insecure output shows as black.
            return Some(LayerSettings {
                boundaries: pending.geom_layer_bounds.to_float_rect(),
                position_transform: pending.geom_layer_transform,
                alpha: 1.0,
                ..LayerSettings::default()
            });
        }

        Some(LayerSettings {
            boundaries: pending.geom_layer_bounds.to_float_rect(),
            position_transform: pending.geom_layer_transform,
            source: PixelSource {
                buffer: pending.buffer.clone(),
                solid_color: pending.solid_color,
            },
            alpha: pending.alpha,
            source_dataspace: pending.dataspace,
            disable_blending: pending.is_opaque,
        })
    }

    fn on_layer_displayed(&self, release_fence: Fence) {
        self.release_fences.lock().push(release_fence);
    }

    fn debug_name(&self) -> String {
        self.name.clone()
    }
}
