//! Outputs and their per-frame composition pipeline
//!
//! An [`Output`] is one compositing target. It owns its composition state,
//! the list of visible [`OutputLayer`]s (back to front), a display color
//! profile and a render surface. Each frame runs strictly in order:
//!
//! 1. [`Output::prepare`] rebuilds the visible layer list when geometry changed
//! 2. [`Output::present`] updates the color profile, writes layer state,
//!    decides whether to recompose, picks client/device composition, draws
//!    client layers and presents, handing release fences back to layers
//!
//! Outputs come in two variants chosen at construction: plain GPU-only
//! outputs and hardware displays ([`HardwareDisplay`]). The variant only
//! changes the hooks in [`OutputHooks`]; the pipeline itself is shared.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use flinger::headless::{HeadlessRenderEngine, HeadlessSurface};
//! use flinger::geometry::Size;
//! use flinger::output::Output;
//!
//! let engine = Arc::new(HeadlessRenderEngine::new());
//! let mut output = Output::new("virtual", engine);
//! output.set_render_surface(Box::new(HeadlessSurface::new(Size::new(320, 240))));
//! output.set_composition_enabled(true);
//! assert_eq!(output.state().bounds.width(), 320);
//! ```

pub mod coverage;
pub mod display;
pub mod hooks;
pub mod output_layer;
pub mod state;



pub use coverage::{compute_layer_coverage, CoverageOutcome, CoverageState, LayerCoverage};
pub use display::{DisplayCreationArgs, HardwareDisplay};
pub use hooks::{BasicOutput, FrameFences, OutputHooks};
pub use output_layer::{HwcLayerState, OutputLayer, OutputLayerState};
pub use state::OutputCompositionState;

use crate::color::{
    best_dataspace, ColorMode, ColorProfile, Dataspace, DisplayColorProfile, OutputColorSetting,
    RenderIntent,
};
use crate::compositor::CompositionRefreshArgs;
use crate::fence::Fence;
use crate::geometry::{Orientation, Rect, Region, Size, Transform};
use crate::hwc::{DisplayId, HwComposer};
use crate::layer::{
    ClientCompositionTargetSettings, Layer, LayerFe, LayerFeSet, LayerId, StateSubset,
};
use crate::render::{DisplaySettings, LayerSettings, RenderEngine};
use crate::surface::RenderSurface;
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::fmt::Write;
use std::sync::{Arc, Weak};

/// Which variant of output this is
pub enum OutputKind {
    Basic(BasicOutput),
    Display(HardwareDisplay),
}

impl OutputKind {
    fn hooks(&self) -> &dyn OutputHooks {
        match self {
            OutputKind::Basic(basic) => basic,
            OutputKind::Display(display) => display,
        }
    }
}

/// One compositing target
pub struct Output {
    name: String,
    kind: OutputKind,
    state: OutputCompositionState,
    render_engine: Arc<dyn RenderEngine>,
    display_color_profile: Option<DisplayColorProfile>,
    render_surface: Option<Box<dyn RenderSurface>>,
    output_layers: Vec<OutputLayer>,
    released_layers: Vec<Weak<dyn LayerFe>>,
    must_recompose: bool,
    last_present_fence: Fence,
}

impl Output {
    /// Creates a GPU-only output
    pub fn new(name: impl Into<String>, render_engine: Arc<dyn RenderEngine>) -> Self {
        Self::with_kind(name.into(), OutputKind::Basic(BasicOutput), render_engine)
    }

    /// Creates a hardware-backed display
    pub fn new_display(
        name: impl Into<String>,
        render_engine: Arc<dyn RenderEngine>,
        hwc: Arc<dyn HwComposer>,
        args: DisplayCreationArgs,
    ) -> Self {
        let display = HardwareDisplay::new(hwc, &args);
        let mut output = Self::with_kind(name.into(), OutputKind::Display(display), render_engine);
        output.state.is_secure = args.is_secure;
        output
    }

    fn with_kind(name: String, kind: OutputKind, render_engine: Arc<dyn RenderEngine>) -> Self {
        Self {
            name,
            kind,
            state: OutputCompositionState::default(),
            render_engine,
            display_color_profile: None,
            render_surface: None,
            output_layers: Vec::new(),
            released_layers: Vec::new(),
            must_recompose: false,
            last_present_fence: Fence::no_fence(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn kind(&self) -> &OutputKind {
        &self.kind
    }

    /// Hardware id, for displays that are still connected
    pub fn display_id(&self) -> Option<DisplayId> {
        match &self.kind {
            OutputKind::Display(display) => display.id(),
            OutputKind::Basic(_) => None,
        }
    }

    pub fn is_virtual(&self) -> bool {
        match &self.kind {
            OutputKind::Display(display) => display.is_virtual(),
            OutputKind::Basic(_) => true,
        }
    }

    pub fn is_secure(&self) -> bool {
        self.state.is_secure
    }

    /// Releases the hardware identity of a display; no-op when already gone
    pub fn disconnect(&mut self) {
        let OutputKind::Display(display) = &mut self.kind else {
            return;
        };
        if display.disconnect() {
            for layer in &mut self.output_layers {
                layer.edit_state().hwc = None;
            }
        }
    }

    /// Has everything needed to compose
    pub fn is_valid(&self) -> bool {
        self.display_color_profile
            .as_ref()
            .is_some_and(DisplayColorProfile::is_valid)
            && self
                .render_surface
                .as_ref()
                .is_some_and(|surface| surface.is_valid())
    }

    pub fn state(&self) -> &OutputCompositionState {
        &self.state
    }

    pub(crate) fn edit_state(&mut self) -> &mut OutputCompositionState {
        &mut self.state
    }

    pub fn set_composition_enabled(&mut self, enabled: bool) {
        if self.state.is_enabled == enabled {
            return;
        }

        self.state.is_enabled = enabled;
        self.dirty_entire_output();
    }

    pub fn set_projection(
        &mut self,
        transform: Transform,
        orientation: Orientation,
        frame: Rect,
        viewport: Rect,
        scissor: Rect,
        needs_filtering: bool,
    ) {
        self.state.transform = transform;
        self.state.orientation = orientation;
        self.state.scissor = scissor;
        self.state.frame = frame;
        self.state.viewport = viewport;
        self.state.needs_filtering = needs_filtering;

        self.dirty_entire_output();
    }

    /// Resizes the render surface and takes its size as the new bounds
    pub fn set_bounds(&mut self, size: Size) {
        if let Some(surface) = self.render_surface.as_mut() {
            surface.set_display_size(size);
            self.state.bounds = Rect::from_size(surface.size());
        } else {
            self.state.bounds = Rect::from_size(size);
        }

        self.dirty_entire_output();
    }

    pub fn set_layer_stack_filter(&mut self, layer_stack_id: u32, is_internal: bool) {
        self.state.layer_stack_id = layer_stack_id;
        self.state.layer_stack_internal = is_internal;

        self.dirty_entire_output();
    }

    pub fn set_color_transform(&mut self, args: &CompositionRefreshArgs) {
        let Some(matrix) = args.color_transform_matrix else {
            return;
        };
        if self.state.color_transform_matrix == matrix {
            return;
        }

        self.state.color_transform_matrix = matrix;
        self.kind.hooks().push_color_transform(&matrix);

        self.dirty_entire_output();
    }

    /// Applies a color profile; unchanged profiles cause no work at all
    pub fn set_color_profile(&mut self, profile: &ColorProfile) {
        let Some(display_profile) = self.display_color_profile.as_ref() else {
            return;
        };

        let target_dataspace = display_profile.target_dataspace(
            profile.mode,
            profile.dataspace,
            profile.color_space_agnostic_dataspace,
        );

        if self.state.color_mode == profile.mode
            && self.state.dataspace == profile.dataspace
            && self.state.render_intent == profile.render_intent
            && self.state.target_dataspace == target_dataspace
        {
            return;
        }

        let hooks = self.kind.hooks();
        if !hooks.accepts_color_mode() {
            return;
        }

        self.state.color_mode = profile.mode;
        self.state.dataspace = profile.dataspace;
        self.state.render_intent = profile.render_intent;
        self.state.target_dataspace = target_dataspace;

        if let Some(surface) = self.render_surface.as_mut() {
            surface.set_buffer_dataspace(profile.dataspace);
        }

        debug!(
            "{}: color mode {:?}, dataspace {:?}, render intent {:?}",
            self.name, profile.mode, profile.dataspace, profile.render_intent
        );

        hooks.push_color_mode(profile.mode, profile.render_intent);

        self.dirty_entire_output();
    }

    pub fn display_color_profile(&self) -> Option<&DisplayColorProfile> {
        self.display_color_profile.as_ref()
    }

    pub fn set_display_color_profile(&mut self, profile: DisplayColorProfile) {
        self.display_color_profile = Some(profile);
    }

    pub fn render_surface(&self) -> Option<&dyn RenderSurface> {
        self.render_surface.as_deref()
    }

    /// Installs the render surface; its size becomes the output bounds
    pub fn set_render_surface(&mut self, surface: Box<dyn RenderSurface>) {
        self.state.bounds = Rect::from_size(surface.size());
        self.render_surface = Some(surface);

        self.dirty_entire_output();
    }

    /// Area to repaint, limited to the viewport
    pub fn dirty_region(&self, repaint_everything: bool) -> Region {
        let mut dirty = Region::from_rect(self.state.viewport);
        if !repaint_everything {
            dirty.and_self(&self.state.dirty_region);
        }
        dirty
    }

    pub fn belongs_in_output(&self, layer: &Layer) -> bool {
        let fe_state = layer.fe_state();
        self.state
            .belongs_in_output(fe_state.layer_stack_id, fe_state.internal_only)
    }

    /// Visible layers, back to front
    pub fn output_layers(&self) -> &[OutputLayer] {
        &self.output_layers
    }

    pub fn output_layer_for_layer(&self, id: LayerId) -> Option<&OutputLayer> {
        self.output_layers.iter().find(|layer| layer.layer_id() == id)
    }

    /// Layers that left the output and still wait for a present fence
    pub fn released_layer_count(&self) -> usize {
        self.released_layers.len()
    }

    /// Present fence of the last frame that reached the device
    pub fn last_present_fence(&self) -> &Fence {
        &self.last_present_fence
    }

    fn dirty_entire_output(&mut self) {
        self.state.dirty_region.set(self.state.bounds);
    }

    /// First half of a frame: visibility
    pub fn prepare(&mut self, args: &CompositionRefreshArgs, latched: &mut LayerFeSet) {
        trace!("{}: prepare", self.name);
        self.rebuild_layer_stacks(args, latched);
    }

    /// Second half of a frame: composition and presentation
    pub fn present(&mut self, args: &CompositionRefreshArgs) {
        trace!("{}: present", self.name);

        if !self.state.is_enabled {
            trace!("{}: composition disabled", self.name);
            return;
        }

        self.update_color_profile(args);
        self.update_and_write_composition_state(args);
        self.set_color_transform(args);
        self.begin_frame();
        self.prepare_frame();
        self.dev_opt_repaint_flash(args);
        self.finish_frame();
        self.post_framebuffer();
    }

    fn rebuild_layer_stacks(&mut self, args: &CompositionRefreshArgs, latched: &mut LayerFeSet) {
        if !self.state.is_enabled || !args.updating_output_geometry_this_frame {
            return;
        }

        let mut coverage = CoverageState::new(latched);
        self.collect_visible_layers(args, &mut coverage);

        self.state.undefined_region = coverage.undefined_region(&self.state);
        self.state.dirty_region.or_self(&coverage.dirty_region);
    }

    fn collect_visible_layers(
        &mut self,
        args: &CompositionRefreshArgs,
        coverage: &mut CoverageState<'_>,
    ) {
        let mut previous: HashMap<LayerId, OutputLayer> = self
            .output_layers
            .drain(..)
            .map(|layer| (layer.layer_id(), layer))
            .collect();

        // Front to back, so occluders are seen before what they hide.
        let mut visible = Vec::new();
        for layer in args.layers.iter().rev() {
            if let Some(output_layer) =
                self.output_layer_if_visible(layer, &mut previous, coverage)
            {
                visible.push(output_layer);
            }
        }

        visible.reverse();
        for (z, layer) in visible.iter_mut().enumerate() {
            layer.edit_state().z = z as u32;
        }

        // Whatever is left was shown last frame and is gone now.
        let hooks = self.kind.hooks();
        for (_, released) in previous {
            coverage.dirty_region.or_self(&released.state().visible_region);
            if let Some(hwc_layer) = released.hwc_layer() {
                hooks.release_hwc_layer(hwc_layer);
            }
            debug!("{}: released {}", self.name, released.layer_fe().debug_name());
            self.released_layers.push(Arc::downgrade(released.layer_fe()));
        }

        self.output_layers = visible;
    }

    fn output_layer_if_visible(
        &self,
        layer: &Arc<Layer>,
        previous: &mut HashMap<LayerId, OutputLayer>,
        coverage: &mut CoverageState<'_>,
    ) -> Option<OutputLayer> {
        let layer_fe = layer.layer_fe()?;

        // Layers may show on several outputs; latch basic geometry once.
        if coverage.latched_layers.insert(layer.id()) {
            layer_fe
                .latch_composition_state(&mut layer.edit_fe_state(), StateSubset::BasicGeometry);
        }

        let outcome = {
            let fe_state = layer.fe_state();
            let prev_state = previous.get(&layer.id()).map(OutputLayer::state);
            compute_layer_coverage(&fe_state, prev_state, &self.state, coverage)
        };

        let CoverageOutcome::Visible(layer_coverage) = outcome else {
            return None;
        };

        let mut output_layer = match previous.remove(&layer.id()) {
            Some(existing) => existing,
            None => self.create_output_layer(layer.clone(), layer_fe),
        };
        layer_coverage.store(output_layer.edit_state());
        Some(output_layer)
    }

    fn create_output_layer(&self, layer: Arc<Layer>, layer_fe: Arc<dyn LayerFe>) -> OutputLayer {
        let mut output_layer = OutputLayer::new(layer, layer_fe);
        output_layer.edit_state().hwc = self.kind.hooks().create_hwc_layer();
        output_layer
    }

    fn update_color_profile(&mut self, args: &CompositionRefreshArgs) {
        if let Some(profile) = self.pick_color_profile(args) {
            self.set_color_profile(&profile);
        }
    }

    /// Chooses the color state that can show every visible layer
    pub fn pick_color_profile(&self, args: &CompositionRefreshArgs) -> Option<ColorProfile> {
        let display_profile = self.display_color_profile.as_ref()?;

        if args.output_color_setting == OutputColorSetting::Unmanaged {
            return Some(ColorProfile {
                mode: ColorMode::Native,
                dataspace: Dataspace::Unknown,
                render_intent: RenderIntent::Colorimetric,
                color_space_agnostic_dataspace: args.color_space_agnostic_dataspace,
            });
        }

        let best = best_dataspace(self.output_layers.iter().map(|layer| {
            let fe_state = layer.layer().fe_state();
            (fe_state.dataspace, fe_state.force_client_composition)
        }));

        let mut best_dataspace = match args.force_output_color_mode {
            Some(ColorMode::Srgb) => Dataspace::V0Srgb,
            Some(ColorMode::DisplayP3) => Dataspace::DisplayP3,
            _ => best.dataspace,
        };

        // HDR output only when the device has no legacy path for it.
        let is_hdr = best.hdr_dataspace != Dataspace::Unknown
            && !display_profile.has_legacy_hdr_support(best.hdr_dataspace)
            && !best.hdr_client_composition;
        if is_hdr {
            best_dataspace = best.hdr_dataspace;
        }

        let intent = match args.output_color_setting {
            OutputColorSetting::Managed | OutputColorSetting::Unmanaged => {
                if is_hdr {
                    RenderIntent::ToneMapColorimetric
                } else {
                    RenderIntent::Colorimetric
                }
            }
            OutputColorSetting::Enhanced => {
                if is_hdr {
                    RenderIntent::ToneMapEnhance
                } else {
                    RenderIntent::Enhance
                }
            }
            OutputColorSetting::Vendor(value) => RenderIntent::Vendor(value),
        };

        let (dataspace, mode, render_intent) =
            display_profile.best_color_mode(best_dataspace, intent);

        Some(ColorProfile {
            mode,
            dataspace,
            render_intent,
            color_space_agnostic_dataspace: args.color_space_agnostic_dataspace,
        })
    }

    fn update_and_write_composition_state(&mut self, args: &CompositionRefreshArgs) {
        for layer in &mut self.output_layers {
            layer.update_composition_state(
                &self.state,
                args.updating_geometry_this_frame,
                args.dev_opt_force_client_composition,
            );
        }
        self.kind.hooks().write_layer_state(&mut self.output_layers);
    }

    /// Decides whether this frame needs composing at all
    fn begin_frame(&mut self) {
        let dirty = !self.dirty_region(false).is_empty();
        let empty = self.output_layers.is_empty();
        let was_empty = !self.state.last_composition_had_visible_layers;

        // Nothing changed: skip. Changed but nothing visible now or last
        // time: skip too, so removing every layer yields one blank frame.
        let must_recompose = dirty && !(empty && was_empty);

        debug!(
            "{}: {} composition (dirty={} empty={} was_empty={})",
            self.name,
            if must_recompose { "doing" } else { "skipping" },
            dirty,
            empty,
            was_empty
        );

        if let Some(surface) = self.render_surface.as_mut() {
            surface.begin_frame(must_recompose);
        }

        if must_recompose {
            self.state.last_composition_had_visible_layers = !empty;
        }
        self.must_recompose = must_recompose;
    }

    fn prepare_frame(&mut self) {
        if !self.state.is_enabled {
            return;
        }

        self.kind
            .hooks()
            .choose_composition_strategy(&mut self.state, &mut self.output_layers);

        if let Some(surface) = self.render_surface.as_mut() {
            surface.prepare_frame(
                self.state.uses_client_composition,
                self.state.uses_device_composition,
            );
        }
    }

    /// Flashes the dirty region, presents, waits, then re-prepares
    fn dev_opt_repaint_flash(&mut self, args: &CompositionRefreshArgs) {
        let Some(delay) = args.dev_opt_flash_dirty_regions_delay else {
            return;
        };

        if self.state.is_enabled {
            let dirty = self.dirty_region(args.repaint_everything);
            if !dirty.is_empty() {
                let _ = self.compose_surfaces(&dirty);
                if let Some(surface) = self.render_surface.as_mut() {
                    surface.queue_buffer(Fence::no_fence());
                }
            }
        }

        self.post_framebuffer();

        std::thread::sleep(delay);

        self.prepare_frame();
    }

    fn finish_frame(&mut self) {
        if !self.state.is_enabled {
            return;
        }

        let Some(ready_fence) = self.compose_surfaces(&Region::new()) else {
            return;
        };

        if let Some(surface) = self.render_surface.as_mut() {
            surface.queue_buffer(ready_fence);
        }
    }

    /// Draws client composited layers
    ///
    /// Returns the draw fence, the invalid fence when no client composition is
    /// needed, or `None` when the frame is skipped or no buffer could be
    /// dequeued. A non-empty `debug_region` is the flash pass and always draws.
    fn compose_surfaces(&mut self, debug_region: &Region) -> Option<Fence> {
        if debug_region.is_empty() && !self.must_recompose {
            trace!("{}: nothing to recompose", self.name);
            return None;
        }

        if !self.state.uses_client_composition {
            return Some(Fence::no_fence());
        }

        let Some(display_profile) = self.display_color_profile.as_ref() else {
            return Some(Fence::no_fence());
        };

        let supports_protected_content = self.render_engine.supports_protected_content();
        let hooks = self.kind.hooks();

        let mut display_settings = DisplaySettings {
            physical_display: self.state.scissor,
            clip: self.state.scissor,
            global_transform: self.state.transform,
            orientation: self.state.orientation,
            output_dataspace: if display_profile.has_wide_color_gamut() {
                self.state.dataspace
            } else {
                Dataspace::Unknown
            },
            max_luminance: display_profile.hdr_capabilities().desired_max_luminance(),
            ..DisplaySettings::default()
        };

        if !self.state.uses_device_composition && !hooks.skip_color_transform() {
            display_settings.color_transform = self.state.color_transform_matrix;
        }

        let mut layers = self.generate_client_composition_requests(
            supports_protected_content,
            &mut display_settings.clear_region,
        );
        append_region_flash_requests(debug_region, &mut layers);

        let surface = self.render_surface.as_mut()?;

        if self.state.is_secure && supports_protected_content {
            let needs_protected = self
                .output_layers
                .iter()
                .any(|layer| layer.layer().fe_state().has_protected_content);
            if needs_protected != self.render_engine.is_protected() {
                self.render_engine.use_protected_context(needs_protected);
            }
            if needs_protected != surface.is_protected()
                && needs_protected == self.render_engine.is_protected()
            {
                surface.set_protected(needs_protected);
            }
        }

        let Some((buffer, buffer_fence)) = surface.dequeue_buffer() else {
            warn!(
                "Dequeuing buffer for {} failed, bailing out of client composition for this frame",
                self.name
            );
            return None;
        };

        let expensive = display_settings.output_dataspace == Dataspace::DisplayP3;
        if expensive {
            hooks.set_expensive_rendering_expected(true);
        }

        let ready_fence = match self.render_engine.draw_layers(
            &display_settings,
            &layers,
            &buffer,
            true,
            buffer_fence,
        ) {
            Ok(fence) => fence,
            Err(err) => {
                warn!("{}: client composition draw failed: {}", self.name, err);
                Fence::no_fence()
            }
        };

        if expensive {
            hooks.set_expensive_rendering_expected(false);
        }

        Some(ready_fence)
    }

    /// Builds the GPU draw list, back to front
    fn generate_client_composition_requests(
        &self,
        supports_protected_content: bool,
        clear_region: &mut Region,
    ) -> Vec<LayerSettings> {
        let mut requests = Vec::new();
        let viewport = Region::from_rect(self.state.viewport);
        let mut first_layer = true;
        let mut unused_clear_region = Region::new();

        for layer in &self.output_layers {
            let clip = viewport.intersect(&layer.state().visible_region);
            if clip.is_empty() {
                trace!("{}: skipping for empty clip", layer.layer_fe().debug_name());
                first_layer = false;
                continue;
            }

            let client_composition = layer.requires_client_composition();

            // The target starts out cleared, so the bottom layer never needs
            // a clear, and translucent layers must blend with what is below.
            let clear_client_composition = layer.state().clear_client_target
                && layer.layer().fe_state().is_opaque
                && !first_layer;

            if client_composition || clear_client_composition {
                let mut settings = ClientCompositionTargetSettings {
                    clip,
                    use_identity_transform: false,
                    needs_filtering: layer.needs_filtering() || self.state.needs_filtering,
                    is_secure: self.state.is_secure,
                    supports_protected_content,
                    clear_region: if client_composition {
                        &mut *clear_region
                    } else {
                        &mut unused_clear_region
                    },
                };

                if let Some(mut request) =
                    layer.layer_fe().prepare_client_composition(&mut settings)
                {
                    if !client_composition {
                        request.make_clear();
                    }
                    requests.push(request);
                }
            }

            first_layer = false;
        }

        requests
    }

    /// Flips, presents and hands release fences to the layers
    fn post_framebuffer(&mut self) {
        if !self.state.is_enabled {
            return;
        }

        self.state.dirty_region.clear();

        let mut frame = FrameFences::default();
        if let Some(surface) = self.render_surface.as_mut() {
            surface.flip();
            if self.state.uses_client_composition {
                frame.client_target_acquire_fence = surface.client_target_acquire_fence();
            }
        }

        self.kind
            .hooks()
            .present_and_get_frame_fences(&self.output_layers, &mut frame);

        if let Some(surface) = self.render_surface.as_mut() {
            surface.on_present_display_completed();
        }

        for layer in &self.output_layers {
            let mut release_fence = layer
                .hwc_layer()
                .and_then(|hwc_layer| frame.layer_fences.get(&hwc_layer).cloned())
                .unwrap_or_default();

            // Which layers were client composed last frame is not tracked, so
            // every layer also waits for the current client target.
            if self.state.uses_client_composition {
                release_fence = Fence::merge(
                    "LayerRelease",
                    &release_fence,
                    &frame.client_target_acquire_fence,
                );
            }

            layer.layer_fe().on_layer_displayed(release_fence);
        }

        for released in self.released_layers.drain(..) {
            if let Some(layer_fe) = released.upgrade() {
                layer_fe.on_layer_displayed(frame.present_fence.clone());
            }
        }

        self.last_present_fence = frame.present_fence;
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        match &self.kind {
            OutputKind::Basic(_) => {
                let _ = writeln!(out, "   Composition Output State: [\"{}\"]", self.name);
            }
            OutputKind::Display(display) => {
                let _ = writeln!(out, "   Composition Display State: [\"{}\"]", self.name);
                match display.id() {
                    Some(id) => {
                        let _ = writeln!(out, "   isVirtual={} hwcId={}", display.is_virtual(), id);
                    }
                    None => {
                        let _ = writeln!(out, "   isVirtual={} no hwcId", display.is_virtual());
                    }
                }
            }
        }

        self.state.dump(&mut out);

        let _ = writeln!(out, "   {} output layers", self.output_layers.len());
        for layer in &self.output_layers {
            layer.dump(&mut out);
        }
        out
    }
}

/// Paints every rectangle of `flash_region` magenta on top of the frame
fn append_region_flash_requests(flash_region: &Region, requests: &mut Vec<LayerSettings>) {
    if flash_region.is_empty() {
        return;
    }

    for rect in flash_region {
        let mut settings = LayerSettings {
            boundaries: rect.to_float_rect(),
            alpha: 1.0,
            ..LayerSettings::default()
        };
        settings.source.solid_color = [1.0, 0.0, 1.0];
        requests.push(settings);
    }
}
