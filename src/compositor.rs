//! Composition engine
//!
//! Entry point for one frame of composition over every output. The engine
//! owns the device and renderer handles that outputs are created with, and
//! sequences the per-output stages so that front-end state shared between
//! outputs is latched exactly once per frame.

use crate::color::{ColorMatrix, ColorMode, Dataspace, OutputColorSetting};
use crate::hwc::HwComposer;
use crate::layer::{Layer, LayerFeSet, LayerId, StateSubset};
use crate::output::{DisplayCreationArgs, Output};
use crate::render::RenderEngine;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Output shared between the engine and whoever configures it
pub type SharedOutput = Arc<Mutex<Output>>;

/// Everything one frame of composition needs to know
#[derive(Clone)]
pub struct CompositionRefreshArgs {
    /// Outputs to compose, in order
    pub outputs: Vec<SharedOutput>,
    /// Source layers, back to front
    pub layers: Vec<Arc<Layer>>,

    /// Projection or layer membership changed, visibility must be recomputed
    pub updating_output_geometry_this_frame: bool,
    /// Layer geometry changed
    pub updating_geometry_this_frame: bool,

    pub output_color_setting: OutputColorSetting,
    pub force_output_color_mode: Option<ColorMode>,
    pub color_space_agnostic_dataspace: Dataspace,
    /// New color transform, if it changed this frame
    pub color_transform_matrix: Option<ColorMatrix>,

    pub dev_opt_force_client_composition: bool,
    /// Flash dirty areas for this long before composing
    pub dev_opt_flash_dirty_regions_delay: Option<Duration>,
    pub repaint_everything: bool,
}

impl Default for CompositionRefreshArgs {
    fn default() -> Self {
        Self {
            outputs: Vec::new(),
            layers: Vec::new(),
            updating_output_geometry_this_frame: false,
            updating_geometry_this_frame: false,
            output_color_setting: OutputColorSetting::Managed,
            force_output_color_mode: None,
            color_space_agnostic_dataspace: Dataspace::Unknown,
            color_transform_matrix: None,
            dev_opt_force_client_composition: false,
            dev_opt_flash_dirty_regions_delay: None,
            repaint_everything: false,
        }
    }
}

pub struct CompositionEngine {
    hwc: Arc<dyn HwComposer>,
    render_engine: Arc<dyn RenderEngine>,
}

impl CompositionEngine {
    pub fn new(hwc: Arc<dyn HwComposer>, render_engine: Arc<dyn RenderEngine>) -> Self {
        Self { hwc, render_engine }
    }

    pub fn hwc(&self) -> &Arc<dyn HwComposer> {
        &self.hwc
    }

    pub fn render_engine(&self) -> &Arc<dyn RenderEngine> {
        &self.render_engine
    }

    /// Creates a GPU-only output
    pub fn create_output(&self, name: impl Into<String>) -> SharedOutput {
        Arc::new(Mutex::new(Output::new(name, self.render_engine.clone())))
    }

    /// Creates a hardware-backed display
    pub fn create_display(
        &self,
        name: impl Into<String>,
        args: DisplayCreationArgs,
    ) -> SharedOutput {
        let name = name.into();
        debug!("Creating display output {} ({:?})", name, args);
        Arc::new(Mutex::new(Output::new_display(
            name,
            self.render_engine.clone(),
            self.hwc.clone(),
            args,
        )))
    }

    /// Composes and presents one frame on every valid output
    pub fn present(&self, args: &CompositionRefreshArgs) {
        trace!("Composition frame over {} outputs", args.outputs.len());

        let outputs: Vec<&SharedOutput> = args
            .outputs
            .iter()
            .filter(|output| {
                let output = output.lock();
                if !output.is_valid() {
                    warn!("Skipping invalid output {}", output.name());
                    return false;
                }
                true
            })
            .collect();

        let mut latched = LayerFeSet::new();
        for output in &outputs {
            output.lock().prepare(args, &mut latched);
        }

        self.update_layer_state_from_fe(&outputs, args);

        for output in &outputs {
            output.lock().present(args);
        }
    }

    /// Latches front-end state once for every layer visible anywhere
    fn update_layer_state_from_fe(&self, outputs: &[&SharedOutput], args: &CompositionRefreshArgs) {
        let subset = if args.updating_geometry_this_frame {
            StateSubset::GeometryAndContent
        } else {
            StateSubset::Content
        };

        let mut visible: HashMap<LayerId, Arc<Layer>> = HashMap::new();
        for output in outputs {
            for layer in output.lock().output_layers() {
                visible
                    .entry(layer.layer_id())
                    .or_insert_with(|| layer.layer().clone());
            }
        }

        for layer in visible.values() {
            layer.latch(subset);
        }
    }
}
