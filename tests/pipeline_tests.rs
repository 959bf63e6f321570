//! Integration tests for the composition pipeline
//!
//! These tests drive whole frames through the composition engine over the
//! headless device, renderer and surface, across several outputs at once.

use flinger::color::{DisplayColorProfile, DisplayColorProfileCreationArgs};
use flinger::compositor::{CompositionEngine, CompositionRefreshArgs, SharedOutput};
use flinger::geometry::{Orientation, Rect, Region, Size, Transform};
use flinger::headless::{HeadlessHwc, HeadlessRenderEngine, HeadlessSurface, SolidLayerFe};
use flinger::hwc::DisplayId;
use flinger::layer::{Layer, LayerFe, StateSubset};
use flinger::output::DisplayCreationArgs;
use std::sync::Arc;

const SIZE: Size = Size::new(100, 100);
const PRIMARY: DisplayId = DisplayId(0);

struct Harness {
    hwc: Arc<HeadlessHwc>,
    render: Arc<HeadlessRenderEngine>,
    engine: CompositionEngine,
}

fn harness() -> Harness {
    let hwc = Arc::new(HeadlessHwc::new());
    let render = Arc::new(HeadlessRenderEngine::new());
    let engine = CompositionEngine::new(hwc.clone(), render.clone());
    Harness { hwc, render, engine }
}

fn make_ready(output: &SharedOutput, layer_stack: u32) {
    let bounds = Rect::from_size(SIZE);
    let mut output = output.lock();
    output.set_display_color_profile(DisplayColorProfile::new(
        DisplayColorProfileCreationArgs::default(),
    ));
    output.set_render_surface(Box::new(HeadlessSurface::new(SIZE)));
    output.set_projection(Transform::identity(), Orientation::ROT_0, bounds, bounds, bounds, false);
    output.set_layer_stack_filter(layer_stack, true);
    output.set_composition_enabled(true);
}

fn primary_display(h: &Harness) -> SharedOutput {
    let display = h.engine.create_display(
        "primary",
        DisplayCreationArgs {
            id: Some(PRIMARY),
            ..DisplayCreationArgs::default()
        },
    );
    make_ready(&display, 0);
    display
}

fn layer_for(fe: &Arc<SolidLayerFe>) -> Arc<Layer> {
    let fe: Arc<dyn LayerFe> = fe.clone();
    Layer::new(&fe)
}

fn frame(outputs: &[&SharedOutput], layers: &[Arc<Layer>]) -> CompositionRefreshArgs {
    CompositionRefreshArgs {
        outputs: outputs.iter().map(|o| (*o).clone()).collect(),
        layers: layers.to_vec(),
        updating_output_geometry_this_frame: true,
        updating_geometry_this_frame: true,
        ..CompositionRefreshArgs::default()
    }
}

fn names(output: &SharedOutput) -> Vec<String> {
    output
        .lock()
        .output_layers()
        .iter()
        .map(|layer| layer.layer_fe().debug_name())
        .collect()
}

#[test]
fn test_frame_over_display_and_virtual_output() {
    let h = harness();
    let display = primary_display(&h);
    let mirror = h.engine.create_output("mirror");
    make_ready(&mirror, 0);

    let fe = SolidLayerFe::new("app", Rect::new(0, 0, 60, 60));
    h.engine.present(&frame(&[&display, &mirror], &[layer_for(&fe)]));

    assert_eq!(names(&display), vec!["app"]);
    assert_eq!(names(&mirror), vec!["app"]);

    // Shared front-end state is latched once per frame
    assert_eq!(fe.latch_count(StateSubset::BasicGeometry), 1);
    assert_eq!(fe.latch_count(StateSubset::GeometryAndContent), 1);

    // The device composes the display; only the mirror needs the GPU
    assert_eq!(h.hwc.present_count(PRIMARY), 1);
    assert_eq!(h.hwc.layer_count(PRIMARY), 1);
    assert_eq!(h.render.draw_count(), 1);
}

#[test]
fn test_layer_stacks_route_layers_to_outputs() {
    let h = harness();
    let display = primary_display(&h);
    let external = h.engine.create_output("external");
    make_ready(&external, 1);

    let home = SolidLayerFe::new("home", Rect::new(0, 0, 40, 40));
    let presentation = SolidLayerFe::new("presentation", Rect::new(0, 0, 40, 40));
    presentation.update(|state| state.layer_stack_id = Some(1));

    h.engine.present(&frame(
        &[&display, &external],
        &[layer_for(&home), layer_for(&presentation)],
    ));

    assert_eq!(names(&display), vec!["home"]);
    assert_eq!(names(&external), vec!["presentation"]);
}

#[test]
fn test_opaque_layer_hides_everything_below() {
    let h = harness();
    let display = primary_display(&h);

    let wallpaper = SolidLayerFe::new("wallpaper", Rect::from_size(SIZE));
    let dialog = SolidLayerFe::new("dialog", Rect::new(20, 20, 80, 80));
    let fullscreen = SolidLayerFe::new("fullscreen", Rect::from_size(SIZE));

    h.engine.present(&frame(
        &[&display],
        &[layer_for(&wallpaper), layer_for(&dialog), layer_for(&fullscreen)],
    ));
    assert_eq!(names(&display), vec!["fullscreen"]);

    // Once the top layer turns translucent the others show through
    fullscreen.set_opaque(false);
    h.engine.present(&frame(
        &[&display],
        &[layer_for(&wallpaper), layer_for(&dialog), layer_for(&fullscreen)],
    ));
    assert_eq!(names(&display), vec!["wallpaper", "dialog", "fullscreen"]);

    let output = display.lock();
    let dialog_state = output.output_layers()[1].state();
    assert_eq!(
        dialog_state.covered_region,
        Region::from_rect(Rect::new(20, 20, 80, 80))
    );
}

#[test]
fn test_disconnected_display_composes_on_gpu() {
    let h = harness();
    let display = primary_display(&h);
    let fe = SolidLayerFe::new("app", Rect::from_size(SIZE));
    let layers = [layer_for(&fe)];

    h.engine.present(&frame(&[&display], &layers));
    assert_eq!(h.hwc.present_count(PRIMARY), 1);
    assert_eq!(h.render.draw_count(), 0);

    display.lock().disconnect();
    assert!(h.hwc.is_disconnected(PRIMARY));
    assert!(display.lock().display_id().is_none());

    fe.set_bounds(Rect::new(0, 0, 80, 80));
    h.engine.present(&frame(&[&display], &layers));

    let output = display.lock();
    assert!(output.state().uses_client_composition);
    assert!(!output.state().uses_device_composition);
    assert_eq!(h.hwc.present_count(PRIMARY), 1);
    assert_eq!(h.render.draw_count(), 1);
}

#[test]
fn test_release_fences_follow_presents() {
    let h = harness();
    let display = primary_display(&h);
    let fe = SolidLayerFe::new("app", Rect::new(0, 0, 50, 50));
    let layers = [layer_for(&fe)];

    for i in 0..3 {
        fe.set_bounds(Rect::new(i, 0, 50 + i, 50));
        h.engine.present(&frame(&[&display], &layers));
    }

    assert_eq!(h.hwc.present_count(PRIMARY), 3);
    assert_eq!(fe.release_fences().len(), 3);
    assert!(display.lock().last_present_fence().has_signalled());
}
