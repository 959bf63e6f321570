//! # Flinger - headless composition demo
//!
//! Runs the composition pipeline and the vsync scheduler against the headless
//! device, renderer and surface backends:
//! - a primary display output composes a handful of moving solid layers
//! - the scheduler trains its vsync model from the display's vsync and
//!   present fences
//! - content detection picks the refresh rate from the layers' frame rate

use anyhow::{Context, Result};
use clap::Parser;
use flinger::color::{ColorMode, DisplayColorProfile, DisplayColorProfileCreationArgs, RenderIntent};
use flinger::compositor::{CompositionEngine, CompositionRefreshArgs, SharedOutput};
use flinger::config::FlingerConfig;
use flinger::geometry::{Orientation, Rect, Size, Transform};
use flinger::headless::{HeadlessHwc, HeadlessRenderEngine, HeadlessSurface, SolidLayerFe};
use flinger::hwc::DisplayId;
use flinger::layer::{Layer, LayerFe};
use flinger::scheduler::event_thread::{ConfigChanged, DisplayEvent};
use flinger::scheduler::refresh_rate::RefreshRateConfigs;
use flinger::scheduler::{Clock, DisplayVsyncControl, ManualClock, Scheduler, WindowType};
use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const PRIMARY_DISPLAY: DisplayId = DisplayId(0);

#[derive(Parser)]
#[command(name = "flinger")]
#[command(about = "Headless output composition and vsync scheduling demo")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/flinger/flinger.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Number of frames to compose
    #[arg(short, long, default_value_t = 120)]
    frames: u32,

    /// Number of solid layers on the display
    #[arg(short, long, default_value_t = 3)]
    layers: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    info!("Starting Flinger {}", flinger::VERSION);

    // Load configuration
    let config = match FlingerConfig::load(&cli.config) {
        Ok(config) => {
            info!("Configuration loaded from: {}", cli.config);
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            info!("Using default configuration");
            FlingerConfig::default()
        }
    };

    run(&config, cli.frames, cli.layers).await
}

async fn run(config: &FlingerConfig, frames: u32, layer_count: u32) -> Result<()> {
    let hwc = Arc::new(HeadlessHwc::new());
    let engine = CompositionEngine::new(hwc.clone(), Arc::new(HeadlessRenderEngine::new()));

    let size = Size::new(config.display.width as i32, config.display.height as i32);
    let display = engine.create_display(
        "primary",
        flinger::output::DisplayCreationArgs {
            id: Some(PRIMARY_DISPLAY),
            is_secure: config.display.secure,
            ..Default::default()
        },
    );
    configure_display(&display, size);

    let configs = Arc::new(
        RefreshRateConfigs::new(
            config.display.refresh_rate_switching,
            &config.display.input_configs(),
            config.display.active_config,
        )
        .context("Invalid display configuration")?,
    );
    let clock = Arc::new(ManualClock::new(0));
    let scheduler = Scheduler::with_clock(
        &config.scheduler,
        configs.clone(),
        Arc::new(DisplayVsyncControl::new(hwc.clone(), PRIMARY_DISPLAY)),
        clock.clone(),
    );

    let switch_configs = configs.clone();
    scheduler.set_change_refresh_rate_callback(Box::new(move |kind, event| {
        let rate = switch_configs.refresh_rate_from_type(kind);
        info!("Switching to {} ({}, {:?})", rate.name, kind, event);
        if let Err(e) = switch_configs.set_current_config(rate.config_id) {
            error!("Failed to switch display config: {}", e);
        }
    }));

    let offsets = &config.phase_offsets;
    let app = scheduler.create_connection("app", offsets.app_ns, offsets.offset_threshold_ns, None);
    let sf = scheduler.create_connection("sf", offsets.sf_ns, offsets.offset_threshold_ns, None);
    scheduler.on_hotplug_received(app, PRIMARY_DISPLAY, true);
    let client = scheduler
        .create_display_event_connection(app, ConfigChanged::Dispatch)
        .context("App connection vanished")?;
    client.set_vsync_rate(1);

    let (fes, layers) = make_layers(layer_count, size);
    let history_handles: Vec<_> = fes
        .iter()
        .enumerate()
        .map(|(i, _)| scheduler.register_layer(&format!("solid-{}", i), WindowType::Application))
        .collect();

    let mut period = configs.current_refresh_rate().1.vsync_period;
    scheduler.resync_to_hardware_vsync(true, period);

    let mut ticker = tokio::time::interval(Duration::from_nanos(period as u64));
    let mut vsync_events = 0u32;
    let mut last_config = configs.current_config();

    for frame in 0..frames {
        ticker.tick().await;
        clock.advance(period);

        // Hardware vsync only arrives while it is switched on
        if hwc.vsync_enabled(PRIMARY_DISPLAY) && scheduler.add_resync_sample(clock.now()) {
            debug!("Vsync period change took effect at frame {}", frame);
        }

        animate(&fes, frame, size);
        let args = CompositionRefreshArgs {
            outputs: vec![display.clone()],
            layers: layers.clone(),
            updating_output_geometry_this_frame: frame == 0,
            updating_geometry_this_frame: true,
            output_color_setting: config.composition.color_setting,
            force_output_color_mode: config.composition.force_color_mode,
            dev_opt_force_client_composition: config.composition.force_client_composition,
            dev_opt_flash_dirty_regions_delay: config.composition.flash_dirty_regions_delay(),
            ..CompositionRefreshArgs::default()
        };
        engine.present(&args);

        let present_fence = display.lock().last_present_fence().clone();
        scheduler.add_present_fence(&present_fence);

        for handle in &history_handles {
            scheduler.add_layer_present_time_and_hdr(handle, clock.now(), false);
        }
        scheduler.update_fps_based_on_content();

        let current = configs.current_config();
        if current != last_config {
            last_config = current;
            if let Some(rate) = configs.refresh_rate_from_config_id(current) {
                period = rate.vsync_period;
                scheduler.on_config_changed(app, PRIMARY_DISPLAY, current);
                scheduler.resync_to_hardware_vsync(true, period);
                ticker = tokio::time::interval(Duration::from_nanos(period as u64));
            }
        }

        while let Some(event) = client.try_recv() {
            match event {
                DisplayEvent::Vsync { .. } => vsync_events += 1,
                other => info!("App connection received {:?}", other),
            }
        }
    }

    info!(
        "Composed {} frames, {} presents, {} vsync events, {} hardware vsync toggles",
        frames,
        hwc.present_count(PRIMARY_DISPLAY),
        vsync_events,
        hwc.vsync_toggles(PRIMARY_DISPLAY)
    );
    info!("Refresh rate: {}", configs.current_refresh_rate().1.name);

    println!("{}", display.lock().dump());
    println!("{}", scheduler.disp_sync().dump());
    print!("{}", scheduler.dump_connection(app));
    print!("{}", scheduler.dump_connection(sf));
    print!("{}", scheduler.dump());

    Ok(())
}

fn configure_display(display: &SharedOutput, size: Size) {
    let mut modes = HashMap::new();
    modes.insert(ColorMode::Native, vec![RenderIntent::Colorimetric]);
    modes.insert(
        ColorMode::Srgb,
        vec![RenderIntent::Colorimetric, RenderIntent::Enhance],
    );

    let bounds = Rect::from_size(size);
    let mut output = display.lock();
    output.set_display_color_profile(DisplayColorProfile::new(DisplayColorProfileCreationArgs {
        hwc_color_modes: modes,
        ..DisplayColorProfileCreationArgs::default()
    }));
    output.set_render_surface(Box::new(HeadlessSurface::new(size)));
    output.set_projection(Transform::identity(), Orientation::ROT_0, bounds, bounds, bounds, false);
    output.set_layer_stack_filter(0, true);
    output.set_composition_enabled(true);
}

fn make_layers(count: u32, size: Size) -> (Vec<Arc<SolidLayerFe>>, Vec<Arc<Layer>>) {
    let side = (size.width.min(size.height) / 4).max(1);
    let fes: Vec<Arc<SolidLayerFe>> = (0..count as i32)
        .map(|i| {
            let fe = SolidLayerFe::new(
                format!("solid-{}", i),
                Rect::new(i * side / 2, i * side / 2, i * side / 2 + side, i * side / 2 + side),
            );
            // Every other layer is translucent so coverage has something to do
            fe.set_opaque(i % 2 == 0);
            fe
        })
        .collect();
    let layers = fes
        .iter()
        .map(|fe| {
            let fe: Arc<dyn LayerFe> = fe.clone();
            Layer::new(&fe)
        })
        .collect();
    (fes, layers)
}

/// Slides every layer a few pixels to the right, wrapping at the edge
fn animate(fes: &[Arc<SolidLayerFe>], frame: u32, size: Size) {
    let side = (size.width.min(size.height) / 4).max(1);
    for (i, fe) in fes.iter().enumerate() {
        let i = i as i32;
        let left = (frame as i32 * 4 * (i + 1)) % size.width.max(1);
        let top = i * side / 2;
        fe.set_bounds(Rect::new(left, top, left + side, top + side));
    }
}
