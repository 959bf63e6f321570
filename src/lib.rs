//! # Flinger Composition Library
//!
//! Per-frame output composition and vsync scheduling for a display
//! compositor.
//!
//! ## Architecture
//!
//! Flinger is built on a modular architecture:
//! - `geometry`: Rectangles, transforms and the region algebra
//! - `output`: Output state machine, layer coverage and display specialization
//! - `compositor`: Composition engine sequencing outputs through a frame
//! - `color`: Color modes, dataspaces and display color profiles
//! - `hwc`, `render`, `surface`, `layer`: Boundaries to the device, the GPU
//!   renderer, the framebuffer surface and the front-end layers
//! - `headless`: In-process implementations of those boundaries
//! - `scheduler`: Software vsync model, event threads and refresh-rate policy
//! - `config`: Configuration parsing and management
//!
//! ## Usage
//!
//! ```rust,no_run
//! use flinger::compositor::{CompositionEngine, CompositionRefreshArgs};
//! use flinger::headless::{HeadlessHwc, HeadlessRenderEngine};
//! use std::sync::Arc;
//!
//! let engine = CompositionEngine::new(
//!     Arc::new(HeadlessHwc::new()),
//!     Arc::new(HeadlessRenderEngine::new()),
//! );
//! let output = engine.create_output("virtual");
//! engine.present(&CompositionRefreshArgs {
//!     outputs: vec![output],
//!     ..CompositionRefreshArgs::default()
//! });
//! ```

pub mod color;
pub mod compositor;
pub mod config;
pub mod error;
pub mod fence;
pub mod geometry;
pub mod headless;
pub mod hwc;
pub mod layer;
pub mod output;
pub mod render;
pub mod scheduler;
pub mod surface;

// Re-export main types for easy access
pub use compositor::{CompositionEngine, CompositionRefreshArgs};
pub use config::FlingerConfig;
pub use output::Output;
pub use scheduler::Scheduler;

// Re-export common error types
pub use anyhow::{Context, Error, Result};

/// Version information for Flinger
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
