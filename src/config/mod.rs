//! Configuration management for Flinger
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files. It covers the vsync scheduler's timers, the display
//! timing list, per-connection phase offsets and composition debug options.

use crate::color::{ColorMode, OutputColorSetting};
use crate::scheduler::refresh_rate::InputConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Longest accepted debug flash; the compositor thread sleeps for it
const MAX_FLASH_DELAY_MS: u64 = 1000;

/// Main configuration struct containing all Flinger settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FlingerConfig {
    /// Vsync scheduler timers and policy switches
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Primary display size and timings
    #[serde(default)]
    pub display: DisplayConfig,

    /// Vsync phase offsets for the app and compositor connections
    #[serde(default)]
    pub phase_offsets: PhaseOffsetsConfig,

    /// Composition debug options and colour policy
    #[serde(default)]
    pub composition: CompositionConfig,
}

/// Scheduler timers; an interval of 0 disables that timer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Drop to the default refresh rate after this long without frames
    pub idle_timer_ms: u64,

    /// Stay at the performance rate this long after a touch
    pub touch_timer_ms: u64,

    /// Stay at the performance rate this long after a power mode change
    pub display_power_timer_ms: u64,

    /// The idle timer is backed by the kernel and drives hardware vsync
    pub support_kernel_idle_timer: bool,

    /// HDR content always runs at the default refresh rate
    pub force_hdr_content_to_default_refresh_rate: bool,

    /// No sync framework: present fences carry no timing
    pub ignore_present_fences: bool,
}

/// Primary display description
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,

    /// One vsync period per display config, in config id order
    pub vsync_periods_ns: Vec<i64>,

    /// Config the display starts in
    pub active_config: usize,

    /// The device can switch configs at runtime
    pub refresh_rate_switching: bool,

    /// The display may show secure content
    pub secure: bool,
}

/// Phase offsets applied to the software vsync model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PhaseOffsetsConfig {
    /// Offset of the vsync delivered to applications
    pub app_ns: i64,

    /// Offset of the vsync that wakes the compositor
    pub sf_ns: i64,

    /// A vsync closer than `period - offset_threshold_ns` to the previous one
    /// is held back
    pub offset_threshold_ns: i64,
}

/// Composition options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompositionConfig {
    /// Compose everything on the GPU
    pub force_client_composition: bool,

    /// Flash repainted areas for this long before each frame
    pub flash_dirty_regions_delay_ms: Option<u64>,

    /// Colour management policy
    pub color_setting: OutputColorSetting,

    /// Pin outputs to this colour mode
    pub force_color_mode: Option<ColorMode>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            idle_timer_ms: 0,
            touch_timer_ms: 0,
            display_power_timer_ms: 0,
            support_kernel_idle_timer: false,
            force_hdr_content_to_default_refresh_rate: false,
            ignore_present_fences: false,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            vsync_periods_ns: vec![16_666_666, 11_111_111],
            active_config: 0,
            refresh_rate_switching: true,
            secure: true,
        }
    }
}

impl Default for PhaseOffsetsConfig {
    fn default() -> Self {
        Self {
            app_ns: 1_000_000,
            sf_ns: 1_000_000,
            offset_threshold_ns: 0,
        }
    }
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self {
            force_client_composition: false,
            flash_dirty_regions_delay_ms: None,
            color_setting: OutputColorSetting::Managed,
            force_color_mode: None,
        }
    }
}

impl SchedulerConfig {
    pub fn idle_timer(&self) -> Option<Duration> {
        interval(self.idle_timer_ms)
    }

    pub fn touch_timer(&self) -> Option<Duration> {
        interval(self.touch_timer_ms)
    }

    pub fn display_power_timer(&self) -> Option<Duration> {
        interval(self.display_power_timer_ms)
    }
}

impl DisplayConfig {
    /// Display timings in the form the refresh-rate table takes them
    pub fn input_configs(&self) -> Vec<InputConfig> {
        self.vsync_periods_ns
            .iter()
            .enumerate()
            .map(|(id, &vsync_period)| InputConfig {
                hwc_id: id as u32,
                vsync_period,
            })
            .collect()
    }
}

impl CompositionConfig {
    pub fn flash_dirty_regions_delay(&self) -> Option<Duration> {
        self.flash_dirty_regions_delay_ms.map(Duration::from_millis)
    }
}

fn interval(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl FlingerConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = if path.to_string_lossy().starts_with('~') {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            Path::new(&home).join(path.strip_prefix("~").unwrap_or(path))
        } else {
            path.to_path_buf()
        };

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: FlingerConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.display.width == 0 || self.display.height == 0 {
            anyhow::bail!(
                "Invalid display size {}x{}: both dimensions must be non-zero",
                self.display.width,
                self.display.height
            );
        }

        if self.display.vsync_periods_ns.is_empty() {
            anyhow::bail!("Invalid display: at least one vsync period is required");
        }

        if let Some(period) = self.display.vsync_periods_ns.iter().find(|&&p| p <= 0) {
            anyhow::bail!("Invalid vsync period {}: must be positive", period);
        }

        if self.display.active_config >= self.display.vsync_periods_ns.len() {
            anyhow::bail!(
                "Invalid active_config {}: only {} display configs",
                self.display.active_config,
                self.display.vsync_periods_ns.len()
            );
        }

        if self.phase_offsets.offset_threshold_ns < 0 {
            anyhow::bail!("Invalid offset_threshold_ns: must not be negative");
        }

        if let Some(delay) = self.composition.flash_dirty_regions_delay_ms {
            if delay > MAX_FLASH_DELAY_MS {
                anyhow::bail!(
                    "Invalid flash_dirty_regions_delay_ms {}: must be at most {}",
                    delay,
                    MAX_FLASH_DELAY_MS
                );
            }
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests;
