//! Refresh-rate table
//!
//! Built once from the display's timing list. When the device supports
//! runtime switching, the slowest timing becomes [`RefreshRateType::Default`]
//! and the next one [`RefreshRateType::Performance`]; otherwise every lookup
//! collapses to the currently active timing.
//!
//! The active config index has a single writer (whoever applies mode changes)
//! and is read from the scheduler threads, so it lives in an atomic rather
//! than behind a lock.

use super::Nsecs;
use crate::error::ConfigsError;
use log::{debug, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Logical refresh-rate category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RefreshRateType {
    Default,
    Performance,
}

impl fmt::Display for RefreshRateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshRateType::Default => f.write_str("DEFAULT"),
            RefreshRateType::Performance => f.write_str("PERFORMANCE"),
        }
    }
}

/// One display timing as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputConfig {
    pub hwc_id: u32,
    pub vsync_period: Nsecs,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRate {
    /// Index into the display's config list
    pub config_id: usize,
    /// Human readable, e.g. "60fps"
    pub name: String,
    /// Whole frames per second, truncated
    pub fps: u32,
    pub vsync_period: Nsecs,
    /// Device-specific config id
    pub hwc_id: u32,
}

impl RefreshRate {
    fn from_input(config_id: usize, input: &InputConfig) -> Self {
        let fps = if input.vsync_period > 0 {
            1e9_f32 / input.vsync_period as f32
        } else {
            0.0
        };

        Self {
            config_id,
            name: format!("{:.0}fps", fps),
            fps: fps as u32,
            vsync_period: input.vsync_period,
            hwc_id: input.hwc_id,
        }
    }
}

#[derive(Debug)]
pub struct RefreshRateConfigs {
    switching_supported: bool,
    refresh_rates: Vec<RefreshRate>,
    refresh_rate_map: BTreeMap<RefreshRateType, RefreshRate>,
    current_config: AtomicUsize,
}

impl RefreshRateConfigs {
    /// Builds the table from the device's timings
    ///
    /// Fails if `configs` is empty or `current_config` does not index it.
    pub fn new(
        refresh_rate_switching: bool,
        configs: &[InputConfig],
        current_config: usize,
    ) -> Result<Self, ConfigsError> {
        if configs.is_empty() {
            return Err(ConfigsError::NoConfigs);
        }
        if current_config >= configs.len() {
            return Err(ConfigsError::InvalidConfigId {
                id: current_config,
                count: configs.len(),
            });
        }

        let refresh_rates: Vec<RefreshRate> = configs
            .iter()
            .enumerate()
            .map(|(id, input)| RefreshRate::from_input(id, input))
            .collect();

        let mut refresh_rate_map = BTreeMap::new();
        let mut switching_supported = refresh_rate_switching && refresh_rates.len() >= 2;
        if switching_supported {
            let mut by_period: Vec<&RefreshRate> = refresh_rates.iter().collect();
            by_period.sort_by(|a, b| b.vsync_period.cmp(&a.vsync_period));

            let slowest = by_period[0];
            let next = by_period[1];
            if slowest.vsync_period == 0 || next.vsync_period == 0 {
                warn!("Display timing with a zero vsync period, refresh rate switching disabled");
                switching_supported = false;
            } else {
                refresh_rate_map.insert(RefreshRateType::Default, slowest.clone());
                refresh_rate_map.insert(RefreshRateType::Performance, next.clone());
            }
        }

        debug!(
            "Refresh rate table: {} configs, switching {}",
            refresh_rates.len(),
            if switching_supported { "on" } else { "off" }
        );

        Ok(Self {
            switching_supported,
            refresh_rates,
            refresh_rate_map,
            current_config: AtomicUsize::new(current_config),
        })
    }

    pub fn refresh_rate_switching_supported(&self) -> bool {
        self.switching_supported
    }

    /// DEFAULT/PERFORMANCE entries; empty when switching is unsupported
    pub fn refresh_rate_map(&self) -> &BTreeMap<RefreshRateType, RefreshRate> {
        &self.refresh_rate_map
    }

    pub fn refresh_rates(&self) -> &[RefreshRate] {
        &self.refresh_rates
    }

    pub fn refresh_rate_from_type(&self, kind: RefreshRateType) -> &RefreshRate {
        if !self.switching_supported {
            return self.current_rate();
        }
        self.refresh_rate_map
            .get(&kind)
            .unwrap_or_else(|| self.current_rate())
    }

    /// Active rate and the logical type it maps to
    pub fn current_refresh_rate(&self) -> (RefreshRateType, &RefreshRate) {
        let current = self.current_config();
        if self.switching_supported {
            if let Some((kind, rate)) = self
                .refresh_rate_map
                .iter()
                .find(|(_, rate)| rate.config_id == current)
            {
                return (*kind, rate);
            }
        }
        (RefreshRateType::Default, self.current_rate())
    }

    pub fn refresh_rate_from_config_id(&self, config_id: usize) -> Option<&RefreshRate> {
        self.refresh_rates.get(config_id)
    }

    /// Maps a device config id to a logical type
    ///
    /// Ids that are in the table but not one of the two logical entries map to
    /// whichever entry has the closest vsync period; an exact tie goes to
    /// DEFAULT. Unknown ids map to DEFAULT.
    pub fn refresh_rate_type_from_hwc_config_id(&self, hwc_id: u32) -> RefreshRateType {
        if !self.switching_supported {
            return RefreshRateType::Default;
        }

        if let Some((kind, _)) = self
            .refresh_rate_map
            .iter()
            .find(|(_, rate)| rate.hwc_id == hwc_id)
        {
            return *kind;
        }

        let Some(period) = self
            .refresh_rates
            .iter()
            .find(|rate| rate.hwc_id == hwc_id)
            .map(|rate| rate.vsync_period)
        else {
            warn!("Unknown device config id {}, using DEFAULT", hwc_id);
            return RefreshRateType::Default;
        };

        // Map iteration is DEFAULT first, so min_by_key keeps DEFAULT on ties.
        self.refresh_rate_map
            .iter()
            .min_by_key(|(_, rate)| (rate.vsync_period - period).abs())
            .map_or(RefreshRateType::Default, |(kind, _)| *kind)
    }

    pub fn current_config(&self) -> usize {
        self.current_config.load(Ordering::Acquire)
    }

    /// Records the config the display is now running
    pub fn set_current_config(&self, config_id: usize) -> Result<(), ConfigsError> {
        if config_id >= self.refresh_rates.len() {
            return Err(ConfigsError::InvalidConfigId {
                id: config_id,
                count: self.refresh_rates.len(),
            });
        }
        self.current_config.store(config_id, Ordering::Release);
        Ok(())
    }

    fn current_rate(&self) -> &RefreshRate {
        // set_current_config never stores an out-of-range index
        let index = self.current_config().min(self.refresh_rates.len() - 1);
        &self.refresh_rates[index]
    }
}
