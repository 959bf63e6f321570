//! Refresh-rate decision policy
//!
//! Holds the inputs that decide between DEFAULT and PERFORMANCE (content
//! rate, HDR, touch, idle and display power) together with the last decision,
//! all under one lock. The change callback is invoked after that lock is
//! released, under its own registration lock.

use super::refresh_rate::{RefreshRateConfigs, RefreshRateType};
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;

/// Allowed deviation of `rate fps / content fps` from a whole number
const MARGIN: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentDetectionState {
    Off,
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Reset,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchState {
    Inactive,
    Active,
}

/// Whether a refresh-rate change also notifies config-changed listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigEvent {
    None,
    Changed,
}

pub type ChangeRefreshRateCallback = Box<dyn Fn(RefreshRateType, ConfigEvent) + Send + Sync>;

/// Inputs of the decision plus the cached result
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureState {
    pub content_detection: ContentDetectionState,
    pub idle_timer: TimerState,
    pub touch: TouchState,
    pub display_power_timer: TimerState,
    pub refresh_rate_type: RefreshRateType,
    /// Rounded content fps, 0 when nothing is animating
    pub content_refresh_rate: u32,
    pub is_hdr_content: bool,
    pub is_display_power_state_normal: bool,
}

impl Default for FeatureState {
    fn default() -> Self {
        Self {
            content_detection: ContentDetectionState::Off,
            idle_timer: TimerState::Reset,
            touch: TouchState::Inactive,
            display_power_timer: TimerState::Expired,
            refresh_rate_type: RefreshRateType::Default,
            content_refresh_rate: 0,
            is_hdr_content: false,
            is_display_power_state_normal: true,
        }
    }
}

/// Picks the refresh-rate type for `features`
///
/// Rules in priority order: HDR forced to default, display power not normal
/// or in its grace period, touch, idle, content detection off, and finally
/// the content rate itself.
pub fn calculate_refresh_rate_type(
    features: &FeatureState,
    configs: &RefreshRateConfigs,
    force_hdr_content_to_default: bool,
) -> RefreshRateType {
    if !configs.refresh_rate_switching_supported() {
        return RefreshRateType::Default;
    }

    if force_hdr_content_to_default && features.is_hdr_content {
        return RefreshRateType::Default;
    }

    if !features.is_display_power_state_normal
        || features.display_power_timer == TimerState::Reset
    {
        return RefreshRateType::Performance;
    }

    if features.touch == TouchState::Active {
        return RefreshRateType::Performance;
    }

    if features.idle_timer == TimerState::Expired {
        return RefreshRateType::Default;
    }

    if features.content_detection == ContentDetectionState::Off {
        return RefreshRateType::Performance;
    }

    content_refresh_rate_type(features.content_refresh_rate, configs)
}

fn content_refresh_rate_type(content_fps: u32, configs: &RefreshRateConfigs) -> RefreshRateType {
    let map = configs.refresh_rate_map();
    if content_fps == 0 {
        return RefreshRateType::Performance;
    }
    let content = content_fps as f32;

    let Some((&closest, closest_rate)) = map
        .iter()
        .min_by_key(|(_, rate)| (rate.fps as i64 - content_fps as i64).abs())
    else {
        return RefreshRateType::Default;
    };

    let off_multiple = |fps: u32| {
        let ratio = fps as f32 / content;
        (ratio.round() - ratio).abs() > MARGIN
    };

    if !off_multiple(closest_rate.fps) {
        return closest;
    }

    // The closest rate is not a whole multiple of the content; take the next
    // rate up that is.
    map.range(closest..)
        .find(|(_, rate)| !off_multiple(rate.fps))
        .map_or(closest, |(kind, _)| *kind)
}

pub struct RefreshRatePolicy {
    configs: Arc<RefreshRateConfigs>,
    force_hdr_content_to_default: bool,
    features: Mutex<FeatureState>,
    callback: Mutex<Option<ChangeRefreshRateCallback>>,
}

impl RefreshRatePolicy {
    pub fn new(configs: Arc<RefreshRateConfigs>, force_hdr_content_to_default: bool) -> Self {
        Self {
            configs,
            force_hdr_content_to_default,
            features: Mutex::new(FeatureState::default()),
            callback: Mutex::new(None),
        }
    }

    pub fn configs(&self) -> &Arc<RefreshRateConfigs> {
        &self.configs
    }

    pub fn features(&self) -> FeatureState {
        *self.features.lock()
    }

    pub fn set_callback(&self, callback: ChangeRefreshRateCallback) {
        *self.callback.lock() = Some(callback);
    }

    pub fn preferred_refresh_rate_type(&self) -> RefreshRateType {
        self.features.lock().refresh_rate_type
    }

    /// Applies a new content rate (already rounded) and HDR flag
    pub fn update_content(&self, content_fps: u32, is_hdr: bool) {
        let new_type = {
            let mut features = self.features.lock();
            if features.content_refresh_rate == content_fps && features.is_hdr_content == is_hdr {
                return;
            }
            features.content_refresh_rate = content_fps;
            features.is_hdr_content = is_hdr;
            features.content_detection = if content_fps > 0 {
                ContentDetectionState::On
            } else {
                ContentDetectionState::Off
            };

            match self.update_cached_type(&mut features) {
                Some(new_type) => new_type,
                None => return,
            }
        };

        self.change_refresh_rate(new_type, ConfigEvent::Changed);
    }

    pub fn on_idle_timer(&self, state: TimerState) {
        self.handle_state_change(|f| replace(&mut f.idle_timer, state), false);
    }

    pub fn on_touch(&self, state: TouchState) {
        self.handle_state_change(|f| replace(&mut f.touch, state), true);
    }

    pub fn on_display_power_timer(&self, state: TimerState) {
        self.handle_state_change(|f| replace(&mut f.display_power_timer, state), true);
    }

    /// Records the display power mode; takes effect at the next decision
    pub fn set_display_power_state_normal(&self, normal: bool) {
        self.features.lock().is_display_power_state_normal = normal;
    }

    /// `apply` returns whether it changed anything
    fn handle_state_change(
        &self,
        apply: impl FnOnce(&mut FeatureState) -> bool,
        event_on_content_detection: bool,
    ) {
        let (new_type, event) = {
            let mut features = self.features.lock();
            if !apply(&mut features) {
                return;
            }
            let Some(new_type) = self.update_cached_type(&mut features) else {
                return;
            };
            let event = if event_on_content_detection
                && features.content_detection == ContentDetectionState::On
            {
                ConfigEvent::Changed
            } else {
                ConfigEvent::None
            };
            (new_type, event)
        };

        self.change_refresh_rate(new_type, event);
    }

    /// Recomputes the decision; `Some` only if it differs from the cache
    fn update_cached_type(&self, features: &mut FeatureState) -> Option<RefreshRateType> {
        let new_type =
            calculate_refresh_rate_type(features, &self.configs, self.force_hdr_content_to_default);
        if new_type == features.refresh_rate_type {
            return None;
        }
        debug!(
            "Refresh rate decision {} -> {} for {:?}",
            features.refresh_rate_type, new_type, features
        );
        features.refresh_rate_type = new_type;
        Some(new_type)
    }

    fn change_refresh_rate(&self, new_type: RefreshRateType, event: ConfigEvent) {
        info!("Refresh rate type changed to {} ({:?})", new_type, event);
        if let Some(callback) = self.callback.lock().as_ref() {
            callback(new_type, event);
        }
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}
