//! Per-layer frame rate history
//!
//! Layers report when each of their buffers is meant to be presented. The
//! history turns that into an fps estimate per layer; the scheduler uses the
//! highest estimate over visible, recently active layers as the content rate.

use super::{Clock, Nsecs};
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

/// A layer that has not presented for this long no longer counts
pub const OBSOLETE_TIME_EPSILON_NS: Nsecs = 200_000_000;
/// Window in which a layer must present at least LOW_ACTIVITY_BUFFERS frames
/// to be considered animating
pub const LOW_ACTIVITY_EPSILON_NS: Nsecs = 250_000_000;
const LOW_ACTIVITY_BUFFERS: usize = 2;
const PRESENT_HISTORY_SIZE: usize = 90;
const INTERVAL_HISTORY_SIZE: usize = 30;

#[derive(Debug)]
struct LayerInfo {
    name: String,
    min_fps: f32,
    /// Shortest interval that counts; anything faster is clamped to max fps
    min_interval: Nsecs,
    visible: bool,
    is_hdr: bool,
    last_present_time: Nsecs,
    last_updated_time: Nsecs,
    /// Most recent first
    present_times: VecDeque<Nsecs>,
    intervals: VecDeque<Nsecs>,
}

impl LayerInfo {
    fn new(name: String, min_fps: f32, max_fps: f32) -> Self {
        let min_interval = if max_fps > 0.0 {
            (1e9 / max_fps as f64) as Nsecs
        } else {
            0
        };
        Self {
            name,
            min_fps,
            min_interval,
            visible: true,
            is_hdr: false,
            last_present_time: 0,
            last_updated_time: 0,
            present_times: VecDeque::new(),
            intervals: VecDeque::new(),
        }
    }

    fn set_last_present_time(&mut self, present_time: Nsecs, now: Nsecs) {
        // Buffers queued for the future stay relevant until then.
        self.last_updated_time = present_time.max(now);
        if self.present_times.len() == PRESENT_HISTORY_SIZE {
            self.present_times.pop_back();
        }
        self.present_times.push_front(self.last_updated_time);

        if self.last_present_time == 0 {
            self.last_present_time = present_time;
            return;
        }

        let interval = present_time - self.last_present_time;
        self.last_present_time = present_time;
        if interval <= 0 || interval > OBSOLETE_TIME_EPSILON_NS {
            return;
        }

        if self.intervals.len() == INTERVAL_HISTORY_SIZE {
            self.intervals.pop_front();
        }
        self.intervals.push_back(interval.max(self.min_interval));
    }

    fn is_recently_active(&self, now: Nsecs) -> bool {
        self.last_updated_time > 0 && self.last_updated_time >= now - OBSOLETE_TIME_EPSILON_NS
    }

    fn is_low_activity(&self, now: Nsecs) -> bool {
        let cutoff = now - LOW_ACTIVITY_EPSILON_NS;
        self.present_times.len() < LOW_ACTIVITY_BUFFERS
            || self
                .present_times
                .iter()
                .take(LOW_ACTIVITY_BUFFERS)
                .any(|&time| time < cutoff)
    }

    fn desired_refresh_rate(&self, now: Nsecs) -> f32 {
        if self.is_low_activity(now) || self.intervals.is_empty() {
            return self.min_fps;
        }
        let mean = self.intervals.iter().sum::<Nsecs>() / self.intervals.len() as Nsecs;
        if mean <= 0 {
            return self.min_fps;
        }
        (1e9 / mean as f64) as f32
    }

    fn clear(&mut self) {
        self.last_present_time = 0;
        self.last_updated_time = 0;
        self.present_times.clear();
        self.intervals.clear();
    }
}

#[derive(Debug, Default)]
struct HistoryState {
    next_id: u64,
    layers: HashMap<u64, LayerInfo>,
}

/// Registration of one layer; deregisters on drop
#[derive(Debug)]
pub struct LayerHandle {
    id: u64,
    history: Weak<Mutex<HistoryState>>,
}

impl LayerHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for LayerHandle {
    fn drop(&mut self) {
        if let Some(history) = self.history.upgrade() {
            if let Some(info) = history.lock().layers.remove(&self.id) {
                trace!("Layer {} left the history", info.name);
            }
        }
    }
}

pub struct LayerHistory {
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<HistoryState>>,
}

impl LayerHistory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(HistoryState::default())),
        }
    }

    pub fn register_layer(&self, name: &str, min_fps: f32, max_fps: f32) -> LayerHandle {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state
            .layers
            .insert(id, LayerInfo::new(name.to_string(), min_fps, max_fps));
        debug!("Layer {} registered ({}..{} fps)", name, min_fps, max_fps);

        LayerHandle {
            id,
            history: Arc::downgrade(&self.state),
        }
    }

    /// Records one buffer's intended present time
    pub fn insert(&self, handle: &LayerHandle, present_time: Nsecs, is_hdr: bool) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        if let Some(info) = state.layers.get_mut(&handle.id) {
            info.set_last_present_time(present_time, now);
            info.is_hdr = is_hdr;
        }
    }

    pub fn set_visibility(&self, handle: &LayerHandle, visible: bool) {
        if let Some(info) = self.state.lock().layers.get_mut(&handle.id) {
            info.visible = visible;
        }
    }

    /// Forgets every layer's past frames; registrations are kept
    pub fn clear(&self) {
        let mut state = self.state.lock();
        for info in state.layers.values_mut() {
            info.clear();
        }
        trace!("Layer history cleared");
    }

    pub fn layer_count(&self) -> usize {
        self.state.lock().layers.len()
    }

    /// Highest fps estimate over visible active layers, and whether any of
    /// them is HDR
    pub fn desired_refresh_rate_and_hdr(&self) -> (f32, bool) {
        let now = self.clock.now();
        let state = self.state.lock();

        state
            .layers
            .values()
            .filter(|info| info.visible && info.is_recently_active(now))
            .fold((0.0_f32, false), |(fps, hdr), info| {
                (fps.max(info.desired_refresh_rate(now)), hdr || info.is_hdr)
            })
    }
}
