//! Software vsync model
//!
//! Hardware vsync timestamps are fed in while the model is being trained;
//! once it has a stable period and phase, hardware vsync can be switched off
//! and event threads extrapolate from the model. Present fences are used to
//! check the model is still in step with the panel.

use super::Nsecs;
use crate::fence::Fence;
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};

const MAX_RESYNC_SAMPLES: usize = 32;
const MIN_RESYNC_SAMPLES_FOR_UPDATE: usize = 6;
/// Leading samples left out of the period estimate; the first vsync interval
/// after enabling is unreliable on some panels
const NUM_SAMPLES_SKIPPED: usize = 2;
const MAX_RESYNC_SAMPLES_WITHOUT_PRESENT: usize = 4;
const NUM_PRESENT_SAMPLES: usize = 8;

/// Mean squared present-fence error (ns²) above which a resync is requested
pub const ERROR_THRESHOLD: Nsecs = 400_000 * 400_000;

#[derive(Debug, Default)]
struct ModelState {
    period: Nsecs,
    phase: Nsecs,
    reference_time: Nsecs,
    /// Requested period not yet observed on the hardware
    pending_period: Nsecs,
    resync_samples: VecDeque<Nsecs>,
    resync_samples_since_present: usize,
    model_updated: bool,
    present_fences: VecDeque<Fence>,
    error: Nsecs,
}

#[derive(Debug)]
pub struct DispSync {
    name: String,
    state: Mutex<ModelState>,
    ignore_present_fences: AtomicBool,
}

impl DispSync {
    pub fn new(name: impl Into<String>, period: Nsecs, ignore_present_fences: bool) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ModelState {
                period,
                ..ModelState::default()
            }),
            ignore_present_fences: AtomicBool::new(ignore_present_fences),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts a new training run; previous samples are discarded
    pub fn begin_resync(&self) {
        let mut state = self.state.lock();
        state.model_updated = false;
        state.resync_samples.clear();
    }

    pub fn end_resync(&self) {
        trace!("{}: end resync", self.name);
    }

    /// Adds a hardware vsync timestamp
    ///
    /// Returns whether more hardware samples are needed and whether a pending
    /// period change took effect with this sample.
    pub fn add_resync_sample(&self, timestamp: Nsecs) -> (bool, bool) {
        let mut state = self.state.lock();
        let mut period_flushed = false;

        if state.pending_period > 0 {
            if let Some(&last) = state.resync_samples.back() {
                let observed = (timestamp - last).abs();
                if (observed - state.pending_period).abs() < (observed - state.period).abs() {
                    debug!(
                        "{}: period {} -> {} flushed",
                        self.name, state.period, state.pending_period
                    );
                    state.period = state.pending_period;
                    state.pending_period = 0;
                    state.resync_samples.clear();
                    state.model_updated = false;
                    state.error = 0;
                    period_flushed = true;
                }
            }
        }

        if state.resync_samples.is_empty() {
            state.phase = 0;
            state.reference_time = timestamp;
        }
        if state.resync_samples.len() == MAX_RESYNC_SAMPLES {
            state.resync_samples.pop_front();
        }
        state.resync_samples.push_back(timestamp);

        update_model(&mut state);

        state.resync_samples_since_present += 1;
        if state.resync_samples_since_present > MAX_RESYNC_SAMPLES_WITHOUT_PRESENT {
            state.error = 0;
            state.present_fences.clear();
        }

        if self.ignore_present_fences.load(Ordering::Relaxed) {
            // Without fences there is nothing to tell us we drifted.
            return (true, period_flushed);
        }

        let model_locked = state.model_updated
            && state.error < ERROR_THRESHOLD / 2
            && state.pending_period == 0;
        (!model_locked, period_flushed)
    }

    /// Adds a present fence; returns whether hardware vsync is needed
    pub fn add_present_fence(&self, fence: &Fence) -> bool {
        let mut state = self.state.lock();

        if state.present_fences.len() == NUM_PRESENT_SAMPLES {
            state.present_fences.pop_front();
        }
        state.present_fences.push_back(fence.clone());
        state.resync_samples_since_present = 0;

        update_error(&mut state);

        !state.model_updated || state.error > ERROR_THRESHOLD
    }

    /// Schedules a period change; it takes effect once the hardware shows it
    pub fn set_period(&self, period: Nsecs) {
        let mut state = self.state.lock();
        state.pending_period = if period == state.period { 0 } else { period };
    }

    pub fn period(&self) -> Nsecs {
        self.state.lock().period
    }

    pub fn set_ignore_present_fences(&self, ignore: bool) {
        self.ignore_present_fences.store(ignore, Ordering::Relaxed);
    }

    /// Model vsync `periods_ahead` periods after the next one following `now`
    pub fn compute_next_refresh(&self, periods_ahead: i64, now: Nsecs) -> Nsecs {
        let state = self.state.lock();
        if state.period == 0 {
            return 0;
        }
        let phase = state.reference_time + state.phase;
        ((now - phase).div_euclid(state.period) + periods_ahead + 1) * state.period + phase
    }

    /// When a frame submitted now is expected on screen
    pub fn expected_present_time(&self, now: Nsecs) -> Nsecs {
        self.compute_next_refresh(1, now)
    }

    /// First model vsync, shifted by `phase_offset`, strictly after `time`
    pub fn next_vsync_after(&self, time: Nsecs, phase_offset: Nsecs) -> Option<Nsecs> {
        let state = self.state.lock();
        if state.period <= 0 {
            return None;
        }
        let phase = state.reference_time + state.phase + phase_offset;
        Some(((time - phase).div_euclid(state.period) + 1) * state.period + phase)
    }

    /// Whether the model has been trained since the last resync
    pub fn is_model_updated(&self) -> bool {
        self.state.lock().model_updated
    }

    pub fn dump(&self) -> String {
        let state = self.state.lock();
        format!(
            "DispSync {}: period {} ns (pending {}), phase {} ns, reference {} ns, \
             {} resync samples, {} present fences, error {} ns^2, ignore present fences {}\n",
            self.name,
            state.period,
            state.pending_period,
            state.phase,
            state.reference_time,
            state.resync_samples.len(),
            state.present_fences.len(),
            state.error,
            self.ignore_present_fences.load(Ordering::Relaxed),
        )
    }
}

fn update_model(state: &mut ModelState) {
    let count = state.resync_samples.len();
    if count < MIN_RESYNC_SAMPLES_FOR_UPDATE {
        return;
    }

    let mut duration_sum: Nsecs = 0;
    let mut min_duration = Nsecs::MAX;
    let mut max_duration = 0;
    for i in NUM_SAMPLES_SKIPPED..count {
        let duration = state.resync_samples[i] - state.resync_samples[i - 1];
        duration_sum += duration;
        min_duration = min_duration.min(duration);
        max_duration = max_duration.max(duration);
    }

    // Outliers on both ends are dropped from the mean
    duration_sum -= min_duration + max_duration;
    let period = duration_sum / (count - NUM_SAMPLES_SKIPPED - 2) as Nsecs;
    if period <= 0 {
        return;
    }

    let scale = 2.0 * PI / period as f64;
    let (mut avg_x, mut avg_y) = (0.0_f64, 0.0_f64);
    for &sample in state.resync_samples.iter().skip(NUM_SAMPLES_SKIPPED) {
        let phase = (sample - state.reference_time).rem_euclid(period) as f64 * scale;
        avg_x += phase.cos();
        avg_y += phase.sin();
    }
    let samples = (count - NUM_SAMPLES_SKIPPED) as f64;
    avg_x /= samples;
    avg_y /= samples;

    let mut phase = (avg_y.atan2(avg_x) / scale) as Nsecs;
    if phase < -(period / 2) {
        phase += period;
    }

    state.period = period;
    state.phase = phase;
    state.model_updated = true;
    trace!("Vsync model: period {} ns, phase {} ns", period, phase);
}

fn update_error(state: &mut ModelState) {
    if !state.model_updated || state.period <= 0 {
        return;
    }

    let mut sq_err_sum: Nsecs = 0;
    let mut samples: Nsecs = 0;
    for fence in &state.present_fences {
        if !fence.has_signalled() {
            continue;
        }
        let sample = fence.signal_time() - state.reference_time;
        if sample <= state.phase {
            continue;
        }

        let mut err = (sample - state.phase) % state.period;
        if err > state.period / 2 {
            err -= state.period;
        }
        sq_err_sum += err * err;
        samples += 1;
    }

    state.error = if samples > 0 { sq_err_sum / samples } else { 0 };
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Nsecs = 16_666_667;

    fn train(sync: &DispSync, start: Nsecs, period: Nsecs, count: usize) -> (bool, bool) {
        let mut result = (true, false);
        for i in 0..count {
            result = sync.add_resync_sample(start + i as Nsecs * period);
        }
        result
    }

    #[test]
    fn test_needs_samples_until_model_updates() {
        let sync = DispSync::new("test", PERIOD, false);
        sync.begin_resync();

        for i in 0..MIN_RESYNC_SAMPLES_FOR_UPDATE - 1 {
            let (needs_more, _) = sync.add_resync_sample(1_000 + i as Nsecs * PERIOD);
            assert!(needs_more);
        }
        assert!(!sync.is_model_updated());

        let (needs_more, flushed) =
            sync.add_resync_sample(1_000 + (MIN_RESYNC_SAMPLES_FOR_UPDATE as Nsecs - 1) * PERIOD);
        assert!(!needs_more);
        assert!(!flushed);
        assert!(sync.is_model_updated());
        assert_eq!(sync.period(), PERIOD);
    }

    #[test]
    fn test_ignoring_present_fences_always_needs_hardware() {
        let sync = DispSync::new("test", PERIOD, true);
        let (needs_more, _) = train(&sync, 0, PERIOD, 10);
        assert!(needs_more);
    }

    #[test]
    fn test_period_estimate_rejects_outliers() {
        let sync = DispSync::new("test", PERIOD, false);
        let timestamps = [
            0,
            20_000_000,
            36_666_667,
            53_333_334,
            70_000_001,
            86_666_668,
            103_333_335,
        ];
        for t in timestamps {
            sync.add_resync_sample(t);
        }
        assert!((sync.period() - PERIOD).abs() <= 1);
    }

    #[test]
    fn test_pending_period_flushed_by_matching_sample() {
        let sync = DispSync::new("test", PERIOD, false);
        train(&sync, 0, PERIOD, 6);

        let new_period = 11_111_111;
        sync.set_period(new_period);
        assert_eq!(sync.period(), PERIOD);

        let last = 5 * PERIOD;
        let (needs_more, flushed) = sync.add_resync_sample(last + new_period);
        assert!(flushed);
        assert!(needs_more);
        assert_eq!(sync.period(), new_period);
    }

    #[test]
    fn test_pending_period_kept_while_hardware_runs_old_rate() {
        let sync = DispSync::new("test", PERIOD, false);
        train(&sync, 0, PERIOD, 6);
        sync.set_period(11_111_111);

        let (needs_more, flushed) = sync.add_resync_sample(6 * PERIOD);
        assert!(!flushed);
        assert!(needs_more);
        assert_eq!(sync.period(), PERIOD);
    }

    #[test]
    fn test_set_period_to_current_clears_pending() {
        let sync = DispSync::new("test", PERIOD, false);
        train(&sync, 0, PERIOD, 6);
        sync.set_period(11_111_111);
        sync.set_period(PERIOD);

        let (needs_more, flushed) = sync.add_resync_sample(6 * PERIOD);
        assert!(!flushed);
        assert!(!needs_more);
    }

    #[test]
    fn test_present_fences_in_step_with_model() {
        let sync = DispSync::new("test", PERIOD, false);
        train(&sync, 0, PERIOD, 8);

        for i in 10..14 {
            assert!(!sync.add_present_fence(&Fence::signalled("present", i * PERIOD + 1_000)));
        }
    }

    #[test]
    fn test_present_fences_out_of_step_request_resync() {
        let sync = DispSync::new("test", PERIOD, false);
        train(&sync, 0, PERIOD, 8);

        let mut needs_hw = false;
        for i in 10..14 {
            needs_hw = sync.add_present_fence(&Fence::signalled("present", i * PERIOD + 5_000_000));
        }
        assert!(needs_hw);
    }

    #[test]
    fn test_present_fence_before_model_requests_hardware() {
        let sync = DispSync::new("test", PERIOD, false);
        assert!(sync.add_present_fence(&Fence::signalled("present", 1_000)));
    }

    #[test]
    fn test_unsignalled_fences_are_ignored() {
        let sync = DispSync::new("test", PERIOD, false);
        train(&sync, 0, PERIOD, 8);
        assert!(!sync.add_present_fence(&Fence::new("pending")));
    }

    #[test]
    fn test_compute_next_refresh() {
        let sync = DispSync::new("test", 10, false);
        assert_eq!(sync.compute_next_refresh(0, 25), 30);
        assert_eq!(sync.compute_next_refresh(1, 25), 40);
        assert_eq!(sync.expected_present_time(30), 50);
        assert_eq!(DispSync::new("zero", 0, false).compute_next_refresh(0, 25), 0);
    }

    #[test]
    fn test_next_vsync_after_with_offset() {
        let sync = DispSync::new("test", 10, false);
        assert_eq!(sync.next_vsync_after(25, 0), Some(30));
        assert_eq!(sync.next_vsync_after(30, 0), Some(40));
        assert_eq!(sync.next_vsync_after(25, 3), Some(33));
        assert_eq!(sync.next_vsync_after(25, -3), Some(27));
        assert_eq!(DispSync::new("zero", 0, false).next_vsync_after(25, 0), None);
    }

    #[test]
    fn test_begin_resync_discards_model() {
        let sync = DispSync::new("test", PERIOD, false);
        train(&sync, 0, PERIOD, 6);
        assert!(sync.is_model_updated());

        sync.begin_resync();
        assert!(!sync.is_model_updated());
        let (needs_more, _) = sync.add_resync_sample(100 * PERIOD);
        assert!(needs_more);
    }

    #[test]
    fn test_dump_mentions_name_and_period() {
        let sync = DispSync::new("primary", PERIOD, false);
        let dump = sync.dump();
        assert!(dump.contains("primary"));
        assert!(dump.contains("16666667"));
    }
}
