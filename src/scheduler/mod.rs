//! Vsync scheduler
//!
//! Owns the software vsync model, the event-thread connections that deliver
//! vsync to consumers, hardware vsync enablement and the refresh-rate policy.
//!
//! Three locks are involved and never nested: the hardware vsync lock guards
//! enable/disable transitions, the policy's feature lock guards the decision
//! inputs, and the policy's callback lock guards the change callback, which
//! only ever runs after the feature lock is released.
//!
//! # Example
//!
//! ```no_run
//! use flinger::config::SchedulerConfig;
//! use flinger::scheduler::refresh_rate::{InputConfig, RefreshRateConfigs};
//! use flinger::scheduler::{Scheduler, VsyncControl};
//! use std::sync::Arc;
//!
//! struct Noop;
//! impl VsyncControl for Noop {
//!     fn set_vsync_enabled(&self, _enabled: bool) {}
//! }
//!
//! let inputs = [InputConfig { hwc_id: 0, vsync_period: 16_666_666 }];
//! let configs = Arc::new(RefreshRateConfigs::new(false, &inputs, 0).unwrap());
//! let scheduler = Scheduler::new(&SchedulerConfig::default(), configs, Arc::new(Noop));
//!
//! let app = scheduler.create_connection("app", 1_000_000, 0, None);
//! let connection = scheduler.get_event_connection(app).unwrap();
//! connection.request_next_vsync();
//! ```

pub mod disp_sync;
pub mod event_thread;
pub mod layer_history;
pub mod policy;
pub mod refresh_rate;
pub mod timer;

use crate::config::SchedulerConfig;
use crate::fence::Fence;
use crate::hwc::{DisplayId, HwComposer};
use disp_sync::DispSync;
use event_thread::{
    ConfigChanged, EventThread, EventThreadConnection, InterceptVsyncsCallback, ResyncCallback,
};
use layer_history::{LayerHandle, LayerHistory};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use policy::{ChangeRefreshRateCallback, RefreshRatePolicy, TimerState, TouchState};
use refresh_rate::{RefreshRateConfigs, RefreshRateType};
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use timer::OneShotTimer;

pub use policy::{ConfigEvent, FeatureState};

/// Nanosecond timestamps and durations
pub type Nsecs = i64;

/// Resync requests closer together than this are dropped
pub const IGNORE_DELAY: Duration = Duration::from_millis(750);

/// Monotonic time source
pub trait Clock: Send + Sync {
    fn now(&self) -> Nsecs;
}

/// Nanoseconds since the clock was created
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Nsecs {
        Nsecs::try_from(self.origin.elapsed().as_nanos()).unwrap_or(Nsecs::MAX)
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Nsecs) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn advance(&self, delta: Nsecs) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn set(&self, now: Nsecs) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Nsecs {
        self.now.load(Ordering::SeqCst)
    }
}

/// Switches hardware vsync interrupts on and off
#[cfg_attr(test, mockall::automock)]
pub trait VsyncControl: Send + Sync {
    fn set_vsync_enabled(&self, enabled: bool);
}

/// Drives one display's vsync through the hardware composer
pub struct DisplayVsyncControl {
    hwc: Arc<dyn HwComposer>,
    display: DisplayId,
}

impl DisplayVsyncControl {
    pub fn new(hwc: Arc<dyn HwComposer>, display: DisplayId) -> Self {
        Self { hwc, display }
    }
}

impl VsyncControl for DisplayVsyncControl {
    fn set_vsync_enabled(&self, enabled: bool) {
        if let Err(e) = self.hwc.set_vsync_enabled(self.display, enabled) {
            warn!("Failed to switch vsync on display {}: {}", self.display, e);
        }
    }
}

/// Opaque id of a scheduler connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(pub u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Window categories the layer history distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowType {
    Application,
    System,
    /// Never pushes the display above the default rate
    Wallpaper,
}

/// Next vsync and the current period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayStatInfo {
    pub vsync_time: Nsecs,
    pub vsync_period: Nsecs,
}

struct Connection {
    connection: Arc<EventThreadConnection>,
    thread: Arc<EventThread>,
}

#[derive(Debug, Default)]
struct HwVsyncState {
    primary_enabled: bool,
    available: bool,
}

/// State shared with timer threads and connection resync callbacks
struct SchedulerCore {
    clock: Arc<dyn Clock>,
    disp_sync: Arc<DispSync>,
    vsync_control: Arc<dyn VsyncControl>,
    hw_vsync: Mutex<HwVsyncState>,
    last_resync_time: AtomicI64,
    configs: Arc<RefreshRateConfigs>,
    policy: RefreshRatePolicy,
    layer_history: LayerHistory,
}

impl SchedulerCore {
    fn enable_hardware_vsync(&self) {
        let mut hw = self.hw_vsync.lock();
        if !hw.primary_enabled && hw.available {
            self.disp_sync.begin_resync();
            self.vsync_control.set_vsync_enabled(true);
            hw.primary_enabled = true;
        }
    }

    fn disable_hardware_vsync(&self, make_unavailable: bool) {
        let mut hw = self.hw_vsync.lock();
        if hw.primary_enabled {
            self.vsync_control.set_vsync_enabled(false);
            self.disp_sync.end_resync();
            hw.primary_enabled = false;
        }
        if make_unavailable {
            hw.available = false;
        }
    }

    fn resync_to_hardware_vsync(&self, make_available: bool, period: Nsecs) {
        {
            let mut hw = self.hw_vsync.lock();
            if make_available {
                hw.available = true;
            } else if !hw.available {
                return;
            }
        }

        if period <= 0 {
            return;
        }
        self.set_vsync_period(period);
    }

    fn set_vsync_period(&self, period: Nsecs) {
        let mut hw = self.hw_vsync.lock();
        self.disp_sync.set_period(period);

        if !hw.primary_enabled {
            self.disp_sync.begin_resync();
            self.vsync_control.set_vsync_enabled(true);
            hw.primary_enabled = true;
        }
    }

    fn resync(&self) {
        let now = self.clock.now();
        let last = self.last_resync_time.swap(now, Ordering::AcqRel);
        if now.saturating_sub(last) > IGNORE_DELAY.as_nanos() as Nsecs {
            let period = self.configs.current_refresh_rate().1.vsync_period;
            self.resync_to_hardware_vsync(false, period);
        }
    }

    fn kernel_idle_timer_changed(&self, state: TimerState) {
        let (current, rate) = self.configs.current_refresh_rate();
        match state {
            // Hardware vsync was off while the kernel idled the panel
            TimerState::Reset if current == RefreshRateType::Performance => {
                self.resync_to_hardware_vsync(true, rate.vsync_period);
            }
            TimerState::Expired if current != RefreshRateType::Performance => {
                self.disable_hardware_vsync(false);
            }
            _ => {}
        }
    }
}

pub struct Scheduler {
    core: Arc<SchedulerCore>,
    connections: Mutex<HashMap<ConnectionHandle, Connection>>,
    next_connection_id: AtomicU64,
    support_kernel_idle_timer: bool,
    idle_timer: Option<OneShotTimer>,
    touch_timer: Option<OneShotTimer>,
    display_power_timer: Option<OneShotTimer>,
}

impl Scheduler {
    pub fn new(
        config: &SchedulerConfig,
        configs: Arc<RefreshRateConfigs>,
        vsync_control: Arc<dyn VsyncControl>,
    ) -> Self {
        Self::with_clock(config, configs, vsync_control, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(
        config: &SchedulerConfig,
        configs: Arc<RefreshRateConfigs>,
        vsync_control: Arc<dyn VsyncControl>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let period = configs.current_refresh_rate().1.vsync_period;
        let core = Arc::new(SchedulerCore {
            disp_sync: Arc::new(DispSync::new(
                "SchedulerDispSync",
                period,
                config.ignore_present_fences,
            )),
            layer_history: LayerHistory::new(clock.clone()),
            clock,
            vsync_control,
            hw_vsync: Mutex::new(HwVsyncState::default()),
            last_resync_time: AtomicI64::new(Nsecs::MIN),
            policy: RefreshRatePolicy::new(
                configs.clone(),
                config.force_hdr_content_to_default_refresh_rate,
            ),
            configs,
        });

        let weak = Arc::downgrade(&core);
        let idle_timer = config.idle_timer().map(|interval| {
            if config.support_kernel_idle_timer {
                timer(
                    "IdleTimer",
                    interval,
                    &weak,
                    |core| core.kernel_idle_timer_changed(TimerState::Reset),
                    |core| core.kernel_idle_timer_changed(TimerState::Expired),
                )
            } else {
                timer(
                    "IdleTimer",
                    interval,
                    &weak,
                    |core| core.policy.on_idle_timer(TimerState::Reset),
                    |core| core.policy.on_idle_timer(TimerState::Expired),
                )
            }
        });
        let touch_timer = config.touch_timer().map(|interval| {
            timer(
                "TouchTimer",
                interval,
                &weak,
                |core| core.policy.on_touch(TouchState::Active),
                |core| core.policy.on_touch(TouchState::Inactive),
            )
        });
        let display_power_timer = config.display_power_timer().map(|interval| {
            timer(
                "DisplayPowerTimer",
                interval,
                &weak,
                |core| core.policy.on_display_power_timer(TimerState::Reset),
                |core| core.policy.on_display_power_timer(TimerState::Expired),
            )
        });

        info!(
            "Scheduler up: {} ns period, switching {}, idle {:?}, touch {:?}, display power {:?}",
            period,
            core.configs.refresh_rate_switching_supported(),
            config.idle_timer(),
            config.touch_timer(),
            config.display_power_timer()
        );

        Self {
            core,
            connections: Mutex::new(HashMap::new()),
            next_connection_id: AtomicU64::new(0),
            support_kernel_idle_timer: config.support_kernel_idle_timer,
            idle_timer,
            touch_timer,
            display_power_timer,
        }
    }

    pub fn disp_sync(&self) -> &Arc<DispSync> {
        &self.core.disp_sync
    }

    pub fn refresh_rate_configs(&self) -> &Arc<RefreshRateConfigs> {
        &self.core.configs
    }

    pub fn layer_history(&self) -> &LayerHistory {
        &self.core.layer_history
    }

    /// Creates an event thread at `phase_offset` with one internal connection
    pub fn create_connection(
        &self,
        name: &str,
        phase_offset: Nsecs,
        offset_threshold: Nsecs,
        intercept: Option<InterceptVsyncsCallback>,
    ) -> ConnectionHandle {
        let handle = ConnectionHandle(self.next_connection_id.fetch_add(1, Ordering::Relaxed));

        let thread = Arc::new(EventThread::new(
            name,
            self.core.disp_sync.clone(),
            self.core.clock.clone(),
            phase_offset,
            offset_threshold,
            intercept,
        ));
        let connection =
            thread.create_event_connection(Some(self.resync_callback()), ConfigChanged::Suppress);

        debug!("Created connection {} ({}) at {} ns", handle, name, phase_offset);
        self.connections
            .lock()
            .insert(handle, Connection { connection, thread });
        handle
    }

    /// Adds a client connection to the event thread behind `handle`
    pub fn create_display_event_connection(
        &self,
        handle: ConnectionHandle,
        config_changed: ConfigChanged,
    ) -> Option<Arc<EventThreadConnection>> {
        let thread = self.get_event_thread(handle)?;
        Some(thread.create_event_connection(Some(self.resync_callback()), config_changed))
    }

    pub fn get_event_thread(&self, handle: ConnectionHandle) -> Option<Arc<EventThread>> {
        self.with_connection(handle, |c| c.thread.clone())
    }

    pub fn get_event_connection(
        &self,
        handle: ConnectionHandle,
    ) -> Option<Arc<EventThreadConnection>> {
        self.with_connection(handle, |c| c.connection.clone())
    }

    pub fn on_hotplug_received(
        &self,
        handle: ConnectionHandle,
        display: DisplayId,
        connected: bool,
    ) {
        self.with_connection(handle, |c| c.thread.on_hotplug_received(display, connected));
    }

    pub fn on_screen_acquired(&self, handle: ConnectionHandle) {
        self.with_connection(handle, |c| c.thread.on_screen_acquired());
    }

    pub fn on_screen_released(&self, handle: ConnectionHandle) {
        self.with_connection(handle, |c| c.thread.on_screen_released());
    }

    pub fn on_config_changed(
        &self,
        handle: ConnectionHandle,
        display: DisplayId,
        config_id: usize,
    ) {
        self.with_connection(handle, |c| c.thread.on_config_changed(display, config_id));
    }

    pub fn set_phase_offset(&self, handle: ConnectionHandle, phase_offset: Nsecs) {
        self.with_connection(handle, |c| c.thread.set_phase_offset(phase_offset));
    }

    /// Event thread state behind `handle`; empty for an unknown handle
    pub fn dump_connection(&self, handle: ConnectionHandle) -> String {
        self.with_connection(handle, |c| c.thread.dump())
            .unwrap_or_default()
    }

    pub fn display_stat_info(&self) -> DisplayStatInfo {
        let disp_sync = &self.core.disp_sync;
        DisplayStatInfo {
            vsync_time: disp_sync.compute_next_refresh(0, self.core.clock.now()),
            vsync_period: disp_sync.period(),
        }
    }

    pub fn enable_hardware_vsync(&self) {
        self.core.enable_hardware_vsync();
    }

    /// Turns hardware vsync off; `make_unavailable` also blocks re-enabling
    /// until a resync makes it available again
    pub fn disable_hardware_vsync(&self, make_unavailable: bool) {
        self.core.disable_hardware_vsync(make_unavailable);
    }

    pub fn resync_to_hardware_vsync(&self, make_available: bool, period: Nsecs) {
        self.core.resync_to_hardware_vsync(make_available, period);
    }

    /// Re-enables hardware vsync unless a resync happened within [`IGNORE_DELAY`]
    pub fn resync(&self) {
        self.core.resync();
    }

    pub fn is_hardware_vsync_enabled(&self) -> bool {
        self.core.hw_vsync.lock().primary_enabled
    }

    pub fn is_hardware_vsync_available(&self) -> bool {
        self.core.hw_vsync.lock().available
    }

    /// Feeds a hardware vsync timestamp; returns whether a pending period
    /// change took effect
    pub fn add_resync_sample(&self, timestamp: Nsecs) -> bool {
        let (needs_hw_vsync, period_flushed) = {
            let hw = self.core.hw_vsync.lock();
            if hw.primary_enabled {
                self.core.disp_sync.add_resync_sample(timestamp)
            } else {
                (false, false)
            }
        };

        if needs_hw_vsync {
            self.enable_hardware_vsync();
        } else {
            self.disable_hardware_vsync(false);
        }
        period_flushed
    }

    pub fn add_present_fence(&self, fence: &Fence) {
        if self.core.disp_sync.add_present_fence(fence) {
            self.enable_hardware_vsync();
        } else {
            self.disable_hardware_vsync(false);
        }
    }

    pub fn set_ignore_present_fences(&self, ignore: bool) {
        self.core.disp_sync.set_ignore_present_fences(ignore);
    }

    pub fn expected_present_time(&self) -> Nsecs {
        self.core
            .disp_sync
            .expected_present_time(self.core.clock.now())
    }

    /// Starts tracking a layer's frame rate
    pub fn register_layer(&self, name: &str, window_type: WindowType) -> LayerHandle {
        let configs = &self.core.configs;
        let (min_fps, max_fps) = if configs.refresh_rate_switching_supported() {
            let default_fps = configs.refresh_rate_from_type(RefreshRateType::Default).fps;
            let max_fps = match window_type {
                WindowType::Wallpaper => default_fps,
                _ => configs
                    .refresh_rate_from_type(RefreshRateType::Performance)
                    .fps,
            };
            (default_fps, max_fps)
        } else {
            let fps = configs.current_refresh_rate().1.fps;
            (fps, fps)
        };

        self.core
            .layer_history
            .register_layer(name, min_fps as f32, max_fps as f32)
    }

    pub fn add_layer_present_time_and_hdr(
        &self,
        layer: &LayerHandle,
        present_time: Nsecs,
        is_hdr: bool,
    ) {
        self.core.layer_history.insert(layer, present_time, is_hdr);
    }

    pub fn set_layer_visibility(&self, layer: &LayerHandle, visible: bool) {
        self.core.layer_history.set_visibility(layer, visible);
    }

    /// Re-evaluates the refresh rate from the layer history
    pub fn update_fps_based_on_content(&self) {
        let (fps, is_hdr) = self.core.layer_history.desired_refresh_rate_and_hdr();
        self.core.policy.update_content(fps.round() as u32, is_hdr);
    }

    pub fn set_change_refresh_rate_callback(&self, callback: ChangeRefreshRateCallback) {
        self.core.policy.set_callback(callback);
    }

    pub fn is_idle_timer_enabled(&self) -> bool {
        self.idle_timer.is_some()
    }

    pub fn reset_idle_timer(&self) {
        if let Some(timer) = &self.idle_timer {
            timer.reset();
        }
    }

    /// Touch keeps the display at the performance rate for a while
    pub fn notify_touch_event(&self) {
        if let Some(timer) = &self.touch_timer {
            timer.reset();
        }

        if self.support_kernel_idle_timer {
            self.reset_idle_timer();
        }

        // Touch changes what is animating; start the estimate over.
        self.core.layer_history.clear();
    }

    pub fn set_display_power_state(&self, normal: bool) {
        self.core.policy.set_display_power_state_normal(normal);

        if let Some(timer) = &self.display_power_timer {
            timer.reset();
        }

        // Display power changes bring a burst of unrelated frames.
        self.core.layer_history.clear();
    }

    pub fn preferred_refresh_rate_type(&self) -> RefreshRateType {
        self.core.policy.preferred_refresh_rate_type()
    }

    pub fn features(&self) -> FeatureState {
        self.core.policy.features()
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        if let Some(timer) = &self.idle_timer {
            let _ = writeln!(out, "+  Idle timer interval: {} ms", timer.interval().as_millis());
        }
        if let Some(timer) = &self.touch_timer {
            let _ = writeln!(out, "+  Touch timer interval: {} ms", timer.interval().as_millis());
        }
        if let Some(timer) = &self.display_power_timer {
            let _ = writeln!(
                out,
                "+  Display power timer interval: {} ms",
                timer.interval().as_millis()
            );
        }
        out
    }

    fn with_connection<T>(
        &self,
        handle: ConnectionHandle,
        f: impl FnOnce(&Connection) -> T,
    ) -> Option<T> {
        let connections = self.connections.lock();
        match connections.get(&handle) {
            Some(connection) => Some(f(connection)),
            None => {
                error!("Invalid connection handle {}", handle);
                None
            }
        }
    }

    fn resync_callback(&self) -> ResyncCallback {
        let core = Arc::downgrade(&self.core);
        Arc::new(move || {
            if let Some(core) = core.upgrade() {
                core.resync();
            }
        })
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        // Timers call into the core; stop them before anything else goes.
        self.display_power_timer.take();
        self.touch_timer.take();
        self.idle_timer.take();
    }
}

/// Starts a timer whose callbacks run against the core while it is alive
fn timer(
    name: &str,
    interval: Duration,
    core: &Weak<SchedulerCore>,
    on_reset: fn(&SchedulerCore),
    on_timeout: fn(&SchedulerCore),
) -> OneShotTimer {
    let (reset_core, timeout_core) = (core.clone(), core.clone());
    let mut timer = OneShotTimer::new(
        name,
        interval,
        Box::new(move || {
            if let Some(core) = reset_core.upgrade() {
                on_reset(&core);
            }
        }),
        Box::new(move || {
            if let Some(core) = timeout_core.upgrade() {
                on_timeout(&core);
            }
        }),
    );
    timer.start();
    timer
}

#[cfg(test)]
mod tests;
