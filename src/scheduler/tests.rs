//! Unit tests for the scheduler
//!
//! Hardware vsync transitions and the resync window run on a manual clock;
//! timer-driven behaviour runs on real timers and is serialised.

use super::event_thread::DisplayEvent;
use super::refresh_rate::InputConfig;
use super::*;
use mockall::predicate::eq;
use mockall::Sequence;
use serial_test::serial;
use std::sync::atomic::AtomicUsize;
use std::thread;

const MS: Nsecs = 1_000_000;
const PERIOD_60: Nsecs = 16_666_666;
const PERIOD_90: Nsecs = 11_111_111;

/// Records every hardware vsync switch
#[derive(Default)]
struct RecordingVsync {
    calls: Mutex<Vec<bool>>,
}

impl RecordingVsync {
    fn calls(&self) -> Vec<bool> {
        self.calls.lock().clone()
    }
}

impl VsyncControl for RecordingVsync {
    fn set_vsync_enabled(&self, enabled: bool) {
        self.calls.lock().push(enabled);
    }
}

fn configs(switching: bool) -> Arc<RefreshRateConfigs> {
    let inputs = [
        InputConfig {
            hwc_id: 0,
            vsync_period: PERIOD_60,
        },
        InputConfig {
            hwc_id: 1,
            vsync_period: PERIOD_90,
        },
    ];
    Arc::new(RefreshRateConfigs::new(switching, &inputs, 0).unwrap())
}

fn manual_scheduler(
    config: &SchedulerConfig,
    switching: bool,
) -> (Scheduler, Arc<RecordingVsync>, Arc<ManualClock>) {
    let vsync = Arc::new(RecordingVsync::default());
    let clock = Arc::new(ManualClock::new(10_000 * MS));
    let scheduler = Scheduler::with_clock(config, configs(switching), vsync.clone(), clock.clone());
    (scheduler, vsync, clock)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

type Changes = Arc<Mutex<Vec<(RefreshRateType, ConfigEvent)>>>;

fn record_changes(scheduler: &Scheduler) -> Changes {
    let changes: Changes = Arc::new(Mutex::new(Vec::new()));
    let sink = changes.clone();
    scheduler.set_change_refresh_rate_callback(Box::new(move |kind, event| {
        sink.lock().push((kind, event));
    }));
    changes
}

#[test]
fn test_invalid_handle_fails_locally() {
    let (scheduler, _vsync, _clock) = manual_scheduler(&SchedulerConfig::default(), true);
    let bogus = ConnectionHandle(42);

    assert!(scheduler.get_event_thread(bogus).is_none());
    assert!(scheduler.get_event_connection(bogus).is_none());
    assert!(scheduler
        .create_display_event_connection(bogus, ConfigChanged::Dispatch)
        .is_none());
    assert!(scheduler.dump_connection(bogus).is_empty());

    scheduler.on_hotplug_received(bogus, DisplayId(0), true);
    scheduler.on_screen_acquired(bogus);
    scheduler.on_screen_released(bogus);
    scheduler.on_config_changed(bogus, DisplayId(0), 1);
    scheduler.set_phase_offset(bogus, 5);
}

#[test]
fn test_connection_handles_are_monotonic_and_independent() {
    let (scheduler, _vsync, _clock) = manual_scheduler(&SchedulerConfig::default(), true);

    let app = scheduler.create_connection("app", MS, 0, None);
    let sf = scheduler.create_connection("sf", 2 * MS, 0, None);
    assert!(sf > app);

    scheduler.set_phase_offset(app, 3 * MS);
    assert_eq!(scheduler.get_event_thread(app).unwrap().phase_offset(), 3 * MS);
    assert_eq!(scheduler.get_event_thread(sf).unwrap().phase_offset(), 2 * MS);

    assert!(scheduler.dump_connection(sf).contains("sf"));
    assert_eq!(scheduler.get_event_thread(app).unwrap().connection_count(), 1);
}

#[test]
fn test_hardware_vsync_needs_availability() {
    let (scheduler, vsync, _clock) = manual_scheduler(&SchedulerConfig::default(), true);

    scheduler.enable_hardware_vsync();
    assert!(!scheduler.is_hardware_vsync_enabled());

    scheduler.resync_to_hardware_vsync(true, PERIOD_60);
    assert!(scheduler.is_hardware_vsync_enabled());
    assert_eq!(vsync.calls(), vec![true]);

    scheduler.disable_hardware_vsync(true);
    assert!(!scheduler.is_hardware_vsync_enabled());
    assert!(!scheduler.is_hardware_vsync_available());

    scheduler.enable_hardware_vsync();
    scheduler.resync();
    assert!(!scheduler.is_hardware_vsync_enabled());
    assert_eq!(vsync.calls(), vec![true, false]);

    scheduler.resync_to_hardware_vsync(true, PERIOD_60);
    assert!(scheduler.is_hardware_vsync_enabled());
}

#[test]
fn test_enable_disable_call_device_once_each() {
    let mut control = MockVsyncControl::new();
    let mut seq = Sequence::new();
    control
        .expect_set_vsync_enabled()
        .with(eq(true))
        .times(1)
        .in_sequence(&mut seq)
        .return_const(());
    control
        .expect_set_vsync_enabled()
        .with(eq(false))
        .times(1)
        .in_sequence(&mut seq)
        .return_const(());

    let scheduler = Scheduler::with_clock(
        &SchedulerConfig::default(),
        configs(true),
        Arc::new(control),
        Arc::new(ManualClock::new(0)),
    );

    scheduler.resync_to_hardware_vsync(true, PERIOD_60);
    scheduler.enable_hardware_vsync();
    scheduler.disable_hardware_vsync(false);
    scheduler.disable_hardware_vsync(false);
    assert!(scheduler.is_hardware_vsync_available());
}

#[test]
fn test_resync_ignored_within_window() {
    let (scheduler, vsync, clock) = manual_scheduler(&SchedulerConfig::default(), true);
    scheduler.resync_to_hardware_vsync(true, PERIOD_60);
    scheduler.disable_hardware_vsync(false);

    scheduler.resync();
    assert!(scheduler.is_hardware_vsync_enabled());
    scheduler.disable_hardware_vsync(false);

    clock.advance(100 * MS);
    scheduler.resync();
    assert!(!scheduler.is_hardware_vsync_enabled());

    // The ignored request still restarts the window
    clock.advance(700 * MS);
    scheduler.resync();
    assert!(!scheduler.is_hardware_vsync_enabled());

    clock.advance(751 * MS);
    scheduler.resync();
    assert!(scheduler.is_hardware_vsync_enabled());
    assert_eq!(vsync.calls(), vec![true, false, true, false, true]);
}

#[test]
fn test_resync_samples_turn_hardware_vsync_off_once_locked() {
    let (scheduler, vsync, _clock) = manual_scheduler(&SchedulerConfig::default(), true);
    scheduler.resync_to_hardware_vsync(true, PERIOD_60);

    for i in 0..5 {
        assert!(!scheduler.add_resync_sample(i * PERIOD_60));
        assert!(scheduler.is_hardware_vsync_enabled());
    }
    scheduler.add_resync_sample(5 * PERIOD_60);
    assert!(!scheduler.is_hardware_vsync_enabled());

    // Samples arriving with hardware vsync off are dropped
    assert!(!scheduler.add_resync_sample(6 * PERIOD_60));
    assert_eq!(vsync.calls(), vec![true, false]);
}

#[test]
fn test_period_change_flushes_through_samples() {
    let (scheduler, _vsync, _clock) = manual_scheduler(&SchedulerConfig::default(), true);
    scheduler.resync_to_hardware_vsync(true, PERIOD_60);
    for i in 0..6 {
        scheduler.add_resync_sample(i * PERIOD_60);
    }

    scheduler.resync_to_hardware_vsync(true, PERIOD_90);
    assert!(scheduler.is_hardware_vsync_enabled());
    scheduler.add_resync_sample(10 * PERIOD_60);
    assert!(scheduler.add_resync_sample(10 * PERIOD_60 + PERIOD_90));
    assert_eq!(scheduler.display_stat_info().vsync_period, PERIOD_90);
}

#[test]
fn test_present_fences_drive_hardware_vsync() {
    let (scheduler, _vsync, _clock) = manual_scheduler(&SchedulerConfig::default(), true);
    scheduler.resync_to_hardware_vsync(true, PERIOD_60);
    scheduler.disable_hardware_vsync(false);

    // No model yet: the fence asks for hardware vsync
    scheduler.add_present_fence(&Fence::signalled("present", 3 * PERIOD_60));
    assert!(scheduler.is_hardware_vsync_enabled());

    for i in 0..6 {
        scheduler.add_resync_sample(i * PERIOD_60);
    }
    assert!(!scheduler.is_hardware_vsync_enabled());

    scheduler.add_present_fence(&Fence::signalled("present", 20 * PERIOD_60 + 6 * MS));
    assert!(scheduler.is_hardware_vsync_enabled());
}

#[test]
fn test_display_stat_info_and_expected_present() {
    let (scheduler, _vsync, clock) = manual_scheduler(&SchedulerConfig::default(), true);
    clock.set(1_000);

    assert_eq!(
        scheduler.display_stat_info(),
        DisplayStatInfo {
            vsync_time: PERIOD_60,
            vsync_period: PERIOD_60,
        }
    );
    assert_eq!(scheduler.expected_present_time(), 2 * PERIOD_60);
}

#[test]
fn test_switching_unsupported_is_always_default() {
    let config = SchedulerConfig::default();
    let (scheduler, _vsync, clock) = manual_scheduler(&config, false);
    let changes = record_changes(&scheduler);

    let layer = scheduler.register_layer("game", WindowType::Application);
    for _ in 0..20 {
        clock.advance(11 * MS);
        scheduler.add_layer_present_time_and_hdr(&layer, clock.now(), false);
    }
    scheduler.update_fps_based_on_content();
    scheduler.notify_touch_event();
    scheduler.set_display_power_state(false);

    assert_eq!(scheduler.preferred_refresh_rate_type(), RefreshRateType::Default);
    assert!(changes.lock().is_empty());
}

#[test]
fn test_44_fps_content_selects_performance() {
    let (scheduler, _vsync, clock) = manual_scheduler(&SchedulerConfig::default(), true);
    let changes = record_changes(&scheduler);

    let layer = scheduler.register_layer("video", WindowType::Application);
    for _ in 0..30 {
        clock.advance(22_727_272);
        scheduler.add_layer_present_time_and_hdr(&layer, clock.now(), false);
    }
    scheduler.update_fps_based_on_content();
    scheduler.update_fps_based_on_content();

    assert_eq!(scheduler.features().content_refresh_rate, 44);
    assert_eq!(scheduler.preferred_refresh_rate_type(), RefreshRateType::Performance);
    assert_eq!(
        *changes.lock(),
        vec![(RefreshRateType::Performance, ConfigEvent::Changed)]
    );
}

#[test]
fn test_wallpaper_capped_at_default_rate() {
    let (scheduler, _vsync, clock) = manual_scheduler(&SchedulerConfig::default(), true);

    let wallpaper = scheduler.register_layer("wallpaper", WindowType::Wallpaper);
    for _ in 0..20 {
        clock.advance(5 * MS);
        scheduler.add_layer_present_time_and_hdr(&wallpaper, clock.now(), false);
    }
    scheduler.update_fps_based_on_content();

    assert_eq!(scheduler.features().content_refresh_rate, 60);
    assert_eq!(scheduler.preferred_refresh_rate_type(), RefreshRateType::Default);
}

#[test]
fn test_invisible_layers_do_not_count() {
    let (scheduler, _vsync, clock) = manual_scheduler(&SchedulerConfig::default(), true);

    let layer = scheduler.register_layer("hidden", WindowType::Application);
    scheduler.set_layer_visibility(&layer, false);
    for _ in 0..20 {
        clock.advance(11 * MS);
        scheduler.add_layer_present_time_and_hdr(&layer, clock.now(), false);
    }
    scheduler.update_fps_based_on_content();

    assert_eq!(scheduler.features().content_refresh_rate, 0);
}

#[test]
fn test_display_power_state_clears_history() {
    let (scheduler, _vsync, clock) = manual_scheduler(&SchedulerConfig::default(), true);
    let layer = scheduler.register_layer("video", WindowType::Application);
    for _ in 0..10 {
        clock.advance(16 * MS);
        scheduler.add_layer_present_time_and_hdr(&layer, clock.now(), false);
    }

    scheduler.set_display_power_state(false);
    assert!(!scheduler.features().is_display_power_state_normal);
    assert_eq!(scheduler.layer_history().desired_refresh_rate_and_hdr().0, 0.0);
}

#[test]
#[serial]
fn test_touch_after_idle_expiry_selects_performance() {
    let config = SchedulerConfig {
        idle_timer_ms: 20,
        touch_timer_ms: 60,
        ..SchedulerConfig::default()
    };
    let vsync = Arc::new(RecordingVsync::default());
    let scheduler = Scheduler::new(&config, configs(true), vsync);

    assert!(wait_until(|| {
        let features = scheduler.features();
        features.idle_timer == TimerState::Expired && features.touch == TouchState::Inactive
    }));
    assert_eq!(scheduler.preferred_refresh_rate_type(), RefreshRateType::Default);

    let layer = scheduler.register_layer("video", WindowType::Application);
    let now = scheduler.core.clock.now();
    scheduler.add_layer_present_time_and_hdr(&layer, now, false);
    scheduler.add_layer_present_time_and_hdr(&layer, now + 16 * MS, false);

    scheduler.notify_touch_event();
    assert_eq!(scheduler.layer_history().desired_refresh_rate_and_hdr().0, 0.0);
    assert!(wait_until(|| scheduler.preferred_refresh_rate_type()
        == RefreshRateType::Performance));

    // Touch timer runs out and idle takes over again
    assert!(wait_until(|| scheduler.preferred_refresh_rate_type()
        == RefreshRateType::Default));
}

#[test]
#[serial]
fn test_kernel_idle_timer_drives_hardware_vsync() {
    let config = SchedulerConfig {
        idle_timer_ms: 20,
        support_kernel_idle_timer: true,
        ..SchedulerConfig::default()
    };
    let vsync = Arc::new(RecordingVsync::default());
    let scheduler = Scheduler::new(&config, configs(true), vsync.clone());

    scheduler.resync_to_hardware_vsync(true, PERIOD_60);
    assert!(scheduler.is_hardware_vsync_enabled());
    scheduler.reset_idle_timer();

    // Running at DEFAULT, so expiry turns hardware vsync off
    assert!(wait_until(|| !scheduler.is_hardware_vsync_enabled()));
    // The policy never sees kernel idle events
    assert_eq!(scheduler.features().idle_timer, TimerState::Reset);

    scheduler.refresh_rate_configs().set_current_config(1).unwrap();
    scheduler.notify_touch_event();
    assert!(wait_until(|| scheduler.is_hardware_vsync_enabled()));
}

#[test]
#[serial]
fn test_dump_lists_timer_intervals() {
    let config = SchedulerConfig {
        idle_timer_ms: 500,
        touch_timer_ms: 250,
        ..SchedulerConfig::default()
    };
    let scheduler = Scheduler::new(&config, configs(true), Arc::new(RecordingVsync::default()));

    let dump = scheduler.dump();
    assert!(dump.contains("+  Idle timer interval: 500 ms"));
    assert!(dump.contains("+  Touch timer interval: 250 ms"));
    assert!(!dump.contains("Display power"));
    assert!(scheduler.is_idle_timer_enabled());
}

#[test]
#[serial]
fn test_drop_stops_timers() {
    let config = SchedulerConfig {
        idle_timer_ms: 5,
        touch_timer_ms: 5,
        display_power_timer_ms: 5,
        ..SchedulerConfig::default()
    };
    let scheduler = Scheduler::new(&config, configs(true), Arc::new(RecordingVsync::default()));
    let changes = record_changes(&scheduler);
    thread::sleep(Duration::from_millis(20));

    drop(scheduler);
    let seen = changes.lock().len();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(changes.lock().len(), seen);
}

#[tokio::test]
#[serial]
async fn test_config_changed_reaches_dispatching_connection() {
    let (scheduler, _vsync, _clock) = manual_scheduler(&SchedulerConfig::default(), true);
    let handle = scheduler.create_connection("app", MS, 0, None);
    let client = scheduler
        .create_display_event_connection(handle, ConfigChanged::Dispatch)
        .unwrap();

    scheduler.on_config_changed(handle, DisplayId(0), 1);
    assert_eq!(
        client.recv_timeout(Duration::from_secs(1)).await,
        Some(DisplayEvent::ConfigChanged {
            display: DisplayId(0),
            config_id: 1
        })
    );

    let internal = scheduler.get_event_connection(handle).unwrap();
    assert!(internal.try_recv().is_none());
}

#[test]
fn test_vsync_request_resyncs_hardware() {
    let (scheduler, vsync, _clock) = manual_scheduler(&SchedulerConfig::default(), true);
    scheduler.resync_to_hardware_vsync(true, PERIOD_60);
    scheduler.disable_hardware_vsync(false);

    let handle = scheduler.create_connection("app", MS, 0, None);
    let client = scheduler
        .create_display_event_connection(handle, ConfigChanged::Suppress)
        .unwrap();
    client.request_next_vsync();

    assert!(scheduler.is_hardware_vsync_enabled());
    assert_eq!(vsync.calls(), vec![true, false, true]);
}

#[test]
fn test_display_vsync_control_drives_device() {
    use crate::headless::HeadlessHwc;

    let hwc = Arc::new(HeadlessHwc::new());
    let control = DisplayVsyncControl::new(hwc.clone(), DisplayId(0));
    control.set_vsync_enabled(true);
    assert!(hwc.vsync_enabled(DisplayId(0)));

    // Errors from the device are logged, not propagated
    hwc.disconnect_display(DisplayId(0));
    control.set_vsync_enabled(false);
    assert!(hwc.vsync_enabled(DisplayId(0)));
    assert_eq!(hwc.vsync_toggles(DisplayId(0)), 1);
}

#[test]
fn test_handle_counter_survives_concurrent_creation() {
    let (scheduler, _vsync, _clock) = manual_scheduler(&SchedulerConfig::default(), true);
    let scheduler = Arc::new(scheduler);
    let created = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let scheduler = scheduler.clone();
            let created = created.clone();
            thread::spawn(move || {
                let handle = scheduler.create_connection(&format!("conn-{}", i), 0, 0, None);
                created.fetch_add(1, Ordering::SeqCst);
                handle
            })
        })
        .collect();
    let mut handles: Vec<ConnectionHandle> =
        workers.into_iter().map(|w| w.join().unwrap()).collect();
    handles.sort();
    handles.dedup();

    assert_eq!(handles.len(), 4);
    assert_eq!(created.load(Ordering::SeqCst), 4);
}
