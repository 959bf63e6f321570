//! Per-connection vsync event threads
//!
//! Each [`EventThread`] owns one OS thread that sleeps until the next model
//! vsync (shifted by its phase offset) and hands the event to every client
//! connection that asked for it. Hotplug and config-changed notifications
//! are delivered as soon as they are posted.

use super::disp_sync::DispSync;
use super::{Clock, Nsecs};
use crate::hwc::DisplayId;
use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Poll interval while the vsync model has no period yet
const NO_MODEL_RETRY: Duration = Duration::from_millis(16);

/// Called by a connection asking for vsync, so hardware vsync can be resynced
pub type ResyncCallback = Arc<dyn Fn() + Send + Sync>;

/// Sees every vsync the thread generates, before clients do
pub type InterceptVsyncsCallback = Box<dyn Fn(Nsecs) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayEvent {
    Vsync { timestamp: Nsecs, count: u32 },
    Hotplug { display: DisplayId, connected: bool },
    ConfigChanged { display: DisplayId, config_id: usize },
}

/// Whether a connection receives config-changed events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChanged {
    Suppress,
    Dispatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VsyncRequest {
    None,
    /// The next vsync only
    Single,
    /// Every n-th vsync
    Periodic(u32),
}

struct ThreadState {
    running: bool,
    screen_on: bool,
    phase_offset: Nsecs,
    offset_threshold: Nsecs,
    connections: Vec<Weak<EventThreadConnection>>,
    pending_events: VecDeque<DisplayEvent>,
    vsync_count: u32,
    last_vsync: Option<Nsecs>,
}

struct Shared {
    name: String,
    state: Mutex<ThreadState>,
    condvar: Condvar,
}

impl Shared {
    /// Notifies with the state lock held so the thread cannot miss it between
    /// checking for work and going to sleep
    fn wake(&self) {
        let _state = self.state.lock();
        self.condvar.notify_all();
    }
}

/// Client end of an event thread
pub struct EventThreadConnection {
    id: u64,
    config_changed: ConfigChanged,
    resync: Option<ResyncCallback>,
    vsync_request: Mutex<VsyncRequest>,
    sender: UnboundedSender<DisplayEvent>,
    receiver: tokio::sync::Mutex<UnboundedReceiver<DisplayEvent>>,
    thread: Weak<Shared>,
}

impl EventThreadConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config_changed(&self) -> ConfigChanged {
        self.config_changed
    }

    pub fn vsync_request(&self) -> VsyncRequest {
        *self.vsync_request.lock()
    }

    /// Asks for the next vsync; also nudges hardware vsync back on
    pub fn request_next_vsync(&self) {
        if let Some(resync) = &self.resync {
            resync();
        }

        {
            let mut request = self.vsync_request.lock();
            if *request == VsyncRequest::None {
                *request = VsyncRequest::Single;
            }
        }
        self.wake_thread();
    }

    /// 0 stops vsync delivery, n delivers every n-th vsync
    pub fn set_vsync_rate(&self, rate: u32) {
        *self.vsync_request.lock() = match rate {
            0 => VsyncRequest::None,
            n => VsyncRequest::Periodic(n),
        };
        self.wake_thread();
    }

    /// Next queued event, if any
    pub fn try_recv(&self) -> Option<DisplayEvent> {
        self.receiver.try_lock().ok()?.try_recv().ok()
    }

    /// Waits up to `timeout` for the next event
    pub async fn recv_timeout(&self, timeout: Duration) -> Option<DisplayEvent> {
        let mut receiver = self.receiver.lock().await;
        tokio::time::timeout(timeout, receiver.recv())
            .await
            .ok()
            .flatten()
    }

    fn post(&self, event: DisplayEvent) {
        if self.sender.send(event).is_err() {
            warn!("Event connection {} dropped {:?}", self.id, event);
        }
    }

    /// Consumes the request for vsync number `count`, if it wants it
    fn take_vsync(&self, count: u32) -> bool {
        let mut request = self.vsync_request.lock();
        match *request {
            VsyncRequest::None => false,
            VsyncRequest::Single => {
                *request = VsyncRequest::None;
                true
            }
            VsyncRequest::Periodic(rate) => count % rate == 0,
        }
    }

    fn wake_thread(&self) {
        if let Some(shared) = self.thread.upgrade() {
            shared.wake();
        }
    }
}

pub struct EventThread {
    shared: Arc<Shared>,
    next_connection_id: AtomicU64,
    thread: Option<JoinHandle<()>>,
}

impl EventThread {
    /// Spawns the event thread
    ///
    /// `offset_threshold` lets a vsync through only if it is at least
    /// `period - offset_threshold` after the previous one delivered.
    pub fn new(
        name: impl Into<String>,
        disp_sync: Arc<DispSync>,
        clock: Arc<dyn Clock>,
        phase_offset: Nsecs,
        offset_threshold: Nsecs,
        intercept: Option<InterceptVsyncsCallback>,
    ) -> Self {
        let name = name.into();
        let shared = Arc::new(Shared {
            name: name.clone(),
            state: Mutex::new(ThreadState {
                running: true,
                screen_on: true,
                phase_offset,
                offset_threshold,
                connections: Vec::new(),
                pending_events: VecDeque::new(),
                vsync_count: 0,
                last_vsync: None,
            }),
            condvar: Condvar::new(),
        });

        let thread_shared = shared.clone();
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(thread_shared, disp_sync, clock, intercept));
        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Failed to spawn event thread {}: {}", name, e);
                None
            }
        };

        debug!("Event thread {} started, phase offset {} ns", name, phase_offset);
        Self {
            shared,
            next_connection_id: AtomicU64::new(0),
            thread,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn create_event_connection(
        &self,
        resync: Option<ResyncCallback>,
        config_changed: ConfigChanged,
    ) -> Arc<EventThreadConnection> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let connection = Arc::new(EventThreadConnection {
            id: self.next_connection_id.fetch_add(1, Ordering::Relaxed),
            config_changed,
            resync,
            vsync_request: Mutex::new(VsyncRequest::None),
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            thread: Arc::downgrade(&self.shared),
        });

        self.shared
            .state
            .lock()
            .connections
            .push(Arc::downgrade(&connection));
        trace!("{}: connection {} created", self.shared.name, connection.id);
        connection
    }

    pub fn connection_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .connections
            .iter()
            .filter(|c| c.strong_count() > 0)
            .count()
    }

    pub fn on_screen_released(&self) {
        self.update(|state| state.screen_on = false);
    }

    pub fn on_screen_acquired(&self) {
        self.update(|state| state.screen_on = true);
    }

    pub fn on_hotplug_received(&self, display: DisplayId, connected: bool) {
        self.update(|state| {
            state
                .pending_events
                .push_back(DisplayEvent::Hotplug { display, connected })
        });
    }

    pub fn on_config_changed(&self, display: DisplayId, config_id: usize) {
        self.update(|state| {
            state
                .pending_events
                .push_back(DisplayEvent::ConfigChanged { display, config_id })
        });
    }

    pub fn set_phase_offset(&self, phase_offset: Nsecs) {
        self.update(|state| state.phase_offset = phase_offset);
    }

    pub fn phase_offset(&self) -> Nsecs {
        self.shared.state.lock().phase_offset
    }

    pub fn dump(&self) -> String {
        let state = self.shared.state.lock();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{}: screen {}, phase offset {} ns, threshold {} ns, vsync count {}, pending events {}",
            self.shared.name,
            if state.screen_on { "on" } else { "off" },
            state.phase_offset,
            state.offset_threshold,
            state.vsync_count,
            state.pending_events.len(),
        );
        for connection in state.connections.iter().filter_map(Weak::upgrade) {
            let _ = writeln!(
                out,
                "    connection {}: {:?}, config changed {:?}",
                connection.id,
                connection.vsync_request(),
                connection.config_changed
            );
        }
        out
    }

    fn update(&self, apply: impl FnOnce(&mut ThreadState)) {
        let mut state = self.shared.state.lock();
        apply(&mut state);
        self.shared.condvar.notify_all();
    }
}

impl Drop for EventThread {
    fn drop(&mut self) {
        self.update(|state| state.running = false);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Event thread {} panicked", self.shared.name);
            }
        }
    }
}

fn run(
    shared: Arc<Shared>,
    disp_sync: Arc<DispSync>,
    clock: Arc<dyn Clock>,
    intercept: Option<InterceptVsyncsCallback>,
) {
    let mut state = shared.state.lock();
    loop {
        if !state.running {
            break;
        }
        state.connections.retain(|c| c.strong_count() > 0);

        while let Some(event) = state.pending_events.pop_front() {
            dispatch(&state, event);
        }

        let wants_vsync = state.screen_on
            && state
                .connections
                .iter()
                .filter_map(Weak::upgrade)
                .any(|c| c.vsync_request() != VsyncRequest::None);
        if !wants_vsync {
            shared.condvar.wait(&mut state);
            continue;
        }

        let now = clock.now();
        let Some(target) = next_vsync(&state, &disp_sync, now) else {
            shared.condvar.wait_for(&mut state, NO_MODEL_RETRY);
            continue;
        };

        if target > now {
            let wait = Duration::from_nanos((target - now) as u64);
            if !shared.condvar.wait_for(&mut state, wait).timed_out() {
                // Something changed; start over with fresh state.
                continue;
            }
        }
        if !state.running || clock.now() < target {
            continue;
        }

        deliver_vsync(&mut state, target, intercept.as_ref());
    }
    trace!("{}: event thread exiting", shared.name);
}

/// Next vsync at or past the threshold distance from the last delivered one
fn next_vsync(state: &ThreadState, disp_sync: &DispSync, now: Nsecs) -> Option<Nsecs> {
    let mut target = disp_sync.next_vsync_after(now, state.phase_offset)?;
    let period = disp_sync.period();
    if let Some(last) = state.last_vsync {
        let min_gap = (period - state.offset_threshold).max(0);
        while target - last < min_gap {
            target += period;
        }
    }
    Some(target)
}

fn deliver_vsync(
    state: &mut MutexGuard<'_, ThreadState>,
    timestamp: Nsecs,
    intercept: Option<&InterceptVsyncsCallback>,
) {
    state.vsync_count = state.vsync_count.wrapping_add(1);
    state.last_vsync = Some(timestamp);
    let count = state.vsync_count;

    let consumers: Vec<Arc<EventThreadConnection>> = state
        .connections
        .iter()
        .filter_map(Weak::upgrade)
        .filter(|c| c.take_vsync(count))
        .collect();

    // Callbacks and channel sends happen unlocked; they may call back in.
    MutexGuard::unlocked(state, || {
        if let Some(intercept) = intercept {
            intercept(timestamp);
        }
        for connection in consumers {
            connection.post(DisplayEvent::Vsync { timestamp, count });
        }
    });
}

fn dispatch(state: &ThreadState, event: DisplayEvent) {
    for connection in state.connections.iter().filter_map(Weak::upgrade) {
        let wanted = match event {
            DisplayEvent::ConfigChanged { .. } => {
                connection.config_changed == ConfigChanged::Dispatch
            }
            _ => true,
        };
        if wanted {
            connection.post(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SystemClock;
    use serial_test::serial;
    use std::sync::atomic::AtomicUsize;

    const PERIOD: Nsecs = 2_000_000;

    fn event_thread(
        phase_offset: Nsecs,
        intercept: Option<InterceptVsyncsCallback>,
    ) -> EventThread {
        let disp_sync = Arc::new(DispSync::new("test", PERIOD, false));
        EventThread::new(
            "test-events",
            disp_sync,
            Arc::new(SystemClock::new()),
            phase_offset,
            0,
            intercept,
        )
    }

    #[tokio::test]
    #[serial]
    async fn test_single_request_delivers_one_vsync() {
        let thread = event_thread(0, None);
        let connection = thread.create_event_connection(None, ConfigChanged::Suppress);

        connection.request_next_vsync();
        let event = connection.recv_timeout(Duration::from_secs(1)).await;
        assert!(matches!(event, Some(DisplayEvent::Vsync { count: 1, .. })));
        assert_eq!(connection.vsync_request(), VsyncRequest::None);

        assert!(connection.recv_timeout(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    #[serial]
    async fn test_request_runs_resync_callback() {
        let thread = event_thread(0, None);
        let resyncs = Arc::new(AtomicUsize::new(0));
        let counter = resyncs.clone();
        let connection = thread.create_event_connection(
            Some(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            ConfigChanged::Suppress,
        );

        connection.request_next_vsync();
        connection.request_next_vsync();
        assert_eq!(resyncs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    #[serial]
    async fn test_periodic_rate_skips_vsyncs() {
        let thread = event_thread(0, None);
        let connection = thread.create_event_connection(None, ConfigChanged::Suppress);
        connection.set_vsync_rate(2);

        for _ in 0..3 {
            match connection.recv_timeout(Duration::from_secs(1)).await {
                Some(DisplayEvent::Vsync { count, .. }) => assert_eq!(count % 2, 0),
                other => panic!("unexpected event {:?}", other),
            }
        }
        connection.set_vsync_rate(0);
        assert_eq!(connection.vsync_request(), VsyncRequest::None);
    }

    #[tokio::test]
    #[serial]
    async fn test_phase_offset_shifts_timestamps() {
        let offset = 500_000;
        let thread = event_thread(offset, None);
        let connection = thread.create_event_connection(None, ConfigChanged::Suppress);

        connection.request_next_vsync();
        match connection.recv_timeout(Duration::from_secs(1)).await {
            Some(DisplayEvent::Vsync { timestamp, .. }) => {
                assert_eq!((timestamp - offset).rem_euclid(PERIOD), 0)
            }
            other => panic!("unexpected event {:?}", other),
        }
        thread.set_phase_offset(0);
        assert_eq!(thread.phase_offset(), 0);
    }

    #[tokio::test]
    #[serial]
    async fn test_intercept_sees_vsyncs() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let thread = event_thread(
            0,
            Some(Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        let connection = thread.create_event_connection(None, ConfigChanged::Suppress);

        connection.request_next_vsync();
        assert!(connection.recv_timeout(Duration::from_secs(1)).await.is_some());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[serial]
    async fn test_config_changed_only_to_dispatching_connections() {
        let thread = event_thread(0, None);
        let quiet = thread.create_event_connection(None, ConfigChanged::Suppress);
        let loud = thread.create_event_connection(None, ConfigChanged::Dispatch);

        thread.on_config_changed(DisplayId(0), 1);
        thread.on_hotplug_received(DisplayId(2), true);

        assert_eq!(
            loud.recv_timeout(Duration::from_secs(1)).await,
            Some(DisplayEvent::ConfigChanged {
                display: DisplayId(0),
                config_id: 1
            })
        );
        assert_eq!(
            loud.recv_timeout(Duration::from_secs(1)).await,
            Some(DisplayEvent::Hotplug {
                display: DisplayId(2),
                connected: true
            })
        );
        assert_eq!(
            quiet.recv_timeout(Duration::from_secs(1)).await,
            Some(DisplayEvent::Hotplug {
                display: DisplayId(2),
                connected: true
            })
        );
        assert!(quiet.try_recv().is_none());
    }

    #[tokio::test]
    #[serial]
    async fn test_screen_released_stops_vsync() {
        let thread = event_thread(0, None);
        let connection = thread.create_event_connection(None, ConfigChanged::Suppress);

        thread.on_screen_released();
        connection.request_next_vsync();
        assert!(connection.recv_timeout(Duration::from_millis(30)).await.is_none());

        thread.on_screen_acquired();
        assert!(matches!(
            connection.recv_timeout(Duration::from_secs(1)).await,
            Some(DisplayEvent::Vsync { .. })
        ));
    }

    #[test]
    fn test_threshold_pushes_vsync_too_close_to_last() {
        let disp_sync = DispSync::new("test", 10, false);
        let mut state = ThreadState {
            running: true,
            screen_on: true,
            phase_offset: 0,
            offset_threshold: 2,
            connections: Vec::new(),
            pending_events: VecDeque::new(),
            vsync_count: 1,
            last_vsync: Some(25),
        };

        // 30 is only 5 after the last delivered vsync
        assert_eq!(next_vsync(&state, &disp_sync, 21), Some(40));
        state.last_vsync = Some(21);
        assert_eq!(next_vsync(&state, &disp_sync, 21), Some(30));
    }

    #[test]
    fn test_dropped_connections_are_not_counted() {
        let thread = event_thread(0, None);
        let kept = thread.create_event_connection(None, ConfigChanged::Suppress);
        let dropped = thread.create_event_connection(None, ConfigChanged::Suppress);
        assert_eq!(thread.connection_count(), 2);

        drop(dropped);
        assert_eq!(thread.connection_count(), 1);
        assert!(thread.dump().contains(&format!("connection {}", kept.id())));
    }
}
