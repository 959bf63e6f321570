//! One-shot timer on a background thread
//!
//! Fires `on_reset` when started and whenever it is reset after having
//! expired, and `on_timeout` once per expiry. Resetting while the timer is
//! still counting down only pushes the deadline out.

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub type TimerCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Stopped,
    Reset,
    Waiting,
    Idle,
}

struct Shared {
    state: Mutex<TimerState>,
    condvar: Condvar,
}

pub struct OneShotTimer {
    name: String,
    interval: Duration,
    shared: Arc<Shared>,
    on_reset: Option<TimerCallback>,
    on_timeout: Option<TimerCallback>,
    thread: Option<JoinHandle<()>>,
}

impl OneShotTimer {
    pub fn new(
        name: impl Into<String>,
        interval: Duration,
        on_reset: TimerCallback,
        on_timeout: TimerCallback,
    ) -> Self {
        Self {
            name: name.into(),
            interval,
            shared: Arc::new(Shared {
                state: Mutex::new(TimerState::Stopped),
                condvar: Condvar::new(),
            }),
            on_reset: Some(on_reset),
            on_timeout: Some(on_timeout),
            thread: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Spawns the timer thread; a no-op if already started
    pub fn start(&mut self) {
        if self.thread.is_some() {
            return;
        }
        let (Some(on_reset), Some(on_timeout)) = (self.on_reset.take(), self.on_timeout.take())
        else {
            warn!("Timer {} cannot be restarted after stop", self.name);
            return;
        };

        *self.shared.state.lock() = TimerState::Reset;
        let shared = self.shared.clone();
        let interval = self.interval;
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run(shared, interval, on_reset, on_timeout));

        match spawned {
            Ok(handle) => {
                debug!("Started timer {} ({:?})", self.name, self.interval);
                self.thread = Some(handle);
            }
            Err(e) => {
                warn!("Failed to spawn timer thread {}: {}", self.name, e);
                *self.shared.state.lock() = TimerState::Stopped;
            }
        }
    }

    /// Restarts the countdown
    pub fn reset(&self) {
        let notify = {
            let mut state = self.shared.state.lock();
            if *state == TimerState::Stopped {
                return;
            }
            let was_idle = *state == TimerState::Idle;
            *state = TimerState::Reset;
            was_idle
        };
        if notify {
            self.shared.condvar.notify_all();
        }
    }

    /// Stops the thread and waits for it to exit
    pub fn stop(&mut self) {
        *self.shared.state.lock() = TimerState::Stopped;
        self.shared.condvar.notify_all();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("Timer thread {} panicked", self.name);
            }
            debug!("Stopped timer {}", self.name);
        }
    }
}

impl Drop for OneShotTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    shared: Arc<Shared>,
    interval: Duration,
    on_reset: TimerCallback,
    on_timeout: TimerCallback,
) {
    loop {
        {
            let mut state = shared.state.lock();
            match *state {
                TimerState::Stopped => break,
                TimerState::Idle => {
                    shared.condvar.wait(&mut state);
                    continue;
                }
                _ => {}
            }
        }

        // Reset callback runs unlocked so it may call back into the owner.
        on_reset();

        let expired = {
            let mut state = shared.state.lock();
            if *state == TimerState::Stopped {
                break;
            }
            let mut deadline = Instant::now() + interval;
            *state = TimerState::Waiting;
            loop {
                let now = Instant::now();
                if deadline > now {
                    shared.condvar.wait_for(&mut state, deadline - now);
                }
                match *state {
                    TimerState::Reset => {
                        deadline = Instant::now() + interval;
                        *state = TimerState::Waiting;
                    }
                    TimerState::Waiting if Instant::now() >= deadline => {
                        *state = TimerState::Idle;
                        break true;
                    }
                    TimerState::Stopped => break false,
                    _ => {}
                }
            }
        };

        if expired {
            on_timeout();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_timer(interval: Duration) -> (OneShotTimer, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let resets = Arc::new(AtomicUsize::new(0));
        let timeouts = Arc::new(AtomicUsize::new(0));
        let (r, t) = (resets.clone(), timeouts.clone());
        let timer = OneShotTimer::new(
            "test-timer",
            interval,
            Box::new(move || {
                r.fetch_add(1, Ordering::SeqCst);
            }),
            Box::new(move || {
                t.fetch_add(1, Ordering::SeqCst);
            }),
        );
        (timer, resets, timeouts)
    }

    fn wait_for(counter: &AtomicUsize, value: usize) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if counter.load(Ordering::SeqCst) >= value {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    #[serial]
    fn test_start_fires_reset_then_timeout_once() {
        let (mut timer, resets, timeouts) = counting_timer(Duration::from_millis(20));
        timer.start();

        assert!(wait_for(&timeouts, 1));
        assert_eq!(resets.load(Ordering::SeqCst), 1);

        thread::sleep(Duration::from_millis(60));
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
        timer.stop();
    }

    #[test]
    #[serial]
    fn test_reset_after_expiry_fires_reset_again() {
        let (mut timer, resets, timeouts) = counting_timer(Duration::from_millis(20));
        timer.start();
        assert!(wait_for(&timeouts, 1));

        timer.reset();
        assert!(wait_for(&resets, 2));
        assert!(wait_for(&timeouts, 2));
    }

    #[test]
    #[serial]
    fn test_reset_while_waiting_postpones_expiry() {
        let (mut timer, resets, timeouts) = counting_timer(Duration::from_millis(150));
        timer.start();
        assert!(wait_for(&resets, 1));

        for _ in 0..4 {
            thread::sleep(Duration::from_millis(50));
            timer.reset();
        }
        assert_eq!(timeouts.load(Ordering::SeqCst), 0);
        assert_eq!(resets.load(Ordering::SeqCst), 1);

        assert!(wait_for(&timeouts, 1));
    }

    #[test]
    #[serial]
    fn test_stop_joins_and_silences() {
        let (mut timer, _resets, timeouts) = counting_timer(Duration::from_millis(30));
        timer.start();
        timer.stop();

        thread::sleep(Duration::from_millis(60));
        assert_eq!(timeouts.load(Ordering::SeqCst), 0);
        timer.reset();
        assert_eq!(timer.interval(), Duration::from_millis(30));
    }
}
