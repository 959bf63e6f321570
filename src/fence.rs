//! Fences: completion signals for GPU and display work
//!
//! A [`Fence`] is a cheaply clonable handle to a signal object. Producers
//! signal it with a timestamp once the work it guards has finished; consumers
//! inspect it without blocking. The invalid fence ([`Fence::no_fence`]) stands
//! for "nothing to wait for".

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_FENCE_ID: AtomicU64 = AtomicU64::new(1);

/// Signal time value for a fence that has not signalled yet
pub const SIGNAL_TIME_PENDING: i64 = i64::MAX;

/// Signal time value for the invalid fence
pub const SIGNAL_TIME_INVALID: i64 = -1;

struct FenceInner {
    id: u64,
    name: String,
    signal_time: Mutex<Option<i64>>,
    parents: Vec<Fence>,
}

/// Shared completion signal
#[derive(Clone, Default)]
pub struct Fence {
    inner: Option<Arc<FenceInner>>,
}

impl Fence {
    /// The invalid fence
    pub fn no_fence() -> Self {
        Self { inner: None }
    }

    /// Creates a new unsignalled fence
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Some(Arc::new(FenceInner {
                id: NEXT_FENCE_ID.fetch_add(1, Ordering::Relaxed),
                name: name.into(),
                signal_time: Mutex::new(None),
                parents: Vec::new(),
            })),
        }
    }

    /// Creates a fence that has already signalled at `timestamp`
    pub fn signalled(name: impl Into<String>, timestamp: i64) -> Self {
        let fence = Self::new(name);
        fence.signal(timestamp);
        fence
    }

    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    /// Unique id of the underlying signal object (0 for the invalid fence)
    pub fn id(&self) -> u64 {
        self.inner.as_ref().map_or(0, |inner| inner.id)
    }

    pub fn name(&self) -> &str {
        self.inner.as_ref().map_or("NO_FENCE", |inner| inner.name.as_str())
    }

    /// Signals the fence; the first signal wins
    pub fn signal(&self, timestamp: i64) {
        if let Some(inner) = &self.inner {
            let mut time = inner.signal_time.lock();
            if time.is_none() {
                *time = Some(timestamp);
            }
        }
    }

    /// Signal time, [`SIGNAL_TIME_PENDING`] or [`SIGNAL_TIME_INVALID`]
    pub fn signal_time(&self) -> i64 {
        let Some(inner) = &self.inner else {
            return SIGNAL_TIME_INVALID;
        };

        if inner.parents.is_empty() {
            let time = *inner.signal_time.lock();
            return time.unwrap_or(SIGNAL_TIME_PENDING);
        }

        // Merged fences signal when the last parent does.
        let mut latest = i64::MIN;
        for parent in &inner.parents {
            let time = parent.signal_time();
            if time == SIGNAL_TIME_PENDING {
                return SIGNAL_TIME_PENDING;
            }
            latest = latest.max(time);
        }
        latest
    }

    pub fn has_signalled(&self) -> bool {
        let time = self.signal_time();
        time != SIGNAL_TIME_PENDING && time != SIGNAL_TIME_INVALID
    }

    /// Same underlying signal object
    pub fn ptr_eq(&self, other: &Fence) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Combines two fences into one that signals once both have
    ///
    /// If either side is invalid the other is returned unchanged.
    pub fn merge(name: impl Into<String>, a: &Fence, b: &Fence) -> Fence {
        match (a.is_valid(), b.is_valid()) {
            (false, false) => Fence::no_fence(),
            (true, false) => a.clone(),
            (false, true) => b.clone(),
            (true, true) => Fence {
                inner: Some(Arc::new(FenceInner {
                    id: NEXT_FENCE_ID.fetch_add(1, Ordering::Relaxed),
                    name: name.into(),
                    signal_time: Mutex::new(None),
                    parents: vec![a.clone(), b.clone()],
                })),
            },
        }
    }

    /// True if `other` is this fence or one of the fences merged into it
    pub fn depends_on(&self, other: &Fence) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        self.inner
            .as_ref()
            .is_some_and(|inner| inner.parents.iter().any(|p| p.depends_on(other)))
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("Fence")
                .field("id", &inner.id)
                .field("name", &inner.name)
                .field("signal_time", &self.signal_time())
                .finish(),
            None => f.write_str("Fence(NO_FENCE)"),
        }
    }
}
