//! Rolling feature tracker for the streaming RMS metric.
//!
//! Keeps the last `N` observations in a fixed-capacity ring and reports
//! the arithmetic mean and **population** standard deviation of whatever
//! the window currently holds.  Storage is stack-allocated; the runtime
//! capacity is bounded by [`MAX_WINDOW_CAPACITY`].

use heapless::Deque;

/// Hard upper bound for the configurable window capacity.
pub const MAX_WINDOW_CAPACITY: usize = 64;

/// Default window capacity (matches the training-time feature derivation).
pub const DEFAULT_WINDOW_CAPACITY: usize = 10;

/// FIFO buffer of the most recent observations.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    buf: Deque<f64, MAX_WINDOW_CAPACITY>,
    capacity: usize,
}

impl RollingWindow {
    /// `capacity` is clamped to `1..=MAX_WINDOW_CAPACITY`.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Deque::new(),
            capacity: capacity.clamp(1, MAX_WINDOW_CAPACITY),
        }
    }

    /// Append a value, evicting the oldest one once the window is full.
    pub fn push(&mut self, value: f64) {
        if self.buf.len() >= self.capacity {
            self.buf.pop_front();
        }
        // Cannot fail: len < capacity <= MAX_WINDOW_CAPACITY after eviction.
        let _ = self.buf.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest-first view of the window contents.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.buf.iter().copied()
    }

    /// (mean, population std) of the current contents; (0, 0) when empty.
    pub fn stats(&self) -> (f64, f64) {
        let n = self.buf.len();
        if n == 0 {
            return (0.0, 0.0);
        }
        let n = n as f64;
        let mean = self.values().sum::<f64>() / n;
        let var = self.values().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        (mean, var.sqrt())
    }
}

/// Owns the rolling window for the distinguished raw metric.
#[derive(Debug, Clone)]
pub struct RollingFeatureTracker {
    window: RollingWindow,
    total_observed: u64,
}

impl RollingFeatureTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: RollingWindow::new(capacity),
            total_observed: 0,
        }
    }

    /// Append `value` and return `(avg, std)` over the updated window.
    ///
    /// The window is never empty after this call, so both statistics are
    /// always well-defined.
    pub fn observe(&mut self, value: f64) -> (f64, f64) {
        self.window.push(value);
        self.total_observed = self.total_observed.saturating_add(1);
        self.window.stats()
    }

    pub fn window(&self) -> &RollingWindow {
        &self.window
    }

    /// Number of `observe` calls since construction.
    pub fn total_observed(&self) -> u64 {
        self.total_observed
    }
}

impl Default for RollingFeatureTracker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}
