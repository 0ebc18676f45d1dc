// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! CPU self-throttling for the worker pool.
//!
//! The meter tracks the pool's own busy time over the last minute and
//! converts it into a delay inserted before each job step once the
//! usage crosses the warn threshold. Thresholds are expressed in tenths
//! of a percent of one core. Readers take no lock on the hot path;
//! stale values are acceptable.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

/// Default warn threshold: 5.0% CPU, in tenths of a percent.
pub const CPU_WARN_DEFAULT: i64 = 50;

/// Default high threshold: 10.0% CPU, in tenths of a percent.
pub const CPU_HIGH_DEFAULT: i64 = 100;

/// Delay applied right at the high threshold, in milliseconds.
pub const HIGH_DELAY_MS: i64 = 1000;

/// Ceiling on the computed delay, in milliseconds.
pub const MAX_DELAY_MS: i64 = 5000;

/// Sliding window the busy time is measured over.
const CPU_WINDOW: Duration = Duration::from_secs(60);

/// Aggregate CPU meter for the worker pool.
pub struct CpuMeter {
    bursts: Mutex<VecDeque<(Instant, Duration)>>,
    warn: AtomicI64,
    high: AtomicI64,
    delay_ms: AtomicI64,
}

impl CpuMeter {
    /// New meter with the given thresholds in tenths of a percent.
    pub fn new(warn: i64, high: i64) -> Self {
        Self {
            bursts: Mutex::new(VecDeque::new()),
            warn: AtomicI64::new(warn),
            high: AtomicI64::new(high),
            delay_ms: AtomicI64::new(0),
        }
    }

    /// Record a completed busy burst.
    pub fn record(&self, busy: Duration) {
        let mut bursts = self.bursts.lock();
        let now = Instant::now();
        bursts.push_back((now, busy));
        Self::prune(&mut bursts, now);
    }

    /// Pool CPU over the last minute in tenths of a percent of one core.
    pub fn cpu_tenths(&self) -> i64 {
        let mut bursts = self.bursts.lock();
        let now = Instant::now();
        Self::prune(&mut bursts, now);
        let busy: Duration = bursts.iter().map(|(_, d)| *d).sum();
        (busy.as_millis() as i64 * 1000) / CPU_WINDOW.as_millis() as i64
    }

    /// Recompute the throttle delay from the current usage:
    /// `clamp(HIGH_DELAY * (cpu - warn) / (high - warn), 0, MAX_DELAY)`.
    /// Below warn, or with unusable thresholds, the delay is zero.
    pub fn recalculate(&self) {
        let warn = self.warn.load(Ordering::Relaxed);
        let high = self.high.load(Ordering::Relaxed);
        let delay = if warn > 0 && high > warn {
            let cpu = self.cpu_tenths();
            if cpu > warn {
                (HIGH_DELAY_MS * (cpu - warn) / (high - warn)).clamp(0, MAX_DELAY_MS)
            } else {
                0
            }
        } else {
            0
        };
        self.delay_ms.store(delay, Ordering::Relaxed);
    }

    /// The delay to insert before the next job step, if any.
    pub fn current_delay(&self) -> Option<Duration> {
        match self.delay_ms.load(Ordering::Relaxed) {
            d if d > 0 => Some(Duration::from_millis(d as u64)),
            _ => None,
        }
    }

    /// Update the thresholds, in tenths of a percent. Invoked when the
    /// host reconfigures the internal throttle rules.
    pub fn set_thresholds(&self, warn: i64, high: i64) {
        self.warn.store(warn, Ordering::Relaxed);
        self.high.store(high, Ordering::Relaxed);
    }

    /// Currently configured warn threshold.
    pub fn warn_threshold(&self) -> i64 {
        self.warn.load(Ordering::Relaxed)
    }

    /// Currently configured high threshold.
    pub fn high_threshold(&self) -> i64 {
        self.high.load(Ordering::Relaxed)
    }

    fn prune(bursts: &mut VecDeque<(Instant, Duration)>, now: Instant) {
        while let Some((at, _)) = bursts.front() {
            if now.duration_since(*at) > CPU_WINDOW {
                bursts.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for CpuMeter {
    fn default() -> Self {
        Self::new(CPU_WARN_DEFAULT, CPU_HIGH_DEFAULT)
    }
}
