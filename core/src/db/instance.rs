// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-instance state: results, stats, temporal rule windows and the
//! scheduler slot.
//!
//! Every object carries a base instance; tests, rules and actions may
//! additionally carry named sub-instances sharing the object template
//! but owning their own context, state and stats. Instance state is only
//! mutated while the DB lock is held.

use crate::probe::ProbeContext;
use crate::sched::TestQueue;
use crate::types::{DiagResult, ObjState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Instant;

/// Number of slots kept in the per-instance result history ring.
pub const HISTORY_SLOTS: usize = 5;

/// Identifies an instance within an object: None is the base instance.
pub type InstanceKey = Option<String>;

/// One slot of the result history ring. Consecutive results of the same
/// kind collapse into a single slot with a bumped count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySlot {
    /// When the most recent result of this run landed.
    pub at: DateTime<Utc>,
    /// Result kind recorded.
    pub result: DiagResult,
    /// How many consecutive results of this kind were seen.
    pub count: u32,
    /// Value carried by the most recent result.
    pub value: i64,
}

/// Run counters and the bounded result history for one instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    /// Total runs attempted.
    pub runs: u64,
    /// Runs that concluded Pass.
    pub passes: u64,
    /// Runs that concluded Fail.
    pub failures: u64,
    /// Runs that aborted.
    pub aborts: u64,
    /// Ring of the last few distinct results.
    pub history: VecDeque<HistorySlot>,
}

impl Stats {
    /// Record a completed run.
    pub fn record(&mut self, result: DiagResult) {
        self.runs += 1;
        match result {
            DiagResult::Pass => self.passes += 1,
            DiagResult::Fail => self.failures += 1,
            DiagResult::Abort => self.aborts += 1,
            _ => {}
        }

        let value = result.value();
        if let Some(last) = self.history.back_mut() {
            if last.result.kind_eq(result) {
                last.count += 1;
                last.at = Utc::now();
                last.value = value;
                return;
            }
        }
        self.history.push_back(HistorySlot {
            at: Utc::now(),
            result,
            count: 1,
            value,
        });
        while self.history.len() > HISTORY_SLOTS {
            self.history.pop_front();
        }
    }
}

/// Scheduler bookkeeping for a test instance. A polled test appears in
/// at most one queue at any moment.
#[derive(Debug, Clone, Default)]
pub struct SchedSlot {
    /// Which queue currently holds this instance, if any.
    pub queued: Option<TestQueue>,
    /// Absolute wake time while queued.
    pub next_time: Option<Instant>,
    /// A probe is executing right now; immediate requests are dropped.
    pub running: bool,
    /// An InProgress run is awaiting `notify`/`action_complete`.
    pub awaiting: bool,
}

/// Temporal state consumed by the windowed rule operators.
#[derive(Debug, Clone, Default)]
pub struct RuleWindow {
    /// Consecutive input fails (NInRow).
    pub consecutive_fails: u32,
    /// Cumulative input fails since creation (NEver).
    pub total_fails: u64,
    /// Ring of the last m input outcomes, true = failed (NInM).
    pub ring: VecDeque<bool>,
    /// Timestamps of recent input fails (NInTimeM).
    pub fail_times: VecDeque<Instant>,
    /// Start of the current continuous failure (FailForTimeN).
    pub fail_since: Option<Instant>,
    /// Previous conclusive outcome, true = failing. Drives the health
    /// boundary detection.
    pub last_failing: Option<bool>,
}

impl RuleWindow {
    /// Feed one input observation into every window.
    pub fn observe(&mut self, failed: bool, ring_cap: usize, now: Instant) {
        if failed {
            self.consecutive_fails += 1;
            self.total_fails += 1;
            self.fail_times.push_back(now);
            if self.fail_since.is_none() {
                self.fail_since = Some(now);
            }
        } else {
            self.consecutive_fails = 0;
            self.fail_since = None;
        }

        if ring_cap > 0 {
            self.ring.push_back(failed);
            while self.ring.len() > ring_cap {
                self.ring.pop_front();
            }
        }
    }

    /// Drop fail timestamps older than the given horizon.
    pub fn prune_fail_times(&mut self, horizon: std::time::Duration, now: Instant) {
        while let Some(front) = self.fail_times.front() {
            if now.duration_since(*front) > horizon {
                self.fail_times.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Per-instance state. The base instance carries the object's own state;
/// named sub-instances replicate the template's default state at
/// creation and then evolve independently.
#[derive(Clone)]
pub struct Instance {
    /// Instance name; None for the base instance.
    pub name: InstanceKey,
    /// Lifecycle state.
    pub state: ObjState,
    /// Run counters and history.
    pub stats: Stats,
    /// Most recent conclusive result.
    pub last_result: Option<DiagResult>,
    /// Value carried by the most recent result.
    pub last_value: i64,
    /// Opaque host context for this instance.
    pub context: Option<ProbeContext>,
    /// Scheduler slot.
    pub sched: SchedSlot,
    /// Temporal operator state.
    pub window: RuleWindow,
    /// Name of the dependency child that suppressed the last trigger.
    pub suppressed_by: Option<String>,
}

impl Instance {
    /// New instance in the given starting state.
    pub fn new(name: InstanceKey, state: ObjState) -> Self {
        Self {
            name,
            state,
            stats: Stats::default(),
            last_result: None,
            last_value: 0,
            context: None,
            sched: SchedSlot::default(),
            window: RuleWindow::default(),
            suppressed_by: None,
        }
    }

    /// True when the last conclusive result was Fail.
    pub fn is_failing(&self) -> bool {
        matches!(self.last_result, Some(DiagResult::Fail))
    }

    /// Record the most recent result, value included.
    pub fn set_result(&mut self, result: DiagResult) {
        self.last_result = Some(result);
        self.last_value = result.value();
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("last_result", &self.last_result)
            .field("queued", &self.sched.queued)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_history_collapses_same_kind() {
        let mut stats = Stats::default();
        stats.record(DiagResult::Pass);
        stats.record(DiagResult::Pass);
        stats.record(DiagResult::Fail);

        assert_eq!(stats.runs, 3);
        assert_eq!(stats.passes, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.history.len(), 2);
        assert_eq!(stats.history[0].count, 2);
    }

    #[test]
    fn test_stats_history_is_bounded() {
        let mut stats = Stats::default();
        for i in 0..20 {
            let result = if i % 2 == 0 {
                DiagResult::Pass
            } else {
                DiagResult::Fail
            };
            stats.record(result);
        }
        assert_eq!(stats.history.len(), HISTORY_SLOTS);
    }

    #[test]
    fn test_window_consecutive_reset() {
        let mut window = RuleWindow::default();
        let now = Instant::now();
        window.observe(true, 0, now);
        window.observe(true, 0, now);
        assert_eq!(window.consecutive_fails, 2);
        window.observe(false, 0, now);
        assert_eq!(window.consecutive_fails, 0);
        assert_eq!(window.total_fails, 2);
        assert!(window.fail_since.is_none());
    }

    #[test]
    fn test_window_ring_capacity() {
        let mut window = RuleWindow::default();
        let now = Instant::now();
        for _ in 0..10 {
            window.observe(true, 4, now);
        }
        assert_eq!(window.ring.len(), 4);
    }
}
