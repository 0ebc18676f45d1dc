// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The scheduler: five priority-ordered test queues drained by a single
//! thread waiting on a monotonic wake timer.
//!
//! Fast/Normal/Slow hold tests whose period matches the built-in
//! buckets; User holds custom periods and notification autopass timers
//! ordered by wake time; Immediate is used by root-cause identification
//! to re-drive a failing test now. Queue state is guarded by the DB
//! lock.

use crate::db::{Db, InstanceKey, ObjId, TestKind};
use crate::engine::Shared;
use crate::types::{
    DiagResult, ObjKind, ObjState, PERIOD_FAST_MS, PERIOD_NORMAL_MS, PERIOD_SLOW_MS,
};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Padding added to the wake timer so the head entry is strictly due
/// when the thread wakes.
const WAKE_PADDING: Duration = Duration::from_millis(100);

/// The five scheduler queues, in drain priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestQueue {
    /// Root-cause re-runs; drained first.
    Immediate,
    /// Period == 60 s.
    Fast,
    /// Period == 5 min.
    Normal,
    /// Period == 30 min.
    Slow,
    /// Custom periods and autopass timers, ordered by wake time.
    User,
}

impl TestQueue {
    const ALL: [TestQueue; 5] = [
        TestQueue::Immediate,
        TestQueue::Fast,
        TestQueue::Normal,
        TestQueue::Slow,
        TestQueue::User,
    ];
}

impl fmt::Display for TestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => write!(f, "Immediate"),
            Self::Fast => write!(f, "Fast"),
            Self::Normal => write!(f, "Normal"),
            Self::Slow => write!(f, "Slow"),
            Self::User => write!(f, "User"),
        }
    }
}

/// One queued test instance.
#[derive(Debug, Clone)]
pub struct SchedEntry {
    /// Test object handle.
    pub obj: ObjId,
    /// Instance within the object.
    pub inst: InstanceKey,
    /// Absolute due time.
    pub next_time: Instant,
}

/// A drained entry, tagged with the queue it came from so notification
/// semantics (autopass vs root-cause replay) can be told apart.
#[derive(Debug, Clone)]
pub struct DueTest {
    /// Test object handle.
    pub obj: ObjId,
    /// Instance within the object.
    pub inst: InstanceKey,
    /// Queue the entry was drained from.
    pub queue: TestQueue,
}

/// The scheduler queues. Lives inside [`Db`] so the DB lock guards it.
#[derive(Debug, Default)]
pub struct SchedQueues {
    immediate: VecDeque<SchedEntry>,
    fast: VecDeque<SchedEntry>,
    normal: VecDeque<SchedEntry>,
    slow: VecDeque<SchedEntry>,
    user: VecDeque<SchedEntry>,
}

impl SchedQueues {
    /// Empty queues.
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_mut(&mut self, queue: TestQueue) -> &mut VecDeque<SchedEntry> {
        match queue {
            TestQueue::Immediate => &mut self.immediate,
            TestQueue::Fast => &mut self.fast,
            TestQueue::Normal => &mut self.normal,
            TestQueue::Slow => &mut self.slow,
            TestQueue::User => &mut self.user,
        }
    }

    fn queue(&self, queue: TestQueue) -> &VecDeque<SchedEntry> {
        match queue {
            TestQueue::Immediate => &self.immediate,
            TestQueue::Fast => &self.fast,
            TestQueue::Normal => &self.normal,
            TestQueue::Slow => &self.slow,
            TestQueue::User => &self.user,
        }
    }

    /// Insert an entry. User is kept ordered by wake time; the others
    /// are FIFO since their periods are uniform.
    pub fn insert(&mut self, queue: TestQueue, entry: SchedEntry) {
        let q = self.queue_mut(queue);
        if queue == TestQueue::User {
            let pos = q
                .iter()
                .position(|e| entry.next_time < e.next_time)
                .unwrap_or(q.len());
            q.insert(pos, entry);
        } else {
            q.push_back(entry);
        }
    }

    /// Remove a specific instance from a queue.
    pub fn remove(&mut self, queue: TestQueue, obj: ObjId, inst: &InstanceKey) {
        self.queue_mut(queue)
            .retain(|e| !(e.obj == obj && e.inst == *inst));
    }

    /// Remove every entry for an object, across all queues.
    pub fn remove_object(&mut self, obj: ObjId) {
        for queue in TestQueue::ALL {
            self.queue_mut(queue).retain(|e| e.obj != obj);
        }
    }

    /// Drop every entry from every queue.
    pub fn clear(&mut self) {
        for queue in TestQueue::ALL {
            self.queue_mut(queue).clear();
        }
    }

    /// The earliest due time across all queue heads.
    pub fn next_deadline(&self) -> Option<Instant> {
        TestQueue::ALL
            .iter()
            .filter_map(|q| self.queue(*q).front().map(|e| e.next_time))
            .min()
    }

    /// Total queued entries.
    pub fn len(&self) -> usize {
        TestQueue::ALL.iter().map(|q| self.queue(*q).len()).sum()
    }

    /// True when no entries are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every queued (object, instance) pair, across all queues.
    pub fn entries(&self) -> Vec<(ObjId, InstanceKey)> {
        TestQueue::ALL
            .iter()
            .flat_map(|q| self.queue(*q).iter().map(|e| (e.obj, e.inst.clone())))
            .collect()
    }
}

/// Map a polling period to its queue bucket.
fn bucket_for_period(period_ms: u64) -> TestQueue {
    match period_ms {
        PERIOD_FAST_MS => TestQueue::Fast,
        PERIOD_NORMAL_MS => TestQueue::Normal,
        PERIOD_SLOW_MS => TestQueue::Slow,
        _ => TestQueue::User,
    }
}

/// Enqueue a test instance on the queue matching its period, due one
/// period from now. Notification tests are queued onto User only when
/// autopass is set and the last notified result was Fail. Returns true
/// when the queues changed and the scheduler should be woken.
pub fn add_test(db: &mut Db, obj: ObjId, inst: &InstanceKey, force: bool) -> bool {
    let (queue, period_ms) = {
        let object = match db.obj(obj) {
            Some(o) if o.kind() == ObjKind::Test => o,
            _ => {
                debug!(obj, "ignoring non-test addition to scheduler");
                return false;
            }
        };
        let instance = object.instance(inst);
        if instance.state != ObjState::Enabled {
            debug!(name = %object.name, "ignoring disabled test addition to scheduler");
            return false;
        }
        let test = object.as_test().expect("kind checked above");
        match &test.kind {
            TestKind::Polled { period_ms, .. } => (bucket_for_period(*period_ms), *period_ms),
            TestKind::CompHealth { .. } => (TestQueue::Normal, PERIOD_NORMAL_MS),
            TestKind::Notification { autopass_ms } => match autopass_ms {
                Some(delay) if instance.is_failing() => (TestQueue::User, *delay),
                _ => return false,
            },
        }
    };

    if db.blocked && !force {
        debug!(name = %db.name_of(obj), "scheduler blocked, test not queued");
        return false;
    }

    // A test sits in at most one queue; re-bucketing removes it first.
    // User entries are always re-inserted so the wake-time order holds.
    let prior = db.obj(obj).map(|o| o.instance(inst).sched.queued);
    match prior {
        Some(Some(current)) if current == queue && queue != TestQueue::User => {
            debug!(name = %db.name_of(obj), queue = %queue, "ignoring duplicate scheduler add");
            return false;
        }
        Some(Some(current)) => db.queues.remove(current, obj, inst),
        _ => {}
    }

    let next_time = Instant::now() + Duration::from_millis(period_ms);
    db.queues.insert(
        queue,
        SchedEntry {
            obj,
            inst: inst.clone(),
            next_time,
        },
    );
    if let Some(object) = db.obj_mut(obj) {
        let slot = &mut object.instance_mut(inst).sched;
        slot.queued = Some(queue);
        slot.next_time = Some(next_time);
    }
    debug!(
        name = %db.name_of(obj),
        queue = %queue,
        period_ms,
        "test queued"
    );
    true
}

/// Move a test to the Immediate queue for execution now. Tests already
/// queued immediately and polled tests currently executing are left
/// alone. Returns true when the scheduler should be woken.
pub fn test_immediate(db: &mut Db, obj: ObjId, inst: &InstanceKey) -> bool {
    let (queued, running, polled) = {
        let object = match db.obj(obj) {
            Some(o) if o.kind() == ObjKind::Test => o,
            _ => {
                error!(obj, "immediate request for non-test object");
                return false;
            }
        };
        let instance = object.instance(inst);
        let polled = matches!(
            object.as_test().map(|t| &t.kind),
            Some(TestKind::Polled { .. }) | Some(TestKind::CompHealth { .. })
        );
        (instance.sched.queued, instance.sched.running, polled)
    };

    match queued {
        Some(TestQueue::Immediate) => {
            debug!(name = %db.name_of(obj), "already queued to run immediately");
            return false;
        }
        Some(current) => db.queues.remove(current, obj, inst),
        None => {
            if polled && running {
                debug!(name = %db.name_of(obj), "immediate request dropped, test running");
                return false;
            }
        }
    }

    if db.blocked {
        debug!(name = %db.name_of(obj), "scheduler blocked, immediate request dropped");
        return false;
    }

    let now = Instant::now();
    db.queues.insert(
        TestQueue::Immediate,
        SchedEntry {
            obj,
            inst: inst.clone(),
            next_time: now,
        },
    );
    if let Some(object) = db.obj_mut(obj) {
        let slot = &mut object.instance_mut(inst).sched;
        slot.queued = Some(TestQueue::Immediate);
        slot.next_time = Some(now);
    }
    debug!(name = %db.name_of(obj), "test queued to run immediately");
    true
}

/// Queue every test feeding this rule for immediate execution,
/// recursing through rule inputs. Returns true when anything was
/// queued.
pub fn rule_immediate(db: &mut Db, rule: ObjId, inst: &InstanceKey) -> bool {
    let mut visited = HashSet::new();
    rule_immediate_walk(db, rule, inst, &mut visited)
}

fn rule_immediate_walk(
    db: &mut Db,
    rule: ObjId,
    inst: &InstanceKey,
    visited: &mut HashSet<ObjId>,
) -> bool {
    if !visited.insert(rule) {
        return false;
    }
    let inputs = match db.obj(rule).and_then(|o| o.as_rule()) {
        Some(data) => data.inputs.clone(),
        None => return false,
    };
    let mut woke = false;
    for input in inputs {
        let (kind, pair) = match db.obj(input) {
            Some(o) => (o.kind(), o.pair_key(inst)),
            None => continue,
        };
        match kind {
            ObjKind::Test => woke |= test_immediate(db, input, &pair),
            ObjKind::Rule => woke |= rule_immediate_walk(db, input, &pair, visited),
            _ => {}
        }
    }
    woke
}

/// Remove a test instance from whichever queue holds it.
pub fn remove_test(db: &mut Db, obj: ObjId, inst: &InstanceKey) {
    let queued = db.obj(obj).map(|o| o.instance(inst).sched.queued);
    if let Some(Some(queue)) = queued {
        db.queues.remove(queue, obj, inst);
        if let Some(object) = db.obj_mut(obj) {
            let slot = &mut object.instance_mut(inst).sched;
            slot.queued = None;
            slot.next_time = None;
        }
    }
}

/// Recover the scheduler: clear every queue and re-enqueue all enabled
/// polled tests at their period. Used by the internal self-check when
/// the scheduler desynchronises.
pub fn requeue_all(db: &mut Db) -> bool {
    info!("scheduler recovery: requeueing all enabled polled tests");
    db.blocked = true;
    db.queues.clear();
    for id in db.iter_kind(ObjKind::Test) {
        if let Some(object) = db.obj_mut(id) {
            for instance in object.all_instances_mut() {
                instance.sched.queued = None;
                instance.sched.next_time = None;
            }
        }
    }

    let mut woke = false;
    for id in db.iter_kind(ObjKind::Test) {
        let polled = matches!(
            db.obj(id).and_then(|o| o.as_test()).map(|t| &t.kind),
            Some(TestKind::Polled { .. }) | Some(TestKind::CompHealth { .. })
        );
        if !polled {
            continue;
        }
        let keys: Vec<InstanceKey> = db
            .obj(id)
            .map(|o| o.all_instances().map(|i| i.name.clone()).collect())
            .unwrap_or_default();
        for key in keys {
            woke |= add_test(db, id, &key, true);
        }
    }
    db.blocked = false;
    woke
}

/// Drain every queue head that is due, interleaving across queues
/// round-robin so a long run on a fast queue never starves a slow one.
/// Queue slots are cleared as entries come off.
pub fn pop_due(db: &mut Db, now: Instant) -> Vec<DueTest> {
    let mut due = Vec::new();
    loop {
        let mut found = false;
        for queue in TestQueue::ALL {
            let head_due = db
                .queues
                .queue(queue)
                .front()
                .map(|e| e.next_time <= now)
                .unwrap_or(false);
            if !head_due {
                continue;
            }
            let entry = db
                .queues
                .queue_mut(queue)
                .pop_front()
                .expect("head checked above");
            if let Some(object) = db.obj_mut(entry.obj) {
                let slot = &mut object.instance_mut(&entry.inst).sched;
                slot.queued = None;
                slot.next_time = None;
            }
            due.push(DueTest {
                obj: entry.obj,
                inst: entry.inst,
                queue,
            });
            found = true;
        }
        if !found {
            break;
        }
    }
    due
}

/// Scheduler thread body: wait on the wake timer, drain due tests and
/// hand each to the sequencer through the work dispatcher, then re-arm
/// for the earliest next due time. A quit flag plus one wake guarantees
/// exit within one cycle.
pub(crate) fn run(shared: Arc<Shared>, wake: Receiver<()>) {
    debug!("scheduler thread started");

    while !shared.is_shut_down() {
        let deadline = {
            let db = shared.db.lock();
            if db.blocked {
                None
            } else {
                db.queues.next_deadline()
            }
        };

        match deadline {
            Some(at) => {
                let wait = at.saturating_duration_since(Instant::now()) + WAKE_PADDING;
                match wake.recv_timeout(wait) {
                    Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => {
                if wake.recv().is_err() {
                    break;
                }
            }
        }

        if shared.is_shut_down() {
            break;
        }

        let due = {
            let mut db = shared.db.lock();
            if db.blocked {
                debug!("queues blocked, skipping drain");
                continue;
            }
            pop_due(&mut db, Instant::now())
        };

        for test in due {
            dispatch_due(&shared, test);
        }
    }

    debug!("scheduler thread exited");
}

/// Route one drained entry to the right sequencer entry point on a
/// worker thread.
fn dispatch_due(shared: &Arc<Shared>, test: DueTest) {
    let kind = {
        let db = shared.db.lock();
        match db.obj(test.obj).and_then(|o| o.as_test()) {
            Some(t) => match &t.kind {
                TestKind::Notification { autopass_ms } => Some((true, *autopass_ms)),
                _ => Some((false, None)),
            },
            None => {
                error!(obj = test.obj, "scheduled test no longer exists");
                None
            }
        }
    };
    let Some((notification, autopass)) = kind else {
        return;
    };

    let label = {
        let db = shared.db.lock();
        db.name_of(test.obj).to_string()
    };

    if !notification {
        let sh = shared.clone();
        shared.dispatcher.submit(label, move || {
            crate::seq::from_test(&sh, test.obj, test.inst.clone());
        });
    } else if test.queue == TestQueue::User {
        // Autopass expiry: reset to Pass unless a fresh Fail re-armed
        // the window in the meantime.
        if autopass.is_some() {
            let sh = shared.clone();
            shared.dispatcher.submit(label, move || {
                crate::seq::autopass(&sh, test.obj, test.inst.clone());
            });
        }
    } else {
        // Immediate: a root-cause feedback replay of the last notified
        // result.
        let sh = shared.clone();
        shared.dispatcher.submit(label, move || {
            crate::seq::replay(&sh, test.obj, test.inst.clone());
        });
    }
}

/// Result carried by a notification replay; kept here so the scheduler
/// and sequencer agree on what a missing prior result means.
pub(crate) fn replay_result(last: Option<DiagResult>, value: i64) -> DiagResult {
    match last {
        Some(DiagResult::Value(_)) => DiagResult::Value(value),
        Some(other) => other,
        None => DiagResult::Ignore,
    }
}
