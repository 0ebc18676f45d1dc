// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The sequencer: the test -> rule -> action state machine.
//!
//! A test result (from the scheduler, from `notify` or from a root-cause
//! replay) is written to its instance, fanned out to every consuming
//! rule with instance pairing, evaluated, gated through root-cause
//! identification and finally turned into action dispatches and host
//! notifications. All graph work happens under the DB lock; probe and
//! action callouts, hook delivery and action dispatch happen after it
//! is released.

use crate::db::{ActionHandler, Db, InstanceKey, ObjId, TestKind};
use crate::engine::Shared;
use crate::health;
use crate::notify::{
    ActionResultEvent, HookEvent, RuleResultEvent, TestResultEvent, UserAlertEvent,
};
use crate::probe::{ProbeContext, ProbeFn};
use crate::rci;
use crate::rules;
use crate::sched;
use crate::types::{DiagResult, ObjFlags, ObjKind, ObjState, HEALTH_MAX};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// An action dispatch decided under the lock, executed after it.
struct ActionDispatch {
    action: ObjId,
    inst: InstanceKey,
    rule: String,
}

/// Side effects accumulated during one sequencing pass.
#[derive(Default)]
struct Effects {
    events: Vec<HookEvent>,
    actions: Vec<ActionDispatch>,
    sched_wake: bool,
}

enum ProbeSource {
    Callout(Option<ProbeFn>, Option<ProbeContext>),
    Ready(DiagResult),
}

enum Staged {
    Callout(Option<ProbeFn>, Option<ProbeContext>),
    ReadHealth(ObjId),
}

/// Scheduler entry point for polled and component-health tests: run the
/// probe on this worker thread and push the result through the machine.
pub(crate) fn from_test(shared: &Arc<Shared>, obj: ObjId, inst: InstanceKey) {
    let prepared: Option<(String, ProbeSource)> = {
        let mut db = shared.db.lock();

        let staged = match db.obj_mut(obj) {
            Some(object) if object.kind() == ObjKind::Test => {
                let name = object.name.clone();
                let base_ctx = object.base.context.clone();
                let kind = object.as_test().map(|t| t.kind.clone());
                let instance = object.instance_mut(&inst);
                if instance.state != ObjState::Enabled {
                    debug!(test = %name, "skipping run of disabled test");
                    None
                } else if instance.sched.running {
                    debug!(test = %name, "test already running, request dropped");
                    None
                } else {
                    if instance.sched.awaiting {
                        // The previous InProgress run never completed:
                        // count it as an abort and move on.
                        instance.sched.awaiting = false;
                        instance.stats.record(DiagResult::Abort);
                        debug!(test = %name, "in-progress run never completed, recorded abort");
                    }
                    match kind {
                        Some(TestKind::Polled { probe, .. }) => {
                            instance.sched.running = true;
                            let ctx = instance.context.clone().or(base_ctx);
                            Some((name, Staged::Callout(probe, ctx)))
                        }
                        Some(TestKind::CompHealth { comp }) => {
                            instance.sched.running = true;
                            Some((name, Staged::ReadHealth(comp)))
                        }
                        _ => None,
                    }
                }
            }
            _ => None,
        };

        staged.map(|(name, source)| match source {
            Staged::Callout(probe, ctx) => (name, ProbeSource::Callout(probe, ctx)),
            Staged::ReadHealth(comp) => {
                let health = db
                    .obj(comp)
                    .and_then(|o| o.as_comp())
                    .map(|c| c.health)
                    .unwrap_or(HEALTH_MAX);
                (name, ProbeSource::Ready(DiagResult::Value(health)))
            }
        })
    };

    let Some((name, source)) = prepared else {
        return;
    };

    // The callout happens with the lock released so the host may
    // re-enter the API from inside its probe.
    let result = match source {
        ProbeSource::Ready(result) => result,
        ProbeSource::Callout(Some(probe), ctx) => probe(inst.as_deref(), ctx.as_ref()),
        ProbeSource::Callout(None, _) => {
            debug!(test = %name, "polled test has no probe, ignoring run");
            DiagResult::Ignore
        }
    };

    conclude(shared, obj, inst, result, true, true);
}

/// Host notification entry point: a result for a notification test, or
/// the completion of an earlier InProgress run.
pub(crate) fn from_test_notify(
    shared: &Arc<Shared>,
    obj: ObjId,
    inst: InstanceKey,
    result: DiagResult,
) {
    let enabled = {
        let mut db = shared.db.lock();
        match db.obj_mut(obj) {
            Some(object) => {
                let instance = object.instance_mut(&inst);
                instance.sched.awaiting = false;
                instance.state == ObjState::Enabled
            }
            None => false,
        }
    };
    if !enabled {
        debug!("notify for missing or disabled test ignored");
        return;
    }
    conclude(shared, obj, inst, result, true, true);
}

/// Autopass expiry: the notification test resets to Pass unless a fresh
/// Fail re-armed the delay window in the meantime.
pub(crate) fn autopass(shared: &Arc<Shared>, obj: ObjId, inst: InstanceKey) {
    let due = {
        let db = shared.db.lock();
        match db.obj(obj) {
            Some(object) => {
                let instance = object.instance(&inst);
                let armed = matches!(
                    object.as_test().map(|t| &t.kind),
                    Some(TestKind::Notification {
                        autopass_ms: Some(_)
                    })
                );
                armed && instance.state == ObjState::Enabled && instance.is_failing()
            }
            None => false,
        }
    };
    if due {
        debug!("autopass window expired, passing");
        conclude(shared, obj, inst, DiagResult::Pass, true, true);
    }
}

/// Root-cause feedback for a notification test: replay the last
/// notified result through the rules without disturbing the stats.
pub(crate) fn replay(shared: &Arc<Shared>, obj: ObjId, inst: InstanceKey) {
    let last = {
        let db = shared.db.lock();
        db.obj(obj).map(|o| {
            let instance = o.instance(&inst);
            sched::replay_result(instance.last_result, instance.last_value)
        })
    };
    match last {
        Some(result) if result.is_conclusive() => {
            conclude(shared, obj, inst, result, false, false)
        }
        _ => debug!("nothing to replay for immediate notification"),
    }
}

/// Completion callback for an action that earlier returned InProgress.
pub(crate) fn action_complete(
    shared: &Arc<Shared>,
    action: ObjId,
    inst: InstanceKey,
    result: DiagResult,
) {
    let event = {
        let mut db = shared.db.lock();
        let Some(object) = db.obj_mut(action) else {
            return;
        };
        let name = object.name.clone();
        let instance = object.instance_mut(&inst);
        instance.sched.awaiting = false;
        instance.stats.record(result);
        instance.set_result(result);
        HookEvent::Action(ActionResultEvent {
            action: name,
            instance: inst.clone(),
            rule: None,
            result,
        })
    };
    shared.fire_events(vec![event]);
}

/// Common completion path: write the result, update stats and
/// confidence, reschedule, fan out to the rule graph and carry out the
/// decided side effects.
fn conclude(
    shared: &Arc<Shared>,
    obj: ObjId,
    inst: InstanceKey,
    result: DiagResult,
    record_stats: bool,
    resched: bool,
) {
    let mut effects = Effects::default();
    {
        let mut db = shared.db.lock();

        let written = match db.obj_mut(obj) {
            Some(object) => {
                let name = object.name.clone();
                let silent = object.flags.contains(ObjFlags::SILENT);
                let instance = object.instance_mut(&inst);
                instance.sched.running = false;
                if result == DiagResult::InProgress {
                    instance.sched.awaiting = true;
                    Some((name, silent, false))
                } else {
                    if record_stats {
                        instance.stats.record(result);
                    }
                    instance.set_result(result);
                    Some((name, silent, true))
                }
            }
            None => None,
        };

        let Some((name, silent, concluded)) = written else {
            return;
        };

        if concluded {
            if !silent {
                effects.events.push(HookEvent::Test(TestResultEvent {
                    test: name,
                    instance: inst.clone(),
                    result,
                }));
            }
            effects
                .events
                .extend(health::refresh_confidence(&mut db, obj));
        }

        if resched {
            effects.sched_wake |= sched::add_test(&mut db, obj, &inst, false);
        }

        if concluded && result.is_conclusive() {
            fan_out(&mut db, obj, &inst, &mut effects);
        }
    }

    carry_out(shared, effects);
}

/// Evaluate every rule reachable from the updated object, breadth
/// first, pairing instances by name as the wave propagates.
fn fan_out(db: &mut Db, origin: ObjId, origin_inst: &InstanceKey, effects: &mut Effects) {
    let now = Instant::now();
    let mut visited: HashSet<(ObjId, InstanceKey)> = HashSet::new();
    let mut work: VecDeque<(ObjId, InstanceKey)> = VecDeque::new();

    enqueue_consumers(db, origin, origin_inst, &mut work);

    while let Some((rule, rinst)) = work.pop_front() {
        if !visited.insert((rule, rinst.clone())) {
            continue;
        }

        let staged = match db.obj(rule) {
            Some(object) if object.kind() == ObjKind::Rule => {
                if object.instance(&rinst).state != ObjState::Enabled {
                    None
                } else {
                    Some((
                        object.name.clone(),
                        object.flags,
                        object
                            .as_rule()
                            .map(|r| r.severity)
                            .unwrap_or(crate::types::Severity::None),
                    ))
                }
            }
            _ => None,
        };
        let Some((name, flags, severity)) = staged else {
            continue;
        };

        let outcome = rules::evaluate(db, rule, &rinst, now);
        if !outcome.is_conclusive() {
            continue;
        }
        let now_failing = outcome == DiagResult::Fail;

        let prev_failing = {
            let object = db.obj_mut(rule).expect("rule fetched above");
            let instance = object.instance_mut(&rinst);
            let prev = instance.window.last_failing;
            instance.window.last_failing = Some(now_failing);
            if !flags.contains(ObjFlags::NO_RESULT_STATS) {
                instance.stats.record(outcome);
            }
            instance.set_result(outcome);
            prev
        };

        // Health moves on Pass<->Fail boundaries only.
        if prev_failing != Some(now_failing) {
            effects
                .events
                .extend(health::apply_transition(db, rule, now_failing));
        }

        let mut root_cause = false;
        let mut suppressed_by = None;
        if now_failing {
            if flags.contains(ObjFlags::TRIGGER_ALWAYS) {
                root_cause = true;
            } else {
                let rci_outcome = rci::root_cause_check(db, rule, &rinst);
                effects.sched_wake |= rci_outcome.sched_wake;
                root_cause = rci_outcome.is_root;
                suppressed_by = rci_outcome.suppressed_by;
            }

            if root_cause {
                info!(rule = %name, "rule failed as root cause, recovery in progress");
                let actions = db
                    .obj(rule)
                    .and_then(|o| o.as_rule())
                    .map(|r| r.actions.clone())
                    .unwrap_or_default();
                for action in actions {
                    let pair = db.obj(action).map(|o| o.pair_key(&rinst)).unwrap_or(None);
                    effects.actions.push(ActionDispatch {
                        action,
                        inst: pair,
                        rule: name.clone(),
                    });
                }
            } else if let Some(ref by) = suppressed_by {
                debug!(rule = %name, suppressed_by = %by, "trigger suppressed");
            }
        }
        if let Some(object) = db.obj_mut(rule) {
            object.instance_mut(&rinst).suppressed_by = suppressed_by.clone();
        }

        if !flags.contains(ObjFlags::SILENT) {
            effects.events.push(HookEvent::Rule(RuleResultEvent {
                rule: name,
                instance: rinst.clone(),
                result: outcome,
                severity,
                root_cause: now_failing && root_cause,
                suppressed_by,
            }));
        }

        enqueue_consumers(db, rule, &rinst, &mut work);
    }
}

fn enqueue_consumers(
    db: &Db,
    obj: ObjId,
    inst: &InstanceKey,
    work: &mut VecDeque<(ObjId, InstanceKey)>,
) {
    let Some(object) = db.obj(obj) else { return };
    for &consumer in &object.consumers {
        let pair = db.obj(consumer).map(|o| o.pair_key(inst)).unwrap_or(None);
        work.push_back((consumer, pair));
    }
}

/// Fire the deferred notifications and queue the decided actions, with
/// the DB lock released.
fn carry_out(shared: &Arc<Shared>, effects: Effects) {
    shared.fire_events(effects.events);
    for dispatch in effects.actions {
        let label = {
            let db = shared.db.lock();
            db.name_of(dispatch.action).to_string()
        };
        let sh = shared.clone();
        shared.dispatcher.submit(label, move || {
            run_action(&sh, dispatch.action, dispatch.inst.clone(), dispatch.rule.clone());
        });
    }
    if effects.sched_wake {
        shared.wake_scheduler();
    }
}

/// Execute one action on a worker thread: resolve the handler under the
/// lock, call out without it, then record the outcome.
pub(crate) fn run_action(shared: &Arc<Shared>, action: ObjId, inst: InstanceKey, rule: String) {
    let prepared = {
        let db = shared.db.lock();
        match db.obj(action) {
            Some(object) if object.kind() == ObjKind::Action => {
                if object.instance(&inst).state != ObjState::Enabled {
                    debug!(action = %object.name, "action disabled, not dispatched");
                    None
                } else {
                    let handler = object.as_action().and_then(|a| a.handler.clone());
                    let context = object
                        .instance(&inst)
                        .context
                        .clone()
                        .or_else(|| object.base.context.clone());
                    Some((object.name.clone(), handler, context))
                }
            }
            Some(object) => {
                warn!(name = %object.name, "triggered object is not an action");
                None
            }
            None => None,
        }
    };
    let Some((name, handler, context)) = prepared else {
        return;
    };

    let mut alert = None;
    let result = match handler {
        Some(ActionHandler::Host(f)) => f(inst.as_deref(), context.as_ref()),
        Some(ActionHandler::Builtin(builtin)) => {
            if builtin == crate::builtin::ACTION_NOOP {
                DiagResult::Pass
            } else {
                let hooks = shared.hooks.read();
                match &hooks.on_platform_action {
                    Some(hook) => hook(builtin, inst.as_deref()),
                    None => {
                        info!(action = %name, builtin, "no platform hook registered, ignored");
                        DiagResult::Ignore
                    }
                }
            }
        }
        Some(ActionHandler::UserAlert(text)) => {
            let recipient = shared.alert_recipient.lock().clone();
            warn!(action = %name, alert = %text, "user alert raised");
            alert = Some(HookEvent::Alert(UserAlertEvent {
                action: name.clone(),
                text,
                recipient,
            }));
            DiagResult::Pass
        }
        None => {
            debug!(action = %name, "action has no handler, ignored");
            DiagResult::Ignore
        }
    };

    let mut events = Vec::new();
    {
        let mut db = shared.db.lock();
        if let Some(object) = db.obj_mut(action) {
            let instance = object.instance_mut(&inst);
            if result == DiagResult::InProgress {
                instance.sched.awaiting = true;
            } else {
                instance.stats.record(result);
                instance.set_result(result);
            }
        }
    }
    if result != DiagResult::InProgress {
        events.push(HookEvent::Action(ActionResultEvent {
            action: name,
            instance: inst,
            rule: Some(rule),
            result,
        }));
    }
    if let Some(alert) = alert {
        events.push(alert);
    }
    shared.fire_events(events);
}
