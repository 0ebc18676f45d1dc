// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Severity-weighted component health aggregation.
//!
//! Health moves only on Pass<->Fail boundaries of contained rules, by
//! the severity magnitude, clamped to [0, 1000]. Updates happen
//! synchronously under the DB lock; the resulting notification events
//! are returned for delivery after the lock is released.

use crate::db::{Db, ObjId};
use crate::notify::{ComponentHealthEvent, HookEvent};
use crate::types::{DiagResult, ObjFlags, ObjKind, HEALTH_MAX};
use tracing::debug;

/// Apply a rule's Pass->Fail or Fail->Pass boundary to every component
/// containing it. Rules flagged `NO_RESULT_STATS` or `SILENT` do not
/// contribute.
pub fn apply_transition(db: &mut Db, rule: ObjId, now_failing: bool) -> Vec<HookEvent> {
    let (severity, flags, owners) = match db.obj(rule) {
        Some(obj) => match obj.as_rule() {
            Some(data) => (data.severity, obj.flags, obj.member_of.clone()),
            None => return Vec::new(),
        },
        None => return Vec::new(),
    };
    if flags.contains(ObjFlags::NO_RESULT_STATS) || flags.contains(ObjFlags::SILENT) {
        return Vec::new();
    }

    let delta = if now_failing {
        -severity.magnitude()
    } else {
        severity.magnitude()
    };

    let mut events = Vec::new();
    for comp in owners {
        let Some(object) = db.obj_mut(comp) else {
            continue;
        };
        if object.kind() != ObjKind::Component {
            continue;
        }
        let name = object.name.clone();
        let Some(data) = object.as_comp_mut() else {
            continue;
        };
        data.health = (data.health + delta).clamp(0, HEALTH_MAX);
        data.tally.shift(severity, now_failing);
        debug!(component = %name, health = data.health, "component health updated");
        events.push(HookEvent::Health(ComponentHealthEvent {
            component: name,
            health: data.health,
            confidence: data.confidence,
        }));
    }
    events
}

/// Recompute the confidence of every component containing this test:
/// 1000 scaled down by the share of member tests currently sitting in
/// Abort/Ignore.
pub fn refresh_confidence(db: &mut Db, test: ObjId) -> Vec<HookEvent> {
    let owners = match db.obj(test) {
        Some(obj) => obj.member_of.clone(),
        None => return Vec::new(),
    };

    let mut events = Vec::new();
    for comp in owners {
        let members = match db.obj(comp).and_then(|o| o.as_comp()) {
            Some(data) => data.members.clone(),
            None => continue,
        };

        let mut tests = 0i64;
        let mut dark = 0i64;
        for member in members {
            let Some(obj) = db.obj(member) else { continue };
            if obj.kind() != ObjKind::Test {
                continue;
            }
            tests += 1;
            let excluded = obj.all_instances().any(|i| {
                matches!(
                    i.last_result,
                    Some(DiagResult::Abort) | Some(DiagResult::Ignore)
                )
            });
            if excluded {
                dark += 1;
            }
        }

        let confidence = if tests == 0 {
            HEALTH_MAX
        } else {
            HEALTH_MAX * (tests - dark) / tests
        };

        let Some(object) = db.obj_mut(comp) else {
            continue;
        };
        let name = object.name.clone();
        let Some(data) = object.as_comp_mut() else {
            continue;
        };
        if data.confidence != confidence {
            data.confidence = confidence;
            events.push(HookEvent::Health(ComponentHealthEvent {
                component: name,
                health: data.health,
                confidence,
            }));
        }
    }
    events
}
