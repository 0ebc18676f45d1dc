// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Root-cause identification.
//!
//! A failing rule only dispatches its recovery actions when no rule
//! downstream of it in the dependency graph is also failing. The graph
//! combines explicit parent->child edges with implicit edges through
//! component containment, taken transitively. New edges that would
//! introduce a cycle are refused; cycles that sneak in through forward
//! references are collapsed into a loop domain whose members share
//! root-cause status.

use crate::db::{Db, InstanceKey, ObjId};
use crate::error::{EngineError, EngineResult};
use crate::types::{DiagResult, ObjKind};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Outcome of the root-cause walk for one failing rule.
#[derive(Debug, Clone, Default)]
pub struct RootCauseOutcome {
    /// True when the rule is the root cause and may trigger actions.
    pub is_root: bool,
    /// The failing dependency child that suppressed the trigger.
    pub suppressed_by: Option<String>,
    /// True when immediate test re-runs were queued and the scheduler
    /// needs a wake.
    pub sched_wake: bool,
}

/// Create a dependency edge parent -> child. Both endpoints may be
/// rules or components (or still-unresolved stubs). An edge that would
/// introduce a cycle is discarded with a log.
pub fn depend_create(db: &mut Db, parent: ObjId, child: ObjId) -> EngineResult<()> {
    if parent == child || reachable(db, child).contains(&parent) {
        let parent_name = db.name_of(parent).to_string();
        let child_name = db.name_of(child).to_string();
        warn!(
            parent = %parent_name,
            child = %child_name,
            "dependency would create a cycle, discarded"
        );
        return Err(EngineError::CycleRejected {
            parent: parent_name,
            child: child_name,
        });
    }

    if let Some(obj) = db.obj_mut(parent) {
        if !obj.depend_children.contains(&child) {
            obj.depend_children.push(child);
        }
    }
    if let Some(obj) = db.obj_mut(child) {
        if !obj.depend_parents.contains(&parent) {
            obj.depend_parents.push(parent);
        }
    }
    debug!(
        parent = %db.name_of(parent),
        child = %db.name_of(child),
        "dependency created"
    );
    Ok(())
}

/// Deleting dependencies is accepted but not supported.
pub fn depend_delete(db: &Db, parent: ObjId, child: ObjId) {
    info!(
        parent = %db.name_of(parent),
        child = %db.name_of(child),
        "dependency delete is unsupported, ignored"
    );
}

/// Every node reachable through dependency edges from `from`, with
/// components expanded to their contained rules. `from` itself is only
/// included when a cycle leads back to it.
fn reachable(db: &Db, from: ObjId) -> HashSet<ObjId> {
    let mut seen = HashSet::new();
    let mut work: Vec<ObjId> = successors(db, from);
    while let Some(id) = work.pop() {
        if !seen.insert(id) {
            continue;
        }
        work.extend(successors(db, id));
    }
    seen
}

/// Direct dependency successors of a node: its explicit children, plus
/// its contained rules when it is a component.
fn successors(db: &Db, id: ObjId) -> Vec<ObjId> {
    let Some(obj) = db.obj(id) else {
        return Vec::new();
    };
    let mut next = obj.depend_children.clone();
    if let Some(comp) = obj.as_comp() {
        for &member in &comp.members {
            if db.obj(member).map(|o| o.kind()) == Some(ObjKind::Rule) {
                next.push(member);
            }
        }
    }
    next
}

/// Collapse the cycle through `origin` into a loop domain: every node
/// that both reaches and is reached by the origin shares the domain, so
/// no member suppresses another indefinitely.
fn collapse_loop(db: &mut Db, origin: ObjId, downstream: &HashSet<ObjId>) -> Option<u64> {
    let members: Vec<ObjId> = downstream
        .iter()
        .copied()
        .filter(|&d| d == origin || reachable(db, d).contains(&origin))
        .collect();
    if members.is_empty() {
        return None;
    }

    let existing = db
        .obj(origin)
        .and_then(|o| o.as_rule())
        .and_then(|r| r.loop_domain);
    let domain = match existing {
        Some(domain) => domain,
        None => db.next_loop_domain(),
    };

    info!(
        origin = %db.name_of(origin),
        domain,
        members = members.len(),
        "dependency loop collapsed into loop domain"
    );
    for id in members.iter().chain(std::iter::once(&origin)) {
        if let Some(rule) = db.obj_mut(*id).and_then(|o| o.as_rule_mut()) {
            rule.loop_domain = Some(domain);
        }
    }
    Some(domain)
}

/// Decide whether a failing rule is the root cause. Re-drives the tests
/// feeding every enabled dependency child through the Immediate queue,
/// then checks each child's current verdict; any failing child makes
/// the caller suppress its trigger.
pub fn root_cause_check(db: &mut Db, rule: ObjId, inst: &InstanceKey) -> RootCauseOutcome {
    let mut outcome = RootCauseOutcome {
        is_root: true,
        ..Default::default()
    };

    let downstream = reachable(db, rule);
    if downstream.is_empty() {
        return outcome;
    }

    let domain = if downstream.contains(&rule) {
        collapse_loop(db, rule, &downstream)
    } else {
        db.obj(rule).and_then(|o| o.as_rule()).and_then(|r| r.loop_domain)
    };

    let now = Instant::now();
    for d in downstream {
        if d == rule {
            continue;
        }
        let (is_rule, enabled, d_domain) = match db.obj(d) {
            Some(obj) => (
                obj.kind() == ObjKind::Rule,
                obj.is_enabled(),
                obj.as_rule().and_then(|r| r.loop_domain),
            ),
            None => continue,
        };
        if !is_rule || !enabled {
            continue;
        }
        // Loop-domain members share root-cause status.
        if domain.is_some() && d_domain == domain {
            continue;
        }

        let pair = db.obj(d).map(|o| o.pair_key(inst)).unwrap_or(None);
        outcome.sched_wake |= crate::sched::rule_immediate(db, d, &pair);

        if crate::rules::peek(db, d, &pair, now) == DiagResult::Fail {
            let name = db.name_of(d).to_string();
            debug!(
                rule = %db.name_of(rule),
                failing_child = %name,
                "trigger suppressed, not the root cause"
            );
            outcome.is_root = false;
            outcome.suppressed_by = Some(name);
            break;
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObjState, RuleOp};

    fn rule(db: &mut Db, name: &str, input: Option<ObjId>) -> ObjId {
        let id = db.get_or_create(ObjKind::Rule, name).unwrap();
        db.obj_mut(id).unwrap().base.state = ObjState::Enabled;
        db.obj_mut(id).unwrap().as_rule_mut().unwrap().op = RuleOp::OnFail;
        if let Some(input) = input {
            db.add_rule_input(id, input);
        }
        id
    }

    fn failing_test(db: &mut Db, name: &str) -> ObjId {
        let id = db.get_or_create(ObjKind::Test, name).unwrap();
        db.obj_mut(id).unwrap().base.state = ObjState::Enabled;
        db.obj_mut(id).unwrap().base.set_result(DiagResult::Fail);
        id
    }

    fn passing_test(db: &mut Db, name: &str) -> ObjId {
        let id = db.get_or_create(ObjKind::Test, name).unwrap();
        db.obj_mut(id).unwrap().base.state = ObjState::Enabled;
        db.obj_mut(id).unwrap().base.set_result(DiagResult::Pass);
        id
    }

    #[test]
    fn test_cycle_rejected() {
        let mut db = Db::new();
        let a = rule(&mut db, "a", None);
        let b = rule(&mut db, "b", None);

        depend_create(&mut db, a, b).unwrap();
        let err = depend_create(&mut db, b, a).unwrap_err();
        assert!(matches!(err, EngineError::CycleRejected { .. }));

        // Only the first edge survives.
        assert_eq!(db.obj(a).unwrap().depend_children, vec![b]);
        assert!(db.obj(b).unwrap().depend_children.is_empty());
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut db = Db::new();
        let a = rule(&mut db, "a", None);
        assert!(depend_create(&mut db, a, a).is_err());
    }

    #[test]
    fn test_failing_child_suppresses() {
        let mut db = Db::new();
        let ta = failing_test(&mut db, "ta");
        let tb = failing_test(&mut db, "tb");
        let a = rule(&mut db, "a", Some(ta));
        let b = rule(&mut db, "b", Some(tb));
        depend_create(&mut db, a, b).unwrap();

        let outcome = root_cause_check(&mut db, a, &None);
        assert!(!outcome.is_root);
        assert_eq!(outcome.suppressed_by.as_deref(), Some("b"));

        // B has no failing descendants: it is the root cause.
        let outcome = root_cause_check(&mut db, b, &None);
        assert!(outcome.is_root);
    }

    #[test]
    fn test_passing_child_does_not_suppress() {
        let mut db = Db::new();
        let ta = failing_test(&mut db, "ta");
        let tb = passing_test(&mut db, "tb");
        let a = rule(&mut db, "a", Some(ta));
        let b = rule(&mut db, "b", Some(tb));
        depend_create(&mut db, a, b).unwrap();

        let outcome = root_cause_check(&mut db, a, &None);
        assert!(outcome.is_root);
        assert!(outcome.suppressed_by.is_none());
    }

    #[test]
    fn test_component_expansion() {
        let mut db = Db::new();
        let ta = failing_test(&mut db, "ta");
        let tb = failing_test(&mut db, "tb");
        let a = rule(&mut db, "a", Some(ta));
        let b = rule(&mut db, "b", Some(tb));
        let comp = db.get_or_create(ObjKind::Component, "lower").unwrap();
        db.add_member(comp, b);
        depend_create(&mut db, a, comp).unwrap();

        // Dependency on the component reaches the rule inside it.
        let outcome = root_cause_check(&mut db, a, &None);
        assert!(!outcome.is_root);
        assert_eq!(outcome.suppressed_by.as_deref(), Some("b"));
    }

    #[test]
    fn test_transitive_suppression() {
        let mut db = Db::new();
        let ta = failing_test(&mut db, "ta");
        let tc = failing_test(&mut db, "tc");
        let tb = passing_test(&mut db, "tb");
        let a = rule(&mut db, "a", Some(ta));
        let b = rule(&mut db, "b", Some(tb));
        let c = rule(&mut db, "c", Some(tc));
        depend_create(&mut db, a, b).unwrap();
        depend_create(&mut db, b, c).unwrap();

        // A's failing grandchild c suppresses a even though b passes.
        let outcome = root_cause_check(&mut db, a, &None);
        assert!(!outcome.is_root);
        assert_eq!(outcome.suppressed_by.as_deref(), Some("c"));
    }

    #[test]
    fn test_loop_domain_shares_root_cause() {
        let mut db = Db::new();
        let ta = failing_test(&mut db, "ta");
        let tb = failing_test(&mut db, "tb");
        let a = rule(&mut db, "a", Some(ta));
        let b = rule(&mut db, "b", Some(tb));

        // Wire a loop directly, as forward references can.
        db.obj_mut(a).unwrap().depend_children.push(b);
        db.obj_mut(b).unwrap().depend_parents.push(a);
        db.obj_mut(b).unwrap().depend_children.push(a);
        db.obj_mut(a).unwrap().depend_parents.push(b);

        let outcome = root_cause_check(&mut db, a, &None);
        assert!(outcome.is_root, "loop members are never mutually suppressed");

        let domain_a = db.obj(a).unwrap().as_rule().unwrap().loop_domain;
        let domain_b = db.obj(b).unwrap().as_rule().unwrap().loop_domain;
        assert!(domain_a.is_some());
        assert_eq!(domain_a, domain_b);
    }
}
