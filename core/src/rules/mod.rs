// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Rule operator evaluation.
//!
//! Inputs are gathered in insertion order with same-named instance
//! pairing; Abort/Ignore inputs are excluded, and a rule whose inputs
//! are all excluded is itself Ignore. Value-consuming operators see 0
//! for Pass inputs. The temporal operators feed on raw input failures,
//! so a Pass -> Value -> Pass sequence never double-counts.

use crate::db::{Db, InstanceKey, ObjId, RuleData};
use crate::types::{DiagResult, RuleOp};
use std::time::{Duration, Instant};

/// One usable input observation.
#[derive(Debug, Clone, Copy)]
struct InputVal {
    failed: bool,
    value: i64,
}

/// Gather the rule's inputs in insertion order. Returns None when the
/// rule has inputs configured but none produced a usable result.
fn gather(db: &Db, data: &RuleData, inst: &InstanceKey) -> Option<Vec<InputVal>> {
    let mut vals = Vec::with_capacity(data.inputs.len());
    let mut excluded = 0usize;
    for &input in &data.inputs {
        let result = match db.obj(input) {
            Some(obj) => obj.gathered_result(&obj.pair_key(inst)),
            None => None,
        };
        match result {
            Some(DiagResult::Pass) => vals.push(InputVal {
                failed: false,
                value: 0,
            }),
            Some(DiagResult::Fail) => vals.push(InputVal {
                failed: true,
                value: 0,
            }),
            Some(DiagResult::Value(v)) => vals.push(InputVal {
                failed: false,
                value: v,
            }),
            _ => excluded += 1,
        }
    }
    if vals.is_empty() && excluded > 0 {
        None
    } else {
        Some(vals)
    }
}

/// Instantaneous verdict of the non-temporal part of an operator, true
/// meaning failing. Fail inputs always count as failing for the value
/// predicates.
fn instant_failing(op: RuleOp, n: i64, m: i64, inputs: &[InputVal]) -> bool {
    let any_failed = inputs.iter().any(|i| i.failed);
    match op {
        RuleOp::OnFail => any_failed,
        RuleOp::Disable => false,
        RuleOp::EqualToN => any_failed || inputs.iter().any(|i| !i.failed && i.value == n),
        RuleOp::NotEqualToN => any_failed || inputs.iter().any(|i| !i.failed && i.value != n),
        RuleOp::LessThanN => any_failed || inputs.iter().any(|i| !i.failed && i.value < n),
        RuleOp::GreaterThanN => any_failed || inputs.iter().any(|i| !i.failed && i.value > n),
        RuleOp::RangeNToM => {
            any_failed || inputs.iter().any(|i| !i.failed && n <= i.value && i.value <= m)
        }
        // Pass iff any input passed.
        RuleOp::Or => inputs.iter().all(|i| i.failed),
        // Pass iff every input passed.
        RuleOp::And => any_failed,
        // Temporal operators key off raw input failures.
        RuleOp::NEver
        | RuleOp::NInRow
        | RuleOp::NInM
        | RuleOp::NInTimeM
        | RuleOp::FailForTimeN => any_failed,
    }
}

/// Whether the operand pair is usable for this operator.
fn operands_valid(op: RuleOp, n: i64, m: i64) -> bool {
    match op {
        RuleOp::NEver | RuleOp::NInRow | RuleOp::FailForTimeN => n > 0,
        RuleOp::NInM => n > 0 && m > 0 && n <= m,
        RuleOp::NInTimeM => n > 0 && m > 0,
        _ => true,
    }
}

/// Outcome with an empty configured input set: the logical combinators
/// have defined identities, everything else sees no failure.
fn empty_outcome(op: RuleOp) -> DiagResult {
    match op {
        RuleOp::Or => DiagResult::Fail,
        _ => DiagResult::Pass,
    }
}

/// Evaluate a rule instance, advancing its temporal windows. The DB
/// lock must be held.
pub fn evaluate(db: &mut Db, rule: ObjId, inst: &InstanceKey, now: Instant) -> DiagResult {
    let data = match db.obj(rule).and_then(|o| o.as_rule()) {
        Some(d) => d.clone(),
        None => return DiagResult::Ignore,
    };
    if !operands_valid(data.op, data.n, data.m) {
        return DiagResult::Ignore;
    }
    if data.inputs.is_empty() {
        return empty_outcome(data.op);
    }
    let Some(inputs) = gather(db, &data, inst) else {
        return DiagResult::Ignore;
    };

    let raw_fail = inputs.iter().any(|i| i.failed);
    let ring_cap = if data.op == RuleOp::NInM {
        data.m.max(0) as usize
    } else {
        0
    };
    {
        let object = db.obj_mut(rule).expect("rule fetched above");
        let window = &mut object.instance_mut(inst).window;
        window.observe(raw_fail, ring_cap, now);
        if data.op == RuleOp::NInTimeM {
            window.prune_fail_times(Duration::from_millis(data.m.max(0) as u64), now);
        }
    }

    let failing = verdict(db, rule, inst, &data, &inputs, now);
    if failing {
        DiagResult::Fail
    } else {
        DiagResult::Pass
    }
}

/// Evaluate a rule instance against its current inputs and window state
/// without mutating anything. Used by root-cause identification.
pub fn peek(db: &Db, rule: ObjId, inst: &InstanceKey, now: Instant) -> DiagResult {
    let data = match db.obj(rule).and_then(|o| o.as_rule()) {
        Some(d) => d.clone(),
        None => return DiagResult::Ignore,
    };
    if !operands_valid(data.op, data.n, data.m) {
        return DiagResult::Ignore;
    }
    if data.inputs.is_empty() {
        return empty_outcome(data.op);
    }
    let Some(inputs) = gather(db, &data, inst) else {
        return DiagResult::Ignore;
    };
    if verdict(db, rule, inst, &data, &inputs, now) {
        DiagResult::Fail
    } else {
        DiagResult::Pass
    }
}

/// Final failing verdict combining the instantaneous predicate with the
/// current temporal window state.
fn verdict(
    db: &Db,
    rule: ObjId,
    inst: &InstanceKey,
    data: &RuleData,
    inputs: &[InputVal],
    now: Instant,
) -> bool {
    let window = &db.obj(rule).expect("rule exists").instance(inst).window;
    match data.op {
        RuleOp::NEver => window.total_fails >= data.n as u64,
        RuleOp::NInRow => window.consecutive_fails >= data.n as u32,
        RuleOp::NInM => window.ring.iter().filter(|&&f| f).count() >= data.n as usize,
        RuleOp::NInTimeM => {
            let horizon = Duration::from_millis(data.m as u64);
            window
                .fail_times
                .iter()
                .filter(|&&at| now.duration_since(at) <= horizon)
                .count()
                >= data.n as usize
        }
        RuleOp::FailForTimeN => window
            .fail_since
            .map(|since| now.duration_since(since) >= Duration::from_millis(data.n as u64))
            .unwrap_or(false),
        op => instant_failing(op, data.n, data.m, inputs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ObjVariant, TestData, TestKind};
    use crate::types::{ObjKind, ObjState};

    fn test_obj(db: &mut Db, name: &str) -> ObjId {
        let id = db.get_or_create(ObjKind::Test, name).unwrap();
        let object = db.obj_mut(id).unwrap();
        object.variant = ObjVariant::Test(TestData {
            kind: TestKind::Notification { autopass_ms: None },
        });
        object.base.state = ObjState::Enabled;
        id
    }

    fn rule_obj(db: &mut Db, name: &str, op: RuleOp, n: i64, m: i64, inputs: &[ObjId]) -> ObjId {
        let id = db.get_or_create(ObjKind::Rule, name).unwrap();
        {
            let data = db.obj_mut(id).unwrap().as_rule_mut().unwrap();
            data.op = op;
            data.n = n;
            data.m = m;
        }
        for &input in inputs {
            db.add_rule_input(id, input);
        }
        db.obj_mut(id).unwrap().base.state = ObjState::Enabled;
        id
    }

    fn feed(db: &mut Db, test: ObjId, result: DiagResult) {
        db.obj_mut(test).unwrap().base.set_result(result);
    }

    #[test]
    fn test_on_fail_any_input() {
        let mut db = Db::new();
        let a = test_obj(&mut db, "a");
        let b = test_obj(&mut db, "b");
        let r = rule_obj(&mut db, "r", RuleOp::OnFail, 0, 0, &[a, b]);

        feed(&mut db, a, DiagResult::Pass);
        feed(&mut db, b, DiagResult::Pass);
        assert_eq!(evaluate(&mut db, r, &None, Instant::now()), DiagResult::Pass);

        feed(&mut db, b, DiagResult::Fail);
        assert_eq!(evaluate(&mut db, r, &None, Instant::now()), DiagResult::Fail);
    }

    #[test]
    fn test_thresholds() {
        let mut db = Db::new();
        let t = test_obj(&mut db, "t");
        let lt = rule_obj(&mut db, "lt", RuleOp::LessThanN, 20, 0, &[t]);
        let gt = rule_obj(&mut db, "gt", RuleOp::GreaterThanN, 20, 0, &[t]);
        let eq = rule_obj(&mut db, "eq", RuleOp::EqualToN, 20, 0, &[t]);
        let range = rule_obj(&mut db, "range", RuleOp::RangeNToM, 10, 20, &[t]);

        feed(&mut db, t, DiagResult::Value(20));
        let now = Instant::now();
        assert_eq!(evaluate(&mut db, lt, &None, now), DiagResult::Pass);
        assert_eq!(evaluate(&mut db, gt, &None, now), DiagResult::Pass);
        assert_eq!(evaluate(&mut db, eq, &None, now), DiagResult::Fail);
        assert_eq!(evaluate(&mut db, range, &None, now), DiagResult::Fail);

        feed(&mut db, t, DiagResult::Value(9));
        assert_eq!(evaluate(&mut db, lt, &None, now), DiagResult::Fail);
        assert_eq!(evaluate(&mut db, range, &None, now), DiagResult::Pass);

        // A Pass input is a value of 0 for the value operators.
        feed(&mut db, t, DiagResult::Pass);
        assert_eq!(evaluate(&mut db, lt, &None, now), DiagResult::Fail);
    }

    #[test]
    fn test_and_or_identities() {
        let mut db = Db::new();
        let and_empty = rule_obj(&mut db, "and-empty", RuleOp::And, 0, 0, &[]);
        let or_empty = rule_obj(&mut db, "or-empty", RuleOp::Or, 0, 0, &[]);

        let now = Instant::now();
        assert_eq!(evaluate(&mut db, and_empty, &None, now), DiagResult::Pass);
        assert_eq!(evaluate(&mut db, or_empty, &None, now), DiagResult::Fail);
    }

    #[test]
    fn test_and_or_combining() {
        let mut db = Db::new();
        let a = test_obj(&mut db, "a");
        let b = test_obj(&mut db, "b");
        let and = rule_obj(&mut db, "and", RuleOp::And, 0, 0, &[a, b]);
        let or = rule_obj(&mut db, "or", RuleOp::Or, 0, 0, &[a, b]);

        feed(&mut db, a, DiagResult::Pass);
        feed(&mut db, b, DiagResult::Fail);
        let now = Instant::now();
        assert_eq!(evaluate(&mut db, and, &None, now), DiagResult::Fail);
        assert_eq!(evaluate(&mut db, or, &None, now), DiagResult::Pass);

        feed(&mut db, a, DiagResult::Fail);
        assert_eq!(evaluate(&mut db, or, &None, now), DiagResult::Fail);
    }

    #[test]
    fn test_n_in_row_and_value_reset() {
        let mut db = Db::new();
        let t = test_obj(&mut db, "t");
        let r = rule_obj(&mut db, "r", RuleOp::NInRow, 3, 0, &[t]);

        let now = Instant::now();
        for _ in 0..2 {
            feed(&mut db, t, DiagResult::Fail);
            assert_eq!(evaluate(&mut db, r, &None, now), DiagResult::Pass);
        }
        // A conclusive non-fail resets the run.
        feed(&mut db, t, DiagResult::Value(7));
        assert_eq!(evaluate(&mut db, r, &None, now), DiagResult::Pass);

        for _ in 0..2 {
            feed(&mut db, t, DiagResult::Fail);
            evaluate(&mut db, r, &None, now);
        }
        feed(&mut db, t, DiagResult::Fail);
        assert_eq!(evaluate(&mut db, r, &None, now), DiagResult::Fail);
    }

    #[test]
    fn test_n_ever_is_cumulative() {
        let mut db = Db::new();
        let t = test_obj(&mut db, "t");
        let r = rule_obj(&mut db, "r", RuleOp::NEver, 2, 0, &[t]);

        let now = Instant::now();
        feed(&mut db, t, DiagResult::Fail);
        assert_eq!(evaluate(&mut db, r, &None, now), DiagResult::Pass);
        feed(&mut db, t, DiagResult::Pass);
        assert_eq!(evaluate(&mut db, r, &None, now), DiagResult::Pass);
        feed(&mut db, t, DiagResult::Fail);
        assert_eq!(evaluate(&mut db, r, &None, now), DiagResult::Fail);
        // Stays failed once the cumulative count is reached.
        feed(&mut db, t, DiagResult::Pass);
        assert_eq!(evaluate(&mut db, r, &None, now), DiagResult::Fail);
    }

    #[test]
    fn test_n_in_m_window() {
        let mut db = Db::new();
        let t = test_obj(&mut db, "t");
        let r = rule_obj(&mut db, "r", RuleOp::NInM, 2, 3, &[t]);

        let now = Instant::now();
        for result in [DiagResult::Fail, DiagResult::Pass, DiagResult::Pass] {
            feed(&mut db, t, result);
            assert_eq!(evaluate(&mut db, r, &None, now), DiagResult::Pass);
        }
        feed(&mut db, t, DiagResult::Fail);
        assert_eq!(evaluate(&mut db, r, &None, now), DiagResult::Pass);
        feed(&mut db, t, DiagResult::Fail);
        assert_eq!(evaluate(&mut db, r, &None, now), DiagResult::Fail);
    }

    #[test]
    fn test_n_in_m_misconfigured_is_ignore() {
        let mut db = Db::new();
        let t = test_obj(&mut db, "t");
        let r = rule_obj(&mut db, "r", RuleOp::NInM, 5, 3, &[t]);

        feed(&mut db, t, DiagResult::Fail);
        assert_eq!(
            evaluate(&mut db, r, &None, Instant::now()),
            DiagResult::Ignore
        );
    }

    #[test]
    fn test_fail_for_time() {
        let mut db = Db::new();
        let t = test_obj(&mut db, "t");
        let r = rule_obj(&mut db, "r", RuleOp::FailForTimeN, 50, 0, &[t]);

        let start = Instant::now();
        feed(&mut db, t, DiagResult::Fail);
        assert_eq!(evaluate(&mut db, r, &None, start), DiagResult::Pass);

        // Still failing 60 ms later.
        feed(&mut db, t, DiagResult::Fail);
        let later = start + Duration::from_millis(60);
        assert_eq!(evaluate(&mut db, r, &None, later), DiagResult::Fail);

        // Recovery clears the continuous-failure clock.
        feed(&mut db, t, DiagResult::Pass);
        assert_eq!(evaluate(&mut db, r, &None, later), DiagResult::Pass);
    }

    #[test]
    fn test_n_in_time_m() {
        let mut db = Db::new();
        let t = test_obj(&mut db, "t");
        let r = rule_obj(&mut db, "r", RuleOp::NInTimeM, 2, 100, &[t]);

        let start = Instant::now();
        feed(&mut db, t, DiagResult::Fail);
        assert_eq!(evaluate(&mut db, r, &None, start), DiagResult::Pass);

        feed(&mut db, t, DiagResult::Fail);
        let soon = start + Duration::from_millis(10);
        assert_eq!(evaluate(&mut db, r, &None, soon), DiagResult::Fail);

        // Outside the window the old failures no longer count.
        feed(&mut db, t, DiagResult::Fail);
        let late = start + Duration::from_millis(500);
        assert_eq!(evaluate(&mut db, r, &None, late), DiagResult::Pass);
    }

    #[test]
    fn test_all_inputs_excluded_is_ignore() {
        let mut db = Db::new();
        let t = test_obj(&mut db, "t");
        let r = rule_obj(&mut db, "r", RuleOp::OnFail, 0, 0, &[t]);

        feed(&mut db, t, DiagResult::Abort);
        assert_eq!(
            evaluate(&mut db, r, &None, Instant::now()),
            DiagResult::Ignore
        );
    }

    #[test]
    fn test_disable_always_passes() {
        let mut db = Db::new();
        let t = test_obj(&mut db, "t");
        let r = rule_obj(&mut db, "r", RuleOp::Disable, 0, 0, &[t]);

        feed(&mut db, t, DiagResult::Fail);
        assert_eq!(
            evaluate(&mut db, r, &None, Instant::now()),
            DiagResult::Pass
        );
    }

    #[test]
    fn test_peek_does_not_advance_windows() {
        let mut db = Db::new();
        let t = test_obj(&mut db, "t");
        let r = rule_obj(&mut db, "r", RuleOp::NInRow, 2, 0, &[t]);

        let now = Instant::now();
        feed(&mut db, t, DiagResult::Fail);
        evaluate(&mut db, r, &None, now);
        assert_eq!(db.obj(r).unwrap().base.window.consecutive_fails, 1);

        // Peeking twice must not move the counter.
        assert_eq!(peek(&db, r, &None, now), DiagResult::Pass);
        assert_eq!(peek(&db, r, &None, now), DiagResult::Pass);
        assert_eq!(db.obj(r).unwrap().base.window.consecutive_fails, 1);
    }
}
